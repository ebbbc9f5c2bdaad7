//-
// Copyright (c) 2020, 2024, Jason Lingle
//
// This file is part of Pigeonhole.
//
// Pigeonhole is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Pigeonhole is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along with
// Pigeonhole. If not, see <http://www.gnu.org/licenses/>.

//! Who a namespace belongs to.

use crate::support::error::Error;
use crate::support::safe_name::is_safe_name;

/// Supplies the identity whose personal namespace a session works in.
///
/// Authentication happens elsewhere; by the time something implements this
/// trait, the user is known.
pub trait IdentityProvider: Send + Sync {
    /// The user's login name, used verbatim as their namespace segment.
    fn user_name(&self) -> &str;

    /// The full name of the user's personal namespace root, e.g.
    /// `#users.joachim`.
    fn namespace_root(&self, users_prefix: &str, delimiter: char) -> String {
        format!("{}{}{}", users_prefix, delimiter, self.user_name())
    }
}

/// The plain `IdentityProvider`: just a validated user name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UserIdentity {
    name: String,
}

impl UserIdentity {
    /// Wrap `name`, which must be usable as a single mailbox name segment
    /// under `delimiter`.
    pub fn new(
        name: impl Into<String>,
        delimiter: char,
    ) -> Result<Self, Error> {
        let name = name.into();
        if !is_safe_name(&name, delimiter) {
            return Err(Error::InvalidName { name });
        }

        Ok(UserIdentity { name })
    }
}

impl IdentityProvider for UserIdentity {
    fn user_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn namespace_root_naming() {
        let joachim = UserIdentity::new("joachim", '.').unwrap();
        assert_eq!("joachim", joachim.user_name());
        assert_eq!("#users.joachim", joachim.namespace_root("#users", '.'));
        assert_eq!("#home/joachim", joachim.namespace_root("#home", '/'));
    }

    #[test]
    fn unsafe_user_names_rejected() {
        assert_matches!(
            Err(Error::InvalidName { .. }),
            UserIdentity::new("jo.achim", '.')
        );
        assert_matches!(
            Err(Error::InvalidName { .. }),
            UserIdentity::new("", '.')
        );
        assert_matches!(
            Err(Error::InvalidName { .. }),
            UserIdentity::new("#users", '.')
        );
        assert!(UserIdentity::new("jo.achim", '/').is_ok());
    }
}
