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

use crate::support::error::{Error, Unsupported};

/// Split a full mailbox path into its segments.
///
/// Empty segments are kept so that callers can reject them. It does not
/// check for name safety.
pub fn parse_mailbox_path(
    path: &str,
    delimiter: char,
) -> impl Iterator<Item = &str> + '_ {
    path.split(delimiter)
}

/// Split `path` into its parent path and last segment.
///
/// Top-level names have an empty parent.
pub fn split_parent(path: &str, delimiter: char) -> (&str, &str) {
    match path.rfind(delimiter) {
        Some(ix) => (&path[..ix], &path[ix + delimiter.len_utf8()..]),
        None => ("", path),
    }
}

/// The two `LIST` wildcards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wildcard {
    /// `*`, which matches across hierarchy levels.
    Any,
    /// `%`, which stops at the hierarchy delimiter.
    Level,
}

/// A `LIST` pattern, broken down into the part of the hierarchy to walk.
///
/// Only patterns whose sole wildcard is the last character are supported.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListPattern {
    /// The full path of the mailbox whose children are matched. Empty for the
    /// top level.
    pub parent: String,
    /// The prefix (or, without a wildcard, the whole) of the matched children's
    /// names.
    pub leaf_prefix: String,
    pub wildcard: Option<Wildcard>,
}

impl ListPattern {
    /// Combine `reference` and `pattern` as `LIST` does and break down the
    /// result.
    ///
    /// Returns `Ok(None)` if nothing at all can match, which is the case when
    /// `reference` contains wildcards (no mailbox name can contain them) or
    /// `pattern` is empty.
    pub fn parse(
        reference: &str,
        pattern: &str,
        delimiter: char,
    ) -> Result<Option<Self>, Error> {
        if pattern.is_empty()
            || reference.contains(|c| '%' == c || '*' == c)
        {
            return Ok(None);
        }

        let mut full = reference.to_owned();
        if !full.is_empty() && !full.ends_with(delimiter) {
            full.push(delimiter);
        }
        full.push_str(pattern);

        let wildcard = match full.find(|c| '%' == c || '*' == c) {
            None => None,
            Some(ix) if ix + 1 == full.len() => {
                let wildcard = if full.ends_with('*') {
                    Wildcard::Any
                } else {
                    Wildcard::Level
                };
                full.pop();
                Some(wildcard)
            }
            Some(_) => {
                return Err(Unsupported::NonTrailingWildcard(full).into())
            }
        };

        let (parent, leaf_prefix) = split_parent(&full, delimiter);
        Ok(Some(ListPattern {
            parent: parent.to_owned(),
            leaf_prefix: leaf_prefix.to_owned(),
            wildcard,
        }))
    }

    /// Whether a child called `name` of the pattern's parent matches.
    pub fn matches_leaf(&self, name: &str) -> bool {
        match self.wildcard {
            None => name.eq_ignore_ascii_case(&self.leaf_prefix),
            Some(_) => name
                .get(..self.leaf_prefix.len())
                .map_or(false, |p| p.eq_ignore_ascii_case(&self.leaf_prefix)),
        }
    }
}
