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

use std::fmt;
use std::io;

use thiserror::Error;

use crate::account::model::Uid;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{what} not found")]
    NotFound { what: Missing },
    #[error("Mailbox already exists: {name}")]
    AlreadyExists { name: String },
    #[error("Invalid mailbox name: {name:?}")]
    InvalidName { name: String },
    #[error(
        "Mailbox {name} is not empty ({children} children, {messages} messages)"
    )]
    NotEmpty {
        name: String,
        children: usize,
        messages: usize,
    },
    #[error(transparent)]
    Unsupported(#[from] Unsupported),
    #[error("Mailbox {name} cannot hold messages")]
    MailboxUnselectable { name: String },
    #[error("Mailbox {name} has run out of UIDs")]
    UidsExhausted { name: String },
    #[error("Bad configuration: {0}")]
    BadConfig(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl Error {
    pub fn nx_mailbox(name: impl Into<String>) -> Self {
        Error::NotFound {
            what: Missing::Mailbox(name.into()),
        }
    }

    pub fn nx_message(uid: Uid) -> Self {
        Error::NotFound {
            what: Missing::Message(uid),
        }
    }
}

/// The thing that an `Error::NotFound` refers to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Missing {
    Mailbox(String),
    Message(Uid),
}

impl fmt::Display for Missing {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Missing::Mailbox(ref name) => write!(f, "Mailbox {}", name),
            Missing::Message(uid) => write!(f, "Message UID {}", uid.0.get()),
        }
    }
}

/// Request forms this engine recognises but does not implement, or does not
/// understand at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Unsupported {
    #[error("Wildcard only supported at the end of a pattern: {0:?}")]
    NonTrailingWildcard(String),
    #[error("Unparsable message range: {0:?}")]
    BadRange(String),
    #[error("Unknown or malformed flag: {0:?}")]
    BadFlag(String),
}
