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

use std::convert::TryFrom;
use std::fmt;
use std::iter::FromIterator;
use std::num::NonZeroU32;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::support::error::{Error, Unsupported};

/// Uniquely identifies a message within a single mailbox generation.
///
/// UIDs start at 1 and increase strictly as messages are added to the
/// mailbox. They are never reused while the UID validity of the mailbox
/// stays the same, but need not be contiguous.
#[derive(
    Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(transparent)]
pub struct Uid(pub NonZeroU32);

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Uid({})", self.0.get())
    }
}

impl Uid {
    // Unsafe because new() isn't const for some reason
    pub const MIN: Self = unsafe { Uid(NonZeroU32::new_unchecked(1)) };
    /// The greatest UID. This value doubles as the `*` sentinel in ranges, so
    /// it is never actually assigned to a message.
    pub const MAX: Self = unsafe { Uid(NonZeroU32::new_unchecked(u32::MAX)) };

    pub fn of(uid: u32) -> Option<Self> {
        NonZeroU32::new(uid).map(Uid)
    }

    /// Return the UID `stride` after this one, or `None` if that would reach
    /// `Uid::MAX`.
    pub fn advance(self, stride: u32) -> Option<Self> {
        self.0
            .get()
            .checked_add(stride)
            .filter(|&v| v < u32::MAX)
            .and_then(Uid::of)
    }

    #[cfg(test)]
    pub fn u(uid: u32) -> Self {
        Uid::of(uid).unwrap()
    }
}

impl TryFrom<u32> for Uid {
    type Error = ();

    fn try_from(v: u32) -> Result<Self, ()> {
        Self::of(v).ok_or(())
    }
}

impl Into<u32> for Uid {
    fn into(self) -> u32 {
        self.0.get()
    }
}

/// A message sequence number.
///
/// This is the 1-based rank of a message among the messages currently in the
/// mailbox, ordered by UID. It is never stored anywhere; every expunge shifts
/// the sequence numbers of all later messages, so it is always recomputed
/// from the live message table.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Seqnum(pub NonZeroU32);

impl Seqnum {
    // Unsafe because new() isn't const for some reason
    pub const MIN: Self = unsafe { Seqnum(NonZeroU32::new_unchecked(1)) };
    pub const MAX: Self =
        unsafe { Seqnum(NonZeroU32::new_unchecked(u32::MAX)) };

    pub fn of(seqnum: u32) -> Option<Self> {
        NonZeroU32::new(seqnum).map(Seqnum)
    }

    #[cfg(test)]
    pub fn u(seqnum: u32) -> Self {
        Seqnum::of(seqnum).unwrap()
    }

    pub fn to_index(self) -> usize {
        self.0.get() as usize - 1
    }

    /// Convert a 0-based index into a sequence number.
    ///
    /// Indices beyond the 32-bit range saturate at `Seqnum::MAX`; no mailbox
    /// gets close to that size.
    pub fn from_index(ix: usize) -> Self {
        u32::try_from(ix + 1)
            .ok()
            .and_then(Seqnum::of)
            .unwrap_or(Seqnum::MAX)
    }
}

impl TryFrom<u32> for Seqnum {
    type Error = ();

    fn try_from(v: u32) -> Result<Self, ()> {
        Self::of(v).ok_or(())
    }
}

impl Into<u32> for Seqnum {
    fn into(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Debug for Seqnum {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Seqnum({})", self.0.get())
    }
}

/// Identifies a message independently of any sequence number regime.
///
/// A key is only meaningful while the mailbox keeps the same UID validity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageKey {
    pub uid_validity: u32,
    pub uid: Uid,
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:08x}:{}", self.uid_validity, self.uid.0.get())
    }
}

/// A message flag.
///
/// System flags are represented as top-level enum values. Keywords are in the
/// `Keyword` case.
///
/// The `Display` format of this type is the exact string value that would be
/// sent over the wire. `FromStr` does the reverse conversion, and also
/// understands non-standard casing of the system flags.
#[derive(Clone, Serialize, Deserialize)]
pub enum Flag {
    Answered,
    Deleted,
    Draft,
    Flagged,
    Seen,
    /// The message arrived since the mailbox was last selected. Clients
    /// cannot set or clear this one.
    Recent,
    Keyword(String),
}

impl Flag {
    fn system_bit(&self) -> Option<SystemFlags> {
        match *self {
            Flag::Answered => Some(SystemFlags::ANSWERED),
            Flag::Deleted => Some(SystemFlags::DELETED),
            Flag::Draft => Some(SystemFlags::DRAFT),
            Flag::Flagged => Some(SystemFlags::FLAGGED),
            Flag::Seen => Some(SystemFlags::SEEN),
            Flag::Recent => Some(SystemFlags::RECENT),
            Flag::Keyword(_) => None,
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            &Flag::Answered => write!(f, "\\Answered"),
            &Flag::Deleted => write!(f, "\\Deleted"),
            &Flag::Draft => write!(f, "\\Draft"),
            &Flag::Flagged => write!(f, "\\Flagged"),
            &Flag::Seen => write!(f, "\\Seen"),
            &Flag::Recent => write!(f, "\\Recent"),
            &Flag::Keyword(ref kw) => write!(f, "{}", kw),
        }
    }
}

impl fmt::Debug for Flag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        <Flag as fmt::Display>::fmt(self, f)
    }
}

impl FromStr for Flag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        if s.eq_ignore_ascii_case("\\answered") {
            Ok(Flag::Answered)
        } else if s.eq_ignore_ascii_case("\\deleted") {
            Ok(Flag::Deleted)
        } else if s.eq_ignore_ascii_case("\\draft") {
            Ok(Flag::Draft)
        } else if s.eq_ignore_ascii_case("\\flagged") {
            Ok(Flag::Flagged)
        } else if s.eq_ignore_ascii_case("\\seen") {
            Ok(Flag::Seen)
        } else if s.eq_ignore_ascii_case("\\recent") {
            Ok(Flag::Recent)
        } else if !s.is_empty()
            && !s.starts_with('\\')
            && s.as_bytes().iter().copied().all(is_atom_char)
        {
            Ok(Flag::Keyword(s.to_owned()))
        } else {
            Err(Unsupported::BadFlag(s.to_owned()).into())
        }
    }
}

fn is_atom_char(ch: u8) -> bool {
    match ch {
        0..=b' ' => false,
        127..=255 => false,
        b'(' | b')' | b'{' | b'*' | b'%' | b'\\' | b'"' | b']' => false,
        _ => true,
    }
}

impl PartialEq for Flag {
    fn eq(&self, other: &Flag) -> bool {
        match (self, other) {
            // Keywords are expected to be case-insensitive, despite RFC 3501
            // not requiring that. Only ASCII case-insensitivity is done.
            (&Flag::Keyword(ref a), &Flag::Keyword(ref b)) => {
                a.eq_ignore_ascii_case(b)
            }
            (a, b) => {
                a.system_bit().is_some() && a.system_bit() == b.system_bit()
            }
        }
    }
}

impl Eq for Flag {}

bitflags! {
    /// The system flags of a single message, packed.
    #[derive(Default)]
    pub struct SystemFlags: u8 {
        const ANSWERED = 1 << 0;
        const DELETED = 1 << 1;
        const DRAFT = 1 << 2;
        const FLAGGED = 1 << 3;
        const SEEN = 1 << 4;
        const RECENT = 1 << 5;
    }
}

/// The full flag state of one message.
///
/// System flags live in a single bitset; keywords are kept in insertion order
/// and compared ASCII case-insensitively.
#[derive(Clone, Default)]
pub struct FlagSet {
    system: SystemFlags,
    keywords: Vec<String>,
}

impl FlagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, flag: &Flag) -> bool {
        match *flag {
            Flag::Keyword(ref kw) => {
                self.keywords.iter().any(|k| k.eq_ignore_ascii_case(kw))
            }
            ref system => system
                .system_bit()
                .map_or(false, |bit| self.system.contains(bit)),
        }
    }

    /// Add `flag`. Returns whether the set changed.
    pub fn insert(&mut self, flag: Flag) -> bool {
        if self.contains(&flag) {
            return false;
        }

        match flag.system_bit() {
            Some(bit) => self.system.insert(bit),
            None => {
                if let Flag::Keyword(kw) = flag {
                    self.keywords.push(kw);
                }
            }
        }
        true
    }

    /// Remove `flag`. Returns whether the set changed.
    pub fn remove(&mut self, flag: &Flag) -> bool {
        if !self.contains(flag) {
            return false;
        }

        match *flag {
            Flag::Keyword(ref kw) => {
                self.keywords.retain(|k| !k.eq_ignore_ascii_case(kw))
            }
            ref system => {
                if let Some(bit) = system.system_bit() {
                    self.system.remove(bit);
                }
            }
        }
        true
    }

    pub fn system(&self) -> SystemFlags {
        self.system
    }

    pub fn is_empty(&self) -> bool {
        self.system.is_empty() && self.keywords.is_empty()
    }

    /// Iterate the flags, system flags first in a fixed order, then keywords
    /// in the order they were added.
    pub fn iter(&self) -> impl Iterator<Item = Flag> + '_ {
        static ORDER: [(SystemFlags, Flag); 6] = [
            (SystemFlags::ANSWERED, Flag::Answered),
            (SystemFlags::DELETED, Flag::Deleted),
            (SystemFlags::DRAFT, Flag::Draft),
            (SystemFlags::FLAGGED, Flag::Flagged),
            (SystemFlags::SEEN, Flag::Seen),
            (SystemFlags::RECENT, Flag::Recent),
        ];

        ORDER
            .iter()
            .filter(move |&&(bit, _)| self.system.contains(bit))
            .map(|&(_, ref flag)| flag.clone())
            .chain(self.keywords.iter().cloned().map(Flag::Keyword))
    }

    pub fn to_vec(&self) -> Vec<Flag> {
        self.iter().collect()
    }
}

impl PartialEq for FlagSet {
    fn eq(&self, other: &FlagSet) -> bool {
        self.system == other.system
            && self.keywords.len() == other.keywords.len()
            && self
                .keywords
                .iter()
                .all(|kw| other.contains(&Flag::Keyword(kw.clone())))
    }
}

impl Eq for FlagSet {}

impl fmt::Debug for FlagSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<Flag> for FlagSet {
    fn from_iter<I: IntoIterator<Item = Flag>>(it: I) -> Self {
        let mut this = FlagSet::new();
        for flag in it {
            this.insert(flag);
        }
        this
    }
}

/// How a `STORE`-style flag update combines with the existing flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreMode {
    /// `+FLAGS`
    Add,
    /// `-FLAGS`
    Remove,
    /// `FLAGS`
    Replace,
}

impl StoreMode {
    /// Translate the `(value, replace)` pair of the classic `setFlags` call.
    pub fn from_value_replace(value: bool, replace: bool) -> Self {
        if replace {
            StoreMode::Replace
        } else if value {
            StoreMode::Add
        } else {
            StoreMode::Remove
        }
    }
}

/// Attributes that may be reported on mailboxes by `LIST`.
#[derive(
    Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord,
)]
pub enum MailboxAttribute {
    Noselect,
    HasChildren,
    HasNoChildren,
    Subscribed,
}

impl MailboxAttribute {
    pub fn name(&self) -> &'static str {
        match self {
            &MailboxAttribute::Noselect => "\\Noselect",
            &MailboxAttribute::HasChildren => "\\HasChildren",
            &MailboxAttribute::HasNoChildren => "\\HasNoChildren",
            &MailboxAttribute::Subscribed => "\\Subscribed",
        }
    }
}

impl fmt::Display for MailboxAttribute {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl fmt::Debug for MailboxAttribute {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        <MailboxAttribute as fmt::Display>::fmt(self, f)
    }
}

/// A `LIST` or `LSUB` response.
#[derive(Debug, Clone, PartialEq, Eq, Default, PartialOrd, Ord)]
pub struct ListResponse {
    /// The full name of this mailbox.
    pub name: String,
    /// Any attributes on this mailbox.
    pub attributes: Vec<MailboxAttribute>,
}

impl ListResponse {
    pub fn is_selectable(&self) -> bool {
        !self.attributes.contains(&MailboxAttribute::Noselect)
    }
}

/// Everything a `STATUS`, `SELECT`, or `EXAMINE` reports about a mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusResponse {
    pub name: String,
    pub messages: usize,
    pub recent: usize,
    pub unseen: usize,
    pub uid_next: Uid,
    pub uid_validity: u32,
}
