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

//! Message ranges and their resolution against a live mailbox.
//!
//! An `IdRange` is one element of an IMAP sequence set, exactly as written:
//! the parser does not reorder the bounds, so `*:9` is kept as
//! `(IdRange::WILDCARD, 9)`. Anything that enumerates a range must take the
//! minimum and maximum itself, which `resolve` does after substituting the
//! wildcard with the highest value present *at resolution time*.

use std::fmt;

use super::model::*;
use crate::support::error::{Error, Unsupported};

/// A single inclusive range of UIDs or sequence numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IdRange {
    pub low: u32,
    pub high: u32,
}

impl IdRange {
    /// The value `*` parses to: "the highest UID or sequence number currently
    /// in the mailbox".
    pub const WILDCARD: u32 = u32::MAX;

    pub fn new(low: u32, high: u32) -> Self {
        IdRange { low, high }
    }

    pub fn single(v: u32) -> Self {
        IdRange { low: v, high: v }
    }

    /// Parse a comma-separated IMAP sequence set.
    ///
    /// Bounds are stored in the order written.
    pub fn parse_list(raw: &str) -> Result<Vec<Self>, Error> {
        fn bound(raw: &str, whole: &str) -> Result<u32, Error> {
            if "*" == raw {
                return Ok(IdRange::WILDCARD);
            }

            // u32::parse would accept a leading '+'
            if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
                if let Ok(v) = raw.parse::<u32>() {
                    if v > 0 {
                        return Ok(v);
                    }
                }
            }

            Err(Unsupported::BadRange(whole.to_owned()).into())
        }

        let mut ret = Vec::new();
        for part in raw.split(',') {
            let mut subs = part.split(':');
            match (subs.next(), subs.next(), subs.next()) {
                (Some(only), None, None) => {
                    ret.push(IdRange::single(bound(only, raw)?));
                }
                (Some(low), Some(high), None) => {
                    ret.push(IdRange::new(bound(low, raw)?, bound(high, raw)?));
                }
                _ => return Err(Unsupported::BadRange(raw.to_owned()).into()),
            }
        }

        Ok(ret)
    }

    /// Substitute the wildcard with `highest` and return the sorted bounds.
    fn normalise(self, highest: u32) -> (u32, u32) {
        let fix = |v| if IdRange::WILDCARD == v { highest } else { v };
        let (a, b) = (fix(self.low), fix(self.high));
        (a.min(b), a.max(b))
    }
}

impl fmt::Display for IdRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fn bound(f: &mut fmt::Formatter, v: u32) -> fmt::Result {
            if IdRange::WILDCARD == v {
                write!(f, "*")
            } else {
                write!(f, "{}", v)
            }
        }

        bound(f, self.low)?;
        if self.low != self.high {
            write!(f, ":")?;
            bound(f, self.high)?;
        }
        Ok(())
    }
}

/// A selection of messages in a mailbox.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageSet {
    /// Every message currently in the mailbox.
    All,
    /// The union of these UID ranges.
    Uids(Vec<IdRange>),
    /// The union of these sequence number ranges.
    Seqnums(Vec<IdRange>),
    /// Exactly one message, if it still exists in the same generation.
    Key(MessageKey),
}

impl MessageSet {
    pub fn uid_range(from: Uid, to: Uid) -> Self {
        MessageSet::Uids(vec![IdRange::new(from.into(), to.into())])
    }

    pub fn just_uid(uid: Uid) -> Self {
        MessageSet::Uids(vec![IdRange::single(uid.into())])
    }

    pub fn seqnum_range(from: Seqnum, to: Seqnum) -> Self {
        MessageSet::Seqnums(vec![IdRange::new(from.into(), to.into())])
    }

    /// Parse a `UID FETCH`-style set.
    pub fn parse_uids(raw: &str) -> Result<Self, Error> {
        IdRange::parse_list(raw).map(MessageSet::Uids)
    }

    /// Parse a `FETCH`-style set.
    pub fn parse_seqnums(raw: &str) -> Result<Self, Error> {
        IdRange::parse_list(raw).map(MessageSet::Seqnums)
    }
}

/// Resolve `set` against `live`, the UIDs currently in a mailbox in strictly
/// ascending order.
///
/// The result is the selected messages with their current sequence numbers,
/// ascending and free of duplicates. UIDs and sequence numbers outside what
/// exists are silently dropped.
pub fn resolve(
    set: &MessageSet,
    live: &[Uid],
    uid_validity: u32,
) -> Vec<(Seqnum, Uid)> {
    // Half-open index ranges into `live`
    let mut spans: Vec<(usize, usize)> = Vec::new();

    match *set {
        MessageSet::All => spans.push((0, live.len())),
        MessageSet::Uids(ref ranges) => {
            if let Some(&highest) = live.last() {
                for range in ranges {
                    let (low, high) = range.normalise(highest.into());
                    let start = live.partition_point(|u| u.0.get() < low);
                    let end = live.partition_point(|u| u.0.get() <= high);
                    spans.push((start, end));
                }
            }
        }
        MessageSet::Seqnums(ref ranges) => {
            let count = live.len() as u32;
            if count > 0 {
                for range in ranges {
                    let (low, high) = range.normalise(count);
                    // There is no sequence number 0
                    let low = low.max(1);
                    let high = high.min(count);
                    if low <= high {
                        spans.push((low as usize - 1, high as usize));
                    }
                }
            }
        }
        MessageSet::Key(key) => {
            if key.uid_validity == uid_validity {
                if let Ok(ix) = live.binary_search(&key.uid) {
                    spans.push((ix, ix + 1));
                }
            }
        }
    }

    spans.retain(|&(start, end)| start < end);
    spans.sort_unstable();

    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(spans.len());
    for (start, end) in spans {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }

    merged
        .into_iter()
        .flat_map(|(start, end)| start..end)
        .map(|ix| (Seqnum::from_index(ix), live[ix]))
        .collect()
}
