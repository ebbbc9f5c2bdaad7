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

use std::collections::HashSet;

use chrono::prelude::*;

use super::Mailbox;
use crate::account::id_range::{IdRange, MessageSet};
use crate::account::mailbox_state::{MailboxState, MessageRecord};
use crate::account::model::*;
use crate::support::error::Error;

/// A search criterion over the messages of one mailbox.
///
/// Only criteria answerable from message metadata are supported; message
/// content is opaque to this layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchKey {
    All,
    /// Messages having this flag.
    Flag(Flag),
    /// Messages lacking this flag.
    NotFlag(Flag),
    Uid(Vec<IdRange>),
    Seqnum(Vec<IdRange>),
    /// Size strictly greater than this many bytes.
    Larger(u64),
    /// Size strictly less than this many bytes.
    Smaller(u64),
    /// Internal date strictly before this day.
    Before(NaiveDate),
    /// Internal date on this day.
    On(NaiveDate),
    /// Internal date on or after this day.
    Since(NaiveDate),
    /// All of these match. An empty list matches everything.
    And(Vec<SearchKey>),
    Or(Box<SearchKey>, Box<SearchKey>),
    Not(Box<SearchKey>),
}

/// `SearchKey` with its message sets resolved against a particular state.
enum Compiled {
    All,
    Flag(Flag),
    NotFlag(Flag),
    In(HashSet<Uid>),
    Larger(u64),
    Smaller(u64),
    Before(NaiveDate),
    On(NaiveDate),
    Since(NaiveDate),
    And(Vec<Compiled>),
    Or(Box<Compiled>, Box<Compiled>),
    Not(Box<Compiled>),
}

impl Compiled {
    fn compile(key: &SearchKey, state: &MailboxState) -> Self {
        let resolved = |set: MessageSet| {
            state
                .resolve(&set)
                .into_iter()
                .map(|(_, uid)| uid)
                .collect::<HashSet<_>>()
        };

        match *key {
            SearchKey::All => Compiled::All,
            SearchKey::Flag(ref f) => Compiled::Flag(f.clone()),
            SearchKey::NotFlag(ref f) => Compiled::NotFlag(f.clone()),
            SearchKey::Uid(ref ranges) => {
                Compiled::In(resolved(MessageSet::Uids(ranges.clone())))
            }
            SearchKey::Seqnum(ref ranges) => {
                Compiled::In(resolved(MessageSet::Seqnums(ranges.clone())))
            }
            SearchKey::Larger(n) => Compiled::Larger(n),
            SearchKey::Smaller(n) => Compiled::Smaller(n),
            SearchKey::Before(d) => Compiled::Before(d),
            SearchKey::On(d) => Compiled::On(d),
            SearchKey::Since(d) => Compiled::Since(d),
            SearchKey::And(ref keys) => Compiled::And(
                keys.iter().map(|k| Compiled::compile(k, state)).collect(),
            ),
            SearchKey::Or(ref a, ref b) => Compiled::Or(
                Box::new(Compiled::compile(a, state)),
                Box::new(Compiled::compile(b, state)),
            ),
            SearchKey::Not(ref k) => {
                Compiled::Not(Box::new(Compiled::compile(k, state)))
            }
        }
    }

    fn matches(&self, record: &MessageRecord) -> bool {
        let date = || record.internal_date.naive_local().date();

        match *self {
            Compiled::All => true,
            Compiled::Flag(ref f) => record.flags.contains(f),
            Compiled::NotFlag(ref f) => !record.flags.contains(f),
            Compiled::In(ref uids) => uids.contains(&record.uid),
            Compiled::Larger(n) => record.size() > n,
            Compiled::Smaller(n) => record.size() < n,
            Compiled::Before(d) => date() < d,
            Compiled::On(d) => date() == d,
            Compiled::Since(d) => date() >= d,
            Compiled::And(ref all) => all.iter().all(|c| c.matches(record)),
            Compiled::Or(ref a, ref b) => {
                a.matches(record) || b.matches(record)
            }
            Compiled::Not(ref c) => !c.matches(record),
        }
    }
}

impl Mailbox {
    /// The `UID SEARCH` operation.
    ///
    /// Returns the matching UIDs in ascending order.
    pub fn search(&self, key: &SearchKey) -> Result<Vec<Uid>, Error> {
        Ok(self
            .search_impl(key)?
            .into_iter()
            .map(|(_, uid)| uid)
            .collect())
    }

    /// The `SEARCH` operation.
    ///
    /// Returns the sequence numbers of matching messages in ascending order.
    pub fn seqnum_search(&self, key: &SearchKey) -> Result<Vec<Seqnum>, Error> {
        Ok(self
            .search_impl(key)?
            .into_iter()
            .map(|(seqnum, _)| seqnum)
            .collect())
    }

    fn search_impl(
        &self,
        key: &SearchKey,
    ) -> Result<Vec<(Seqnum, Uid)>, Error> {
        self.read(|state| {
            let compiled = Compiled::compile(key, state);
            Ok(state
                .iter()
                .filter(|&(_, record)| compiled.matches(record))
                .map(|(seqnum, record)| (seqnum, record.uid))
                .collect())
        })
    }
}
