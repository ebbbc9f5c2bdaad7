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

//! The UID/sequence number bookkeeping of a single mailbox.
//!
//! Nothing here does I/O or locking; it's simply the pure state management.
//! `Mailbox` wraps a `MailboxState` in its lock.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::prelude::*;

use super::content::ContentHandle;
use super::id_range::{self, MessageSet};
use super::model::*;
use crate::support::error::Error;

/// Everything the engine knows about one message.
#[derive(Clone)]
pub struct MessageRecord {
    pub uid: Uid,
    pub internal_date: DateTime<FixedOffset>,
    pub flags: FlagSet,
    pub content: Arc<dyn ContentHandle>,
}

impl MessageRecord {
    pub fn size(&self) -> u64 {
        self.content.size()
    }
}

impl fmt::Debug for MessageRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MessageRecord")
            .field("uid", &self.uid)
            .field("internal_date", &self.internal_date)
            .field("flags", &self.flags)
            .field("size", &self.size())
            .finish()
    }
}

/// The message table of one mailbox generation.
///
/// Messages are keyed by UID, and UID order is the canonical order from which
/// sequence numbers are derived on every query.
pub struct MailboxState {
    uid_validity: u32,
    /// The UID the next append will receive.
    next_uid: Uid,
    uid_stride: u32,
    messages: BTreeMap<Uid, MessageRecord>,
}

impl MailboxState {
    pub fn new(uid_validity: u32, uid_stride: u32) -> Self {
        MailboxState {
            uid_validity,
            next_uid: Uid::MIN,
            uid_stride: uid_stride.max(1),
            messages: BTreeMap::new(),
        }
    }

    pub fn uid_validity(&self) -> u32 {
        self.uid_validity
    }

    /// The UID that the next successful insertion will be assigned.
    pub fn uid_next(&self) -> Uid {
        self.next_uid
    }

    /// The number of messages currently present.
    pub fn count(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn key_for(&self, uid: Uid) -> MessageKey {
        MessageKey {
            uid_validity: self.uid_validity,
            uid,
        }
    }

    /// Add a new message, assigning it the next UID.
    ///
    /// Returns `None` without changing anything if the UID space is used up.
    pub fn insert(
        &mut self,
        internal_date: DateTime<FixedOffset>,
        flags: FlagSet,
        content: Arc<dyn ContentHandle>,
    ) -> Option<Uid> {
        let uid = self.next_uid;
        self.next_uid = uid.advance(self.uid_stride)?;
        self.messages.insert(
            uid,
            MessageRecord {
                uid,
                internal_date,
                flags,
                content,
            },
        );
        Some(uid)
    }

    pub fn record(&self, uid: Uid) -> Option<&MessageRecord> {
        self.messages.get(&uid)
    }

    /// Return the sequence number `uid` currently has.
    pub fn msn_of(&self, uid: Uid) -> Result<Seqnum, Error> {
        if !self.messages.contains_key(&uid) {
            return Err(Error::nx_message(uid));
        }

        Ok(Seqnum::from_index(self.messages.range(..uid).count()))
    }

    /// Return the UID currently at `seqnum`, if any.
    pub fn seqnum_to_uid(&self, seqnum: Seqnum) -> Option<Uid> {
        self.messages.keys().nth(seqnum.to_index()).copied()
    }

    /// Return the lowest-UID message without `\Seen`.
    pub fn first_unseen(&self) -> Option<(Seqnum, &MessageRecord)> {
        self.iter()
            .find(|&(_, record)| !record.flags.contains(&Flag::Seen))
    }

    /// Iterate all messages in sequence number order.
    pub fn iter(&self) -> impl Iterator<Item = (Seqnum, &MessageRecord)> {
        self.messages
            .values()
            .enumerate()
            .map(|(ix, record)| (Seqnum::from_index(ix), record))
    }

    /// Select the messages in `set`, ascending, with their current sequence
    /// numbers.
    pub fn resolve(&self, set: &MessageSet) -> Vec<(Seqnum, Uid)> {
        if let MessageSet::All = *set {
            return self.iter().map(|(s, r)| (s, r.uid)).collect();
        }

        let live = self.messages.keys().copied().collect::<Vec<_>>();
        id_range::resolve(set, &live, self.uid_validity)
    }

    /// Update the flags of `uid` according to `mode`.
    ///
    /// `\Recent` is not under client control: it is ignored in `flags`, and
    /// kept as it was by `StoreMode::Replace`.
    ///
    /// Returns the new flags if anything changed.
    pub fn apply_flags(
        &mut self,
        uid: Uid,
        mode: StoreMode,
        flags: &[Flag],
    ) -> Result<Option<FlagSet>, Error> {
        let record = self
            .messages
            .get_mut(&uid)
            .ok_or_else(|| Error::nx_message(uid))?;

        let requested = flags.iter().filter(|&f| Flag::Recent != *f);
        let mut changed = false;
        match mode {
            StoreMode::Add => {
                for flag in requested {
                    changed |= record.flags.insert(flag.clone());
                }
            }
            StoreMode::Remove => {
                for flag in requested {
                    changed |= record.flags.remove(flag);
                }
            }
            StoreMode::Replace => {
                let mut new_flags: FlagSet = requested.cloned().collect();
                if record.flags.contains(&Flag::Recent) {
                    new_flags.insert(Flag::Recent);
                }
                changed = new_flags != record.flags;
                record.flags = new_flags;
            }
        }

        Ok(if changed {
            Some(record.flags.clone())
        } else {
            None
        })
    }

    /// Remove `uid` from the mailbox, returning what it was.
    pub fn expunge(&mut self, uid: Uid) -> Option<MessageRecord> {
        self.messages.remove(&uid)
    }

    pub fn recent_count(&self) -> usize {
        self.messages
            .values()
            .filter(|r| r.flags.contains(&Flag::Recent))
            .count()
    }

    pub fn unseen_count(&self) -> usize {
        self.messages
            .values()
            .filter(|r| !r.flags.contains(&Flag::Seen))
            .count()
    }

    /// Clear `\Recent` from every message, returning the UIDs that had it.
    pub fn clear_recent(&mut self) -> Vec<Uid> {
        let mut cleared = Vec::new();
        for record in self.messages.values_mut() {
            if record.flags.remove(&Flag::Recent) {
                cleared.push(record.uid);
            }
        }
        cleared
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::account::content::{ContentStore, MemoryContentStore};

    fn content() -> Arc<dyn ContentHandle> {
        MemoryContentStore.store(&mut &b"foobar"[..]).unwrap()
    }

    fn now() -> DateTime<FixedOffset> {
        Utc::now().into()
    }

    fn add(state: &mut MailboxState, flags: &[Flag]) -> Uid {
        state
            .insert(now(), flags.iter().cloned().collect(), content())
            .unwrap()
    }

    #[test]
    fn uids_follow_stride() {
        let mut state = MailboxState::new(42, 10);
        assert_eq!(Uid::u(1), state.uid_next());
        assert_eq!(Uid::u(1), add(&mut state, &[]));
        assert_eq!(Uid::u(11), state.uid_next());
        assert_eq!(Uid::u(11), add(&mut state, &[]));
        assert_eq!(Uid::u(21), add(&mut state, &[]));
        assert_eq!(Uid::u(31), state.uid_next());

        // Expunging doesn't cause reuse
        state.expunge(Uid::u(21)).unwrap();
        assert_eq!(Uid::u(31), add(&mut state, &[]));
    }

    #[test]
    fn uid_exhaustion() {
        let mut state = MailboxState::new(1, u32::MAX - 1);
        assert_eq!(None, state.insert(now(), FlagSet::new(), content()));
        assert!(state.is_empty());
        assert_eq!(Uid::MIN, state.uid_next());
    }

    #[test]
    fn seqnum_mapping_after_expunge() {
        let mut state = MailboxState::new(1, 1);
        for _ in 0..5 {
            add(&mut state, &[]);
        }

        assert_eq!(Seqnum::u(3), state.msn_of(Uid::u(3)).unwrap());
        assert_eq!(Some(Uid::u(3)), state.seqnum_to_uid(Seqnum::u(3)));

        state.expunge(Uid::u(2)).unwrap();
        assert_eq!(Seqnum::u(1), state.msn_of(Uid::u(1)).unwrap());
        assert_eq!(Seqnum::u(2), state.msn_of(Uid::u(3)).unwrap());
        assert_eq!(Seqnum::u(4), state.msn_of(Uid::u(5)).unwrap());
        assert_eq!(Some(Uid::u(4)), state.seqnum_to_uid(Seqnum::u(3)));
        assert_eq!(None, state.seqnum_to_uid(Seqnum::u(5)));
        assert_matches!(Err(Error::NotFound { .. }), state.msn_of(Uid::u(2)));
        assert_matches!(Err(Error::NotFound { .. }), state.msn_of(Uid::u(9)));
        assert_eq!(4, state.count());
    }

    #[test]
    fn first_unseen_skips_seen_and_expunged() {
        let mut state = MailboxState::new(1, 1);
        add(&mut state, &[Flag::Seen]);
        let a = add(&mut state, &[]);
        let b = add(&mut state, &[Flag::Recent]);

        assert_eq!(Some(a), state.first_unseen().map(|(_, r)| r.uid));
        state.expunge(a).unwrap();
        let (seqnum, record) = state.first_unseen().unwrap();
        assert_eq!(b, record.uid);
        assert_eq!(Seqnum::u(2), seqnum);

        state
            .apply_flags(b, StoreMode::Add, &[Flag::Seen])
            .unwrap()
            .unwrap();
        assert!(state.first_unseen().is_none());
    }

    #[test]
    fn flag_store_modes() {
        let mut state = MailboxState::new(1, 1);
        let uid = add(&mut state, &[Flag::Recent, Flag::Draft]);
        let kw = Flag::Keyword("$Label1".to_owned());

        let flags = state
            .apply_flags(uid, StoreMode::Add, &[Flag::Seen, kw.clone()])
            .unwrap()
            .unwrap();
        assert_eq!(
            vec![Flag::Draft, Flag::Seen, Flag::Recent, kw.clone()],
            flags.to_vec()
        );

        // No-op reports no change
        assert!(state
            .apply_flags(uid, StoreMode::Add, &[Flag::Seen])
            .unwrap()
            .is_none());

        // Recent cannot be removed by the client
        let flags = state
            .apply_flags(uid, StoreMode::Remove, &[Flag::Draft, Flag::Recent])
            .unwrap()
            .unwrap();
        assert_eq!(vec![Flag::Seen, Flag::Recent, kw], flags.to_vec());

        // Replacement keeps Recent
        let flags = state
            .apply_flags(uid, StoreMode::Replace, &[Flag::Flagged])
            .unwrap()
            .unwrap();
        assert_eq!(vec![Flag::Flagged, Flag::Recent], flags.to_vec());

        assert_matches!(
            Err(Error::NotFound { .. }),
            state.apply_flags(Uid::u(99), StoreMode::Add, &[Flag::Seen])
        );
    }

    #[test]
    fn counts_and_recent() {
        let mut state = MailboxState::new(1, 1);
        add(&mut state, &[Flag::Recent]);
        add(&mut state, &[Flag::Recent, Flag::Seen]);
        add(&mut state, &[]);

        assert_eq!(2, state.recent_count());
        assert_eq!(2, state.unseen_count());
        assert_eq!(vec![Uid::u(1), Uid::u(2)], state.clear_recent());
        assert_eq!(0, state.recent_count());
        assert!(state.clear_recent().is_empty());
    }

    #[test]
    fn resolve_uses_live_table() {
        let mut state = MailboxState::new(7, 5);
        for _ in 0..4 {
            add(&mut state, &[]);
        }
        // UIDs are 1, 6, 11, 16
        assert_eq!(
            vec![(Seqnum::u(2), Uid::u(6)), (Seqnum::u(3), Uid::u(11))],
            state.resolve(&MessageSet::parse_uids("2:12").unwrap())
        );

        let set = MessageSet::parse_seqnums("2:*").unwrap();
        assert_eq!(3, state.resolve(&set).len());
        state.expunge(Uid::u(6)).unwrap();
        assert_eq!(
            vec![(Seqnum::u(2), Uid::u(11)), (Seqnum::u(3), Uid::u(16))],
            state.resolve(&set)
        );

        assert_eq!(
            vec![(Seqnum::u(3), Uid::u(16))],
            state.resolve(&MessageSet::Key(state.key_for(Uid::u(16))))
        );
    }
}
