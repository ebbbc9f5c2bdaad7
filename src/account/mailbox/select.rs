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

use log::debug;

use super::Mailbox;
use crate::account::events::MailboxEvent;
use crate::account::model::*;
use crate::account::projection::{project, FetchFields, MessageResult};
use crate::support::error::Error;

impl Mailbox {
    /// The UID the next appended message will receive.
    pub fn uid_next(&self) -> Result<Uid, Error> {
        self.read(|state| Ok(state.uid_next()))
    }

    /// The current UID validity of this mailbox.
    pub fn uid_validity(&self) -> Result<u32, Error> {
        self.read(|state| Ok(state.uid_validity()))
    }

    /// The current sequence number of `uid`.
    ///
    /// Fails with `NotFound` if `uid` isn't in the mailbox (anymore).
    pub fn msn_of(&self, uid: Uid) -> Result<Seqnum, Error> {
        self.read(|state| state.msn_of(uid))
    }

    /// Find the lowest-UID message without `\Seen`, projected onto `fields`.
    pub fn first_unseen(
        &self,
        fields: FetchFields,
    ) -> Result<Option<MessageResult>, Error> {
        self.read(|state| {
            Ok(state.first_unseen().map(|(seqnum, record)| {
                project(record, seqnum, state.uid_validity(), fields)
            }))
        })
    }

    /// Gather the information `STATUS`, `SELECT`, and `EXAMINE` report.
    pub fn status(&self) -> Result<StatusResponse, Error> {
        self.read(|state| {
            Ok(StatusResponse {
                name: self.full_name(),
                messages: state.count(),
                recent: state.recent_count(),
                unseen: state.unseen_count(),
                uid_next: state.uid_next(),
                uid_validity: state.uid_validity(),
            })
        })
    }

    /// Clear `\Recent` from every message, as happens when a session selects
    /// the mailbox read-write.
    ///
    /// Returns how many messages lost the flag.
    pub fn clear_recent(&self) -> Result<usize, Error> {
        let cleared = self.commit(|state, events| {
            let uids = state.clear_recent();
            for &uid in &uids {
                if let Some(record) = state.record(uid) {
                    events.push(MailboxEvent::FlagsUpdated {
                        uid,
                        flags: record.flags.clone(),
                    });
                }
            }
            Ok(uids.len())
        })?;

        debug!(
            "{} Cleared \\Recent on {} messages",
            self.log_prefix(),
            cleared
        );
        Ok(cleared)
    }
}

#[cfg(test)]
mod test {
    use super::super::test_prelude::*;

    #[test]
    fn first_unseen_stable_under_expunge() {
        let mb = set_up();
        let mut uids = Vec::new();
        for _ in 0..5 {
            uids.push(simple_append(&mb, &[Flag::Seen]));
        }
        for _ in 0..3 {
            uids.push(simple_append(&mb, &[]));
        }
        for _ in 0..3 {
            uids.push(simple_append(&mb, &[Flag::Seen]));
        }

        let first = mb
            .first_unseen(FetchFields::UID | FetchFields::MSN)
            .unwrap()
            .unwrap();
        assert_eq!(Some(uids[5]), first.uid());
        assert_eq!(Some(Seqnum::u(6)), first.msn());

        mb.store(
            &MessageSet::uid_range(uids[0], uids[2]),
            StoreMode::Add,
            &[Flag::Deleted],
            FetchFields::NOTHING,
        )
        .unwrap();
        assert_eq!(
            3,
            mb.expunge(&MessageSet::All, FetchFields::NOTHING)
                .unwrap()
                .len()
        );

        let first = mb
            .first_unseen(FetchFields::UID | FetchFields::MSN)
            .unwrap()
            .unwrap();
        assert_eq!(Some(uids[5]), first.uid());
        assert_eq!(Some(Seqnum::u(3)), first.msn());
    }

    #[test]
    fn first_unseen_moves_on_when_expunged() {
        let mb = set_up();
        let a = simple_append(&mb, &[Flag::Deleted]);
        let b = simple_append(&mb, &[]);

        assert_eq!(
            Some(a),
            mb.first_unseen(FetchFields::UID).unwrap().unwrap().uid()
        );
        mb.expunge(&MessageSet::All, FetchFields::NOTHING).unwrap();
        assert_eq!(
            Some(b),
            mb.first_unseen(FetchFields::UID).unwrap().unwrap().uid()
        );

        mb.store(
            &MessageSet::All,
            StoreMode::Add,
            &[Flag::Seen],
            FetchFields::NOTHING,
        )
        .unwrap();
        assert!(mb.first_unseen(FetchFields::UID).unwrap().is_none());
    }

    #[test]
    fn msn_tracks_expunges() {
        let mb = set_up();
        let a = simple_append(&mb, &[Flag::Deleted]);
        let b = simple_append(&mb, &[]);

        assert_eq!(Seqnum::u(2), mb.msn_of(b).unwrap());
        mb.expunge(&MessageSet::All, FetchFields::NOTHING).unwrap();
        assert_eq!(Seqnum::u(1), mb.msn_of(b).unwrap());
        assert_matches!(Err(Error::NotFound { .. }), mb.msn_of(a));
    }

    #[test]
    fn status_and_recent() {
        let mb = set_up();
        simple_append(&mb, &[Flag::Seen]);
        simple_append(&mb, &[]);
        simple_append(&mb, &[]);

        let status = mb.status().unwrap();
        assert_eq!(
            StatusResponse {
                name: "INBOX".to_owned(),
                messages: 3,
                recent: 3,
                unseen: 2,
                uid_next: Uid::u(4),
                uid_validity: 42,
            },
            status
        );

        let (recorder, _id) = listen(&mb);
        assert_eq!(3, mb.clear_recent().unwrap());
        assert_eq!(0, mb.clear_recent().unwrap());
        assert_eq!(0, mb.status().unwrap().recent);

        let events = recorder.take();
        assert_eq!(3, events.len());
        assert_eq!(
            MailboxEvent::FlagsUpdated {
                uid: Uid::u(1),
                flags: vec![Flag::Seen].into_iter().collect(),
            },
            events[0]
        );
    }
}
