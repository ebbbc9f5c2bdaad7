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

use log::info;

use super::Mailbox;
use crate::account::events::MailboxEvent;
use crate::account::id_range::MessageSet;
use crate::account::model::*;
use crate::account::projection::{project, FetchFields, MessageResult};
use crate::support::error::Error;

impl Mailbox {
    /// Expunge messages with the `\Deleted` flag which are in `set`.
    ///
    /// With `MessageSet::All`, this is the `EXPUNGE` operation from RFC 3501;
    /// with a UID set, it is `UID EXPUNGE` from RFC 4315.
    ///
    /// The removed messages are returned projected onto `fields`, in
    /// ascending order. Their `msn()` is the sequence number each had before
    /// anything was removed. One `Expunged` event is produced per message.
    pub fn expunge(
        &self,
        set: &MessageSet,
        fields: FetchFields,
    ) -> Result<Vec<MessageResult>, Error> {
        let results = self.commit(|state, events| {
            let doomed = state
                .resolve(set)
                .into_iter()
                .filter(|&(_, uid)| {
                    state
                        .record(uid)
                        .map_or(false, |r| r.flags.contains(&Flag::Deleted))
                })
                .collect::<Vec<_>>();

            let uid_validity = state.uid_validity();
            let mut results = Vec::with_capacity(doomed.len());
            for (seqnum, uid) in doomed {
                if let Some(record) = state.expunge(uid) {
                    results.push(project(
                        &record,
                        seqnum,
                        uid_validity,
                        fields,
                    ));
                    events.push(MailboxEvent::Expunged { uid });
                }
            }

            Ok(results)
        })?;

        if !results.is_empty() {
            info!("{} Expunged {} messages", self.log_prefix(), results.len());
        }
        Ok(results)
    }
}
