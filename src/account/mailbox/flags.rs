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
use crate::account::id_range::MessageSet;
use crate::account::model::*;
use crate::account::projection::{project, FetchFields, MessageResult};
use crate::support::error::Error;

impl Mailbox {
    /// Update the flags of every message in `set`.
    ///
    /// This is the `STORE` operation. `\Recent` cannot be set or cleared this
    /// way; it is ignored in `flags` and preserved by `StoreMode::Replace`.
    ///
    /// A `FlagsUpdated` event is produced for each message whose flags
    /// actually changed. The return value is the projection of every selected
    /// message after the update, changed or not.
    pub fn store(
        &self,
        set: &MessageSet,
        mode: StoreMode,
        flags: &[Flag],
        fields: FetchFields,
    ) -> Result<Vec<MessageResult>, Error> {
        let prefix = self.log_prefix();
        self.commit(|state, events| {
            let targets = state.resolve(set);
            let mut results = Vec::with_capacity(targets.len());
            for (seqnum, uid) in targets {
                if let Some(flags) = state.apply_flags(uid, mode, flags)? {
                    debug!(
                        "{} UID {} flags now {:?}",
                        prefix,
                        uid.0.get(),
                        flags
                    );
                    events.push(MailboxEvent::FlagsUpdated { uid, flags });
                }

                if let Some(record) = state.record(uid) {
                    results.push(project(
                        record,
                        seqnum,
                        state.uid_validity(),
                        fields,
                    ));
                }
            }

            Ok(results)
        })
    }
}
