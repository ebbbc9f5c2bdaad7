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

use std::io::Read;

use chrono::prelude::*;
use log::info;

use super::Mailbox;
use crate::account::events::MailboxEvent;
use crate::account::id_range::MessageSet;
use crate::account::model::*;
use crate::account::projection::{project, FetchFields, MessageResult};
use crate::support::error::Error;

impl Mailbox {
    /// Append the given message to this mailbox.
    ///
    /// Returns the UID of the new message. The message gets `\Recent` if the
    /// mailbox is configured to mark new messages that way; any `\Recent` in
    /// `flags` is ignored.
    pub fn append(
        &self,
        internal_date: DateTime<FixedOffset>,
        flags: impl IntoIterator<Item = Flag>,
        data: impl Read,
    ) -> Result<Uid, Error> {
        self.append_with_recent(
            internal_date,
            flags,
            data,
            self.config.mark_recent,
        )
    }

    /// Like `append`, but explicitly controls whether the new message gets the
    /// `\Recent` flag.
    ///
    /// The content is fully written to the content store before the mailbox
    /// is locked.
    pub fn append_with_recent(
        &self,
        internal_date: DateTime<FixedOffset>,
        flags: impl IntoIterator<Item = Flag>,
        mut data: impl Read,
        recent: bool,
    ) -> Result<Uid, Error> {
        let mut flags = flags
            .into_iter()
            .filter(|f| Flag::Recent != *f)
            .collect::<FlagSet>();
        if recent {
            flags.insert(Flag::Recent);
        }

        let content = self.content_store.store(&mut data)?;
        let size = content.size();

        let uid = self.commit(|state, events| {
            let uid = state
                .insert(internal_date, flags, content)
                .ok_or_else(|| self.uids_exhausted())?;
            events.push(MailboxEvent::Added { uid });
            Ok(uid)
        })?;

        info!(
            "{} Appended UID {} ({} bytes)",
            self.log_prefix(),
            uid.0.get(),
            size
        );
        Ok(uid)
    }

    /// Fetch the messages in `set`, projected onto `fields`.
    ///
    /// Results are in ascending UID order. Members of `set` which don't exist
    /// are silently skipped.
    pub fn fetch(
        &self,
        set: &MessageSet,
        fields: FetchFields,
    ) -> Result<Vec<MessageResult>, Error> {
        self.read(|state| {
            Ok(state
                .resolve(set)
                .into_iter()
                .filter_map(|(seqnum, uid)| {
                    state.record(uid).map(|record| {
                        project(record, seqnum, state.uid_validity(), fields)
                    })
                })
                .collect())
        })
    }

    /// Copy the messages in `set` into `dst`.
    ///
    /// Flags and internal dates are carried over, except that `\Recent` is
    /// set according to `dst`'s configuration. The content itself is shared,
    /// not duplicated.
    ///
    /// Returns `(source UID, new UID)` pairs in ascending order.
    pub fn copy_to(
        &self,
        set: &MessageSet,
        dst: &Mailbox,
    ) -> Result<Vec<(Uid, Uid)>, Error> {
        // Snapshot first so that copying a mailbox into itself can't deadlock
        let sources = self.read(|state| {
            Ok(state
                .resolve(set)
                .into_iter()
                .filter_map(|(_, uid)| state.record(uid).cloned())
                .collect::<Vec<_>>())
        })?;

        let recent = dst.config.mark_recent;
        let mapping = dst.commit(|state, events| {
            let mut mapping = Vec::with_capacity(sources.len());
            for source in sources {
                let mut flags = source.flags;
                flags.remove(&Flag::Recent);
                if recent {
                    flags.insert(Flag::Recent);
                }

                let uid = state
                    .insert(source.internal_date, flags, source.content)
                    .ok_or_else(|| dst.uids_exhausted())?;
                events.push(MailboxEvent::Added { uid });
                mapping.push((source.uid, uid));
            }
            Ok(mapping)
        })?;

        info!(
            "{} Copied {} messages to {}",
            self.log_prefix(),
            mapping.len(),
            dst.full_name()
        );
        Ok(mapping)
    }

    fn uids_exhausted(&self) -> Error {
        Error::UidsExhausted {
            name: self.full_name(),
        }
    }
}
