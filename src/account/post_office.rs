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


//! The server context.
//!
//! A `PostOffice` bundles everything a running server shares between
//! sessions: the configuration, the mailbox namespace, and the content store
//! chosen at startup. There is no global state, so a process may run several
//! independent post offices side by side.
//!
//! Most operations here simply resolve a mailbox by name and forward to the
//! corresponding `Mailbox` method. Sessions which issue many commands against
//! the same mailbox should hold on to the `Arc<Mailbox>` from `get_mailbox()`
//! instead.

use std::fmt;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use chrono::prelude::*;
use log::info;

use super::content::open_content_store;
use super::events::{ListenerId, MailboxListener};
use super::id_range::MessageSet;
use super::identity::IdentityProvider;
use super::mailbox::{Mailbox, SearchKey};
use super::model::*;
use super::namespace::NamespaceTree;
use super::projection::{FetchFields, MessageResult};
use crate::support::error::Error;
use crate::support::system_config::SystemConfig;

pub struct PostOffice {
    config: SystemConfig,
    namespace: NamespaceTree,
}

impl fmt::Debug for PostOffice {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PostOffice")
            .field("config", &self.config)
            .finish()
    }
}

impl PostOffice {
    /// Set up a post office with the given configuration.
    ///
    /// The configuration is validated and the content store it selects is
    /// opened. The namespace starts out empty.
    pub fn new(config: SystemConfig) -> Result<Self, Error> {
        config.validate()?;
        let content_store = open_content_store(&config.storage)?;
        let namespace = NamespaceTree::new(&config, content_store);
        info!(
            "Post office ready; {:?} backend, delimiter {:?}",
            config.storage.backend, config.namespace.delimiter
        );

        Ok(PostOffice { config, namespace })
    }

    /// Load the configuration in the given TOML file and set up a post office
    /// with it.
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        PostOffice::new(SystemConfig::load(path)?)
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn namespace(&self) -> &NamespaceTree {
        &self.namespace
    }

    /// Make sure `user` has a personal namespace with an `INBOX` in it.
    ///
    /// The `INBOX` is created subscribed. Calling this for a user who already
    /// exists changes nothing. Returns the user's namespace root.
    pub fn provision(
        &self,
        user: &dyn IdentityProvider,
    ) -> Result<String, Error> {
        let root = self.namespace.ensure_user_root(user)?;
        let inbox = format!("{}{}INBOX", root, self.namespace.delimiter());

        match self.namespace.create_path(&inbox, true) {
            Ok(_) => {
                info!("Provisioned {}", inbox);
                self.namespace.subscribe(&inbox)?;
            }
            // Lost a race with another session, or already provisioned
            Err(Error::AlreadyExists { .. }) => (),
            Err(e) => return Err(e),
        }

        Ok(root)
    }

    /// Create the mailbox at `path`, along with any missing parents.
    pub fn create_mailbox(
        &self,
        path: &str,
        selectable: bool,
    ) -> Result<Arc<Mailbox>, Error> {
        self.namespace.create_path(path, selectable)
    }

    pub fn delete_mailbox(&self, path: &str) -> Result<(), Error> {
        self.namespace.delete_mailbox(path)
    }

    pub fn rename_mailbox(&self, old: &str, new: &str) -> Result<(), Error> {
        self.namespace.rename_mailbox(old, new)
    }

    pub fn exists_mailbox(&self, path: &str) -> bool {
        self.namespace.exists(path)
    }

    /// The `LIST` (`subscribed_only == false`) and `LSUB` operations.
    pub fn list_mailboxes(
        &self,
        base: &str,
        pattern: &str,
        subscribed_only: bool,
    ) -> Result<Vec<ListResponse>, Error> {
        self.namespace.list_mailboxes(base, pattern, subscribed_only)
    }

    pub fn get_mailbox(&self, path: &str) -> Result<Arc<Mailbox>, Error> {
        self.namespace.get_mailbox(path)
    }

    pub fn subscribe(&self, path: &str) -> Result<(), Error> {
        self.namespace.subscribe(path)
    }

    pub fn unsubscribe(&self, path: &str) -> Result<(), Error> {
        self.namespace.unsubscribe(path)
    }

    /// Append a message to `mailbox`, returning its UID.
    pub fn append_message(
        &self,
        mailbox: &str,
        content: impl Read,
        internal_date: DateTime<FixedOffset>,
        flags: &[Flag],
    ) -> Result<Uid, Error> {
        self.get_mailbox(mailbox)?.append(
            internal_date,
            flags.iter().cloned(),
            content,
        )
    }

    /// Fetch the messages in `set`, in ascending UID order.
    pub fn get_messages(
        &self,
        mailbox: &str,
        set: &MessageSet,
        fields: FetchFields,
    ) -> Result<Vec<MessageResult>, Error> {
        self.get_mailbox(mailbox)?.fetch(set, fields)
    }

    /// Add (`value`), remove (`!value`), or with `replace` overwrite the
    /// flags of the messages in `set`.
    pub fn set_flags(
        &self,
        mailbox: &str,
        flags: &[Flag],
        value: bool,
        replace: bool,
        set: &MessageSet,
        fields: FetchFields,
    ) -> Result<Vec<MessageResult>, Error> {
        self.get_mailbox(mailbox)?.store(
            set,
            StoreMode::from_value_replace(value, replace),
            flags,
            fields,
        )
    }

    pub fn expunge(
        &self,
        mailbox: &str,
        set: &MessageSet,
        fields: FetchFields,
    ) -> Result<Vec<MessageResult>, Error> {
        self.get_mailbox(mailbox)?.expunge(set, fields)
    }

    /// Copy the messages in `set` from `src` to `dst`.
    ///
    /// Returns `(source UID, destination UID)` pairs.
    pub fn copy_messages(
        &self,
        src: &str,
        set: &MessageSet,
        dst: &str,
    ) -> Result<Vec<(Uid, Uid)>, Error> {
        let src = self.get_mailbox(src)?;
        let dst = self.get_mailbox(dst)?;
        src.copy_to(set, &dst)
    }

    pub fn search(
        &self,
        mailbox: &str,
        key: &SearchKey,
    ) -> Result<Vec<Uid>, Error> {
        self.get_mailbox(mailbox)?.search(key)
    }

    pub fn status(&self, mailbox: &str) -> Result<StatusResponse, Error> {
        self.get_mailbox(mailbox)?.status()
    }

    pub fn get_uid_next(&self, mailbox: &str) -> Result<Uid, Error> {
        self.get_mailbox(mailbox)?.uid_next()
    }

    pub fn get_uid_validity(&self, mailbox: &str) -> Result<u32, Error> {
        self.get_mailbox(mailbox)?.uid_validity()
    }

    pub fn get_first_unseen(
        &self,
        mailbox: &str,
        fields: FetchFields,
    ) -> Result<Option<MessageResult>, Error> {
        self.get_mailbox(mailbox)?.first_unseen(fields)
    }

    /// Register `listener` for events on `mailbox`.
    ///
    /// The registration follows the mailbox through renames. It is dropped
    /// silently when the listener itself is dropped.
    pub fn add_listener(
        &self,
        mailbox: &str,
        listener: &Arc<dyn MailboxListener>,
    ) -> Result<ListenerId, Error> {
        Ok(self.get_mailbox(mailbox)?.add_listener(listener))
    }

    pub fn remove_listener(
        &self,
        mailbox: &str,
        id: ListenerId,
    ) -> Result<bool, Error> {
        Ok(self.get_mailbox(mailbox)?.remove_listener(id))
    }
}
