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

//! Support for working with a single mailbox.
//!
//! A mailbox is a collection of messages and the bookkeeping needed to give
//! them IMAP identities. It is functionally independent from any child
//! mailboxes; the hierarchy lives in `namespace`.
//!
//! Each mailbox is its own mutual-exclusion domain. Every operation that
//! mutates the message table or depends on UID/sequence number assignment runs
//! under the mailbox's state lock, so operations on different mailboxes never
//! block each other.
//!
//! A mailbox which is not selectable (i.e., `\Noselect`) simply has no state.
//! Making it selectable later creates a fresh state with a new UID validity,
//! so any UIDs a client remembers from an earlier incarnation are invalidated.
//!
//! ## Events
//!
//! Mutations collect the events they cause while holding the state lock. The
//! notification lock is acquired before the state lock is released, and the
//! events are delivered after. Since the next mutation can only deliver its
//! events once it in turn gets the notification lock, listeners observe
//! events in exactly the order the mutations committed.
//!
//! ## Deletion
//!
//! `Mailbox` handles are shared with sessions, which can outlive the
//! mailbox's presence in the namespace. Deletion sets a marker under the
//! state lock (after verifying the mailbox is empty), and every later
//! operation on a stale handle fails with `NotFound`.
//!
//! ## About the layout of this module
//!
//! This file holds the `Mailbox` struct and the locking protocol. The
//! operations proper are spread over the submodules by concern.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use super::content::ContentStore;
use super::events::*;
use super::mailbox_state::MailboxState;
use crate::support::error::Error;
use crate::support::system_config::MailboxConfig;

mod expunge;
mod flags;
mod messages;
mod search;
mod select;

pub use self::search::SearchKey;

/// A single mailbox, shared between the namespace and any sessions using it.
pub struct Mailbox {
    owner: String,
    full_name: RwLock<String>,
    state: Mutex<Option<MailboxState>>,
    listeners: Mutex<Listeners>,
    content_store: Arc<dyn ContentStore>,
    config: MailboxConfig,
    deleted: AtomicBool,
}

impl Mailbox {
    /// Create a new mailbox.
    ///
    /// If `uid_validity` is `Some`, the mailbox is selectable and starts out
    /// in that generation; otherwise it is `\Noselect`.
    pub fn new(
        owner: String,
        full_name: String,
        uid_validity: Option<u32>,
        content_store: Arc<dyn ContentStore>,
        config: MailboxConfig,
    ) -> Self {
        let state =
            uid_validity.map(|uv| MailboxState::new(uv, config.uid_stride));
        Mailbox {
            owner,
            full_name: RwLock::new(full_name),
            state: Mutex::new(state),
            listeners: Mutex::new(Listeners::default()),
            content_store,
            config,
            deleted: AtomicBool::new(false),
        }
    }

    /// The current full name of this mailbox.
    pub fn full_name(&self) -> String {
        self.full_name.read().unwrap().clone()
    }

    pub(super) fn set_full_name(&self, full_name: String) {
        *self.full_name.write().unwrap() = full_name;
    }

    fn log_prefix(&self) -> String {
        format!("{}:{}", self.owner, self.full_name.read().unwrap())
    }

    pub fn is_selectable(&self) -> bool {
        self.state.lock().unwrap().is_some()
    }

    /// Whether this handle still refers to a mailbox in the namespace.
    pub fn is_live(&self) -> bool {
        !self.deleted.load(Ordering::SeqCst)
    }

    /// The number of messages in this mailbox, 0 if not selectable.
    pub fn message_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .as_ref()
            .map_or(0, MailboxState::count)
    }

    /// Register `listener` for events on this mailbox.
    ///
    /// Only a weak reference is kept; the caller remains the owner.
    pub fn add_listener(
        &self,
        listener: &Arc<dyn MailboxListener>,
    ) -> ListenerId {
        self.listeners.lock().unwrap().add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.lock().unwrap().remove(id)
    }

    /// Turn a `\Noselect` mailbox into a selectable one in the generation
    /// `uid_validity`. Does nothing if already selectable.
    pub(super) fn make_selectable(&self, uid_validity: u32) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.is_some() {
            return false;
        }

        *state = Some(MailboxState::new(uid_validity, self.config.uid_stride));
        log::info!(
            "{} Now selectable, UID validity {}",
            self.log_prefix(),
            uid_validity
        );
        true
    }

    /// Turn this mailbox into a `\Noselect` one, discarding its state.
    ///
    /// Fails with `NotEmpty` if it still holds messages.
    pub(super) fn make_unselectable(&self) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        self.check_empty(state.as_ref(), 0)?;
        if state.take().is_some() {
            log::info!("{} No longer selectable", self.log_prefix());
        }
        Ok(())
    }

    /// Atomically verify that this mailbox is empty and mark it deleted.
    ///
    /// `children` is the number of child mailboxes, which the caller already
    /// knows; it is only used to produce the error.
    pub(super) fn mark_deleted(&self, children: usize) -> Result<(), Error> {
        let state = self.state.lock().unwrap();
        self.check_empty(state.as_ref(), children)?;
        self.deleted.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn check_empty(
        &self,
        state: Option<&MailboxState>,
        children: usize,
    ) -> Result<(), Error> {
        let messages = state.map_or(0, MailboxState::count);
        if 0 != messages || 0 != children {
            return Err(Error::NotEmpty {
                name: self.full_name(),
                children,
                messages,
            });
        }

        Ok(())
    }

    fn check_live(&self) -> Result<(), Error> {
        if self.is_live() {
            Ok(())
        } else {
            Err(Error::nx_mailbox(self.full_name()))
        }
    }

    /// Run `f` against the state of this mailbox without mutating it.
    fn read<R>(
        &self,
        f: impl FnOnce(&MailboxState) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let state = self.state.lock().unwrap();
        self.check_live()?;
        let state = state.as_ref().ok_or_else(|| self.unselectable())?;
        f(state)
    }

    /// Run `f` to mutate the state of this mailbox, then deliver the events it
    /// produced.
    ///
    /// Events are delivered even if `f` fails, since it may have partially
    /// completed.
    fn commit<R>(
        &self,
        f: impl FnOnce(
            &mut MailboxState,
            &mut Vec<MailboxEvent>,
        ) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let mut state = self.state.lock().unwrap();
        self.check_live()?;
        let state_ref = state.as_mut().ok_or_else(|| self.unselectable())?;

        let mut events = Vec::new();
        let result = f(state_ref, &mut events);

        let mut listeners = self.listeners.lock().unwrap();
        drop(state);
        listeners.deliver(&self.log_prefix(), &self.full_name(), &events);
        result
    }

    fn unselectable(&self) -> Error {
        Error::MailboxUnselectable {
            name: self.full_name(),
        }
    }
}

impl fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<mailbox {}>", self.full_name())
    }
}
