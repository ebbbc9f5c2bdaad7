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

//! Mailbox change notification.
//!
//! Listeners are registered on a single mailbox and receive its events
//! synchronously, in the order the mutations committed. The registry only
//! holds weak references: whoever registered a listener owns it, and is
//! expected to remove it when the session ends. Listeners which have simply
//! been dropped are pruned the next time events are delivered.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use log::{error, warn};

use super::model::*;
use crate::support::error::Error;

/// A change committed to a mailbox.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MailboxEvent {
    /// A message was appended (or copied in).
    Added { uid: Uid },
    /// The flags of a message actually changed; `flags` is the new full set.
    FlagsUpdated { uid: Uid, flags: FlagSet },
    /// A message was removed.
    Expunged { uid: Uid },
}

impl MailboxEvent {
    pub fn uid(&self) -> Uid {
        match *self {
            MailboxEvent::Added { uid }
            | MailboxEvent::FlagsUpdated { uid, .. }
            | MailboxEvent::Expunged { uid } => uid,
        }
    }
}

/// Receives events from the mailboxes it is registered on.
///
/// `on_event` is invoked while the mailbox's notification lock is held, so
/// implementations must not call back into the engine from within the
/// callback. Anything beyond recording the event should be queued for later.
pub trait MailboxListener: Send + Sync {
    fn on_event(&self, mailbox: &str, event: &MailboxEvent)
        -> Result<(), Error>;
}

/// Handle returned when registering a listener, used to remove it again.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

impl fmt::Debug for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ListenerId({})", self.0)
    }
}

/// The listener registry of one mailbox.
#[derive(Default)]
pub struct Listeners {
    next_id: u64,
    entries: Vec<(ListenerId, Weak<dyn MailboxListener>)>,
}

impl Listeners {
    pub fn add(&mut self, listener: &Arc<dyn MailboxListener>) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.entries.push((id, Arc::downgrade(listener)));
        id
    }

    /// Remove the listener with the given id.
    ///
    /// Returns whether it was registered.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|&(eid, _)| eid != id);
        before != self.entries.len()
    }

    /// The number of registered listeners which are still alive.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|&&(_, ref w)| w.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        0 == self.len()
    }

    /// Deliver `events`, in order, to every live listener.
    ///
    /// A listener that returns an error or panics is logged and skipped for
    /// that event; it stays registered and everyone else still gets the
    /// event.
    pub fn deliver(
        &mut self,
        log_prefix: &str,
        mailbox: &str,
        events: &[MailboxEvent],
    ) {
        if events.is_empty() {
            return;
        }

        self.entries.retain(|&(_, ref w)| w.strong_count() > 0);
        let live = self
            .entries
            .iter()
            .filter_map(|&(id, ref w)| w.upgrade().map(|l| (id, l)))
            .collect::<Vec<_>>();

        for event in events {
            for &(id, ref listener) in &live {
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    listener.on_event(mailbox, event)
                }));

                match result {
                    Ok(Ok(())) => (),
                    Ok(Err(e)) => warn!(
                        "{} Listener {:?} failed to handle {:?}: {}",
                        log_prefix, id, event, e
                    ),
                    Err(_) => error!(
                        "{} Listener {:?} panicked handling {:?}",
                        log_prefix, id, event
                    ),
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::sync::Mutex;

    use super::*;

    /// Listener which records everything it sees.
    #[derive(Default)]
    pub struct Recorder {
        pub events: Mutex<Vec<(String, MailboxEvent)>>,
    }

    impl Recorder {
        pub fn new() -> Arc<Self> {
            Arc::new(Recorder::default())
        }

        pub fn take(&self) -> Vec<MailboxEvent> {
            self.events
                .lock()
                .unwrap()
                .drain(..)
                .map(|(_, e)| e)
                .collect()
        }
    }

    impl MailboxListener for Recorder {
        fn on_event(
            &self,
            mailbox: &str,
            event: &MailboxEvent,
        ) -> Result<(), Error> {
            self.events
                .lock()
                .unwrap()
                .push((mailbox.to_owned(), event.clone()));
            Ok(())
        }
    }

    /// Listener which fails every event, one way or another.
    pub struct Broken {
        pub panic: bool,
    }

    impl MailboxListener for Broken {
        fn on_event(
            &self,
            _mailbox: &str,
            event: &MailboxEvent,
        ) -> Result<(), Error> {
            if self.panic {
                panic!("listener exploded on {:?}", event);
            }

            Err(Error::nx_message(event.uid()))
        }
    }

    fn added(uid: u32) -> MailboxEvent {
        MailboxEvent::Added { uid: Uid::u(uid) }
    }

    #[test]
    fn delivery_in_order() {
        crate::init_test_log();

        let recorder = Recorder::new();
        let as_listener: Arc<dyn MailboxListener> = recorder.clone();
        let mut listeners = Listeners::default();
        listeners.add(&as_listener);

        listeners.deliver("test", "INBOX", &[added(1), added(2)]);
        listeners.deliver(
            "test",
            "INBOX",
            &[MailboxEvent::Expunged { uid: Uid::u(1) }],
        );

        assert_eq!(
            vec![
                ("INBOX".to_owned(), added(1)),
                ("INBOX".to_owned(), added(2)),
                (
                    "INBOX".to_owned(),
                    MailboxEvent::Expunged { uid: Uid::u(1) }
                ),
            ],
            *recorder.events.lock().unwrap()
        );
    }

    #[test]
    fn failures_are_isolated() {
        crate::init_test_log();

        let first = Recorder::new();
        let last = Recorder::new();
        let failing: Arc<dyn MailboxListener> =
            Arc::new(Broken { panic: false });
        let panicking: Arc<dyn MailboxListener> =
            Arc::new(Broken { panic: true });
        let first_l: Arc<dyn MailboxListener> = first.clone();
        let last_l: Arc<dyn MailboxListener> = last.clone();

        let mut listeners = Listeners::default();
        listeners.add(&first_l);
        listeners.add(&failing);
        listeners.add(&panicking);
        listeners.add(&last_l);

        listeners.deliver("test", "INBOX", &[added(1), added(11)]);

        assert_eq!(vec![added(1), added(11)], first.take());
        assert_eq!(vec![added(1), added(11)], last.take());
        // Failing listeners stay registered
        assert_eq!(4, listeners.len());
    }

    #[test]
    fn removal_and_pruning() {
        let kept = Recorder::new();
        let kept_l: Arc<dyn MailboxListener> = kept.clone();
        let removed = Recorder::new();
        let removed_l: Arc<dyn MailboxListener> = removed.clone();

        let mut listeners = Listeners::default();
        listeners.add(&kept_l);
        let removed_id = listeners.add(&removed_l);
        {
            let dropped: Arc<dyn MailboxListener> = Recorder::new();
            listeners.add(&dropped);
            assert_eq!(3, listeners.len());
        }
        assert_eq!(2, listeners.len());

        assert!(listeners.remove(removed_id));
        assert!(!listeners.remove(removed_id));

        listeners.deliver("test", "INBOX", &[added(3)]);
        assert_eq!(vec![added(3)], kept.take());
        assert!(removed.take().is_empty());
        assert_eq!(1, listeners.entries.len());
    }
}
