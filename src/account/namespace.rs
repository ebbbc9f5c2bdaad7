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


//! The hierarchy of mailboxes.
//!
//! The hierarchy is a tree of nodes stored in an arena and addressed by
//! `NodeId`. Parents own their children through the ids in their `children`
//! maps; the `parent` id of a node is only ever used for lookups.
//!
//! There are three kinds of node:
//!
//! - The root, which has no name. Top-level mailboxes are its children and
//!   their full name is simply their own name.
//!
//! - Namespace nodes: the users prefix (e.g. `#users`) and each user's
//!   personal root beneath it (e.g. `#users.joachim`). These only exist to
//!   hold mailboxes; they are never listed and never hold messages.
//!
//! - Mailboxes, which may or may not be selectable.
//!
//! Children are keyed by their ASCII-lower-cased name, so lookup is
//! case-insensitive in the same way `LIST` matching is, while each node
//! remembers the spelling it was created with.
//!
//! ## Locking
//!
//! Every node guards its own children map. Creating or deleting a mailbox
//! locks only the children of the parent (and, for deletion, of the mailbox
//! itself, to prove it has none), so structural changes in unrelated
//! subtrees proceed in parallel. Locks on children maps are always taken
//! ancestor first.
//!
//! Renames can move a subtree anywhere, so they are additionally serialised
//! against each other by `renames`. Within a rename, the old and new parents
//! are locked ancestor first, or by id when unrelated. A rename updates the
//! moved node's name and parent before walking the subtree to refresh the
//! full names of the mailboxes in it; since a concurrent create computes its
//! full name while holding its parent's children lock, and the walk takes
//! each of those locks in turn, no mailbox ends up with a stale name.
//!
//! The node table itself and each node's name/parent link are only locked
//! briefly, never while acquiring another lock.
//!
//! Everything involving messages goes through the `Mailbox` handles, which
//! have their own locks and never touch the hierarchy, so sessions working
//! in mailboxes are never blocked by hierarchy changes beyond the brief
//! lookup that hands them the handle.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use log::info;

use super::content::ContentStore;
use super::identity::IdentityProvider;
use super::mailbox::Mailbox;
use super::model::*;
use crate::support::error::Error;
use crate::support::mailbox_paths::{parse_mailbox_path, ListPattern, Wildcard};
use crate::support::safe_name::is_safe_name;
use crate::support::system_config::{MailboxConfig, SystemConfig};

/// 2020-01-01T00:00:00Z, the zero point of UID validity values.
const UID_VALIDITY_EPOCH: u32 = 1577836800;

/// Owner reported in log prefixes of mailboxes outside the users prefix.
const SHARED_OWNER: &str = "shared";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct NodeId(u64);

const ROOT: NodeId = NodeId(0);

enum NodeKind {
    Root,
    Namespace,
    Mailbox(Arc<Mailbox>),
}

struct Link {
    name: String,
    parent: Option<NodeId>,
}

#[derive(Default)]
struct Children {
    by_name: BTreeMap<String, NodeId>,
    /// Set when the owning node is deleted. Nothing may be added afterwards.
    detached: bool,
}

struct Node {
    link: Mutex<Link>,
    children: Mutex<Children>,
    kind: NodeKind,
    subscribed: AtomicBool,
}

impl Node {
    fn new(name: &str, parent: Option<NodeId>, kind: NodeKind) -> Self {
        Node {
            link: Mutex::new(Link {
                name: name.to_owned(),
                parent,
            }),
            children: Mutex::new(Children::default()),
            kind,
            subscribed: AtomicBool::new(false),
        }
    }

    fn mailbox(&self) -> Option<&Arc<Mailbox>> {
        match self.kind {
            NodeKind::Mailbox(ref mb) => Some(mb),
            _ => None,
        }
    }

    fn name(&self) -> String {
        self.link.lock().unwrap().name.clone()
    }

    fn parent(&self) -> Option<NodeId> {
        self.link.lock().unwrap().parent
    }
}

fn child_key(name: &str) -> String {
    name.to_ascii_lowercase()
}

struct Arena {
    nodes: RwLock<HashMap<NodeId, Arc<Node>>>,
    next_id: AtomicU64,
}

impl Arena {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT, Arc::new(Node::new("", None, NodeKind::Root)));
        Arena {
            nodes: RwLock::new(nodes),
            next_id: AtomicU64::new(1),
        }
    }

    /// Get the node `id`, unless it has been deleted.
    fn node(&self, id: NodeId) -> Option<Arc<Node>> {
        self.nodes.read().unwrap().get(&id).cloned()
    }

    fn child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        let parent = self.node(parent)?;
        let children = parent.children.lock().unwrap();
        children.by_name.get(&child_key(name)).copied()
    }

    fn child_ids(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id).map_or_else(Vec::new, |node| {
            let children = node.children.lock().unwrap();
            children.by_name.values().copied().collect()
        })
    }

    /// Find the node at `path`. The empty path is the root.
    fn lookup(&self, path: &str, delimiter: char) -> Option<NodeId> {
        if path.is_empty() {
            return Some(ROOT);
        }

        parse_mailbox_path(path, delimiter)
            .try_fold(ROOT, |id, segment| self.child(id, segment))
    }

    fn full_name(&self, id: NodeId, delimiter: char) -> String {
        let mut segments = Vec::new();
        let mut cursor = Some(id);
        while let Some(id) = cursor {
            if ROOT == id {
                break;
            }
            let node = match self.node(id) {
                Some(node) => node,
                None => break,
            };
            let link = node.link.lock().unwrap();
            segments.push(link.name.clone());
            cursor = link.parent;
        }

        segments.reverse();
        segments.join(delimiter.to_string().as_str())
    }

    /// Add a new node called `name` beneath `parent`, whose children the
    /// caller holds locked as `siblings`.
    fn insert(
        &self,
        parent: NodeId,
        siblings: &mut Children,
        name: &str,
        kind: NodeKind,
    ) -> NodeId {
        let id = NodeId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.nodes
            .write()
            .unwrap()
            .insert(id, Arc::new(Node::new(name, Some(parent), kind)));
        siblings.by_name.insert(child_key(name), id);
        id
    }

    fn remove(&self, id: NodeId) {
        self.nodes.write().unwrap().remove(&id);
    }

    /// Append all strict descendants of `id` to `dst`, parents before
    /// children.
    fn descendants(&self, id: NodeId, dst: &mut Vec<NodeId>) {
        for child in self.child_ids(id) {
            dst.push(child);
            self.descendants(child, dst);
        }
    }

    fn is_descendant_or_self(&self, id: NodeId, ancestor: NodeId) -> bool {
        let mut cursor = Some(id);
        while let Some(id) = cursor {
            if id == ancestor {
                return true;
            }
            cursor = self.node(id).and_then(|node| node.parent());
        }
        false
    }
}

/// Hands out UID validity values.
///
/// Values are seconds since 2020-01-01, bumped as needed so that every value
/// handed out is strictly greater than the last.
#[derive(Default)]
struct UidValidityGenerator {
    last: Mutex<u32>,
}

impl UidValidityGenerator {
    fn next(&self) -> u32 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs() as u32)
            .wrapping_sub(UID_VALIDITY_EPOCH)
            .max(1);

        let mut last = self.last.lock().unwrap();
        *last = if now > *last {
            now
        } else {
            last.wrapping_add(1).max(1)
        };
        *last
    }
}

/// The hierarchy of all mailboxes of one `PostOffice`.
pub struct NamespaceTree {
    arena: Arena,
    renames: Mutex<()>,
    delimiter: char,
    users_prefix: String,
    content_store: Arc<dyn ContentStore>,
    mailbox_config: MailboxConfig,
    uid_validity: UidValidityGenerator,
}

impl NamespaceTree {
    pub fn new(
        config: &SystemConfig,
        content_store: Arc<dyn ContentStore>,
    ) -> Self {
        NamespaceTree {
            arena: Arena::new(),
            renames: Mutex::new(()),
            delimiter: config.namespace.delimiter,
            users_prefix: config.namespace.users_prefix.clone(),
            content_store,
            mailbox_config: config.mailbox.clone(),
            uid_validity: UidValidityGenerator::default(),
        }
    }

    /// The hierarchy delimiter.
    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    pub fn users_prefix(&self) -> &str {
        &self.users_prefix
    }

    /// Create a mailbox called `name` directly beneath `parent`.
    ///
    /// `parent` is a full path, or empty for the top level, and must already
    /// exist. A name beneath the users prefix creates that user's namespace
    /// root instead of a mailbox, so the users prefix itself can't be used
    /// as `parent`; use `ensure_user_root` for that.
    pub fn create_mailbox(
        &self,
        parent: &str,
        name: &str,
        selectable: bool,
    ) -> Result<Arc<Mailbox>, Error> {
        if !is_safe_name(name, self.delimiter) {
            return Err(Error::InvalidName {
                name: name.to_owned(),
            });
        }

        let parent_id = self
            .arena
            .lookup(parent, self.delimiter)
            .ok_or_else(|| Error::nx_mailbox(parent))?;
        if self.is_users_node(parent_id) {
            return Err(Error::InvalidName {
                name: self.join(parent, name),
            });
        }

        let parent_node = self
            .arena
            .node(parent_id)
            .ok_or_else(|| Error::nx_mailbox(parent))?;
        let mut siblings = parent_node.children.lock().unwrap();
        if siblings.detached {
            return Err(Error::nx_mailbox(parent));
        }
        if siblings.by_name.contains_key(&child_key(name)) {
            return Err(Error::AlreadyExists {
                name: self.join(parent, name),
            });
        }

        Ok(self
            .insert_mailbox(parent_id, &mut siblings, name, selectable)
            .1)
    }

    /// Create the mailbox at the full path `path`.
    ///
    /// Missing intermediate mailboxes are created as `\Noselect`; missing
    /// namespace nodes below the users prefix are created as well.
    pub fn create_path(
        &self,
        path: &str,
        selectable: bool,
    ) -> Result<Arc<Mailbox>, Error> {
        let segments = self.validate_path(path)?;
        let (last, intermediate) =
            segments.split_last().ok_or_else(|| Error::InvalidName {
                name: path.to_owned(),
            })?;

        let parent_id = self.ensure_parents(intermediate)?;
        let parent = self
            .arena
            .node(parent_id)
            .ok_or_else(|| Error::nx_mailbox(path))?;
        let mut siblings = parent.children.lock().unwrap();
        if siblings.detached {
            return Err(Error::nx_mailbox(path));
        }
        if siblings.by_name.contains_key(&child_key(last)) {
            return Err(Error::AlreadyExists {
                name: path.to_owned(),
            });
        }

        Ok(self
            .insert_mailbox(parent_id, &mut siblings, last, selectable)
            .1)
    }

    /// Make sure the personal namespace root of `user` exists.
    ///
    /// Returns its full name, e.g. `#users.joachim`.
    pub fn ensure_user_root(
        &self,
        user: &dyn IdentityProvider,
    ) -> Result<String, Error> {
        if !is_safe_name(user.user_name(), self.delimiter) {
            return Err(Error::InvalidName {
                name: user.user_name().to_owned(),
            });
        }

        self.ensure_parents(&[self.users_prefix.as_str(), user.user_name()])?;
        Ok(user.namespace_root(&self.users_prefix, self.delimiter))
    }

    /// Delete the mailbox at `path`.
    ///
    /// Fails with `NotEmpty` if it has any children or messages. Handles to
    /// the mailbox which sessions still hold go stale and fail with
    /// `NotFound` from then on.
    pub fn delete_mailbox(&self, path: &str) -> Result<(), Error> {
        let (id, node) = self.lookup_mailbox_node(path)?;
        let mailbox = node
            .mailbox()
            .cloned()
            .ok_or_else(|| Error::nx_mailbox(path))?;

        loop {
            let parent_id =
                node.parent().ok_or_else(|| Error::nx_mailbox(path))?;
            let parent = self
                .arena
                .node(parent_id)
                .ok_or_else(|| Error::nx_mailbox(path))?;
            let mut siblings = parent.children.lock().unwrap();
            // Moved by a rename since we looked; try again at the new place
            if Some(parent_id) != node.parent() {
                continue;
            }

            let mut children = node.children.lock().unwrap();
            if children.detached {
                return Err(Error::nx_mailbox(path));
            }

            mailbox.mark_deleted(children.by_name.len())?;
            children.detached = true;
            siblings.by_name.remove(&child_key(&node.name()));
            break;
        }

        self.arena.remove(id);
        info!("Deleted mailbox {}", path);
        Ok(())
    }

    /// Move the mailbox at `old` (and everything beneath it) to `new`.
    ///
    /// Missing intermediate mailboxes of `new` are created as `\Noselect`.
    /// Message identity is unaffected: every moved mailbox keeps its UID
    /// validity, UIDs, and messages.
    pub fn rename_mailbox(&self, old: &str, new: &str) -> Result<(), Error> {
        let segments = self.validate_path(new)?;
        let (new_name, new_parent_segments) =
            segments.split_last().ok_or_else(|| Error::InvalidName {
                name: new.to_owned(),
            })?;

        let _renaming = self.renames.lock().unwrap();
        let (id, node) = self.lookup_mailbox_node(old)?;

        if let Some(existing) = self.arena.lookup(new, self.delimiter) {
            // Changing only the case of the name is fine
            if existing != id {
                return Err(Error::AlreadyExists {
                    name: new.to_owned(),
                });
            }
        }

        // Refuse to move a mailbox beneath itself before creating anything
        let mut cursor = ROOT;
        for segment in new_parent_segments {
            match self.arena.child(cursor, segment) {
                Some(child) => cursor = child,
                None => break,
            }
            if self.arena.is_descendant_or_self(cursor, id) {
                return Err(Error::InvalidName {
                    name: new.to_owned(),
                });
            }
        }

        let new_parent_id = self.ensure_parents(new_parent_segments)?;
        // Renames are serialised, so only a deletion can have moved the
        // node since the lookup, and `relink` notices that.
        let old_parent_id =
            node.parent().ok_or_else(|| Error::nx_mailbox(old))?;
        let old_parent = self
            .arena
            .node(old_parent_id)
            .ok_or_else(|| Error::nx_mailbox(old))?;

        let relinked = if old_parent_id == new_parent_id {
            let mut siblings = old_parent.children.lock().unwrap();
            relink(&node, id, &mut siblings, None, new_parent_id, new_name)
        } else {
            let new_parent = self
                .arena
                .node(new_parent_id)
                .ok_or_else(|| Error::nx_mailbox(new))?;
            let new_first = self
                .arena
                .is_descendant_or_self(old_parent_id, new_parent_id)
                || (!self
                    .arena
                    .is_descendant_or_self(new_parent_id, old_parent_id)
                    && new_parent_id < old_parent_id);

            let mut from;
            let mut to;
            if new_first {
                to = new_parent.children.lock().unwrap();
                from = old_parent.children.lock().unwrap();
            } else {
                from = old_parent.children.lock().unwrap();
                to = new_parent.children.lock().unwrap();
            }

            relink(
                &node,
                id,
                &mut from,
                Some(&mut *to),
                new_parent_id,
                new_name,
            )
        };
        relinked.map_err(|e| match e {
            Relink::Vanished => Error::nx_mailbox(old),
            Relink::TargetVanished => Error::nx_mailbox(new),
            Relink::Taken => Error::AlreadyExists {
                name: new.to_owned(),
            },
        })?;

        let mut moved = vec![id];
        self.arena.descendants(id, &mut moved);
        for moved_id in moved {
            if let Some(mb) = self
                .arena
                .node(moved_id)
                .as_ref()
                .and_then(|node| node.mailbox())
            {
                mb.set_full_name(
                    self.arena.full_name(moved_id, self.delimiter),
                );
            }
        }

        info!("Renamed mailbox {} to {}", old, new);
        Ok(())
    }

    /// Return the mailbox at `path`.
    pub fn get_mailbox(&self, path: &str) -> Result<Arc<Mailbox>, Error> {
        let (_, node) = self.lookup_mailbox_node(path)?;
        node.mailbox()
            .cloned()
            .ok_or_else(|| Error::nx_mailbox(path))
    }

    /// Whether a mailbox (selectable or not) exists at `path`.
    pub fn exists(&self, path: &str) -> bool {
        self.lookup_mailbox_node(path).is_ok()
    }

    /// List the mailboxes immediately beneath `path`, which may be the empty
    /// string for the top level or a namespace node.
    pub fn get_children(&self, path: &str) -> Result<Vec<ListResponse>, Error> {
        let id = self
            .arena
            .lookup(path, self.delimiter)
            .ok_or_else(|| Error::nx_mailbox(path))?;

        let mut responses = self
            .arena
            .child_ids(id)
            .into_iter()
            .filter_map(|child| self.list_response(child, false))
            .collect::<Vec<_>>();
        responses.sort();
        Ok(responses)
    }

    /// The `LIST` operation.
    ///
    /// `pattern` is interpreted relative to `base`. Only a trailing `*` or `%`
    /// is supported; a wildcard anywhere else fails with `Unsupported`. An
    /// empty pattern matches nothing. With `subscribed_only`, only subscribed
    /// mailboxes are returned (`LSUB`).
    ///
    /// The results are sorted by name.
    pub fn list_mailboxes(
        &self,
        base: &str,
        pattern: &str,
        subscribed_only: bool,
    ) -> Result<Vec<ListResponse>, Error> {
        let pattern = match ListPattern::parse(base, pattern, self.delimiter)?
        {
            Some(p) => p,
            None => return Ok(vec![]),
        };

        let parent = match self.arena.lookup(&pattern.parent, self.delimiter)
        {
            Some(id) => id,
            None => return Ok(vec![]),
        };

        let mut matched = Vec::new();
        for child in self.arena.child_ids(parent) {
            let name = match self.arena.node(child) {
                Some(node) => node.name(),
                None => continue,
            };

            if pattern.matches_leaf(&name) {
                matched.push(child);
                if Some(Wildcard::Any) == pattern.wildcard {
                    self.arena.descendants(child, &mut matched);
                }
            }
        }

        let mut responses = matched
            .into_iter()
            .filter_map(|id| self.list_response(id, subscribed_only))
            .collect::<Vec<_>>();
        responses.sort();
        Ok(responses)
    }

    pub fn subscribe(&self, path: &str) -> Result<(), Error> {
        self.set_subscribed(path, true)
    }

    pub fn unsubscribe(&self, path: &str) -> Result<(), Error> {
        self.set_subscribed(path, false)
    }

    fn set_subscribed(
        &self,
        path: &str,
        subscribed: bool,
    ) -> Result<(), Error> {
        let (_, node) = self.lookup_mailbox_node(path)?;
        node.subscribed.store(subscribed, Ordering::SeqCst);
        Ok(())
    }

    /// Change whether the mailbox at `path` can hold messages.
    ///
    /// Becoming selectable starts a new UID validity generation. Becoming
    /// unselectable fails with `NotEmpty` if the mailbox holds messages.
    pub fn set_selectable(
        &self,
        path: &str,
        selectable: bool,
    ) -> Result<(), Error> {
        let mailbox = self.get_mailbox(path)?;
        if selectable {
            mailbox.make_selectable(self.uid_validity.next());
            Ok(())
        } else {
            mailbox.make_unselectable()
        }
    }

    fn join(&self, parent: &str, name: &str) -> String {
        if parent.is_empty() {
            name.to_owned()
        } else {
            format!("{}{}{}", parent, self.delimiter, name)
        }
    }

    /// Whether `id` is the users prefix namespace node.
    fn is_users_node(&self, id: NodeId) -> bool {
        self.arena.node(id).map_or(false, |node| {
            let link = node.link.lock().unwrap();
            Some(ROOT) == link.parent
                && link.name.eq_ignore_ascii_case(&self.users_prefix)
        })
    }

    /// Split `path` into segments, checking that each is a legal name for
    /// the position it would be in.
    fn validate_path<'a>(&self, path: &'a str) -> Result<Vec<&'a str>, Error> {
        let segments =
            parse_mailbox_path(path, self.delimiter).collect::<Vec<_>>();
        let users = segments
            .first()
            .map_or(false, |s| s.eq_ignore_ascii_case(&self.users_prefix));

        for (ix, segment) in segments.iter().enumerate() {
            let ok = if users && 0 == ix {
                true
            } else {
                is_safe_name(segment, self.delimiter)
            };

            if !ok {
                return Err(Error::InvalidName {
                    name: path.to_owned(),
                });
            }
        }

        // The users prefix and user roots are namespaces, not mailboxes
        if users && segments.len() <= 2 {
            return Err(Error::InvalidName {
                name: path.to_owned(),
            });
        }

        Ok(segments)
    }

    /// Walk `segments` from the root, creating whatever is missing, and
    /// return the last node.
    ///
    /// Only one children map is locked at a time.
    fn ensure_parents(&self, segments: &[&str]) -> Result<NodeId, Error> {
        let vanished = || {
            Error::nx_mailbox(
                segments.join(self.delimiter.to_string().as_str()),
            )
        };

        let mut cursor = ROOT;
        for segment in segments {
            let node = self.arena.node(cursor).ok_or_else(vanished)?;
            let mut children = node.children.lock().unwrap();
            if children.detached {
                return Err(vanished());
            }

            cursor = match children.by_name.get(&child_key(segment)) {
                Some(&child) => child,
                None => {
                    let namespace = (ROOT == cursor
                        && segment.eq_ignore_ascii_case(&self.users_prefix))
                        || self.is_users_node(cursor);
                    if namespace {
                        self.arena.insert(
                            cursor,
                            &mut children,
                            segment,
                            NodeKind::Namespace,
                        )
                    } else {
                        self.insert_mailbox(
                            cursor,
                            &mut children,
                            segment,
                            false,
                        )
                        .0
                    }
                }
            };
        }
        Ok(cursor)
    }

    /// Create a mailbox node beneath `parent`, whose children the caller
    /// holds locked as `siblings`.
    fn insert_mailbox(
        &self,
        parent: NodeId,
        siblings: &mut Children,
        name: &str,
        selectable: bool,
    ) -> (NodeId, Arc<Mailbox>) {
        let full_name =
            self.join(&self.arena.full_name(parent, self.delimiter), name);
        let uid_validity = if selectable {
            Some(self.uid_validity.next())
        } else {
            None
        };

        let mailbox = Arc::new(Mailbox::new(
            self.owner_of(&full_name),
            full_name.clone(),
            uid_validity,
            Arc::clone(&self.content_store),
            self.mailbox_config.clone(),
        ));
        let id = self.arena.insert(
            parent,
            siblings,
            name,
            NodeKind::Mailbox(Arc::clone(&mailbox)),
        );

        info!(
            "Created mailbox {}{}",
            full_name,
            if selectable { "" } else { " (\\Noselect)" }
        );
        (id, mailbox)
    }

    fn owner_of(&self, full_name: &str) -> String {
        let mut segments = parse_mailbox_path(full_name, self.delimiter);
        match (segments.next(), segments.next()) {
            (Some(prefix), Some(user))
                if prefix.eq_ignore_ascii_case(&self.users_prefix) =>
            {
                user.to_owned()
            }
            _ => SHARED_OWNER.to_owned(),
        }
    }

    fn lookup_mailbox_node(
        &self,
        path: &str,
    ) -> Result<(NodeId, Arc<Node>), Error> {
        self.arena
            .lookup(path, self.delimiter)
            .and_then(|id| self.arena.node(id).map(|node| (id, node)))
            .filter(|&(_, ref node)| node.mailbox().is_some())
            .ok_or_else(|| Error::nx_mailbox(path))
    }

    /// Describe `id` for `LIST`, or `None` if it isn't a mailbox (or, with
    /// `subscribed_only`, not subscribed).
    fn list_response(
        &self,
        id: NodeId,
        subscribed_only: bool,
    ) -> Option<ListResponse> {
        let node = self.arena.node(id)?;
        let mailbox = node.mailbox()?;
        let subscribed = node.subscribed.load(Ordering::SeqCst);
        if subscribed_only && !subscribed {
            return None;
        }

        let mut attributes = Vec::new();
        if !mailbox.is_selectable() {
            attributes.push(MailboxAttribute::Noselect);
        }
        if node.children.lock().unwrap().by_name.is_empty() {
            attributes.push(MailboxAttribute::HasNoChildren);
        } else {
            attributes.push(MailboxAttribute::HasChildren);
        }
        if subscribed {
            attributes.push(MailboxAttribute::Subscribed);
        }

        Some(ListResponse {
            name: self.arena.full_name(id, self.delimiter),
            attributes,
        })
    }
}

enum Relink {
    /// The node is no longer where the rename found it.
    Vanished,
    /// The new parent was deleted.
    TargetVanished,
    /// The new name is taken by another node.
    Taken,
}

/// Move `node` out of `from` into `to` (or back into `from` if `None`) under
/// the name `new_name`. Both children maps are held locked by the caller.
fn relink(
    node: &Node,
    id: NodeId,
    from: &mut Children,
    to: Option<&mut Children>,
    new_parent: NodeId,
    new_name: &str,
) -> Result<(), Relink> {
    let old_key = child_key(&node.name());
    if from.by_name.get(&old_key) != Some(&id) {
        return Err(Relink::Vanished);
    }

    let new_key = child_key(new_name);
    {
        let target: &Children = to.as_deref().unwrap_or(&*from);
        if target.detached {
            return Err(Relink::TargetVanished);
        }
        if target.by_name.get(&new_key).map_or(false, |&other| other != id) {
            return Err(Relink::Taken);
        }
    }

    from.by_name.remove(&old_key);
    {
        let mut link = node.link.lock().unwrap();
        link.name = new_name.to_owned();
        link.parent = Some(new_parent);
    }
    to.unwrap_or(from).by_name.insert(new_key, id);
    Ok(())
}

#[cfg(test)]
mod test {
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use chrono::prelude::*;
    use rayon::prelude::*;

    use super::*;
    use crate::account::content::MemoryContentStore;
    use crate::account::identity::UserIdentity;
    use crate::account::id_range::MessageSet;
    use crate::account::projection::FetchFields;
    use crate::support::error::Unsupported;

    fn set_up() -> NamespaceTree {
        crate::init_test_log();
        NamespaceTree::new(
            &SystemConfig::default(),
            Arc::new(MemoryContentStore),
        )
    }

    fn names(responses: Vec<ListResponse>) -> Vec<String> {
        responses.into_iter().map(|r| r.name).collect()
    }

    fn list(tree: &NamespaceTree, base: &str, pattern: &str) -> Vec<String> {
        names(tree.list_mailboxes(base, pattern, false).unwrap())
    }

    fn append(mb: &Mailbox) -> Uid {
        mb.append(Utc::now().into(), vec![], "foo".as_bytes())
            .unwrap()
    }

    #[test]
    fn create_and_list_user_mailboxes() {
        let tree = set_up();
        tree.create_path("#users.joachim.INBOX", true).unwrap();
        tree.create_path("#users.joachim.INBOX.Drafts", true).unwrap();
        tree.create_path("#users.joachim2.INBOX", true).unwrap();

        let expected = vec![
            "#users.joachim.INBOX".to_owned(),
            "#users.joachim.INBOX.Drafts".to_owned(),
            "#users.joachim2.INBOX".to_owned(),
        ];
        assert_eq!(expected, list(&tree, "", "*"));

        assert_matches!(
            Err(Error::AlreadyExists { .. }),
            tree.create_path("#users.joachim.INBOX", true)
        );
        assert_matches!(
            Err(Error::AlreadyExists { .. }),
            tree.create_path("#USERS.Joachim.inbox", true)
        );
        assert_eq!(expected, list(&tree, "", "*"));

        assert_eq!(
            vec![
                "#users.joachim.INBOX".to_owned(),
                "#users.joachim.INBOX.Drafts".to_owned(),
            ],
            list(&tree, "#users.joachim", "*")
        );
        assert_eq!(
            vec!["#users.joachim.INBOX".to_owned()],
            list(&tree, "#users.joachim", "%")
        );
        // Namespace nodes themselves are never listed
        assert!(list(&tree, "", "%").is_empty());
        assert!(list(&tree, "#users", "%").is_empty());
    }

    #[test]
    fn single_level_wildcard() {
        let tree = set_up();
        tree.create_path("test1", true).unwrap();
        tree.create_path("INBOX", true).unwrap();
        tree.create_path("INBOX2", true).unwrap();
        tree.create_path("INBOX.sub", true).unwrap();

        assert_eq!(vec!["INBOX".to_owned()], list(&tree, "", "INBOX"));
        assert_eq!(vec!["INBOX".to_owned()], list(&tree, "", "inbox"));
        assert_eq!(
            vec!["INBOX".to_owned(), "INBOX2".to_owned()],
            list(&tree, "", "INBOX%")
        );
        assert_eq!(
            vec![
                "INBOX".to_owned(),
                "INBOX.sub".to_owned(),
                "INBOX2".to_owned(),
            ],
            list(&tree, "", "INBOX*")
        );
        assert_eq!(
            vec![
                "INBOX".to_owned(),
                "INBOX2".to_owned(),
                "test1".to_owned(),
            ],
            list(&tree, "", "%")
        );
        assert_eq!(vec!["INBOX.sub".to_owned()], list(&tree, "INBOX", "*"));
        assert_eq!(vec!["INBOX.sub".to_owned()], list(&tree, "", "INBOX.sub"));
        assert!(list(&tree, "nonexistent", "*").is_empty());
        assert!(list(&tree, "", "").is_empty());
        assert!(list(&tree, "IN*", "BOX").is_empty());
    }

    #[test]
    fn non_ascii_names_fold_like_list() {
        let tree = set_up();
        tree.create_path("Entwürfe", true).unwrap();
        tree.create_path("ENTWÜRFE", true).unwrap();

        assert!(tree.exists("Entwürfe"));
        assert!(tree.exists("ENTWÜRFE"));
        assert!(tree.exists("entwürfe"));
        assert!(tree.exists("entwÜrfe"));
        assert_matches!(
            Err(Error::AlreadyExists { .. }),
            tree.create_path("ENTWüRFE", true)
        );

        assert_eq!(vec!["Entwürfe".to_owned()], list(&tree, "", "entwürfe"));
        assert_eq!(vec!["ENTWÜRFE".to_owned()], list(&tree, "", "ENTWÜRFE"));
        assert_eq!(vec!["ENTWÜRFE".to_owned()], list(&tree, "", "entwÜrfe"));
        assert_eq!(
            vec!["ENTWÜRFE".to_owned(), "Entwürfe".to_owned()],
            list(&tree, "", "ent*")
        );
    }

    #[test]
    fn non_trailing_wildcard_unsupported() {
        let tree = set_up();
        tree.create_path("INBOX", true).unwrap();

        assert_matches!(
            Err(Error::Unsupported(Unsupported::NonTrailingWildcard(_))),
            tree.list_mailboxes("", "IN*X", false)
        );
        assert_matches!(
            Err(Error::Unsupported(Unsupported::NonTrailingWildcard(_))),
            tree.list_mailboxes("", "%.sub", false)
        );
    }

    #[test]
    fn invalid_names() {
        let tree = set_up();
        tree.create_path("INBOX", true).unwrap();

        for bad in &["a.b", "", "#news", "foo*", "foo%", "bell\x07"] {
            assert_matches!(
                Err(Error::InvalidName { .. }),
                tree.create_mailbox("INBOX", bad, true)
            );
        }

        for bad in &["", "a..b", ".a", "a.", "#users", "#users.joachim", "#x.y"]
        {
            assert_matches!(
                Err(Error::InvalidName { .. }),
                tree.create_path(bad, true)
            );
        }

        tree.ensure_user_root(&UserIdentity::new("joachim", '.').unwrap())
            .unwrap();
        assert_matches!(
            Err(Error::InvalidName { .. }),
            tree.create_mailbox("#users", "mallory", true)
        );
        assert_matches!(
            Err(Error::NotFound { .. }),
            tree.create_mailbox("Nowhere", "foo", true)
        );
        assert_matches!(
            Err(Error::AlreadyExists { .. }),
            tree.create_mailbox("", "inbox", true)
        );

        tree.create_mailbox("#users.joachim", "INBOX", true).unwrap();
        assert!(tree.exists("#users.joachim.INBOX"));
        assert!(!tree.exists("#users.joachim"));
        assert!(!tree.exists("#users"));
    }

    #[test]
    fn intermediate_mailboxes_are_noselect() {
        let tree = set_up();
        let leaf = tree.create_path("a.b.c", true).unwrap();
        assert!(leaf.is_selectable());
        assert_eq!("a.b.c", leaf.full_name());

        let a = tree.get_mailbox("a").unwrap();
        assert!(!a.is_selectable());
        assert_matches!(
            Err(Error::MailboxUnselectable { .. }),
            a.append(Utc::now().into(), vec![], "foo".as_bytes())
        );

        assert_eq!(
            vec![
                ListResponse {
                    name: "a".to_owned(),
                    attributes: vec![
                        MailboxAttribute::Noselect,
                        MailboxAttribute::HasChildren,
                    ],
                },
                ListResponse {
                    name: "a.b".to_owned(),
                    attributes: vec![
                        MailboxAttribute::Noselect,
                        MailboxAttribute::HasChildren,
                    ],
                },
                ListResponse {
                    name: "a.b.c".to_owned(),
                    attributes: vec![MailboxAttribute::HasNoChildren],
                },
            ],
            tree.list_mailboxes("", "*", false).unwrap()
        );

        assert_eq!(
            vec!["a.b".to_owned()],
            names(tree.get_children("a").unwrap())
        );
        assert_eq!(vec!["a".to_owned()], names(tree.get_children("").unwrap()));
        assert_matches!(Err(Error::NotFound { .. }), tree.get_children("x"));
    }

    #[test]
    fn deletion_guard() {
        let tree = set_up();
        tree.create_path("parent.child", true).unwrap();
        let lonely = tree.create_path("lonely", true).unwrap();

        assert_matches!(
            Err(Error::NotEmpty { children: 1, .. }),
            tree.delete_mailbox("parent")
        );

        let uid = append(&lonely);
        assert_matches!(
            Err(Error::NotEmpty { messages: 1, .. }),
            tree.delete_mailbox("lonely")
        );

        lonely
            .store(
                &MessageSet::just_uid(uid),
                StoreMode::Add,
                &[Flag::Deleted],
                FetchFields::NOTHING,
            )
            .unwrap();
        lonely.expunge(&MessageSet::All, FetchFields::NOTHING).unwrap();
        tree.delete_mailbox("lonely").unwrap();
        assert!(!tree.exists("lonely"));
        assert_matches!(
            Err(Error::NotFound { .. }),
            tree.get_mailbox("lonely")
        );
        assert_matches!(Err(Error::NotFound { .. }), lonely.uid_next());

        tree.delete_mailbox("parent.child").unwrap();
        tree.delete_mailbox("parent").unwrap();
        assert!(list(&tree, "", "*").is_empty());
        assert_matches!(
            Err(Error::NotFound { .. }),
            tree.delete_mailbox("parent")
        );

        // Recreating gives a new, unrelated mailbox
        let reborn = tree.create_path("lonely", true).unwrap();
        assert!(!Arc::ptr_eq(&lonely, &reborn));
        assert_eq!(Uid::MIN, reborn.uid_next().unwrap());
    }

    #[test]
    fn rename_moves_subtree_and_keeps_identity() {
        let tree = set_up();
        let b = tree.create_path("a.b", true).unwrap();
        let c = tree.create_path("a.b.c", true).unwrap();
        let uid = append(&b);
        let b_validity = b.uid_validity().unwrap();
        let c_validity = c.uid_validity().unwrap();

        tree.rename_mailbox("a.b", "x.y.z").unwrap();

        assert!(!tree.exists("a.b"));
        assert!(!tree.exists("a.b.c"));
        assert!(tree.exists("a"));
        assert!(!tree.get_mailbox("x.y").unwrap().is_selectable());

        let moved = tree.get_mailbox("x.y.z").unwrap();
        assert!(Arc::ptr_eq(&b, &moved));
        assert_eq!("x.y.z", b.full_name());
        assert_eq!("x.y.z.c", c.full_name());
        assert_eq!(b_validity, b.uid_validity().unwrap());
        assert_eq!(c_validity, c.uid_validity().unwrap());
        assert_eq!(Seqnum::u(1), b.msn_of(uid).unwrap());
        assert!(Arc::ptr_eq(&c, &tree.get_mailbox("x.y.z.c").unwrap()));

        assert_eq!(
            vec![
                "a".to_owned(),
                "x".to_owned(),
                "x.y".to_owned(),
                "x.y.z".to_owned(),
                "x.y.z.c".to_owned(),
            ],
            list(&tree, "", "*")
        );

        // Case-only rename in place
        tree.rename_mailbox("x.y.z", "x.y.Z").unwrap();
        assert_eq!("x.y.Z.c", c.full_name());
    }

    #[test]
    fn rename_errors() {
        let tree = set_up();
        tree.create_path("a.b", true).unwrap();
        tree.create_path("other", true).unwrap();

        assert_matches!(
            Err(Error::NotFound { .. }),
            tree.rename_mailbox("nx", "foo")
        );
        assert_matches!(
            Err(Error::AlreadyExists { .. }),
            tree.rename_mailbox("a.b", "OTHER")
        );
        assert_matches!(
            Err(Error::InvalidName { .. }),
            tree.rename_mailbox("a", "a.b.c")
        );
        assert_matches!(
            Err(Error::InvalidName { .. }),
            tree.rename_mailbox("a", "a.new")
        );
        assert_matches!(
            Err(Error::InvalidName { .. }),
            tree.rename_mailbox("a", "bad*name")
        );
        // Nothing was created by the failed attempts
        assert_eq!(
            vec!["a".to_owned(), "a.b".to_owned(), "other".to_owned()],
            list(&tree, "", "*")
        );
    }

    #[test]
    fn subscriptions() {
        let tree = set_up();
        tree.create_path("INBOX", true).unwrap();
        tree.create_path("Archive.2020", true).unwrap();

        tree.subscribe("INBOX").unwrap();
        tree.subscribe("archive.2020").unwrap();
        assert_matches!(Err(Error::NotFound { .. }), tree.subscribe("Nope"));

        assert_eq!(
            vec!["Archive.2020".to_owned(), "INBOX".to_owned()],
            names(tree.list_mailboxes("", "*", true).unwrap())
        );
        assert_eq!(
            vec![MailboxAttribute::HasNoChildren, MailboxAttribute::Subscribed],
            tree.list_mailboxes("", "INBOX", false).unwrap()[0].attributes
        );

        tree.unsubscribe("INBOX").unwrap();
        assert_eq!(
            vec!["Archive.2020".to_owned()],
            names(tree.list_mailboxes("", "*", true).unwrap())
        );
    }

    #[test]
    fn selectability_changes() {
        let tree = set_up();
        let inbox = tree.create_path("INBOX", true).unwrap();
        let folder = tree.create_path("Folder", false).unwrap();
        let original = inbox.uid_validity().unwrap();

        tree.set_selectable("Folder", true).unwrap();
        assert!(folder.is_selectable());
        assert!(folder.uid_validity().unwrap() > original);

        append(&inbox);
        assert_matches!(
            Err(Error::NotEmpty { messages: 1, .. }),
            tree.set_selectable("INBOX", false)
        );
        tree.set_selectable("Folder", false).unwrap();
        assert!(!folder.is_selectable());
        assert_eq!(
            vec![MailboxAttribute::Noselect, MailboxAttribute::HasNoChildren],
            tree.list_mailboxes("", "Folder", false).unwrap()[0].attributes
        );
    }

    #[test]
    fn uid_validity_strictly_increases() {
        let generator = UidValidityGenerator::default();
        let mut prev = generator.next();
        assert!(prev > 0);
        for _ in 0..1000 {
            let next = generator.next();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn concurrent_creation() {
        let tree = set_up();
        tree.create_path("INBOX", true).unwrap();

        (0..64).into_par_iter().for_each(|i| {
            let mb = tree
                .create_mailbox("INBOX", &format!("child{}", i), true)
                .unwrap();
            append(&mb);
        });

        let children = tree.get_children("INBOX").unwrap();
        assert_eq!(64, children.len());
        let mut validities = children
            .iter()
            .map(|c| tree.get_mailbox(&c.name).unwrap().uid_validity().unwrap())
            .collect::<Vec<_>>();
        validities.sort();
        validities.dedup();
        assert_eq!(64, validities.len());
    }

    #[test]
    fn unrelated_subtrees_do_not_block_each_other() {
        let tree = Arc::new(set_up());
        tree.create_path("a.x", true).unwrap();
        tree.create_path("b", true).unwrap();

        let a = tree.arena.lookup("a", '.').unwrap();
        let a = tree.arena.node(a).unwrap();
        let _held = a.children.lock().unwrap();

        let (tx, rx) = mpsc::channel();
        let worker = {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                tree.create_path("b.c.d", true).unwrap();
                tree.rename_mailbox("b.c", "e").unwrap();
                tree.delete_mailbox("e.d").unwrap();
                tx.send(()).unwrap();
            })
        };

        rx.recv_timeout(Duration::from_secs(30)).unwrap();
        worker.join().unwrap();
        assert!(tree.exists("e"));
        assert!(!tree.exists("b.c"));
    }

    #[test]
    fn concurrent_structural_changes() {
        let tree = set_up();
        tree.create_path("shared", false).unwrap();

        (0..32).into_par_iter().for_each(|i| {
            let base = format!("shared.u{}", i);
            tree.create_path(&format!("{}.a.b", base), true).unwrap();
            tree.rename_mailbox(
                &format!("{}.a", base),
                &format!("moved.u{}.z", i),
            )
            .unwrap();
            append(&tree.get_mailbox(&format!("moved.u{}.z.b", i)).unwrap());
            tree.delete_mailbox(&base).unwrap();
        });

        assert!(tree.get_children("shared").unwrap().is_empty());
        let moved = tree.get_children("moved").unwrap();
        assert_eq!(32, moved.len());
        for i in 0..32 {
            let mb = tree.get_mailbox(&format!("moved.u{}.z.b", i)).unwrap();
            assert_eq!(format!("moved.u{}.z.b", i), mb.full_name());
            assert_eq!(1, mb.message_count());
        }
    }
}
