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

//! Building fetch results out of message records.
//!
//! Only the requested fields are populated. Content-bearing fields are mere
//! views onto the message's content handle; nothing is read until the caller
//! asks for a size or writes the view out.

use std::cell::Cell;
use std::fmt;
use std::io::{self, BufRead, Read, Write};
use std::sync::Arc;

use bitflags::bitflags;
use chrono::prelude::*;

use super::content::ContentHandle;
use super::mailbox_state::MessageRecord;
use super::model::*;
use crate::support::error::Error;

bitflags! {
    /// The fields a caller wants in each `MessageResult`.
    #[derive(Default)]
    pub struct FetchFields: u16 {
        const NOTHING = 0;
        const UID = 1 << 0;
        const MSN = 1 << 1;
        const KEY = 1 << 2;
        const SIZE = 1 << 3;
        const INTERNAL_DATE = 1 << 4;
        const FLAGS = 1 << 5;
        const HEADERS = 1 << 6;
        const FULL_CONTENT = 1 << 7;
        const BODY_CONTENT = 1 << 8;
        const MIME_MESSAGE = 1 << 9;
    }
}

/// Which part of a message a `ContentView` covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Part {
    /// The whole message.
    Full,
    /// The header block, including the blank line which terminates it.
    Headers,
    /// Everything after the header block.
    Body,
}

/// A lazily-evaluated view onto part of a message's content.
///
/// The usual pattern is to call `size()` to size whatever output buffer or
/// literal prefix is needed, then `write_to()` to stream the data.
pub struct ContentView {
    handle: Arc<dyn ContentHandle>,
    part: Part,
    header_len: Cell<Option<u64>>,
}

impl ContentView {
    pub fn new(handle: Arc<dyn ContentHandle>, part: Part) -> Self {
        ContentView {
            handle,
            part,
            header_len: Cell::new(None),
        }
    }

    pub fn part(&self) -> Part {
        self.part
    }

    /// The exact number of bytes `write_to` will produce.
    pub fn size(&self) -> Result<u64, Error> {
        match self.part {
            Part::Full => Ok(self.handle.size()),
            Part::Headers => self.header_len(),
            Part::Body => {
                Ok(self.handle.size().saturating_sub(self.header_len()?))
            }
        }
    }

    /// Write the viewed bytes to `sink`, returning how many were written.
    pub fn write_to(&self, sink: &mut dyn Write) -> Result<u64, Error> {
        match self.part {
            Part::Full => self.handle.write_to(sink),
            Part::Headers => {
                let len = self.header_len()?;
                let mut r = self.handle.open()?;
                Ok(io::copy(&mut r.by_ref().take(len), sink)?)
            }
            Part::Body => {
                let len = self.header_len()?;
                let mut r = self.handle.open()?;
                io::copy(&mut r.by_ref().take(len), &mut io::sink())?;
                Ok(io::copy(&mut r, sink)?)
            }
        }
    }

    /// Convenience for writing the view into a fresh `Vec`.
    pub fn to_vec(&self) -> Result<Vec<u8>, Error> {
        let mut data = Vec::new();
        self.write_to(&mut data)?;
        Ok(data)
    }

    fn header_len(&self) -> Result<u64, Error> {
        if let Some(len) = self.header_len.get() {
            return Ok(len);
        }

        let len = header_block_len(&mut *self.handle.open()?)?;
        self.header_len.set(Some(len));
        Ok(len)
    }
}

impl fmt::Debug for ContentView {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<{:?} content view>", self.part)
    }
}

/// Find the length of the header block at the start of `r`.
///
/// The block ends after the first empty line; a message without one is all
/// header.
fn header_block_len(r: &mut dyn BufRead) -> Result<u64, Error> {
    let mut len = 0u64;
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = r.read_until(b'\n', &mut line)?;
        if 0 == n {
            break;
        }

        len += n as u64;
        if b"\n" == &line[..] || b"\r\n" == &line[..] {
            break;
        }
    }

    Ok(len)
}

/// A single unfolded header field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderField {
    pub name: String,
    pub value: String,
}

/// Minimal structured access to a message.
///
/// Header fields are split and unfolded when asked for. The body is exposed
/// as an opaque view; no MIME structure is interpreted.
#[derive(Debug)]
pub struct MimeMessage {
    full: ContentView,
}

impl MimeMessage {
    pub fn new(handle: Arc<dyn ContentHandle>) -> Self {
        MimeMessage {
            full: ContentView::new(handle, Part::Full),
        }
    }

    pub fn size(&self) -> u64 {
        self.full.handle.size()
    }

    /// Read and unfold the header fields, in order.
    ///
    /// Lines without a colon that aren't continuations are ignored.
    pub fn headers(&self) -> Result<Vec<HeaderField>, Error> {
        let mut r = self.full.handle.open()?;
        let mut fields: Vec<HeaderField> = Vec::new();
        let mut line = Vec::new();

        loop {
            line.clear();
            if 0 == r.read_until(b'\n', &mut line)? {
                break;
            }

            let text = String::from_utf8_lossy(&line);
            let text = text.trim_end_matches(|c| '\r' == c || '\n' == c);
            if text.is_empty() {
                break;
            }

            if text.starts_with(|c| ' ' == c || '\t' == c) {
                if let Some(last) = fields.last_mut() {
                    last.value.push_str(text);
                }
                continue;
            }

            if let Some(colon) = text.find(':') {
                fields.push(HeaderField {
                    name: text[..colon].trim().to_owned(),
                    value: text[colon + 1..].trim_start().to_owned(),
                });
            }
        }

        Ok(fields)
    }

    /// Return the value of the first header called `name`, compared
    /// case-insensitively.
    pub fn header(&self, name: &str) -> Result<Option<String>, Error> {
        Ok(self
            .headers()?
            .into_iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value))
    }

    pub fn body(&self) -> ContentView {
        ContentView::new(Arc::clone(&self.full.handle), Part::Body)
    }

    pub fn full(&self) -> &ContentView {
        &self.full
    }
}

/// The projection of one message onto a set of `FetchFields`.
///
/// Every accessor returns `None` if its field was not requested; `included()`
/// tells which ones were.
pub struct MessageResult {
    included: FetchFields,
    uid: Option<Uid>,
    msn: Option<Seqnum>,
    key: Option<MessageKey>,
    size: Option<u64>,
    internal_date: Option<DateTime<FixedOffset>>,
    flags: Option<FlagSet>,
    headers: Option<ContentView>,
    full_content: Option<ContentView>,
    body_content: Option<ContentView>,
    mime_message: Option<MimeMessage>,
}

impl MessageResult {
    pub fn included(&self) -> FetchFields {
        self.included
    }

    pub fn uid(&self) -> Option<Uid> {
        self.uid
    }

    pub fn msn(&self) -> Option<Seqnum> {
        self.msn
    }

    pub fn key(&self) -> Option<MessageKey> {
        self.key
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn internal_date(&self) -> Option<DateTime<FixedOffset>> {
        self.internal_date
    }

    pub fn flags(&self) -> Option<&FlagSet> {
        self.flags.as_ref()
    }

    pub fn headers(&self) -> Option<&ContentView> {
        self.headers.as_ref()
    }

    pub fn full_content(&self) -> Option<&ContentView> {
        self.full_content.as_ref()
    }

    pub fn body_content(&self) -> Option<&ContentView> {
        self.body_content.as_ref()
    }

    pub fn mime_message(&self) -> Option<&MimeMessage> {
        self.mime_message.as_ref()
    }
}

impl fmt::Debug for MessageResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MessageResult")
            .field("included", &self.included)
            .field("uid", &self.uid)
            .field("msn", &self.msn)
            .field("key", &self.key)
            .field("size", &self.size)
            .field("internal_date", &self.internal_date)
            .field("flags", &self.flags)
            .finish()
    }
}

/// Project `record`, currently at `seqnum` in a mailbox of the given UID
/// validity, onto `fields`.
pub fn project(
    record: &MessageRecord,
    seqnum: Seqnum,
    uid_validity: u32,
    fields: FetchFields,
) -> MessageResult {
    let view = |flag: FetchFields, part: Part| {
        if fields.contains(flag) {
            Some(ContentView::new(Arc::clone(&record.content), part))
        } else {
            None
        }
    };

    MessageResult {
        included: fields,
        uid: Some(record.uid).filter(|_| fields.contains(FetchFields::UID)),
        msn: Some(seqnum).filter(|_| fields.contains(FetchFields::MSN)),
        key: Some(MessageKey {
            uid_validity,
            uid: record.uid,
        })
        .filter(|_| fields.contains(FetchFields::KEY)),
        size: Some(record.size())
            .filter(|_| fields.contains(FetchFields::SIZE)),
        internal_date: Some(record.internal_date)
            .filter(|_| fields.contains(FetchFields::INTERNAL_DATE)),
        flags: if fields.contains(FetchFields::FLAGS) {
            Some(record.flags.clone())
        } else {
            None
        },
        headers: view(FetchFields::HEADERS, Part::Headers),
        full_content: view(FetchFields::FULL_CONTENT, Part::Full),
        body_content: view(FetchFields::BODY_CONTENT, Part::Body),
        mime_message: if fields.contains(FetchFields::MIME_MESSAGE) {
            Some(MimeMessage::new(Arc::clone(&record.content)))
        } else {
            None
        },
    }
}
