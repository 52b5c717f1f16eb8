// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The framed wire format: a length-prefixed record with a one-byte top-level tag, carrying a
//! sequence of (sub-tag, length, bytes) triplets.
//!
//! Wire layout of one record:
//!
//! ```text
//! [u32 payload_len][u8 tag][ (sub-tag triplet)* ]
//! ```
//!
//! where each sub-tag triplet is `[u8 sub_tag][u32 len][len bytes]`. All multi-byte integers are
//! network byte order (big-endian).

use std::io::{self, ErrorKind, Read, Write};

use crate::{buffer::Buffer, error::FrameError};

const HEADER_LEN: usize = 4 + 1;
const SUBTAG_HEADER_LEN: usize = 1 + 4;

/// Top-level message tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    /// Carries an IDMEF event destined for the event scheduler.
    Idmef,
    /// An admin request walking a hop route towards its target.
    OptionRequest,
    /// An admin reply walking a hop route back towards its requester.
    OptionReply,
    /// First-message capability announcement.
    ConnectionCapability,
}

impl Tag {
    fn from_u8(b: u8) -> Result<Self, FrameError> {
        match b {
            1 => Ok(Tag::Idmef),
            2 => Ok(Tag::OptionRequest),
            3 => Ok(Tag::OptionReply),
            4 => Ok(Tag::ConnectionCapability),
            _ => Err(FrameError::InvalidFrame("unrecognized top-level tag")),
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Tag::Idmef => 1,
            Tag::OptionRequest => 2,
            Tag::OptionReply => 3,
            Tag::ConnectionCapability => 4,
        }
    }
}

/// Sub-tag identifiers carried within an admin message's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubTag {
    /// The hop route: an array of N >= 2 64-bit analyzer ids.
    TargetId,
    /// The current hop index into `TargetId`.
    Hop,
    /// A NUL-terminated ASCII error reason string.
    Error,
    /// A capability bitmask, carried on `CONNECTION_CAPABILITY` messages.
    Capability,
    /// Opaque payload bytes (e.g. an encoded IDMEF event, or option data).
    Data,
}

impl SubTag {
    fn from_u8(b: u8) -> Self {
        match b {
            1 => SubTag::TargetId,
            2 => SubTag::Hop,
            3 => SubTag::Error,
            4 => SubTag::Capability,
            _ => SubTag::Data,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            SubTag::TargetId => 1,
            SubTag::Hop => 2,
            SubTag::Error => 3,
            SubTag::Capability => 4,
            SubTag::Data => 5,
        }
    }
}

/// One (sub-tag, length, bytes) triplet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubTagRecord {
    /// Which sub-tag this record carries.
    pub tag: SubTag,
    /// The payload bytes for this sub-tag.
    pub bytes: Vec<u8>,
}

/// A fully decoded framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The top-level tag.
    pub tag: Tag,
    /// Sub-tag triplets, in wire order.
    pub sub_tags: Vec<SubTagRecord>,
}

impl Frame {
    /// Builds a bare frame with no sub-tags.
    pub fn new(tag: Tag) -> Self {
        Self {
            tag,
            sub_tags: Vec::new(),
        }
    }

    /// Appends a sub-tag record.
    pub fn push(mut self, tag: SubTag, bytes: Vec<u8>) -> Self {
        self.sub_tags.push(SubTagRecord { tag, bytes });
        self
    }

    /// First sub-tag record matching `tag`, if any.
    pub fn sub_tag(&self, tag: SubTag) -> Option<&SubTagRecord> {
        self.sub_tags.iter().find(|r| r.tag == tag)
    }

    /// Encodes this frame to its wire representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        for rec in &self.sub_tags {
            payload.push(rec.tag.to_u8());
            payload.extend_from_slice(&(rec.bytes.len() as u32).to_be_bytes());
            payload.extend_from_slice(&rec.bytes);
        }

        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.push(self.tag.to_u8());
        out.extend_from_slice(&payload);
        out
    }

    /// Attempts to parse one frame from the front of `data`. Returns `Ok(None)` if `data` does
    /// not yet contain a complete frame (more bytes are needed before retrying).
    fn try_parse(data: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
        if data.len() < HEADER_LEN {
            return Ok(None);
        }

        let payload_len = u32::from_be_bytes(data[0..4].try_into().unwrap()) as usize;
        let tag = Tag::from_u8(data[4])?;

        let total_len = HEADER_LEN + payload_len;
        if data.len() < total_len {
            return Ok(None);
        }

        let mut sub_tags = Vec::new();
        let payload = &data[HEADER_LEN..total_len];
        let mut offset = 0;

        while offset < payload.len() {
            if payload.len() - offset < SUBTAG_HEADER_LEN {
                return Err(FrameError::InvalidFrame("truncated sub-tag header"));
            }

            let sub_tag = SubTag::from_u8(payload[offset]);
            let len =
                u32::from_be_bytes(payload[offset + 1..offset + 5].try_into().unwrap()) as usize;
            offset += SUBTAG_HEADER_LEN;

            if payload.len() - offset < len {
                return Err(FrameError::InvalidFrame("sub-tag length exceeds payload"));
            }

            // Alignment only: a TARGET_ID carrying fewer than 2 ids is a route-specific
            // invariant enforced by the router (synthesized error replies legitimately carry
            // a truncated, possibly single-id or empty, route), not a wire-framing rule.
            if sub_tag == SubTag::TargetId && len % 8 != 0 {
                return Err(FrameError::InvalidFrame(
                    "TARGET_ID length must be a multiple of 8",
                ));
            }

            sub_tags.push(SubTagRecord {
                tag: sub_tag,
                bytes: payload[offset..offset + len].to_vec(),
            });
            offset += len;
        }

        Ok(Some((Frame { tag, sub_tags }, total_len)))
    }
}

/// Outcome of a single [`read_message`] attempt.
#[derive(Debug)]
pub enum ReadOutcome {
    /// A full frame was decoded.
    Complete(Frame),
    /// Not enough bytes are available yet; the partial state has been retained.
    WouldBlock,
    /// The peer half-closed the connection with no partial message pending.
    Eof,
}

/// Outcome of a single [`write_message`] attempt.
#[derive(Debug)]
pub enum WriteOutcome {
    /// The entire frame was written.
    Done,
    /// The transport could not accept any more bytes right now; retry the same frame later.
    WouldBlock,
}

/// Holds the resumable partial-read state for one connection's inbound stream.
#[derive(Debug)]
pub struct FrameReader {
    buf: Buffer,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReader {
    const READ_CHUNK: usize = 16 * 1024;

    /// Creates an empty reader.
    pub fn new() -> Self {
        Self {
            buf: Buffer::new(Self::READ_CHUNK),
        }
    }

    /// True if a partial (incomplete) message is currently buffered.
    pub fn has_partial(&self) -> bool {
        self.buf.remaining() > 0
    }

    /// Reads from `stream` and attempts to decode one complete frame.
    ///
    /// Resumable: if this returns [`ReadOutcome::WouldBlock`], the partial bytes read so far
    /// remain in the internal buffer and the next call continues from there.
    pub fn read_message<S: Read>(&mut self, stream: &mut S) -> Result<ReadOutcome, FrameError> {
        let mut total_read = 0usize;

        loop {
            if self.buf.remaining_mut() < 4096 {
                self.buf.reserve(Self::READ_CHUNK);
            }

            match stream.read(&mut self.buf) {
                Ok(0) => {
                    if total_read == 0 && self.buf.remaining() == 0 {
                        return Ok(ReadOutcome::Eof);
                    }
                    break;
                }
                Ok(n) => {
                    self.buf.mark_written(n);
                    total_read += n;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(FrameError::Transport(e)),
            }
        }

        match Frame::try_parse(&self.buf)? {
            Some((frame, consumed)) => {
                self.buf.mark_read(consumed);
                Ok(ReadOutcome::Complete(frame))
            }
            None => Ok(ReadOutcome::WouldBlock),
        }
    }
}

/// Attempts to write `frame` to `stream` in full.
pub fn write_message<S: Write>(stream: &mut S, frame: &Frame) -> io::Result<WriteOutcome> {
    let bytes = frame.encode();
    match stream.write_all(&bytes) {
        Ok(()) => Ok(WriteOutcome::Done),
        Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(WriteOutcome::WouldBlock),
        Err(e) => Err(e),
    }
}
