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

//! Error kinds shared across the framed I/O layer, the router, and the capability handshake.

use std::io;

use thiserror::Error;

/// Failures from decoding or encoding a framed message.
#[derive(Debug, Error)]
pub enum FrameError {
    /// A sub-tag carried a length that violates its documented alignment rule, e.g. a
    /// `TARGET_ID` length that isn't a positive multiple of 8, or fewer than 2 ids.
    #[error("malformed sub-tag: {0}")]
    InvalidFrame(&'static str),

    /// The peer half-closed the connection.
    #[error("peer closed the connection")]
    Eof,

    /// Read or write failed for a reason other than a malformed frame or would-block.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

/// Outcome of routing a single admin request or reply.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The message's hop route failed to parse; see [`FrameError::InvalidFrame`].
    #[error(transparent)]
    InvalidFrame(#[from] FrameError),

    /// No connection in the registry matches the next hop's analyzer id.
    #[error("destination analyzer is unreachable")]
    NoSuchAnalyzer,

    /// The recipient's credentials forbid processing this admin request.
    #[error("destination analyzer administratively prohibits this request")]
    RecipientDenies,

    /// The emitter's credentials forbid sending this admin request.
    #[error("emitter lacks credentials to issue this admin request")]
    EmitterDenied,
}

/// Failures during the first-message capability handshake.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// The first message on a peer-initiated connection was not `CONNECTION_CAPABILITY`.
    #[error("first message was not CONNECTION_CAPABILITY")]
    NotFirstMessage,

    /// The peer declared `IDMEF_READ` but our local credentials lack it.
    #[error("peer declared IDMEF_READ without matching local credential")]
    RelayCredentialDenied,

    /// A message arrived in the `Ready` state that is invalid there (e.g. capability resent).
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// The underlying frame was malformed.
    #[error(transparent)]
    Frame(#[from] FrameError),
}
