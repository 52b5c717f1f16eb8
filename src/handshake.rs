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

//! The transport handshake boundary: negotiating plaintext vs. encrypted transport, grounded on
//! `server-generic.c`'s `setup_connection`. The manager core treats this purely as "a completed
//! byte stream plus an identity and permission set" (spec §6), never looking at certificates or
//! cipher suites itself.

use crate::permission::Permission;

/// External collaborator negotiating the transport before the framed protocol begins.
pub trait TransportHandshake: std::fmt::Debug + Send + Sync {
    /// Performs the handshake. Returns the permission bits and, if the transport layer carries
    /// one (e.g. a certificate subject), the analyzer identity it has established for this peer.
    /// The permission half is what `process_first_message` checks a peer's declared `IDMEF_READ`
    /// capability against: a relay subscription is only honored if the transport already trusts
    /// this peer to read events, independent of anything the peer itself claims.
    fn negotiate<S: std::io::Read + std::io::Write>(
        &self,
        stream: &mut S,
    ) -> std::io::Result<(Permission, Option<u64>)>;
}

/// A [`TransportHandshake`] that performs no negotiation at all: the stream is framed-protocol
/// ready as soon as the transport connects, and grants no permission bits.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaintextHandshake;

impl TransportHandshake for PlaintextHandshake {
    fn negotiate<S: std::io::Read + std::io::Write>(
        &self,
        _stream: &mut S,
    ) -> std::io::Result<(Permission, Option<u64>)> {
        Ok((Permission::empty(), None))
    }
}
