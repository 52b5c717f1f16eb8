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

//! The first-message capability handshake: every connection's very first framed message must be
//! `CONNECTION_CAPABILITY`, declaring the permission bits the peer intends to exercise. Grounded
//! on `sensor-server.c`'s `read_connection_type`, `handle_declare_parent_relay`, and
//! `handle_declare_client`.

use std::io::{Read, Write};

use mio::event::Source;
use tracing::{debug, info};

use crate::connection::{ConnState, SensorConnection};
use crate::context::ServerContext;
use crate::error::CapabilityError;
use crate::message::{Frame, SubTag, Tag};
use crate::permission::Permission;

/// Processes `frame` as the first message on `conn`. On success, `conn` transitions from
/// [`ConnState::Fresh`] to [`ConnState::Ready`] with its identity, permission, event queue, and
/// (if applicable) reverse-relay registration populated.
pub fn process_first_message<S>(
    conn: &mut SensorConnection<S>,
    frame: &Frame,
    ctx: &ServerContext,
) -> Result<(), CapabilityError>
where
    S: Read + Write + Source,
{
    debug_assert_eq!(conn.state, ConnState::Fresh);

    if frame.tag != Tag::ConnectionCapability {
        return Err(CapabilityError::NotFirstMessage);
    }

    let cap_bytes = &frame
        .sub_tag(SubTag::Capability)
        .ok_or(CapabilityError::ProtocolViolation(
            "CONNECTION_CAPABILITY missing CAPABILITY sub-tag",
        ))?
        .bytes;
    let declared_byte = *cap_bytes
        .first()
        .ok_or(CapabilityError::ProtocolViolation("empty CAPABILITY sub-tag"))?;
    let declared = Permission::from_bits_truncate(declared_byte);

    let identity = frame
        .sub_tag(SubTag::Data)
        .and_then(|rec| rec.bytes.get(0..8))
        .map(|b| u64::from_be_bytes(b.try_into().unwrap()))
        .or(conn.local_identity);

    if declared.contains(Permission::IDMEF_READ) {
        if !conn.local_permission.contains(Permission::IDMEF_READ) {
            return Err(CapabilityError::RelayCredentialDenied);
        }

        let analyzer_id = identity.ok_or(CapabilityError::ProtocolViolation(
            "IDMEF_READ declared without an analyzer id",
        ))?;

        match ctx.relays.search_receiver(analyzer_id) {
            Some(existing) => {
                ctx.relays.set_receiver_alive(existing);
                conn.relay = Some(existing);
                info!(analyzer_id, "rebound reverse relay to new connection");
            }
            None => {
                let handle = ctx.relays.add_receiver(analyzer_id);
                conn.relay = Some(handle);
                info!(analyzer_id, "registered new reverse relay");
            }
        }
    }

    conn.permission = declared;
    conn.identity = identity;
    conn.queue = Some(ctx.scheduler.queue_new());
    conn.state = ConnState::Ready;

    debug!(
        we_connected = conn.we_connected,
        permission = ?declared,
        identity = ?identity,
        "capability handshake complete"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::InMemoryRelayRegistry;
    use crate::scheduler::RecordingScheduler;
    use std::io::{self, Cursor};
    use std::sync::Arc;

    use mio::{Interest, Registry, Token};

    #[derive(Debug)]
    struct MemoryStream(Cursor<Vec<u8>>);
    impl Read for MemoryStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.0.read(buf)
        }
    }
    impl Write for MemoryStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
    impl Source for MemoryStream {
        fn register(&mut self, _: &Registry, _: Token, _: Interest) -> io::Result<()> {
            Ok(())
        }
        fn reregister(&mut self, _: &Registry, _: Token, _: Interest) -> io::Result<()> {
            Ok(())
        }
        fn deregister(&mut self, _: &Registry) -> io::Result<()> {
            Ok(())
        }
    }

    fn ctx() -> ServerContext {
        ServerContext::new(
            1,
            Arc::new(RecordingScheduler::new()),
            Arc::new(InMemoryRelayRegistry::new()),
        )
    }

    fn capability_frame(bits: u8, identity: Option<u64>) -> Frame {
        let mut frame = Frame::new(Tag::ConnectionCapability).push(SubTag::Capability, vec![bits]);
        if let Some(id) = identity {
            frame = frame.push(SubTag::Data, id.to_be_bytes().to_vec());
        }
        frame
    }

    #[test]
    fn non_capability_first_message_is_rejected() {
        let mut conn = SensorConnection::new(Token(0), MemoryStream(Cursor::new(Vec::new())), false);
        let frame = Frame::new(Tag::Idmef);
        let err = process_first_message(&mut conn, &frame, &ctx()).unwrap_err();
        assert!(matches!(err, CapabilityError::NotFirstMessage));
    }

    #[test]
    fn idmef_read_without_identity_is_rejected() {
        let mut conn = SensorConnection::new(Token(0), MemoryStream(Cursor::new(Vec::new())), false);
        conn.local_permission = Permission::IDMEF_READ;
        let frame = capability_frame(Permission::IDMEF_READ.bits(), None);
        let err = process_first_message(&mut conn, &frame, &ctx()).unwrap_err();
        assert!(matches!(err, CapabilityError::ProtocolViolation(_)));
    }

    #[test]
    fn idmef_read_without_local_credential_is_denied() {
        let mut conn = SensorConnection::new(Token(0), MemoryStream(Cursor::new(Vec::new())), false);
        // local_permission defaults to empty: the transport never granted IDMEF_READ.
        let frame = capability_frame(Permission::IDMEF_READ.bits(), Some(7));
        let err = process_first_message(&mut conn, &frame, &ctx()).unwrap_err();
        assert!(matches!(err, CapabilityError::RelayCredentialDenied));
    }

    #[test]
    fn successful_handshake_populates_connection() {
        let mut conn = SensorConnection::new(Token(0), MemoryStream(Cursor::new(Vec::new())), true);
        let frame = capability_frame(Permission::IDMEF_WRITE.bits(), Some(42));
        process_first_message(&mut conn, &frame, &ctx()).unwrap();

        assert_eq!(conn.state, ConnState::Ready);
        assert_eq!(conn.identity, Some(42));
        assert_eq!(conn.permission, Permission::IDMEF_WRITE);
        assert!(conn.queue.is_some());
        assert!(conn.relay.is_none());
    }

    #[test]
    fn idmef_read_registers_reverse_relay() {
        let mut conn = SensorConnection::new(Token(0), MemoryStream(Cursor::new(Vec::new())), false);
        conn.local_permission = Permission::IDMEF_READ;
        let frame = capability_frame(Permission::IDMEF_READ.bits(), Some(7));
        let context = ctx();
        process_first_message(&mut conn, &frame, &context).unwrap();

        assert!(conn.relay.is_some());
        assert_eq!(context.relays.search_receiver(7), conn.relay);
    }
}
