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

//! A single sensor/manager TCP (or UNIX) connection: its framed I/O state, its credentials, and
//! its outbound queue. Grounded on `sensor-server.c`'s `cnx_struct` for the field set and on
//! `mio::event::Source`'s register/reregister/deregister shape for transport lifecycle.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::io::{self, Read, Write};
use std::sync::Arc;

use mio::event::Source;
use mio::{Interest, Registry, Token};

use crate::context::ServerContext;
use crate::message::{Frame, FrameReader, ReadOutcome, WriteOutcome};
use crate::permission::Permission;
use crate::relay::RelayHandle;
use crate::scheduler::QueueHandle;

/// Where a connection stands in the capability handshake.
///
/// A tagged enum rather than a nullable permission field: `Fresh` carries no meaningful
/// permission bits at all, so there is no "zero permission" value that could be confused with a
/// peer that legitimately declared no capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// No `CONNECTION_CAPABILITY` message has been processed yet.
    Fresh,
    /// Credentials are established; framed IDMEF/admin traffic may flow.
    Ready,
}

/// One live connection to a sensor, an upstream manager, or an admin client.
#[derive(Debug)]
pub struct SensorConnection<S> {
    token: Token,
    stream: S,
    /// `true` if we dialed out to the peer; `false` if the peer connected to us. Determines which
    /// side of [`Permission::required_for_idmef_emit`] and friends applies.
    pub we_connected: bool,
    /// Credential/capability state for this connection.
    pub state: ConnState,
    /// Bits the peer is permitted to exercise once `state` is [`ConnState::Ready`].
    pub permission: Permission,
    /// The peer's analyzer id, known once capability handshake completes.
    pub identity: Option<u64>,
    /// The permission the transport handshake (e.g. a TLS certificate) established for this
    /// peer, independent of anything the peer later declares in `CONNECTION_CAPABILITY`. This is
    /// what gates a peer's declared `IDMEF_READ` capability: a relay subscription is only honored
    /// if the transport already trusts this peer to read events.
    pub local_permission: Permission,
    /// The analyzer identity the transport handshake established, if any. Used as a fallback
    /// when `CONNECTION_CAPABILITY` carries no `DATA` sub-tag of its own.
    pub local_identity: Option<u64>,
    reader: FrameReader,
    outbound: VecDeque<Arc<Frame>>,
    /// Handle to this connection's event queue, once allocated by the scheduler.
    pub queue: Option<QueueHandle>,
    /// Handle to this connection's reverse-relay registration, if it declared `IDMEF_READ`.
    pub relay: Option<RelayHandle>,
    closing: bool,
}

impl<S> SensorConnection<S>
where
    S: Read + Write + Source,
{
    /// Wraps a freshly accepted or dialed stream. `we_connected` records which side initiated.
    pub fn new(token: Token, stream: S, we_connected: bool) -> Self {
        Self {
            token,
            stream,
            we_connected,
            state: ConnState::Fresh,
            permission: Permission::empty(),
            identity: None,
            local_permission: Permission::empty(),
            local_identity: None,
            reader: FrameReader::new(),
            outbound: VecDeque::new(),
            queue: None,
            relay: None,
            closing: false,
        }
    }

    /// This connection's poll token.
    pub fn token(&self) -> Token {
        self.token
    }

    /// Direct access to the underlying transport, e.g. for the handshake negotiation step.
    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// True once [`Self::close`] has been called; the owning pool should deregister and drop it.
    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// Marks this connection for teardown: marks its reverse-relay registration dead and
    /// destroys its event queue via `ctx`, matching `close_connection_cb`'s handling of both in
    /// one place. Idempotent — the relay/queue teardown only runs on the first call, since a
    /// connection that may already be half torn-down must not double-destroy its queue.
    pub fn close(&mut self, ctx: &ServerContext) {
        if self.closing {
            return;
        }
        self.closing = true;

        if let Some(relay) = self.relay {
            ctx.relays.set_dead(relay);
        }
        if let Some(queue) = self.queue {
            ctx.scheduler.queue_destroy(queue);
        }
    }

    /// Attempts to decode one complete frame from the stream. Resumable across `WouldBlock`.
    pub fn try_read(&mut self) -> Result<ReadOutcome, crate::error::FrameError> {
        self.reader.read_message(&mut self.stream)
    }

    /// True if there is outbound data waiting, i.e. writability should be armed.
    pub fn has_outbound(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Attempts a non-blocking write of `frame` directly to the stream. On `WouldBlock`, the
    /// frame is pushed onto the outbound queue instead, matching
    /// `forward_message_to_analyzerid`'s fall back to `write_msg_list`.
    pub fn write_now_or_enqueue(&mut self, frame: Frame) -> io::Result<()> {
        match crate::message::write_message(&mut self.stream, &frame)? {
            WriteOutcome::Done => Ok(()),
            WriteOutcome::WouldBlock => {
                self.outbound.push_back(Arc::new(frame));
                Ok(())
            }
        }
    }

    /// Drains as much of the outbound queue as the stream will currently accept. Matches
    /// `write_connection_cb`: a message that would block stays at the head of the queue for the
    /// next writable event.
    pub fn flush_outbound(&mut self) -> io::Result<()> {
        while let Some(frame) = self.outbound.front() {
            match crate::message::write_message(&mut self.stream, frame)? {
                WriteOutcome::Done => {
                    self.outbound.pop_front();
                }
                WriteOutcome::WouldBlock => break,
            }
        }
        Ok(())
    }

    #[inline]
    fn event_set(&self) -> Interest {
        if self.has_outbound() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        }
    }

    /// Registers this connection's stream with `registry` under its token.
    pub fn register(&mut self, registry: &Registry) -> io::Result<()> {
        let interest = self.event_set();
        registry.register(&mut self.stream, self.token, interest)
    }

    /// Reregisters interest, e.g. after the outbound queue became empty or non-empty.
    pub fn reregister(&mut self, registry: &Registry) -> io::Result<()> {
        let interest = self.event_set();
        registry.reregister(&mut self.stream, self.token, interest)
    }

    /// Deregisters this connection's stream ahead of teardown.
    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut self.stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Tag;
    use crate::relay::InMemoryRelayRegistry;
    use crate::scheduler::RecordingScheduler;
    use std::io::Cursor;

    /// A `Read + Write + Source` stub backed by an in-memory buffer, for tests that don't need a
    /// real socket.
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
            self.0.flush()
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

    #[test]
    fn write_now_or_enqueue_writes_through_when_possible() {
        let mut conn = SensorConnection::new(Token(0), MemoryStream(Cursor::new(Vec::new())), true);
        conn.write_now_or_enqueue(Frame::new(Tag::Idmef)).unwrap();
        assert!(!conn.has_outbound());
    }

    fn test_ctx() -> (ServerContext, Arc<InMemoryRelayRegistry>, Arc<RecordingScheduler>) {
        let relays = Arc::new(InMemoryRelayRegistry::new());
        let scheduler = Arc::new(RecordingScheduler::new());
        let ctx = ServerContext::new(1, scheduler.clone(), relays.clone());
        (ctx, relays, scheduler)
    }

    #[test]
    fn close_is_idempotent() {
        let (ctx, _relays, _scheduler) = test_ctx();
        let mut conn = SensorConnection::new(Token(0), MemoryStream(Cursor::new(Vec::new())), false);
        conn.close(&ctx);
        conn.close(&ctx);
        assert!(conn.is_closing());
    }

    #[test]
    fn close_tears_down_relay_and_queue_exactly_once() {
        let (ctx, relays, scheduler) = test_ctx();
        let mut conn = SensorConnection::new(Token(0), MemoryStream(Cursor::new(Vec::new())), false);
        let relay = relays.add_receiver(42);
        conn.relay = Some(relay);
        conn.queue = Some(scheduler.queue_new());

        conn.close(&ctx);
        conn.close(&ctx);

        assert!(!relays.is_alive(relay));
        assert_eq!(scheduler.destroyed().len(), 1);
    }
}
