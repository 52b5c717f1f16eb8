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

//! Workers drive a single connection's event to completion: decoding frames, dispatching them by
//! connection state and tag, and flushing the outbound queue. Each token's events are serialized
//! through the listener → worker handoff, so a connection is never touched by two workers at once.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use mio::{Token, Waker};
use tracing::{debug, warn};

use crate::capability;
use crate::connection::ConnState;
use crate::context::ServerContext;
use crate::error::FrameError;
use crate::message::{ReadOutcome, Tag};
use crate::permission::Permission;
use crate::pool::ConnectionEvent;
use crate::registry::ConnectionRegistry;
use crate::listen::AcceptedStream;
use crate::router;

/// Drains connection events handed off by the [`crate::listener::Listener`].
pub struct Worker {
    events: Receiver<ConnectionEvent>,
    inform_listener: Sender<Token>,
    listener_waker: Arc<Waker>,
    registry: Arc<ConnectionRegistry<AcceptedStream>>,
    ctx: ServerContext,
}

impl Worker {
    /// Builds a worker draining `events`, reporting completion on `inform_listener` and waking
    /// the listener via `listener_waker` so it performs the follow-up reregister/deregister.
    pub fn new(
        events: Receiver<ConnectionEvent>,
        inform_listener: Sender<Token>,
        listener_waker: Arc<Waker>,
        registry: Arc<ConnectionRegistry<AcceptedStream>>,
        ctx: ServerContext,
    ) -> Self {
        Self {
            events,
            inform_listener,
            listener_waker,
            registry,
            ctx,
        }
    }

    fn notify_listener(&self, token: Token) -> Result<(), ()> {
        self.inform_listener.send(token).map_err(|_| ())?;
        self.listener_waker.wake().map_err(|_| ())
    }

    /// Main loop: blocks until the channel disconnects, meaning the pool is shutting down.
    pub fn run(&mut self) {
        while let Ok(ev) = self.events.recv() {
            let token = ev.event.token();
            let mut conn = ev.connection.lock().unwrap();

            if ev.event.is_readable() {
                self.handle_readable(&mut conn);
            }

            if !conn.is_closing() && ev.event.is_writable() {
                if let Err(e) = conn.flush_outbound() {
                    warn!(error = %e, "write failed; closing connection");
                    conn.close(&self.ctx);
                }
            }

            drop(conn);
            if self.notify_listener(token).is_err() {
                return;
            }
        }
    }

    fn handle_readable(&self, conn: &mut crate::connection::SensorConnection<AcceptedStream>) {
        loop {
            match conn.try_read() {
                Ok(ReadOutcome::Complete(frame)) => {
                    if conn.state == ConnState::Fresh {
                        if let Err(e) = capability::process_first_message(conn, &frame, &self.ctx) {
                            warn!(error = %e, "capability handshake failed; closing connection");
                            conn.close(&self.ctx);
                            return;
                        }
                        continue;
                    }

                    self.dispatch_ready(conn, frame);
                    if conn.is_closing() {
                        return;
                    }
                }
                Ok(ReadOutcome::WouldBlock) => return,
                Ok(ReadOutcome::Eof) => {
                    debug!("peer closed connection");
                    conn.close(&self.ctx);
                    return;
                }
                Err(FrameError::Eof) => {
                    conn.close(&self.ctx);
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "frame decode failed; closing connection");
                    conn.close(&self.ctx);
                    return;
                }
            }
        }
    }

    fn dispatch_ready(
        &self,
        conn: &mut crate::connection::SensorConnection<AcceptedStream>,
        frame: crate::message::Frame,
    ) {
        match frame.tag {
            Tag::Idmef => {
                let required = Permission::required_for_idmef_emit(conn.we_connected);
                if !conn.permission.contains(required) {
                    warn!("peer sent IDMEF without matching credential; closing");
                    conn.close(&self.ctx);
                    return;
                }
                let queue = conn.queue.expect("Ready connection always has a queue");
                if let Err(e) = self.ctx.scheduler.schedule(queue, frame) {
                    warn!(error = %e, "failed to schedule IDMEF event");
                }
            }
            Tag::OptionRequest => {
                if let Err(e) = router::handle_request(frame, conn, &self.registry, &self.ctx) {
                    debug!(error = %e, "option request not delivered");
                }
            }
            Tag::OptionReply => {
                if let Err(e) = router::handle_reply(frame, &self.registry) {
                    debug!(error = %e, "option reply not delivered");
                }
            }
            Tag::ConnectionCapability => {
                warn!("CONNECTION_CAPABILITY resent after handshake; closing");
                conn.close(&self.ctx);
            }
        }
    }
}
