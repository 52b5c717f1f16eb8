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

//! The accept thread: owns the `mio::Poll` instance, accepts new connections, and dispatches
//! readable/writable events to the worker pool over a `crossbeam_channel`.

use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use mio::{Events, Interest, Poll, Token, Waker};
use tracing::{debug, error, warn};

use crate::handshake::{PlaintextHandshake, TransportHandshake};
use crate::listen::{AcceptedStream, ListenEndpoint, PeerAddr};
use crate::pool::ConnectionEvent;
use crate::registry::ConnectionRegistry;
use crate::connection::SensorConnection;

pub(crate) const LISTEN_TOKEN: Token = Token(usize::MAX);
pub(crate) const WAKE_TOKEN: Token = Token(usize::MAX - 1);

/// Owns the listening socket and the poll loop. Connections live in the shared
/// [`ConnectionRegistry`]; this type only drives accept, dispatch, and post-event
/// reregister/deregister.
pub struct Listener<H = PlaintextHandshake> {
    inner: ListenEndpoint,
    poll: Poll,
    registry: Arc<ConnectionRegistry<AcceptedStream>>,
    workers: Sender<ConnectionEvent>,
    completions: Receiver<Token>,
    waker: Arc<Waker>,
    shutdown: Arc<AtomicBool>,
    num_events: usize,
    handshake: H,
}

impl<H> Listener<H>
where
    H: TransportHandshake,
{
    /// Builds a new listener bound to `endpoint`, dispatching events to `workers` and draining
    /// completion/rearm requests from `completions`. Every accepted stream is run through
    /// `handshake` before it is registered for polling.
    pub fn new(
        mut endpoint: ListenEndpoint,
        registry: Arc<ConnectionRegistry<AcceptedStream>>,
        workers: Sender<ConnectionEvent>,
        completions: Receiver<Token>,
        handshake: H,
    ) -> std::io::Result<Self> {
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut endpoint, LISTEN_TOKEN, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);

        Ok(Self {
            inner: endpoint,
            poll,
            registry,
            workers,
            completions,
            waker,
            shutdown: Arc::new(AtomicBool::new(false)),
            num_events: 1024,
            handshake,
        })
    }

    /// A waker workers use to ask the listener to reregister or drop a connection. This is the
    /// only way a foreign thread touches `mio::Registry` state belonging to this listener.
    pub fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    /// A flag the pool sets before waking the listener to ask it to stop.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    fn accept(&mut self) -> std::io::Result<()> {
        loop {
            match self.inner.accept() {
                Ok((stream, addr)) => {
                    if let PeerAddr::Tcp(a) = addr {
                        debug!(peer = %a, "accepted connection");
                    }

                    let token = self
                        .registry
                        .insert_with(|token| SensorConnection::new(token, stream, false));

                    if let Some(handle) = self.registry.get(token) {
                        let mut locked = handle.lock().unwrap();

                        match self.handshake.negotiate(locked.stream_mut()) {
                            Ok((permission, identity)) => {
                                locked.local_permission = permission;
                                locked.local_identity = identity;
                            }
                            Err(e) => {
                                warn!(error = %e, "transport handshake failed; dropping connection");
                                drop(locked);
                                self.registry.remove(token);
                                continue;
                            }
                        }

                        if let Err(e) = locked.register(self.poll.registry()) {
                            warn!(error = %e, "failed to register accepted connection");
                            drop(locked);
                            self.registry.remove(token);
                        }
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    fn dispatch(&mut self, event: &mio::event::Event) {
        if let Some(connection) = self.registry.get(event.token()) {
            if self
                .workers
                .send(ConnectionEvent {
                    connection,
                    event: event.clone(),
                })
                .is_err()
            {
                error!("all workers have exited; dropping event");
            }
        }
    }

    fn complete(&mut self, token: Token) {
        let mut drop_it = false;
        if let Some(connection) = self.registry.get(token) {
            let mut locked = connection.lock().unwrap();
            if locked.is_closing() {
                if let Err(e) = locked.deregister(self.poll.registry()) {
                    warn!(error = %e, "error deregistering closed connection");
                }
                drop_it = true;
            } else if let Err(e) = locked.reregister(self.poll.registry()) {
                warn!(error = %e, "error reregistering connection");
            }
        }

        if drop_it {
            self.registry.remove(token);
        }
    }

    /// Runs the accept/dispatch loop until the worker channel disconnects or poll fails.
    pub fn run(&mut self) {
        let mut events = Events::with_capacity(self.num_events);

        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return;
            }

            if let Err(e) = self.poll.poll(&mut events, None) {
                error!(error = %e, "poll failed; stopping listener");
                return;
            }

            for event in events.iter() {
                match event.token() {
                    LISTEN_TOKEN => {
                        if let Err(e) = self.accept() {
                            error!(error = %e, "accept failed; stopping listener");
                            return;
                        }
                    }
                    WAKE_TOKEN => loop {
                        match self.completions.try_recv() {
                            Ok(token) => self.complete(token),
                            Err(TryRecvError::Empty) => break,
                            Err(TryRecvError::Disconnected) => return,
                        }
                    },
                    _ => self.dispatch(event),
                }
            }
        }
    }
}
