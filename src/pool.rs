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

//! Wires together the listener thread and the worker pool: a `Listener` plus a fixed set of
//! `Worker` threads sharing one connection registry and a pair of `crossbeam_channel`s.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender};
use mio::Token;

use crate::config::ManagerConfig;
use crate::connection::SensorConnection;
use crate::context::ServerContext;
use crate::handshake::TransportHandshake;
use crate::listen::AcceptedStream;
use crate::listener::Listener;
use crate::registry::ConnectionRegistry;
use crate::worker::Worker;

/// One dispatched readiness event, paired with the connection it applies to.
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    /// The connection the event applies to.
    pub connection: std::sync::Arc<std::sync::Mutex<SensorConnection<AcceptedStream>>>,
    /// The raw readiness event from `mio`.
    pub event: mio::event::Event,
}

/// A running manager: one accept thread plus a fixed pool of worker threads, all sharing one
/// [`ConnectionRegistry`].
pub struct ManagerPool {
    registry: Arc<ConnectionRegistry<AcceptedStream>>,
    listener_thread: Option<JoinHandle<()>>,
    worker_threads: Vec<JoinHandle<()>>,
    event_sender: Option<Sender<ConnectionEvent>>,
    listener_waker: Arc<mio::Waker>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
}

impl ManagerPool {
    /// Starts the pool: binds the endpoint described in `config`, spawns the accept thread and
    /// `config.worker_count` worker threads, and returns a handle to both. Every accepted
    /// connection is run through `handshake` before it joins the registry.
    pub fn start<H>(
        config: &ManagerConfig,
        endpoint: crate::listen::ListenEndpoint,
        ctx: ServerContext,
        handshake: H,
    ) -> std::io::Result<Self>
    where
        H: TransportHandshake + 'static,
    {
        let registry = Arc::new(ConnectionRegistry::new());
        let (event_tx, event_rx) = bounded::<ConnectionEvent>(config.event_channel_capacity);
        let (completion_tx, completion_rx) = bounded::<Token>(config.event_channel_capacity);

        let mut listener =
            Listener::new(endpoint, registry.clone(), event_tx.clone(), completion_rx, handshake)?;
        let waker = listener.waker();
        let shutdown = listener.shutdown_flag();

        let listener_thread = std::thread::Builder::new()
            .name("relay-core-listener".into())
            .spawn(move || listener.run())
            .expect("failed to spawn listener thread");

        let worker_threads = (0..config.worker_count)
            .map(|idx| {
                let mut worker = Worker::new(
                    event_rx.clone(),
                    completion_tx.clone(),
                    waker.clone(),
                    registry.clone(),
                    ctx.clone(),
                );
                std::thread::Builder::new()
                    .name(format!("relay-core-worker-{idx}"))
                    .spawn(move || worker.run())
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Ok(Self {
            registry,
            listener_thread: Some(listener_thread),
            worker_threads,
            event_sender: Some(event_tx),
            listener_waker: waker,
            shutdown,
        })
    }

    /// The shared connection registry, e.g. for metrics or an admin inspection surface.
    pub fn registry(&self) -> &Arc<ConnectionRegistry<AcceptedStream>> {
        &self.registry
    }

    /// Stops the pool: signals the listener to return from its poll loop, joins it (dropping its
    /// internal event sender), then drops this pool's own sender so the worker threads' channel
    /// disconnects and their `recv()` loops exit, then joins them.
    pub fn stop(mut self) {
        self.shutdown.store(true, std::sync::atomic::Ordering::Release);
        let _ = self.listener_waker.wake();

        if let Some(handle) = self.listener_thread.take() {
            let _ = handle.join();
        }

        drop(self.event_sender.take());

        for handle in self.worker_threads.drain(..) {
            let _ = handle.join();
        }
    }
}
