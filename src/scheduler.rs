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

//! The event scheduler boundary (spec §6): the core only ever calls `queue_new`, `schedule`, and
//! `queue_destroy`. Persistence, decoding, and forwarding of events live entirely on the other
//! side of this trait.

use crate::message::Frame;

/// Opaque handle to a per-connection event queue. Scheduler implementations are free to give
/// this any meaning; the core treats it as an inert token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueHandle(pub u64);

/// External collaborator that owns durable storage/forwarding of IDMEF events.
pub trait EventScheduler: std::fmt::Debug + Send + Sync {
    /// Allocates a new queue for a client connection and returns its handle.
    fn queue_new(&self) -> QueueHandle;

    /// Schedules `msg` onto `handle`'s queue.
    fn schedule(&self, handle: QueueHandle, msg: Frame) -> std::io::Result<()>;

    /// Destroys `handle`, releasing any resources associated with it.
    fn queue_destroy(&self, handle: QueueHandle);
}

/// An [`EventScheduler`] for tests and examples: records scheduled messages in memory instead of
/// forwarding them anywhere.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    next_handle: std::sync::atomic::AtomicU64,
    scheduled: std::sync::Mutex<Vec<(QueueHandle, Frame)>>,
    destroyed: std::sync::Mutex<Vec<QueueHandle>>,
}

impl RecordingScheduler {
    /// Creates an empty recording scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all messages scheduled so far, in scheduling order.
    pub fn scheduled(&self) -> Vec<(QueueHandle, Frame)> {
        self.scheduled.lock().unwrap().clone()
    }

    /// Returns all handles that have been destroyed so far.
    pub fn destroyed(&self) -> Vec<QueueHandle> {
        self.destroyed.lock().unwrap().clone()
    }
}

impl EventScheduler for RecordingScheduler {
    fn queue_new(&self) -> QueueHandle {
        let id = self
            .next_handle
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        QueueHandle(id)
    }

    fn schedule(&self, handle: QueueHandle, msg: Frame) -> std::io::Result<()> {
        self.scheduled.lock().unwrap().push((handle, msg));
        Ok(())
    }

    fn queue_destroy(&self, handle: QueueHandle) {
        self.destroyed.lock().unwrap().push(handle);
    }
}
