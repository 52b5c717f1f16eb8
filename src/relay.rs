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

//! The reverse-relay boundary: bookkeeping for analyzers that pull IDMEF events from us instead
//! of pushing them, grounded on the original `handle_declare_parent_relay`. A connection that
//! declares `IDMEF_READ` during capability handshake is registered here so the scheduler can find
//! it again under its analyzer id, even across reconnects.

use std::collections::HashMap;
use std::sync::Mutex;

/// Opaque handle to a reverse-relay registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelayHandle(pub u64);

/// External collaborator tracking which analyzers are registered as reverse relays.
pub trait ReverseRelayRegistry: std::fmt::Debug + Send + Sync {
    /// Finds an existing relay registration for `analyzer_id`, if any.
    fn search_receiver(&self, analyzer_id: u64) -> Option<RelayHandle>;

    /// Registers a new relay for `analyzer_id`, returning its handle.
    fn add_receiver(&self, analyzer_id: u64) -> RelayHandle;

    /// Marks `relay` as alive, e.g. after a reconnect rebinds it to a fresh connection.
    fn set_receiver_alive(&self, relay: RelayHandle);

    /// Marks `relay` as dead, e.g. when its owning connection closes.
    fn set_dead(&self, relay: RelayHandle);
}

/// A [`ReverseRelayRegistry`] for tests and examples: tracks liveness in memory, keyed by
/// analyzer id.
#[derive(Debug, Default)]
pub struct InMemoryRelayRegistry {
    next_handle: std::sync::atomic::AtomicU64,
    by_analyzer: Mutex<HashMap<u64, RelayHandle>>,
    alive: Mutex<HashMap<RelayHandle, bool>>,
}

impl InMemoryRelayRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `relay` is currently marked alive.
    pub fn is_alive(&self, relay: RelayHandle) -> bool {
        self.alive.lock().unwrap().get(&relay).copied().unwrap_or(false)
    }
}

impl ReverseRelayRegistry for InMemoryRelayRegistry {
    fn search_receiver(&self, analyzer_id: u64) -> Option<RelayHandle> {
        self.by_analyzer.lock().unwrap().get(&analyzer_id).copied()
    }

    fn add_receiver(&self, analyzer_id: u64) -> RelayHandle {
        let id = self
            .next_handle
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let handle = RelayHandle(id);
        self.by_analyzer.lock().unwrap().insert(analyzer_id, handle);
        self.alive.lock().unwrap().insert(handle, true);
        handle
    }

    fn set_receiver_alive(&self, relay: RelayHandle) {
        self.alive.lock().unwrap().insert(relay, true);
    }

    fn set_dead(&self, relay: RelayHandle) {
        self.alive.lock().unwrap().insert(relay, false);
    }
}
