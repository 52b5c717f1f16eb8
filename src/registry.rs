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

//! The connection registry: every live connection, keyed by its slab slot (which doubles as its
//! `mio::Token`), with linear scan-by-analyzer-id for routing. Grounded on `sensor-server.c`'s
//! `sensors_cnx_list` plus `sensors_list_mutex`: traversal for routing, insertion, and removal all
//! happen under one lock, so a lookup can never race a concurrent close or a concurrent forward.

use std::sync::{Arc, Mutex};

use mio::Token;
use slab::Slab;

use crate::connection::SensorConnection;

/// A shared handle to one registered connection.
pub type ConnectionHandle<S> = Arc<Mutex<SensorConnection<S>>>;

/// Registry of every connection the manager currently holds open.
///
/// Sized for operator scale (tens to low thousands of sensors), not internet scale: routing by
/// analyzer id is a linear scan, which this codebase takes as an explicit, documented tradeoff
/// rather than an oversight.
#[derive(Debug, Default)]
pub struct ConnectionRegistry<S> {
    connections: Mutex<Slab<ConnectionHandle<S>>>,
}

impl<S> ConnectionRegistry<S> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(Slab::new()),
        }
    }

    /// Inserts a new connection, returning the `mio::Token` it should be registered under.
    pub fn insert(&self, conn: SensorConnection<S>) -> Token {
        let mut slab = self.connections.lock().unwrap();
        let key = slab.insert(Arc::new(Mutex::new(conn)));
        Token(key)
    }

    /// Inserts a connection built from its own slab-assigned token, mirroring `Slab::vacant_entry`
    /// so the connection can carry the exact `mio::Token` it will be polled under from the start.
    pub fn insert_with(&self, build: impl FnOnce(Token) -> SensorConnection<S>) -> Token {
        let mut slab = self.connections.lock().unwrap();
        let entry = slab.vacant_entry();
        let token = Token(entry.key());
        entry.insert(Arc::new(Mutex::new(build(token))));
        token
    }

    /// Removes and returns the connection at `token`, if still present.
    pub fn remove(&self, token: Token) -> Option<ConnectionHandle<S>> {
        let mut slab = self.connections.lock().unwrap();
        if slab.contains(token.0) {
            Some(slab.remove(token.0))
        } else {
            None
        }
    }

    /// Looks up a connection by its token without removing it.
    pub fn get(&self, token: Token) -> Option<ConnectionHandle<S>> {
        let slab = self.connections.lock().unwrap();
        slab.get(token.0).cloned()
    }

    /// Number of currently registered connections.
    pub fn len(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    /// True if no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Finds the connection whose declared identity matches `analyzer_id`, then invokes `f` on it
    /// while still holding the registry lock.
    ///
    /// This is the single critical section backing forwarding: lookup, the recipient permission
    /// check, the non-blocking write attempt, and the fall back to the outbound queue on
    /// `WouldBlock` all happen inside `f`, so a concurrent close of the target connection cannot
    /// be observed halfway through.
    pub fn with_connection_by_identity<R>(
        &self,
        analyzer_id: u64,
        f: impl FnOnce(&mut SensorConnection<S>) -> R,
    ) -> Option<R> {
        let slab = self.connections.lock().unwrap();
        for (_, handle) in slab.iter() {
            let mut conn = handle.lock().unwrap();
            if conn.identity == Some(analyzer_id) {
                return Some(f(&mut conn));
            }
        }
        None
    }
}
