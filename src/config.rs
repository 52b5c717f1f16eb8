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

//! Plain configuration for a running manager. No CLI parsing here; a binary built on top of this
//! crate is expected to construct this directly or load it from its own configuration format.

use std::path::PathBuf;

/// Where the manager listens for incoming connections.
#[derive(Debug, Clone)]
pub enum ListenAddr {
    /// A TCP address.
    Tcp(std::net::SocketAddr),
    /// A UNIX domain socket path.
    Unix(PathBuf),
}

/// Top-level configuration for a manager instance.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Where to listen for incoming sensor/admin connections.
    pub listen: ListenAddr,
    /// Number of worker threads draining the connection event channel.
    pub worker_count: usize,
    /// Bound on the number of pending events buffered between the listener and its workers,
    /// before `workers.send` would start blocking the accept thread.
    pub event_channel_capacity: usize,
    /// This manager's own analyzer id, used to recognize "we are the target" on a hop route.
    pub local_analyzer_id: u64,
}

impl ManagerConfig {
    /// A configuration listening on `addr` with a sensible worker count for the host.
    pub fn tcp(addr: std::net::SocketAddr, local_analyzer_id: u64) -> Self {
        Self {
            listen: ListenAddr::Tcp(addr),
            worker_count: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            event_channel_capacity: 4096,
            local_analyzer_id,
        }
    }
}
