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

//! The shared, cheaply-cloned handle to the manager's external collaborators: the event
//! scheduler and the reverse-relay registry. Every worker and the router hold one of these.

use std::sync::Arc;

use crate::relay::ReverseRelayRegistry;
use crate::scheduler::EventScheduler;

/// Shared collaborators and identity the core needs but does not own the implementation of.
#[derive(Debug, Clone)]
pub struct ServerContext {
    /// This manager's own analyzer id, used to recognize "we are the target" on a hop route.
    pub local_analyzer_id: u64,
    /// Where decoded IDMEF events and admin messages addressed to us get scheduled.
    pub scheduler: Arc<dyn EventScheduler>,
    /// Where reverse-relay (pull-mode) registrations are tracked.
    pub relays: Arc<dyn ReverseRelayRegistry>,
}

impl ServerContext {
    /// Builds a new context from its collaborators.
    pub fn new(
        local_analyzer_id: u64,
        scheduler: Arc<dyn EventScheduler>,
        relays: Arc<dyn ReverseRelayRegistry>,
    ) -> Self {
        Self {
            local_analyzer_id,
            scheduler,
            relays,
        }
    }
}
