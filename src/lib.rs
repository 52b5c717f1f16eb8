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

//! Server-side core of a security event aggregation manager.
//!
//! Three tightly coupled subsystems make up this crate:
//!
//! - a non-blocking connection multiplexer ([`listener`], [`worker`], [`pool`]) accepting sensor
//!   and peer-manager connections and dispatching their readiness events to a worker pool;
//! - a hop-by-hop admin message [`router`], forwarding `OPTION_REQUEST`/`OPTION_REPLY` messages
//!   along an explicit route embedded in each message; and
//! - a direction-sensitive [`permission`]/[`capability`] state machine gating what a connection
//!   may do based on who initiated it.
//!
//! Durable event storage, the IDMEF decoder, and the TLS handshake are deliberately outside this
//! crate's scope; they're modeled as the [`scheduler::EventScheduler`], and
//! [`handshake::TransportHandshake`] trait boundaries, plus [`relay::ReverseRelayRegistry`] for
//! reverse-relay bookkeeping.

pub mod buffer;
pub mod capability;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod handshake;
pub mod listen;
pub mod listener;
pub mod message;
pub mod permission;
pub mod pool;
pub mod registry;
pub mod relay;
pub mod router;
pub mod scheduler;
pub mod worker;
