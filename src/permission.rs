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

//! Credential bits carried by a connection and checked direction-sensitively by the router and
//! the sensor server read callback.

use bitflags::bitflags;

bitflags! {
    /// Permission bits a peer's credential may carry. Also doubles as the capability mask
    /// declared on the wire in a `CONNECTION_CAPABILITY` message.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Permission: u8 {
        /// Peer may send us IDMEF events (we read from them), or we may pull events from them.
        const IDMEF_READ = 0b0001;
        /// Peer may accept IDMEF events written to them.
        const IDMEF_WRITE = 0b0010;
        /// Peer may accept admin (option) requests we issue.
        const ADMIN_READ = 0b0100;
        /// Peer may issue admin (option) requests to us.
        const ADMIN_WRITE = 0b1000;
    }
}

impl Permission {
    /// Permission required to emit an `IDMEF` message, given connection direction.
    ///
    /// If we initiated the connection, we need read permission (we're pulling events from an
    /// upstream analyzer); if the peer connected to us, they need write permission.
    pub fn required_for_idmef_emit(we_connected: bool) -> Permission {
        if we_connected {
            Permission::IDMEF_READ
        } else {
            Permission::IDMEF_WRITE
        }
    }

    /// Permission required of the *emitter* of an admin request, given connection direction.
    pub fn required_for_request_emit(we_connected: bool) -> Permission {
        if we_connected {
            Permission::ADMIN_READ
        } else {
            Permission::ADMIN_WRITE
        }
    }

    /// Permission required of the *recipient* of a forwarded admin request, given the
    /// recipient connection's direction.
    pub fn required_for_request_recipient(we_connected: bool) -> Permission {
        if we_connected {
            Permission::ADMIN_WRITE
        } else {
            Permission::ADMIN_READ
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idmef_emit_direction_sensitive() {
        assert_eq!(
            Permission::required_for_idmef_emit(true),
            Permission::IDMEF_READ
        );
        assert_eq!(
            Permission::required_for_idmef_emit(false),
            Permission::IDMEF_WRITE
        );
    }

    #[test]
    fn request_recipient_direction_sensitive() {
        assert_eq!(
            Permission::required_for_request_recipient(true),
            Permission::ADMIN_WRITE
        );
        assert_eq!(
            Permission::required_for_request_recipient(false),
            Permission::ADMIN_READ
        );
    }
}
