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

//! Property tests for the hop-route arithmetic in `router::resolve_hop`, checked against
//! arbitrary routes rather than the fixed examples in the unit tests.

use proptest::prelude::*;
use relay_core::message::{Frame, SubTag, Tag};
use relay_core::router::{resolve_hop, Direction, RouteDecision};

fn route_frame(tag: Tag, ids: &[u64], hop: u32) -> Frame {
    let mut id_bytes = Vec::with_capacity(ids.len() * 8);
    for id in ids {
        id_bytes.extend_from_slice(&id.to_be_bytes());
    }
    Frame::new(tag)
        .push(SubTag::TargetId, id_bytes)
        .push(SubTag::Hop, hop.to_be_bytes().to_vec())
}

proptest! {
    /// A request's resolved hop is always either the unique `Local` sentinel (`new_hop == N`)
    /// or a `Forward` whose `updated_hop` is a valid index into the route.
    #[test]
    fn request_resolution_never_escapes_route_bounds(
        ids in prop::collection::vec(any::<u64>(), 2..8),
        hop in 0u32..16,
    ) {
        let n = ids.len() as u32;
        let mut frame = route_frame(Tag::OptionRequest, &ids, hop);
        match resolve_hop(&mut frame, Direction::Request) {
            Ok(RouteDecision::Local { out_hop }) => {
                prop_assert_eq!(hop + 1, n);
                prop_assert_eq!(out_hop, n - 1);
            }
            Ok(RouteDecision::Forward { target, updated_hop }) => {
                prop_assert_eq!(hop + 1, updated_hop);
                prop_assert!(updated_hop < n);
                prop_assert_eq!(target, ids[updated_hop as usize]);
            }
            Err(_) => {
                prop_assert!(hop + 1 > n || hop == u32::MAX);
            }
        }
    }

    /// A reply never resolves to `Local`: it either forwards one step back towards the
    /// requester, or the hop underflows/overflows and is rejected.
    #[test]
    fn reply_resolution_never_yields_local(
        ids in prop::collection::vec(any::<u64>(), 2..8),
        hop in 0u32..16,
    ) {
        let n = ids.len() as u32;
        let mut frame = route_frame(Tag::OptionReply, &ids, hop);
        match resolve_hop(&mut frame, Direction::Reply) {
            Ok(RouteDecision::Local { .. }) => prop_assert!(false, "reply resolved to Local"),
            Ok(RouteDecision::Forward { target, updated_hop }) => {
                prop_assert!(hop >= 1);
                prop_assert_eq!(updated_hop, hop - 1);
                prop_assert!(updated_hop < n);
                prop_assert_eq!(target, ids[updated_hop as usize]);
            }
            Err(_) => prop_assert!(hop == 0 || hop > n),
        }
    }

    /// Resolving a request's hop never panics and never reports an out-of-range id, no
    /// matter what garbage hop value a malicious peer sends.
    #[test]
    fn request_resolution_is_total(
        ids in prop::collection::vec(any::<u64>(), 2..8),
        hop in any::<u32>(),
    ) {
        let mut frame = route_frame(Tag::OptionRequest, &ids, hop);
        let _ = resolve_hop(&mut frame, Direction::Request);
    }
}
