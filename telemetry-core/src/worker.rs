// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The worker loop, spec §4.7: a single cooperative task that drains the RX
//! ring, pumps the router's queues, and paces the time-sync client.

use crate::clock::MonotonicClock;
use crate::config;
use crate::fragment;
use crate::reassembly::{FeedResult, ReassemblyTable};
use crate::ring::RxConsumer;
use crate::router::Router;
use crate::subscriber::SubscriberRegistry;
use crate::timesync::TimeSyncClient;

/// One pass of `drain_can_rx_ring_into_reassembly_and_subscribers` (spec
/// §4.7). Raw (non-fragment) frames go straight to subscribers; fragments
/// are fed to the reassembly table, which may complete a message.
pub fn drain_rx<const N: usize, const SLOTS: usize>(
    ring: &mut RxConsumer<'_, N>,
    reassembly: &mut ReassemblyTable<SLOTS>,
    subscribers: &SubscriberRegistry<'_, { config::SUBSCRIBER_CAPACITY }>,
    now_ms: u64,
) {
    reassembly.sweep_stale(now_ms);
    while let Some(slot) = ring.pop() {
        let bytes = slot.as_bytes();
        if !fragment::is_fragment(bytes) {
            subscribers.notify(slot.std_id, bytes);
            continue;
        }
        let Ok(header) = fragment::FragmentHeader::decode(&bytes[..config::FRAGMENT_HEADER_LEN]) else {
            continue;
        };
        let payload = &bytes[config::FRAGMENT_HEADER_LEN..];
        if let FeedResult::Delivered(msg) = reassembly.feed(slot.std_id, &header, payload, now_ms) {
            subscribers.notify(slot.std_id, msg);
        }
    }
}

/// Issues a time-sync request if `config::SYNC_PERIOD_MS` has elapsed since
/// the last one, transmitting it to the reserved `ENDPOINT_TIME_SYNC` side.
/// Returns the (possibly unchanged) `last_sync_ms`.
pub fn maybe_issue_sync_request<C: MonotonicClock>(
    client: &TimeSyncClient,
    clock: &C,
    last_sync_ms: u64,
    send_request: impl FnOnce(crate::timesync::SyncRequest),
) -> u64 {
    let now = clock.now_ms();
    if now.saturating_sub(last_sync_ms) >= config::SYNC_PERIOD_MS {
        send_request(client.build_request(now));
        now
    } else {
        last_sync_ms
    }
}

/// One full iteration of the worker loop body (spec §4.7), parameterized so
/// tests can drive it without a real RTOS tick.
pub fn run_once<const N: usize, const SLOTS: usize, C: MonotonicClock>(
    ring: &mut RxConsumer<'_, N>,
    reassembly: &mut ReassemblyTable<SLOTS>,
    subscribers: &SubscriberRegistry<'_, { config::SUBSCRIBER_CAPACITY }>,
    router: &mut Router<'_, C>,
    clock: &C,
    sync_client: &TimeSyncClient,
    last_sync_ms: &mut u64,
    send_sync_request: impl FnOnce(crate::timesync::SyncRequest),
) {
    let now = clock.now_ms();
    drain_rx(ring, reassembly, subscribers, now);
    router.process_all_queues_with_timeout(5, || clock.now_ms());
    let now = clock.now_ms();
    drain_rx(ring, reassembly, subscribers, now);
    *last_sync_ms = maybe_issue_sync_request(sync_client, clock, *last_sync_ms, send_sync_request);
}
