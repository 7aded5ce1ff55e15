use std::time::Instant;

use crate::message::Message;
use crate::node::PeerInfo;
use crate::sync::tests::{context, drain, established_peer, fresh_peer};
use crate::types::PeerState;
use containers::Bytes32;
use pretty_assertions::assert_eq;

#[test]
fn test_handshake_states_only_move_forward() {
    let (peer, _rx) = fresh_peer(1);
    assert_eq!(peer.state(), PeerState::Init);

    assert!(!peer.compare_and_set_state(PeerState::Init, PeerState::Establish));
    assert!(peer.compare_and_set_state(PeerState::Init, PeerState::Hand));
    assert!(!peer.compare_and_set_state(PeerState::Init, PeerState::Hand));
    assert!(peer.compare_and_set_state(PeerState::Hand, PeerState::Handshake));
    assert!(peer.compare_and_set_state(PeerState::Handshake, PeerState::Establish));
    assert!(peer.is_established());
    assert!(!peer.compare_and_set_state(PeerState::Establish, PeerState::Handshake));
}

#[test]
fn test_sync_flags_are_independent() {
    let (peer, _rx) = fresh_peer(1);
    peer.set_sync_headers(true);
    peer.set_sync_failed(true);
    peer.set_sync_headers(false);

    assert!(!peer.is_sync_headers());
    assert!(peer.is_sync_failed());
}

#[test]
fn test_version_info_updates_identity() {
    let (peer, _rx) = fresh_peer(0);
    peer.update_info(Instant::now(), 3, 1, 30338, 0xabcd, false, 77);

    assert_eq!(peer.id(), 0xabcd);
    assert_eq!(peer.version(), 3);
    assert_eq!(peer.services(), 1);
    assert_eq!(peer.port(), 30338);
    assert!(!peer.relay());
    assert_eq!(peer.height(), 77);

    peer.set_height(80);
    assert_eq!(peer.height(), 80);
}

#[tokio::test]
async fn test_close_releases_everything() {
    let (ctx, _ledger) = context();
    let (peer, mut rx) = established_peer(&ctx, 7, 10);

    let permit = ctx.window.acquire_block().await.unwrap();
    peer.store_flight_height(1, Bytes32([1; 32]), Some(permit));
    peer.add_requested_block(Bytes32([1; 32]), Instant::now());
    peer.cache_hash(Bytes32([2; 32]));
    peer.cache_inv_hash(Bytes32([3; 32]));
    peer.push_header_permit(ctx.window.acquire_header().await.unwrap(), Instant::now());
    assert_eq!(ctx.window.blocks_in_flight(), 1);
    assert_eq!(ctx.window.headers_in_flight(), 1);

    let mut closed = peer.closed_signal();
    peer.close();

    assert_eq!(peer.state(), PeerState::Inactivity);
    assert!(peer.flight_heights().is_empty());
    assert_eq!(peer.requested_block_count(), 0);
    assert!(!peer.exist_hash(&Bytes32([2; 32])));
    assert!(!peer.exist_inv_hash(&Bytes32([3; 32])));
    assert_eq!(peer.header_permits_held(), 0);
    assert_eq!(ctx.window.blocks_in_flight(), 0);
    assert_eq!(ctx.window.headers_in_flight(), 0);
    assert!(closed.has_changed().unwrap());
    assert!(*closed.borrow_and_update());

    assert!(peer.send(&Message::Verack).is_err());
    assert!(drain(&mut rx).is_empty());

    // Second close is a no-op.
    peer.close();
    assert_eq!(peer.state(), PeerState::Inactivity);
}

#[test]
fn test_send_queues_encoded_frames() {
    let (ctx, _ledger) = context();
    let (peer, mut rx) = established_peer(&ctx, 9, 0);
    peer.send(&Message::Ping(5)).unwrap();
    peer.send(&Message::Verack).unwrap();
    assert_eq!(drain(&mut rx), vec![Message::Ping(5), Message::Verack]);
}

#[tokio::test]
async fn test_release_header_permit_clears_request_time() {
    let (ctx, _ledger) = context();
    let (peer, _rx) = established_peer(&ctx, 4, 0);
    let at = Instant::now();
    peer.push_header_permit(ctx.window.acquire_header().await.unwrap(), at);
    assert_eq!(peer.header_requested_at(), Some(at));

    assert!(peer.release_header_permit());
    assert!(!peer.release_header_permit());
    assert_eq!(peer.header_requested_at(), None);
    assert_eq!(ctx.window.headers_in_flight(), 0);
}

#[test]
fn test_neighbor_set_tracks_established_heights() {
    let (ctx, _ledger) = context();
    let (_a, _rx_a) = established_peer(&ctx, 1, 10);
    let (_b, _rx_b) = established_peer(&ctx, 2, 30);
    let (pending, _rx_c) = fresh_peer(3);
    pending.update_info(Instant::now(), 0, 1, 20338, 3, true, 99);
    assert!(ctx.neighbors.add(pending.clone()));

    assert_eq!(ctx.neighbors.count(), 3);
    assert_eq!(ctx.neighbors.established_count(), 2);
    assert_eq!(ctx.neighbors.max_established_height(), Some(30));

    let (duplicate, _rx_d) = fresh_peer(2);
    duplicate.update_info(Instant::now(), 0, 1, 20338, 2, true, 0);
    assert!(!ctx.neighbors.add(duplicate.clone()));
    assert!(!ctx.neighbors.remove(&duplicate));
    assert!(ctx.neighbors.contains(2));

    assert!(ctx.neighbors.remove(&pending));
    assert_eq!(ctx.neighbors.count(), 2);
}
