use std::sync::Arc;

use crate::actor::{NodeActor, RegisterError};
use crate::handler::MessageHandler;
use crate::ledger::Ledger;
use crate::message::{InvPayload, LocatorPayload, Message, VersionPayload};
use crate::node::{NodeContext, PeerInfo};
use crate::sync::tests::{build_chain, context, drain, established_peer, fresh_peer};
use crate::sync::{SyncCoordinator, SyncState};
use crate::types::{InventoryType, PeerState};
use containers::{Block, Bytes32, Transaction};
use pretty_assertions::assert_eq;

fn handler(ctx: &Arc<NodeContext>) -> MessageHandler {
    let (actor, handle) = NodeActor::new(ctx.clone());
    tokio::spawn(actor.run());
    MessageHandler::new(ctx.clone(), handle, SyncCoordinator::new(ctx.clone()))
}

fn version(nonce: u64, start_height: u64) -> Message {
    Message::Version(VersionPayload {
        version: 0,
        services: 1,
        timestamp: 1_600_000_000,
        port: 20338,
        nonce,
        start_height,
        relay: true,
    })
}

#[tokio::test]
async fn test_inbound_handshake_reaches_establish() {
    let (ctx, _ledger) = context();
    let handler = handler(&ctx);
    let (peer, mut rx) = fresh_peer(1);

    handler.handle(&peer, version(0x77, 4)).await.unwrap();
    assert_eq!(peer.state(), PeerState::Handshake);
    assert_eq!(peer.id(), 0x77);
    assert_eq!(peer.height(), 4);
    assert!(ctx.neighbors.contains(0x77));

    let sent = drain(&mut rx);
    assert_eq!(sent.len(), 2);
    assert!(matches!(&sent[0], Message::Version(v) if v.nonce == ctx.local.id()));
    assert_eq!(sent[1], Message::Verack);

    handler.handle(&peer, Message::Verack).await.unwrap();
    assert!(peer.is_established());
    assert_eq!(ctx.neighbors.established_count(), 1);
}

#[tokio::test]
async fn test_outbound_handshake_only_acknowledges() {
    let (ctx, _ledger) = context();
    let handler = handler(&ctx);
    let (peer, mut rx) = fresh_peer(1);
    assert!(
        handler
            .node()
            .transition(&peer, PeerState::Init, PeerState::Hand)
            .await
    );

    handler.handle(&peer, version(0x78, 0)).await.unwrap();
    assert_eq!(drain(&mut rx), vec![Message::Verack]);
    assert_eq!(peer.state(), PeerState::Handshake);
}

#[tokio::test]
async fn test_self_connection_is_rejected() {
    let (ctx, _ledger) = context();
    let handler = handler(&ctx);
    let (peer, _rx) = fresh_peer(1);

    assert!(handler.handle(&peer, version(ctx.local.id(), 0)).await.is_err());
    assert_eq!(ctx.neighbors.count(), 0);
}

#[tokio::test]
async fn test_duplicate_node_id_is_rejected() {
    let (ctx, _ledger) = context();
    let handler = handler(&ctx);
    let (_existing, _rx_existing) = established_peer(&ctx, 0x55, 0);
    let (peer, _rx) = fresh_peer(2);

    let err = handler.handle(&peer, version(0x55, 0)).await.unwrap_err();
    assert_eq!(
        err.downcast_ref::<RegisterError>(),
        Some(&RegisterError::Duplicate(0x55))
    );
    assert_eq!(ctx.neighbors.count(), 1);
}

#[tokio::test]
async fn test_messages_before_handshake_are_dropped() {
    let (ctx, _ledger) = context();
    let handler = handler(&ctx);
    let (peer, mut rx) = fresh_peer(1);

    handler.handle(&peer, Message::Ping(10)).await.unwrap();
    assert!(drain(&mut rx).is_empty());
    assert_eq!(peer.height(), 0);
}

#[tokio::test]
async fn test_ping_updates_height_and_answers_pong() {
    let (ctx, _ledger) = context();
    let handler = handler(&ctx);
    let (peer, mut rx) = established_peer(&ctx, 1, 0);

    handler.handle(&peer, Message::Ping(12)).await.unwrap();
    assert_eq!(peer.height(), 12);
    assert_eq!(drain(&mut rx), vec![Message::Pong(0)]);

    handler.handle(&peer, Message::Pong(15)).await.unwrap();
    assert_eq!(peer.height(), 15);
}

#[tokio::test]
async fn test_serves_headers_inventory_and_blocks() {
    let (ctx, ledger) = context();
    let blocks = build_chain(3);
    for block in &blocks {
        ledger.add_block(block.clone()).unwrap();
    }
    let handler = handler(&ctx);
    let (peer, mut rx) = established_peer(&ctx, 1, 0);
    let from_genesis = LocatorPayload {
        locator: vec![Block::genesis().hash()],
        hash_stop: Bytes32::zero(),
    };

    handler
        .handle(&peer, Message::GetHeaders(from_genesis.clone()))
        .await
        .unwrap();
    let headers = blocks.iter().map(|b| b.header.clone()).collect();
    assert_eq!(drain(&mut rx), vec![Message::Headers(headers)]);

    handler.handle(&peer, Message::GetBlocks(from_genesis)).await.unwrap();
    let hashes = blocks.iter().map(|b| b.hash()).collect();
    assert_eq!(
        drain(&mut rx),
        vec![Message::Inv(InvPayload::new(InventoryType::Block, hashes))]
    );

    let missing = Bytes32([0xee; 32]);
    let request = InvPayload::new(InventoryType::Block, vec![blocks[1].hash(), missing]);
    handler.handle(&peer, Message::GetData(request)).await.unwrap();
    assert_eq!(
        drain(&mut rx),
        vec![Message::Block(Box::new(blocks[1].clone())), Message::NotFound(missing)]
    );
}

#[tokio::test]
async fn test_transactions_are_relayed_once() {
    let (ctx, _ledger) = context();
    let handler = handler(&ctx);
    let (origin, mut rx_origin) = established_peer(&ctx, 1, 0);
    let (_other, mut rx_other) = established_peer(&ctx, 2, 0);
    let tx = Transaction::coinbase(3, 3, Vec::new());

    handler
        .handle(&origin, Message::Tx(Box::new(tx.clone())))
        .await
        .unwrap();
    assert!(drain(&mut rx_origin).is_empty());
    assert_eq!(drain(&mut rx_other), vec![Message::Tx(Box::new(tx.clone()))]);

    handler.handle(&origin, Message::Tx(Box::new(tx))).await.unwrap();
    assert!(drain(&mut rx_other).is_empty());
}

#[tokio::test]
async fn test_disconnecting_sync_peer_resets_sync() {
    let (ctx, _ledger) = context();
    let handler = handler(&ctx);
    let (peer, _rx) = established_peer(&ctx, 1, 10);
    assert!(ctx.begin_sync(SyncState::BlocksFirst, 1, None));

    handler.node().disconnect(&peer, "test");
    // Round-trip through the actor so the disconnect has been applied.
    let (probe, _rx_probe) = fresh_peer(9);
    handler
        .node()
        .transition(&probe, PeerState::Init, PeerState::Hand)
        .await;

    assert_eq!(peer.state(), PeerState::Inactivity);
    assert!(!ctx.neighbors.contains(1));
    assert_eq!(ctx.sync_status().state, SyncState::Idle);
    assert_eq!(ctx.sync_status().sync_peer, None);
}
