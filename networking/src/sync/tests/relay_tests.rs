use std::time::Instant;

use crate::error::RelayError;
use crate::message::{InvPayload, Message};
use crate::relay::{RelayMessage, relay, relay_message, xmit, xmit_message};
use crate::sync::SyncState;
use crate::sync::tests::{context, drain, established_peer, fresh_peer};
use crate::types::InventoryType;
use containers::{Bytes32, Transaction};
use pretty_assertions::assert_eq;

#[test]
fn test_block_announcement_skips_origin_and_peers_that_have_it() {
    let (ctx, _ledger) = context();
    let (_a, mut rx_a) = established_peer(&ctx, 0xa, 0);
    let (b, mut rx_b) = established_peer(&ctx, 0xb, 0);
    let (_c, mut rx_c) = established_peer(&ctx, 0xc, 0);

    let hash = Bytes32([0x42; 32]);
    b.cache_hash(hash);

    let sent = relay(&ctx, Some(0xa), &RelayMessage::BlockHash(hash));
    assert_eq!(sent, 1);
    assert!(drain(&mut rx_a).is_empty());
    assert!(drain(&mut rx_b).is_empty());
    assert_eq!(
        drain(&mut rx_c),
        vec![Message::Inv(InvPayload::single(InventoryType::Block, hash))]
    );

    // C now holds the hash, so a second announcement goes nowhere.
    assert_eq!(relay(&ctx, Some(0xa), &RelayMessage::BlockHash(hash)), 0);
}

#[test]
fn test_transactions_ignore_the_hash_cache() {
    let (ctx, _ledger) = context();
    let (a, mut rx_a) = established_peer(&ctx, 0xa, 0);
    let (_b, mut rx_b) = established_peer(&ctx, 0xb, 0);

    let tx = Transaction::coinbase(1, 9, Vec::new());
    a.cache_hash(tx.hash());

    assert_eq!(relay(&ctx, None, &RelayMessage::Transaction(tx.clone())), 2);
    assert_eq!(drain(&mut rx_a), vec![Message::Tx(Box::new(tx.clone()))]);
    assert_eq!(drain(&mut rx_b), vec![Message::Tx(Box::new(tx))]);
}

#[test]
fn test_relay_suspended_during_header_sync() {
    let (ctx, _ledger) = context();
    let (_a, mut rx_a) = established_peer(&ctx, 0xa, 0);
    assert!(ctx.begin_sync(SyncState::HeadersFirst, 0xa, None));

    assert_eq!(relay(&ctx, None, &RelayMessage::BlockHash(Bytes32([1; 32]))), 0);
    assert!(drain(&mut rx_a).is_empty());
}

#[test]
fn test_relay_skips_non_relaying_and_unestablished_peers() {
    let (ctx, _ledger) = context();
    let (quiet, mut rx_quiet) = established_peer(&ctx, 0xa, 0);
    quiet.update_info(Instant::now(), 0, 1, 20338, 0xa, false, 0);
    let (pending, mut rx_pending) = fresh_peer(0xb);
    pending.update_info(Instant::now(), 0, 1, 20338, 0xb, true, 0);
    assert!(ctx.neighbors.add(pending));

    assert_eq!(relay(&ctx, None, &RelayMessage::BlockHash(Bytes32([1; 32]))), 0);
    assert!(drain(&mut rx_quiet).is_empty());
    assert!(drain(&mut rx_pending).is_empty());
}

#[test]
fn test_unknown_message_type_is_rejected() {
    let (ctx, _ledger) = context();
    assert_eq!(
        relay_message(&ctx, None, Message::Ping(1)),
        Err(RelayError::UnknownMessageType("ping"))
    );
    assert_eq!(
        RelayMessage::try_from(Message::Inv(InvPayload::single(InventoryType::Block, Bytes32([5; 32])))),
        Ok(RelayMessage::BlockHash(Bytes32([5; 32])))
    );
}

#[test]
fn test_xmit_reaches_every_established_peer() {
    let (ctx, _ledger) = context();
    let (_a, mut rx_a) = established_peer(&ctx, 0xa, 0);
    let (_b, mut rx_b) = established_peer(&ctx, 0xb, 0);
    assert!(ctx.begin_sync(SyncState::HeadersFirst, 0xa, None));

    let hash = Bytes32([3; 32]);
    let announcement = Message::Inv(InvPayload::single(InventoryType::Block, hash));
    assert_eq!(xmit(&ctx, &RelayMessage::BlockHash(hash)), 2);
    assert_eq!(drain(&mut rx_a), vec![announcement.clone()]);
    assert_eq!(drain(&mut rx_b), vec![announcement]);
}

#[test]
fn test_xmit_rejects_unknown_message_type() {
    let (ctx, _ledger) = context();
    let (_a, mut rx_a) = established_peer(&ctx, 0xa, 0);

    assert_eq!(
        xmit_message(&ctx, Message::Ping(3)),
        Err(RelayError::UnknownMessageType("ping"))
    );
    assert!(drain(&mut rx_a).is_empty());

    let tx = Transaction::coinbase(2, 4, Vec::new());
    assert_eq!(xmit_message(&ctx, Message::Tx(Box::new(tx.clone()))), Ok(1));
    assert_eq!(drain(&mut rx_a), vec![Message::Tx(Box::new(tx))]);
}
