use std::sync::Arc;
use std::time::Instant;

use containers::{Block, BlockHeader, Bytes32, Height};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{RemotePeer, SyncState};
use crate::error::SyncError;
use crate::ledger::{BlockOutcome, LedgerError};
use crate::message::{InvPayload, LocatorPayload, Message};
use crate::node::{NodeContext, PeerInfo, SyncStatus};
use crate::relay::{RelayMessage, relay};
use crate::types::InventoryType;

/// Drives headers-first and blocks-first sync against one peer at a time.
///
/// The coordinator owns no state of its own: sync status lives in
/// [`NodeContext`], per-request bookkeeping lives in each [`RemotePeer`].
/// It is cheap to clone and clones are handed to spawned fetch tasks.
#[derive(Debug, Clone)]
pub struct SyncCoordinator {
    ctx: Arc<NodeContext>,
}

/// Snapshot of sync progress.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SyncStats {
    pub state: SyncState,
    pub sync_peer: Option<u64>,
    pub local_height: u32,
    pub header_height: u32,
    pub best_peer_height: Option<u64>,
    pub established_peers: usize,
    pub headers_in_flight: usize,
    pub blocks_in_flight: usize,
    pub next_checkpoint: Option<u32>,
}

impl SyncCoordinator {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }

    pub fn ctx(&self) -> &Arc<NodeContext> {
        &self.ctx
    }

    pub fn state(&self) -> SyncState {
        self.ctx.sync_status().state
    }

    /// True if some established peer reports a height above ours.
    pub fn need_sync(&self) -> bool {
        let local = self.ctx.local_height();
        self.ctx
            .neighbors
            .heights()
            .iter()
            .any(|(_, height)| *height > local)
    }

    /// Highest established peer that has not failed a sync.
    pub fn choose_best_peer(&self) -> Option<Arc<RemotePeer>> {
        self.choose_best_peer_excluding(None)
    }

    fn choose_best_peer_excluding(&self, exclude: Option<u64>) -> Option<Arc<RemotePeer>> {
        let mut best: Option<Arc<RemotePeer>> = None;
        for peer in self.ctx.neighbors.established() {
            if peer.is_sync_failed() || Some(peer.id()) == exclude {
                continue;
            }
            match &best {
                Some(current) if current.height() >= peer.height() => {}
                _ => best = Some(peer),
            }
        }
        best
    }

    /// Begin a sync attempt if one is needed and none is running.
    ///
    /// Picks headers-first while a checkpoint lies above the local height and
    /// blocks-first otherwise. Requests are sent from a spawned task so the
    /// caller never waits on the flight window.
    pub fn start_sync(&self) -> Option<SyncState> {
        if self.state().is_syncing() || !self.need_sync() {
            return None;
        }
        let Some(peer) = self.choose_best_peer() else {
            debug!("no usable sync peer");
            return None;
        };

        let local = self.ctx.ledger.current_height();
        if peer.height() <= local.0 as u64 {
            debug!(best = peer.height(), local = local.0, "best usable peer is not ahead");
            return None;
        }

        let target = self
            .ctx
            .checkpoints
            .find_next_header_checkpoint(local)
            .filter(|checkpoint| local < checkpoint.height);
        let mode = if target.is_some() {
            SyncState::HeadersFirst
        } else {
            SyncState::BlocksFirst
        };

        if !self.ctx.begin_sync(mode, peer.id(), target) {
            return None;
        }

        info!(
            peer = format_args!("{:#x}", peer.id()),
            mode = mode.as_str(),
            local = local.0,
            remote = peer.height(),
            target = target.map(|c| c.height.0),
            "starting sync"
        );
        self.ctx.metrics.inc_sync_start(mode.as_str());
        self.ctx.metrics.set_header_first_mode(mode == SyncState::HeadersFirst);

        match mode {
            SyncState::HeadersFirst => {
                peer.set_sync_headers(true);
                let coordinator = self.clone();
                tokio::spawn(async move {
                    if let Err(err) = coordinator.resume_headers_first(&peer).await {
                        warn!(peer = format_args!("{:#x}", peer.id()), %err, "header sync request failed");
                        coordinator.fail_sync_peer(&peer, "header request failed");
                    }
                });
            }
            _ => {
                if let Err(err) = self.request_blocks(&peer) {
                    warn!(peer = format_args!("{:#x}", peer.id()), %err, "block sync request failed");
                    self.fail_sync_peer(&peer, "block request failed");
                }
            }
        }
        Some(mode)
    }

    /// Ask for headers, or for the blocks behind already-known headers when
    /// the header chain has reached the checkpoint.
    async fn resume_headers_first(&self, peer: &Arc<RemotePeer>) -> Result<(), SyncError> {
        let Some(target) = self.ctx.sync_status().target else {
            return Ok(());
        };
        let header_height = self.ctx.ledger.header_height();
        if header_height < target.height {
            return self.request_headers(peer).await;
        }

        let local = self.ctx.ledger.current_height();
        let entries: Vec<(u32, Bytes32)> = (local.0 + 1..=target.height.0)
            .filter_map(|h| self.ctx.ledger.header_hash_at(Height(h)).map(|hash| (h, hash)))
            .collect();
        self.fetch_blocks(peer, entries).await
    }

    /// Send `getheaders` from the header tip towards the target checkpoint.
    /// Waits for a free header slot first.
    pub async fn request_headers(&self, peer: &Arc<RemotePeer>) -> Result<(), SyncError> {
        let permit = self.ctx.window.acquire_header().await?;
        if !peer.is_established() {
            return Err(SyncError::PeerClosed(peer.id()));
        }

        let ledger = &self.ctx.ledger;
        let locator = ledger.block_locator_from_hash(&ledger.current_header_hash());
        let hash_stop = self
            .ctx
            .sync_status()
            .target
            .map(|checkpoint| checkpoint.hash)
            .unwrap_or_default();

        peer.push_header_permit(permit, Instant::now());
        if let Err(err) = peer.send(&Message::GetHeaders(LocatorPayload { locator, hash_stop })) {
            peer.release_header_permit();
            return Err(err);
        }
        debug!(
            peer = format_args!("{:#x}", peer.id()),
            from = ledger.header_height().0,
            "requested headers"
        );
        Ok(())
    }

    /// Send `getblocks` from the local best block.
    pub fn request_blocks(&self, peer: &RemotePeer) -> Result<(), SyncError> {
        let ledger = &self.ctx.ledger;
        let locator = ledger.block_locator_from_hash(&ledger.current_block_hash());
        peer.send(&Message::GetBlocks(LocatorPayload {
            locator,
            hash_stop: Bytes32::zero(),
        }))?;
        debug!(
            peer = format_args!("{:#x}", peer.id()),
            from = ledger.current_height().0,
            "requested block inventory"
        );
        Ok(())
    }

    /// Request blocks one at a time, each holding a block slot until it
    /// arrives or is given up on.
    pub async fn fetch_blocks(&self, peer: &Arc<RemotePeer>, entries: Vec<(u32, Bytes32)>) -> Result<(), SyncError> {
        for (height, hash) in entries {
            if self.ctx.ledger.contains_block(&hash) {
                continue;
            }
            let permit = self.ctx.window.acquire_block().await?;
            if !peer.is_established() {
                return Err(SyncError::PeerClosed(peer.id()));
            }
            if peer.is_sync_failed() {
                debug!(peer = format_args!("{:#x}", peer.id()), "peer failed, stopping block fetch");
                return Ok(());
            }
            if self.ctx.ledger.contains_block(&hash) || !peer.store_flight_height(height, hash, Some(permit)) {
                continue;
            }
            peer.add_requested_block(hash, Instant::now());
            peer.send(&Message::GetData(InvPayload::single(InventoryType::Block, hash)))?;
        }
        Ok(())
    }

    /// Request announced blocks one at a time under block slots. The hashes
    /// are already recorded as requested; any answered or given up on while
    /// waiting for a slot is skipped.
    pub async fn fetch_announced(&self, peer: &Arc<RemotePeer>, hashes: Vec<Bytes32>) -> Result<(), SyncError> {
        for hash in hashes {
            let permit = self.ctx.window.acquire_block().await?;
            if !peer.is_established() {
                return Err(SyncError::PeerClosed(peer.id()));
            }
            if self.ctx.ledger.contains_block(&hash) {
                peer.remove_requested_block(&hash);
                peer.delete_inv_hash(&hash);
                continue;
            }
            if !peer.dispatch_requested_block(&hash, Instant::now(), permit) {
                continue;
            }
            peer.send(&Message::GetData(InvPayload::single(InventoryType::Block, hash)))?;
        }
        Ok(())
    }

    fn spawn_announced_fetch(&self, peer: Arc<RemotePeer>, hashes: Vec<Bytes32>) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            if let Err(err) = coordinator.fetch_announced(&peer, hashes).await {
                debug!(peer = format_args!("{:#x}", peer.id()), %err, "announced block fetch stopped");
            }
        });
    }

    fn spawn_block_fetch(&self, peer: Arc<RemotePeer>, entries: Vec<(u32, Bytes32)>) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            if let Err(err) = coordinator.fetch_blocks(&peer, entries).await {
                debug!(peer = format_args!("{:#x}", peer.id()), %err, "block fetch stopped");
            }
        });
    }

    /// Hand blocks that one peer failed to deliver to another peer.
    fn refetch(&self, entries: Vec<(u32, Bytes32)>, failed: &Arc<RemotePeer>) {
        if entries.is_empty() {
            return;
        }
        let peer = match self.choose_best_peer_excluding(Some(failed.id())) {
            Some(peer) => peer,
            None if failed.is_established() => failed.clone(),
            None => {
                debug!(count = entries.len(), "no peer to refetch blocks from");
                return;
            }
        };
        self.spawn_block_fetch(peer, entries);
    }

    /// Local chain has caught up with the sync peer.
    pub fn is_finished_sync_from_sync_node(&self) -> bool {
        let Some(id) = self.ctx.sync_status().sync_peer else {
            return false;
        };
        match self.ctx.neighbors.get(id) {
            Some(peer) => self.ctx.local_height() >= peer.height(),
            None => false,
        }
    }

    fn reached_target(&self, status: &SyncStatus) -> bool {
        match status.target {
            Some(checkpoint) => self.ctx.ledger.current_height() >= checkpoint.height,
            None => false,
        }
    }

    /// Return to idle and clear the header-sync flag on the previous source.
    pub fn reset_sync(&self, reason: &str) {
        let status = self.ctx.sync_status();
        if let Some(id) = self.ctx.end_sync() {
            if let Some(peer) = self.ctx.neighbors.get(id) {
                peer.set_sync_headers(false);
                while peer.release_header_permit() {}
            }
        }
        self.ctx.metrics.set_header_first_mode(false);
        if status.state.is_syncing() {
            info!(
                state = status.state.as_str(),
                local = self.ctx.ledger.current_height().0,
                reason,
                "sync reset"
            );
        }
    }

    /// Exclude `peer` from future peer selection and reset sync.
    pub fn fail_sync_peer(&self, peer: &RemotePeer, reason: &str) {
        peer.set_sync_failed(true);
        peer.set_sync_headers(false);
        while peer.release_header_permit() {}
        warn!(peer = format_args!("{:#x}", peer.id()), reason, "sync peer marked failed");
        if self.ctx.sync_status().sync_peer == Some(peer.id()) {
            self.reset_sync(reason);
        }
    }

    /// Headers answering our `getheaders`.
    pub fn on_headers(&self, peer: &Arc<RemotePeer>, headers: Vec<BlockHeader>) -> Result<(), SyncError> {
        peer.release_header_permit();

        let status = self.ctx.sync_status();
        if status.state != SyncState::HeadersFirst || status.sync_peer != Some(peer.id()) {
            debug!(peer = format_args!("{:#x}", peer.id()), count = headers.len(), "ignoring unsolicited headers");
            return Ok(());
        }
        let Some(target) = status.target else {
            return Ok(());
        };

        if headers.is_empty() {
            let header_height = self.ctx.ledger.header_height();
            if header_height >= target.height {
                return Ok(());
            }
            if header_height.0 as u64 >= peer.height() {
                self.continue_below_checkpoint(peer, header_height);
            } else {
                self.fail_sync_peer(peer, "empty headers before checkpoint");
            }
            return Ok(());
        }

        for header in &headers {
            if let Some(checkpoint) = self.ctx.checkpoints.at_height(header.height) {
                let got = header.hash();
                if got != checkpoint.hash {
                    self.fail_sync_peer(peer, "checkpoint mismatch");
                    return Err(SyncError::CheckpointMismatch {
                        height: header.height,
                        expected: checkpoint.hash,
                        got,
                    });
                }
            }
        }

        let added = match self.ctx.ledger.add_headers(&headers) {
            Ok(added) => added,
            Err(err) => {
                self.fail_sync_peer(peer, "invalid headers");
                return Err(err.into());
            }
        };
        let header_height = self.ctx.ledger.header_height();
        self.ctx.metrics.set_header_height(header_height.0 as i64);
        debug!(
            peer = format_args!("{:#x}", peer.id()),
            received = headers.len(),
            added,
            header_height = header_height.0,
            "headers stored"
        );

        let entries: Vec<(u32, Bytes32)> = headers
            .iter()
            .map(|header| (header.height.0, header.hash()))
            .filter(|(_, hash)| !self.ctx.ledger.contains_block(hash))
            .collect();

        let coordinator = self.clone();
        let fetch_peer = peer.clone();
        let more_headers = header_height < target.height;
        tokio::spawn(async move {
            if more_headers {
                if let Err(err) = coordinator.request_headers(&fetch_peer).await {
                    warn!(peer = format_args!("{:#x}", fetch_peer.id()), %err, "header request failed");
                    coordinator.fail_sync_peer(&fetch_peer, "header request failed");
                    return;
                }
            }
            if let Err(err) = coordinator.fetch_blocks(&fetch_peer, entries).await {
                debug!(peer = format_args!("{:#x}", fetch_peer.id()), %err, "block fetch stopped");
            }
        });
        Ok(())
    }

    /// The sync peer has sent every header it has and its tip lies below the
    /// checkpoint. Fetch the blocks behind the stored headers and finish the
    /// attempt blocks-first from the same peer.
    fn continue_below_checkpoint(&self, peer: &Arc<RemotePeer>, header_height: Height) {
        if !self.ctx.fall_back_to_blocks_first() {
            return;
        }
        peer.set_sync_headers(false);
        while peer.release_header_permit() {}
        self.ctx.metrics.set_header_first_mode(false);

        let local = self.ctx.ledger.current_height();
        let in_flight = peer.flight_heights();
        let entries: Vec<(u32, Bytes32)> = (local.0 + 1..=header_height.0)
            .filter(|h| !in_flight.contains(h))
            .filter_map(|h| self.ctx.ledger.header_hash_at(Height(h)).map(|hash| (h, hash)))
            .filter(|(_, hash)| !self.ctx.ledger.contains_block(hash))
            .collect();
        info!(
            peer = format_args!("{:#x}", peer.id()),
            header_height = header_height.0,
            remote = peer.height(),
            pending = entries.len(),
            "sync peer ends below checkpoint, continuing blocks-first"
        );
        if !entries.is_empty() {
            self.spawn_block_fetch(peer.clone(), entries);
        }
    }

    /// A block arrived, requested or not.
    pub fn on_block(&self, peer: &Arc<RemotePeer>, block: Block) -> Result<Option<BlockOutcome>, SyncError> {
        let hash = block.hash();
        let height = block.height();

        let requested_at = peer.remove_requested_block(&hash);
        if let Some(at) = requested_at {
            self.ctx.metrics.observe_block_response_time(at.elapsed().as_secs_f64());
        }
        peer.remove_flight_hash(&hash);
        peer.delete_inv_hash(&hash);
        peer.cache_hash(hash);

        let outcome = match self.ctx.ledger.add_block(block) {
            Ok(outcome) => outcome,
            Err(LedgerError::Duplicate(_)) => {
                debug!(height = height.0, %hash, "duplicate block");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        match outcome {
            BlockOutcome::Connected { height: best } => {
                self.ctx.metrics.set_local_height(best.0 as i64);
                debug!(height = height.0, best = best.0, "block connected");
            }
            BlockOutcome::Buffered => debug!(height = height.0, "block buffered"),
        }

        let status = self.ctx.sync_status();
        if status.state == SyncState::BlocksFirst
            && status.sync_peer == Some(peer.id())
            && peer.requested_block_count() == 0
            && self.ctx.local_height() < peer.height()
        {
            self.request_blocks(peer)?;
        }

        if !status.state.is_syncing() && matches!(outcome, BlockOutcome::Connected { .. }) {
            relay(&self.ctx, Some(peer.id()), &RelayMessage::BlockHash(hash));
        }
        Ok(Some(outcome))
    }

    /// Inventory announcement. Requests whatever is new; blocks are queued
    /// behind the block window.
    pub fn on_inv(&self, peer: &Arc<RemotePeer>, inv: InvPayload) -> Result<(), SyncError> {
        let header_syncing = self.ctx.is_header_syncing();
        let now = Instant::now();
        let mut wanted = Vec::new();

        for hash in inv.hashes {
            peer.cache_hash(hash);
            match inv.inv_type {
                InventoryType::Block => {
                    if header_syncing
                        || self.ctx.ledger.contains_block(&hash)
                        || peer.exist_inv_hash(&hash)
                        || peer.is_block_requested(&hash)
                    {
                        continue;
                    }
                    peer.cache_inv_hash(hash);
                    peer.add_requested_block(hash, now);
                    wanted.push(hash);
                }
                InventoryType::Transaction | InventoryType::Consensus => {
                    if !self.ctx.is_processed(&hash) {
                        wanted.push(hash);
                    }
                }
            }
        }

        if wanted.is_empty() {
            return Ok(());
        }
        debug!(
            peer = format_args!("{:#x}", peer.id()),
            kind = inv.inv_type.as_str(),
            count = wanted.len(),
            "requesting announced inventory"
        );
        if inv.inv_type == InventoryType::Block {
            self.spawn_announced_fetch(peer.clone(), wanted);
            return Ok(());
        }
        peer.send(&Message::GetData(InvPayload::new(inv.inv_type, wanted)))
    }

    /// The peer does not have a block we asked it for.
    pub fn on_not_found(&self, peer: &Arc<RemotePeer>, hash: Bytes32) {
        peer.remove_requested_block(&hash);
        peer.delete_inv_hash(&hash);
        if let Some(height) = peer.remove_flight_hash(&hash) {
            debug!(peer = format_args!("{:#x}", peer.id()), height, %hash, "block not found, refetching");
            self.refetch(vec![(height, hash)], peer);
        }
    }

    /// One round of the periodic sync loop.
    pub fn tick(&self, now: Instant) {
        self.ping_peers();
        self.prune_flight_heights();

        let status = self.ctx.sync_status();
        if status.state.is_syncing() {
            if self.reached_target(&status) || self.is_finished_sync_from_sync_node() {
                self.reset_sync("finished");
            } else if status.sync_peer.and_then(|id| self.ctx.neighbors.get(id)).is_none() {
                self.reset_sync("sync peer gone");
            } else {
                self.check_header_stall(&status, now);
            }
        }

        self.retry_stalled_blocks(now);
        self.start_sync();
        self.update_metrics();
    }

    /// Tell every established peer our height; pongs refresh theirs.
    fn ping_peers(&self) {
        let ping = Message::Ping(self.ctx.local_height());
        for peer in self.ctx.neighbors.established() {
            if let Err(err) = peer.send(&ping) {
                debug!(peer = format_args!("{:#x}", peer.id()), %err, "ping failed");
            }
        }
    }

    /// Release slots for heights that were connected through another peer.
    fn prune_flight_heights(&self) {
        let threshold = self.ctx.ledger.current_height().0.saturating_add(1);
        for peer in self.ctx.neighbors.all() {
            let removed = peer.remove_flight_heights_less_than(threshold);
            if removed > 0 {
                debug!(peer = format_args!("{:#x}", peer.id()), removed, "pruned satisfied flight heights");
            }
        }
    }

    fn check_header_stall(&self, status: &SyncStatus, now: Instant) {
        if status.state != SyncState::HeadersFirst {
            return;
        }
        let Some(peer) = status.sync_peer.and_then(|id| self.ctx.neighbors.get(id)) else {
            return;
        };
        if let Some(at) = peer.header_requested_at() {
            if now.saturating_duration_since(at) >= self.ctx.config.block_request_timeout() {
                self.ctx.metrics.inc_stalled_requests();
                self.fail_sync_peer(&peer, "header request timed out");
            }
        }
    }

    /// Re-request blocks that have been outstanding past the timeout,
    /// preferably from a different peer.
    fn retry_stalled_blocks(&self, now: Instant) {
        let timeout = self.ctx.config.block_request_timeout();
        for peer in self.ctx.neighbors.established() {
            let stale = peer.stale_requests(now, timeout);
            if stale.is_empty() {
                continue;
            }

            let mut in_flight = Vec::new();
            let mut announced = Vec::new();
            for hash in stale {
                peer.remove_requested_block(&hash);
                peer.delete_inv_hash(&hash);
                self.ctx.metrics.inc_stalled_requests();
                match peer.remove_flight_hash(&hash) {
                    Some(height) => in_flight.push((height, hash)),
                    None => announced.push(hash),
                }
            }
            warn!(
                peer = format_args!("{:#x}", peer.id()),
                count = in_flight.len() + announced.len(),
                "block requests timed out"
            );

            self.refetch(in_flight, &peer);
            if announced.is_empty() {
                continue;
            }
            let target = self
                .choose_best_peer_excluding(Some(peer.id()))
                .unwrap_or_else(|| peer.clone());
            for hash in &announced {
                target.cache_inv_hash(*hash);
                target.add_requested_block(*hash, now);
            }
            self.spawn_announced_fetch(target, announced);
        }
    }

    fn update_metrics(&self) {
        let metrics = &self.ctx.metrics;
        let neighbors = &self.ctx.neighbors;
        metrics.set_peers_connected(neighbors.count() as i64);
        metrics.set_peers_established(neighbors.established_count() as i64);
        metrics.set_local_height(self.ctx.ledger.current_height().0 as i64);
        metrics.set_header_height(self.ctx.ledger.header_height().0 as i64);
        metrics.set_best_peer_height(neighbors.max_established_height().unwrap_or(0) as i64);
        metrics.set_header_first_mode(self.ctx.is_header_syncing());
        metrics.set_inflight("headers", self.ctx.window.headers_in_flight() as i64);
        metrics.set_inflight("blocks", self.ctx.window.blocks_in_flight() as i64);
    }

    pub fn get_stats(&self) -> SyncStats {
        let status = self.ctx.sync_status();
        SyncStats {
            state: status.state,
            sync_peer: status.sync_peer,
            local_height: self.ctx.ledger.current_height().0,
            header_height: self.ctx.ledger.header_height().0,
            best_peer_height: self.ctx.neighbors.max_established_height(),
            established_peers: self.ctx.neighbors.established_count(),
            headers_in_flight: self.ctx.window.headers_in_flight(),
            blocks_in_flight: self.ctx.window.blocks_in_flight(),
            next_checkpoint: self.ctx.checkpoints.next_checkpoint().map(|c| c.height.0),
        }
    }

    /// Periodic sync driver. Waits for enough established peers, then ticks
    /// every sync interval until the task is dropped.
    pub async fn run(self) {
        let interval = self.ctx.config.sync_interval();
        let min_peers = self.ctx.local.limits().min_conn_cnt;

        loop {
            let established = self.ctx.neighbors.established_count();
            if established >= min_peers {
                break;
            }
            debug!(established, required = min_peers, "waiting for peers before sync");
            tokio::time::sleep(interval).await;
        }
        info!(min_peers, "enough peers established, sync driver running");

        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.tick(Instant::now());
        }
    }
}
