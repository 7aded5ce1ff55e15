use std::net::{SocketAddr, TcpListener as StdListener};
use std::sync::Arc;
use std::time::Duration;

use chain::NodeConfig;
use containers::Block;
use metrics::Metrics;
use networking::{
    Ledger, LocalNode, MemoryLedger, MessageHandler, NodeActor, NodeContext, PeerInfo, PeerState,
    SyncCoordinator, TcpDialer, Transport,
};

fn start_node() -> (Arc<NodeContext>, Transport<TcpDialer>) {
    let config = NodeConfig::default();
    let ledger: Arc<dyn Ledger> = Arc::new(MemoryLedger::new(Block::genesis()));
    let local = LocalNode::generate(&config, ledger.clone());
    let ctx = Arc::new(NodeContext::new(local, config, ledger, Arc::new(Metrics::new())).unwrap());

    let (actor, node) = NodeActor::new(ctx.clone());
    tokio::spawn(actor.run());
    let handler = MessageHandler::new(ctx.clone(), node, SyncCoordinator::new(ctx.clone()));
    (ctx.clone(), Transport::new(ctx, handler, TcpDialer))
}

fn free_port() -> SocketAddr {
    let listener = StdListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

async fn wait_for(check: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_two_nodes_establish_over_tcp() {
    let (server_ctx, server) = start_node();
    let (client_ctx, client) = start_node();

    let addr = free_port();
    tokio::spawn(server.listen(addr));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let peer = client.connect(addr).await.unwrap().unwrap();
    assert!(wait_for(|| peer.is_established()).await);
    assert!(wait_for(|| server_ctx.neighbors.established_count() == 1).await);

    assert_eq!(peer.id(), server_ctx.local.id());
    assert!(client_ctx.neighbors.contains(server_ctx.local.id()));
    assert!(server_ctx.neighbors.contains(client_ctx.local.id()));
    assert!(client_ctx.addresses.is_known(&addr));
}

#[tokio::test]
async fn test_failed_dial_is_counted() {
    let (client_ctx, client) = start_node();
    let addr = free_port();

    assert!(client.connect(addr).await.is_err());
    assert_eq!(client_ctx.addresses.retry_count(&addr), 1);
    assert!(!client_ctx.addresses.is_connecting(&addr));
}

#[tokio::test]
async fn test_disconnect_closes_both_sides() {
    let (server_ctx, server) = start_node();
    let (client_ctx, client) = start_node();

    let addr = free_port();
    tokio::spawn(server.listen(addr));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let peer = client.connect(addr).await.unwrap().unwrap();
    assert!(wait_for(|| server_ctx.neighbors.established_count() == 1).await);

    peer.close();
    assert_eq!(peer.state(), PeerState::Inactivity);
    assert!(wait_for(|| client_ctx.neighbors.count() == 0).await);
    assert!(wait_for(|| server_ctx.neighbors.count() == 0).await);
}
