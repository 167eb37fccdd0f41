// Multi-node ring scenarios on the 3-bit identifier space. Every node runs
// in-process on an ephemeral port; maintenance is driven explicitly through
// the RPC surface so that convergence is observable step by step.

use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::sleep;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Channel, Server};
use tonic::Request;

use chord_ring::node::node_ref::NodeRef;
use chord_ring::node::state::NodeState;
use chord_ring::threads::chord::chord_proto::chord_client::ChordClient;
use chord_ring::threads::chord::chord_proto::chord_server::ChordServer;
use chord_ring::threads::chord::chord_proto::{
    Empty, FindSuccessorRequest, NodeMsg, NodeSummaryMsg,
};
use chord_ring::threads::chord::{ChordService, ClientFactory};
use chord_ring::threads::join::process_node_join;

const BITS: u8 = 3;

struct TestNode {
    node: NodeRef,
    url: String,
    shutdown: tokio::sync::oneshot::Sender<()>,
}

impl TestNode {
    /// Shuts the node's server down, closing open connections, so that peers
    /// observe it as dead.
    async fn kill(self) {
        let _ = self.shutdown.send(());
        sleep(Duration::from_millis(50)).await;
    }
}

async fn start_node(id: u64, peer: Option<&TestNode>) -> TestNode {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let own = NodeRef::new(id, "127.0.0.1", port);

    let state = NodeState::new(own.clone(), BITS);
    let service = ChordService::new(state, ClientFactory::default(), true);
    process_node_join(&service, peer.map(|p| p.node.clone()))
        .await
        .unwrap();

    let served = service.clone();
    let (shutdown, rx_shutdown) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        Server::builder()
            .add_service(ChordServer::new(served))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                let _ = rx_shutdown.await;
            })
            .await
            .unwrap();
    });

    TestNode {
        node: own,
        url: format!("http://127.0.0.1:{}", port),
        shutdown,
    }
}

async fn client(node: &TestNode) -> ChordClient<Channel> {
    for _ in 0..100 {
        if let Ok(client) = ChordClient::connect(node.url.clone()).await {
            return client;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("node at {} never became reachable", node.url);
}

async fn lookup(node: &TestNode, id: u64) -> u64 {
    let request = FindSuccessorRequest {
        id,
        node: Some(NodeMsg {
            id: node.node.id,
            host: node.node.host.clone(),
            port: node.node.port as u32,
        }),
    };
    client(node)
        .await
        .find_successor_remote_helper(Request::new(request))
        .await
        .unwrap()
        .into_inner()
        .id
        .expect("lookup yielded the null node")
}

async fn summary(node: &TestNode) -> NodeSummaryMsg {
    client(node)
        .await
        .get_node_summary(Request::new(Empty {}))
        .await
        .unwrap()
        .into_inner()
}

async fn stabilize(node: &TestNode) {
    client(node)
        .await
        .stabilize(Request::new(Empty {}))
        .await
        .unwrap();
}

async fn fix_fingers(node: &TestNode) {
    client(node)
        .await
        .fix_fingers(Request::new(Empty {}))
        .await
        .unwrap();
}

async fn check_predecessor(node: &TestNode) {
    client(node)
        .await
        .check_predecessor(Request::new(Empty {}))
        .await
        .unwrap();
}

/// Runs enough maintenance rounds for a small, failure-free ring to settle.
/// Finger refresh picks random indices, so it is repeated generously.
async fn converge(nodes: &[&TestNode]) {
    for _ in 0..3 {
        for node in nodes {
            stabilize(node).await;
        }
    }
    for _ in 0..20 {
        for node in nodes {
            fix_fingers(node).await;
        }
    }
    for _ in 0..2 {
        for node in nodes {
            stabilize(node).await;
        }
    }
}

fn successor_of(summary: &NodeSummaryMsg) -> u64 {
    summary.fingers[0].node.as_ref().unwrap().id.unwrap()
}

fn predecessor_of(summary: &NodeSummaryMsg) -> Option<u64> {
    summary.predecessor.as_ref().and_then(|node| node.id)
}

#[tokio::test]
async fn single_node_ring() {
    let a = start_node(1, None).await;

    let own = client(&a)
        .await
        .summary(Request::new(Empty {}))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(own.id, Some(1));

    let state = summary(&a).await;
    assert_eq!(predecessor_of(&state), Some(1));
    let starts: Vec<u64> = state.fingers.iter().map(|finger| finger.start).collect();
    assert_eq!(starts, vec![2, 3, 5]);
    for finger in &state.fingers {
        assert_eq!(finger.node.as_ref().unwrap().id, Some(1));
    }
    assert_eq!(state.successor_list.len(), 1);
    assert_eq!(state.successor_list[0].id, Some(1));

    assert_eq!(lookup(&a, 5).await, 1);
    assert_eq!(lookup(&a, 1).await, 1);

    // stabilizing a lone node must not disturb it
    stabilize(&a).await;
    assert_eq!(successor_of(&summary(&a).await), 1);
    assert_eq!(predecessor_of(&summary(&a).await), Some(1));
}

#[tokio::test]
async fn two_node_ring_forms() {
    let a = start_node(1, None).await;
    let b = start_node(3, Some(&a)).await;

    for _ in 0..3 {
        stabilize(&a).await;
        stabilize(&b).await;
    }

    let a_state = summary(&a).await;
    let b_state = summary(&b).await;
    assert_eq!(successor_of(&a_state), 3);
    assert_eq!(successor_of(&b_state), 1);
    assert_eq!(predecessor_of(&a_state), Some(3));
    assert_eq!(predecessor_of(&b_state), Some(1));

    assert_eq!(lookup(&a, 2).await, 3);
    assert_eq!(lookup(&b, 2).await, 3);
    assert_eq!(lookup(&a, 0).await, 1);
    assert_eq!(lookup(&b, 0).await, 1);
}

#[tokio::test]
async fn three_node_ring_routes_lookups() {
    let a = start_node(1, None).await;
    let b = start_node(3, Some(&a)).await;
    let c = start_node(5, Some(&b)).await;
    converge(&[&a, &b, &c]).await;

    for node in [&a, &b, &c] {
        assert_eq!(lookup(node, 4).await, 5);
        assert_eq!(lookup(node, 6).await, 1);
        assert_eq!(lookup(node, 2).await, 3);
    }

    let a_state = summary(&a).await;
    let starts: Vec<u64> = a_state.fingers.iter().map(|finger| finger.start).collect();
    assert_eq!(starts, vec![2, 3, 5]);
    let targets: Vec<u64> = a_state
        .fingers
        .iter()
        .map(|finger| finger.node.as_ref().unwrap().id.unwrap())
        .collect();
    assert_eq!(targets, vec![3, 3, 5]);
}

#[tokio::test]
async fn lookups_agree_from_every_node() {
    let a = start_node(1, None).await;
    let b = start_node(3, Some(&a)).await;
    let c = start_node(5, Some(&b)).await;
    converge(&[&a, &b, &c]).await;

    for key in 0..8u64 {
        let from_a = lookup(&a, key).await;
        let from_b = lookup(&b, key).await;
        let from_c = lookup(&c, key).await;
        assert_eq!(from_a, from_b, "key {} disagrees between nodes", key);
        assert_eq!(from_b, from_c, "key {} disagrees between nodes", key);
    }
}

#[tokio::test]
async fn ring_survives_a_successor_failure() {
    let a = start_node(1, None).await;
    let b = start_node(3, Some(&a)).await;
    let c = start_node(5, Some(&b)).await;
    converge(&[&a, &b, &c]).await;

    // the fall-back list must already know about node 5
    let list: Vec<u64> = summary(&a)
        .await
        .successor_list
        .iter()
        .filter_map(|node| node.id)
        .collect();
    assert!(list.contains(&5), "successor list {:?} misses node 5", list);

    b.kill().await;

    stabilize(&a).await;
    check_predecessor(&c).await;
    stabilize(&a).await;
    stabilize(&a).await;

    assert_eq!(successor_of(&summary(&a).await), 5);
    assert_eq!(predecessor_of(&summary(&c).await), Some(1));
    assert_eq!(lookup(&a, 4).await, 5);
}

#[tokio::test]
async fn wrap_around_lookups() {
    let a = start_node(2, None).await;
    let b = start_node(6, Some(&a)).await;

    for _ in 0..3 {
        stabilize(&a).await;
        stabilize(&b).await;
    }

    for node in [&a, &b] {
        assert_eq!(lookup(node, 7).await, 2);
        assert_eq!(lookup(node, 4).await, 6);
    }
}

#[tokio::test]
async fn predecessor_handle_follows_the_notify_rules() {
    let a = start_node(1, None).await;
    let mut chord = client(&a).await;

    // wiping the handle simulates a dead predecessor
    chord
        .set_predecessor(Request::new(NodeMsg {
            id: None,
            host: String::new(),
            port: 0,
        }))
        .await
        .unwrap();

    // with no predecessor, anyone is adopted
    chord
        .notify(Request::new(NodeMsg {
            id: Some(5),
            host: "127.0.0.1".to_string(),
            port: 1,
        }))
        .await
        .unwrap();
    assert_eq!(predecessor_of(&summary(&a).await), Some(5));

    // 3 is not on the arc (5, 1): ignored
    chord
        .notify(Request::new(NodeMsg {
            id: Some(3),
            host: "127.0.0.1".to_string(),
            port: 2,
        }))
        .await
        .unwrap();
    assert_eq!(predecessor_of(&summary(&a).await), Some(5));

    // 0 is on the arc (5, 1): adopted
    chord
        .notify(Request::new(NodeMsg {
            id: Some(0),
            host: "127.0.0.1".to_string(),
            port: 3,
        }))
        .await
        .unwrap();
    assert_eq!(predecessor_of(&summary(&a).await), Some(0));
}

#[tokio::test]
async fn debug_rpcs_require_the_flag() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let own = NodeRef::new(1, "127.0.0.1", port);
    let service = ChordService::new(NodeState::new(own, BITS), ClientFactory::default(), false);
    process_node_join(&service, None).await.unwrap();
    tokio::spawn(async move {
        Server::builder()
            .add_service(ChordServer::new(service))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    let url = format!("http://127.0.0.1:{}", port);
    let mut chord = loop {
        match ChordClient::connect(url.clone()).await {
            Ok(client) => break client,
            Err(_) => sleep(Duration::from_millis(20)).await,
        }
    };
    let result = chord.get_node_summary(Request::new(Empty {})).await;
    assert!(result.is_err());
}
