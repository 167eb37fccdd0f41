use std::env;
use std::process::exit;

use tonic::transport::Channel;
use tonic::Request;

use crate::chord_proto::chord_client::ChordClient;
use crate::chord_proto::{Empty, NodeMsg, NodeSummaryMsg};

pub mod chord_proto {
    tonic::include_proto!("chord");
}

/// Pulls every node's debug summary and verifies ring invariants from the
/// outside: successor/predecessor symmetry, finger targets and successor
/// list ordering. Nodes must run with the debug flag.
#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() == 1 {
        eprintln!("Provide at least one node url (e.g. http://127.0.0.1:5601)");
        exit(2);
    }

    let mut node_summaries: Vec<NodeSummaryMsg> = Vec::new();
    for host in args.iter().skip(1) {
        let mut client: ChordClient<Channel> = match ChordClient::connect(host.clone()).await {
            Ok(client) => client,
            Err(e) => {
                eprintln!("Failed to connect to {}: {}", host, e);
                exit(2);
            }
        };
        match client.get_node_summary(Request::new(Empty {})).await {
            Ok(summary) => node_summaries.push(summary.into_inner()),
            Err(status) => {
                eprintln!("Failed to fetch summary from {}: {}", host, status.message());
                exit(2);
            }
        }
    }

    node_summaries.sort_by_key(|summary| id_of(summary.node.as_ref()));
    let node_ids: Vec<u64> = node_summaries
        .iter()
        .map(|summary| id_of(summary.node.as_ref()))
        .collect();

    let mut is_valid = true;

    // successor ring order: each node's finger zero points at the next node
    for i in 0..node_summaries.len() {
        let current = &node_summaries[i];
        let expected = node_ids[(i + 1) % node_ids.len()];
        let actual = current
            .fingers
            .first()
            .map(|finger| id_of(finger.node.as_ref()))
            .unwrap_or(u64::MAX);
        if actual != expected {
            eprintln!(
                "Node {}: successor is {}, but the ring order says {}",
                node_ids[i], actual, expected
            );
            is_valid = false;
        }
    }

    // predecessor symmetry: the next node points back at the current one
    for i in 0..node_summaries.len() {
        let next = &node_summaries[(i + 1) % node_summaries.len()];
        let predecessor = id_of(next.predecessor.as_ref());
        if predecessor != node_ids[i] {
            eprintln!(
                "Node {} has wrong predecessor: {} (expected {})",
                id_of(next.node.as_ref()),
                predecessor,
                node_ids[i]
            );
            is_valid = false;
        }
    }

    // finger targets: each finger points at the node responsible for its start
    for summary in &node_summaries {
        for (j, finger) in summary.fingers.iter().enumerate() {
            let pointed_to = id_of(finger.node.as_ref());
            let responsible = responsible_node_for_key(finger.start, &node_ids);
            if pointed_to != responsible {
                eprintln!("-----");
                eprintln!(
                    "Node {}: finger {} (start {}) points at {}, but {} is responsible",
                    id_of(summary.node.as_ref()),
                    j,
                    finger.start,
                    pointed_to,
                    responsible
                );
                eprintln!("-----");
                is_valid = false;
            }
        }
    }

    // successor lists: entry j is the (j+1)-th node clockwise
    for (i, summary) in node_summaries.iter().enumerate() {
        for (j, successor) in summary.successor_list.iter().enumerate() {
            let expected = node_ids[(i + j + 1) % node_ids.len()];
            if id_of(Some(successor)) != expected {
                eprintln!(
                    "Node {}: successor list entry {} is {}, expected {}",
                    node_ids[i],
                    j,
                    id_of(Some(successor)),
                    expected
                );
                is_valid = false;
            }
        }
    }

    if is_valid {
        eprintln!("Looks good!")
    } else {
        eprintln!("Ring is invalid!");
        exit(1);
    }
}

fn id_of(node: Option<&NodeMsg>) -> u64 {
    node.and_then(|node| node.id).unwrap_or(u64::MAX)
}

/// First node at or after `key` going clockwise, wrapping to the smallest id.
fn responsible_node_for_key(key: u64, node_ids: &[u64]) -> u64 {
    node_ids
        .iter()
        .filter(|&&id| id >= key)
        .min()
        .or_else(|| node_ids.iter().min())
        .copied()
        .unwrap_or(u64::MAX)
}
