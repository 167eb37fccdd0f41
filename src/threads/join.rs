use std::error::Error;

use log::{info, warn};
use tonic::Request;

use crate::node::node_ref::NodeRef;
use crate::threads::chord::chord_proto::UpdateFingerTableRequest;
use crate::threads::chord::ChordService;
use crate::utils::config::Config;
use crate::utils::crypto::{hash_address, is_between, mask};

type BoxedError = Box<dyn Error + Send + Sync>;

/// Resolves the node's own identity and the join peer's identity from the
/// configuration, hashing addresses where no explicit id is given. Two
/// distinct addresses mapping to the same identifier is unrecoverable.
pub fn resolve_identities(config: &Config) -> Result<(NodeRef, Option<NodeRef>), BoxedError> {
    let space = mask(config.hash_bits);
    let own_id = match config.id {
        Some(id) if id > space => {
            return Err(format!("own id {} exceeds the {}-bit ring", id, config.hash_bits).into())
        }
        Some(id) => id,
        None => hash_address(&config.host, config.port, config.hash_bits),
    };
    let own = NodeRef::new(own_id, &config.host, config.port);

    let known = match (&config.known_host, config.known_port) {
        (Some(known_host), Some(known_port)) => {
            let known_id = match config.known_id {
                Some(id) if id > space => {
                    return Err(
                        format!("peer id {} exceeds the {}-bit ring", id, config.hash_bits).into()
                    )
                }
                Some(id) => id,
                None => hash_address(known_host, known_port, config.hash_bits),
            };
            let same_address = known_host == &config.host && known_port == config.port;
            if !same_address && known_id == own_id {
                return Err(format!(
                    "hash collision: {}:{} and {}:{} both map to id {}",
                    config.host, config.port, known_host, known_port, own_id
                )
                .into());
            }
            Some(NodeRef::new(known_id, known_host, known_port))
        }
        _ => None,
    };

    Ok((own, known))
}

/// Join protocol, executed once at startup. A node without a peer (or whose
/// peer is itself) becomes a lone ring; otherwise the finger table is built
/// through the peer and the nodes that must now point at us are told so.
pub async fn process_node_join(
    service: &ChordService,
    known: Option<NodeRef>,
) -> Result<(), BoxedError> {
    let own = service.state().own().clone();

    match known {
        Some(peer) if peer.id != own.id => {
            info!("joining existing ring through {}", peer);
            init_finger_table(service, &peer).await?;
            update_others(service).await;
        }
        _ => {
            info!("starting up a new ring");
            service.state().set_predecessor(own.clone());
        }
    }

    if let Err(e) = migrate_keys_after_join(service) {
        warn!("key migration after join failed: {}", e);
    }

    service.state().mirror_successor_into_list();
    info!("node {} joined the ring", own);
    Ok(())
}

/// Builds the finger table through `peer`, wiring this node in between its
/// new predecessor and successor. Consecutive fingers often share a
/// successor, in which case the previous entry is reused without a lookup.
async fn init_finger_table(service: &ChordService, peer: &NodeRef) -> Result<(), BoxedError> {
    let state = service.state();
    let own = state.own().clone();
    let own_id = own.id.ok_or("own id is unset")?;
    let bits = state.bits() as usize;

    let successor = service.find_successor(state.finger_start(0), peer).await;
    if successor.is_null() {
        return Err(format!("join peer {} could not resolve our successor", peer).into());
    }
    state.set_successor(successor.clone());

    let predecessor = service.get_predecessor_of(&successor).await;
    state.set_predecessor(predecessor);

    let mut successor_client = service.clients().connect(&successor).await?;
    successor_client
        .set_predecessor(Request::new((&own).into()))
        .await?;
    info!("inserted between {} and its old predecessor", successor);

    for i in 0..bits - 1 {
        let next_start = state.finger_start(i + 1);
        let current = state.finger(i);
        let reuse = match current.id {
            Some(current_id) => is_between(next_start, own_id, current_id, true, false),
            None => false,
        };
        if reuse {
            state.set_finger(i + 1, current);
        } else {
            let responsible = service.find_successor(next_start, peer).await;
            if !responsible.is_null() {
                state.set_finger(i + 1, responsible);
            }
        }
    }
    info!("initialized finger table from peer");
    Ok(())
}

/// Tells every node whose finger table must now contain us to update the
/// affected entry: for each i, the predecessor of `(own - 2^i) mod 2^m`.
async fn update_others(service: &ChordService) {
    let state = service.state();
    let own = state.own().clone();
    let own_id = match own.id {
        Some(own_id) => own_id,
        None => return,
    };
    let space = mask(state.bits());

    for i in 0..state.bits() {
        let target = own_id.wrapping_sub(1u64 << i) & space;
        let mut node_to_update = service.find_predecessor(target).await;
        if node_to_update.is_null() {
            continue;
        }
        if node_to_update.id == own.id {
            // the walk ended on ourselves: hand the update to our predecessor
            node_to_update = state.predecessor();
            if node_to_update.is_null() || node_to_update.id == own.id {
                continue;
            }
        }
        match service.clients().connect(&node_to_update).await {
            Ok(mut client) => {
                let request = UpdateFingerTableRequest {
                    node: Some((&own).into()),
                    index: i as u32,
                };
                if let Err(status) = client.update_finger_table(Request::new(request)).await {
                    warn!(
                        "update_others -> update_finger_table on {}:{} failed: {}",
                        node_to_update.host,
                        node_to_update.port,
                        status.message()
                    );
                }
            }
            Err(status) => {
                warn!(
                    "update_others -> connect on {}:{} failed: {}",
                    node_to_update.host,
                    node_to_update.port,
                    status.message()
                );
            }
        }
    }
    info!("finished updating other nodes");
}

/// Storage hook, invoked exactly once after the finger table is built and
/// before the maintenance loops start. The ring core only requires that it
/// terminates; failures are logged by the caller and swallowed.
// TODO: hand off keys from the new successor once a storage backend is attached
fn migrate_keys_after_join(_service: &ChordService) -> Result<(), BoxedError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::cli::Cli;
    use clap::Parser;

    fn config(args: &[&str]) -> Config {
        let mut argv = vec!["chord-ring"];
        argv.extend_from_slice(args);
        Config::load(&Cli::parse_from(argv)).unwrap()
    }

    #[test]
    fn explicit_ids_take_precedence_over_the_hash() {
        let config = config(&["--grpc", "127.0.0.1:5601", "--id", "5", "--bits", "3"]);
        let (own, known) = resolve_identities(&config).unwrap();
        assert_eq!(own.id, Some(5));
        assert!(known.is_none());
    }

    #[test]
    fn colliding_identities_are_rejected() {
        let config = config(&[
            "--grpc",
            "127.0.0.1:5601",
            "--id",
            "5",
            "--peer",
            "127.0.0.1:5602",
            "--peer-id",
            "5",
            "--bits",
            "3",
        ]);
        assert!(resolve_identities(&config).is_err());
    }

    #[test]
    fn ids_outside_the_ring_are_rejected() {
        let config = config(&["--grpc", "127.0.0.1:5601", "--id", "9", "--bits", "3"]);
        assert!(resolve_identities(&config).is_err());
    }

    #[test]
    fn rejoining_through_oneself_counts_as_a_lone_start() {
        let config = config(&[
            "--grpc",
            "127.0.0.1:5601",
            "--id",
            "5",
            "--peer",
            "127.0.0.1:5601",
            "--peer-id",
            "5",
            "--bits",
            "3",
        ]);
        let (own, known) = resolve_identities(&config).unwrap();
        assert_eq!(own.id, known.unwrap().id);
    }
}
