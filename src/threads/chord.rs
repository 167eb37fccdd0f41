use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};
use rand::Rng;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Response, Status};

use crate::node::conversions::node_from_msg;
use crate::node::node_ref::NodeRef;
use crate::node::state::NodeState;
use crate::threads::chord::chord_proto::chord_client::ChordClient;
use crate::threads::chord::chord_proto::{
    ClosestPrecedingFingerRequest, Empty, FindSuccessorRequest, NodeMsg, NodeSummaryMsg,
    UpdateFingerTableRequest,
};
use crate::utils::constants::{DEBUG_RPCS_UNAVAILABLE_ERROR_MESSAGE, RPC_TIMEOUT_MILLIS};
use crate::utils::crypto::{is_between, mask, HashPos};

pub mod chord_proto {
    tonic::include_proto!("chord");

    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("chord_descriptor");
}

/// Per-node client factory. Channels are cached by peer address and shared
/// between concurrent callers; a failed call drops the cache entry so the
/// next attempt starts from a fresh connection.
#[derive(Clone, Default)]
pub struct ClientFactory {
    channels: Arc<Mutex<HashMap<(String, u16), Channel>>>,
}

impl ClientFactory {
    pub async fn connect(&self, node: &NodeRef) -> Result<ChordClient<Channel>, Status> {
        if node.is_null() || node.host.is_empty() {
            return Err(Status::invalid_argument("cannot connect to the null node"));
        }
        let key = (node.host.clone(), node.port);
        let cached = self.channels.lock().unwrap().get(&key).cloned();
        let channel = match cached {
            Some(channel) => channel,
            None => {
                let endpoint = Endpoint::from_shared(format!("http://{}", node.address()))
                    .map_err(|e| {
                        Status::invalid_argument(format!("bad peer address {}: {}", node.address(), e))
                    })?
                    .timeout(Duration::from_millis(RPC_TIMEOUT_MILLIS))
                    .connect_timeout(Duration::from_millis(RPC_TIMEOUT_MILLIS));
                let channel = endpoint.connect_lazy();
                self.channels.lock().unwrap().insert(key, channel.clone());
                channel
            }
        };
        Ok(ChordClient::new(channel))
    }

    pub fn invalidate(&self, node: &NodeRef) {
        let key = (node.host.clone(), node.port);
        self.channels.lock().unwrap().remove(&key);
    }
}

/// The struct representing the running node: the full routing logic plus the
/// gRPC surface exposing it. Remote wrappers are thin, so asking a node over
/// the wire yields exactly what the node would compute for itself.
#[derive(Clone)]
pub struct ChordService {
    state: NodeState,
    clients: ClientFactory,
    dev_mode: bool,
}

impl ChordService {
    pub fn new(state: NodeState, clients: ClientFactory, dev_mode: bool) -> ChordService {
        ChordService {
            state,
            clients,
            dev_mode,
        }
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub fn clients(&self) -> &ClientFactory {
        &self.clients
    }

    fn is_self(&self, node: &NodeRef) -> bool {
        !node.is_null() && node.id == self.state.own().id
    }

    /// Peer failures are all equivalent here: log who failed on behalf of
    /// what, drop the cached channel, and let the periodic tasks repair.
    fn rpc_failure(&self, local_method: &str, remote_method: &str, peer: &NodeRef, cause: &Status) {
        warn!(
            "{} -> {} on {}:{} failed: {}",
            local_method,
            remote_method,
            peer.host,
            peer.port,
            cause.message()
        );
        self.clients.invalidate(peer);
    }

    /// Finds the node responsible for `id`, asking `node`. The call runs
    /// locally when `node` is this node and forwards over gRPC otherwise;
    /// any failure yields the null node.
    pub async fn find_successor(&self, id: HashPos, node: &NodeRef) -> NodeRef {
        if self.is_self(node) {
            let predecessor = self.find_predecessor(id).await;
            if predecessor.is_null() {
                return NodeRef::null();
            }
            return self.get_successor_of(&predecessor).await;
        }
        match self.clients.connect(node).await {
            Ok(mut client) => {
                let request = FindSuccessorRequest {
                    id,
                    node: Some(node.into()),
                };
                match client.find_successor_remote_helper(Request::new(request)).await {
                    Ok(response) => node_from_msg(Some(response.into_inner())),
                    Err(status) => {
                        self.rpc_failure("find_successor", "find_successor_remote_helper", node, &status);
                        NodeRef::null()
                    }
                }
            }
            Err(status) => {
                self.rpc_failure("find_successor", "connect", node, &status);
                NodeRef::null()
            }
        }
    }

    /// Walks the ring towards `id` by repeatedly hopping to the closest
    /// preceding finger, until `id` falls into `(current, successor]`. A hop
    /// failure returns the last node that still answered; a hop cap bounds
    /// the walk under pathological routing state.
    pub async fn find_predecessor(&self, id: HashPos) -> NodeRef {
        let mut current = self.state.own().clone();
        let mut successor = self.state.successor();
        let bits = self.state.bits();
        let hop_cap: u128 = (bits as u128) << bits;
        let mut hops: u128 = 0;

        loop {
            let (current_id, successor_id) = match (current.id, successor.id) {
                (Some(c), Some(s)) => (c, s),
                _ => break,
            };
            if current_id == successor_id {
                break;
            }
            if is_between(id, current_id, successor_id, false, true) {
                break;
            }
            if hops >= hop_cap {
                warn!("lookup for {} stopped at the hop cap", id);
                break;
            }
            hops += 1;

            let next = self.closest_preceding_finger(id, &current).await;
            if next.is_null() {
                return current;
            }
            if next.id == current.id {
                // no finger precedes id from here, current is our best answer
                break;
            }
            let next_successor = self.get_successor_of(&next).await;
            if next_successor.is_null() {
                return current;
            }
            current = next;
            successor = next_successor;
        }
        current
    }

    pub async fn closest_preceding_finger(&self, id: HashPos, node: &NodeRef) -> NodeRef {
        if self.is_self(node) {
            return self.local_closest_preceding_finger(id, node);
        }
        match self.clients.connect(node).await {
            Ok(mut client) => {
                let request = ClosestPrecedingFingerRequest {
                    id,
                    node: Some(node.into()),
                };
                match client
                    .closest_preceding_finger_remote_helper(Request::new(request))
                    .await
                {
                    Ok(response) => node_from_msg(Some(response.into_inner())),
                    Err(status) => {
                        self.rpc_failure(
                            "closest_preceding_finger",
                            "closest_preceding_finger_remote_helper",
                            node,
                            &status,
                        );
                        NodeRef::null()
                    }
                }
            }
            Err(status) => {
                self.rpc_failure("closest_preceding_finger", "connect", node, &status);
                NodeRef::null()
            }
        }
    }

    /// Highest finger whose successor lies strictly between the queried node
    /// and `id`; falls back to the queried node itself.
    pub fn local_closest_preceding_finger(&self, id: HashPos, node_queried: &NodeRef) -> NodeRef {
        let queried_id = match node_queried.id {
            Some(queried_id) => queried_id,
            None => return node_queried.clone(),
        };
        for entry in self.state.fingers_snapshot().iter().rev() {
            if let Some(finger_id) = entry.successor.id {
                if is_between(finger_id, queried_id, id, false, false) {
                    return entry.successor.clone();
                }
            }
        }
        node_queried.clone()
    }

    pub async fn get_successor_of(&self, node: &NodeRef) -> NodeRef {
        if self.is_self(node) {
            return self.state.successor();
        }
        match self.clients.connect(node).await {
            Ok(mut client) => {
                let request: NodeMsg = node.into();
                match client.get_successor_remote_helper(Request::new(request)).await {
                    Ok(response) => node_from_msg(Some(response.into_inner())),
                    Err(status) => {
                        self.rpc_failure("get_successor", "get_successor_remote_helper", node, &status);
                        NodeRef::null()
                    }
                }
            }
            Err(status) => {
                self.rpc_failure("get_successor", "connect", node, &status);
                NodeRef::null()
            }
        }
    }

    pub async fn get_predecessor_of(&self, node: &NodeRef) -> NodeRef {
        if self.is_self(node) {
            return self.state.predecessor();
        }
        match self.clients.connect(node).await {
            Ok(mut client) => match client.get_predecessor(Request::new(Empty {})).await {
                Ok(response) => node_from_msg(Some(response.into_inner())),
                Err(status) => {
                    self.rpc_failure("get_predecessor", "get_predecessor", node, &status);
                    NodeRef::null()
                }
            },
            Err(status) => {
                self.rpc_failure("get_predecessor", "connect", node, &status);
                NodeRef::null()
            }
        }
    }

    pub async fn notify_peer(&self, peer: &NodeRef) {
        if self.is_self(peer) {
            self.local_notify(self.state.own().clone());
            return;
        }
        match self.clients.connect(peer).await {
            Ok(mut client) => {
                let request: NodeMsg = self.state.own().into();
                if let Err(status) = client.notify(Request::new(request)).await {
                    self.rpc_failure("stabilize", "notify", peer, &status);
                }
            }
            Err(status) => self.rpc_failure("stabilize", "connect", peer, &status),
        }
    }

    /// Adopts `node` as predecessor when none is known or when it falls into
    /// the arc between the current predecessor and this node.
    pub fn local_notify(&self, node: NodeRef) {
        let node_id = match node.id {
            Some(node_id) => node_id,
            None => return,
        };
        let own_id = match self.state.own().id {
            Some(own_id) => own_id,
            None => return,
        };
        let predecessor = self.state.predecessor();
        let adopt = match predecessor.id {
            None => true,
            Some(predecessor_id) => is_between(node_id, predecessor_id, own_id, false, false),
        };
        if adopt {
            debug!("adopting {} as predecessor due to notify", node);
            self.state.set_predecessor(node);
        }
    }

    /// One round of successor repair: pull the successor's predecessor, adopt
    /// it when it sits between us, notify downstream, reconcile the list.
    pub async fn stabilize(&self) {
        let own = self.state.own().clone();
        let successor = self.state.successor();

        let candidate = if successor.id == own.id {
            if !self.stabilize_self().await {
                debug!("node has no live peers and no predecessor, staying degenerate");
            }
            own.clone()
        } else {
            self.get_predecessor_of(&successor).await
        };

        if let (Some(candidate_id), Some(own_id), Some(successor_id)) =
            (candidate.id, own.id, successor.id)
        {
            if is_between(candidate_id, own_id, successor_id, false, false) {
                debug!("stabilize adopts {} as immediate successor", candidate);
                self.state.set_successor(candidate);
            }
        }

        let successor = self.state.successor();
        self.notify_peer(&successor).await;

        self.update_successor_table().await;
    }

    /// Degenerate-ring handling for a node whose successor is itself: when a
    /// live predecessor exists, kick the ring back into shape by adopting it
    /// as successor. A node that is its own predecessor is genuinely alone.
    pub async fn stabilize_self(&self) -> bool {
        let predecessor = self.state.predecessor();
        if predecessor.is_null() {
            return false;
        }
        if predecessor.id == self.state.own().id {
            return true;
        }
        if self.check_predecessor().await {
            self.state.set_successor(self.state.predecessor());
            true
        } else {
            false
        }
    }

    /// Refreshes one randomly chosen finger above the successor slot.
    pub async fn fix_fingers(&self) {
        let bits = self.state.bits() as usize;
        if bits < 2 {
            return;
        }
        let index = { rand::thread_rng().gen_range(1..bits) };
        let start = self.state.finger_start(index);
        debug!("fixing finger {} (start {})", index, start);
        let own = self.state.own().clone();
        let responsible = self.find_successor(start, &own).await;
        if !responsible.is_null() {
            self.state.set_finger(index, responsible);
        }
    }

    /// Probes the predecessor with a lightweight RPC; wipes the handle when
    /// the probe fails so that notify can install a live replacement.
    pub async fn check_predecessor(&self) -> bool {
        let predecessor = self.state.predecessor();
        if predecessor.is_null() {
            return false;
        }
        if predecessor.id == self.state.own().id {
            return true;
        }
        match self.clients.connect(&predecessor).await {
            Ok(mut client) => match client.get_predecessor(Request::new(Empty {})).await {
                Ok(_) => true,
                Err(status) => {
                    self.rpc_failure("check_predecessor", "get_predecessor", &predecessor, &status);
                    self.state.set_predecessor(NodeRef::null());
                    false
                }
            },
            Err(status) => {
                self.rpc_failure("check_predecessor", "connect", &predecessor, &status);
                self.state.set_predecessor(NodeRef::null());
                false
            }
        }
    }

    pub async fn check_successor(&self) -> bool {
        let successor = self.state.successor();
        if successor.id == self.state.own().id {
            return true;
        }
        !self.get_successor_of(&successor).await.is_null()
    }

    /// Successor-list reconciliation: mirror a live successor into slot 0,
    /// otherwise shift dead heads away, then extend the list with successors
    /// of successors and prune it back to capacity. Best effort throughout.
    pub async fn update_successor_table(&self) {
        let own = self.state.own().clone();

        if self.check_successor().await {
            self.state.mirror_successor_into_list();
        } else {
            loop {
                let promoted = self.state.promote_next_successor();
                if promoted.id == own.id {
                    // list drained down to ourselves
                    break;
                }
                if self.check_successor().await {
                    break;
                }
            }
        }

        let capacity = self.state.bits() as usize;
        let own_id = match own.id {
            Some(own_id) => own_id,
            None => return,
        };

        let mut index = 0;
        while index < self.state.successor_count() && self.state.successor_count() < capacity {
            let entry = match self.state.successor_at(index) {
                Some(entry) => entry,
                None => break,
            };
            if entry.id == own.id && self.state.successor_count() == 1 {
                // alone, nothing to extend from
                break;
            }
            let next = self.get_successor_of(&entry).await;
            if let (Some(next_id), Some(entry_id)) = (next.id, entry.id) {
                if !is_between(next_id, own_id, entry_id, true, true) {
                    self.state.insert_successor_after(index, next);
                }
            }
            index += 1;
        }

        self.state.truncate_successors();
        loop {
            let last = match self.state.successors_snapshot().last().cloned() {
                Some(last) => last,
                None => break,
            };
            if last.id == own.id {
                break;
            }
            if self.get_successor_of(&last).await.is_null() {
                self.state.drop_last_successor();
            } else {
                break;
            }
        }
        self.state.mirror_successor_into_list();
    }

    /// Adopts `node` for finger `index` when it falls into the covered arc,
    /// then pushes the update counter-clockwise through the predecessor.
    pub async fn apply_finger_update(&self, node: NodeRef, index: usize) {
        if index >= self.state.bits() as usize {
            warn!("ignoring finger update for out-of-range index {}", index);
            return;
        }
        let (node_id, own_id) = match (node.id, self.state.own().id) {
            (Some(node_id), Some(own_id)) => (node_id, own_id),
            _ => return,
        };
        if node_id == own_id {
            return;
        }
        let current = self.state.finger(index);
        let current_id = match current.id {
            Some(current_id) => current_id,
            None => return,
        };
        if !is_between(node_id, own_id, current_id, true, false) {
            return;
        }
        debug!("finger {} now points at {}", index, node);
        self.state.set_finger(index, node.clone());

        let predecessor = self.state.predecessor();
        if predecessor.is_null() || predecessor.id == self.state.own().id || predecessor.id == node.id
        {
            return;
        }
        match self.clients.connect(&predecessor).await {
            Ok(mut client) => {
                let request = UpdateFingerTableRequest {
                    node: Some(node.into()),
                    index: index as u32,
                };
                if let Err(status) = client.update_finger_table(Request::new(request)).await {
                    self.rpc_failure("update_finger_table", "update_finger_table", &predecessor, &status);
                }
            }
            Err(status) => {
                self.rpc_failure("update_finger_table", "connect", &predecessor, &status);
            }
        }
    }
}

#[tonic::async_trait]
impl chord_proto::chord_server::Chord for ChordService {
    /// Identity of this node; also serves as the liveness probe.
    async fn summary(&self, _: Request<Empty>) -> Result<Response<NodeMsg>, Status> {
        Ok(Response::new(self.state.own().into()))
    }

    async fn find_successor_remote_helper(
        &self,
        request: Request<FindSuccessorRequest>,
    ) -> Result<Response<NodeMsg>, Status> {
        let request = request.into_inner();
        let id = request.id & mask(self.state.bits());
        let node = node_from_msg(request.node);
        debug!("received find_successor call for {}", id);
        Ok(Response::new(self.find_successor(id, &node).await.into()))
    }

    async fn get_successor_remote_helper(
        &self,
        _: Request<NodeMsg>,
    ) -> Result<Response<NodeMsg>, Status> {
        Ok(Response::new(self.state.successor().into()))
    }

    async fn closest_preceding_finger_remote_helper(
        &self,
        request: Request<ClosestPrecedingFingerRequest>,
    ) -> Result<Response<NodeMsg>, Status> {
        let request = request.into_inner();
        let id = request.id & mask(self.state.bits());
        let node = node_from_msg(request.node);
        Ok(Response::new(
            self.local_closest_preceding_finger(id, &node).into(),
        ))
    }

    async fn get_predecessor(&self, _: Request<Empty>) -> Result<Response<NodeMsg>, Status> {
        Ok(Response::new(self.state.predecessor().into()))
    }

    async fn set_predecessor(&self, request: Request<NodeMsg>) -> Result<Response<Empty>, Status> {
        let node: NodeRef = request.into_inner().into();
        debug!("setting predecessor to {}", node);
        self.state.set_predecessor(node);
        Ok(Response::new(Empty {}))
    }

    async fn notify(&self, request: Request<NodeMsg>) -> Result<Response<Empty>, Status> {
        let node: NodeRef = request.into_inner().into();
        self.local_notify(node);
        Ok(Response::new(Empty {}))
    }

    async fn update_finger_table(
        &self,
        request: Request<UpdateFingerTableRequest>,
    ) -> Result<Response<Empty>, Status> {
        let request = request.into_inner();
        let node = node_from_msg(request.node);
        self.apply_finger_update(node, request.index as usize).await;
        Ok(Response::new(Empty {}))
    }

    async fn stabilize(&self, _: Request<Empty>) -> Result<Response<Empty>, Status> {
        ChordService::stabilize(self).await;
        Ok(Response::new(Empty {}))
    }

    async fn fix_fingers(&self, _: Request<Empty>) -> Result<Response<Empty>, Status> {
        ChordService::fix_fingers(self).await;
        Ok(Response::new(Empty {}))
    }

    async fn check_predecessor(&self, _: Request<Empty>) -> Result<Response<Empty>, Status> {
        ChordService::check_predecessor(self).await;
        Ok(Response::new(Empty {}))
    }

    async fn get_node_summary(&self, _: Request<Empty>) -> Result<Response<NodeSummaryMsg>, Status> {
        if !self.dev_mode {
            return Err(Status::unimplemented(DEBUG_RPCS_UNAVAILABLE_ERROR_MESSAGE));
        }
        Ok(Response::new(NodeSummaryMsg {
            node: Some(self.state.own().into()),
            predecessor: Some(self.state.predecessor().into()),
            fingers: self
                .state
                .fingers_snapshot()
                .into_iter()
                .map(Into::into)
                .collect(),
            successor_list: self
                .state
                .successors_snapshot()
                .into_iter()
                .map(Into::into)
                .collect(),
        }))
    }
}
