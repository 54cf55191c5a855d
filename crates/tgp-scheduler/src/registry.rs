//! Cluster registry: the authoritative record of nodes, capacity, and liveness.
//!
//! All mutations go through a single `RwLock`, so two concurrent reservations
//! against the same node are serialized and can never both succeed past its
//! capacity. Readers receive clones ([`ClusterSnapshot`]); no caller ever holds
//! a reference into the registry.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tgp_proto::{NodeId, NodeInfo, NodeSpec, NodeStatus, ProtoError, Resources};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The node id was never registered.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// The node was evicted and must register again.
    #[error("node {0} was evicted and must re-register")]
    NodeEvicted(NodeId),

    /// The node is not accepting reservations.
    #[error("node {node_id} is {status}")]
    NodeNotActive {
        /// Node id.
        node_id: NodeId,
        /// Its current liveness.
        status: NodeStatus,
    },

    /// The reservation does not fit in the node's free capacity.
    #[error("capacity exceeded on {node_id}: requested {requested}, free {free}")]
    CapacityExceeded {
        /// Node id.
        node_id: NodeId,
        /// What was asked for.
        requested: Resources,
        /// What was free.
        free: Resources,
    },

    /// Re-registration declared less capacity than is currently reserved.
    #[error("node {node_id} declares {declared} but {reserved} is reserved")]
    CapacityBelowReservation {
        /// Node id.
        node_id: NodeId,
        /// Newly declared capacity.
        declared: Resources,
        /// Currently reserved.
        reserved: Resources,
    },

    /// The node spec failed validation.
    #[error("invalid node spec: {0}")]
    InvalidSpec(#[from] ProtoError),

    /// Reservation bookkeeping is inconsistent. Indicates a bug.
    #[error("registry invariant violated: {0}")]
    InvariantViolation(String),
}

/// Proof of a successful reservation, required to release it.
///
/// The epoch ties the token to one incarnation of the node. Eviction starts a
/// new epoch, so releasing a token issued before the eviction is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentToken {
    /// Node holding the reservation.
    pub node_id: NodeId,
    /// Reserved resources.
    pub request: Resources,
    /// Node epoch at reservation time.
    pub epoch: u64,
}

/// A node taken out of service by [`ClusterRegistry::evict_stale`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eviction {
    /// Evicted node.
    pub node_id: NodeId,
    /// The epoch that began with the eviction.
    pub epoch: u64,
}

impl Eviction {
    /// Whether `token` was issued before this eviction and so lost its
    /// reservation with it.
    #[must_use]
    pub fn revoked(&self, token: &AssignmentToken) -> bool {
        token.node_id == self.node_id && token.epoch < self.epoch
    }
}

/// A node's state as held by the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// What the node declared at registration.
    pub spec: NodeSpec,
    /// Sum of active reservations.
    pub reserved: Resources,
    /// Liveness.
    pub status: NodeStatus,
    /// First registration time.
    pub registered_at: DateTime<Utc>,
    /// Last heartbeat or registration.
    pub last_heartbeat: DateTime<Utc>,
    /// Free capacity the worker last reported about itself.
    pub reported_free: Option<Resources>,
    /// Incremented on eviction.
    pub epoch: u64,
}

impl Node {
    /// Create an active node with nothing reserved.
    #[must_use]
    pub fn new(spec: NodeSpec, now: DateTime<Utc>) -> Self {
        Self {
            spec,
            reserved: Resources::ZERO,
            status: NodeStatus::Active,
            registered_at: now,
            last_heartbeat: now,
            reported_free: None,
            epoch: 0,
        }
    }

    /// Node id.
    #[must_use]
    pub const fn id(&self) -> &NodeId {
        &self.spec.id
    }

    /// Capacity not currently reserved.
    #[must_use]
    pub const fn free(&self) -> Resources {
        self.spec.capacity.saturating_sub(&self.reserved)
    }

    /// Time since the last heartbeat, zero if the clock went backwards.
    #[must_use]
    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_heartbeat).to_std().unwrap_or_default()
    }

    /// Client-facing view.
    #[must_use]
    pub fn to_info(&self) -> NodeInfo {
        NodeInfo {
            id: self.spec.id.clone(),
            hostname: self.spec.hostname.clone(),
            location: self.spec.zone.clone(),
            capacity: self.spec.capacity,
            reserved: self.reserved,
            cost_per_hour_usd: self.spec.price_per_hour_usd,
            on_premise: self.spec.on_premise,
            status: self.status,
            last_heartbeat: self.last_heartbeat,
        }
    }
}

/// Immutable point-in-time copy of every node, ordered by id.
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
    /// Nodes ordered by id.
    pub nodes: Vec<Node>,
}

impl ClusterSnapshot {
    /// Build a snapshot from node records.
    #[must_use]
    pub fn new(taken_at: DateTime<Utc>, mut nodes: Vec<Node>) -> Self {
        nodes.sort_by(|a, b| a.id().cmp(b.id()));
        Self { taken_at, nodes }
    }

    /// Look up a node.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes
            .binary_search_by(|n| n.id().cmp(id))
            .ok()
            .map(|idx| &self.nodes[idx])
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the snapshot has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of nodes with the given status.
    #[must_use]
    pub fn count_with_status(&self, status: NodeStatus) -> usize {
        self.nodes.iter().filter(|n| n.status == status).count()
    }
}

/// Registry of cluster nodes.
#[derive(Debug, Default)]
pub struct ClusterRegistry {
    nodes: RwLock<BTreeMap<NodeId, Node>>,
}

impl ClusterRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node, or refresh an existing registration.
    ///
    /// Registration is idempotent by node id. Re-registering keeps the current
    /// reservations; an evicted node becomes active again.
    ///
    /// # Errors
    ///
    /// Returns an error if the spec is invalid or declares less capacity than
    /// is currently reserved on the node.
    pub fn register_node(&self, spec: NodeSpec) -> Result<NodeId, RegistryError> {
        self.register_node_at(spec, Utc::now())
    }

    /// [`register_node`](Self::register_node) with an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`register_node`](Self::register_node).
    pub fn register_node_at(
        &self,
        spec: NodeSpec,
        now: DateTime<Utc>,
    ) -> Result<NodeId, RegistryError> {
        spec.validate()?;
        let id = spec.id.clone();

        let mut nodes = self.nodes.write();
        match nodes.get_mut(&id) {
            Some(node) => {
                if !node.reserved.fits_within(&spec.capacity) {
                    return Err(RegistryError::CapacityBelowReservation {
                        node_id: id,
                        declared: spec.capacity,
                        reserved: node.reserved,
                    });
                }
                let previous = node.status;
                node.spec = spec;
                node.last_heartbeat = now;
                node.status = NodeStatus::Active;
                info!(node_id = %id, previous = %previous, epoch = node.epoch, "Node re-registered");
            }
            None => {
                info!(
                    node_id = %id,
                    zone = %spec.zone,
                    capacity = %spec.capacity,
                    price_per_hour = spec.price_per_hour_usd,
                    "Node registered"
                );
                nodes.insert(id.clone(), Node::new(spec, now));
            }
        }
        Ok(id)
    }

    /// Record a heartbeat.
    ///
    /// A suspected node becomes active again.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownNode`] if the node was never registered
    /// and [`RegistryError::NodeEvicted`] if it must register again.
    pub fn heartbeat(&self, node_id: &NodeId, reported_free: Resources) -> Result<(), RegistryError> {
        self.heartbeat_at(node_id, reported_free, Utc::now())
    }

    /// [`heartbeat`](Self::heartbeat) with an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`heartbeat`](Self::heartbeat).
    pub fn heartbeat_at(
        &self,
        node_id: &NodeId,
        reported_free: Resources,
        now: DateTime<Utc>,
    ) -> Result<(), RegistryError> {
        let mut nodes = self.nodes.write();
        let node = nodes
            .get_mut(node_id)
            .ok_or_else(|| RegistryError::UnknownNode(node_id.clone()))?;

        if node.status == NodeStatus::Evicted {
            return Err(RegistryError::NodeEvicted(node_id.clone()));
        }
        if node.status == NodeStatus::Suspected {
            info!(node_id = %node_id, "Node recovered");
        }
        node.status = NodeStatus::Active;
        node.last_heartbeat = now;
        node.reported_free = Some(reported_free);
        Ok(())
    }

    /// Consistent copy of every node.
    #[must_use]
    pub fn snapshot(&self) -> ClusterSnapshot {
        let nodes = self.nodes.read();
        ClusterSnapshot {
            taken_at: Utc::now(),
            nodes: nodes.values().cloned().collect(),
        }
    }

    /// Copy of one node.
    #[must_use]
    pub fn get(&self, node_id: &NodeId) -> Option<Node> {
        self.nodes.read().get(node_id).cloned()
    }

    /// Number of registered nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Whether no node is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Reserve capacity on a node.
    ///
    /// Succeeds only if the request fits the node's free capacity in every
    /// dimension; otherwise nothing changes.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CapacityExceeded`] if the request does not fit,
    /// [`RegistryError::NodeNotActive`] if the node is suspected or evicted,
    /// and [`RegistryError::UnknownNode`] for unknown ids.
    pub fn reserve(
        &self,
        node_id: &NodeId,
        request: &Resources,
    ) -> Result<AssignmentToken, RegistryError> {
        let mut nodes = self.nodes.write();
        let node = nodes
            .get_mut(node_id)
            .ok_or_else(|| RegistryError::UnknownNode(node_id.clone()))?;

        if !node.status.is_schedulable() {
            return Err(RegistryError::NodeNotActive {
                node_id: node_id.clone(),
                status: node.status,
            });
        }

        let free = node.free();
        if !request.fits_within(&free) {
            return Err(RegistryError::CapacityExceeded {
                node_id: node_id.clone(),
                requested: *request,
                free,
            });
        }

        node.reserved = node.reserved.checked_add(request).ok_or_else(|| {
            RegistryError::InvariantViolation(format!("reservation overflow on {node_id}"))
        })?;
        debug!(node_id = %node_id, request = %request, reserved = %node.reserved, "Capacity reserved");

        Ok(AssignmentToken {
            node_id: node_id.clone(),
            request: *request,
            epoch: node.epoch,
        })
    }

    /// Release a reservation.
    ///
    /// Tokens from an epoch that ended with an eviction are ignored: the
    /// eviction already returned their capacity.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvariantViolation`] if the node is unknown or
    /// the release would drive the reservation below zero. Both indicate a
    /// bookkeeping bug and are logged at error level.
    pub fn release(&self, token: &AssignmentToken) -> Result<(), RegistryError> {
        let mut nodes = self.nodes.write();
        let Some(node) = nodes.get_mut(&token.node_id) else {
            let msg = format!("release on unknown node {}", token.node_id);
            error!(node_id = %token.node_id, "{msg}");
            return Err(RegistryError::InvariantViolation(msg));
        };

        if token.epoch != node.epoch {
            debug!(
                node_id = %token.node_id,
                token_epoch = token.epoch,
                node_epoch = node.epoch,
                "Ignoring release from an earlier epoch"
            );
            return Ok(());
        }

        let Some(reserved) = node.reserved.checked_sub(&token.request) else {
            let msg = format!(
                "release of {} exceeds reservation {} on {}",
                token.request, node.reserved, token.node_id
            );
            error!(node_id = %token.node_id, "{msg}");
            return Err(RegistryError::InvariantViolation(msg));
        };
        node.reserved = reserved;
        debug!(node_id = %token.node_id, released = %token.request, reserved = %node.reserved, "Capacity released");
        Ok(())
    }

    /// Mark active nodes whose heartbeat is older than `after` as suspected.
    ///
    /// Returns the ids that changed state.
    pub fn mark_suspected(&self, after: Duration) -> Vec<NodeId> {
        self.mark_suspected_at(Utc::now(), after)
    }

    /// [`mark_suspected`](Self::mark_suspected) with an explicit clock.
    pub fn mark_suspected_at(&self, now: DateTime<Utc>, after: Duration) -> Vec<NodeId> {
        let mut nodes = self.nodes.write();
        let mut suspected = Vec::new();
        for node in nodes.values_mut() {
            if node.status == NodeStatus::Active && node.heartbeat_age(now) > after {
                node.status = NodeStatus::Suspected;
                warn!(
                    node_id = %node.id(),
                    age_secs = node.heartbeat_age(now).as_secs(),
                    "Node heartbeat late, marking suspected"
                );
                suspected.push(node.id().clone());
            }
        }
        suspected
    }

    /// Evict every non-evicted node whose heartbeat is older than `timeout`.
    ///
    /// Eviction zeroes the node's reservations and starts a new epoch in the
    /// same critical section, so it is linearizable with concurrent
    /// [`reserve`](Self::reserve) and [`release`](Self::release) calls.
    /// Returns one [`Eviction`] per node so the jobs holding revoked tokens
    /// can be requeued.
    pub fn evict_stale(&self, timeout: Duration) -> Vec<Eviction> {
        self.evict_stale_at(Utc::now(), timeout)
    }

    /// [`evict_stale`](Self::evict_stale) with an explicit clock.
    pub fn evict_stale_at(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<Eviction> {
        let mut nodes = self.nodes.write();
        let mut evicted = Vec::new();
        for node in nodes.values_mut() {
            if node.status != NodeStatus::Evicted && node.heartbeat_age(now) > timeout {
                warn!(
                    node_id = %node.id(),
                    age_secs = node.heartbeat_age(now).as_secs(),
                    released = %node.reserved,
                    "Evicting node after heartbeat timeout"
                );
                node.status = NodeStatus::Evicted;
                node.reserved = Resources::ZERO;
                node.epoch += 1;
                evicted.push(Eviction {
                    node_id: node.id().clone(),
                    epoch: node.epoch,
                });
            }
        }
        evicted
    }

    /// Verify that no node has more reserved than its capacity.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvariantViolation`] naming the first
    /// offending node.
    pub fn check_invariants(&self) -> Result<(), RegistryError> {
        let nodes = self.nodes.read();
        for node in nodes.values() {
            if !node.reserved.fits_within(&node.spec.capacity) {
                return Err(RegistryError::InvariantViolation(format!(
                    "node {} reserves {} of {}",
                    node.id(),
                    node.reserved,
                    node.spec.capacity
                )));
            }
        }
        Ok(())
    }
}
