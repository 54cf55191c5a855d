//! Worker sessions and the executor bridge.
//!
//! Each connected worker owns one outbound channel. The channel is stored in
//! [`WorkerSessions`] under the node id, and [`SessionExecutor`] pushes
//! `RunJob` and `CancelJob` orders into it without blocking.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tgp_proto::worker::error_codes;
use tgp_proto::{
    DispatchOrder, JobId, NodeId, SchedulerMessage, WORKER_PROTOCOL_VERSION, WorkerMessage,
};
use tgp_scheduler::{Executor, ExecutorError, RegistryError, SchedulerError, SchedulerService};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Outbound queue depth per worker.
pub const SESSION_CHANNEL_CAPACITY: usize = 64;

/// Sender half of a worker's outbound queue.
pub type SessionSender = mpsc::Sender<SchedulerMessage>;

/// Receiver half of a worker's outbound queue.
pub type SessionReceiver = mpsc::Receiver<SchedulerMessage>;

/// Create a worker outbound queue.
#[must_use]
pub fn session_channel() -> (SessionSender, SessionReceiver) {
    mpsc::channel(SESSION_CHANNEL_CAPACITY)
}

/// Live worker connections, keyed by node id.
#[derive(Debug, Clone, Default)]
pub struct WorkerSessions {
    inner: Arc<RwLock<HashMap<NodeId, SessionSender>>>,
}

impl WorkerSessions {
    /// An empty session table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `sender` to `node_id`, replacing any older connection.
    ///
    /// Returns the replaced sender so a failed registration can put it back.
    pub fn attach(&self, node_id: NodeId, sender: SessionSender) -> Option<SessionSender> {
        let previous = self.inner.write().insert(node_id.clone(), sender);
        if previous.is_some() {
            debug!(node_id = %node_id, "Replaced previous worker session");
        }
        previous
    }

    /// Undo an [`attach`](Self::attach) of `sender`, restoring `previous`.
    ///
    /// Does nothing if another connection attached in the meantime.
    pub fn reinstate(&self, node_id: &NodeId, sender: &SessionSender, previous: Option<SessionSender>) {
        let mut inner = self.inner.write();
        if !inner.get(node_id).is_some_and(|s| s.same_channel(sender)) {
            return;
        }
        match previous {
            Some(previous) => {
                inner.insert(node_id.clone(), previous);
            }
            None => {
                inner.remove(node_id);
            }
        }
    }

    /// Detach `node_id` if it is still served by `sender`.
    pub fn detach(&self, node_id: &NodeId, sender: &SessionSender) {
        let mut inner = self.inner.write();
        if inner.get(node_id).is_some_and(|s| s.same_channel(sender)) {
            inner.remove(node_id);
        }
    }

    /// Queue a message for a node.
    ///
    /// # Errors
    ///
    /// Returns an error if the node has no session or its queue is full.
    pub fn send(&self, node_id: &NodeId, msg: SchedulerMessage) -> Result<(), ExecutorError> {
        let sender = self
            .inner
            .read()
            .get(node_id)
            .cloned()
            .ok_or_else(|| ExecutorError::NotConnected(node_id.clone()))?;
        sender.try_send(msg).map_err(|e| ExecutorError::Delivery {
            node_id: node_id.clone(),
            message: e.to_string(),
        })
    }

    /// Whether a node has a live session.
    #[must_use]
    pub fn is_connected(&self, node_id: &NodeId) -> bool {
        self.inner.read().contains_key(node_id)
    }

    /// Number of connected workers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether no worker is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// Delivers scheduler orders over worker sessions.
#[derive(Debug, Clone)]
pub struct SessionExecutor {
    sessions: WorkerSessions,
}

impl SessionExecutor {
    /// Create an executor over `sessions`.
    #[must_use]
    pub const fn new(sessions: WorkerSessions) -> Self {
        Self { sessions }
    }
}

impl Executor for SessionExecutor {
    fn dispatch(&self, node_id: &NodeId, order: &DispatchOrder) -> Result<(), ExecutorError> {
        debug!(node_id = %node_id, job_id = %order.job_id, "Dispatching job");
        self.sessions.send(
            node_id,
            SchedulerMessage::RunJob {
                order: order.clone(),
            },
        )
    }

    fn cancel(&self, node_id: &NodeId, job_id: &JobId, reason: &str) {
        let msg = SchedulerMessage::CancelJob {
            job_id: job_id.clone(),
            reason: reason.to_string(),
        };
        if let Err(e) = self.sessions.send(node_id, msg) {
            debug!(node_id = %node_id, job_id = %job_id, error = %e, "Cancel not delivered");
        }
    }
}

/// State of one worker connection.
#[derive(Debug)]
pub struct WorkerSession {
    node_id: Option<NodeId>,
    outbound: SessionSender,
    sessions: WorkerSessions,
    heartbeat_interval_secs: u64,
}

impl WorkerSession {
    /// A connection that has not registered yet.
    #[must_use]
    pub const fn new(outbound: SessionSender, sessions: WorkerSessions, heartbeat_interval_secs: u64) -> Self {
        Self {
            node_id: None,
            outbound,
            sessions,
            heartbeat_interval_secs,
        }
    }

    /// The registered node, if any.
    #[must_use]
    pub const fn node_id(&self) -> Option<&NodeId> {
        self.node_id.as_ref()
    }

    /// Apply one worker message and return the reply, if any.
    pub fn handle(&mut self, msg: WorkerMessage, scheduler: &SchedulerService) -> Option<SchedulerMessage> {
        match msg {
            WorkerMessage::Register {
                spec,
                protocol_version,
            } => {
                if protocol_version != WORKER_PROTOCOL_VERSION {
                    return Some(SchedulerMessage::error(
                        error_codes::PROTOCOL_MISMATCH,
                        format!(
                            "protocol version mismatch: expected {WORKER_PROTOCOL_VERSION}, got {protocol_version}"
                        ),
                        false,
                    ));
                }

                let node_id = spec.id.clone();
                if let Err(e) = spec.validate() {
                    warn!(node_id = %node_id, error = %e, "Invalid node spec");
                    return Some(SchedulerMessage::error(error_codes::INVALID_SPEC, e.to_string(), false));
                }

                // The session must be reachable before the node can be chosen.
                let previous = self.sessions.attach(node_id.clone(), self.outbound.clone());
                match scheduler.register_node(spec) {
                    Ok(node_id) => {
                        if let Some(previous) = self.node_id.replace(node_id.clone()) {
                            if previous != node_id {
                                self.sessions.detach(&previous, &self.outbound);
                            }
                        }
                        Some(SchedulerMessage::Registered {
                            node_id,
                            heartbeat_interval_secs: self.heartbeat_interval_secs,
                        })
                    }
                    Err(e) => {
                        warn!(node_id = %node_id, error = %e, "Registration rejected");
                        self.sessions.reinstate(&node_id, &self.outbound, previous);
                        Some(SchedulerMessage::error(error_codes::INVALID_SPEC, e.to_string(), false))
                    }
                }
            }

            WorkerMessage::Heartbeat { node_id, free, .. } => {
                if let Some(reply) = self.require_registered(&node_id) {
                    return Some(reply);
                }
                match scheduler.heartbeat(&node_id, free) {
                    Ok(()) => Some(SchedulerMessage::HeartbeatAck {
                        timestamp: chrono::Utc::now(),
                    }),
                    Err(SchedulerError::Registry(RegistryError::NodeEvicted(_))) => {
                        info!(node_id = %node_id, "Heartbeat from evicted node, asking it to re-register");
                        Some(SchedulerMessage::error(
                            error_codes::NODE_EVICTED,
                            format!("node {node_id} was evicted"),
                            true,
                        ))
                    }
                    Err(e) => {
                        warn!(node_id = %node_id, error = %e, "Heartbeat rejected");
                        Some(SchedulerMessage::error(error_codes::UNKNOWN_NODE, e.to_string(), true))
                    }
                }
            }

            WorkerMessage::JobUpdate {
                node_id,
                job_id,
                report,
            } => {
                if let Some(reply) = self.require_registered(&node_id) {
                    return Some(reply);
                }
                if let Err(e) = scheduler.report_node_result(&job_id, &node_id, report) {
                    warn!(node_id = %node_id, job_id = %job_id, error = %e, "Job update rejected");
                }
                None
            }
        }
    }

    fn require_registered(&self, node_id: &NodeId) -> Option<SchedulerMessage> {
        if self.node_id.as_ref() == Some(node_id) {
            return None;
        }
        warn!(node_id = %node_id, session_node = ?self.node_id, "Message for a node this session did not register");
        Some(SchedulerMessage::error(
            error_codes::NOT_REGISTERED,
            format!("node {node_id} is not registered on this connection"),
            true,
        ))
    }

    /// Remove this connection from the session table.
    pub fn close(&self) {
        if let Some(node_id) = &self.node_id {
            self.sessions.detach(node_id, &self.outbound);
            info!(node_id = %node_id, "Worker session closed");
        }
    }
}
