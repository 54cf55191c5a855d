//! Hand-off from the scheduler to whatever runs containers.
//!
//! The scheduler only sends orders through an [`Executor`]. Progress comes back
//! as [`tgp_proto::ExecutorReport`] messages passed to
//! [`SchedulerService::report_node_result`](crate::SchedulerService::report_node_result).

use std::fmt;

use parking_lot::Mutex;
use tgp_proto::{DispatchOrder, JobId, NodeId};
use thiserror::Error;
use tracing::debug;

/// Errors from dispatching work to a node.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    /// No live connection to the node.
    #[error("node {0} is not connected")]
    NotConnected(NodeId),

    /// The node's queue is full or closed.
    #[error("failed to deliver to node {node_id}: {message}")]
    Delivery {
        /// Target node.
        node_id: NodeId,
        /// Cause.
        message: String,
    },
}

/// Sends work to nodes.
///
/// Implementations must not block: they are called right after a placement
/// decision on the submitting caller's thread.
pub trait Executor: Send + Sync + fmt::Debug {
    /// Ask `node_id` to start the job described by `order`.
    ///
    /// # Errors
    ///
    /// Returns an error if the order cannot be delivered. The scheduler then
    /// fails the job and frees its reservation.
    fn dispatch(&self, node_id: &NodeId, order: &DispatchOrder) -> Result<(), ExecutorError>;

    /// Ask `node_id` to stop a job. Best effort.
    fn cancel(&self, node_id: &NodeId, job_id: &JobId, reason: &str);
}

/// Accepts every order and does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpExecutor;

impl Executor for NoOpExecutor {
    fn dispatch(&self, node_id: &NodeId, order: &DispatchOrder) -> Result<(), ExecutorError> {
        debug!(node_id = %node_id, job_id = %order.job_id, "NoOp dispatch");
        Ok(())
    }

    fn cancel(&self, node_id: &NodeId, job_id: &JobId, reason: &str) {
        debug!(node_id = %node_id, job_id = %job_id, reason, "NoOp cancel");
    }
}

/// A call observed by [`RecordingExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorCall {
    /// `dispatch` was called.
    Dispatch {
        /// Target node.
        node_id: NodeId,
        /// Job.
        job_id: JobId,
    },
    /// `cancel` was called.
    Cancel {
        /// Target node.
        node_id: NodeId,
        /// Job.
        job_id: JobId,
    },
}

/// Records every call, and can be told to refuse dispatches to given nodes.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<ExecutorCall>>,
    unreachable: Mutex<Vec<NodeId>>,
}

impl RecordingExecutor {
    /// Creates a new recording executor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make dispatches to `node_id` fail with [`ExecutorError::NotConnected`].
    pub fn set_unreachable(&self, node_id: NodeId) {
        self.unreachable.lock().push(node_id);
    }

    /// Calls seen so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ExecutorCall> {
        self.calls.lock().clone()
    }

    /// Jobs dispatched so far, in order.
    #[must_use]
    pub fn dispatched(&self) -> Vec<JobId> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                ExecutorCall::Dispatch { job_id, .. } => Some(job_id.clone()),
                ExecutorCall::Cancel { .. } => None,
            })
            .collect()
    }
}

impl Executor for RecordingExecutor {
    fn dispatch(&self, node_id: &NodeId, order: &DispatchOrder) -> Result<(), ExecutorError> {
        if self.unreachable.lock().contains(node_id) {
            return Err(ExecutorError::NotConnected(node_id.clone()));
        }
        self.calls.lock().push(ExecutorCall::Dispatch {
            node_id: node_id.clone(),
            job_id: order.job_id.clone(),
        });
        Ok(())
    }

    fn cancel(&self, node_id: &NodeId, job_id: &JobId, _reason: &str) {
        self.calls.lock().push(ExecutorCall::Cancel {
            node_id: node_id.clone(),
            job_id: job_id.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgp_proto::{JobSpec, Resources};

    fn order(id: &str) -> DispatchOrder {
        DispatchOrder::from(&JobSpec::new(JobId::new(id), Resources::new(1000, 1024, 0)))
    }

    #[test]
    fn test_noop_accepts_everything() {
        let exec = NoOpExecutor;
        assert!(exec.dispatch(&NodeId::new("n1"), &order("j1")).is_ok());
        exec.cancel(&NodeId::new("n1"), &JobId::new("j1"), "test");
    }

    #[test]
    fn test_recording_executor() {
        let exec = RecordingExecutor::new();
        exec.dispatch(&NodeId::new("n1"), &order("j1")).unwrap();
        exec.cancel(&NodeId::new("n1"), &JobId::new("j1"), "timeout");

        assert_eq!(exec.dispatched(), vec![JobId::new("j1")]);
        assert_eq!(exec.calls().len(), 2);
    }

    #[test]
    fn test_unreachable_node() {
        let exec = RecordingExecutor::new();
        exec.set_unreachable(NodeId::new("n1"));
        let err = exec.dispatch(&NodeId::new("n1"), &order("j1")).unwrap_err();
        assert_eq!(err, ExecutorError::NotConnected(NodeId::new("n1")));
        assert_eq!(err.to_string(), "node n1 is not connected");
        assert!(exec.dispatched().is_empty());
    }
}
