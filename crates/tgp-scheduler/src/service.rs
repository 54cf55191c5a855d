//! The scheduler service: job submission, lifecycle, and queries.
//!
//! # Locking
//!
//! The job table sits behind one mutex and the registry behind its own lock.
//! Whenever both are needed the job table is locked first. Placement scoring
//! runs on a snapshot with no lock held; only the reservation and the state
//! change that records it happen under the job table lock. Executor calls are
//! always made after every lock is released.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tgp_cost::{CostBreakdown, CostError, validate_input};
use tgp_proto::{
    Assignment, ClusterSummary, DispatchOrder, ExecutorReport, FailureReason, JobId, JobSpec,
    JobState, JobStatus, NodeId, NodeInfo, NodeSpec, NodeStatus, PlacementOutcome, ProtoError,
    Resources,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::executor::{Executor, ExecutorError, NoOpExecutor};
use crate::job::{JobRecord, JobTable, LifecycleError};
use crate::latency::{LatencyModel, LoadAwareLatency};
use crate::optimizer::{Infeasible, Optimizer};
use crate::registry::{AssignmentToken, ClusterRegistry, Eviction, RegistryError};

/// Errors returned by [`SchedulerService`].
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The job spec failed validation.
    #[error("invalid job: {0}")]
    InvalidJob(#[from] ProtoError),

    /// A numeric cost input is negative or not finite.
    #[error("invalid cost input: {0}")]
    InvalidCostInput(#[from] CostError),

    /// No job with this id.
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// A job with this id was already submitted.
    #[error("job already exists: {0}")]
    DuplicateJob(JobId),

    /// The job was never assigned, so it has no cost.
    #[error("job {0} has no cost: it was never scheduled")]
    CostUnavailable(JobId),

    /// Registry failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Lifecycle failure.
    #[error(transparent)]
    Lifecycle(LifecycleError),
}

impl From<LifecycleError> for SchedulerError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::NotFound(id) => Self::NotFound(id),
            LifecycleError::Duplicate(id) => Self::DuplicateJob(id),
            other @ LifecycleError::InvalidTransition { .. } => Self::Lifecycle(other),
        }
    }
}

/// Result type for scheduler operations.
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

/// What `submit` tells the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    /// The job id, generated if the spec had none.
    pub job_id: JobId,
    /// Placement result.
    pub outcome: PlacementOutcome,
}

/// What a maintenance pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Nodes newly marked suspected.
    pub suspected: Vec<NodeId>,
    /// Nodes evicted.
    pub evicted: Vec<NodeId>,
    /// Jobs moved to a new node after losing theirs.
    pub requeued: Vec<JobId>,
    /// Jobs failed with `NodeLost`.
    pub lost: Vec<JobId>,
    /// Jobs failed with `ResultTimeout`.
    pub timed_out: Vec<JobId>,
}

impl MaintenanceReport {
    /// Whether the pass changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.suspected.is_empty()
            && self.evicted.is_empty()
            && self.requeued.is_empty()
            && self.lost.is_empty()
            && self.timed_out.is_empty()
    }
}

/// The economic scheduler.
#[derive(Debug)]
pub struct SchedulerService {
    registry: Arc<ClusterRegistry>,
    jobs: Mutex<JobTable>,
    optimizer: Optimizer,
    executor: Arc<dyn Executor>,
    config: SchedulerConfig,
}

impl SchedulerService {
    /// Create a scheduler with an empty cluster and a no-op executor.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        let latency = LoadAwareLatency::new(config.latency.clone());
        let optimizer = Optimizer::new(config.pricing).with_latency_model(Arc::new(latency));
        Self {
            registry: Arc::new(ClusterRegistry::new()),
            jobs: Mutex::new(JobTable::new()),
            optimizer,
            executor: Arc::new(NoOpExecutor),
            config,
        }
    }

    /// Set the executor orders are sent to.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    /// Replace the latency model.
    #[must_use]
    pub fn with_latency_model(mut self, model: Arc<dyn LatencyModel>) -> Self {
        self.optimizer = self.optimizer.with_latency_model(model);
        self
    }

    /// The cluster registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ClusterRegistry> {
        &self.registry
    }

    /// The configuration.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    // ----- Nodes -----

    /// Register or refresh a node.
    ///
    /// # Errors
    ///
    /// See [`ClusterRegistry::register_node`].
    pub fn register_node(&self, spec: NodeSpec) -> SchedulerResult<NodeId> {
        Ok(self.registry.register_node(spec)?)
    }

    /// Record a node heartbeat.
    ///
    /// # Errors
    ///
    /// See [`ClusterRegistry::heartbeat`].
    pub fn heartbeat(&self, node_id: &NodeId, free: Resources) -> SchedulerResult<()> {
        Ok(self.registry.heartbeat(node_id, free)?)
    }

    // ----- Submission -----

    /// Submit a job and attempt to place it.
    ///
    /// The call never waits for capacity: it returns either the assignment
    /// and its cost or an infeasible outcome with a reason. Infeasible jobs
    /// are recorded as failed and are not retried.
    ///
    /// # Errors
    ///
    /// Returns a validation error before any state changes if the spec or its
    /// cost inputs are malformed, and [`SchedulerError::DuplicateJob`] if the
    /// id is taken.
    pub fn submit(&self, spec: JobSpec) -> SchedulerResult<Submission> {
        self.submit_at(spec, Utc::now())
    }

    /// [`submit`](Self::submit) with an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`submit`](Self::submit).
    pub fn submit_at(&self, mut spec: JobSpec, now: DateTime<Utc>) -> SchedulerResult<Submission> {
        spec.validate()?;
        validate_input("estimated_duration_hours", spec.estimated_duration_hours)?;
        validate_input("estimated_data_gb", spec.estimated_data_gb)?;
        if spec.id.is_empty() {
            spec.id = JobId::generate();
        }
        let job_id = spec.id.clone();

        self.jobs.lock().insert(JobRecord::new(spec.clone(), now))?;
        info!(
            job_id = %job_id,
            kind = %spec.kind,
            resources = %spec.resources,
            max_latency_ms = spec.sla.max_latency_ms,
            budget_usd = ?spec.sla.budget_usd,
            "Job submitted"
        );

        let outcome = match self.place(&spec, now)? {
            Ok(assignment) => match self.dispatch(&spec, &assignment.node_id, now) {
                Ok(()) => PlacementOutcome::Scheduled { assignment },
                Err(e) => PlacementOutcome::DispatchFailed {
                    node_id: assignment.node_id,
                    message: e.to_string(),
                },
            },
            Err(infeasible) => {
                info!(job_id = %job_id, reason = %infeasible.reason, detail = %infeasible, "Job infeasible");
                self.fail_job(
                    &job_id,
                    FailureReason::Infeasible {
                        infeasible: infeasible.reason,
                    },
                    now,
                )?;
                PlacementOutcome::Infeasible {
                    reason: infeasible.reason,
                    detail: infeasible.to_string(),
                }
            }
        };

        Ok(Submission { job_id, outcome })
    }

    /// Run bounded placement passes for a pending job.
    ///
    /// Each pass scores a fresh snapshot and then tries to reserve the chosen
    /// node. Losing the reservation race triggers another pass.
    fn place(
        &self,
        spec: &JobSpec,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Result<Assignment, Infeasible>> {
        let attempts = self.config.max_placement_attempts;
        for attempt in 1..=attempts {
            let snapshot = self.registry.snapshot();
            let placement = match self.optimizer.place_at(spec, &snapshot, now) {
                Ok(placement) => placement,
                Err(infeasible) => return Ok(Err(infeasible)),
            };

            let mut jobs = self.jobs.lock();
            let record = jobs.get_mut(&spec.id)?;
            if !record.state.can_transition_to(JobState::Scheduled) {
                return Err(LifecycleError::InvalidTransition {
                    job_id: spec.id.clone(),
                    from: record.state,
                    to: JobState::Scheduled,
                }
                .into());
            }

            match self.registry.reserve(&placement.node_id, &spec.resources) {
                Ok(token) => {
                    let assignment = Assignment {
                        node_id: placement.node_id,
                        cost: placement.cost,
                        estimated_latency_ms: placement.estimated_latency_ms,
                        assigned_at: now,
                    };
                    record.schedule(assignment.clone(), token)?;
                    info!(
                        job_id = %spec.id,
                        node_id = %assignment.node_id,
                        compute_usd = assignment.cost.compute_usd,
                        data_transfer_usd = assignment.cost.data_transfer_usd,
                        idle_opportunity_usd = assignment.cost.idle_opportunity_usd,
                        total_usd = assignment.cost.total_usd,
                        latency_ms = assignment.estimated_latency_ms,
                        "Job scheduled"
                    );
                    return Ok(Ok(assignment));
                }
                Err(
                    e @ (RegistryError::CapacityExceeded { .. }
                    | RegistryError::NodeNotActive { .. }
                    | RegistryError::UnknownNode(_)),
                ) => {
                    warn!(job_id = %spec.id, attempt, attempts, error = %e, "Reservation lost a race, retrying placement");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(Err(Infeasible::new(tgp_proto::InfeasibleReason::NoCapacity)))
    }

    /// Send the job to its node. A delivery failure fails the job and frees
    /// its reservation before the error is returned.
    fn dispatch(&self, spec: &JobSpec, node_id: &NodeId, now: DateTime<Utc>) -> Result<(), ExecutorError> {
        let order = DispatchOrder::from(spec);
        let Err(e) = self.executor.dispatch(node_id, &order) else {
            return Ok(());
        };
        warn!(job_id = %spec.id, node_id = %node_id, error = %e, "Dispatch failed");
        let reason = FailureReason::DispatchFailed {
            message: e.to_string(),
        };
        if let Err(e) = self.fail_job(&spec.id, reason, now) {
            debug!(job_id = %spec.id, error = %e, "Job changed state before dispatch failure was recorded");
        }
        Err(e)
    }

    /// Fail a job and free whatever it still holds.
    fn fail_job(&self, job_id: &JobId, reason: FailureReason, now: DateTime<Utc>) -> SchedulerResult<()> {
        let mut jobs = self.jobs.lock();
        let token = jobs.get_mut(job_id)?.fail(reason, now)?;
        self.release(token)
    }

    fn release(&self, token: Option<AssignmentToken>) -> SchedulerResult<()> {
        if let Some(token) = token {
            self.registry.release(&token)?;
        }
        Ok(())
    }

    // ----- Executor reports -----

    /// Apply a progress report from a node's executor.
    ///
    /// Reports from a node the job is no longer assigned to, or for a job
    /// that already ended, are ignored. A final report frees the reservation.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotFound`] for unknown jobs and a registry
    /// error if freeing the reservation hits an invariant violation.
    pub fn report_node_result(
        &self,
        job_id: &JobId,
        node_id: &NodeId,
        report: ExecutorReport,
    ) -> SchedulerResult<()> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock();
        let record = jobs.get_mut(job_id)?;

        let assigned_here = record
            .assignment
            .as_ref()
            .is_some_and(|a| &a.node_id == node_id);
        if !assigned_here || !record.state.holds_reservation() {
            debug!(
                job_id = %job_id,
                node_id = %node_id,
                state = %record.state,
                "Ignoring stale executor report"
            );
            return Ok(());
        }

        let token = match report {
            ExecutorReport::Started => {
                if record.state == JobState::Scheduled {
                    record.transition(JobState::Running)?;
                    record.started_at = Some(now);
                    info!(job_id = %job_id, node_id = %node_id, "Job running");
                }
                None
            }
            ExecutorReport::Completed { exit_code, output } => {
                if record.state == JobState::Scheduled {
                    record.transition(JobState::Running)?;
                    record.started_at = Some(now);
                }
                let token = record.complete(now)?;
                record.exit_code = Some(exit_code);
                record.output = Some(output);
                info!(job_id = %job_id, node_id = %node_id, exit_code, "Job completed");
                token
            }
            ExecutorReport::Failed {
                exit_code,
                error,
                output,
            } => {
                warn!(job_id = %job_id, node_id = %node_id, ?exit_code, error = %error, "Job failed");
                let token = record.fail(
                    FailureReason::Executor {
                        exit_code,
                        message: error,
                    },
                    now,
                )?;
                record.exit_code = exit_code;
                record.output = Some(output);
                token
            }
        };

        self.release(token)
    }

    // ----- Liveness -----

    /// Run one liveness pass at the current time.
    pub fn run_maintenance(&self) -> MaintenanceReport {
        self.run_maintenance_at(Utc::now())
    }

    /// Suspect late nodes, evict dead ones, requeue their jobs, and expire
    /// jobs whose result never arrived.
    pub fn run_maintenance_at(&self, now: DateTime<Utc>) -> MaintenanceReport {
        let suspected = self.registry.mark_suspected_at(now, self.config.suspect_after);
        let evictions = self.registry.evict_stale_at(now, self.config.heartbeat_timeout);
        let (requeued, lost) = self.handle_evictions(&evictions, now);
        let evicted = evictions.into_iter().map(|e| e.node_id).collect();
        let timed_out = self.expire_overdue(now);

        let report = MaintenanceReport {
            suspected,
            evicted,
            requeued,
            lost,
            timed_out,
        };
        if !report.is_empty() {
            info!(
                suspected = report.suspected.len(),
                evicted = report.evicted.len(),
                requeued = report.requeued.len(),
                lost = report.lost.len(),
                timed_out = report.timed_out.len(),
                "Maintenance pass"
            );
        }
        report
    }

    /// Requeue jobs whose reservations were revoked by `evictions`.
    ///
    /// Only tokens issued before an eviction are affected: a job placed on
    /// the node after it re-registered keeps running. The eviction already
    /// returned the revoked capacity. Each job gets a fresh placement pass
    /// unless it used up its requeues; jobs that cannot be placed again fail
    /// with `NodeLost`. Returns `(requeued, lost)`.
    pub fn handle_evictions(&self, evictions: &[Eviction], now: DateTime<Utc>) -> (Vec<JobId>, Vec<JobId>) {
        let mut requeued = Vec::new();
        let mut lost = Vec::new();
        if evictions.is_empty() {
            return (requeued, lost);
        }

        let affected = self.jobs.lock().revoked_by(evictions);
        for job_id in affected {
            let (spec, old_node, exhausted) = {
                let mut jobs = self.jobs.lock();
                let Ok(record) = jobs.get_mut(&job_id) else {
                    continue;
                };
                let Some(old_node) = record
                    .token
                    .as_ref()
                    .filter(|t| evictions.iter().any(|e| e.revoked(t)))
                    .map(|t| t.node_id.clone())
                else {
                    continue;
                };
                let exhausted = record.requeue_count >= self.config.max_requeues;
                // The revoked token needs no release.
                if let Err(e) = record.requeue() {
                    error!(job_id = %job_id, error = %e, "Requeue failed");
                    continue;
                }
                info!(job_id = %job_id, node_id = %old_node, requeues = record.requeue_count, "Job requeued after node loss");
                (record.spec.clone(), old_node, exhausted)
            };

            self.executor.cancel(&old_node, &job_id, "node evicted");

            let placed = if exhausted {
                None
            } else {
                match self.place(&spec, now) {
                    Ok(Ok(assignment)) => Some(assignment),
                    Ok(Err(infeasible)) => {
                        info!(job_id = %job_id, detail = %infeasible, "Re-placement infeasible");
                        None
                    }
                    Err(e) => {
                        error!(job_id = %job_id, error = %e, "Re-placement failed");
                        None
                    }
                }
            };

            match placed {
                Some(assignment) => {
                    if self.dispatch(&spec, &assignment.node_id, now).is_ok() {
                        requeued.push(job_id);
                    }
                }
                None => {
                    warn!(job_id = %job_id, node_id = %old_node, "Job lost with its node");
                    if let Err(e) = self.fail_job(&job_id, FailureReason::NodeLost, now) {
                        error!(job_id = %job_id, error = %e, "Failed to record node loss");
                    }
                    lost.push(job_id);
                }
            }
        }
        (requeued, lost)
    }

    /// Fail Scheduled or Running jobs that have gone longer than the result
    /// timeout without a final report.
    pub fn expire_overdue(&self, now: DateTime<Utc>) -> Vec<JobId> {
        let Some(cutoff) = chrono::Duration::from_std(self.config.result_timeout)
            .ok()
            .and_then(|timeout| now.checked_sub_signed(timeout))
        else {
            return Vec::new();
        };

        let mut expired = Vec::new();
        let mut cancels = Vec::new();
        {
            let mut jobs = self.jobs.lock();
            for job_id in jobs.overdue(cutoff) {
                let Ok(record) = jobs.get_mut(&job_id) else {
                    continue;
                };
                let node_id = record.assignment.as_ref().map(|a| a.node_id.clone());
                match record.fail(FailureReason::ResultTimeout, now) {
                    Ok(token) => {
                        warn!(job_id = %job_id, "No result within timeout, failing job");
                        if let Err(e) = self.release(token) {
                            error!(job_id = %job_id, error = %e, "Release after timeout failed");
                        }
                        if let Some(node_id) = node_id {
                            cancels.push((node_id, job_id.clone()));
                        }
                        expired.push(job_id);
                    }
                    Err(e) => error!(job_id = %job_id, error = %e, "Timeout transition failed"),
                }
            }
        }

        for (node_id, job_id) in cancels {
            self.executor.cancel(&node_id, &job_id, "result timeout");
        }
        expired
    }

    // ----- Queries -----

    /// Current status of a job.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotFound`] for unknown ids.
    pub fn get_status(&self, job_id: &JobId) -> SchedulerResult<JobStatus> {
        self.jobs
            .lock()
            .get(job_id)
            .map(JobRecord::status)
            .ok_or_else(|| SchedulerError::NotFound(job_id.clone()))
    }

    /// Cost of a job's assignment.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotFound`] for unknown ids and
    /// [`SchedulerError::CostUnavailable`] if the job was never scheduled.
    pub fn get_cost(&self, job_id: &JobId) -> SchedulerResult<CostBreakdown> {
        let jobs = self.jobs.lock();
        let record = jobs
            .get(job_id)
            .ok_or_else(|| SchedulerError::NotFound(job_id.clone()))?;
        record
            .assignment
            .as_ref()
            .map(|a| a.cost)
            .ok_or_else(|| SchedulerError::CostUnavailable(job_id.clone()))
    }

    /// Node and job counts.
    #[must_use]
    pub fn cluster_status(&self) -> ClusterSummary {
        let snapshot = self.registry.snapshot();
        let jobs = self.jobs.lock();
        ClusterSummary {
            total_nodes: snapshot.len(),
            active_nodes: snapshot.count_with_status(NodeStatus::Active),
            suspected_nodes: snapshot.count_with_status(NodeStatus::Suspected),
            evicted_nodes: snapshot.count_with_status(NodeStatus::Evicted),
            total_jobs: jobs.len(),
            pending_jobs: jobs.count_in(JobState::Pending),
            scheduled_jobs: jobs.count_in(JobState::Scheduled),
            running_jobs: jobs.count_in(JobState::Running),
            completed_jobs: jobs.count_in(JobState::Completed),
            failed_jobs: jobs.count_in(JobState::Failed),
        }
    }

    /// Every registered node.
    #[must_use]
    pub fn list_nodes(&self) -> Vec<NodeInfo> {
        self.registry
            .snapshot()
            .nodes
            .iter()
            .map(crate::registry::Node::to_info)
            .collect()
    }

    /// Every job, optionally only those in `state`.
    #[must_use]
    pub fn list_jobs(&self, state: Option<JobState>) -> Vec<JobStatus> {
        self.jobs
            .lock()
            .iter()
            .filter(|j| state.is_none_or(|s| j.state == s))
            .map(JobRecord::status)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecutorCall, RecordingExecutor};
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;
    use tgp_proto::InfeasibleReason;
    use test_case::test_case;

    fn node(id: &str, price: f64) -> NodeSpec {
        NodeSpec::new(NodeId::new(id), Resources::new(4000, 8192, 0), price)
    }

    fn job(id: &str) -> JobSpec {
        JobSpec::new(JobId::new(id), Resources::new(1000, 1024, 0))
    }

    fn service() -> (SchedulerService, Arc<RecordingExecutor>) {
        let executor = Arc::new(RecordingExecutor::new());
        let svc = SchedulerService::new(SchedulerConfig::default()).with_executor(executor.clone());
        (svc, executor)
    }

    fn scheduled_node(sub: &Submission) -> NodeId {
        sub.outcome.assignment().unwrap().node_id.clone()
    }

    // ==================== Submission Tests ====================

    #[test]
    fn test_submit_schedules_and_dispatches() {
        let (svc, exec) = service();
        svc.register_node(node("n1", 0.10)).unwrap();

        let sub = svc.submit(job("j1")).unwrap();
        assert_eq!(sub.job_id, JobId::new("j1"));
        assert_eq!(scheduled_node(&sub), NodeId::new("n1"));

        let status = svc.get_status(&sub.job_id).unwrap();
        assert_eq!(status.state, JobState::Scheduled);
        assert_eq!(exec.dispatched(), vec![JobId::new("j1")]);

        let n1 = svc.registry().get(&NodeId::new("n1")).unwrap();
        assert_eq!(n1.reserved, Resources::new(1000, 1024, 0));
    }

    #[test]
    fn test_submit_generates_id() {
        let (svc, _) = service();
        svc.register_node(node("n1", 0.10)).unwrap();

        let sub = svc.submit(JobSpec::new(JobId::default(), Resources::new(500, 512, 0))).unwrap();
        assert!(sub.job_id.as_str().starts_with("job-"));
        assert!(svc.get_status(&sub.job_id).is_ok());
    }

    #[test]
    fn test_duplicate_job_rejected() {
        let (svc, _) = service();
        svc.register_node(node("n1", 0.10)).unwrap();
        svc.submit(job("j1")).unwrap();

        let err = svc.submit(job("j1")).unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateJob(_)));
    }

    #[test_case(-1.0, 0.0; "negative duration")]
    #[test_case(f64::NAN, 0.0; "nan duration")]
    #[test_case(1.0, f64::INFINITY; "infinite data")]
    #[test_case(1.0, -5.0; "negative data")]
    fn test_invalid_cost_input_changes_nothing(duration: f64, data_gb: f64) {
        let (svc, exec) = service();
        svc.register_node(node("n1", 0.10)).unwrap();

        let spec = job("j1").with_duration_hours(duration).with_data_gb(data_gb);
        let err = svc.submit(spec).unwrap_err();

        assert!(matches!(err, SchedulerError::InvalidCostInput(_)));
        assert!(matches!(svc.get_status(&JobId::new("j1")), Err(SchedulerError::NotFound(_))));
        assert!(exec.calls().is_empty());
        assert_eq!(svc.cluster_status().total_jobs, 0);
    }

    #[test]
    fn test_invalid_spec_rejected() {
        let (svc, _) = service();
        let err = svc
            .submit(JobSpec::new(JobId::new("j1"), Resources::new(0, 1024, 0)))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidJob(_)));
    }

    #[test]
    fn test_infeasible_is_failed_and_not_retried() {
        let (svc, exec) = service();
        svc.register_node(node("n1", 0.10)).unwrap();

        let sub = svc
            .submit(JobSpec::new(JobId::new("big"), Resources::new(64_000, 1024, 0)))
            .unwrap();
        match &sub.outcome {
            PlacementOutcome::Infeasible { reason, .. } => {
                assert_eq!(*reason, InfeasibleReason::NoCapacity);
            }
            other => panic!("expected infeasible, got {other:?}"),
        }

        let status = svc.get_status(&sub.job_id).unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(
            status.failure,
            Some(FailureReason::Infeasible {
                infeasible: InfeasibleReason::NoCapacity
            })
        );
        assert!(exec.dispatched().is_empty());
        assert!(matches!(svc.get_cost(&sub.job_id), Err(SchedulerError::CostUnavailable(_))));
    }

    #[test]
    fn test_dispatch_failure_fails_job_and_releases() {
        let (svc, exec) = service();
        svc.register_node(node("n1", 0.10)).unwrap();
        exec.set_unreachable(NodeId::new("n1"));

        let sub = svc.submit(job("j1")).unwrap();
        match &sub.outcome {
            PlacementOutcome::DispatchFailed { node_id, message } => {
                assert_eq!(node_id, &NodeId::new("n1"));
                assert!(message.contains("n1"));
            }
            other => panic!("expected dispatch failure, got {other:?}"),
        }

        let status = svc.get_status(&sub.job_id).unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert!(matches!(status.failure, Some(FailureReason::DispatchFailed { .. })));
        assert!(svc.registry().get(&NodeId::new("n1")).unwrap().reserved.is_zero());
    }

    #[test]
    fn test_capacity_is_consumed_by_earlier_jobs() {
        let (svc, _) = service();
        svc.register_node(node("n1", 0.10)).unwrap();

        for i in 0..4 {
            let sub = svc.submit(job(&format!("j{i}"))).unwrap();
            assert!(sub.outcome.is_scheduled());
        }
        let sub = svc.submit(job("j4")).unwrap();
        assert!(!sub.outcome.is_scheduled());
        svc.registry().check_invariants().unwrap();
    }

    // ==================== Report Tests ====================

    #[test]
    fn test_reports_drive_lifecycle_and_release() {
        let (svc, _) = service();
        svc.register_node(node("n1", 0.10)).unwrap();
        let sub = svc.submit(job("j1")).unwrap();
        let n1 = NodeId::new("n1");

        svc.report_node_result(&sub.job_id, &n1, ExecutorReport::Started).unwrap();
        let status = svc.get_status(&sub.job_id).unwrap();
        assert_eq!(status.state, JobState::Running);
        assert!(status.started_at.is_some());

        svc.report_node_result(
            &sub.job_id,
            &n1,
            ExecutorReport::Completed {
                exit_code: 0,
                output: "done".into(),
            },
        )
        .unwrap();

        let status = svc.get_status(&sub.job_id).unwrap();
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.exit_code, Some(0));
        assert_eq!(status.output.as_deref(), Some("done"));
        assert!(status.ended_at.is_some());
        assert!(svc.registry().get(&n1).unwrap().reserved.is_zero());
        // Cost is still reported after completion.
        assert_eq!(svc.get_cost(&sub.job_id).unwrap().total_usd, 0.10);
    }

    #[test]
    fn test_completed_without_started() {
        let (svc, _) = service();
        svc.register_node(node("n1", 0.10)).unwrap();
        let sub = svc.submit(job("j1")).unwrap();

        svc.report_node_result(
            &sub.job_id,
            &NodeId::new("n1"),
            ExecutorReport::Completed {
                exit_code: 0,
                output: String::new(),
            },
        )
        .unwrap();
        assert_eq!(svc.get_status(&sub.job_id).unwrap().state, JobState::Completed);
    }

    #[test]
    fn test_failed_report() {
        let (svc, _) = service();
        svc.register_node(node("n1", 0.10)).unwrap();
        let sub = svc.submit(job("j1")).unwrap();
        let n1 = NodeId::new("n1");

        svc.report_node_result(&sub.job_id, &n1, ExecutorReport::Started).unwrap();
        svc.report_node_result(
            &sub.job_id,
            &n1,
            ExecutorReport::Failed {
                exit_code: Some(137),
                error: "oom".into(),
                output: String::new(),
            },
        )
        .unwrap();

        let status = svc.get_status(&sub.job_id).unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.exit_code, Some(137));
        assert!(svc.registry().get(&n1).unwrap().reserved.is_zero());
    }

    #[test]
    fn test_report_from_wrong_node_ignored() {
        let (svc, _) = service();
        svc.register_node(node("n1", 0.10)).unwrap();
        svc.register_node(node("n2", 0.20)).unwrap();
        let sub = svc.submit(job("j1")).unwrap();

        svc.report_node_result(&sub.job_id, &NodeId::new("n2"), ExecutorReport::Started)
            .unwrap();
        assert_eq!(svc.get_status(&sub.job_id).unwrap().state, JobState::Scheduled);
    }

    #[test]
    fn test_report_after_terminal_ignored() {
        let (svc, _) = service();
        svc.register_node(node("n1", 0.10)).unwrap();
        let sub = svc.submit(job("j1")).unwrap();
        let n1 = NodeId::new("n1");
        let done = ExecutorReport::Completed {
            exit_code: 0,
            output: String::new(),
        };

        svc.report_node_result(&sub.job_id, &n1, done.clone()).unwrap();
        svc.report_node_result(&sub.job_id, &n1, done).unwrap();
        assert_eq!(svc.get_status(&sub.job_id).unwrap().state, JobState::Completed);
        svc.registry().check_invariants().unwrap();
    }

    #[test]
    fn test_report_unknown_job() {
        let (svc, _) = service();
        let err = svc
            .report_node_result(&JobId::new("nope"), &NodeId::new("n1"), ExecutorReport::Started)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound(_)));
    }

    // ==================== Maintenance Tests ====================

    #[test]
    fn test_eviction_requeues_onto_other_node() {
        let (svc, exec) = service();
        let t0 = Utc::now();
        svc.registry().register_node_at(node("cheap", 0.10), t0).unwrap();
        svc.registry().register_node_at(node("backup", 0.50), t0).unwrap();

        let sub = svc.submit_at(job("j1"), t0).unwrap();
        assert_eq!(scheduled_node(&sub), NodeId::new("cheap"));
        svc.report_node_result(&sub.job_id, &NodeId::new("cheap"), ExecutorReport::Started)
            .unwrap();

        // Only the backup keeps heartbeating.
        let later = t0 + ChronoDuration::seconds(120);
        svc.registry()
            .heartbeat_at(&NodeId::new("backup"), Resources::ZERO, later)
            .unwrap();
        let report = svc.run_maintenance_at(later);

        assert_eq!(report.evicted, vec![NodeId::new("cheap")]);
        assert_eq!(report.requeued, vec![JobId::new("j1")]);
        let status = svc.get_status(&sub.job_id).unwrap();
        assert_eq!(status.state, JobState::Scheduled);
        assert_eq!(status.node_id(), Some(&NodeId::new("backup")));
        assert_eq!(status.requeue_count, 1);
        assert!(exec.calls().contains(&ExecutorCall::Cancel {
            node_id: NodeId::new("cheap"),
            job_id: JobId::new("j1"),
        }));
        assert_eq!(exec.dispatched(), vec![JobId::new("j1"), JobId::new("j1")]);
    }

    #[test]
    fn test_job_placed_after_reregistration_survives_eviction_handling() {
        let (svc, exec) = service();
        let t0 = Utc::now();
        let a = NodeId::new("a");
        svc.registry().register_node_at(node("a", 0.10), t0).unwrap();

        // The node dies and comes back before its evictions are handled.
        let t1 = t0 + ChronoDuration::seconds(120);
        let evictions = svc.registry().evict_stale_at(t1, Duration::from_secs(90));
        svc.registry().register_node_at(node("a", 0.10), t1).unwrap();
        let sub = svc.submit_at(job("fresh"), t1).unwrap();
        assert_eq!(scheduled_node(&sub), a);

        let (requeued, lost) = svc.handle_evictions(&evictions, t1);
        assert!(requeued.is_empty());
        assert!(lost.is_empty());

        let status = svc.get_status(&sub.job_id).unwrap();
        assert_eq!(status.state, JobState::Scheduled);
        assert_eq!(status.requeue_count, 0);
        assert_eq!(svc.registry().get(&a).unwrap().reserved, Resources::new(1000, 1024, 0));
        assert!(!exec.calls().iter().any(|c| matches!(c, ExecutorCall::Cancel { .. })));
    }

    #[test]
    fn test_eviction_without_alternative_is_node_lost() {
        let (svc, _) = service();
        let t0 = Utc::now();
        svc.registry().register_node_at(node("only", 0.10), t0).unwrap();
        let sub = svc.submit_at(job("j1"), t0).unwrap();

        let report = svc.run_maintenance_at(t0 + ChronoDuration::seconds(120));
        assert_eq!(report.lost, vec![JobId::new("j1")]);

        let status = svc.get_status(&sub.job_id).unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.failure, Some(FailureReason::NodeLost));
        assert!(svc.registry().get(&NodeId::new("only")).unwrap().reserved.is_zero());
    }

    #[test]
    fn test_second_eviction_exhausts_requeues() {
        let (svc, _) = service();
        let t0 = Utc::now();
        for id in ["a", "b", "c"] {
            svc.registry().register_node_at(node(id, 0.10), t0).unwrap();
        }
        svc.submit_at(job("j1"), t0).unwrap();

        // a dies, job moves to b.
        let t1 = t0 + ChronoDuration::seconds(100);
        for id in ["b", "c"] {
            svc.registry().heartbeat_at(&NodeId::new(id), Resources::ZERO, t1).unwrap();
        }
        let report = svc.run_maintenance_at(t1);
        assert_eq!(report.requeued, vec![JobId::new("j1")]);

        // b dies too; c is free but the requeue budget is spent.
        let t2 = t1 + ChronoDuration::seconds(100);
        svc.registry().heartbeat_at(&NodeId::new("c"), Resources::ZERO, t2).unwrap();
        let report = svc.run_maintenance_at(t2);
        assert_eq!(report.lost, vec![JobId::new("j1")]);
        assert_eq!(
            svc.get_status(&JobId::new("j1")).unwrap().failure,
            Some(FailureReason::NodeLost)
        );
    }

    #[test]
    fn test_result_timeout_fails_and_cancels() {
        let executor = Arc::new(RecordingExecutor::new());
        let config = SchedulerConfig::default().with_result_timeout(std::time::Duration::from_secs(60));
        let svc = SchedulerService::new(config).with_executor(executor.clone());
        let t0 = Utc::now();
        svc.registry().register_node_at(node("n1", 0.10), t0).unwrap();
        let sub = svc.submit_at(job("j1"), t0).unwrap();

        let later = t0 + ChronoDuration::seconds(61);
        svc.registry().heartbeat_at(&NodeId::new("n1"), Resources::ZERO, later).unwrap();
        let report = svc.run_maintenance_at(later);

        assert_eq!(report.timed_out, vec![JobId::new("j1")]);
        let status = svc.get_status(&sub.job_id).unwrap();
        assert_eq!(status.failure, Some(FailureReason::ResultTimeout));
        assert!(svc.registry().get(&NodeId::new("n1")).unwrap().reserved.is_zero());
        assert!(executor.calls().contains(&ExecutorCall::Cancel {
            node_id: NodeId::new("n1"),
            job_id: JobId::new("j1"),
        }));
    }

    #[test]
    fn test_quiet_maintenance_is_empty() {
        let (svc, _) = service();
        svc.register_node(node("n1", 0.10)).unwrap();
        assert!(svc.run_maintenance().is_empty());
    }

    // ==================== Query Tests ====================

    #[test]
    fn test_cluster_status_counts() {
        let (svc, _) = service();
        svc.register_node(node("n1", 0.10)).unwrap();
        svc.register_node(node("n2", 0.20)).unwrap();
        let sub = svc.submit(job("j1")).unwrap();
        svc.report_node_result(&sub.job_id, &scheduled_node(&sub), ExecutorReport::Started)
            .unwrap();
        svc.submit(job("j2")).unwrap();

        let summary = svc.cluster_status();
        assert_eq!(summary.total_nodes, 2);
        assert_eq!(summary.active_nodes, 2);
        assert_eq!(summary.total_jobs, 2);
        assert_eq!(summary.running_jobs, 1);
        assert_eq!(summary.scheduled_jobs, 1);
    }

    #[test]
    fn test_list_jobs_filter() {
        let (svc, _) = service();
        svc.register_node(node("n1", 0.10)).unwrap();
        svc.submit(job("ok")).unwrap();
        svc.submit(JobSpec::new(JobId::new("big"), Resources::new(64_000, 1, 0)))
            .unwrap();

        assert_eq!(svc.list_jobs(None).len(), 2);
        let failed = svc.list_jobs(Some(JobState::Failed));
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].job_id, JobId::new("big"));
    }

    #[test]
    fn test_list_nodes() {
        let (svc, _) = service();
        svc.register_node(node("b", 0.10)).unwrap();
        svc.register_node(node("a", 0.10)).unwrap();
        let ids: Vec<_> = svc.list_nodes().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![NodeId::new("a"), NodeId::new("b")]);
    }

    #[test]
    fn test_unknown_job_queries() {
        let (svc, _) = service();
        let id = JobId::new("missing");
        assert!(matches!(svc.get_status(&id), Err(SchedulerError::NotFound(_))));
        assert!(matches!(svc.get_cost(&id), Err(SchedulerError::NotFound(_))));
    }

    #[test]
    fn test_heartbeat_from_evicted_node_rejected() {
        let (svc, _) = service();
        let t0 = Utc::now();
        svc.registry().register_node_at(node("n1", 0.10), t0).unwrap();
        svc.run_maintenance_at(t0 + ChronoDuration::seconds(200));

        let err = svc.heartbeat(&NodeId::new("n1"), Resources::ZERO).unwrap_err();
        assert!(matches!(err, SchedulerError::Registry(RegistryError::NodeEvicted(_))));
    }
}
