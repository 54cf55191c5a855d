//! Job lifecycle: the per-job state machine and the table that owns it.
//!
//! ```text
//!   Pending ──► Scheduled ──► Running ──► Completed
//!      ▲            │            │
//!      └────────────┴────────────┤  (node evicted: requeue)
//!                                ▼
//!                              Failed
//! ```
//!
//! `Pending`, `Scheduled` and `Running` may all move to `Failed`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tgp_proto::{Assignment, FailureReason, JobId, JobSpec, JobState, JobStatus};
use thiserror::Error;

use crate::registry::{AssignmentToken, Eviction};

/// Errors from the job table.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LifecycleError {
    /// No job with this id.
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// A job with this id was already submitted.
    #[error("job already exists: {0}")]
    Duplicate(JobId),

    /// The state machine does not allow this move.
    #[error("job {job_id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        /// Job id.
        job_id: JobId,
        /// Current state.
        from: JobState,
        /// Requested state.
        to: JobState,
    },
}

/// Everything the scheduler knows about one job.
#[derive(Debug, Clone)]
pub struct JobRecord {
    /// The submitted spec, with its final id.
    pub spec: JobSpec,
    /// Current state.
    pub state: JobState,
    /// Current assignment. Kept after a terminal state so cost stays queryable.
    pub assignment: Option<Assignment>,
    /// Reservation held while Scheduled or Running.
    pub token: Option<AssignmentToken>,
    /// Submission time.
    pub submitted_at: DateTime<Utc>,
    /// Time of the latest assignment.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Time the executor reported the start.
    pub started_at: Option<DateTime<Utc>>,
    /// Time the job reached a terminal state.
    pub ended_at: Option<DateTime<Utc>>,
    /// Failure reason, once failed.
    pub failure: Option<FailureReason>,
    /// Exit status from the executor.
    pub exit_code: Option<i32>,
    /// Output tail from the executor.
    pub output: Option<String>,
    /// Times the job went back to Pending after losing its node.
    pub requeue_count: u32,
}

impl JobRecord {
    /// A new pending record.
    #[must_use]
    pub const fn new(spec: JobSpec, now: DateTime<Utc>) -> Self {
        Self {
            spec,
            state: JobState::Pending,
            assignment: None,
            token: None,
            submitted_at: now,
            scheduled_at: None,
            started_at: None,
            ended_at: None,
            failure: None,
            exit_code: None,
            output: None,
            requeue_count: 0,
        }
    }

    /// Job id.
    #[must_use]
    pub const fn id(&self) -> &JobId {
        &self.spec.id
    }

    /// Move to `next` if the state machine allows it.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidTransition`] otherwise. The record is
    /// left untouched.
    pub fn transition(&mut self, next: JobState) -> Result<(), LifecycleError> {
        if !self.state.can_transition_to(next) {
            return Err(LifecycleError::InvalidTransition {
                job_id: self.spec.id.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Pending → Scheduled with a fresh reservation.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidTransition`] unless the job is pending.
    pub fn schedule(
        &mut self,
        assignment: Assignment,
        token: AssignmentToken,
    ) -> Result<(), LifecycleError> {
        self.transition(JobState::Scheduled)?;
        self.scheduled_at = Some(assignment.assigned_at);
        self.assignment = Some(assignment);
        self.token = Some(token);
        Ok(())
    }

    /// Back to Pending after the node was lost.
    ///
    /// Returns the reservation token the job held, if any. Callers release it
    /// unless the eviction already did.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidTransition`] unless the job is
    /// Scheduled or Running.
    pub fn requeue(&mut self) -> Result<Option<AssignmentToken>, LifecycleError> {
        self.transition(JobState::Pending)?;
        self.assignment = None;
        self.scheduled_at = None;
        self.started_at = None;
        self.requeue_count += 1;
        Ok(self.token.take())
    }

    /// Move to Failed.
    ///
    /// Returns the reservation token the job held, if any.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidTransition`] if the job already ended.
    pub fn fail(
        &mut self,
        reason: FailureReason,
        now: DateTime<Utc>,
    ) -> Result<Option<AssignmentToken>, LifecycleError> {
        self.transition(JobState::Failed)?;
        self.failure = Some(reason);
        self.ended_at = Some(now);
        Ok(self.token.take())
    }

    /// Move to Completed.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidTransition`] unless the job is running.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<Option<AssignmentToken>, LifecycleError> {
        self.transition(JobState::Completed)?;
        self.ended_at = Some(now);
        Ok(self.token.take())
    }

    /// Client-facing view.
    #[must_use]
    pub fn status(&self) -> JobStatus {
        JobStatus {
            job_id: self.spec.id.clone(),
            state: self.state,
            kind: self.spec.kind,
            resources: self.spec.resources,
            assignment: self.assignment.clone(),
            submitted_at: self.submitted_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
            failure: self.failure.clone(),
            exit_code: self.exit_code,
            output: self.output.clone(),
            requeue_count: self.requeue_count,
        }
    }
}

/// All jobs known to the scheduler, keyed by id.
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: BTreeMap<JobId, JobRecord>,
}

impl JobTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new pending job.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Duplicate`] if the id is taken.
    pub fn insert(&mut self, record: JobRecord) -> Result<(), LifecycleError> {
        if self.jobs.contains_key(record.id()) {
            return Err(LifecycleError::Duplicate(record.id().clone()));
        }
        self.jobs.insert(record.id().clone(), record);
        Ok(())
    }

    /// Look up a job.
    #[must_use]
    pub fn get(&self, job_id: &JobId) -> Option<&JobRecord> {
        self.jobs.get(job_id)
    }

    /// Look up a job for mutation.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotFound`] for unknown ids.
    pub fn get_mut(&mut self, job_id: &JobId) -> Result<&mut JobRecord, LifecycleError> {
        self.jobs
            .get_mut(job_id)
            .ok_or_else(|| LifecycleError::NotFound(job_id.clone()))
    }

    /// Iterate over all jobs in id order.
    pub fn iter(&self) -> impl Iterator<Item = &JobRecord> {
        self.jobs.values()
    }

    /// Number of jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Count jobs in `state`.
    #[must_use]
    pub fn count_in(&self, state: JobState) -> usize {
        self.jobs.values().filter(|j| j.state == state).count()
    }

    /// Ids of jobs whose reservation token one of `evictions` revoked.
    #[must_use]
    pub fn revoked_by(&self, evictions: &[Eviction]) -> Vec<JobId> {
        self.jobs
            .values()
            .filter(|j| j.state.holds_reservation())
            .filter(|j| {
                j.token
                    .as_ref()
                    .is_some_and(|t| evictions.iter().any(|e| e.revoked(t)))
            })
            .map(|j| j.id().clone())
            .collect()
    }

    /// Ids of Scheduled or Running jobs assigned before `cutoff`.
    #[must_use]
    pub fn overdue(&self, cutoff: DateTime<Utc>) -> Vec<JobId> {
        self.jobs
            .values()
            .filter(|j| j.state.holds_reservation())
            .filter(|j| j.scheduled_at.is_some_and(|t| t < cutoff))
            .map(|j| j.id().clone())
            .collect()
    }
}
