//! Host detection and capacity bookkeeping.
//!
//! The worker offers either configured or detected capacity, and reports
//! the part not used by its running jobs in every heartbeat.

use std::collections::HashMap;

use sysinfo::System;
use tgp_proto::{JobId, NodeId, NodeSpec, Resources};
use tokio::task::AbortHandle;
use tracing::debug;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};

/// What the host looks like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    /// Hostname.
    pub hostname: String,
    /// Logical CPUs.
    pub cpu_count: usize,
    /// Total memory in MiB.
    pub memory_mib: u64,
}

impl HostInfo {
    /// Detect the local host.
    ///
    /// # Errors
    ///
    /// Returns an error if the host reports no CPUs or no memory.
    pub fn detect() -> WorkerResult<Self> {
        let sys = System::new_all();

        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string());
        let info = Self {
            hostname,
            cpu_count: sys.cpus().len(),
            memory_mib: sys.total_memory() / (1024 * 1024),
        };
        if info.cpu_count == 0 || info.memory_mib == 0 {
            return Err(WorkerError::Detection(format!(
                "host reported {} cpus and {} MiB of memory",
                info.cpu_count, info.memory_mib
            )));
        }
        debug!(hostname = %info.hostname, cpus = info.cpu_count, memory_mib = info.memory_mib, "Detected host");
        Ok(info)
    }
}

/// Build the node spec sent at registration.
///
/// Configured values win over detected ones. The node id defaults to the
/// hostname with characters outside `[A-Za-z0-9._:-]` replaced by `-`.
///
/// # Errors
///
/// Returns an error if the resulting spec is invalid.
pub fn node_spec(config: &WorkerConfig, host: &HostInfo) -> WorkerResult<NodeSpec> {
    let id = match &config.node_id {
        Some(id) => id.clone(),
        None => sanitize_id(&host.hostname),
    };
    let cpu_cores = config.cpu_cores.unwrap_or(host.cpu_count as f64);
    let memory_gb = config.memory_gb.unwrap_or(host.memory_mib as f64 / 1024.0);
    let capacity = Resources::from_units(cpu_cores, memory_gb, config.gpu_count)?;

    let mut spec = NodeSpec::new(NodeId::new(id), capacity, config.price_per_hour_usd)
        .with_zone(config.zone.clone())
        .with_hostname(host.hostname.clone())
        .with_transfer_price(config.transfer_price_per_gb_usd);
    if config.on_premise {
        spec = spec.on_premise(config.idle_opportunity_usd_per_hour);
    }
    spec.validate()?;
    Ok(spec)
}

fn sanitize_id(hostname: &str) -> String {
    let id: String = hostname
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':') {
                c
            } else {
                '-'
            }
        })
        .collect();
    if id.is_empty() { "worker".to_string() } else { id }
}

#[derive(Debug)]
struct RunningJob {
    limits: Resources,
    abort: AbortHandle,
}

/// Jobs running on this worker and the capacity they hold.
#[derive(Debug)]
pub struct RunningJobs {
    capacity: Resources,
    jobs: HashMap<JobId, RunningJob>,
}

impl RunningJobs {
    /// Track jobs against `capacity`.
    #[must_use]
    pub fn new(capacity: Resources) -> Self {
        Self {
            capacity,
            jobs: HashMap::new(),
        }
    }

    /// Capacity not held by running jobs.
    #[must_use]
    pub fn free(&self) -> Resources {
        self.jobs
            .values()
            .fold(self.capacity, |free, job| free.saturating_sub(&job.limits))
    }

    /// Whether the job is running here.
    #[must_use]
    pub fn contains(&self, job_id: &JobId) -> bool {
        self.jobs.contains_key(job_id)
    }

    /// Number of running jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether nothing is running.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Record a started job.
    pub fn start(&mut self, job_id: JobId, limits: Resources, abort: AbortHandle) {
        self.jobs.insert(job_id, RunningJob { limits, abort });
    }

    /// Forget a job that reported a final result.
    pub fn finish(&mut self, job_id: &JobId) -> bool {
        self.jobs.remove(job_id).is_some()
    }

    /// Abort a job's task and forget it.
    pub fn cancel(&mut self, job_id: &JobId) -> bool {
        match self.jobs.remove(job_id) {
            Some(job) => {
                job.abort.abort();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn host() -> HostInfo {
        HostInfo {
            hostname: "gpu box.local".into(),
            cpu_count: 8,
            memory_mib: 16384,
        }
    }

    fn pending_task() -> AbortHandle {
        tokio::spawn(std::future::pending::<()>()).abort_handle()
    }

    // ==================== Spec Tests ====================

    #[test]
    fn test_node_spec_from_detected_host() {
        let spec = node_spec(&WorkerConfig::default(), &host()).unwrap();
        assert_eq!(spec.id.as_str(), "gpu-box.local");
        assert_eq!(spec.capacity, Resources::new(8000, 16384, 0));
        assert_eq!(spec.hostname, "gpu box.local");
        assert!(!spec.on_premise);
    }

    #[test]
    fn test_node_spec_overrides() {
        let config = WorkerConfig {
            node_id: Some("onprem-1".into()),
            cpu_cores: Some(4.0),
            memory_gb: Some(8.0),
            gpu_count: 1,
            on_premise: true,
            idle_opportunity_usd_per_hour: 0.05,
            zone: "eu-west".into(),
            ..WorkerConfig::default()
        };
        let spec = node_spec(&config, &host()).unwrap();
        assert_eq!(spec.id.as_str(), "onprem-1");
        assert_eq!(spec.capacity, Resources::new(4000, 8192, 1));
        assert_eq!(spec.zone, "eu-west");
        assert!(spec.on_premise);
    }

    #[test]
    fn test_node_spec_rejects_bad_id() {
        let config = WorkerConfig {
            node_id: Some("bad id!".into()),
            ..WorkerConfig::default()
        };
        assert!(matches!(node_spec(&config, &host()), Err(WorkerError::Protocol(_))));
    }

    #[test_case("node-1", "node-1")]
    #[test_case("my host", "my-host")]
    #[test_case("", "worker")]
    fn test_sanitize_id(input: &str, expected: &str) {
        assert_eq!(sanitize_id(input), expected);
    }

    #[test]
    fn test_detect_reports_something() {
        let info = HostInfo::detect().unwrap();
        assert!(info.cpu_count > 0);
        assert!(info.memory_mib > 0);
    }

    // ==================== Running Jobs Tests ====================

    #[tokio::test]
    async fn test_free_tracks_running_jobs() {
        let mut jobs = RunningJobs::new(Resources::new(4000, 8192, 1));
        jobs.start(JobId::new("a"), Resources::new(1000, 2048, 0), pending_task());
        jobs.start(JobId::new("b"), Resources::new(2000, 2048, 1), pending_task());
        assert_eq!(jobs.free(), Resources::new(1000, 4096, 0));

        assert!(jobs.finish(&JobId::new("a")));
        assert!(!jobs.finish(&JobId::new("a")));
        assert_eq!(jobs.free(), Resources::new(2000, 6144, 0));
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_aborts_task() {
        let handle = tokio::spawn(std::future::pending::<()>());
        let mut jobs = RunningJobs::new(Resources::new(1000, 1024, 0));
        jobs.start(JobId::new("a"), Resources::new(1000, 1024, 0), handle.abort_handle());

        assert!(jobs.cancel(&JobId::new("a")));
        assert!(handle.await.unwrap_err().is_cancelled());
        assert!(jobs.is_empty());
    }
}
