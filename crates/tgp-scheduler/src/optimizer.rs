//! Cost-based placement.
//!
//! A placement pass is greedy and single-job: it scores every node in a
//! snapshot for one job and picks the cheapest feasible one. Existing
//! assignments are never revisited.
//!
//! 1. Keep active nodes whose free capacity covers the request.
//! 2. Estimate latency; drop nodes over the SLA bound or unable to meet the
//!    deadline.
//! 3. Price the survivors with the TCO formula; drop nodes over budget.
//! 4. Pick the minimum total cost, ties going to the smaller node id.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tgp_cost::{CostBreakdown, CostEngine, CostError, CostInputs, validate_input};
use tgp_proto::{InfeasibleReason, JobSpec, NodeId, NodeStatus, Resources};
use tracing::debug;

use crate::latency::{LatencyModel, LoadAwareLatency};
use crate::registry::{ClusterSnapshot, Node};

/// Cluster-wide pricing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingPolicy {
    /// Share of the node price charged to a job, applied to every node.
    pub utilization_factor: f64,
}

impl PricingPolicy {
    /// Check the policy values.
    ///
    /// # Errors
    ///
    /// Returns an error if the utilization factor is negative or non-finite.
    pub fn validate(&self) -> Result<(), CostError> {
        validate_input("utilization_factor", self.utilization_factor).map(|_| ())
    }
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            utilization_factor: 1.0,
        }
    }
}

/// The node chosen for a job.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    /// Chosen node.
    pub node_id: NodeId,
    /// Cost of running the job there.
    pub cost: CostBreakdown,
    /// Latency estimate that passed the SLA check.
    pub estimated_latency_ms: u64,
}

/// Why a single node was ruled out.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    /// The node is suspected or evicted.
    NotActive(NodeStatus),
    /// The request does not fit the node's free capacity.
    InsufficientCapacity {
        /// Free capacity at snapshot time.
        free: Resources,
    },
    /// Estimated latency exceeds the SLA bound.
    LatencyExceeded {
        /// Estimate.
        estimated_ms: u64,
        /// Bound.
        bound_ms: u64,
    },
    /// The job would finish after its deadline.
    DeadlineMissed {
        /// Estimated finish time.
        finish: DateTime<Utc>,
    },
    /// The node's pricing could not be evaluated.
    InvalidPricing(CostError),
    /// Total cost exceeds the budget.
    OverBudget {
        /// Cost on this node.
        total_usd: f64,
        /// Budget ceiling.
        budget_usd: f64,
    },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotActive(status) => write!(f, "node is {status}"),
            Self::InsufficientCapacity { free } => write!(f, "only {free} free"),
            Self::LatencyExceeded {
                estimated_ms,
                bound_ms,
            } => write!(f, "latency {estimated_ms}ms exceeds {bound_ms}ms"),
            Self::DeadlineMissed { finish } => write!(f, "would finish at {finish}"),
            Self::InvalidPricing(e) => write!(f, "{e}"),
            Self::OverBudget {
                total_usd,
                budget_usd,
            } => write!(f, "cost ${total_usd:.4} exceeds budget ${budget_usd:.4}"),
        }
    }
}

/// A node that was considered and ruled out.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedNode {
    /// Node id.
    pub node_id: NodeId,
    /// Why.
    pub rejection: Rejection,
}

/// No node can take the job.
#[derive(Debug, Clone, PartialEq)]
pub struct Infeasible {
    /// Reason code for the submitter.
    pub reason: InfeasibleReason,
    /// Every node that was considered, with its rejection.
    pub rejected: Vec<RejectedNode>,
}

impl Infeasible {
    /// An infeasible result with no per-node detail.
    #[must_use]
    pub const fn new(reason: InfeasibleReason) -> Self {
        Self {
            reason,
            rejected: Vec::new(),
        }
    }
}

impl fmt::Display for Infeasible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            InfeasibleReason::NoCapacity => write!(f, "no active node has enough free capacity")?,
            InfeasibleReason::SlaUnreachable => write!(f, "no node meets the latency or deadline bound")?,
            InfeasibleReason::OverBudget => write!(f, "every feasible node exceeds the budget")?,
        }
        for (i, r) in self.rejected.iter().enumerate() {
            let sep = if i == 0 { ": " } else { ", " };
            write!(f, "{sep}{} ({})", r.node_id, r.rejection)?;
        }
        Ok(())
    }
}

impl std::error::Error for Infeasible {}

struct Candidate<'a> {
    node: &'a Node,
    latency_ms: u64,
}

/// Selects the cheapest feasible node for a job.
#[derive(Debug, Clone)]
pub struct Optimizer {
    pricing: PricingPolicy,
    latency: Arc<dyn LatencyModel>,
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new(PricingPolicy::default())
    }
}

impl Optimizer {
    /// Create an optimizer with the default latency model.
    #[must_use]
    pub fn new(pricing: PricingPolicy) -> Self {
        Self {
            pricing,
            latency: Arc::new(LoadAwareLatency::default()),
        }
    }

    /// Replace the latency model.
    #[must_use]
    pub fn with_latency_model(mut self, model: Arc<dyn LatencyModel>) -> Self {
        self.latency = model;
        self
    }

    /// The pricing policy.
    #[must_use]
    pub const fn pricing(&self) -> &PricingPolicy {
        &self.pricing
    }

    /// Place `job` against `snapshot`, using the snapshot time as "now".
    ///
    /// # Errors
    ///
    /// Returns [`Infeasible`] if no node satisfies the job.
    pub fn place(&self, job: &JobSpec, snapshot: &ClusterSnapshot) -> Result<Placement, Infeasible> {
        self.place_at(job, snapshot, snapshot.taken_at)
    }

    /// Place `job` against `snapshot` with an explicit clock for deadlines.
    ///
    /// # Errors
    ///
    /// Returns [`Infeasible`] if no node satisfies the job.
    pub fn place_at(
        &self,
        job: &JobSpec,
        snapshot: &ClusterSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Placement, Infeasible> {
        let mut rejected = Vec::new();
        let mut reject = |node: &Node, rejection: Rejection| {
            debug!(job_id = %job.id, node_id = %node.id(), reason = %rejection, "Node rejected");
            rejected.push(RejectedNode {
                node_id: node.id().clone(),
                rejection,
            });
        };

        // Capacity and liveness.
        let mut with_capacity: Vec<&Node> = Vec::new();
        for node in &snapshot.nodes {
            let free = node.free();
            if !node.status.is_schedulable() {
                reject(node, Rejection::NotActive(node.status));
            } else if !job.resources.fits_within(&free) {
                reject(node, Rejection::InsufficientCapacity { free });
            } else {
                with_capacity.push(node);
            }
        }
        if with_capacity.is_empty() {
            return Err(Infeasible {
                reason: InfeasibleReason::NoCapacity,
                rejected,
            });
        }

        // Latency and deadline.
        let within_sla: Vec<Candidate<'_>> = with_capacity
            .into_iter()
            .filter_map(|node| {
                let latency_ms = self.latency.estimate_ms(job, node);
                if latency_ms > job.sla.max_latency_ms {
                    reject(
                        node,
                        Rejection::LatencyExceeded {
                            estimated_ms: latency_ms,
                            bound_ms: job.sla.max_latency_ms,
                        },
                    );
                    return None;
                }
                if let Some(deadline) = job.sla.deadline {
                    let finish = estimated_finish(now, latency_ms, job.estimated_duration_hours);
                    if finish > deadline {
                        reject(node, Rejection::DeadlineMissed { finish });
                        return None;
                    }
                }
                Some(Candidate { node, latency_ms })
            })
            .collect();
        if within_sla.is_empty() {
            return Err(Infeasible {
                reason: InfeasibleReason::SlaUnreachable,
                rejected,
            });
        }

        // Cost and budget.
        let mut over_budget = false;
        let priced: Vec<Placement> = within_sla
            .into_iter()
            .filter_map(|candidate| {
                let node = candidate.node;
                let cost = match CostEngine::evaluate(&self.cost_inputs(job, node)) {
                    Ok(cost) => cost,
                    Err(e) => {
                        reject(node, Rejection::InvalidPricing(e));
                        return None;
                    }
                };
                if !cost.within_budget(job.sla.budget_usd) {
                    over_budget = true;
                    reject(
                        node,
                        Rejection::OverBudget {
                            total_usd: cost.total_usd,
                            budget_usd: job.sla.budget_usd.unwrap_or_default(),
                        },
                    );
                    return None;
                }
                Some(Placement {
                    node_id: node.id().clone(),
                    cost,
                    estimated_latency_ms: candidate.latency_ms,
                })
            })
            .collect();

        priced
            .into_iter()
            .min_by(|a, b| {
                a.cost
                    .total_usd
                    .total_cmp(&b.cost.total_usd)
                    .then_with(|| a.node_id.cmp(&b.node_id))
            })
            .ok_or_else(|| Infeasible {
                reason: if over_budget {
                    InfeasibleReason::OverBudget
                } else {
                    InfeasibleReason::NoCapacity
                },
                rejected,
            })
    }

    /// Cost formula inputs for `job` on `node`.
    ///
    /// Only on-premise nodes carry an idle window: the share of the node's CPU
    /// still free after this job lands, for the job's duration.
    #[must_use]
    pub fn cost_inputs(&self, job: &JobSpec, node: &Node) -> CostInputs {
        let spec = &node.spec;
        let idle_hours = if spec.on_premise {
            job.estimated_duration_hours * free_cpu_fraction_after(node, &job.resources)
        } else {
            0.0
        };

        CostInputs::new(spec.price_per_hour_usd, job.estimated_duration_hours)
            .with_utilization(self.pricing.utilization_factor)
            .with_data_transfer(job.estimated_data_gb, spec.transfer_price_per_gb_usd)
            .with_idle_window(idle_hours, spec.idle_opportunity_usd_per_hour)
    }
}

fn free_cpu_fraction_after(node: &Node, request: &Resources) -> f64 {
    let capacity = node.spec.capacity.cpu_millis;
    if capacity == 0 {
        return 0.0;
    }
    let used = node.reserved.cpu_millis.saturating_add(request.cpu_millis);
    capacity.saturating_sub(used) as f64 / capacity as f64
}

fn estimated_finish(now: DateTime<Utc>, latency_ms: u64, duration_hours: f64) -> DateTime<Utc> {
    // Clamp to a century so absurd estimates cannot overflow the timestamp.
    const MAX_MS: f64 = 100.0 * 365.0 * 24.0 * 3_600_000.0;
    let run_ms = (duration_hours * 3_600_000.0).clamp(0.0, MAX_MS) as i64;
    let latency_ms = i64::try_from(latency_ms).unwrap_or(i64::MAX).min(MAX_MS as i64);
    now + chrono::Duration::milliseconds(run_ms.saturating_add(latency_ms))
}
