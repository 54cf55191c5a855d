//! Evaluation of the TCO formula.

use serde::{Deserialize, Serialize};

use crate::breakdown::CostBreakdown;
use crate::error::CostError;

/// The seven numeric inputs of the cost formula.
///
/// All values must be non-negative and finite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostInputs {
    /// Node price in USD per hour.
    pub price_per_hour: f64,
    /// Estimated job duration in hours.
    pub duration_hours: f64,
    /// Fraction of the billed price attributed to the job.
    pub utilization_factor: f64,
    /// Data moved to or from the node, in GB.
    pub data_size_gb: f64,
    /// Transfer price in USD per GB.
    pub transfer_price_per_gb: f64,
    /// Capacity-hours left idle on the node by this placement.
    pub idle_capacity_hours: f64,
    /// Opportunity cost of idle capacity in USD per hour.
    pub opportunity_cost_per_hour: f64,
}

impl CostInputs {
    /// Inputs for a plain compute charge: utilization 1.0, no data movement
    /// and no idle window.
    #[must_use]
    pub const fn new(price_per_hour: f64, duration_hours: f64) -> Self {
        Self {
            price_per_hour,
            duration_hours,
            utilization_factor: 1.0,
            data_size_gb: 0.0,
            transfer_price_per_gb: 0.0,
            idle_capacity_hours: 0.0,
            opportunity_cost_per_hour: 0.0,
        }
    }

    /// Set the utilization factor.
    #[must_use]
    pub const fn with_utilization(mut self, factor: f64) -> Self {
        self.utilization_factor = factor;
        self
    }

    /// Set the data volume and its per-GB transfer price.
    #[must_use]
    pub const fn with_data_transfer(mut self, data_size_gb: f64, price_per_gb: f64) -> Self {
        self.data_size_gb = data_size_gb;
        self.transfer_price_per_gb = price_per_gb;
        self
    }

    /// Set the idle window and its hourly opportunity cost.
    #[must_use]
    pub const fn with_idle_window(mut self, idle_hours: f64, cost_per_hour: f64) -> Self {
        self.idle_capacity_hours = idle_hours;
        self.opportunity_cost_per_hour = cost_per_hour;
        self
    }

    /// Check every input.
    ///
    /// # Errors
    ///
    /// Returns [`CostError::InvalidInput`] for the first input that is
    /// negative, NaN, or infinite.
    pub fn validate(&self) -> Result<(), CostError> {
        validate_input("price_per_hour", self.price_per_hour)?;
        validate_input("duration_hours", self.duration_hours)?;
        validate_input("utilization_factor", self.utilization_factor)?;
        validate_input("data_size_gb", self.data_size_gb)?;
        validate_input("transfer_price_per_gb", self.transfer_price_per_gb)?;
        validate_input("idle_capacity_hours", self.idle_capacity_hours)?;
        validate_input("opportunity_cost_per_hour", self.opportunity_cost_per_hour)?;
        Ok(())
    }
}

/// Check a single cost input.
///
/// Callers that accept numbers destined for the cost formula (job duration,
/// data volume, node prices) use this to reject them at the boundary.
///
/// # Errors
///
/// Returns [`CostError::InvalidInput`] if `value` is negative, NaN, or infinite.
pub fn validate_input(field: &'static str, value: f64) -> Result<f64, CostError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(CostError::InvalidInput { field, value })
    }
}

/// The TCO cost model.
#[derive(Debug, Clone, Copy, Default)]
pub struct CostEngine;

impl CostEngine {
    /// Evaluate the cost formula.
    ///
    /// # Errors
    ///
    /// Returns [`CostError::InvalidInput`] if any input is negative, NaN, or
    /// infinite. Nothing is computed in that case.
    pub fn evaluate(inputs: &CostInputs) -> Result<CostBreakdown, CostError> {
        inputs.validate()?;

        let compute = inputs.price_per_hour * inputs.duration_hours * inputs.utilization_factor;
        let data = inputs.data_size_gb * inputs.transfer_price_per_gb;
        let idle = inputs.idle_capacity_hours * inputs.opportunity_cost_per_hour;

        // Products of large finite inputs can still overflow.
        validate_input("compute_usd", compute)?;
        validate_input("data_transfer_usd", data)?;
        validate_input("idle_opportunity_usd", idle)?;

        let breakdown = CostBreakdown::from_components(compute, data, idle);
        validate_input("total_usd", breakdown.total_usd)?;
        Ok(breakdown)
    }
}
