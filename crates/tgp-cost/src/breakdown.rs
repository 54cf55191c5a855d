//! The cost breakdown value produced for a candidate placement.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Cost of running one job on one node, split into its three TCO terms.
///
/// Produced by [`CostEngine::evaluate`](crate::CostEngine::evaluate) and
/// never mutated afterwards. `total_usd` is always the plain sum of the
/// three components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    /// Compute cost (`C_comp`).
    pub compute_usd: f64,
    /// Data movement cost (`C_data`).
    pub data_transfer_usd: f64,
    /// Opportunity cost of capacity left idle (`C_idle`).
    pub idle_opportunity_usd: f64,
    /// `C_comp + C_data + C_idle`.
    pub total_usd: f64,
}

impl CostBreakdown {
    /// A breakdown where every term is zero.
    pub const ZERO: Self = Self {
        compute_usd: 0.0,
        data_transfer_usd: 0.0,
        idle_opportunity_usd: 0.0,
        total_usd: 0.0,
    };

    pub(crate) fn from_components(compute: f64, data: f64, idle: f64) -> Self {
        Self {
            compute_usd: compute,
            data_transfer_usd: data,
            idle_opportunity_usd: idle,
            total_usd: compute + data + idle,
        }
    }

    /// Whether the total fits within an optional budget ceiling.
    ///
    /// No ceiling means any cost is acceptable.
    #[must_use]
    pub fn within_budget(&self, budget_usd: Option<f64>) -> bool {
        budget_usd.is_none_or(|budget| self.total_usd <= budget)
    }
}

impl fmt::Display for CostBreakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "${:.4} (compute ${:.4}, data ${:.4}, idle ${:.4})",
            self.total_usd, self.compute_usd, self.data_transfer_usd, self.idle_opportunity_usd
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_components_sums_total() {
        let cost = CostBreakdown::from_components(1.5, 0.25, 0.125);
        assert_eq!(cost.total_usd, 1.875);
    }

    #[test]
    fn test_zero() {
        assert_eq!(CostBreakdown::ZERO.total_usd, 0.0);
        assert!(CostBreakdown::ZERO.within_budget(Some(0.0)));
    }

    #[test]
    fn test_within_budget() {
        let cost = CostBreakdown::from_components(1.0, 0.0, 0.0);
        assert!(cost.within_budget(None));
        assert!(cost.within_budget(Some(1.0)));
        assert!(!cost.within_budget(Some(0.99)));
    }

    #[test]
    fn test_display() {
        let cost = CostBreakdown::from_components(0.1, 0.0, 0.0);
        assert_eq!(
            cost.to_string(),
            "$0.1000 (compute $0.1000, data $0.0000, idle $0.0000)"
        );
    }

    #[test]
    fn test_serde_field_names() {
        let cost = CostBreakdown::from_components(0.1, 0.2, 0.3);
        let json = serde_json::to_string(&cost).unwrap();
        assert!(json.contains("compute_usd"));
        assert!(json.contains("data_transfer_usd"));
        assert!(json.contains("idle_opportunity_usd"));
        assert!(json.contains("total_usd"));
    }
}
