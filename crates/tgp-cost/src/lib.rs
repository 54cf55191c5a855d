//! # tgp-cost
//!
//! The TCO cost model ("Formula 4.1") used to rank job placements:
//!
//! ```text
//! C_total = C_comp + C_data + C_idle
//!
//! C_comp = price_per_hour * duration_hours * utilization_factor
//! C_data = data_size_gb * transfer_price_per_gb
//! C_idle = idle_capacity_hours * opportunity_cost_per_hour
//! ```
//!
//! Evaluation is a pure function over plain numbers. It holds no state and
//! may be called from any thread without synchronization.
//!
//! ```rust
//! use tgp_cost::{CostEngine, CostInputs};
//!
//! let inputs = CostInputs::new(0.10, 1.0).with_data_transfer(20.0, 0.01);
//! let cost = CostEngine::evaluate(&inputs).unwrap();
//! assert!((cost.total_usd - 0.30).abs() < 1e-12);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod breakdown;
pub mod engine;
pub mod error;

pub use breakdown::CostBreakdown;
pub use engine::{CostEngine, CostInputs, validate_input};
pub use error::CostError;
