//! Command implementations.

mod cluster;
mod job;
mod submit;

pub use cluster::ClusterCommand;
pub use job::JobCommand;
pub use submit::SubmitCommand;
