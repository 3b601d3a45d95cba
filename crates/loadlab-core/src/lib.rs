pub mod actions;
pub mod error;
pub mod models;
pub mod sampler;
pub mod supervisor;

pub use error::{SupervisorError, ValidationError};
pub use models::{Action, ActionStatus, ActionType, MetricsSnapshot};
pub use sampler::{MetricsSource, Sampler};
pub use supervisor::{Supervisor, SupervisorConfig};
