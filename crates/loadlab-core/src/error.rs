use thiserror::Error;

/// Rejection of experiment parameters before any resource is acquired.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{param} must be between {min} and {max}, got {got}")]
    OutOfRange {
        param: &'static str,
        min: u64,
        max: u64,
        got: u64,
    },

    #[error("total disk footprint would be {total_kb} KB, exceeds limit of {limit_kb} KB")]
    DiskFootprintExceeded { total_kb: u64, limit_kb: u64 },
}

/// Errors surfaced synchronously by the supervisor.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SupervisorError {
    #[error("maximum concurrent actions reached")]
    MaxConcurrentReached,

    #[error("CPU limit exceeded: current CPU {current:.1}% too high")]
    CpuLimitExceeded { current: f64 },

    #[error("memory limit exceeded: current memory {current:.1}% too high")]
    MemoryLimitExceeded { current: f64 },

    #[error("action not found")]
    ActionNotFound,
}
