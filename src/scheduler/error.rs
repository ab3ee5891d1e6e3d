//! Error types for the scheduler module

use std::fmt;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug)]
pub enum SchedulerError {
    /// Frequency string that maps to no supported cadence
    InvalidFrequency {
        frequency: String,
        valid_options: Vec<String>,
    },

    /// Horizon of zero months can never hold an occurrence
    InvalidHorizon {
        months: u32,
    },

    /// Start time lies so far in the past that the whole horizon is spent
    HorizonExpired {
        start: String,
        horizon_months: u32,
    },

    /// Job could not be handed to the worker pool
    DispatchFailed {
        job_id: String,
        reason: String,
    },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidFrequency {
                frequency,
                valid_options,
            } => {
                write!(
                    f,
                    "Invalid frequency '{}'. Valid options: {}",
                    frequency,
                    valid_options.join(", ")
                )
            }
            Self::InvalidHorizon { months } => {
                write!(f, "Invalid horizon of {} months. Must be at least 1", months)
            }
            Self::HorizonExpired {
                start,
                horizon_months,
            } => {
                write!(
                    f,
                    "Start time {} with a {}-month horizon leaves no future occurrence",
                    start, horizon_months
                )
            }
            Self::DispatchFailed { job_id, reason } => {
                write!(f, "Failed to dispatch job '{}': {}", job_id, reason)
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

impl SchedulerError {
    /// Create an invalid frequency error
    pub fn invalid_frequency(frequency: impl Into<String>) -> Self {
        Self::InvalidFrequency {
            frequency: frequency.into(),
            valid_options: vec![
                "daily".to_string(),
                "weekly".to_string(),
                "monthly".to_string(),
                "none".to_string(),
            ],
        }
    }

    /// Create an invalid horizon error
    pub fn invalid_horizon(months: u32) -> Self {
        Self::InvalidHorizon { months }
    }

    /// Create a horizon expired error
    pub fn horizon_expired(start: impl Into<String>, horizon_months: u32) -> Self {
        Self::HorizonExpired {
            start: start.into(),
            horizon_months,
        }
    }

    /// Create a dispatch failure error
    pub fn dispatch_failed(job_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DispatchFailed {
            job_id: job_id.into(),
            reason: reason.into(),
        }
    }

    /// Check if the error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::DispatchFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_frequency_error() {
        let err = SchedulerError::invalid_frequency("hourly");
        assert!(err.to_string().contains("hourly"));
        assert!(err.to_string().contains("daily"));
    }

    #[test]
    fn test_horizon_expired_error() {
        let err = SchedulerError::horizon_expired("2020-01-01T00:00:00Z", 6);
        assert!(err.to_string().contains("2020-01-01"));
        assert!(err.to_string().contains("6-month"));
    }

    #[test]
    fn test_is_recoverable() {
        let dispatch = SchedulerError::dispatch_failed("job-1", "pool saturated");
        assert!(dispatch.is_recoverable());

        let invalid = SchedulerError::invalid_horizon(0);
        assert!(!invalid.is_recoverable());
    }
}
