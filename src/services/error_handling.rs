use thiserror::Error;
use tracing::{debug, error, warn};

use crate::domain::source::Source;

/// Error taxonomy of the notification engine
#[derive(Error, Debug)]
pub enum PulseError {
    #[error("Lookup of {entity} {id} failed")]
    LookupFailed {
        entity: &'static str,
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Live query on {collection} failed")]
    SubscriptionFailed {
        collection: Source,
        #[source]
        source: anyhow::Error,
    },

    #[error("Notification engine has stopped")]
    EngineStopped,

    #[error("Database operation failed: {operation}")]
    DatabaseError {
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },
}

/// Structured logging helpers
pub struct LogHelper;

impl LogHelper {
    /// Lookup failures are absorbed by enrichment; they only ever reach the log.
    pub fn log_lookup_failure(entity: &'static str, id: &str, err: &anyhow::Error) {
        let failure = PulseError::LookupFailed {
            entity,
            id: id.to_string(),
            source: anyhow::anyhow!("{:#}", err),
        };
        warn!(
            entity = entity,
            id = %id,
            error = %err,
            "{}; using placeholder values",
            failure
        );
    }

    pub fn log_subscription_failure(source: Source, err: anyhow::Error) {
        let failure = PulseError::SubscriptionFailed {
            collection: source,
            source: err,
        };
        error!(
            collection = %source,
            error_chain = ?anyhow::Error::from(failure).chain().map(|e| e.to_string()).collect::<Vec<_>>(),
            "Subscription failed; source treated as empty"
        );
    }

    pub fn log_stale_batch(source: Source, batch_generation: u64, current_generation: u64) {
        debug!(
            collection = %source,
            batch_generation = batch_generation,
            current_generation = current_generation,
            "Dropping batch from a torn-down subscription"
        );
    }
}

/// User-facing text for the notification screen
pub struct UserErrorFormatter;

impl UserErrorFormatter {
    pub fn format_for_ui(error: &anyhow::Error) -> String {
        if let Some(pulse_error) = error.downcast_ref::<PulseError>() {
            return Self::format_pulse_error(pulse_error);
        }

        let error_str = error.to_string();

        if error_str.contains("permission") || error_str.contains("unauthorized") {
            return "You don't have permission to view these notifications.".to_string();
        }

        if error_str.contains("network") || error_str.contains("connection") {
            return "Network connection error. Notifications will refresh when you're back online.".to_string();
        }

        "Something went wrong loading notifications.".to_string()
    }

    pub fn format_failed_source(source: Source) -> String {
        format!("Could not load {} notifications.", source)
    }

    fn format_pulse_error(error: &PulseError) -> String {
        match error {
            PulseError::LookupFailed { .. } => "Some notification details could not be loaded.".to_string(),
            PulseError::SubscriptionFailed { collection, .. } => Self::format_failed_source(*collection),
            PulseError::EngineStopped => "Notifications are no longer updating.".to_string(),
            PulseError::DatabaseError { .. } => {
                "A database error occurred. Please try again.".to_string()
            }
            PulseError::ConfigurationError { message } => {
                format!("Configuration error: {}", message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = PulseError::SubscriptionFailed {
            collection: Source::Follows,
            source: anyhow::anyhow!("permission denied"),
        };
        assert_eq!(err.to_string(), "Live query on follows failed");

        let err = PulseError::LookupFailed {
            entity: "user",
            id: "u1".to_string(),
            source: anyhow::anyhow!("timeout"),
        };
        assert_eq!(err.to_string(), "Lookup of user u1 failed");
    }

    #[test]
    fn test_user_error_formatting() {
        let err = anyhow::Error::from(PulseError::SubscriptionFailed {
            collection: Source::LoginActivities,
            source: anyhow::anyhow!("boom"),
        });
        assert_eq!(
            UserErrorFormatter::format_for_ui(&err),
            "Could not load loginActivities notifications."
        );

        let err = anyhow::Error::from(PulseError::DatabaseError {
            operation: "run migrations".to_string(),
            source: anyhow::anyhow!("disk I/O error"),
        });
        assert_eq!(
            UserErrorFormatter::format_for_ui(&err),
            "A database error occurred. Please try again."
        );

        let err = anyhow::anyhow!("connection reset by peer");
        assert!(UserErrorFormatter::format_for_ui(&err).starts_with("Network connection error"));

        let err = anyhow::anyhow!("strange");
        assert_eq!(
            UserErrorFormatter::format_for_ui(&err),
            "Something went wrong loading notifications."
        );
    }
}
