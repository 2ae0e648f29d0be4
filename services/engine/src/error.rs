//! Error types for the OrgTrust engine
//!
//! `BackendError` is the contract every external collaborator (account
//! catalog, session provider, IAM, service quotas) reports failures through.
//! `OrgError` is what engine operations return.

use thiserror::Error;

/// Failures reported by an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The entity being created already exists
    #[error("entity already exists: {0}")]
    AlreadyExists(String),

    /// The entity being read or modified does not exist
    #[error("no such entity: {0}")]
    NoSuchEntity(String),

    /// The resource (e.g. a service quota) is not visible to this caller
    #[error("no such resource: {0}")]
    NoSuchResource(String),

    /// The caller is not allowed to perform the operation
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The provider asked us to slow down
    #[error("throttled: {0}")]
    Throttled(String),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

/// Errors returned by engine operations.
#[derive(Debug, Error)]
pub enum OrgError {
    /// Contradictory or unsupported selection input
    #[error("ValidationError: {0}")]
    Validation(String),

    /// An expected special-purpose account is missing
    #[error("NotFoundError: {0}")]
    NotFound(String),

    /// Creation raced with an existing resource and the fetch that follows failed too
    #[error("ConflictError: {0}")]
    Conflict(String),

    /// Every role in the assumption chain failed for one account
    #[error("UnreachableAccountError: account {account_id}: {reason}")]
    UnreachableAccount { account_id: String, reason: String },

    /// Listing or describing the organization failed
    #[error("AggregationError: {0}")]
    Aggregation(String),

    /// A service quota increase was not granted before the caller's deadline
    #[error("deadline passed raising quota {quota_code} {service_code} in {region}; continuing")]
    DeadlinePassed {
        quota_code: String,
        service_code: String,
        region: String,
    },

    /// A worker panicked while reconciling one account
    #[error("worker panicked: {0}")]
    Panicked(String),

    /// Invalid engine configuration
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrgError {
    /// Soft conditions may be logged and proceeded past.
    pub fn is_soft(&self) -> bool {
        matches!(self, OrgError::DeadlinePassed { .. })
    }

    /// Fatal conditions abort a whole sweep rather than a single account.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OrgError::Aggregation(_) | OrgError::NotFound(_) | OrgError::Validation(_)
        )
    }

    pub(crate) fn aggregation(context: &str, err: impl std::fmt::Display) -> Self {
        OrgError::Aggregation(format!("{}: {}", context, err))
    }

    pub(crate) fn unreachable(account_id: &str, reason: impl Into<String>) -> Self {
        OrgError::UnreachableAccount {
            account_id: account_id.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = OrgError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_passed_is_soft() {
        let err = OrgError::DeadlinePassed {
            quota_code: "L-1216C47A".to_string(),
            service_code: "ec2".to_string(),
            region: "us-west-2".to_string(),
        };
        assert!(err.is_soft());
        assert!(!err.is_fatal());
        assert_eq!(
            err.to_string(),
            "deadline passed raising quota L-1216C47A ec2 in us-west-2; continuing"
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(OrgError::aggregation("listing accounts", "boom").is_fatal());
        assert!(OrgError::NotFound("deploy account".into()).is_fatal());
        assert!(!OrgError::unreachable("123456789012", "denied").is_fatal());
        assert!(!OrgError::from(BackendError::Throttled("slow down".into())).is_fatal());
        assert!(!OrgError::Panicked("index out of bounds".into()).is_fatal());
    }
}
