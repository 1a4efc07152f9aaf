use std::time::Duration;

use sea_orm::DbErr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("audience {0} not found")]
    AudienceNotFound(Uuid),
    #[error("database error during audience resolution: {0}")]
    Db(#[from] DbErr),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("timeout after {0:?} handing message to mail transport")]
    Timeout(Duration),
    #[error("mail transport rejected message: {0}")]
    Rejected(String),
    #[error("invalid mailbox address: {0}")]
    InvalidAddress(String),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("campaign {0} targets no included audiences")]
    NoAudiences(Uuid),
    #[error("database error during dispatch: {0}")]
    Db(#[from] DbErr),
}

impl DispatchError {
    /// Whether the campaign should stay `Scheduled` and be retried on the
    /// next dispatcher tick, as opposed to being marked `Failed`.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::Resolve(ResolveError::Db(_)) | DispatchError::Db(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_errors_are_retryable() {
        let err = DispatchError::Db(DbErr::Custom("connection reset".into()));
        assert!(err.is_retryable());
        let err = DispatchError::Resolve(ResolveError::Db(DbErr::Custom("timeout".into())));
        assert!(err.is_retryable());
    }

    #[test]
    fn missing_audiences_are_not_retryable() {
        let err = DispatchError::NoAudiences(Uuid::new_v4());
        assert!(!err.is_retryable());
        let err = DispatchError::Resolve(ResolveError::AudienceNotFound(Uuid::new_v4()));
        assert!(!err.is_retryable());
    }
}
