use thiserror::Error;

/// Business errors for the approval and credit ledger engine.
///
/// `NotFound`, `Forbidden` and `Validation` are detected before any
/// transaction opens. `InvalidStateTransition` covers both a plain guard
/// failure (activity already decided, student editing a non-pending activity)
/// and losing the decide race to a concurrent caller.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failed_guard() {
        assert_eq!(LedgerError::NotFound("activity").to_string(), "activity not found");
        assert_eq!(
            LedgerError::InvalidStateTransition("activity is already approved".into()).to_string(),
            "invalid state transition: activity is already approved"
        );
        let wrapped = LedgerError::from(sqlx::Error::RowNotFound);
        assert!(wrapped.to_string().starts_with("database error:"));
    }
}
