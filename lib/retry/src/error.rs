use std::fmt::{Display, Formatter};

/// Failure classes a store error, or the retrier itself, can report.
///
/// Only [`ErrorKind::Conflict`] is retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The resource version carried by a write is stale
    Conflict,
    NotFound,
    PermissionDenied,
    /// Network failures, timeouts and an unavailable store
    Transport,
    InvalidConfiguration,
    Cancelled,
    Other,
}

impl ErrorKind {
    #[inline]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Conflict)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::Transport => "transport",
            ErrorKind::InvalidConfiguration => "invalid_configuration",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Other => "other",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implemented by store errors so the retrier can tell a version conflict
/// from everything else.
pub trait Classify {
    fn kind(&self) -> ErrorKind;

    fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error<E> {
    /// The policy is unusable, the operation was never invoked.
    #[error("invalid retry configuration, {0}")]
    InvalidConfiguration(String),

    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },

    /// Every attempt ended with a conflict, `source` is the last one.
    #[error("gave up after {attempts} attempts, {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },

    /// A non-retryable error, returned as the store reported it.
    #[error("attempt {attempts} failed, {source}")]
    Failed {
        attempts: u32,
        #[source]
        source: E,
    },
}

impl<E> Error<E> {
    /// Number of times the operation was invoked.
    pub fn attempts(&self) -> u32 {
        match self {
            Error::InvalidConfiguration(_) => 0,
            Error::Cancelled { attempts }
            | Error::Exhausted { attempts, .. }
            | Error::Failed { attempts, .. } => *attempts,
        }
    }

    /// The store error behind this failure, if there is one.
    pub fn source_error(&self) -> Option<&E> {
        match self {
            Error::Exhausted { source, .. } | Error::Failed { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn into_source(self) -> Option<E> {
        match self {
            Error::Exhausted { source, .. } | Error::Failed { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl<E: Classify> Classify for Error<E> {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
            Error::Exhausted { .. } => ErrorKind::Conflict,
            Error::Failed { source, .. } => source.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("stale version")]
    struct Stale;

    impl Classify for Stale {
        fn kind(&self) -> ErrorKind {
            ErrorKind::Conflict
        }
    }

    #[test]
    fn exhausted_reports_attempts() {
        let err = Error::Exhausted {
            attempts: 4,
            source: Stale,
        };

        assert_eq!(err.attempts(), 4);
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.to_string(), "gave up after 4 attempts, stale version");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn configuration_has_no_source() {
        let err = Error::<Stale>::InvalidConfiguration("max_attempts must be at least 1".into());

        assert_eq!(err.attempts(), 0);
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
        assert!(err.into_source().is_none());
    }

    #[test]
    fn only_conflict_is_retryable() {
        assert!(ErrorKind::Conflict.is_retryable());

        for kind in [
            ErrorKind::NotFound,
            ErrorKind::PermissionDenied,
            ErrorKind::Transport,
            ErrorKind::InvalidConfiguration,
            ErrorKind::Cancelled,
            ErrorKind::Other,
        ] {
            assert!(!kind.is_retryable(), "{kind} should not be retried");
        }
    }
}
