//! Error taxonomy for platform call outcomes.
//!
//! The scheduler only needs to know one thing about a failed call: whether
//! it is worth retrying. Transient failures (flood waits, timeouts, network
//! hiccups) feed the retry logic and the circuit breaker; permanent failures
//! (bad target, missing permission) surface to the caller immediately and
//! leave the breaker untouched.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by a platform call executor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    /// The platform imposed a wait before this identity may call again.
    #[error("flood wait required: {0} seconds")]
    FloodWait(u32),

    /// The call did not complete in time.
    #[error("call timed out")]
    Timeout,

    /// Transport-level failure (connection reset, DNS, etc.).
    #[error("network error: {0}")]
    Network(String),

    /// The target does not exist or cannot be resolved.
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// The identity is not allowed to perform this action on the target.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

impl CallError {
    /// Whether this failure is worth retrying on another attempt.
    ///
    /// Transient failures count toward the circuit breaker threshold and
    /// re-enter the retry loop; permanent ones do neither.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::FloodWait(_) | Self::Timeout | Self::Network(_)
        )
    }

    /// Server-imposed wait carried by this error, if any.
    #[must_use]
    pub const fn penalty(&self) -> Option<Duration> {
        match self {
            Self::FloodWait(seconds) => Some(Duration::from_secs(*seconds as u64)),
            _ => None,
        }
    }
}

/// Extracts flood wait seconds from a raw platform error message.
///
/// Executors wrapping a real client can use this to classify errors the
/// platform reports as opaque strings.
#[must_use]
pub fn extract_flood_wait_seconds(err_msg: &str) -> Option<u32> {
    // Search and slice the same lowercased copy; indexes into the original
    // string would drift when lowercasing changes a character's byte length.
    let lowered = err_msg.to_lowercase();

    for pattern in ["flood_wait_", "flood wait "] {
        if let Some(idx) = lowered.find(pattern) {
            let digits: String = lowered[idx + pattern.len()..]
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            if let Ok(seconds) = digits.parse() {
                return Some(seconds);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(CallError::FloodWait(30).is_transient());
        assert!(CallError::Timeout.is_transient());
        assert!(CallError::Network("reset".to_owned()).is_transient());
        assert!(!CallError::InvalidTarget("@gone".to_owned()).is_transient());
        assert!(!CallError::PermissionDenied("not admin".to_owned()).is_transient());
    }

    #[test]
    fn test_penalty_only_for_flood_wait() {
        assert_eq!(
            CallError::FloodWait(30).penalty(),
            Some(Duration::from_secs(30))
        );
        assert_eq!(CallError::Timeout.penalty(), None);
    }

    #[test]
    fn test_extract_flood_wait() {
        assert_eq!(extract_flood_wait_seconds("FLOOD_WAIT_120"), Some(120));
        assert_eq!(extract_flood_wait_seconds("flood wait 60 seconds"), Some(60));
        assert_eq!(extract_flood_wait_seconds("some other error"), None);
    }

    #[test]
    fn test_extract_flood_wait_multibyte_prefix() {
        // 'İ' lowercases to two chars, shifting byte offsets.
        assert_eq!(
            extract_flood_wait_seconds("İstanbul relay: FLOOD_WAIT_42"),
            Some(42)
        );
    }
}
