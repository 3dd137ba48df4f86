//! Error taxonomy shared by providers, the speech queue, the bell engine
//! and the reading session.

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpeechError {
    /// Precondition failure caught before any I/O.
    #[error("{0}")]
    Validation(String),

    #[error("voice not available for this provider: {0}")]
    InvalidVoice(String),

    #[error("authentication failed: check your credentials")]
    AuthenticationFailed,

    #[error("rate limit exceeded, please try again later")]
    RateLimited,

    #[error("speech service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("speech synthesis timed out")]
    Timeout,

    #[error("no audio returned by speech service")]
    NoAudioReturned,

    #[error("sound unavailable: {0}")]
    SoundUnavailable(String),

    #[error("speech service rejected the request: {0}")]
    Upstream(String),

    #[error("audio output error: {0}")]
    Audio(String),

    /// Expected outcome of `stop()`/`cancel()`; never shown to the user.
    #[error("cancelled")]
    Cancelled,
}

impl SpeechError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::InvalidVoice(_) => ErrorKind::InvalidVoice,
            Self::AuthenticationFailed => ErrorKind::AuthenticationFailed,
            Self::RateLimited => ErrorKind::RateLimited,
            Self::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            Self::Timeout => ErrorKind::Timeout,
            Self::NoAudioReturned => ErrorKind::NoAudioReturned,
            Self::SoundUnavailable(_) => ErrorKind::SoundUnavailable,
            Self::Upstream(_) => ErrorKind::Upstream,
            Self::Audio(_) => ErrorKind::Audio,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Fieldless mirror of [`SpeechError`] for events and API payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    InvalidVoice,
    AuthenticationFailed,
    RateLimited,
    ServiceUnavailable,
    Timeout,
    NoAudioReturned,
    SoundUnavailable,
    Upstream,
    Audio,
    Cancelled,
}

pub type Result<T> = std::result::Result<T, SpeechError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(SpeechError::RateLimited.kind(), ErrorKind::RateLimited);
        assert_eq!(
            SpeechError::Validation("x".into()).kind(),
            ErrorKind::Validation
        );
        assert!(SpeechError::Cancelled.is_cancelled());
        assert!(!SpeechError::Timeout.is_cancelled());
    }

    #[test]
    fn validation_message_is_verbatim() {
        let err = SpeechError::Validation("Please select a voice".into());
        assert_eq!(err.to_string(), "Please select a voice");
        assert_eq!(
            SpeechError::RateLimited.to_string(),
            "rate limit exceeded, please try again later"
        );
    }
}
