use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

/// Core error taxonomy (§7): one variant per bucket, each carrying the
/// wire `code` string so gateway edges can format `{success:false, error,
/// code}` without re-deriving it from the variant.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(&'static str),

    #[error("channel is busy")]
    Busy,

    #[error("no active transmission")]
    NoSession,

    #[error("not the transmission owner")]
    NotOwner,

    #[error("participant unknown")]
    UnknownParticipant,

    #[error("channel at capacity")]
    Capacity,

    #[error("duplicate device for this channel")]
    DuplicateDevice,

    #[error("channel not found")]
    ChannelNotFound,

    #[error("emergency transmission not permitted for this principal")]
    ForbiddenEmergency,

    #[error("listener socket write failed: {0}")]
    Transport(String),

    #[error("coordinator encountered an unrecoverable error: {0}")]
    FatalChannel(String),
}

impl CoreError {
    /// Wire vocabulary from §6.4's error frame codes.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "invalid_chunk",
            CoreError::Busy => "busy",
            CoreError::NoSession => "no_session",
            CoreError::NotOwner => "not_owner",
            CoreError::UnknownParticipant => "unauthorized",
            CoreError::Capacity => "capacity",
            CoreError::DuplicateDevice => "duplicate_device",
            CoreError::ChannelNotFound => "channel_not_found",
            CoreError::ForbiddenEmergency => "unauthorized",
            CoreError::Transport(_) => "slow_consumer",
            CoreError::FatalChannel(_) => "channel_closing",
        }
    }

    /// True for errors in the "state conflict" bucket: rejected, state
    /// left intact, safe to retry once the conflicting condition clears.
    pub fn is_state_conflict(&self) -> bool {
        matches!(
            self,
            CoreError::Busy
                | CoreError::NoSession
                | CoreError::NotOwner
                | CoreError::Capacity
                | CoreError::DuplicateDevice
        )
    }
}
