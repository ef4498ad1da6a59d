// Typed failures surfaced across the scheduling core.
//
// Infrastructure-level IO keeps using `anyhow`; these variants exist for the
// failures callers are expected to branch on (a rejected deferral keeps the
// defer dialog open, a missing writable resource aborts a scheduling request
// with a distinct CLI exit code, and so on).

use thiserror::Error;

use crate::resource::ResourceId;

#[derive(Debug, Error)]
pub enum AlarmError {
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("invalid recurrence: {0}")]
    InvalidRecurrence(String),

    #[error("deferral time is past the allowed limit")]
    DeferralBeyondLimit,

    #[error("no writable resource is enabled for {0} alarms")]
    NoWritableResource(String),

    #[error("resource {0} is read-only")]
    ResourceReadOnly(ResourceId),

    #[error("resource {0} is disabled for this alarm type")]
    ResourceDisabled(ResourceId),

    #[error("resource {0} uses an incompatible calendar format")]
    FormatIncompatible(ResourceId),

    #[error("failed to load {path}: {detail}")]
    LoadFailed { path: String, detail: String },

    #[error("failed to save {path}: {detail}")]
    SaveFailed { path: String, detail: String },

    #[error("event {0} not found")]
    EventNotFound(String),

    #[error("resource {0} not found")]
    ResourceNotFound(ResourceId),

    #[error("event is read-only")]
    ReadOnly,

    #[error("audio playback failed: {0}")]
    AudioError(String),

    #[error("email send failed: {0}")]
    EmailError(String),
}

pub type AlarmResult<T> = std::result::Result<T, AlarmError>;
