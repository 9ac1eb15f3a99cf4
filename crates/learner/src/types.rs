//! Core types shared by the registry, resolver, sink and reconciler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Value held by a destination command while its code is still being learned.
pub const PENDING_SENTINEL: &str = "pending";

/// Value written to a destination command once learning has failed.
pub const ERROR_SENTINEL: &str = "error";

/// Identity the origin store is expected to file a learned code under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OriginKey {
    /// Device name inside the origin shard.
    pub device_name: String,
    /// Command name under that device.
    pub command_name: String,
}

impl OriginKey {
    pub fn new(device_name: impl Into<String>, command_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            command_name: command_name.into(),
        }
    }
}

impl fmt::Display for OriginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device_name, self.command_name)
    }
}

/// Persistent record that receives a resolved code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Destination {
    /// Entry in the device document, keyed by device id.
    DeviceRecord { device_id: String },
    /// Numeric-code profile file inside a platform directory.
    ProfileRecord {
        profile_path: PathBuf,
        platform: String,
    },
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceRecord { device_id } => write!(f, "device:{device_id}"),
            Self::ProfileRecord {
                profile_path,
                platform,
            } => write!(f, "profile:{platform}:{}", profile_path.display()),
        }
    }
}

/// Origin scope to delete once the code has been copied to its destination.
///
/// When `shard` is unset the record is deleted from whichever shard it was
/// found in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupTarget {
    #[serde(default)]
    pub shard: Option<String>,
}

/// Signal type recorded next to device command values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    #[default]
    Ir,
    Rf,
}

impl CommandKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ir => "ir",
            Self::Rf => "rf",
        }
    }
}

/// Lifecycle state of a pending operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    Pending,
    Resolved,
    Error,
}

/// Why an operation ended in [`OperationState::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// Neither the exact key nor a fallback candidate appeared before the deadline.
    NotFoundTimeout,
    /// The broadened search saw several devices carrying the command.
    AmbiguousMatch { candidates: usize },
    /// The code was found but every destination write failed until the deadline.
    WriteFailed,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFoundTimeout => write!(f, "no learned code found before timeout"),
            Self::AmbiguousMatch { candidates } => {
                write!(f, "fallback search matched {candidates} devices")
            }
            Self::WriteFailed => write!(f, "destination write failed until timeout"),
        }
    }
}

/// An outstanding learn request waiting for its code to show up.
#[derive(Debug, Clone)]
pub struct PendingOperation {
    /// Generation tag; a replaced operation never removes its replacement.
    pub id: Uuid,
    pub origin_key: OriginKey,
    pub destination: Destination,
    pub cleanup_target: Option<CleanupTarget>,
    /// Controller the learn was issued on. Restricts the search when set.
    pub shard: Option<String>,
    pub kind: CommandKind,
    pub created_at: Instant,
    pub submitted_at: DateTime<Utc>,
    pub fallback_attempted: bool,
    /// Candidates seen by the broadened search, if it ran.
    pub fallback_candidates: Option<usize>,
    pub state: OperationState,
}

impl PendingOperation {
    #[must_use]
    pub fn new(origin_key: OriginKey, destination: Destination) -> Self {
        Self {
            id: Uuid::new_v4(),
            origin_key,
            destination,
            cleanup_target: None,
            shard: None,
            kind: CommandKind::default(),
            created_at: Instant::now(),
            submitted_at: Utc::now(),
            fallback_attempted: false,
            fallback_candidates: None,
            state: OperationState::Pending,
        }
    }

    #[must_use]
    pub fn with_cleanup(mut self, target: CleanupTarget) -> Self {
        self.cleanup_target = Some(target);
        self
    }

    #[must_use]
    pub fn with_shard(mut self, shard: impl Into<String>) -> Self {
        self.shard = Some(shard.into());
        self
    }

    #[must_use]
    pub fn with_kind(mut self, kind: CommandKind) -> Self {
        self.kind = kind;
        self
    }

    /// Time since submission, measured against `now`.
    #[must_use]
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    /// Move out of `Pending`. Returns `false` if the operation already ended.
    pub fn finish(&mut self, state: OperationState) -> bool {
        if self.state != OperationState::Pending || state == OperationState::Pending {
            return false;
        }
        self.state = state;
        true
    }
}
