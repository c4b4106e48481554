//! Core data structures and types
//!
//! Entities are plain identifier strings checked against a per-kind format.
//! Each work type leases one entity kind and owns its own lease table.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use rand::RngCore;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

// ============================================================================
// Validation
// ============================================================================

/// Shape errors in submitted IDs or payloads.
///
/// Every variant maps to a stable numeric code returned by the coordinator API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Channel ID does not match `UC` + 22 base64url characters
    #[error("Malformed channel ID: {0}")]
    MalformedChannelId(String),

    /// Video ID does not match 11 base64url characters
    #[error("Malformed video ID: {0}")]
    MalformedVideoId(String),

    /// Body was expected to be a JSON array
    #[error("Expected a JSON array")]
    ExpectedArray,

    /// Body was expected to be a JSON object
    #[error("Expected a JSON object")]
    ExpectedObject,

    /// Playlist ID matches none of the known playlist shapes
    #[error("Malformed playlist ID: {0}")]
    MalformedPlaylistId(String),

    /// Artifact payload has the wrong JSON type
    #[error("Malformed payload for {0}")]
    MalformedPayload(String),
}

impl ValidationError {
    /// Stable numeric code used on the wire
    pub fn code(&self) -> u16 {
        match self {
            Self::MalformedChannelId(_) => 5,
            Self::MalformedVideoId(_) => 6,
            Self::ExpectedArray => 7,
            Self::ExpectedObject => 8,
            Self::MalformedPlaylistId(_) => 9,
            Self::MalformedPayload(_) => 10,
        }
    }
}

fn channel_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^UC[A-Za-z0-9_-]{22}$").expect("Invalid regex pattern"))
}

fn video_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("Invalid regex pattern"))
}

fn playlist_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:PL(?:[0-9A-F]{16}|[A-Za-z0-9_-]{32})|(?:LL|FL|UU)[A-Za-z0-9_-]{22})$")
            .expect("Invalid regex pattern")
    })
}

// ============================================================================
// Entity Kind
// ============================================================================

/// Kind of entity held in the identifier store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Channel,
    Video,
    Playlist,
}

impl EntityKind {
    /// All entity kinds
    pub const ALL: [EntityKind; 3] = [Self::Channel, Self::Video, Self::Playlist];

    /// Singular name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Channel => "channel",
            Self::Video => "video",
            Self::Playlist => "playlist",
        }
    }

    /// Plural name, used for routes and JSON keys
    pub fn plural(&self) -> &'static str {
        match self {
            Self::Channel => "channels",
            Self::Video => "videos",
            Self::Playlist => "playlists",
        }
    }

    /// Identifier store table for this kind
    pub(crate) fn table(&self) -> &'static str {
        self.plural()
    }

    /// Check whether `id` has the shape of this kind
    pub fn is_valid(&self, id: &str) -> bool {
        match self {
            Self::Channel => channel_re().is_match(id),
            Self::Video => video_re().is_match(id),
            Self::Playlist => playlist_re().is_match(id),
        }
    }

    /// Validate `id`, returning the kind-specific error on mismatch
    pub fn validate(&self, id: &str) -> Result<(), ValidationError> {
        if self.is_valid(id) {
            return Ok(());
        }
        Err(self.malformed(id))
    }

    /// Kind-specific error for a value that is not a valid ID
    pub fn malformed(&self, raw: impl Into<String>) -> ValidationError {
        let raw = raw.into();
        match self {
            Self::Channel => ValidationError::MalformedChannelId(raw),
            Self::Video => ValidationError::MalformedVideoId(raw),
            Self::Playlist => ValidationError::MalformedPlaylistId(raw),
        }
    }

    /// Validate every ID in a batch; the first failure rejects the batch
    pub fn validate_all<'a, I>(&self, ids: I) -> Result<(), ValidationError>
    where
        I: IntoIterator<Item = &'a String>,
    {
        ids.into_iter().try_for_each(|id| self.validate(id))
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "channel" | "channels" => Ok(Self::Channel),
            "video" | "videos" => Ok(Self::Video),
            "playlist" | "playlists" => Ok(Self::Playlist),
            other => Err(format!("Unknown entity kind: {other}")),
        }
    }
}

// ============================================================================
// Work Type
// ============================================================================

/// Range an assignment limit is clamped into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitRange {
    /// Used when the request carries no usable limit
    pub default: u32,
    /// Upper bound (lower bound is always 1)
    pub max: u32,
}

impl LimitRange {
    /// Clamp a raw `limit` query value
    ///
    /// Missing, unparsable or zero values fall back to the default.
    pub fn clamp(&self, raw: Option<&str>) -> u32 {
        let requested = raw
            .and_then(|s| s.trim().parse::<i64>().ok())
            .filter(|n| *n != 0)
            .unwrap_or(self.default as i64);

        requested.clamp(1, self.max.max(1) as i64) as u32
    }
}

/// A kind of leasable work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkType {
    /// Scan a channel for its uploaded videos
    Channel,
    /// Fetch the annotation payload of a video
    Video,
}

impl WorkType {
    /// All work types
    pub const ALL: [WorkType; 2] = [Self::Channel, Self::Video];

    /// Short name used in logs, metrics and routes
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Channel => "channel",
            Self::Video => "video",
        }
    }

    /// Entity kind leased by this work type
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            Self::Channel => EntityKind::Channel,
            Self::Video => EntityKind::Video,
        }
    }

    /// Lease table backing this work type
    pub(crate) fn lease_table(&self) -> &'static str {
        match self {
            Self::Channel => "channel_leases",
            Self::Video => "video_leases",
        }
    }

    /// Default clamp range for `AssignBatch`
    pub fn default_limits(&self) -> LimitRange {
        match self {
            Self::Channel => LimitRange { default: 1, max: 50 },
            Self::Video => LimitRange { default: 50, max: 250 },
        }
    }
}

impl fmt::Display for WorkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "channel" | "channels" => Ok(Self::Channel),
            "video" | "videos" => Ok(Self::Video),
            other => Err(format!("Unknown work type: {other}")),
        }
    }
}

// ============================================================================
// Worker Identity
// ============================================================================

/// Opaque worker token issued by the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    /// Generate a fresh token: hex SHA-256 of 32 random bytes
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        let digest = Sha256::digest(seed);
        Self(format!("{digest:x}"))
    }

    /// Wrap an existing token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Token as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for WorkerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Lease
// ============================================================================

/// One row of a lease table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub work_type: WorkType,
    pub entity_id: String,
    pub worker_id: WorkerId,
    pub acquired_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Lease {
    /// A lease is open until it is completed
    pub fn is_open(&self) -> bool {
        self.completed_at.is_none()
    }
}

/// Convert a stored millisecond timestamp back to UTC
pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}
