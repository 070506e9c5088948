//! Core data model.
//!
//! A request is a unit of derivation work: "produce this kind of artifact
//! for that content item". It has identity (a monotonic ledger id), the
//! content it points at, lifecycle state, and an audit trail that is never
//! deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Content identity
// ---------------------------------------------------------------------------

/// Deterministic digest of a content item's bytes. Lowercase SHA-256 hex.
/// The dedup key for artifacts: identical bytes always produce the same hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 12 chars. Hashing always yields ASCII hex,
        // but the field is public, so cut on char boundaries.
        let end = self
            .0
            .char_indices()
            .nth(12)
            .map_or(self.0.len(), |(idx, _)| idx);
        write!(f, "{}", &self.0[..end])
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Newtype for ledger ids. Assigned monotonically by the database;
/// `claim_next` serves the lowest id first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub i64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of artifact a request asks for. Doubles as the notification
/// channel name for push dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Caption,
    Embedding,
}

impl RequestKind {
    pub const ALL: [RequestKind; 2] = [RequestKind::Caption, RequestKind::Embedding];

    /// Notification channel this kind publishes on.
    pub fn channel(self) -> &'static str {
        match self {
            RequestKind::Caption => "caption",
            RequestKind::Embedding => "embedding",
        }
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.channel())
    }
}

impl std::str::FromStr for RequestKind {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "caption" => Ok(RequestKind::Caption),
            "embedding" => Ok(RequestKind::Embedding),
            other => Err(crate::error::Error::Other(format!(
                "unknown request kind: {other}"
            ))),
        }
    }
}

/// Lifecycle state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Ledgered, waiting for (or owned by) a worker.
    Pending,
    /// Artifact stored, request done. Terminal.
    Fulfilled,
    /// Fetch or generation failed; error recorded. Terminal.
    Failed,
}

impl State {
    /// Can transition from self to `to`? Terminal states never leave.
    pub fn can_transition_to(self, to: State) -> bool {
        matches!(
            (self, to),
            (State::Pending, State::Fulfilled) | (State::Pending, State::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, State::Fulfilled | State::Failed)
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            State::Pending => "pending",
            State::Fulfilled => "fulfilled",
            State::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for State {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(State::Pending),
            "fulfilled" => Ok(State::Fulfilled),
            "failed" => Ok(State::Failed),
            other => Err(crate::error::Error::Other(format!(
                "unknown request state: {other}"
            ))),
        }
    }
}

/// A unit of derivation work tracked by the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Unique, monotonically assigned identifier.
    pub id: RequestId,

    /// Opaque locator (path or URL) for the content item. Not unique;
    /// many requests may reference the same ref before dedup resolves
    /// them to one content hash.
    pub content_ref: String,

    pub kind: RequestKind,

    /// Model hint for the generator. Empty means "default model for kind".
    pub model: String,

    pub state: State,

    /// Set only when state is `failed`.
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,

    /// Set when a worker takes ownership. Stays set on crash — a claimed
    /// but never completed request is a known gap in the baseline design.
    pub claimed_at: Option<DateTime<Utc>>,

    /// Set only in terminal states.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Builder for submitting requests. The ledger's public API.
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub(crate) content_ref: String,
    pub(crate) kind: RequestKind,
    pub(crate) model: String,
}

impl NewRequest {
    pub fn new(content_ref: impl Into<String>, kind: RequestKind) -> Self {
        Self {
            content_ref: content_ref.into(),
            kind,
            model: String::new(),
        }
    }

    /// Ask for a specific model rather than the kind's default.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// Width of the embeddings column. The schema fixes the vector type at
/// this dimension, so generator output of any other width is a malformed
/// generation, not a storable artifact.
pub const EMBEDDING_DIM: usize = 768;

/// A derived output, keyed by content hash. At most one stored caption and
/// one stored embedding per distinct hash, regardless of how many requests
/// produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    Caption {
        content_hash: ContentHash,
        model: String,
        text: String,
    },
    Embedding {
        content_hash: ContentHash,
        model: String,
        vector: Vec<f32>,
    },
}

impl Artifact {
    pub fn kind(&self) -> RequestKind {
        match self {
            Artifact::Caption { .. } => RequestKind::Caption,
            Artifact::Embedding { .. } => RequestKind::Embedding,
        }
    }

    pub fn content_hash(&self) -> &ContentHash {
        match self {
            Artifact::Caption { content_hash, .. } => content_hash,
            Artifact::Embedding { content_hash, .. } => content_hash,
        }
    }
}

/// Output of the generator collaborator, before it is bound to a hash.
/// Carries the model that actually ran, since an empty hint resolves to
/// the generator's default.
#[derive(Debug, Clone)]
pub struct Generated {
    pub model: String,
    pub payload: GeneratedPayload,
}

#[derive(Debug, Clone)]
pub enum GeneratedPayload {
    Caption(String),
    /// L2-normalized at generation time so stored vectors are directly
    /// comparable at query time.
    Embedding(Vec<f32>),
}

impl Generated {
    /// Bind this output to a content hash, producing a storable artifact.
    pub fn into_artifact(self, content_hash: ContentHash) -> Artifact {
        match self.payload {
            GeneratedPayload::Caption(text) => Artifact::Caption {
                content_hash,
                model: self.model,
                text,
            },
            GeneratedPayload::Embedding(vector) => Artifact::Embedding {
                content_hash,
                model: self.model,
                vector,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Payload published on a kind channel when a request is ledgered.
/// Advisory only: may be dropped, delayed, or duplicated by the transport.
/// Correctness never depends on it — workers poll regardless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestReady {
    pub request_id: RequestId,
    pub content_ref: String,
    pub kind: RequestKind,
}

/// Payload published on `artifact_inserted` after fulfillment, for
/// downstream consumers. Best-effort, never required for ledger correctness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactInserted {
    pub content_ref: String,
    pub content_hash: ContentHash,
    pub kind: RequestKind,
}

/// Channel for secondary (post-fulfillment) notifications.
pub const ARTIFACT_INSERTED_CHANNEL: &str = "artifact_inserted";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_reaches_both_terminals() {
        assert!(State::Pending.can_transition_to(State::Fulfilled));
        assert!(State::Pending.can_transition_to(State::Failed));
    }

    #[test]
    fn terminal_states_never_leave() {
        for from in [State::Fulfilled, State::Failed] {
            for to in [State::Pending, State::Fulfilled, State::Failed] {
                assert!(!from.can_transition_to(to), "{from} -> {to} should be invalid");
            }
        }
    }

    #[test]
    fn content_hash_short_display_is_twelve_chars() {
        let hash = ContentHash("e3b0c44298fc1c149afbf4c8996fb924".to_string());
        assert_eq!(hash.to_string(), "e3b0c44298fc");

        let short = ContentHash("abc".to_string());
        assert_eq!(short.to_string(), "abc");
    }

    #[test]
    fn content_hash_display_survives_multibyte_payloads() {
        // The inner field is public; non-hex contents must not panic.
        let odd = ContentHash("ééééééé".to_string());
        assert_eq!(odd.to_string(), "ééééééé");
        let long = ContentHash("é".repeat(20));
        assert_eq!(long.to_string().chars().count(), 12);
    }

    #[test]
    fn kind_roundtrips_through_display() {
        for kind in RequestKind::ALL {
            let parsed: RequestKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("thumbnail".parse::<RequestKind>().is_err());
    }

    #[test]
    fn state_roundtrips_through_display() {
        for state in [State::Pending, State::Fulfilled, State::Failed] {
            let parsed: State = state.to_string().parse().unwrap();
            assert_eq!(parsed, state);
        }
    }

    #[test]
    fn request_ready_payload_is_json() {
        let event = RequestReady {
            request_id: RequestId(42),
            content_ref: "img1.png".to_string(),
            kind: RequestKind::Caption,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: RequestReady = serde_json::from_str(&json).unwrap();
        assert_eq!(back.request_id, RequestId(42));
        assert_eq!(back.kind, RequestKind::Caption);
    }
}
