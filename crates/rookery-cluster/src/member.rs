//! Member model and versioned revisions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique member identifier (UUID or human-readable string)
pub type MemberId = String;

/// A network endpoint advertised by a member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberAddress {
    /// Logical name of the endpoint (e.g. "grpc", "admin")
    pub name: String,

    /// Host name or IP address
    pub host: String,

    /// Port number
    pub port: u16,

    /// Whether the endpoint is TLS-protected
    pub secure: bool,
}

impl MemberAddress {
    /// Create a new plaintext address
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            secure: false,
        }
    }

    /// Mark the endpoint as TLS-protected
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }
}

/// A cluster member record as advertised through the substrate registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMember {
    /// Unique member identifier
    pub member_id: MemberId,

    /// Self-reported health of the member process
    pub active: bool,

    /// Operator-controlled enablement flag
    pub enabled: bool,

    /// Whether the member record is currently written to the substrate
    pub registered: bool,

    /// Custom metadata labels
    pub labels: HashMap<String, String>,

    /// Advertised endpoints
    pub addresses: Vec<MemberAddress>,
}

impl ClusterMember {
    /// Create a new member record (inactive, enabled, unregistered)
    pub fn new(member_id: impl Into<String>) -> Self {
        Self {
            member_id: member_id.into(),
            active: false,
            enabled: true,
            registered: false,
            labels: HashMap::new(),
            addresses: Vec::new(),
        }
    }

    /// Set the self-reported health flag
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Set the operator enablement flag
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Add a metadata label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add an advertised endpoint
    pub fn with_address(mut self, address: MemberAddress) -> Self {
        self.addresses.push(address);
        self
    }
}

/// A versioned record authored by a single member.
///
/// `revision` is a monotonically increasing counter produced by the authoring
/// process; revisions of the same member are totally ordered by it.
/// `timestamp` is the wall-clock time (epoch millis) at authoring and only
/// breaks ties between equal revisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRevision<T> {
    /// The versioned payload
    pub current: T,

    /// Monotonic revision counter
    pub revision: u64,

    /// Wall-clock time at authoring, epoch millis
    pub timestamp: i64,
}

impl<T> MemberRevision<T> {
    /// Create a new revision
    pub fn new(current: T, revision: u64, timestamp: i64) -> Self {
        Self {
            current,
            revision,
            timestamp,
        }
    }

    /// Whether this revision strictly supersedes `other`.
    ///
    /// Higher revision wins; equal revisions fall back to the higher
    /// timestamp; a fully equal pair does not supersede (keep existing).
    pub fn supersedes(&self, other: &Self) -> bool {
        self.revision > other.revision
            || (self.revision == other.revision && self.timestamp > other.timestamp)
    }
}
