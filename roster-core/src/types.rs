//! Domain types shared across the roster workspace.
//!
//! Two directories are modeled: the source directory (group-based membership,
//! authoritative) and the target directory (account-based membership with
//! pending invitations). Identifiers do not line up across the two: the source
//! knows emails, the target knows account handles. [`InvitationRecord`] is the
//! persisted bridge between them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

/// Membership role in the target organization.
///
/// The source directory expresses this as group membership (base group =
/// member, elevated group = admin); the target directory stores it per
/// account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    #[default]
    Member,
    Admin,
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberRole::Member => write!(f, "member"),
            MemberRole::Admin => write!(f, "admin"),
        }
    }
}

// ---------------------------------------------------------------------------
// Directory members
// ---------------------------------------------------------------------------

/// A member of a source-directory group. Refetched every run, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMember {
    pub email: String,
    /// Role string as reported by the source directory (informational; the
    /// desired role is derived from which group the member appears in).
    pub source_role: String,
    pub account_type: String,
    pub account_status: String,
    #[serde(default)]
    pub suspended: bool,
}

impl SourceMember {
    /// Active members are user accounts with active status and no suspension.
    /// Only active members contribute to desired state.
    pub fn is_active(&self) -> bool {
        self.account_type.eq_ignore_ascii_case("user")
            && self.account_status.eq_ignore_ascii_case("active")
            && !self.suspended
    }
}

/// A current member or pending invitation in the target directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TargetMember {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_handle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub role: MemberRole,
    #[serde(default)]
    pub is_pending: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invitation_id: Option<i64>,
}

impl TargetMember {
    /// Best identifier for cross-directory matching: email when known,
    /// account handle otherwise.
    pub fn identifier(&self) -> Option<&str> {
        match (&self.email, &self.account_handle) {
            (Some(email), _) if !email.is_empty() => Some(email),
            (_, Some(handle)) if !handle.is_empty() => Some(handle),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Invitation records (persisted)
// ---------------------------------------------------------------------------

/// Lifecycle status of a persisted invitation record.
///
/// Transitions are monotonic: once a record leaves `Pending` it never returns,
/// and `Resolved` only advances to `Removed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Resolved,
    Failed,
    Expired,
    Cancelled,
    Removed,
}

impl InvitationStatus {
    /// Terminal states admit no further transitions (except resolved, which
    /// may still become removed).
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvitationStatus::Pending)
    }
}

impl fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Resolved => "resolved",
            InvitationStatus::Failed => "failed",
            InvitationStatus::Expired => "expired",
            InvitationStatus::Cancelled => "cancelled",
            InvitationStatus::Removed => "removed",
        };
        f.write_str(s)
    }
}

/// Durable record key within an organization partition.
///
/// The string forms `INV#<invitation_id>` and `EXISTING#<account_handle>` are
/// part of the persisted contract; any replacement store must preserve them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordKey {
    /// A tool-issued invitation, keyed by the directory's invitation id.
    Invitation(i64),
    /// An account recognized as already present, keyed by handle.
    Existing(String),
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Invitation(id) => write!(f, "INV#{id}"),
            RecordKey::Existing(handle) => write!(f, "EXISTING#{handle}"),
        }
    }
}

/// Error parsing a [`RecordKey`] from its durable string form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseRecordKeyError(pub String);

impl fmt::Display for ParseRecordKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid record key '{}'", self.0)
    }
}

impl std::error::Error for ParseRecordKeyError {}

impl FromStr for RecordKey {
    type Err = ParseRecordKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(id) = s.strip_prefix("INV#") {
            let id = id
                .parse::<i64>()
                .map_err(|_| ParseRecordKeyError(s.to_string()))?;
            return Ok(RecordKey::Invitation(id));
        }
        if let Some(handle) = s.strip_prefix("EXISTING#") {
            if handle.is_empty() {
                return Err(ParseRecordKeyError(s.to_string()));
            }
            return Ok(RecordKey::Existing(handle.to_string()));
        }
        Err(ParseRecordKeyError(s.to_string()))
    }
}

impl Serialize for RecordKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RecordKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A persisted email-to-account correlation, tracking one invitation (or one
/// recognized pre-existing account) through its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationRecord {
    pub organization: String,
    pub key: RecordKey,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_handle: Option<String>,
    pub status: InvitationStatus,
    pub role: MemberRole,
    pub invited_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Unix seconds after which the record may be purged by the store.
    pub ttl: i64,
}

impl InvitationRecord {
    /// New pending record for a tool-issued invitation.
    pub fn new_invitation(
        organization: &str,
        invitation_id: i64,
        email: &str,
        role: MemberRole,
        ttl_days: i64,
    ) -> Self {
        let now = Utc::now();
        InvitationRecord {
            organization: organization.to_string(),
            key: RecordKey::Invitation(invitation_id),
            email: email.to_string(),
            account_handle: None,
            status: InvitationStatus::Pending,
            role,
            invited_at: now,
            resolved_at: None,
            ttl: ttl_unix(now, ttl_days),
        }
    }

    /// New resolved record for an account recognized as already present in the
    /// target directory.
    pub fn new_existing(
        organization: &str,
        account_handle: &str,
        email: &str,
        role: MemberRole,
        ttl_days: i64,
    ) -> Self {
        let now = Utc::now();
        InvitationRecord {
            organization: organization.to_string(),
            key: RecordKey::Existing(account_handle.to_string()),
            email: email.to_string(),
            account_handle: Some(account_handle.to_string()),
            status: InvitationStatus::Resolved,
            role,
            invited_at: now,
            resolved_at: Some(now),
            ttl: ttl_unix(now, ttl_days),
        }
    }

    /// Mark the record resolved with the observed account handle, refreshing
    /// the TTL window from the resolution timestamp.
    pub fn resolve(&mut self, account_handle: &str, ttl_days: i64) {
        let now = Utc::now();
        self.account_handle = Some(account_handle.to_string());
        self.status = InvitationStatus::Resolved;
        self.resolved_at = Some(now);
        self.ttl = ttl_unix(now, ttl_days);
    }
}

fn ttl_unix(from: DateTime<Utc>, ttl_days: i64) -> i64 {
    (from + Duration::days(ttl_days)).timestamp()
}

// ---------------------------------------------------------------------------
// Audit trail
// ---------------------------------------------------------------------------

/// A membership-add event from the target directory's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event time in Unix milliseconds, as reported by the directory.
    pub timestamp: i64,
    pub invitation_id: i64,
    pub account_handle: String,
}

/// Persisted position in the audit trail, per organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditCursor {
    pub organization: String,
    pub last_timestamp: i64,
    pub last_run: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
