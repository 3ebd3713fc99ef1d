//! Collaborator seams for the reconciliation core.
//!
//! Transport details (pagination, query construction, backoff) live behind
//! these traits; the core never sees them. Every method is a suspension point
//! and must honor cancellation by simply being dropped mid-await: no trait
//! method may leave partial local state behind.

use std::collections::HashMap;

use async_trait::async_trait;

use roster_core::types::{
    AuditCursor, AuditEvent, InvitationRecord, InvitationStatus, MemberRole, RecordKey,
    SourceMember, TargetMember,
};

use crate::error::{DirectoryError, StoreError};

/// The authoritative origin of desired membership (group-based).
#[async_trait]
pub trait SourceDirectory: Send + Sync {
    /// List all members of a group, active or not.
    async fn list_group_members(&self, group_id: &str)
        -> Result<Vec<SourceMember>, DirectoryError>;

    /// Suspension status for a batch of emails. Missing entries mean
    /// "not suspended".
    async fn suspension_status(
        &self,
        emails: &[String],
    ) -> Result<HashMap<String, bool>, DirectoryError>;
}

/// The system whose membership is driven to match the source (account-based,
/// supports invitations).
#[async_trait]
pub trait TargetDirectory: Send + Sync {
    /// Current organization members with accurate roles. Implementations may
    /// need an elevated-role probe plus a full-member probe to reconcile role
    /// across two API shapes.
    async fn list_members(&self, organization: &str) -> Result<Vec<TargetMember>, DirectoryError>;

    /// Invitations issued but not yet accepted.
    async fn list_pending_invitations(
        &self,
        organization: &str,
    ) -> Result<Vec<TargetMember>, DirectoryError>;

    /// Issue an invitation. Must return [`DirectoryError::AlreadyMember`] when
    /// the directory reports the account is already in the organization.
    async fn create_invitation(
        &self,
        organization: &str,
        email: &str,
        role: MemberRole,
    ) -> Result<TargetMember, DirectoryError>;

    async fn remove_member(
        &self,
        organization: &str,
        account_handle: &str,
    ) -> Result<(), DirectoryError>;

    async fn update_role(
        &self,
        organization: &str,
        account_handle: &str,
        role: MemberRole,
    ) -> Result<(), DirectoryError>;

    async fn cancel_invitation(
        &self,
        organization: &str,
        invitation_id: i64,
    ) -> Result<(), DirectoryError>;

    /// Look up an account handle by email. Returns `None` for zero or
    /// ambiguous matches (implementations log the ambiguity); never errors on
    /// "not found".
    async fn search_account_by_email(&self, email: &str)
        -> Result<Option<String>, DirectoryError>;

    /// Membership-add audit events strictly after `after_timestamp`.
    async fn list_add_member_audit_events(
        &self,
        organization: &str,
        after_timestamp: i64,
    ) -> Result<Vec<AuditEvent>, DirectoryError>;

    /// Invitations the directory reports as failed.
    async fn list_failed_invitations(
        &self,
        organization: &str,
    ) -> Result<Vec<TargetMember>, DirectoryError>;

    /// Best-effort verified-domain email-to-handle mappings. Optional side
    /// channel: callers treat an error here as absent data.
    async fn list_verified_email_mappings(
        &self,
        organization: &str,
    ) -> Result<HashMap<String, String>, DirectoryError>;
}

/// Persisted invitation tracking, keyed by `(organization, record key)`.
///
/// The `INV#<id>` / `EXISTING#<handle>` key convention (see
/// [`RecordKey`]) is part of the durable contract.
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Store a record, replacing any record with the same key.
    async fn save(&self, record: InvitationRecord) -> Result<(), StoreError>;

    /// Fetch a record by key, or `None`.
    async fn get(
        &self,
        organization: &str,
        key: &RecordKey,
    ) -> Result<Option<InvitationRecord>, StoreError>;

    /// All records for an email (case-insensitive) within an organization.
    async fn by_email(
        &self,
        organization: &str,
        email: &str,
    ) -> Result<Vec<InvitationRecord>, StoreError>;

    /// All records in a given lifecycle status within an organization.
    async fn by_status(
        &self,
        organization: &str,
        status: InvitationStatus,
    ) -> Result<Vec<InvitationRecord>, StoreError>;

    /// Transition a pending record to resolved with the observed handle,
    /// refreshing its TTL window from the resolution timestamp.
    async fn resolve(
        &self,
        organization: &str,
        key: &RecordKey,
        account_handle: &str,
    ) -> Result<(), StoreError>;

    /// Update a record's lifecycle status.
    async fn update_status(
        &self,
        organization: &str,
        key: &RecordKey,
        status: InvitationStatus,
    ) -> Result<(), StoreError>;

    /// Update a record's role field.
    async fn update_role(
        &self,
        organization: &str,
        key: &RecordKey,
        role: MemberRole,
    ) -> Result<(), StoreError>;

    /// All resolved email-to-handle mappings for an organization
    /// (lowercase email keys).
    async fn resolved_mappings(
        &self,
        organization: &str,
    ) -> Result<HashMap<String, String>, StoreError>;

    /// The persisted audit-trail cursor, or `None` if never saved.
    async fn audit_cursor(&self, organization: &str) -> Result<Option<AuditCursor>, StoreError>;

    async fn save_audit_cursor(&self, cursor: AuditCursor) -> Result<(), StoreError>;
}
