//! Reconciliation engine: closes the email-to-account mapping gap over time.
//!
//! An invitation's final identity (which account accepted it) is not knowable
//! at invite time. This engine advances persisted invitation records through
//! their lifecycle using three target-directory signals (the live pending
//! list, the audit trail, the failed list) plus the verified-email side
//! channel.
//!
//! Each phase is an independent function returning its own result; the
//! top-level [`Reconciler::reconcile`] merges them. Errors accumulate in the
//! merged result and never abort a later phase, and within a phase a bad
//! record is skipped, not fatal. Every phase is idempotent: re-running
//! against unchanged external state changes nothing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use roster_core::types::{
    AuditCursor, InvitationStatus, MemberRole, RecordKey, SourceMember,
};

use crate::action::{ActionOutcome, Outcome, SyncAction};
use crate::traits::{MappingStore, TargetDirectory};

/// Pending records older than this, absent from both the live pending list
/// and the failed list, are classified as expired.
pub const INVITATION_EXPIRY_DAYS: i64 = 7;

/// Aggregate counters for one reconciliation pass. Constructed fresh per run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileResult {
    pub new_saved: usize,
    pub resolved: usize,
    pub failed: usize,
    pub expired: usize,
    pub cancelled: usize,
    pub members_removed: usize,
    pub roles_updated: usize,
    pub already_present_resolved: usize,
    pub verified_emails_mapped: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Default)]
struct PersistOutcome {
    new_saved: usize,
    cancelled: usize,
    members_removed: usize,
    roles_updated: usize,
    already_present_resolved: usize,
    errors: Vec<String>,
}

#[derive(Default)]
struct PhaseOutcome {
    count: usize,
    errors: Vec<String>,
}

impl PhaseOutcome {
    fn error(message: String) -> PhaseOutcome {
        PhaseOutcome {
            count: 0,
            errors: vec![message],
        }
    }
}

#[derive(Default)]
struct SweepOutcome {
    failed: usize,
    expired: usize,
    errors: Vec<String>,
}

/// Advances invitation records through their lifecycle after each live run.
pub struct Reconciler {
    store: Arc<dyn MappingStore>,
    target: Arc<dyn TargetDirectory>,
    organization: String,
    ttl_days: i64,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn MappingStore>,
        target: Arc<dyn TargetDirectory>,
        organization: impl Into<String>,
        ttl_days: i64,
    ) -> Reconciler {
        Reconciler {
            store,
            target,
            organization: organization.into(),
            ttl_days,
        }
    }

    pub(crate) fn store(&self) -> &Arc<dyn MappingStore> {
        &self.store
    }

    /// Run phases 1 through 4 against the outcomes of an executed batch.
    ///
    /// Phase 5 (proactive verified-email mapping completion) is invoked
    /// separately by the orchestrator via
    /// [`Reconciler::complete_verified_mappings`].
    pub async fn reconcile(&self, outcomes: &[ActionOutcome]) -> ReconcileResult {
        let mut result = ReconcileResult::default();

        let persisted = self.persist_new_work(outcomes).await;
        result.new_saved = persisted.new_saved;
        result.cancelled = persisted.cancelled;
        result.members_removed = persisted.members_removed;
        result.roles_updated = persisted.roles_updated;
        result.already_present_resolved = persisted.already_present_resolved;
        result.errors.extend(persisted.errors);

        let via_pending = self.resolve_via_pending().await;
        result.resolved += via_pending.count;
        result.errors.extend(via_pending.errors);

        let via_audit = self.resolve_via_audit().await;
        result.resolved += via_audit.count;
        result.errors.extend(via_audit.errors);

        let sweep = self.sweep_failed_and_expired().await;
        result.failed = sweep.failed;
        result.expired = sweep.expired;
        result.errors.extend(sweep.errors);

        info!(
            new_saved = result.new_saved,
            resolved = result.resolved,
            failed = result.failed,
            expired = result.expired,
            cancelled = result.cancelled,
            members_removed = result.members_removed,
            roles_updated = result.roles_updated,
            already_present_resolved = result.already_present_resolved,
            errors = result.errors.len(),
            "invitation reconciliation completed",
        );

        result
    }

    /// Phase 1: record what the executor just did.
    async fn persist_new_work(&self, outcomes: &[ActionOutcome]) -> PersistOutcome {
        let org = self.organization.as_str();
        let mut out = PersistOutcome::default();

        // New invitations become pending records.
        for outcome in outcomes {
            let SyncAction::Invite { email, role } = &outcome.action else {
                continue;
            };
            let Some(invitation_id) = outcome.invitation_id() else {
                continue;
            };
            let record = roster_core::types::InvitationRecord::new_invitation(
                org,
                invitation_id,
                email,
                *role,
                self.ttl_days,
            );
            match self.store.save(record).await {
                Ok(()) => {
                    info!(email = %email, invitation_id, "saved new invitation record");
                    out.new_saved += 1;
                }
                Err(err) => {
                    warn!(email = %email, error = %err, "failed to save invitation record");
                    out.errors.push(format!("saving invitation for {email}: {err}"));
                }
            }
        }

        // Cancelled invitations transition their record, when one exists.
        for outcome in outcomes {
            let SyncAction::CancelInvite {
                email,
                invitation_id,
            } = &outcome.action
            else {
                continue;
            };
            if !outcome.executed() {
                continue;
            }
            let key = RecordKey::Invitation(*invitation_id);
            match self.store.get(org, &key).await {
                Ok(Some(record)) if !record.status.is_terminal() => {
                    match self
                        .store
                        .update_status(org, &key, InvitationStatus::Cancelled)
                        .await
                    {
                        Ok(()) => {
                            info!(email = %email, invitation_id, "invitation record cancelled");
                            out.cancelled += 1;
                        }
                        Err(err) => out
                            .errors
                            .push(format!("marking invitation {invitation_id} cancelled: {err}")),
                    }
                }
                Ok(_) => {} // no record, or already past pending
                Err(err) => out
                    .errors
                    .push(format!("looking up invitation {invitation_id}: {err}")),
            }
        }

        // Removed members: their resolved record becomes removed.
        for outcome in outcomes {
            let SyncAction::Remove {
                account_handle,
                source_email: Some(email),
            } = &outcome.action
            else {
                continue;
            };
            if !outcome.executed() {
                continue;
            }
            match self
                .transition_resolved_records(email, InvitationStatus::Removed)
                .await
            {
                Ok(count) => {
                    if count > 0 {
                        info!(handle = %account_handle, email = %email, "record marked removed");
                    }
                    out.members_removed += count;
                }
                Err(errs) => out.errors.extend(errs),
            }
        }

        // Role updates: keep the resolved record's role current.
        for outcome in outcomes {
            let SyncAction::UpdateRole {
                source_email: Some(email),
                desired_role,
                ..
            } = &outcome.action
            else {
                continue;
            };
            if !outcome.executed() {
                continue;
            }
            match self.store.by_email(org, email).await {
                Ok(records) => {
                    for record in records {
                        if record.status != InvitationStatus::Resolved {
                            continue;
                        }
                        match self
                            .store
                            .update_role(org, &record.key, *desired_role)
                            .await
                        {
                            Ok(()) => out.roles_updated += 1,
                            Err(err) => out.errors.push(format!(
                                "updating role on record {} to {desired_role}: {err}",
                                record.key
                            )),
                        }
                    }
                }
                Err(err) => out
                    .errors
                    .push(format!("looking up records for role update {email}: {err}")),
            }
        }

        // Invites upgraded mid-flight get a resolved EXISTING record, so the
        // next diff recognizes the account and skips the invite attempt.
        // Check before write: one resolved record per account handle.
        for outcome in outcomes {
            let Outcome::UpgradedToRoleUpdate { account_handle, .. } = &outcome.outcome else {
                continue;
            };
            let SyncAction::Invite { email, role } = &outcome.action else {
                continue;
            };
            match self.has_resolved_record_for_handle(email, account_handle).await {
                Ok(true) => {
                    debug!(email = %email, handle = %account_handle, "resolved record already present, skipping");
                    continue;
                }
                Ok(false) => {}
                Err(err) => {
                    out.errors
                        .push(format!("checking existing record for {email}: {err}"));
                    continue;
                }
            }
            let record = roster_core::types::InvitationRecord::new_existing(
                org,
                account_handle,
                email,
                *role,
                self.ttl_days,
            );
            match self.store.save(record).await {
                Ok(()) => {
                    info!(email = %email, handle = %account_handle, "recorded already-present account");
                    out.already_present_resolved += 1;
                }
                Err(err) => out
                    .errors
                    .push(format!("saving record for already-present {email}: {err}")),
            }
        }

        out
    }

    /// Phase 2: the live pending list sometimes exposes the accepting account
    /// before the invitation disappears from it.
    async fn resolve_via_pending(&self) -> PhaseOutcome {
        let org = self.organization.as_str();
        let pending = match self.target.list_pending_invitations(org).await {
            Ok(pending) => pending,
            Err(err) => return PhaseOutcome::error(format!("listing pending invitations: {err}")),
        };

        let mut out = PhaseOutcome::default();
        for invite in pending {
            let (Some(invitation_id), Some(handle)) =
                (invite.invitation_id, invite.account_handle.as_deref())
            else {
                continue;
            };
            if handle.is_empty() {
                continue;
            }
            let key = RecordKey::Invitation(invitation_id);
            let record = match self.store.get(org, &key).await {
                Ok(record) => record,
                Err(err) => {
                    out.errors
                        .push(format!("getting invitation {invitation_id}: {err}"));
                    continue;
                }
            };
            // Idempotence: only a pending record without a handle resolves.
            let Some(record) = record else { continue };
            if record.status.is_terminal() || record.account_handle.is_some() {
                continue;
            }
            match self.store.resolve(org, &key, handle).await {
                Ok(()) => {
                    info!(email = %record.email, handle = %handle, invitation_id, "mapping resolved via pending list");
                    out.count += 1;
                }
                Err(err) => out
                    .errors
                    .push(format!("resolving invitation {invitation_id}: {err}")),
            }
        }
        out
    }

    /// Phase 3: membership-add audit events carry the invitation id and the
    /// accepting account. The cursor only ever moves forward.
    async fn resolve_via_audit(&self) -> PhaseOutcome {
        let org = self.organization.as_str();

        let after = match self.store.audit_cursor(org).await {
            Ok(cursor) => cursor.map(|c| c.last_timestamp).unwrap_or(0),
            Err(err) => return PhaseOutcome::error(format!("getting audit cursor: {err}")),
        };

        let events = match self.target.list_add_member_audit_events(org, after).await {
            Ok(events) => events,
            Err(err) => return PhaseOutcome::error(format!("fetching audit events: {err}")),
        };

        let mut out = PhaseOutcome::default();
        let mut last_timestamp = 0i64;
        for event in &events {
            if event.invitation_id == 0 || event.account_handle.is_empty() {
                continue;
            }
            last_timestamp = last_timestamp.max(event.timestamp);

            let key = RecordKey::Invitation(event.invitation_id);
            let record = match self.store.get(org, &key).await {
                Ok(record) => record,
                Err(err) => {
                    out.errors.push(format!(
                        "getting invitation {} from audit trail: {err}",
                        event.invitation_id
                    ));
                    continue;
                }
            };
            let Some(record) = record else { continue };
            if record.status.is_terminal() {
                continue;
            }
            match self.store.resolve(org, &key, &event.account_handle).await {
                Ok(()) => {
                    info!(
                        email = %record.email,
                        handle = %event.account_handle,
                        invitation_id = event.invitation_id,
                        "mapping resolved via audit trail",
                    );
                    out.count += 1;
                }
                Err(err) => out.errors.push(format!(
                    "resolving invitation {} from audit trail: {err}",
                    event.invitation_id
                )),
            }
        }

        // Persist the watermark only when it actually advanced.
        if last_timestamp > after {
            let cursor = AuditCursor {
                organization: org.to_string(),
                last_timestamp,
                last_run: Utc::now(),
            };
            if let Err(err) = self.store.save_audit_cursor(cursor).await {
                out.errors.push(format!("saving audit cursor: {err}"));
            }
        }

        out
    }

    /// Phase 4: failure check first, then expiry, so a failed invitation is
    /// never double-classified as expired.
    async fn sweep_failed_and_expired(&self) -> SweepOutcome {
        let org = self.organization.as_str();
        let mut out = SweepOutcome::default();

        let failed_invites = match self.target.list_failed_invitations(org).await {
            Ok(invites) => invites,
            Err(err) => {
                out.errors.push(format!("listing failed invitations: {err}"));
                Vec::new()
            }
        };

        let mut failed_ids: HashSet<i64> = HashSet::new();
        for invite in &failed_invites {
            let Some(invitation_id) = invite.invitation_id else {
                continue;
            };
            failed_ids.insert(invitation_id);

            let key = RecordKey::Invitation(invitation_id);
            let record = match self.store.get(org, &key).await {
                Ok(record) => record,
                Err(err) => {
                    out.errors.push(format!(
                        "getting invitation {invitation_id} for failure check: {err}"
                    ));
                    continue;
                }
            };
            let Some(record) = record else { continue };
            if record.status.is_terminal() {
                continue;
            }
            match self
                .store
                .update_status(org, &key, InvitationStatus::Failed)
                .await
            {
                Ok(()) => {
                    warn!(email = %record.email, invitation_id, "invitation failed");
                    out.failed += 1;
                }
                Err(err) => out
                    .errors
                    .push(format!("marking invitation {invitation_id} failed: {err}")),
            }
        }

        let pending_records = match self.store.by_status(org, InvitationStatus::Pending).await {
            Ok(records) => records,
            Err(err) => {
                out.errors
                    .push(format!("getting pending records for expiry check: {err}"));
                return out;
            }
        };

        let live_pending = match self.target.list_pending_invitations(org).await {
            Ok(pending) => pending,
            Err(err) => {
                out.errors.push(format!(
                    "listing current pending invitations for expiry check: {err}"
                ));
                return out;
            }
        };
        let live_ids: HashSet<i64> = live_pending
            .iter()
            .filter_map(|inv| inv.invitation_id)
            .collect();

        let now = Utc::now();
        for record in pending_records {
            if now - record.invited_at <= Duration::days(INVITATION_EXPIRY_DAYS) {
                continue;
            }
            let RecordKey::Invitation(invitation_id) = record.key else {
                continue;
            };
            if failed_ids.contains(&invitation_id) {
                continue; // already classified by the failure check
            }
            if live_ids.contains(&invitation_id) {
                continue; // still genuinely pending, just old
            }
            match self
                .store
                .update_status(org, &record.key, InvitationStatus::Expired)
                .await
            {
                Ok(()) => {
                    warn!(
                        email = %record.email,
                        invitation_id,
                        invited_at = %record.invited_at,
                        "invitation expired",
                    );
                    out.expired += 1;
                }
                Err(err) => out
                    .errors
                    .push(format!("marking invitation {invitation_id} expired: {err}")),
            }
        }

        out
    }

    /// Phase 5 (orchestrator-invoked): create resolved records for accounts
    /// the verified-email side channel matched proactively, so future diffs
    /// can track them for role changes and conservative removal.
    pub async fn complete_verified_mappings(
        &self,
        verified: &HashMap<String, String>,
        base_group: &[SourceMember],
        elevated_group: &[SourceMember],
        result: &mut ReconcileResult,
    ) {
        if verified.is_empty() {
            return;
        }
        let org = self.organization.as_str();

        // Desired roles, elevated overlay winning, exactly as the diff builds
        // them.
        let mut desired_role: HashMap<String, MemberRole> = HashMap::new();
        for member in base_group.iter().filter(|m| m.is_active()) {
            desired_role.insert(member.email.to_ascii_lowercase(), MemberRole::Member);
        }
        for member in elevated_group.iter().filter(|m| m.is_active()) {
            desired_role.insert(member.email.to_ascii_lowercase(), MemberRole::Admin);
        }

        let mut entries: Vec<(&String, &String)> = verified.iter().collect();
        entries.sort();

        for (email, handle) in entries {
            let Some(role) = desired_role.get(&email.to_ascii_lowercase()) else {
                continue; // not in desired state, nothing to track
            };

            match self.has_resolved_record(email).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(err) => {
                    result
                        .errors
                        .push(format!("checking record for verified email {email}: {err}"));
                    continue;
                }
            }

            let record = roster_core::types::InvitationRecord::new_existing(
                org,
                handle,
                email,
                *role,
                self.ttl_days,
            );
            match self.store.save(record).await {
                Ok(()) => {
                    info!(email = %email, handle = %handle, role = %role, "verified-email mapping recorded");
                    result.verified_emails_mapped += 1;
                }
                Err(err) => result
                    .errors
                    .push(format!("saving verified-email mapping for {email}: {err}")),
            }
        }
    }

    /// Transition every resolved record for `email` to `status`. Returns the
    /// transition count or the accumulated per-record errors.
    async fn transition_resolved_records(
        &self,
        email: &str,
        status: InvitationStatus,
    ) -> Result<usize, Vec<String>> {
        let org = self.organization.as_str();
        let records = self
            .store
            .by_email(org, email)
            .await
            .map_err(|err| vec![format!("looking up records for {email}: {err}")])?;

        let mut count = 0;
        let mut errors = Vec::new();
        for record in records {
            if record.status != InvitationStatus::Resolved {
                continue;
            }
            match self.store.update_status(org, &record.key, status).await {
                Ok(()) => count += 1,
                Err(err) => errors.push(format!(
                    "transitioning record {} to {status}: {err}",
                    record.key
                )),
            }
        }
        if errors.is_empty() {
            Ok(count)
        } else {
            Err(errors)
        }
    }

    async fn has_resolved_record(&self, email: &str) -> Result<bool, crate::error::StoreError> {
        let records = self.store.by_email(&self.organization, email).await?;
        Ok(records.iter().any(|record| {
            record.status == InvitationStatus::Resolved && record.account_handle.is_some()
        }))
    }

    async fn has_resolved_record_for_handle(
        &self,
        email: &str,
        handle: &str,
    ) -> Result<bool, crate::error::StoreError> {
        let records = self.store.by_email(&self.organization, email).await?;
        Ok(records.iter().any(|record| {
            record.status == InvitationStatus::Resolved
                && record
                    .account_handle
                    .as_deref()
                    .is_some_and(|h| h.eq_ignore_ascii_case(handle))
        }))
    }
}
