//! Sync orchestrator: one full reconciliation pass, end to end.
//!
//! Sequencing per run: fetch source groups, overlay suspensions, snapshot the
//! target, load identity hints, diff, execute, reconcile. Failures before the
//! diff abort the run (a partial picture would plan wrong actions); failures
//! after it degrade to warnings and error lists in the report.
//!
//! One engine instance admits one run at a time. Overlapping invocations get
//! [`SyncError::AlreadyRunning`] immediately rather than queueing.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use roster_core::types::{InvitationStatus, RecordKey, SourceMember, TargetMember};
use roster_core::Config;

use crate::action::{ActionOutcome, Outcome, SyncAction};
use crate::diff::{compute_diff, MappingHints};
use crate::error::SyncError;
use crate::executor::execute_actions;
use crate::reconcile::{ReconcileResult, Reconciler};
use crate::traits::{SourceDirectory, TargetDirectory};

/// Per-kind action counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub total_actions: usize,
    pub invites: usize,
    pub removals: usize,
    pub role_updates: usize,
    pub cancellations: usize,
    pub executed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Everything one run did (or, in a dry run, would have done).
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub organization: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summary: SyncSummary,
    pub outcomes: Vec<ActionOutcome>,
    /// Emails a new invitation was issued for (or planned, in a dry run).
    pub invited: Vec<String>,
    /// Emails whose invite collided with an already-present account.
    pub already_present: Vec<String>,
    /// Members not traceable to any source-group email, directly or via
    /// reverse lookup. Informational; never acted on automatically.
    pub orphaned_members: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconciliation: Option<ReconcileResult>,
    /// Non-fatal degradations encountered outside action execution.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Drives a full sync run against a pair of directories.
pub struct SyncEngine {
    source: Arc<dyn SourceDirectory>,
    target: Arc<dyn TargetDirectory>,
    reconciler: Option<Reconciler>,
    config: Config,
    running: AtomicBool,
}

/// Clears the running flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncEngine {
    /// Build an engine. Pass `None` for the reconciler to run without a
    /// mapping store: diffs still work, with hint-dependent behavior
    /// (conservative removal, invite suppression via resolved mappings)
    /// degrading as documented on [`compute_diff`].
    pub fn new(
        source: Arc<dyn SourceDirectory>,
        target: Arc<dyn TargetDirectory>,
        reconciler: Option<Reconciler>,
        config: Config,
    ) -> SyncEngine {
        SyncEngine {
            source,
            target,
            reconciler,
            config,
            running: AtomicBool::new(false),
        }
    }

    /// Run one sync pass. Returns [`SyncError::AlreadyRunning`] without doing
    /// any work if a pass is already in flight on this instance.
    pub async fn sync(&self) -> Result<SyncReport, SyncError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::AlreadyRunning);
        }
        let _guard = RunGuard(&self.running);

        // A bad config fails the run before any directory call.
        self.config.validate()?;

        let started_at = Utc::now();
        let organization = self.config.target.organization.clone();
        let dry_run = self.config.sync.dry_run;
        let mut warnings = Vec::new();

        info!(
            organization = %organization,
            dry_run,
            base_group = %self.config.source.base_group,
            elevated_group = %self.config.source.elevated_group,
            "starting sync run",
        );

        // Source of truth. Both group fetches are mandatory.
        let mut base_group = self
            .source
            .list_group_members(&self.config.source.base_group)
            .await?;
        let mut elevated_group = self
            .source
            .list_group_members(&self.config.source.elevated_group)
            .await?;

        if self.config.sync.ignore_suspended {
            self.overlay_suspensions(&mut base_group, &mut elevated_group, &mut warnings)
                .await;
        }

        // Target snapshot. Also mandatory: diffing against a partial member
        // list would plan removals for members that are still there.
        let target_members = self.target.list_members(&organization).await?;
        let pending_invites = self.target.list_pending_invitations(&organization).await?;

        // Identity hints. Optional enrichments: a failure here degrades the
        // diff, it does not abort the run.
        let mapping_hints = self.load_mapping_hints(&organization, &mut warnings).await;
        let verified_hints = match self.target.list_verified_email_mappings(&organization).await {
            Ok(mappings) if mappings.is_empty() => None,
            Ok(mappings) => Some(mappings),
            Err(err) => {
                warn!(error = %err, "verified-email lookup failed, continuing without");
                warnings.push(format!("verified-email lookup failed: {err}"));
                None
            }
        };

        let actions = compute_diff(
            &base_group,
            &elevated_group,
            &target_members,
            &pending_invites,
            self.config.sync.remove_extra_members,
            mapping_hints.as_ref(),
            verified_hints.as_ref(),
        );

        let summary_base = summarize_planned(&actions);
        info!(
            actions = actions.len(),
            invites = summary_base.invites,
            removals = summary_base.removals,
            role_updates = summary_base.role_updates,
            cancellations = summary_base.cancellations,
            "diff computed",
        );

        let outcomes = execute_actions(self.target.as_ref(), &organization, actions, dry_run).await;

        let reconciliation = if dry_run {
            None
        } else if let Some(reconciler) = &self.reconciler {
            let mut result = reconciler.reconcile(&outcomes).await;
            if let Some(verified) = &verified_hints {
                reconciler
                    .complete_verified_mappings(verified, &base_group, &elevated_group, &mut result)
                    .await;
            }
            Some(result)
        } else {
            None
        };

        let summary = summarize(summary_base, &outcomes);
        let (invited, already_present) = classify_invites(&outcomes, dry_run);
        let orphaned_members = find_orphaned(
            &target_members,
            &base_group,
            &elevated_group,
            mapping_hints.as_ref(),
            verified_hints.as_ref(),
        );

        let finished_at = Utc::now();
        info!(
            executed = summary.executed,
            failed = summary.failed,
            skipped = summary.skipped,
            orphaned = orphaned_members.len(),
            duration_ms = (finished_at - started_at).num_milliseconds(),
            "sync run finished",
        );

        Ok(SyncReport {
            organization,
            dry_run,
            started_at,
            finished_at,
            summary,
            outcomes,
            invited,
            already_present,
            orphaned_members,
            reconciliation,
            warnings,
        })
    }

    /// Mark source members suspended per the batch status lookup. A lookup
    /// failure leaves the flags as fetched.
    async fn overlay_suspensions(
        &self,
        base_group: &mut [SourceMember],
        elevated_group: &mut [SourceMember],
        warnings: &mut Vec<String>,
    ) {
        let emails: Vec<String> = base_group
            .iter()
            .chain(elevated_group.iter())
            .map(|m| m.email.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if emails.is_empty() {
            return;
        }

        match self.source.suspension_status(&emails).await {
            Ok(statuses) => {
                for member in base_group.iter_mut().chain(elevated_group.iter_mut()) {
                    if statuses.get(&member.email).copied().unwrap_or(false) {
                        member.suspended = true;
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "suspension lookup failed, using group data as-is");
                warnings.push(format!("suspension lookup failed: {err}"));
            }
        }
    }

    /// Load resolved and pending mappings from the store, when one is
    /// configured. Store failures degrade to no hints.
    async fn load_mapping_hints(
        &self,
        organization: &str,
        warnings: &mut Vec<String>,
    ) -> Option<MappingHints> {
        let store = self.reconciler.as_ref()?.store();

        let resolved = match store.resolved_mappings(organization).await {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!(error = %err, "resolved-mapping lookup failed, diffing without hints");
                warnings.push(format!("resolved-mapping lookup failed: {err}"));
                return None;
            }
        };

        let pending_invitations = match store.by_status(organization, InvitationStatus::Pending).await
        {
            Ok(records) => records
                .into_iter()
                .filter_map(|record| match record.key {
                    RecordKey::Invitation(id) => Some((record.email.to_ascii_lowercase(), id)),
                    RecordKey::Existing(_) => None,
                })
                .collect(),
            Err(err) => {
                warn!(error = %err, "pending-record lookup failed, diffing without hints");
                warnings.push(format!("pending-record lookup failed: {err}"));
                return None;
            }
        };

        Some(MappingHints {
            resolved,
            pending_invitations,
        })
    }
}

fn summarize_planned(actions: &[SyncAction]) -> SyncSummary {
    let mut summary = SyncSummary {
        total_actions: actions.len(),
        ..SyncSummary::default()
    };
    for action in actions {
        match action {
            SyncAction::Invite { .. } => summary.invites += 1,
            SyncAction::Remove { .. } => summary.removals += 1,
            SyncAction::UpdateRole { .. } => summary.role_updates += 1,
            SyncAction::CancelInvite { .. } => summary.cancellations += 1,
            SyncAction::Skip { .. } => {}
        }
    }
    summary
}

fn summarize(mut summary: SyncSummary, outcomes: &[ActionOutcome]) -> SyncSummary {
    for outcome in outcomes {
        match &outcome.outcome {
            Outcome::Skipped => summary.skipped += 1,
            Outcome::Invited { .. } | Outcome::UpgradedToRoleUpdate { .. } | Outcome::Applied { .. } => {
                summary.executed += 1
            }
            Outcome::AlreadyPresentUnresolved { .. } | Outcome::Failed { .. } => summary.failed += 1,
        }
    }
    summary
}

/// Split invite actions into issued and collided-with-existing. In a dry run,
/// planned invites count as "invited" so previews show the full intent.
fn classify_invites(outcomes: &[ActionOutcome], dry_run: bool) -> (Vec<String>, Vec<String>) {
    let mut invited = Vec::new();
    let mut already_present = Vec::new();
    for outcome in outcomes {
        let SyncAction::Invite { email, .. } = &outcome.action else {
            continue;
        };
        if outcome.already_present() {
            already_present.push(email.clone());
        } else if matches!(outcome.outcome, Outcome::Invited { .. }) || dry_run {
            invited.push(email.clone());
        }
    }
    (invited, already_present)
}

/// Target members not traceable to any source-group email, neither by their
/// own identifier nor by a reverse lookup through either hint source. All
/// group members count here, active or not: an account backed by a suspended
/// source member is still accounted for, not orphaned.
fn find_orphaned(
    target_members: &[TargetMember],
    base_group: &[SourceMember],
    elevated_group: &[SourceMember],
    mapping_hints: Option<&MappingHints>,
    verified_hints: Option<&HashMap<String, String>>,
) -> Vec<String> {
    let source_emails: HashSet<String> = base_group
        .iter()
        .chain(elevated_group)
        .filter(|m| !m.email.is_empty())
        .map(|m| m.email.to_ascii_lowercase())
        .collect();

    // Reverse lookup, store hints winning over the side channel.
    let mut email_by_handle: HashMap<String, String> = HashMap::new();
    if let Some(verified) = verified_hints {
        for (email, handle) in verified {
            email_by_handle.insert(handle.to_ascii_lowercase(), email.to_ascii_lowercase());
        }
    }
    if let Some(hints) = mapping_hints {
        for (email, handle) in &hints.resolved {
            email_by_handle.insert(handle.to_ascii_lowercase(), email.to_ascii_lowercase());
        }
    }

    let mut orphaned = Vec::new();
    for member in target_members {
        if member.is_pending {
            continue;
        }
        let Some(id) = member.identifier() else {
            continue;
        };
        if source_emails.contains(&id.to_ascii_lowercase()) {
            continue;
        }
        if let Some(handle) = member.account_handle.as_deref() {
            if let Some(email) = email_by_handle.get(&handle.to_ascii_lowercase()) {
                if source_emails.contains(email) {
                    continue;
                }
            }
        }
        match member.account_handle.as_deref() {
            Some(handle) if !handle.is_empty() => orphaned.push(handle.to_string()),
            _ => orphaned.push(id.to_string()),
        }
    }
    orphaned.sort();
    orphaned
}
