//! Corrective actions and their execution outcomes.
//!
//! The diff engine plans [`SyncAction`]s; the executor pairs each with an
//! [`Outcome`]. The outcome is a tagged variant rather than mutable flags on
//! the action, so the invite-to-role-update upgrade path is a first-class,
//! exhaustively-matched case for callers and tests.

use chrono::{DateTime, Utc};
use serde::Serialize;

use roster_core::types::MemberRole;

/// A single planned corrective action against the target directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncAction {
    /// Invite an email absent from the known-identifier set.
    Invite { email: String, role: MemberRole },

    /// Remove a member no longer in desired state. `source_email` carries the
    /// source-directory email when the handle was matched via a reverse
    /// lookup, for mapping-store correlation during reconciliation.
    Remove {
        account_handle: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        source_email: Option<String>,
    },

    /// Align a member's role with desired state.
    UpdateRole {
        account_handle: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        source_email: Option<String>,
        current_role: MemberRole,
        desired_role: MemberRole,
    },

    /// Cancel a pending invitation whose email left desired state.
    CancelInvite { email: String, invitation_id: i64 },

    /// No-op placeholder; never planned by the diff engine but kept so
    /// summaries can count externally-injected skips.
    Skip { identifier: String },
}

impl SyncAction {
    /// The identifier the action targets: email for invite/cancel, account
    /// handle for remove/role update.
    pub fn target_identifier(&self) -> &str {
        match self {
            SyncAction::Invite { email, .. } | SyncAction::CancelInvite { email, .. } => email,
            SyncAction::Remove { account_handle, .. }
            | SyncAction::UpdateRole { account_handle, .. } => account_handle,
            SyncAction::Skip { identifier } => identifier,
        }
    }

    /// The source-directory email associated with the action, when known.
    pub fn source_email(&self) -> Option<&str> {
        match self {
            SyncAction::Invite { email, .. } | SyncAction::CancelInvite { email, .. } => {
                Some(email)
            }
            SyncAction::Remove { source_email, .. }
            | SyncAction::UpdateRole { source_email, .. } => source_email.as_deref(),
            SyncAction::Skip { .. } => None,
        }
    }

    /// Short label for logs and summaries.
    pub fn label(&self) -> &'static str {
        match self {
            SyncAction::Invite { .. } => "invite",
            SyncAction::Remove { .. } => "remove",
            SyncAction::UpdateRole { .. } => "update_role",
            SyncAction::CancelInvite { .. } => "cancel_invite",
            SyncAction::Skip { .. } => "skip",
        }
    }
}

/// What happened when an action was executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Nothing was attempted (dry run, or a skip action).
    Skipped,

    /// Invitation issued. The directory may or may not return an id.
    Invited {
        #[serde(skip_serializing_if = "Option::is_none")]
        invitation_id: Option<i64>,
        at: DateTime<Utc>,
    },

    /// The invite was rejected because the account already exists, a single
    /// account search match was found, and a role update was applied instead.
    UpgradedToRoleUpdate {
        account_handle: String,
        at: DateTime<Utc>,
    },

    /// A remove, role update, or cancellation succeeded as planned.
    Applied { at: DateTime<Utc> },

    /// The invite was rejected as already-a-member but the account search
    /// returned zero or ambiguous matches. Never guess: left unexecuted.
    AlreadyPresentUnresolved { error: String },

    /// The directory rejected the action. Recorded, never retried in-run.
    Failed { error: String },
}

/// A planned action paired with its execution outcome. Read-only once the
/// executor returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    #[serde(flatten)]
    pub action: SyncAction,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl ActionOutcome {
    pub fn executed(&self) -> bool {
        matches!(
            self.outcome,
            Outcome::Invited { .. } | Outcome::UpgradedToRoleUpdate { .. } | Outcome::Applied { .. }
        )
    }

    /// Whether the invite collided with an already-present account, resolved
    /// or not.
    pub fn already_present(&self) -> bool {
        matches!(
            self.outcome,
            Outcome::UpgradedToRoleUpdate { .. } | Outcome::AlreadyPresentUnresolved { .. }
        )
    }

    /// The account handle discovered during an invite upgrade.
    pub fn resolved_account(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::UpgradedToRoleUpdate { account_handle, .. } => Some(account_handle),
            _ => None,
        }
    }

    /// The invitation id captured from a successful invite.
    pub fn invitation_id(&self) -> Option<i64> {
        match self.outcome {
            Outcome::Invited { invitation_id, .. } => invitation_id,
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::AlreadyPresentUnresolved { error } | Outcome::Failed { error } => Some(error),
            _ => None,
        }
    }
}
