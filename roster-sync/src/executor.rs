//! Action executor: applies corrective actions against the target directory.
//!
//! Failures are always action-scoped. The executor records them on the
//! outcome and moves on; it never aborts the batch. The one non-obvious path
//! is the invite race: an invite can be rejected because the account already
//! joined through other means, in which case the executor looks the account
//! up by email and, on exactly one match, applies a role update instead.

use chrono::Utc;
use tracing::{info, warn};

use crate::action::{ActionOutcome, Outcome, SyncAction};
use crate::error::DirectoryError;
use crate::traits::TargetDirectory;

/// Execute a batch of planned actions in order.
///
/// With `dry_run` set, no directory calls are issued and every action comes
/// back [`Outcome::Skipped`]: a pure preview.
pub async fn execute_actions(
    target: &dyn TargetDirectory,
    organization: &str,
    actions: Vec<SyncAction>,
    dry_run: bool,
) -> Vec<ActionOutcome> {
    let mut outcomes = Vec::with_capacity(actions.len());

    for action in actions {
        if dry_run {
            outcomes.push(ActionOutcome {
                action,
                outcome: Outcome::Skipped,
            });
            continue;
        }

        let outcome = match &action {
            SyncAction::Invite { email, role } => {
                execute_invite(target, organization, email, *role).await
            }
            SyncAction::Remove { account_handle, .. } => {
                match target.remove_member(organization, account_handle).await {
                    Ok(()) => {
                        info!(handle = %account_handle, "member removed");
                        Outcome::Applied { at: Utc::now() }
                    }
                    Err(err) => Outcome::Failed {
                        error: err.to_string(),
                    },
                }
            }
            SyncAction::UpdateRole {
                account_handle,
                desired_role,
                ..
            } => match target
                .update_role(organization, account_handle, *desired_role)
                .await
            {
                Ok(()) => {
                    info!(handle = %account_handle, role = %desired_role, "role updated");
                    Outcome::Applied { at: Utc::now() }
                }
                Err(err) => Outcome::Failed {
                    error: err.to_string(),
                },
            },
            SyncAction::CancelInvite {
                email,
                invitation_id,
            } => match target.cancel_invitation(organization, *invitation_id).await {
                Ok(()) => {
                    info!(email = %email, invitation_id, "pending invitation cancelled");
                    Outcome::Applied { at: Utc::now() }
                }
                Err(err) => Outcome::Failed {
                    error: err.to_string(),
                },
            },
            SyncAction::Skip { .. } => Outcome::Skipped,
        };

        if let Outcome::Failed { error } = &outcome {
            warn!(
                action = action.label(),
                target = action.target_identifier(),
                error = %error,
                "action failed",
            );
        }

        outcomes.push(ActionOutcome { action, outcome });
    }

    outcomes
}

/// Issue one invitation, upgrading to a role update on the already-member
/// race when the account search yields exactly one match.
async fn execute_invite(
    target: &dyn TargetDirectory,
    organization: &str,
    email: &str,
    role: roster_core::types::MemberRole,
) -> Outcome {
    match target.create_invitation(organization, email, role).await {
        Ok(invited) => {
            info!(email = %email, role = %role, invitation_id = ?invited.invitation_id, "invitation created");
            Outcome::Invited {
                invitation_id: invited.invitation_id,
                at: Utc::now(),
            }
        }
        Err(err) if err.is_already_member() => {
            // Race: the account joined between diff and execute, or its email
            // was never visible to the diff. Resolve the handle and align the
            // role instead.
            let handle = match target.search_account_by_email(email).await {
                Ok(handle) => handle,
                Err(search_err) => {
                    warn!(email = %email, error = %search_err, "account search failed after already-member rejection");
                    None
                }
            };
            match handle {
                Some(handle) => match target.update_role(organization, &handle, role).await {
                    Ok(()) => {
                        info!(email = %email, handle = %handle, role = %role, "invite upgraded to role update");
                        Outcome::UpgradedToRoleUpdate {
                            account_handle: handle,
                            at: Utc::now(),
                        }
                    }
                    Err(role_err) => {
                        warn!(email = %email, handle = %handle, error = %role_err, "role update for already-present account failed");
                        Outcome::Failed {
                            error: role_err.to_string(),
                        }
                    }
                },
                // Zero or ambiguous matches: never guess which account this is.
                None => Outcome::AlreadyPresentUnresolved {
                    error: err.to_string(),
                },
            }
        }
        Err(err) => Outcome::Failed {
            error: err.to_string(),
        },
    }
}
