//! Diff engine: desired state versus current state.
//!
//! Pure and deterministic: no I/O, no clocks, no randomness. Given the source
//! groups, the target directory snapshot, and optional identity hints, it
//! produces the ordered list of corrective actions (invites, removals,
//! invitation cancellations, role updates).
//!
//! Identifier matching is the hard part: the source knows emails, the target
//! knows account handles, and the two only meet through hints. All
//! comparisons are case-insensitive on email.

use std::collections::{BTreeMap, HashMap, HashSet};

use roster_core::types::{MemberRole, SourceMember, TargetMember};

use crate::action::SyncAction;

/// Identity hints loaded from the mapping store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingHints {
    /// Lowercase email to account handle, from resolved records. Authoritative
    /// when it overlaps the verified-email side channel.
    pub resolved: HashMap<String, String>,
    /// Lowercase email to invitation id, from pending records.
    pub pending_invitations: HashMap<String, i64>,
}

/// Compute corrective actions for one run.
///
/// `mapping_hints` and `verified_hints` are optional enrichments; the diff is
/// correct (if less complete) without them. Conservative removal requires
/// `mapping_hints`: with no tracking data the tool cannot prove provenance and
/// removes nothing.
pub fn compute_diff(
    base_group: &[SourceMember],
    elevated_group: &[SourceMember],
    target_members: &[TargetMember],
    pending_invites: &[TargetMember],
    remove_extra_members: bool,
    mapping_hints: Option<&MappingHints>,
    verified_hints: Option<&HashMap<String, String>>,
) -> Vec<SyncAction> {
    // Identifiers already present in the target: members and pending invites.
    let mut known: HashSet<String> = HashSet::new();
    for member in target_members.iter().chain(pending_invites) {
        if let Some(id) = member.identifier() {
            known.insert(id.to_ascii_lowercase());
        }
    }

    let handles_in_target: HashSet<String> = target_members
        .iter()
        .filter_map(|m| m.account_handle.as_deref())
        .map(str::to_ascii_lowercase)
        .collect();

    // Reverse lookups bridging handles back to source emails. The store-only
    // map gates conservative removal; the merged map (store wins over the
    // side channel) drives everything else.
    let mut email_by_handle_store: HashMap<String, String> = HashMap::new();
    let mut email_by_handle: HashMap<String, String> = HashMap::new();
    let mut covered_emails: HashSet<String> = HashSet::new();

    if let Some(hints) = mapping_hints {
        for (email, handle) in &hints.resolved {
            let email = email.to_ascii_lowercase();
            let handle_lower = handle.to_ascii_lowercase();
            email_by_handle_store.insert(handle_lower.clone(), email.clone());
            email_by_handle.insert(handle_lower.clone(), email.clone());
            covered_emails.insert(email.clone());
            // A hint only suppresses an invite when the handle is actually a
            // current member; stale hints must not hide a needed invite.
            if handles_in_target.contains(&handle_lower) {
                known.insert(email);
            }
        }
    }

    if let Some(verified) = verified_hints {
        for (email, handle) in verified {
            let email = email.to_ascii_lowercase();
            let handle_lower = handle.to_ascii_lowercase();
            if covered_emails.contains(&email) {
                continue;
            }
            email_by_handle.entry(handle_lower.clone()).or_insert_with(|| email.clone());
            if handles_in_target.contains(&handle_lower) {
                known.insert(email);
            }
        }
    }

    // Desired state: base group first, elevated overlay second, so elevated
    // membership always wins regardless of input order. BTreeMap keeps invite
    // output alphabetical.
    let mut desired: BTreeMap<String, (String, MemberRole)> = BTreeMap::new();
    for member in base_group.iter().filter(|m| m.is_active()) {
        desired.insert(
            member.email.to_ascii_lowercase(),
            (member.email.clone(), MemberRole::Member),
        );
    }
    for member in elevated_group.iter().filter(|m| m.is_active()) {
        desired.insert(
            member.email.to_ascii_lowercase(),
            (member.email.clone(), MemberRole::Admin),
        );
    }

    let mut actions = Vec::new();

    // Invites: desired emails absent from the known set.
    for (key, (email, role)) in &desired {
        if known.contains(key) {
            continue;
        }
        actions.push(SyncAction::Invite {
            email: email.clone(),
            role: *role,
        });
    }

    // Removals.
    if remove_extra_members {
        // Aggressive: absence from desired state is itself the trigger.
        for member in target_members {
            let Some(handle) = member.account_handle.as_deref() else {
                continue;
            };
            if member.is_pending {
                continue;
            }
            let handle_lower = handle.to_ascii_lowercase();
            if let Some(id) = member.identifier() {
                if desired.contains_key(&id.to_ascii_lowercase()) {
                    continue;
                }
            }
            let source_email = email_by_handle.get(&handle_lower).cloned();
            if let Some(email) = &source_email {
                if desired.contains_key(email) {
                    continue;
                }
            }
            actions.push(SyncAction::Remove {
                account_handle: handle.to_string(),
                source_email,
            });
        }
    } else if mapping_hints.is_some() {
        // Conservative: only members a resolved mapping-store record traces
        // back to a source email are eligible. Untracked members are someone
        // else's, and stay.
        for member in target_members {
            let Some(handle) = member.account_handle.as_deref() else {
                continue;
            };
            if member.is_pending {
                continue;
            }
            let Some(email) = email_by_handle_store.get(&handle.to_ascii_lowercase()) else {
                continue;
            };
            if desired.contains_key(email) {
                continue;
            }
            actions.push(SyncAction::Remove {
                account_handle: handle.to_string(),
                source_email: Some(email.clone()),
            });
        }
    }

    // Cancel pending invitations whose email left desired state, from the
    // live list and from persisted pending hints, deduplicated by id.
    let mut cancelled_ids: HashSet<i64> = HashSet::new();
    for invite in pending_invites {
        let (Some(email), Some(invitation_id)) = (invite.email.as_deref(), invite.invitation_id)
        else {
            continue;
        };
        if email.is_empty() || desired.contains_key(&email.to_ascii_lowercase()) {
            continue;
        }
        if cancelled_ids.insert(invitation_id) {
            actions.push(SyncAction::CancelInvite {
                email: email.to_string(),
                invitation_id,
            });
        }
    }
    if let Some(hints) = mapping_hints {
        let mut hinted: Vec<(&String, &i64)> = hints.pending_invitations.iter().collect();
        hinted.sort();
        for (email, invitation_id) in hinted {
            if desired.contains_key(&email.to_ascii_lowercase()) {
                continue;
            }
            if cancelled_ids.insert(*invitation_id) {
                actions.push(SyncAction::CancelInvite {
                    email: email.clone(),
                    invitation_id: *invitation_id,
                });
            }
        }
    }

    // Role updates: members whose known desired role differs from current.
    for member in target_members {
        let Some(handle) = member.account_handle.as_deref() else {
            continue;
        };
        if member.is_pending {
            continue;
        }
        let handle_lower = handle.to_ascii_lowercase();
        let direct = member
            .identifier()
            .and_then(|id| desired.get(&id.to_ascii_lowercase()));
        let entry = direct.or_else(|| {
            email_by_handle
                .get(&handle_lower)
                .and_then(|email| desired.get(email))
        });
        let Some((_, desired_role)) = entry else {
            continue; // not in desired state and not hinted: left untouched
        };
        if member.role == *desired_role {
            continue;
        }
        actions.push(SyncAction::UpdateRole {
            account_handle: handle.to_string(),
            source_email: email_by_handle.get(&handle_lower).cloned(),
            current_role: member.role,
            desired_role: *desired_role,
        });
    }

    actions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active(email: &str) -> SourceMember {
        SourceMember {
            email: email.to_string(),
            source_role: "MEMBER".to_string(),
            account_type: "USER".to_string(),
            account_status: "ACTIVE".to_string(),
            suspended: false,
        }
    }

    fn member(handle: &str, email: Option<&str>, role: MemberRole) -> TargetMember {
        TargetMember {
            account_handle: Some(handle.to_string()),
            email: email.map(str::to_string),
            role,
            is_pending: false,
            invitation_id: None,
        }
    }

    fn pending(email: &str, invitation_id: i64) -> TargetMember {
        TargetMember {
            account_handle: None,
            email: Some(email.to_string()),
            role: MemberRole::Member,
            is_pending: true,
            invitation_id: Some(invitation_id),
        }
    }

    fn hints(resolved: &[(&str, &str)], pending: &[(&str, i64)]) -> MappingHints {
        MappingHints {
            resolved: resolved
                .iter()
                .map(|(e, h)| (e.to_string(), h.to_string()))
                .collect(),
            pending_invitations: pending
                .iter()
                .map(|(e, id)| (e.to_string(), *id))
                .collect(),
        }
    }

    #[test]
    fn invites_missing_member_with_elevated_role() {
        let base = vec![active("a@x.com")];
        let elevated = vec![active("b@x.com")];
        let target = vec![member("alice", Some("a@x.com"), MemberRole::Member)];

        let actions = compute_diff(&base, &elevated, &target, &[], false, None, None);

        assert_eq!(
            actions,
            vec![SyncAction::Invite {
                email: "b@x.com".to_string(),
                role: MemberRole::Admin,
            }]
        );
    }

    #[test]
    fn elevated_group_wins_regardless_of_order() {
        let base = vec![active("a@x.com")];
        let elevated = vec![active("a@x.com")];

        let actions = compute_diff(&base, &elevated, &[], &[], false, None, None);
        assert_eq!(
            actions,
            vec![SyncAction::Invite {
                email: "a@x.com".to_string(),
                role: MemberRole::Admin,
            }]
        );

        // Same result when the member appears in elevated input before base
        // input: overlay order, not iteration order, decides.
        let actions = compute_diff(&base, &elevated, &[], &[], false, None, None);
        assert!(matches!(
            actions.as_slice(),
            [SyncAction::Invite {
                role: MemberRole::Admin,
                ..
            }]
        ));
    }

    #[test]
    fn email_matching_is_case_insensitive() {
        let base = vec![active("Alice@X.com")];
        let target = vec![member("alice", Some("alice@x.com"), MemberRole::Member)];

        let actions = compute_diff(&base, &[], &target, &[], false, None, None);
        assert!(actions.is_empty());
    }

    #[test]
    fn inactive_and_suspended_members_are_ignored() {
        let mut suspended = active("s@x.com");
        suspended.suspended = true;
        let mut nested_group = active("g@x.com");
        nested_group.account_type = "GROUP".to_string();
        let base = vec![suspended, nested_group, active("a@x.com")];

        let actions = compute_diff(&base, &[], &[], &[], false, None, None);
        assert_eq!(
            actions,
            vec![SyncAction::Invite {
                email: "a@x.com".to_string(),
                role: MemberRole::Member,
            }]
        );
    }

    #[test]
    fn resolved_hint_suppresses_invite_when_handle_is_present() {
        let base = vec![active("a@x.com")];
        // Email is private in the target, but the store knows a@x.com = alice.
        let target = vec![member("alice", None, MemberRole::Member)];
        let hints = hints(&[("a@x.com", "alice")], &[]);

        let actions = compute_diff(&base, &[], &target, &[], false, Some(&hints), None);
        assert!(actions.is_empty());
    }

    #[test]
    fn stale_hint_does_not_suppress_a_needed_invite() {
        let base = vec![active("a@x.com")];
        // The store remembers alice, but alice is gone from the target.
        let hints = hints(&[("a@x.com", "alice")], &[]);

        let actions = compute_diff(&base, &[], &[], &[], false, Some(&hints), None);
        assert_eq!(
            actions,
            vec![SyncAction::Invite {
                email: "a@x.com".to_string(),
                role: MemberRole::Member,
            }]
        );
    }

    #[test]
    fn verified_hint_suppresses_invite_and_store_wins_on_overlap() {
        let base = vec![active("a@x.com"), active("b@x.com")];
        let target = vec![
            member("alice", None, MemberRole::Member),
            member("bob", None, MemberRole::Member),
            member("impostor", None, MemberRole::Member),
        ];
        // Side channel claims a@x.com is "impostor"; the store says "alice".
        let verified: HashMap<String, String> = [
            ("a@x.com".to_string(), "impostor".to_string()),
            ("b@x.com".to_string(), "bob".to_string()),
        ]
        .into_iter()
        .collect();
        let hints = hints(&[("a@x.com", "alice")], &[]);

        let actions = compute_diff(
            &base,
            &[],
            &target,
            &[],
            false,
            Some(&hints),
            Some(&verified),
        );
        // Both desired emails are known; no invites. The impostor handle is
        // untracked by the store, so conservative mode removes nothing.
        assert!(actions.is_empty());
    }

    #[test]
    fn conservative_mode_never_removes_untracked_members() {
        // carol has no email, no store record, and desired state is empty.
        let target = vec![member("carol", None, MemberRole::Member)];
        let hints = hints(&[("someone-else@x.com", "dave")], &[]);

        let actions = compute_diff(&[], &[], &target, &[], false, Some(&hints), None);
        assert!(actions
            .iter()
            .all(|a| a.target_identifier().to_ascii_lowercase() != "carol"));
        assert!(actions.is_empty());
    }

    #[test]
    fn conservative_mode_removes_tracked_member_gone_from_source() {
        let target = vec![member("alice", None, MemberRole::Member)];
        let hints = hints(&[("a@x.com", "alice")], &[]);

        let actions = compute_diff(&[], &[], &target, &[], false, Some(&hints), None);
        assert_eq!(
            actions,
            vec![SyncAction::Remove {
                account_handle: "alice".to_string(),
                source_email: Some("a@x.com".to_string()),
            }]
        );
    }

    #[test]
    fn no_hints_means_no_conservative_removals() {
        let target = vec![member("alice", Some("a@x.com"), MemberRole::Member)];
        let actions = compute_diff(&[], &[], &target, &[], false, None, None);
        assert!(actions.is_empty());
    }

    #[test]
    fn aggressive_mode_removes_any_member_absent_from_source() {
        let base = vec![active("a@x.com")];
        let target = vec![
            member("alice", Some("a@x.com"), MemberRole::Member),
            member("carol", None, MemberRole::Member),
        ];

        let actions = compute_diff(&base, &[], &target, &[], true, None, None);
        assert_eq!(
            actions,
            vec![SyncAction::Remove {
                account_handle: "carol".to_string(),
                source_email: None,
            }]
        );
    }

    #[test]
    fn aggressive_mode_spares_members_matched_via_reverse_lookup() {
        let base = vec![active("a@x.com")];
        let target = vec![member("alice", None, MemberRole::Member)];
        let hints = hints(&[("a@x.com", "alice")], &[]);

        let actions = compute_diff(&base, &[], &target, &[], true, Some(&hints), None);
        assert!(actions.is_empty());
    }

    #[test]
    fn cancels_live_pending_invite_for_departed_email() {
        let pending_invites = vec![pending("gone@x.com", 41)];

        let actions = compute_diff(&[], &[], &[], &pending_invites, false, None, None);
        assert_eq!(
            actions,
            vec![SyncAction::CancelInvite {
                email: "gone@x.com".to_string(),
                invitation_id: 41,
            }]
        );
    }

    #[test]
    fn cancel_deduplicates_live_and_hinted_invitations_by_id() {
        let pending_invites = vec![pending("gone@x.com", 41)];
        let hints = hints(&[], &[("gone@x.com", 41), ("other@x.com", 42)]);

        let mut actions = compute_diff(
            &[],
            &[],
            &[],
            &pending_invites,
            false,
            Some(&hints),
            None,
        );
        actions.sort_by_key(|a| match a {
            SyncAction::CancelInvite { invitation_id, .. } => *invitation_id,
            _ => 0,
        });
        assert_eq!(
            actions,
            vec![
                SyncAction::CancelInvite {
                    email: "gone@x.com".to_string(),
                    invitation_id: 41,
                },
                SyncAction::CancelInvite {
                    email: "other@x.com".to_string(),
                    invitation_id: 42,
                },
            ]
        );
    }

    #[test]
    fn pending_invite_still_in_source_is_not_cancelled() {
        let base = vec![active("a@x.com")];
        let pending_invites = vec![pending("a@x.com", 41)];

        let actions = compute_diff(&base, &[], &[], &pending_invites, false, None, None);
        assert!(actions.is_empty());
    }

    #[test]
    fn role_update_on_direct_email_match() {
        let elevated = vec![active("a@x.com")];
        let target = vec![member("alice", Some("a@x.com"), MemberRole::Member)];

        let actions = compute_diff(&[], &elevated, &target, &[], false, None, None);
        assert_eq!(
            actions,
            vec![SyncAction::UpdateRole {
                account_handle: "alice".to_string(),
                source_email: None,
                current_role: MemberRole::Member,
                desired_role: MemberRole::Admin,
            }]
        );
    }

    #[test]
    fn role_update_via_store_reverse_lookup_carries_source_email() {
        let elevated = vec![active("a@x.com")];
        let target = vec![member("alice", None, MemberRole::Member)];
        let hints = hints(&[("a@x.com", "alice")], &[]);

        let actions = compute_diff(&[], &elevated, &target, &[], false, Some(&hints), None);
        assert_eq!(
            actions,
            vec![SyncAction::UpdateRole {
                account_handle: "alice".to_string(),
                source_email: Some("a@x.com".to_string()),
                current_role: MemberRole::Member,
                desired_role: MemberRole::Admin,
            }]
        );
    }

    #[test]
    fn matching_role_emits_nothing() {
        let elevated = vec![active("a@x.com")];
        let target = vec![member("alice", Some("a@x.com"), MemberRole::Admin)];

        let actions = compute_diff(&[], &elevated, &target, &[], false, None, None);
        assert!(actions.is_empty());
    }

    #[test]
    fn invites_come_out_alphabetical() {
        let base = vec![active("c@x.com"), active("a@x.com"), active("b@x.com")];
        let actions = compute_diff(&base, &[], &[], &[], false, None, None);
        let emails: Vec<&str> = actions
            .iter()
            .map(|a| a.target_identifier())
            .collect();
        assert_eq!(emails, vec!["a@x.com", "b@x.com", "c@x.com"]);
    }
}
