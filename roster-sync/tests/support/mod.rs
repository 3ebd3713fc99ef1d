//! Shared in-memory directory fakes for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use roster_core::types::{AuditEvent, MemberRole, SourceMember, TargetMember};
use roster_sync::{DirectoryError, SourceDirectory, TargetDirectory};

pub fn active_member(email: &str) -> SourceMember {
    SourceMember {
        email: email.to_string(),
        source_role: "MEMBER".to_string(),
        account_type: "USER".to_string(),
        account_status: "ACTIVE".to_string(),
        suspended: false,
    }
}

pub fn org_member(handle: &str, email: Option<&str>, role: MemberRole) -> TargetMember {
    TargetMember {
        account_handle: Some(handle.to_string()),
        email: email.map(str::to_string),
        role,
        is_pending: false,
        invitation_id: None,
    }
}

pub fn pending_invite(email: &str, invitation_id: i64) -> TargetMember {
    TargetMember {
        account_handle: None,
        email: Some(email.to_string()),
        role: MemberRole::Member,
        is_pending: true,
        invitation_id: Some(invitation_id),
    }
}

/// Source directory fake serving fixed group rosters.
#[derive(Default)]
pub struct FakeSource {
    pub groups: HashMap<String, Vec<SourceMember>>,
    pub suspended: HashMap<String, bool>,
    /// When set, group listings block until permits are released. Used to
    /// hold a run open while another is attempted.
    pub gate: Option<Arc<Semaphore>>,
}

impl FakeSource {
    pub fn with_groups(base: (&str, Vec<SourceMember>), elevated: (&str, Vec<SourceMember>)) -> Self {
        let mut groups = HashMap::new();
        groups.insert(base.0.to_string(), base.1);
        groups.insert(elevated.0.to_string(), elevated.1);
        FakeSource {
            groups,
            ..FakeSource::default()
        }
    }
}

#[async_trait]
impl SourceDirectory for FakeSource {
    async fn list_group_members(
        &self,
        group_id: &str,
    ) -> Result<Vec<SourceMember>, DirectoryError> {
        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| DirectoryError::api("list_group_members", "gate closed"))?;
            permit.forget();
        }
        Ok(self.groups.get(group_id).cloned().unwrap_or_default())
    }

    async fn suspension_status(
        &self,
        emails: &[String],
    ) -> Result<HashMap<String, bool>, DirectoryError> {
        Ok(emails
            .iter()
            .filter_map(|email| self.suspended.get(email).map(|s| (email.clone(), *s)))
            .collect())
    }
}

/// Target directory fake with mutable membership state, so executed actions
/// are observable both as recorded calls and as state changes.
pub struct FakeTarget {
    pub members: Mutex<Vec<TargetMember>>,
    pub pending: Mutex<Vec<TargetMember>>,
    pub failed: Vec<TargetMember>,
    pub audit_events: Vec<AuditEvent>,
    pub verified: HashMap<String, String>,
    /// Emails whose invite is rejected as already-a-member.
    pub already_members: Vec<String>,
    pub search_results: HashMap<String, String>,
    pub next_invitation_id: AtomicI64,
    pub calls: Mutex<Vec<String>>,
}

impl Default for FakeTarget {
    fn default() -> Self {
        FakeTarget {
            members: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
            failed: Vec::new(),
            audit_events: Vec::new(),
            verified: HashMap::new(),
            already_members: Vec::new(),
            search_results: HashMap::new(),
            next_invitation_id: AtomicI64::new(1000),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl FakeTarget {
    pub fn with_members(members: Vec<TargetMember>) -> Self {
        FakeTarget {
            members: Mutex::new(members),
            ..FakeTarget::default()
        }
    }

    pub fn record(&self, call: impl Into<String>) {
        self.calls.lock().expect("lock").push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock").clone()
    }

    pub fn members(&self) -> Vec<TargetMember> {
        self.members.lock().expect("lock").clone()
    }

    pub fn pending(&self) -> Vec<TargetMember> {
        self.pending.lock().expect("lock").clone()
    }
}

#[async_trait]
impl TargetDirectory for FakeTarget {
    async fn list_members(&self, _org: &str) -> Result<Vec<TargetMember>, DirectoryError> {
        Ok(self.members())
    }

    async fn list_pending_invitations(
        &self,
        _org: &str,
    ) -> Result<Vec<TargetMember>, DirectoryError> {
        Ok(self.pending())
    }

    async fn create_invitation(
        &self,
        _org: &str,
        email: &str,
        role: MemberRole,
    ) -> Result<TargetMember, DirectoryError> {
        self.record(format!("invite:{email}"));
        if self.already_members.iter().any(|e| e.eq_ignore_ascii_case(email)) {
            return Err(DirectoryError::AlreadyMember {
                email: email.to_string(),
            });
        }
        let id = self.next_invitation_id.fetch_add(1, Ordering::SeqCst);
        let invite = TargetMember {
            account_handle: None,
            email: Some(email.to_string()),
            role,
            is_pending: true,
            invitation_id: Some(id),
        };
        self.pending.lock().expect("lock").push(invite.clone());
        Ok(invite)
    }

    async fn remove_member(&self, _org: &str, handle: &str) -> Result<(), DirectoryError> {
        self.record(format!("remove:{handle}"));
        self.members
            .lock()
            .expect("lock")
            .retain(|m| m.account_handle.as_deref() != Some(handle));
        Ok(())
    }

    async fn update_role(
        &self,
        _org: &str,
        handle: &str,
        role: MemberRole,
    ) -> Result<(), DirectoryError> {
        self.record(format!("update_role:{handle}:{role}"));
        for member in self.members.lock().expect("lock").iter_mut() {
            if member.account_handle.as_deref() == Some(handle) {
                member.role = role;
            }
        }
        Ok(())
    }

    async fn cancel_invitation(&self, _org: &str, id: i64) -> Result<(), DirectoryError> {
        self.record(format!("cancel:{id}"));
        self.pending
            .lock()
            .expect("lock")
            .retain(|m| m.invitation_id != Some(id));
        Ok(())
    }

    async fn search_account_by_email(&self, email: &str) -> Result<Option<String>, DirectoryError> {
        self.record(format!("search:{email}"));
        Ok(self.search_results.get(email).cloned())
    }

    async fn list_add_member_audit_events(
        &self,
        _org: &str,
        after: i64,
    ) -> Result<Vec<AuditEvent>, DirectoryError> {
        Ok(self
            .audit_events
            .iter()
            .filter(|event| event.timestamp > after)
            .cloned()
            .collect())
    }

    async fn list_failed_invitations(&self, _org: &str) -> Result<Vec<TargetMember>, DirectoryError> {
        Ok(self.failed.clone())
    }

    async fn list_verified_email_mappings(
        &self,
        _org: &str,
    ) -> Result<HashMap<String, String>, DirectoryError> {
        Ok(self.verified.clone())
    }
}
