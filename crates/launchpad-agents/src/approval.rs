use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use launchpad_models::{
    AgentAddress, ApprovalStatus, ApprovalVerdict, DecisionResult, EntityId, PendingApproval,
};
use uuid::Uuid;

use crate::error::AgentError;

/// One approval workflow per proposal id.
///
/// AWAITING moves to exactly one of APPROVED, REJECTED or EXPIRED; terminal
/// states never change again.
#[derive(Debug, Default)]
pub struct ApprovalBook {
    approvals: HashMap<Uuid, PendingApproval>,
}

impl ApprovalBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new workflow in AWAITING.
    pub fn propose(
        &mut self,
        entity_id: EntityId,
        proposed: DecisionResult,
        requested_by: AgentAddress,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> PendingApproval {
        let approval = PendingApproval {
            id: Uuid::new_v4(),
            entity_id,
            proposed,
            requested_by,
            status: ApprovalStatus::Awaiting,
            created_at: now,
            deadline: now + ttl,
            resolved_at: None,
            resolved_by: None,
        };
        self.approvals.insert(approval.id, approval.clone());
        approval
    }

    pub fn approve(
        &mut self,
        id: &Uuid,
        approver: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<PendingApproval, AgentError> {
        self.transition(id, ApprovalStatus::Approved, approver, now)
    }

    pub fn reject(
        &mut self,
        id: &Uuid,
        approver: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<PendingApproval, AgentError> {
        self.transition(id, ApprovalStatus::Rejected, approver, now)
    }

    pub fn decide(
        &mut self,
        id: &Uuid,
        verdict: ApprovalVerdict,
        approver: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<PendingApproval, AgentError> {
        match verdict {
            ApprovalVerdict::Approve => self.approve(id, approver, now),
            ApprovalVerdict::Reject => self.reject(id, approver, now),
        }
    }

    /// Force every AWAITING workflow past its deadline into EXPIRED.
    pub fn expire_due(&mut self, now: DateTime<Utc>) -> Vec<PendingApproval> {
        let mut expired: Vec<PendingApproval> = self
            .approvals
            .values_mut()
            .filter(|a| a.status == ApprovalStatus::Awaiting && a.deadline <= now)
            .map(|a| {
                a.status = ApprovalStatus::Expired;
                a.resolved_at = Some(now);
                a.resolved_by = None;
                a.clone()
            })
            .collect();
        expired.sort_by_key(|a| (a.deadline, a.created_at));
        expired
    }

    pub fn get(&self, id: &Uuid) -> Option<&PendingApproval> {
        self.approvals.get(id)
    }

    pub fn awaiting(&self) -> usize {
        self.approvals
            .values()
            .filter(|a| a.status == ApprovalStatus::Awaiting)
            .count()
    }

    pub fn len(&self) -> usize {
        self.approvals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.approvals.is_empty()
    }

    fn transition(
        &mut self,
        id: &Uuid,
        to: ApprovalStatus,
        approver: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<PendingApproval, AgentError> {
        let approval = self
            .approvals
            .get_mut(id)
            .ok_or(AgentError::UnknownApproval(*id))?;

        if approval.status.is_terminal() {
            return Err(AgentError::AlreadyResolved {
                approval_id: *id,
                current: approval.status,
            });
        }
        if approval.deadline <= now {
            // The window closed before any sweep got to it.
            approval.status = ApprovalStatus::Expired;
            approval.resolved_at = Some(now);
            approval.resolved_by = None;
            return Err(AgentError::AlreadyResolved {
                approval_id: *id,
                current: ApprovalStatus::Expired,
            });
        }
        if to == ApprovalStatus::Awaiting {
            return Ok(approval.clone());
        }

        approval.status = to;
        approval.resolved_at = Some(now);
        approval.resolved_by = approver;
        Ok(approval.clone())
    }
}
