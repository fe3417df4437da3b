use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::error::AgentError;

/// An outbound request still waiting for its reply.
#[derive(Debug, Clone)]
pub struct CorrelationEntry<C> {
    pub request_id: Uuid,
    pub context: C,
    pub issued_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

/// Matches inbound replies to the requests an agent sent.
///
/// `C` is whatever the originating handler needs to continue once the reply
/// (or the timeout) arrives.
#[derive(Debug)]
pub struct CorrelationTracker<C> {
    pending: HashMap<Uuid, CorrelationEntry<C>>,
}

impl<C> Default for CorrelationTracker<C> {
    fn default() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }
}

impl<C> CorrelationTracker<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        request_id: Uuid,
        context: C,
        timeout: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), AgentError> {
        if self.pending.contains_key(&request_id) {
            return Err(AgentError::DuplicateCorrelation(request_id));
        }
        self.pending.insert(
            request_id,
            CorrelationEntry {
                request_id,
                context,
                issued_at: now,
                deadline: now + timeout,
            },
        );
        Ok(())
    }

    /// Remove and return the context waiting on `request_id`.
    ///
    /// A late, duplicate, or foreign reply yields `UnknownCorrelation`.
    pub fn resolve(&mut self, request_id: &Uuid) -> Result<CorrelationEntry<C>, AgentError> {
        self.pending
            .remove(request_id)
            .ok_or(AgentError::UnknownCorrelation(*request_id))
    }

    /// Remove every entry whose deadline has passed, earliest deadline first.
    pub fn expire_due(&mut self, now: DateTime<Utc>) -> Vec<CorrelationEntry<C>> {
        let expired_ids: Vec<Uuid> = self
            .pending
            .values()
            .filter(|entry| entry.deadline <= now)
            .map(|entry| entry.request_id)
            .collect();

        let mut expired: Vec<CorrelationEntry<C>> = expired_ids
            .iter()
            .filter_map(|id| self.pending.remove(id))
            .collect();
        expired.sort_by_key(|entry| (entry.deadline, entry.issued_at));
        expired
    }

    pub fn contains(&self, request_id: &Uuid) -> bool {
        self.pending.contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_returns_context_once() {
        let mut tracker = CorrelationTracker::new();
        let id = Uuid::new_v4();
        tracker
            .register(id, "launch-1", Duration::seconds(30), Utc::now())
            .unwrap();

        let entry = tracker.resolve(&id).unwrap();
        assert_eq!(entry.context, "launch-1");

        // A second reply for the same request is unknown.
        let err = tracker.resolve(&id).unwrap_err();
        assert!(matches!(err, AgentError::UnknownCorrelation(_)));
    }

    #[test]
    fn foreign_reply_is_unknown() {
        let mut tracker: CorrelationTracker<()> = CorrelationTracker::new();
        assert!(matches!(
            tracker.resolve(&Uuid::new_v4()),
            Err(AgentError::UnknownCorrelation(_))
        ));
    }

    #[test]
    fn duplicate_register_is_rejected() {
        let mut tracker = CorrelationTracker::new();
        let id = Uuid::new_v4();
        let now = Utc::now();
        tracker.register(id, 1, Duration::seconds(30), now).unwrap();
        assert!(tracker.register(id, 2, Duration::seconds(30), now).is_err());
        assert_eq!(tracker.resolve(&id).unwrap().context, 1);
    }

    #[test]
    fn sweep_expires_only_overdue_entries() {
        let mut tracker = CorrelationTracker::new();
        let now = Utc::now();
        let slow = Uuid::new_v4();
        let fast = Uuid::new_v4();
        let later = Uuid::new_v4();
        tracker.register(slow, "slow", Duration::seconds(20), now).unwrap();
        tracker.register(fast, "fast", Duration::seconds(10), now).unwrap();
        tracker.register(later, "later", Duration::seconds(60), now).unwrap();

        let expired = tracker.expire_due(now + Duration::seconds(30));
        let contexts: Vec<&str> = expired.iter().map(|e| e.context).collect();
        assert_eq!(contexts, vec!["fast", "slow"]);
        assert_eq!(tracker.len(), 1);
        assert!(tracker.contains(&later));

        // An expired request can no longer be resolved by a late reply.
        assert!(tracker.resolve(&fast).is_err());
    }
}
