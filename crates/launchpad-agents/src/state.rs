use std::collections::HashMap;

use chrono::{DateTime, Utc};
use launchpad_models::{DecisionResult, EntityId, EntityKind, Metrics, MonitoredEntity};

use crate::error::AgentError;

/// Per-agent registry of monitored entities.
///
/// Owned exclusively by one agent runtime; nothing here is shared or locked.
/// Iteration follows insertion order so scheduling is deterministic.
#[derive(Debug, Default)]
pub struct StateStore {
    entities: HashMap<EntityId, MonitoredEntity>,
    order: Vec<EntityId>,
    next_generation: u64,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new entity. A second add for a live id is a protocol error.
    pub fn add(
        &mut self,
        id: EntityId,
        kind: EntityKind,
        metrics: Metrics,
        now: DateTime<Utc>,
    ) -> Result<&MonitoredEntity, AgentError> {
        if self.entities.contains_key(&id) {
            return Err(AgentError::DuplicateEntity(id));
        }

        self.next_generation += 1;
        let entity = MonitoredEntity::new(id.clone(), kind, metrics, now, self.next_generation);
        self.order.push(id.clone());
        Ok(self.entities.entry(id).or_insert(entity))
    }

    pub fn remove(&mut self, id: &EntityId) -> Result<MonitoredEntity, AgentError> {
        let entity = self
            .entities
            .remove(id)
            .ok_or_else(|| AgentError::UnknownEntity(id.clone()))?;
        self.order.retain(|existing| existing != id);
        Ok(entity)
    }

    pub fn get(&self, id: &EntityId) -> Option<&MonitoredEntity> {
        self.entities.get(id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    /// Merge fresh observations into an entity's metrics.
    pub fn update_metrics(&mut self, id: &EntityId, fresh: Metrics) -> Result<(), AgentError> {
        let entity = self
            .entities
            .get_mut(id)
            .ok_or_else(|| AgentError::UnknownEntity(id.clone()))?;
        entity.metrics.merge(fresh);
        Ok(())
    }

    /// Store an evaluation result if the entity is still the registration it
    /// was evaluated from. Returns `false` when the result is stale.
    pub fn commit(
        &mut self,
        id: &EntityId,
        generation: u64,
        decision: Option<DecisionResult>,
        evaluated_at: DateTime<Utc>,
    ) -> bool {
        let Some(entity) = self.entities.get_mut(id) else {
            return false;
        };
        if entity.generation != generation {
            return false;
        }

        entity.last_evaluated_at = Some(evaluated_at);
        if decision.is_some() {
            entity.last_decision = decision;
        }
        true
    }

    pub fn mark_action(&mut self, id: &EntityId, at: DateTime<Utc>) {
        if let Some(entity) = self.entities.get_mut(id) {
            entity.last_action_at = Some(at);
        }
    }

    /// Entities in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &MonitoredEntity> {
        self.order.iter().filter_map(|id| self.entities.get(id))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Verify the order index and the entity map describe the same set.
    pub fn check_integrity(&self) -> Result<(), AgentError> {
        if self.order.len() != self.entities.len() {
            return Err(AgentError::Corrupt(format!(
                "order index has {} ids, map has {} entities",
                self.order.len(),
                self.entities.len()
            )));
        }
        for id in &self.order {
            match self.entities.get(id) {
                Some(entity) if &entity.id == id => {}
                Some(entity) => {
                    return Err(AgentError::Corrupt(format!(
                        "entity stored under {id} claims id {}",
                        entity.id
                    )))
                }
                None => return Err(AgentError::Corrupt(format!("{id} indexed but missing"))),
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn corrupt_for_test(&mut self, id: EntityId) {
        self.order.push(id);
    }
}
