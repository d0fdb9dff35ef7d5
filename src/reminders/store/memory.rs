use super::{InstanceState, StoreError, WorkflowInstance, WorkflowStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Process-local store with the same claim semantics as the Postgres one.
/// Nothing survives the process, so it only stands in for Postgres in tests
/// and local experiments.
#[derive(Default)]
pub struct InMemoryWorkflowStore {
    instances: Mutex<HashMap<Uuid, Entry>>,
}

struct Entry {
    instance: WorkflowInstance,
    claimed_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_stale(&self, stale_before: DateTime<Utc>) -> bool {
        self.instance.state == InstanceState::Running
            && self.claimed_at.map_or(false, |at| at < stale_before)
    }
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<WorkflowInstance> {
        self.instances
            .lock()
            .unwrap()
            .values()
            .map(|entry| entry.instance.clone())
            .collect()
    }
}

fn held(instance: &WorkflowInstance, now: DateTime<Utc>) -> Entry {
    let mut instance = instance.clone();
    let claimed_at = if instance.state == InstanceState::Running {
        Some(now)
    } else {
        instance.claim = None;
        None
    };
    Entry {
        instance,
        claimed_at,
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn insert(
        &self,
        instance: &WorkflowInstance,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut instances = self.instances.lock().unwrap();
        if instances.contains_key(&instance.subscription_id) {
            return Ok(false);
        }
        instances.insert(instance.subscription_id, held(instance, now));
        Ok(true)
    }

    async fn save(&self, instance: &WorkflowInstance, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut instances = self.instances.lock().unwrap();
        match instances.get_mut(&instance.subscription_id) {
            Some(entry) if entry.instance.claim == instance.claim => {
                *entry = held(instance, now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, subscription_id: Uuid) -> Result<Option<WorkflowInstance>, StoreError> {
        Ok(self
            .instances
            .lock()
            .unwrap()
            .get(&subscription_id)
            .map(|entry| entry.instance.clone()))
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WorkflowInstance>, StoreError> {
        let mut instances = self.instances.lock().unwrap();
        let mut due: Vec<(DateTime<Utc>, Uuid)> = instances
            .values()
            .filter_map(|entry| match entry.instance.state {
                InstanceState::Suspended { wake_at } if wake_at <= now => {
                    Some((wake_at, entry.instance.subscription_id))
                }
                InstanceState::Running if entry.is_stale(stale_before) => {
                    Some((entry.claimed_at?, entry.instance.subscription_id))
                }
                _ => None,
            })
            .collect();
        due.sort();
        due.truncate(limit);

        let token = Uuid::new_v4();
        let mut claimed = Vec::with_capacity(due.len());
        for (_, id) in due {
            if let Some(entry) = instances.get_mut(&id) {
                entry.instance.state = InstanceState::Running;
                entry.instance.claim = Some(token);
                entry.claimed_at = Some(now);
                claimed.push(entry.instance.clone());
            }
        }
        Ok(claimed)
    }

    async fn release_running(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut instances = self.instances.lock().unwrap();
        let mut released = 0;
        for entry in instances.values_mut() {
            if entry.is_stale(stale_before) {
                entry.instance.state = InstanceState::Suspended { wake_at: now };
                entry.instance.claim = None;
                entry.claimed_at = None;
                released += 1;
            }
        }
        Ok(released)
    }
}
