use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;

use super::hierarchy::{assemble_hierarchy, count_unassigned, flatten_hierarchy, wire_hierarchy};
use super::{PersistenceError, PersistenceResult, ServiceDataPersistence};
use crate::models::{PageRequest, PageResult, ServiceData, ServiceId};
use crate::state_machine::ServiceState;

/// Process-local service store
#[derive(Debug)]
pub struct InMemoryServiceDataPersistence {
    records: DashMap<ServiceId, ServiceData>,
    next_id: AtomicI64,
}

impl InMemoryServiceDataPersistence {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn allocate_ids(&self, count: usize) -> Vec<ServiceId> {
        let first = self.next_id.fetch_add(count as i64, Ordering::SeqCst);
        (first..first + count as i64).map(ServiceId).collect()
    }

    fn snapshot(&self) -> HashMap<ServiceId, ServiceData> {
        self.records
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }
}

impl Default for InMemoryServiceDataPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceDataPersistence for InMemoryServiceDataPersistence {
    async fn find_by_id(&self, id: ServiceId) -> PersistenceResult<Option<ServiceData>> {
        Ok(self.records.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_service_hierarchy(&self, id: ServiceId) -> PersistenceResult<Option<ServiceData>> {
        if !self.records.contains_key(&id) {
            return Ok(None);
        }
        Ok(assemble_hierarchy(id, &self.snapshot()))
    }

    async fn find_child_services(&self, id: ServiceId) -> PersistenceResult<Vec<ServiceData>> {
        let mut children: Vec<ServiceData> = self
            .records
            .iter()
            .filter(|entry| entry.value().parent_service_id == Some(id))
            .map(|entry| entry.value().clone())
            .collect();
        children.sort_by_key(|sd| sd.id);
        Ok(children)
    }

    async fn find_services_by_state(
        &self,
        states: &[ServiceState],
        page: &PageRequest,
    ) -> PersistenceResult<PageResult<ServiceData>> {
        let mut matching: Vec<ServiceData> = self
            .records
            .iter()
            .filter(|entry| states.contains(&entry.value().state))
            .map(|entry| entry.value().clone())
            .collect();
        matching.sort_by(|a, b| b.priority().cmp(&a.priority()).then(a.id.cmp(&b.id)));

        let page_items: Vec<ServiceData> = if page.page_size == 0 {
            matching
        } else {
            matching
                .into_iter()
                .skip(page.offset())
                .take(page.page_size)
                .collect()
        };
        Ok(PageResult::new(page, page_items))
    }

    async fn save_hierarchy(&self, service_data: &mut ServiceData) -> PersistenceResult<()> {
        let mut ids = self.allocate_ids(count_unassigned(service_data)).into_iter();
        wire_hierarchy(service_data, &mut ids);

        let now = Utc::now();
        for (position, mut record) in flatten_hierarchy(service_data).into_iter().enumerate() {
            let id = record
                .id
                .ok_or_else(|| PersistenceError::MissingId(record.name.clone()))?;
            // already persisted dependencies keep their stored state
            if position > 0 && self.records.contains_key(&id) {
                continue;
            }
            record.modification_date = Some(now);
            debug!(service_id = %id, name = %record.name, "Saving service record");
            self.records.insert(id, record);
        }
        Ok(())
    }

    async fn update(&self, service_data: &ServiceData) -> PersistenceResult<()> {
        let id = service_data
            .id
            .ok_or_else(|| PersistenceError::MissingId(service_data.name.clone()))?;
        let mut entry = self
            .records
            .get_mut(&id)
            .ok_or(PersistenceError::NotFound(id))?;
        let mut record = service_data.clone();
        record.dependencies.clear();
        record.modification_date = Some(Utc::now());
        *entry = record;
        Ok(())
    }
}
