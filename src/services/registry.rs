use crate::domain::{ContainerInfo, ServiceAlias};
use std::collections::{BTreeMap, BTreeSet};

/// A container created for an alias during this environment's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    pub alias: ServiceAlias,
    pub id: String,
    pub info: ContainerInfo,
}

/// In-memory state of one environment: which alias lives in which
/// container, which host ports were pinned, and the order in which
/// containers were created.
///
/// The creation order is append-only while spawning and is what teardown
/// walks backwards, so dependents always go down before what they depend on.
#[derive(Debug, Default)]
pub struct ContainerRegistry {
    records: BTreeMap<ServiceAlias, ContainerRecord>,
    creation_order: Vec<String>,
    port_ledger: BTreeMap<ServiceAlias, BTreeSet<u16>>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, alias: ServiceAlias) -> bool {
        self.records.contains_key(&alias)
    }

    pub fn get(&self, alias: ServiceAlias) -> Option<&ContainerRecord> {
        self.records.get(&alias)
    }

    pub fn info(&self, alias: ServiceAlias) -> Option<&ContainerInfo> {
        self.records.get(&alias).map(|record| &record.info)
    }

    pub fn aliases(&self) -> Vec<ServiceAlias> {
        self.records.keys().copied().collect()
    }

    /// Remembers a container id as soon as the runtime hands it out.
    pub fn track_created(&mut self, id: &str) {
        if !self.creation_order.iter().any(|known| known == id) {
            self.creation_order.push(id.to_string());
        }
    }

    pub fn insert(&mut self, record: ContainerRecord) {
        self.track_created(&record.id);
        self.records.insert(record.alias, record);
    }

    pub fn record_ports(&mut self, alias: ServiceAlias, ports: impl IntoIterator<Item = u16>) {
        self.port_ledger.entry(alias).or_default().extend(ports);
    }

    pub fn ports(&self, alias: ServiceAlias) -> Vec<u16> {
        self.port_ledger
            .get(&alias)
            .map(|ports| ports.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn creation_order(&self) -> &[String] {
        &self.creation_order
    }

    /// Alias that owns a container id, if it got as far as being recorded.
    pub fn alias_of(&self, id: &str) -> Option<ServiceAlias> {
        self.records
            .values()
            .find(|record| record.id == id)
            .map(|record| record.alias)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.creation_order.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.creation_order.clear();
        self.port_ledger.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(alias: ServiceAlias, id: &str) -> ContainerRecord {
        ContainerRecord {
            alias,
            id: id.to_string(),
            info: ContainerInfo::new(id, format!("/{id}"), true),
        }
    }

    #[test]
    fn test_creation_order_is_insertion_order() {
        let mut registry = ContainerRegistry::new();
        registry.track_created("c1");
        registry.insert(record(ServiceAlias::Database, "c2"));
        registry.insert(record(ServiceAlias::CoreServer, "c3"));

        assert_eq!(registry.creation_order(), ["c1", "c2", "c3"]);
    }

    #[test]
    fn test_tracking_same_id_twice_keeps_one_entry() {
        let mut registry = ContainerRegistry::new();
        registry.track_created("c1");
        registry.insert(record(ServiceAlias::Database, "c1"));

        assert_eq!(registry.creation_order(), ["c1"]);
        assert_eq!(registry.alias_of("c1"), Some(ServiceAlias::Database));
    }

    #[test]
    fn test_unrecorded_id_has_no_alias() {
        let mut registry = ContainerRegistry::new();
        registry.track_created("orphan");

        assert_eq!(registry.alias_of("orphan"), None);
        assert!(!registry.is_empty());
    }

    #[test]
    fn test_port_ledger_and_clear() {
        let mut registry = ContainerRegistry::new();
        registry.insert(record(ServiceAlias::EventBus, "kafka"));
        registry.record_ports(ServiceAlias::EventBus, [9100, 2200]);

        assert_eq!(registry.ports(ServiceAlias::EventBus), vec![2200, 9100]);
        assert!(registry.ports(ServiceAlias::Database).is_empty());

        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.ports(ServiceAlias::EventBus).is_empty());
        assert!(!registry.contains(ServiceAlias::EventBus));
    }
}
