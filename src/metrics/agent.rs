//! Per-component metrics counters.

use dashmap::DashMap;
use std::sync::Arc;

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Default)]
struct ComponentMetrics {
    counters: DashMap<String, u64>,
    instants: DashMap<String, u64>,
}

/// Counter sink keyed by component id.
///
/// Writers are the watchdogs, the subscription coordinator and the task
/// controller; readers are whatever the embedding process exports metrics
/// with. All access is lock-free map traffic.
pub struct MetricsAgent {
    components: DashMap<String, Arc<ComponentMetrics>>,
}

impl MetricsAgent {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            components: DashMap::new(),
        })
    }

    fn component(&self, component_id: &str) -> Arc<ComponentMetrics> {
        self.components
            .entry(component_id.to_string())
            .or_default()
            .clone()
    }

    /// Increments `counter` for `component_id` by one.
    pub fn increment(&self, component_id: &str, counter: &str) {
        let component = self.component(component_id);
        *component.counters.entry(counter.to_string()).or_insert(0) += 1;
    }

    /// Records the current instant under `name` for `component_id`.
    pub fn touch_instant(&self, component_id: &str, name: &str) {
        let component = self.component(component_id);
        component.instants.insert(name.to_string(), now_ms());
    }

    /// Current value of a counter (0 when never incremented).
    pub fn count_of(&self, component_id: &str, counter: &str) -> u64 {
        self.components
            .get(component_id)
            .and_then(|component| component.counters.get(counter).map(|value| *value))
            .unwrap_or(0)
    }

    /// Last recorded instant for `name`, in milliseconds since the epoch.
    pub fn instant_of(&self, component_id: &str, name: &str) -> Option<u64> {
        self.components
            .get(component_id)
            .and_then(|component| component.instants.get(name).map(|value| *value))
    }

    /// Component ids that have reported anything so far.
    pub fn component_ids(&self) -> Vec<String> {
        self.components
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }
}
