use std::{
    collections::BTreeMap,
    sync::{Mutex, PoisonError},
};

use tracing::trace;

pub trait MetricsCollector: Send + Sync {
    fn incr_events(&self, resource: &str, action: &str);
    fn incr_sync_operation(&self, resource: &str, result: &str);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Counter {
    Events,
    SyncOperations,
}

/// Process local counters, labelled the way the gateway controller reports them.
#[derive(Debug, Default)]
pub struct CounterMetrics {
    counters: Mutex<BTreeMap<(Counter, String, String), u64>>,
}

impl CounterMetrics {
    fn incr(&self, counter: Counter, resource: &str, label: &str) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let value = counters.entry((counter, resource.to_owned(), label.to_owned())).or_default();
        *value += 1;
        trace!("{counter:?} {resource} {label} = {value}");
    }

    fn get(&self, counter: Counter, resource: &str, label: &str) -> u64 {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters.get(&(counter, resource.to_owned(), label.to_owned())).copied().unwrap_or_default()
    }

    pub fn events(&self, resource: &str, action: &str) -> u64 {
        self.get(Counter::Events, resource, action)
    }

    pub fn sync_operations(&self, resource: &str, result: &str) -> u64 {
        self.get(Counter::SyncOperations, resource, result)
    }
}

impl MetricsCollector for CounterMetrics {
    fn incr_events(&self, resource: &str, action: &str) {
        self.incr(Counter::Events, resource, action);
    }

    fn incr_sync_operation(&self, resource: &str, result: &str) {
        self.incr(Counter::SyncOperations, resource, result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = CounterMetrics::default();
        metrics.incr_events("upstream", "add");
        metrics.incr_events("upstream", "add");
        metrics.incr_sync_operation("upstream", "failure");

        assert_eq!(metrics.events("upstream", "add"), 2);
        assert_eq!(metrics.events("upstream", "delete"), 0);
        assert_eq!(metrics.sync_operations("upstream", "failure"), 1);
        assert_eq!(metrics.sync_operations("upstream", "success"), 0);
    }
}
