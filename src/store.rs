//! In-memory per-host metric store.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::hosts::HostSet;

/// One `(timestamp, value)` sample. `time` is whole seconds since the Unix
/// epoch, captured at `put` time; values are overwritten, no history kept.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Sample {
    pub time: u64,
    pub value: i64,
}

/// Mapping from host identifier to a mapping from metric name to its most
/// recent sample. Lives for the process lifetime behind an
/// `Rc<RefCell<_>>` shared between the sensor handlers that call
/// [`MetricStore::put`] and the IPC handlers that call [`MetricStore::get`].
#[derive(Debug, Default)]
pub struct MetricStore {
    hosts: HashMap<String, HashMap<String, Sample>>,
}

fn now_unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs()
}

impl MetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite `(host, name)` with `value`, timestamped now.
    pub fn put(&mut self, host: &str, name: &str, value: i64) {
        let sample = Sample {
            time: now_unix_seconds(),
            value,
        };
        self.hosts
            .entry(host.to_string())
            .or_default()
            .insert(name.to_string(), sample);
    }

    /// Snapshot every metric recorded for `host`. Fails with
    /// [`Error::UnknownHost`] if `host` is not in the configured host set,
    /// regardless of whether any sample has arrived for it yet.
    pub fn get(&self, host: &str, known_hosts: &HostSet) -> Result<HashMap<String, Sample>> {
        if !known_hosts.contains(host) {
            return Err(Error::UnknownHost(host.to_string()));
        }
        Ok(self.hosts.get(host).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(names: &[&str]) -> HostSet {
        HostSet::from_iter(names.iter().map(|s| s.to_string()))
    }

    #[test]
    fn put_then_get_round_trips_and_overwrites() {
        let mut store = MetricStore::new();
        let known = hosts(&["host-a"]);

        store.put("host-a", "temperature", 21);
        let snap = store.get("host-a", &known).unwrap();
        assert_eq!(snap["temperature"].value, 21);
        assert!(snap["temperature"].time <= now_unix_seconds());

        store.put("host-a", "temperature", 25);
        let snap = store.get("host-a", &known).unwrap();
        assert_eq!(snap.len(), 1, "overwritten, not appended");
        assert_eq!(snap["temperature"].value, 25);
    }

    #[test]
    fn get_fails_for_host_outside_the_configured_set() {
        let store = MetricStore::new();
        let known = hosts(&["host-a"]);
        let err = store.get("nope", &known).unwrap_err();
        assert!(matches!(err, Error::UnknownHost(h) if h == "nope"));
    }

    #[test]
    fn get_succeeds_with_empty_snapshot_before_any_sample_arrives() {
        let store = MetricStore::new();
        let known = hosts(&["host-a"]);
        let snap = store.get("host-a", &known).unwrap();
        assert!(snap.is_empty());
    }
}
