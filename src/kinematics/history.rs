use dashmap::DashMap;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// What to do with the stored speed of an entity that skipped one or more steps
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReappearPolicy {
    /// Continue from the last recorded speed, however old
    #[default]
    Resume,
    /// Treat the entity as new (prior speed 0.0) after a gap
    Reset,
}

/// History bounds
#[derive(Clone, Debug, Deserialize)]
pub struct HistoryConfig {
    /// Maximum tracked entities; the least recently seen is evicted beyond this
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    #[serde(default)]
    pub reappear: ReappearPolicy,
}

fn default_max_entries() -> usize {
    65_536
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            reappear: ReappearPolicy::default(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct HistoryEntry {
    last_speed_mps: f64,
    last_seen_step: u64,
}

/// Bounded map of entity ID -> last observed speed
///
/// Reads go straight to the map. Writes also maintain a `(last_seen_step, id)`
/// index so the least recently seen entry is found without a scan.
pub struct EntityHistory {
    entries: DashMap<String, HistoryEntry>,
    recency: Mutex<BTreeSet<(u64, String)>>,
    config: HistoryConfig,
}

impl EntityHistory {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            entries: DashMap::new(),
            recency: Mutex::new(BTreeSet::new()),
            config,
        }
    }

    /// Speed to difference against at `step`; 0.0 for unknown entities
    pub fn prior_speed(&self, entity_id: &str, step: u64) -> f64 {
        let entry = match self.entries.get(entity_id) {
            Some(e) => *e,
            None => return 0.0,
        };

        match self.config.reappear {
            ReappearPolicy::Resume => entry.last_speed_mps,
            ReappearPolicy::Reset => {
                if entry.last_seen_step + 1 >= step {
                    entry.last_speed_mps
                } else {
                    0.0
                }
            }
        }
    }

    /// Store the speed observed at `step`
    pub fn record(&self, entity_id: &str, speed_mps: f64, step: u64) {
        // Map and index change together under this lock
        let mut recency = self.recency.lock().unwrap_or_else(PoisonError::into_inner);

        let previous = self.entries.insert(
            entity_id.to_string(),
            HistoryEntry {
                last_speed_mps: speed_mps,
                last_seen_step: step,
            },
        );

        match previous {
            Some(prev) => {
                recency.remove(&(prev.last_seen_step, entity_id.to_string()));
            }
            None => {
                while self.entries.len() > self.config.max_entries {
                    if !self.evict_least_recent(&mut recency) {
                        break;
                    }
                }
            }
        }

        recency.insert((step, entity_id.to_string()));
    }

    /// Last recorded speed, if the entity is tracked
    pub fn last_speed(&self, entity_id: &str) -> Option<f64> {
        self.entries.get(entity_id).map(|e| e.last_speed_mps)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop the oldest indexed entry. The entry being recorded is not indexed
    /// yet, so it is never the victim.
    fn evict_least_recent(&self, recency: &mut BTreeSet<(u64, String)>) -> bool {
        match recency.pop_first() {
            Some((last_seen_step, entity_id)) => {
                self.entries.remove(&entity_id);
                debug!(entity_id = %entity_id, last_seen_step, "Evicted stale history entry");
                true
            }
            None => false,
        }
    }
}
