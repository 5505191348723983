//! Hour-keyed value store with a conflict-resolution policy on insertion.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hour_key::HourKey;

/// What `put` does when the key already holds a value.
///
/// `MaxWins` treats the larger of two overlapping consumption exports as the
/// authoritative one. Exports give no signal separating a downward correction
/// from a stale duplicate, so a smaller corrected value is lost under it;
/// `KeepLast` is the alternative when exports are known to be ordered oldest
/// to newest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConflictPolicy {
    #[default]
    MaxWins,
    KeepFirst,
    KeepLast,
}

impl ConflictPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MaxWins => "max_wins",
            Self::KeepFirst => "keep_first",
            Self::KeepLast => "keep_last",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "max_wins" | "max" => Some(Self::MaxWins),
            "keep_first" | "first" => Some(Self::KeepFirst),
            "keep_last" | "last" => Some(Self::KeepLast),
            _ => None,
        }
    }

    fn replaces(self, existing: f64, incoming: f64) -> bool {
        match self {
            Self::MaxWins => incoming > existing,
            Self::KeepFirst => false,
            Self::KeepLast => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    Inserted,
    Replaced,
    Retained,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimeKeyedStore {
    values: BTreeMap<HourKey, f64>,
    policy: ConflictPolicy,
}

impl TimeKeyedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: ConflictPolicy) -> Self {
        Self {
            values: BTreeMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    pub fn put(&mut self, key: HourKey, value: f64) -> Insertion {
        match self.values.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(value);
                Insertion::Inserted
            }
            Entry::Occupied(mut slot) => {
                if self.policy.replaces(*slot.get(), value) {
                    slot.insert(value);
                    Insertion::Replaced
                } else {
                    Insertion::Retained
                }
            }
        }
    }

    pub fn get(&self, key: &HourKey) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Entries in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (HourKey, f64)> + '_ {
        self.values.iter().map(|(key, value)| (*key, *value))
    }
}
