//! Generation-checked arena of live modules
//!
//! Slots are reused after removal with a bumped generation, so a handle to a
//! removed module never resolves to whichever module took its slot.

use crate::metrics::ModuleMetrics;
use chrono::{DateTime, Utc};
use modhost_sdk::{Module, ModuleBinary, SubscriberId};
use std::{collections::HashMap, path::PathBuf, sync::Arc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SlotKey {
    pub index: u32,
    pub generation: u32,
}

pub(crate) struct ModuleEntry {
    pub name: Option<Arc<str>>,
    /// `None` for modules handed in pre-built
    pub binary_path: Option<PathBuf>,
    pub subscriber: SubscriberId,
    pub module: Arc<dyn Module>,
    pub binary: Option<ModuleBinary>,
    pub metrics: Arc<ModuleMetrics>,
    pub added_at: DateTime<Utc>,
    seq: u64,
}

impl ModuleEntry {
    pub fn new(
        name: Option<Arc<str>>,
        binary_path: Option<PathBuf>,
        subscriber: SubscriberId,
        module: Arc<dyn Module>,
        binary: Option<ModuleBinary>,
    ) -> Self {
        Self {
            name,
            binary_path,
            subscriber,
            module,
            binary,
            metrics: Arc::new(ModuleMetrics::default()),
            added_at: Utc::now(),
            seq: 0,
        }
    }

    /// Name used in logs and metrics labels.
    pub fn display_name(&self) -> Arc<str> {
        match &self.name {
            Some(name) => Arc::clone(name),
            None => Arc::from(format!("#{}", self.subscriber.0)),
        }
    }
}

struct Slot {
    generation: u32,
    entry: Option<ModuleEntry>,
}

#[derive(Default)]
pub(crate) struct ModuleRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    names: HashMap<Arc<str>, u32>,
    next_seq: u64,
    len: usize,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn contains_name(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Insert a live entry. The caller has already checked name uniqueness.
    pub fn insert(&mut self, mut entry: ModuleEntry) -> SlotKey {
        entry.seq = self.next_seq;
        self.next_seq += 1;

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        if let Some(name) = &entry.name {
            self.names.insert(Arc::clone(name), index);
        }

        let slot = &mut self.slots[index as usize];
        slot.entry = Some(entry);
        self.len += 1;
        SlotKey {
            index,
            generation: slot.generation,
        }
    }

    pub fn get(&self, key: SlotKey) -> Option<&ModuleEntry> {
        self.slots
            .get(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    /// Evict an entry and retire its key.
    pub fn remove(&mut self, key: SlotKey) -> Option<ModuleEntry> {
        let slot = self
            .slots
            .get_mut(key.index as usize)
            .filter(|slot| slot.generation == key.generation)?;
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        if let Some(name) = &entry.name {
            self.names.remove(name);
        }
        self.len -= 1;
        Some(entry)
    }

    /// Keys of all live entries in registration order.
    pub fn keys_in_order(&self) -> Vec<SlotKey> {
        let mut keys: Vec<(u64, SlotKey)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.entry.as_ref().map(|e| {
                    (
                        e.seq,
                        SlotKey {
                            index: index as u32,
                            generation: slot.generation,
                        },
                    )
                })
            })
            .collect();
        keys.sort_unstable_by_key(|(seq, _)| *seq);
        keys.into_iter().map(|(_, key)| key).collect()
    }

    /// Evict every entry, in registration order.
    pub fn drain(&mut self) -> Vec<ModuleEntry> {
        self.keys_in_order()
            .into_iter()
            .filter_map(|key| self.remove(key))
            .collect()
    }
}
