//! §4.7 ChainedMap / ChainedSet — chains of [`OpenAddressingMap`]s sharded
//! by key-range, extending capacity to ~60 000 keys while keeping per-shard
//! addressing at 8 bits.

use crate::hash_kernel::hash_wide;
use crate::oamap::{MapKey, OpenAddressingMap};
use crate::slot_state::{SlotState, SlotStateTable};

const MAX_SHARDS: usize = 255;
/// Virtual capacity of one default-configured inner map (255 physical
/// slots at 92% fullness), matching `OpenAddressingMap`'s own default so
/// that `MAX_SHARDS * PER_SHARD_VIRTUAL_CAP` lands at the spec's "~60 000
/// keys" figure.
const PER_SHARD_VIRTUAL_CAP: u32 = 234;
const ROUTING_KEY_SPACE: u32 = MAX_SHARDS as u32 * PER_SHARD_VIRTUAL_CAP;
const GROW_STEP: usize = 8;

/// The directory must be able to hold one entry per possible shard
/// (`MAX_SHARDS` = 255 distinct ranges), so it is built at 100% fullness
/// rather than `OpenAddressingMap`'s default 92% — at the default fullness
/// its 255-slot physical max only admits `floor(255 * 0.92) = 234` entries,
/// which would saturate the directory one range short of the full chain.
fn new_directory() -> OpenAddressingMap<u32, u8> {
    OpenAddressingMap::new().with_fullness_pct(100)
}

/// A chain of up to 255 inner 255-slot maps. Structure per spec §4.7: a
/// dynamic array of inner-map slots, a parallel `SlotStateTable`
/// (`Empty`/`Used`/`Deleted` meaning "never allocated or reserved
/// placeholder" / "holds a non-empty map" / "holds an allocated, empty,
/// reusable map"), and a small directory mapping `range -> shard index`.
#[derive(Debug, Clone)]
pub struct ChainedMap<K, V> {
    shards: Vec<Option<OpenAddressingMap<K, V>>>,
    states: SlotStateTable,
    directory: OpenAddressingMap<u32, u8>,
    active_count: usize,
}

impl<K: MapKey + Default, V: Default + Clone> ChainedMap<K, V> {
    pub fn new() -> Self {
        Self {
            shards: Vec::new(),
            states: SlotStateTable::new(0),
            directory: new_directory(),
            active_count: 0,
        }
    }

    fn range_of(&self, key: &K) -> u32 {
        hash_wide(key.as_u64(), ROUTING_KEY_SPACE) / PER_SHARD_VIRTUAL_CAP
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .filter_map(|s| s.as_ref())
            .map(|m| m.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn active_shard_count(&self) -> usize {
        self.active_count
    }

    fn grow_chain(&mut self) -> bool {
        if self.shards.len() >= MAX_SHARDS {
            return false;
        }
        let new_len = (self.shards.len() + GROW_STEP).min(MAX_SHARDS);
        self.shards.resize(new_len, None);
        let mut new_states = SlotStateTable::new(new_len);
        for i in 0..self.states.len() {
            new_states.set(i, self.states.get(i));
        }
        self.states = new_states;
        true
    }

    /// Finds an existing shard for `range`, or picks a slot for a new one
    /// following the priority order of spec §4.7: (1) an already-allocated
    /// `Deleted` shard, (2) an allocated-but-`Empty` shard, (3) an
    /// unallocated slot, activated in place. Grows the chain and retries
    /// once if none is available.
    fn shard_for_range_or_allocate(&mut self, range: u32) -> Option<usize> {
        if let Some(&idx) = self.directory.find(&range) {
            return Some(idx as usize);
        }
        loop {
            if let Some(slot) = self.pick_reusable_slot() {
                if self.shards[slot].is_none() {
                    self.shards[slot] = Some(OpenAddressingMap::new());
                } else if self.states.get(slot) == SlotState::Used {
                    // Never happens: pick_reusable_slot only returns
                    // Deleted/Empty slots.
                    unreachable!();
                } else {
                    // Deleted shard: already empty, reuse its allocation
                    // as-is (no clearing needed — erase leaves it empty).
                }
                self.states.set(slot, SlotState::Used);
                if self.directory.insert(range, slot as u8) {
                    self.active_count += 1;
                    return Some(slot);
                }
                return None; // directory itself saturated
            }
            if !self.grow_chain() {
                return None;
            }
        }
    }

    fn pick_reusable_slot(&self) -> Option<usize> {
        // Priority 1: allocated Deleted shard.
        for i in 0..self.shards.len() {
            if self.states.get(i) == SlotState::Deleted {
                return Some(i);
            }
        }
        // Priority 2: allocated-but-Empty shard.
        for i in 0..self.shards.len() {
            if self.states.get(i) == SlotState::Empty && self.shards[i].is_some() {
                return Some(i);
            }
        }
        // Priority 3: unallocated slot.
        for i in 0..self.shards.len() {
            if self.states.get(i) == SlotState::Empty && self.shards[i].is_none() {
                return Some(i);
            }
        }
        None
    }

    pub fn insert(&mut self, key: K, value: V) -> bool {
        let range = self.range_of(&key);
        let Some(slot) = self.shard_for_range_or_allocate(range) else {
            return false;
        };
        self.shards[slot]
            .as_mut()
            .expect("slot activated above")
            .insert(key, value)
    }

    pub fn find(&self, key: &K) -> Option<&V> {
        let range = self.range_of(key);
        let idx = *self.directory.find(&range)? as usize;
        self.shards[idx].as_ref()?.find(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.find(key).is_some()
    }

    pub fn at(&self, key: &K) -> V {
        self.find(key).cloned().unwrap_or_default()
    }

    /// Forwards to the owning shard; if the shard becomes empty, its slot
    /// is marked `Deleted` (not deallocated) and the range mapping is
    /// removed (spec §4.7 — invariant C1 is preserved by clearing the
    /// directory entry on erasure-to-empty).
    pub fn erase(&mut self, key: &K) -> bool {
        let range = self.range_of(key);
        let Some(&idx) = self.directory.find(&range) else {
            return false;
        };
        let idx = idx as usize;
        let erased = self.shards[idx]
            .as_mut()
            .map(|m| m.erase(key))
            .unwrap_or(false);
        if erased && self.shards[idx].as_ref().map(|m| m.is_empty()).unwrap_or(false) {
            self.states.set(idx, SlotState::Deleted);
            self.directory.erase(&range);
            self.active_count -= 1;
        }
        erased
    }

    /// Physically shrinks the shard array and rewrites the directory so
    /// active (currently-routed) shards occupy `[0, active_count)`. This
    /// is the only operation that establishes invariant C2; between calls
    /// gaps may exist (spec §4.7).
    pub fn compact(&mut self) {
        let mut new_shards = Vec::with_capacity(self.active_count);
        let mut rebuilt_directory: OpenAddressingMap<u32, u8> = new_directory();
        for i in 0..self.shards.len() {
            if self.states.get(i) == SlotState::Used {
                if let Some(shard) = self.shards[i].take() {
                    let new_idx = new_shards.len() as u8;
                    new_shards.push(Some(shard));
                    // Recompute each live shard's routed range from one of
                    // its own keys rather than trusting the old directory
                    // layout, since ranges are content-derived and stable.
                    if let Some((k, _)) = new_shards[new_idx as usize].as_ref().unwrap().iter().next() {
                        let range = self.range_of(k);
                        rebuilt_directory.insert(range, new_idx);
                    }
                }
            }
        }
        let new_len = new_shards.len();
        self.shards = new_shards;
        self.states = SlotStateTable::new(new_len);
        for i in 0..new_len {
            self.states.set(i, SlotState::Used);
        }
        self.directory = rebuilt_directory;
        self.active_count = new_len;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.shards.iter().filter_map(|s| s.as_ref()).flat_map(|m| m.iter())
    }
}

impl<K: MapKey + Default, V: Default + Clone> Default for ChainedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Thin set wrapper over `ChainedMap<K, ()>`, mirroring the
/// [`crate::oamap::OpenAddressingSet`] relationship to its map.
#[derive(Debug, Clone, Default)]
pub struct ChainedSet<K> {
    inner: ChainedMap<K, ()>,
}

impl<K: MapKey + Default> ChainedSet<K> {
    pub fn new() -> Self {
        Self { inner: ChainedMap::new() }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn insert(&mut self, key: K) -> bool {
        self.inner.insert(key, ())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    pub fn erase(&mut self, key: &K) -> bool {
        self.inner.erase(key)
    }
}
