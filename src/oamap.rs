//! §4.6 OpenAddressingMap / OpenAddressingSet — single-table hash map/set
//! bounded to at most 255 slots, built on [`crate::hash_kernel`] and
//! [`crate::slot_state`].

use crate::hash_kernel::{self, linear_probe};
use crate::slot_state::{SlotState, SlotStateTable};

const MAX_PHYSICAL_CAP: u16 = 255;
const DEFAULT_FULLNESS_PCT: u8 = 92;

/// Keys addressable by an [`OpenAddressingMap`]. Spec §4.2 names integer
/// and float keys explicitly; the trait is implemented for the common
/// fixed-width numeric types so the map stays generic without courting
/// key widths wider than the table addressing budget (a Non-goal).
pub trait MapKey: Clone + PartialEq {
    fn hash_index(&self, cap: u16) -> u16;
    /// Canonical 64-bit representation used for chain routing
    /// ([`crate::chained_map`]), where keys need a wider hash than any
    /// single shard's `[0, cap)` index space.
    fn as_u64(&self) -> u64;
}

macro_rules! impl_map_key_int {
    ($($t:ty),*) => {
        $(impl MapKey for $t {
            fn hash_index(&self, cap: u16) -> u16 {
                hash_kernel::hash_u64(*self as u64, cap)
            }
            fn as_u64(&self) -> u64 {
                *self as u64
            }
        })*
    };
}
impl_map_key_int!(u8, u16, u32, u64, i8, i16, i32, i64, usize);

impl MapKey for f32 {
    fn hash_index(&self, cap: u16) -> u16 {
        hash_kernel::hash_f64(*self as f64, cap)
    }
    fn as_u64(&self) -> u64 {
        (*self as f64).to_bits()
    }
}
impl MapKey for f64 {
    fn hash_index(&self, cap: u16) -> u16 {
        hash_kernel::hash_f64(*self, cap)
    }
    fn as_u64(&self) -> u64 {
        self.to_bits()
    }
}

fn next_physical_cap(current: u16) -> Option<u16> {
    if current >= MAX_PHYSICAL_CAP {
        return None;
    }
    let doubled = (current.max(1)) * 2;
    Some(doubled.min(MAX_PHYSICAL_CAP))
}

/// Single-table open-addressing hash map. Invariants M1-M3 of spec §3 are
/// maintained by construction: `find`/`insert` always probe within
/// `physical_cap` steps and stop at the first `Empty` slot or a key match.
#[derive(Debug, Clone)]
pub struct OpenAddressingMap<K, V> {
    keys: Vec<K>,
    values: Vec<V>,
    states: SlotStateTable,
    physical_cap: u16,
    stride: u8,
    size: usize,
    /// Count of slots that have ever transitioned Empty -> Used (i.e.
    /// `size + tombstones`, spec's M2). Only reset on rehash.
    dead_size: usize,
    fullness_pct: u8,
}

impl<K: MapKey + Default, V: Default + Clone> OpenAddressingMap<K, V> {
    pub fn new() -> Self {
        Self::with_physical_capacity(1)
    }

    fn with_physical_capacity(cap: u16) -> Self {
        let cap = cap.max(1);
        Self {
            keys: vec![K::default(); cap as usize],
            values: vec![V::default(); cap as usize],
            states: SlotStateTable::new(cap as usize),
            physical_cap: cap,
            stride: hash_kernel::probe_stride(cap),
            size: 0,
            dead_size: 0,
            fullness_pct: DEFAULT_FULLNESS_PCT,
        }
    }

    pub fn with_fullness_pct(mut self, pct: u8) -> Self {
        self.fullness_pct = pct;
        self
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn physical_capacity(&self) -> u16 {
        self.physical_cap
    }

    /// `virtual_cap = floor(physical_cap * fullness%)` (spec §3).
    pub fn virtual_capacity(&self) -> usize {
        (self.physical_cap as usize * self.fullness_pct as usize) / 100
    }

    fn probe_chain(&self, key: &K) -> ProbeResult {
        let mut index = key.hash_index(self.physical_cap);
        let mut first_tombstone: Option<u16> = None;
        for probes in 0..self.physical_cap {
            match self.states.get(index as usize) {
                SlotState::Empty => {
                    return ProbeResult::Missing {
                        insert_at: first_tombstone.unwrap_or(index),
                    };
                }
                SlotState::Used if self.keys[index as usize] == *key => {
                    return ProbeResult::Found { slot: index };
                }
                SlotState::Deleted if self.keys[index as usize] == *key => {
                    // Candidate tombstone holding this exact key: break and
                    // reuse it directly (spec §4.6 step 2).
                    return ProbeResult::Missing { insert_at: index };
                }
                SlotState::Deleted if first_tombstone.is_none() => {
                    first_tombstone = Some(index);
                }
                _ => {}
            }
            let _ = probes;
            index = linear_probe(index, self.physical_cap, self.stride);
        }
        ProbeResult::ChainExhausted {
            insert_at: first_tombstone,
        }
    }

    fn rehash_grow(&mut self) -> bool {
        let Some(new_cap) = next_physical_cap(self.physical_cap) else {
            return false;
        };
        let mut grown: OpenAddressingMap<K, V> = OpenAddressingMap::with_physical_capacity(new_cap);
        grown.fullness_pct = self.fullness_pct;
        for i in 0..self.physical_cap as usize {
            if self.states.get(i) == SlotState::Used {
                grown.insert_fresh(self.keys[i].clone(), self.values[i].clone());
            }
        }
        *self = grown;
        true
    }

    fn insert_fresh(&mut self, key: K, value: V) {
        // Used internally during rehash, where every key is known-absent
        // and the table is known not to need another rehash.
        match self.probe_chain(&key) {
            ProbeResult::Missing { insert_at } | ProbeResult::ChainExhausted { insert_at: Some(insert_at) } => {
                let was_empty = self.states.get(insert_at as usize) == SlotState::Empty;
                self.keys[insert_at as usize] = key;
                self.values[insert_at as usize] = value;
                self.states.set(insert_at as usize, SlotState::Used);
                self.size += 1;
                if was_empty {
                    self.dead_size += 1;
                }
            }
            _ => unreachable!("rehash target never saturates for keys drawn from a smaller table"),
        }
    }

    /// `true` if newly inserted; `false` if the key was already present
    /// (value left unchanged, matching `std::map::insert` semantics) or if
    /// the table is saturated and cannot grow (spec §4.6 failure
    /// semantics: "insert returns false when the map is saturated").
    pub fn insert(&mut self, key: K, value: V) -> bool {
        if self.dead_size >= self.virtual_capacity() {
            if !self.rehash_grow() {
                // Physical cap already maxed; only proceed if there is
                // still genuine room (a rehash that changed nothing is not
                // required to fail an insert of an already-present key).
                if !matches!(self.probe_chain(&key), ProbeResult::Found { .. }) {
                    return false;
                }
            }
        }
        match self.probe_chain(&key) {
            ProbeResult::Found { .. } => false,
            ProbeResult::Missing { insert_at } => {
                let was_empty = self.states.get(insert_at as usize) == SlotState::Empty;
                self.keys[insert_at as usize] = key;
                self.values[insert_at as usize] = value;
                self.states.set(insert_at as usize, SlotState::Used);
                self.size += 1;
                if was_empty {
                    self.dead_size += 1;
                }
                true
            }
            ProbeResult::ChainExhausted { insert_at: Some(insert_at) } => {
                self.keys[insert_at as usize] = key;
                self.values[insert_at as usize] = value;
                self.states.set(insert_at as usize, SlotState::Used);
                self.size += 1;
                true
            }
            ProbeResult::ChainExhausted { insert_at: None } => false,
        }
    }

    pub fn find(&self, key: &K) -> Option<&V> {
        match self.probe_chain(key) {
            ProbeResult::Found { slot } => Some(&self.values[slot as usize]),
            _ => None,
        }
    }

    pub fn find_mut(&mut self, key: &K) -> Option<&mut V> {
        match self.probe_chain(key) {
            ProbeResult::Found { slot } => Some(&mut self.values[slot as usize]),
            _ => None,
        }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        matches!(self.probe_chain(key), ProbeResult::Found { .. })
    }

    /// Returns the process-wide default value on miss rather than a shared
    /// static reference (design note §9: the original aliases a static
    /// default across concurrent readers; this signature sidesteps that by
    /// returning an owned value).
    pub fn at(&self, key: &K) -> V {
        self.find(key).cloned().unwrap_or_default()
    }

    /// Inserts a default-constructed value if absent, then returns a
    /// mutable reference to it (`operator[]` semantics, spec §4.6).
    pub fn entry_or_default(&mut self, key: K) -> &mut V {
        if !self.contains_key(&key) {
            self.insert(key.clone(), V::default());
        }
        self.find_mut(&key).expect("just inserted")
    }

    /// Marks the slot Deleted and decrements `size` but *not* `dead_size`
    /// (spec §4.6: tombstones are not reclaimed until the next rehash —
    /// an open question the spec explicitly leaves as documented
    /// behaviour, §9).
    pub fn erase(&mut self, key: &K) -> bool {
        match self.probe_chain(key) {
            ProbeResult::Found { slot } => {
                self.states.set(slot as usize, SlotState::Deleted);
                self.size -= 1;
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        self.states.clear_all();
        self.size = 0;
        self.dead_size = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        (0..self.physical_cap as usize)
            .filter(move |&i| self.states.get(i) == SlotState::Used)
            .map(move |i| (&self.keys[i], &self.values[i]))
    }
}

impl<K: MapKey + Default, V: Default + Clone> Default for OpenAddressingMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

enum ProbeResult {
    Found { slot: u16 },
    Missing { insert_at: u16 },
    ChainExhausted { insert_at: Option<u16> },
}

/// Thin wrapper presenting set semantics over `OpenAddressingMap<K, ()>`.
#[derive(Debug, Clone, Default)]
pub struct OpenAddressingSet<K> {
    inner: OpenAddressingMap<K, ()>,
}

impl<K: MapKey + Default> OpenAddressingSet<K> {
    pub fn new() -> Self {
        Self {
            inner: OpenAddressingMap::new(),
        }
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

    pub fn iter(&self) -> impl Iterator<Item = &K> + '_ {
        self.inner.iter().map(|(k, _)| k)
    }
}
