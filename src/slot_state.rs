//! §4.3 SlotStateTable — two bits per slot, packed LSB-first, encoding
//! `{Empty, Used, Deleted}` for open-addressing tables.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// One open-addressing slot's state. Packed as 2 bits; `3` is an unused
/// pattern reserved for future extension (not produced by this crate).
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum SlotState {
    Empty = 0,
    Used = 1,
    Deleted = 2,
}

/// Dense 2-bit-per-slot array. `get`/`set` are O(1) and never allocate after
/// initial sizing (spec §4.3 contract).
#[derive(Debug, Clone)]
pub struct SlotStateTable {
    bytes: Vec<u8>,
    len: usize,
}

impl SlotStateTable {
    pub fn new(len: usize) -> Self {
        let bytes = vec![0u8; (len * 2).div_ceil(8)];
        Self { bytes, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn get(&self, i: usize) -> SlotState {
        debug_assert!(i < self.len);
        let bit_offset = i * 2;
        let byte = self.bytes[bit_offset / 8];
        let shift = bit_offset % 8;
        let bits = (byte >> shift) & 0b11;
        SlotState::try_from(bits).expect("packed 2 bits always decode to a valid SlotState")
    }

    #[inline]
    pub fn set(&mut self, i: usize, state: SlotState) {
        debug_assert!(i < self.len);
        let bit_offset = i * 2;
        let byte_idx = bit_offset / 8;
        let shift = bit_offset % 8;
        let mask = 0b11u8 << shift;
        let value: u8 = state.into();
        self.bytes[byte_idx] = (self.bytes[byte_idx] & !mask) | (value << shift);
    }

    pub fn clear_all(&mut self) {
        self.bytes.iter_mut().for_each(|b| *b = 0);
    }

    pub fn iter(&self) -> impl Iterator<Item = SlotState> + '_ {
        (0..self.len).map(move |i| self.get(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_empty() {
        let t = SlotStateTable::new(10);
        assert!(t.iter().all(|s| s == SlotState::Empty));
    }

    #[test]
    fn set_and_get_roundtrip_without_disturbing_neighbours() {
        let mut t = SlotStateTable::new(9);
        t.set(0, SlotState::Used);
        t.set(1, SlotState::Deleted);
        t.set(8, SlotState::Used);
        assert_eq!(t.get(0), SlotState::Used);
        assert_eq!(t.get(1), SlotState::Deleted);
        assert_eq!(t.get(2), SlotState::Empty);
        assert_eq!(t.get(8), SlotState::Used);
    }

    #[test]
    fn clear_all_resets_every_slot() {
        let mut t = SlotStateTable::new(20);
        for i in 0..20 {
            t.set(i, SlotState::Used);
        }
        t.clear_all();
        assert!(t.iter().all(|s| s == SlotState::Empty));
    }
}
