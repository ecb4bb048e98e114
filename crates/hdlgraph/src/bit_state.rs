//! Two-plane bit vectors used as simulation state.
//!
//! Every bit has a VALUE and a DEFINED plane. A bit only carries information if
//! its DEFINED bit is set; otherwise it is `x` and its VALUE bit is don't-care.
//! Both planes are packed into 64-bit words. Accessors suffixed with
//! `non_straddling` require the range to live inside one word; the plain
//! variants compose two word accesses when a range crosses a word boundary.

use std::fmt;

pub type Word = u64;

pub const BITS_PER_WORD: usize = Word::BITS as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Plane {
    Value = 0,
    Defined = 1,
}

impl Plane {
    pub const ALL: [Plane; 2] = [Plane::Value, Plane::Defined];
}

/// Mask with `size` ones starting at bit `offset`.
pub fn bit_mask_range(offset: usize, size: usize) -> Word {
    if size == 0 {
        return 0;
    }
    let mask = if size >= BITS_PER_WORD {
        Word::MAX
    } else {
        (1 << size) - 1
    };
    mask << offset
}

pub fn bitfield_extract(word: Word, offset: usize, size: usize) -> Word {
    if offset >= BITS_PER_WORD {
        return 0;
    }
    (word >> offset) & bit_mask_range(0, size)
}

pub fn bitfield_insert(word: Word, offset: usize, size: usize, value: Word) -> Word {
    let mask = bit_mask_range(offset, size);
    (word & !mask) | ((value << offset) & mask)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BitVectorState {
    size: usize,
    planes: [Vec<Word>; 2],
}

impl BitVectorState {
    /// A fully undefined state of `size` bits.
    pub fn new(size: usize) -> Self {
        let mut state = Self::default();
        state.resize(size);
        state
    }

    /// A fully defined state holding the low `size` bits of `value`.
    pub fn from_u64(value: u64, size: usize) -> Self {
        assert!(size <= BITS_PER_WORD, "from_u64 takes at most {BITS_PER_WORD} bits");
        let mut state = Self::new(size);
        state.insert_non_straddling(Plane::Value, 0, size, value);
        state.set_range(Plane::Defined, 0, size, true);
        state
    }

    /// Resizes both planes. Newly added bits are undefined.
    pub fn resize(&mut self, size: usize) {
        let words = size.div_ceil(BITS_PER_WORD);
        if size < self.size && size % BITS_PER_WORD != 0 {
            // keep the tail of the last word clean so later growth reads as x
            let tail = size % BITS_PER_WORD;
            for plane in &mut self.planes {
                plane[size / BITS_PER_WORD] &= bit_mask_range(0, tail);
            }
        }
        for plane in &mut self.planes {
            plane.resize(words, 0);
        }
        if size > self.size && self.size % BITS_PER_WORD != 0 {
            let keep = bit_mask_range(0, self.size % BITS_PER_WORD);
            for plane in &mut self.planes {
                plane[self.size / BITS_PER_WORD] &= keep;
            }
        }
        self.size = size;
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn num_words(&self) -> usize {
        self.planes[0].len()
    }

    pub fn clear(&mut self) {
        self.size = 0;
        for plane in &mut self.planes {
            plane.clear();
        }
    }

    pub fn data(&self, plane: Plane) -> &[Word] {
        &self.planes[plane as usize]
    }

    pub fn data_mut(&mut self, plane: Plane) -> &mut [Word] {
        &mut self.planes[plane as usize]
    }

    pub fn get(&self, plane: Plane, idx: usize) -> bool {
        assert!(idx < self.size, "bit {idx} out of range for {} bits", self.size);
        (self.planes[plane as usize][idx / BITS_PER_WORD] >> (idx % BITS_PER_WORD)) & 1 != 0
    }

    pub fn set(&mut self, plane: Plane, idx: usize) {
        self.set_to(plane, idx, true);
    }

    pub fn set_to(&mut self, plane: Plane, idx: usize, bit: bool) {
        assert!(idx < self.size, "bit {idx} out of range for {} bits", self.size);
        let word = &mut self.planes[plane as usize][idx / BITS_PER_WORD];
        let mask = 1 << (idx % BITS_PER_WORD);
        if bit {
            *word |= mask;
        } else {
            *word &= !mask;
        }
    }

    pub fn clear_bit(&mut self, plane: Plane, idx: usize) {
        self.set_to(plane, idx, false);
    }

    pub fn toggle(&mut self, plane: Plane, idx: usize) {
        assert!(idx < self.size, "bit {idx} out of range for {} bits", self.size);
        self.planes[plane as usize][idx / BITS_PER_WORD] ^= 1 << (idx % BITS_PER_WORD);
    }

    /// Sets `size` bits starting at `offset` to `bit`.
    pub fn set_range(&mut self, plane: Plane, offset: usize, size: usize, bit: bool) {
        self.check_range(offset, size);
        let content = if bit { Word::MAX } else { 0 };

        let mut word_idx = offset / BITS_PER_WORD;
        let first_word_size = if offset % BITS_PER_WORD == 0 {
            0
        } else {
            let first = size.min(BITS_PER_WORD - offset % BITS_PER_WORD);
            self.insert_non_straddling(plane, offset, first, content);
            word_idx += 1;
            first
        };

        let num_full_words = (size - first_word_size) / BITS_PER_WORD;
        for word in &mut self.planes[plane as usize][word_idx..word_idx + num_full_words] {
            *word = content;
        }

        let trailing = (size - first_word_size) % BITS_PER_WORD;
        if trailing > 0 {
            let start = offset + first_word_size + num_full_words * BITS_PER_WORD;
            self.insert_non_straddling(plane, start, trailing, content);
        }
    }

    pub fn clear_range(&mut self, plane: Plane, offset: usize, size: usize) {
        self.set_range(plane, offset, size, false);
    }

    /// Copies `size` bits of both planes from `src` at `src_offset` to `dst_offset`.
    pub fn copy_range(
        &mut self,
        dst_offset: usize,
        src: &BitVectorState,
        src_offset: usize,
        size: usize,
    ) {
        self.check_range(dst_offset, size);
        src.check_range(src_offset, size);
        let mut offset = 0;
        while offset < size {
            let chunk = BITS_PER_WORD.min(size - offset);
            for plane in Plane::ALL {
                let bits = src.extract(plane, src_offset + offset, chunk);
                self.insert(plane, dst_offset + offset, chunk, bits);
            }
            offset += chunk;
        }
    }

    /// Like [`copy_range`](Self::copy_range) with `self` as the source. Ranges must not overlap.
    pub fn copy_within(&mut self, dst_offset: usize, src_offset: usize, size: usize) {
        self.check_range(dst_offset, size);
        self.check_range(src_offset, size);
        let mut offset = 0;
        while offset < size {
            let chunk = BITS_PER_WORD.min(size - offset);
            for plane in Plane::ALL {
                let bits = self.extract(plane, src_offset + offset, chunk);
                self.insert(plane, dst_offset + offset, chunk, bits);
            }
            offset += chunk;
        }
    }

    /// Returns a new state holding `size` bits starting at `start`.
    pub fn extract_state(&self, start: usize, size: usize) -> BitVectorState {
        self.check_range(start, size);
        let mut result = BitVectorState::new(size);
        if start % BITS_PER_WORD == 0 {
            let first = start / BITS_PER_WORD;
            let words = result.num_words();
            for plane in Plane::ALL {
                let dst = &mut result.planes[plane as usize];
                dst.copy_from_slice(&self.planes[plane as usize][first..first + words]);
                if size % BITS_PER_WORD != 0 {
                    dst[words - 1] &= bit_mask_range(0, size % BITS_PER_WORD);
                }
            }
        } else {
            result.copy_range(0, self, start, size);
        }
        result
    }

    /// Writes all of `state` into `self` at `offset`.
    pub fn insert_state(&mut self, state: &BitVectorState, offset: usize) {
        self.copy_range(offset, state, 0, state.len());
    }

    /// Reads up to one word worth of bits, which may cross a word boundary.
    pub fn extract(&self, plane: Plane, offset: usize, size: usize) -> Word {
        assert!(size <= BITS_PER_WORD, "extract reads at most one word");
        if size == 0 {
            return 0;
        }
        self.check_range(offset, size);
        let values = &self.planes[plane as usize][offset / BITS_PER_WORD..];
        let word_offset = offset % BITS_PER_WORD;

        let mut val = values[0] >> word_offset;
        if word_offset + size > BITS_PER_WORD {
            val |= values[1] << (BITS_PER_WORD - word_offset);
        }
        val & bit_mask_range(0, size)
    }

    pub fn extract_non_straddling(&self, plane: Plane, start: usize, size: usize) -> Word {
        assert!(
            start % BITS_PER_WORD + size <= BITS_PER_WORD,
            "range {start}+{size} straddles a word boundary"
        );
        if size == 0 {
            return 0;
        }
        self.check_range(start, size);
        bitfield_extract(
            self.planes[plane as usize][start / BITS_PER_WORD],
            start % BITS_PER_WORD,
            size,
        )
    }

    /// Writes up to one word worth of bits, which may cross a word boundary.
    pub fn insert(&mut self, plane: Plane, offset: usize, size: usize, value: Word) {
        assert!(size <= BITS_PER_WORD, "insert writes at most one word");
        let word_offset = offset % BITS_PER_WORD;
        if word_offset + size <= BITS_PER_WORD {
            self.insert_non_straddling(plane, offset, size, value);
            return;
        }
        self.check_range(offset, size);

        let dst = &mut self.planes[plane as usize][offset / BITS_PER_WORD..];
        let low = BITS_PER_WORD - word_offset;
        dst[0] = bitfield_insert(dst[0], word_offset, low, value);
        dst[1] = bitfield_insert(dst[1], 0, size - low, value >> low);
    }

    pub fn insert_non_straddling(&mut self, plane: Plane, start: usize, size: usize, value: Word) {
        assert!(
            start % BITS_PER_WORD + size <= BITS_PER_WORD,
            "range {start}+{size} straddles a word boundary"
        );
        if size == 0 {
            return;
        }
        self.check_range(start, size);
        let word = &mut self.planes[plane as usize][start / BITS_PER_WORD];
        *word = bitfield_insert(*word, start % BITS_PER_WORD, size, value);
    }

    /// True if every bit of the state is defined.
    pub fn is_fully_defined(&self) -> bool {
        let mut offset = 0;
        while offset < self.size {
            let chunk = BITS_PER_WORD.min(self.size - offset);
            if !all_defined_non_straddling(self, offset, chunk) {
                return false;
            }
            offset += chunk;
        }
        true
    }

    fn check_range(&self, offset: usize, size: usize) {
        assert!(
            offset + size <= self.size,
            "range {offset}+{size} out of bounds for {} bits",
            self.size
        );
    }
}

/// True if every bit in the one-word range `[start, start + size)` is defined.
pub fn all_defined_non_straddling(state: &BitVectorState, start: usize, size: usize) -> bool {
    let defined = state.extract_non_straddling(Plane::Defined, start, size);
    defined & bit_mask_range(0, size) == bit_mask_range(0, size)
}

impl fmt::Display for BitVectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in (0..self.size).rev() {
            let c = if !self.get(Plane::Defined, i) {
                'x'
            } else if self.get(Plane::Value, i) {
                '1'
            } else {
                '0'
            };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_range() {
        assert_eq!(bit_mask_range(0, 0), 0);
        assert_eq!(bit_mask_range(0, 3), 0b111);
        assert_eq!(bit_mask_range(4, 2), 0b11_0000);
        assert_eq!(bit_mask_range(0, 64), u64::MAX);
    }

    #[test]
    fn test_new_state_is_undefined() {
        let state = BitVectorState::new(70);
        assert_eq!(state.num_words(), 2);
        assert!(!state.is_fully_defined());
        assert!(!state.get(Plane::Defined, 69));
    }

    #[test]
    fn test_single_bit_ops() {
        let mut state = BitVectorState::new(8);
        state.set(Plane::Value, 3);
        assert!(state.get(Plane::Value, 3));
        state.toggle(Plane::Value, 3);
        assert!(!state.get(Plane::Value, 3));
        state.set_to(Plane::Defined, 7, true);
        state.clear_bit(Plane::Defined, 7);
        assert!(!state.get(Plane::Defined, 7));
    }

    #[test]
    fn test_set_range_across_words() {
        let mut state = BitVectorState::new(200);
        state.set_range(Plane::Defined, 60, 100, true);
        assert!(!state.get(Plane::Defined, 59));
        assert!(state.get(Plane::Defined, 60));
        assert!(state.get(Plane::Defined, 128));
        assert!(state.get(Plane::Defined, 159));
        assert!(!state.get(Plane::Defined, 160));
    }

    #[test]
    fn test_straddling_insert_extract() {
        let mut state = BitVectorState::new(128);
        state.insert(Plane::Value, 60, 8, 0xA5);
        assert_eq!(state.extract(Plane::Value, 60, 8), 0xA5);
        assert_eq!(state.extract_non_straddling(Plane::Value, 60, 4), 0x5);
        assert_eq!(state.extract_non_straddling(Plane::Value, 64, 4), 0xA);
    }

    #[test]
    #[should_panic(expected = "straddles")]
    fn test_non_straddling_rejects_crossing_range() {
        let state = BitVectorState::new(128);
        state.extract_non_straddling(Plane::Value, 60, 8);
    }

    #[test]
    fn test_extract_state_aligned_and_unaligned() {
        let mut state = BitVectorState::new(192);
        state.insert(Plane::Value, 64, 64, 0xDEAD_BEEF_0123_4567);
        state.set_range(Plane::Defined, 64, 64, true);

        let aligned = state.extract_state(64, 36);
        assert_eq!(aligned.extract(Plane::Value, 0, 36), 0xF_0123_4567);
        assert!(aligned.is_fully_defined());

        let unaligned = state.extract_state(68, 64);
        assert_eq!(unaligned.extract(Plane::Value, 0, 60), 0xDEAD_BEEF_0123_456);
        assert!(!unaligned.is_fully_defined());
    }

    #[test]
    fn test_shrink_then_grow_reads_undefined() {
        let mut state = BitVectorState::from_u64(0xFF, 8);
        state.resize(4);
        state.resize(8);
        assert_eq!(state.to_string(), "xxxx1111");
    }

    #[test]
    fn test_display() {
        let mut state = BitVectorState::from_u64(0b101, 4);
        state.clear_bit(Plane::Defined, 3);
        assert_eq!(state.to_string(), "x101");
    }
}
