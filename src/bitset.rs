//! Field masks
//!
//! Every field of a structured value has an offset, assigned depth-first with
//! the root structure at offset 0. A field mask is a set of such offsets, used
//! both to tell the remote side which fields a put changes and to tell a
//! builder which fields of a fetched value carry meaningful data.

use std::fmt;


const WORD_BITS: usize = 64;


/// Growable set of field offsets
#[derive(Clone, Debug, Default)]
pub struct BitSet {
    words: Vec<u64>,
}
//
impl BitSet {
    /// Create an empty mask
    pub fn new() -> Self {
        BitSet { words: Vec::new() }
    }

    /// Create a mask where offsets 0..count are all set
    pub fn full(count: usize) -> Self {
        let mut set = BitSet::new();
        for offset in 0..count {
            set.set(offset);
        }
        set
    }

    /// Mark an offset
    pub fn set(&mut self, offset: usize) {
        let word = offset / WORD_BITS;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (offset % WORD_BITS);
    }

    /// Unmark an offset
    pub fn clear(&mut self, offset: usize) {
        if let Some(word) = self.words.get_mut(offset / WORD_BITS) {
            *word &= !(1 << (offset % WORD_BITS));
        }
    }

    /// Check whether an offset is marked
    pub fn get(&self, offset: usize) -> bool {
        self.words
            .get(offset / WORD_BITS)
            .map_or(false, |word| word & (1 << (offset % WORD_BITS)) != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.significant_words().is_empty()
    }

    /// Words up to the last non-zero one
    fn significant_words(&self) -> &[u64] {
        let len = self.words.iter().rposition(|&w| w != 0).map_or(0, |last| last + 1);
        &self.words[..len]
    }

    /// Iterate over marked offsets in increasing order
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(index, &word)| {
            (0..WORD_BITS)
                .filter(move |bit| word & (1 << bit) != 0)
                .map(move |bit| index * WORD_BITS + bit)
        })
    }
}
//
impl PartialEq for BitSet {
    fn eq(&self, other: &Self) -> bool {
        self.significant_words() == other.significant_words()
    }
}
//
impl Eq for BitSet {}
//
impl fmt::Display for BitSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("{")?;
        for (i, offset) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", offset)?;
        }
        f.write_str("}")
    }
}
//
impl FromIterator<usize> for BitSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = BitSet::new();
        for offset in iter {
            set.set(offset);
        }
        set
    }
}
