//! Bit vectors that record where pointers live.
//!
//! A ledger is indexed by *word offset* from the start of whatever it
//! describes (a region's logical object layout, or the output buffer).
//! Bit `i` set means "the word at offset `i` holds a pointer
//! that must be relocated". Ledgers never store absolute addresses,
//! so they stay valid when the memory they describe is moved.

use std::ops::Range;

const BITS: usize = u64::BITS as usize;

/// Growable bit vector of pointer locations.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PointerLedger
{
    /// INVARIANT: Bits at or past `len` are zero.
    words: Vec<u64>,

    /// Number of addressable bits.
    len: usize,
}

impl PointerLedger
{
    /// Create an empty ledger.
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Create a ledger with `len` clear bits.
    pub fn with_len(len: usize) -> Self
    {
        let mut this = Self::new();
        this.resize(len);
        this
    }

    /// The number of addressable bits.
    pub fn len(&self) -> usize
    {
        self.len
    }

    /// Whether the ledger has no addressable bits.
    pub fn is_empty(&self) -> bool
    {
        self.len == 0
    }

    /// Change the number of addressable bits.
    ///
    /// New bits are clear. Bits past the new length are discarded.
    pub fn resize(&mut self, len: usize)
    {
        self.words.resize(len.div_ceil(BITS), 0);
        self.len = len;
        let tail = len % BITS;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << tail) - 1;
            }
        }
    }

    /// Make bit `index` addressable, growing geometrically if needed.
    pub fn reserve_bit(&mut self, index: usize)
    {
        if self.len <= index {
            self.resize((index + 1) * 2);
        }
    }

    /// Whether bit `index` is set.
    pub fn get(&self, index: usize) -> bool
    {
        assert!(index < self.len, "Ledger index {index} out of bounds");
        self.words[index / BITS] & (1 << (index % BITS)) != 0
    }

    /// Set bit `index`.
    pub fn set(&mut self, index: usize)
    {
        assert!(index < self.len, "Ledger index {index} out of bounds");
        self.words[index / BITS] |= 1 << (index % BITS);
    }

    /// Clear bit `index`.
    pub fn clear(&mut self, index: usize)
    {
        assert!(index < self.len, "Ledger index {index} out of bounds");
        self.words[index / BITS] &= !(1 << (index % BITS));
    }

    /// The number of set bits.
    pub fn count_ones(&self) -> usize
    {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// The highest set bit, if any.
    pub fn last_one(&self) -> Option<usize>
    {
        self.words.iter().enumerate().rev()
            .find(|(_, w)| **w != 0)
            .map(|(i, w)| i * BITS + (BITS - 1 - w.leading_zeros() as usize))
    }

    /// Iterate over the set bits, in ascending order.
    pub fn ones(&self) -> Ones
    {
        self.ones_in(0 .. self.len)
    }

    /// Iterate over the set bits within `range`, in ascending order.
    pub fn ones_in(&self, range: Range<usize>) -> Ones
    {
        let end = range.end.min(self.len);
        Ones{words: &self.words, next: range.start, end}
    }

    /// Visit every set bit in ascending order, clearing those for which
    /// the given function returns `false`.
    ///
    /// Stops at the first error, leaving the remaining bits untouched.
    pub fn try_retain<E, F>(&mut self, mut f: F) -> Result<(), E>
        where F: FnMut(usize) -> Result<bool, E>
    {
        for w in 0 .. self.words.len() {
            let mut bits = self.words[w];
            while bits != 0 {
                let bit = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                if !f(w * BITS + bit)? {
                    self.words[w] &= !(1 << bit);
                }
            }
        }
        Ok(())
    }

    /// Discard the all-zero tail past `max_bit`.
    ///
    /// With [`None`], the ledger becomes empty.
    pub fn compact(&mut self, max_bit: Option<usize>)
    {
        debug_assert!(max_bit.map_or(true, |m| m >= self.last_one().unwrap_or(0)));
        self.resize(max_bit.map_or(0, |m| m + 1));
    }

    /// The persisted form of the ledger.
    ///
    /// Bit `i` is bit `i % 8` of byte `i / 8`.
    pub fn to_bytes(&self) -> Vec<u8>
    {
        let mut bytes: Vec<u8> =
            self.words.iter()
            .flat_map(|w| w.to_le_bytes())
            .collect();
        bytes.truncate(self.len.div_ceil(8));
        bytes
    }
}

/// Iterator returned by [`PointerLedger::ones`].
pub struct Ones<'a>
{
    words: &'a [u64],
    next: usize,
    end: usize,
}

impl<'a> Iterator for Ones<'a>
{
    type Item = usize;

    fn next(&mut self) -> Option<usize>
    {
        while self.next < self.end {
            let word = self.next / BITS;
            let bits = self.words[word] >> (self.next % BITS);
            if bits == 0 {
                self.next = (word + 1) * BITS;
                continue;
            }
            let index = self.next + bits.trailing_zeros() as usize;
            if index >= self.end {
                break;
            }
            self.next = index + 1;
            return Some(index);
        }
        self.next = self.end;
        None
    }
}
