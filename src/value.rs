//! The `ElementValue` arena: a single contiguous buffer backing every
//! element's value words, with a seqlock-style generation counter per
//! slot so readers on other threads never observe a torn write.
//!
//! This is deliberately not `Arc<Mutex<..>>`-based: the design note in
//! the specification calls for lock-free reads, and a generation counter
//! plus plain value words is the idiomatic `core::sync::atomic` way to
//! get that without unsafe code.

use std::sync::atomic::{AtomicU32, Ordering};

/// One element's runtime value: generation-protected words, a timestamp,
/// and the bit length currently occupied (relevant for variable-size
/// elements).
///
/// `words` is sized once, at tree-build time, to exactly the element's
/// own `report_bits*report_count` (§3, §4.4 step 6) — there is no shared
/// fixed-width cap across elements; a 256-bit vendor payload gets an
/// 8-word slot, a 1-bit button gets a 1-word slot.
#[derive(Debug)]
pub struct ValueSlot {
    generation: AtomicU32,
    words: Vec<u32>,
    timestamp: u64,
    current_report_size_bits: u32,
}

impl Default for ValueSlot {
    fn default() -> Self {
        Self::with_capacity_words(1)
    }
}

/// A snapshot taken under the seqlock protocol: guaranteed internally
/// consistent (words/timestamp/size were all written by the same,
/// completed, mutation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueSnapshot {
    pub words: Vec<u32>,
    pub timestamp: u64,
    pub current_report_size_bits: u32,
}

impl ValueSlot {
    /// Allocate a slot wide enough for `n_words` 32-bit words (minimum
    /// one — even collections and zero-width elements get a slot, since
    /// every element has one regardless of kind).
    pub fn with_capacity_words(n_words: usize) -> Self {
        Self {
            generation: AtomicU32::new(0),
            words: vec![0; n_words.max(1)],
            timestamp: 0,
            current_report_size_bits: 0,
        }
    }

    /// `true` iff the slot is in a stable (non-writing) state. Always
    /// true between mutations; used by property dumps and tests that
    /// assert "generation parity" at quiescence.
    pub fn is_stable(&self) -> bool {
        self.generation.load(Ordering::Acquire) % 2 == 0
    }

    /// Take a consistent snapshot, retrying while a writer is in
    /// progress or raced past us. Bounded by the fact that a writer's
    /// critical section (§4.3 generation protocol) is a handful of
    /// stores, never a loop or a blocking call.
    pub fn snapshot(&self) -> ValueSnapshot {
        loop {
            let before = self.generation.load(Ordering::Acquire);
            if before % 2 != 0 {
                continue;
            }
            let words = self.words.clone();
            let timestamp = self.timestamp;
            let current_report_size_bits = self.current_report_size_bits;
            let after = self.generation.load(Ordering::Acquire);
            if after == before {
                return ValueSnapshot { words, timestamp, current_report_size_bits };
            }
        }
    }

    /// Run `mutate` under the generation protocol: bump to odd, call
    /// `mutate` with exclusive access to the raw fields, bump back to
    /// even. Requires `&mut self` (this crate's single-mutator
    /// discipline — see §5) so no atomic CAS is needed on the write
    /// side, only the generation counter readers observe.
    pub fn mutate<F: FnOnce(&mut Vec<u32>, &mut u64, &mut u32)>(&mut self, mutate: F) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        mutate(&mut self.words, &mut self.timestamp, &mut self.current_report_size_bits);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Number of 32-bit words this slot was sized to.
    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    pub fn word(&self, index: usize) -> u32 {
        self.snapshot().words[index]
    }

    /// Raw generation counter, exposed so callers can tell a slot that
    /// has never been written (`generation == 0`) from one that has —
    /// `set_value`'s "don't block the first write" rule needs exactly
    /// this distinction.
    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn timestamp(&self) -> u64 {
        self.snapshot().timestamp
    }

    pub fn current_report_size_bits(&self) -> u32 {
        self.snapshot().current_report_size_bits
    }
}

/// Arena of [`ValueSlot`]s, one per element, indexed by cookie order.
/// Sized once after the tree is fully built (§4.4 step 6); never resized
/// afterwards.
#[derive(Debug, Default)]
pub struct ElementValueStore {
    slots: Vec<ValueSlot>,
}

impl ElementValueStore {
    /// One single-word slot per element — a convenience for tests that
    /// don't care about field width. Real trees are sized with
    /// [`Self::with_word_counts`].
    pub fn with_len(len: usize) -> Self {
        let mut slots = Vec::with_capacity(len);
        slots.resize_with(len, ValueSlot::default);
        Self { slots }
    }

    /// Size each element's slot individually: `word_counts[i]` is the
    /// number of 32-bit words element `i` needs, per §4.4 step 6 ("sum
    /// each element's value-size contribution").
    pub fn with_word_counts(word_counts: &[usize]) -> Self {
        Self { slots: word_counts.iter().map(|&n| ValueSlot::with_capacity_words(n)).collect() }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> &ValueSlot {
        &self.slots[index]
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut ValueSlot {
        &mut self.slots[index]
    }

    /// `true` iff every slot's generation is currently even. Used by the
    /// "generation parity" testable property at quiescent points.
    pub fn all_stable(&self) -> bool {
        self.slots.iter().all(ValueSlot::is_stable)
    }
}
