//! Track which fields of an entity were changed since it was loaded.
//!
//! Mutators on an entity mark the index of the field they touched; the
//! session turns the marked indices into the SET list of an UPDATE. Marks a
//! flush wrote are held until the transaction ends: COMMIT drops them,
//! ROLLBACK marks them again.

use crate::model::WritePhase;

/// A compact bitset representing "field was changed" for indices `0..len`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeSet {
    len: usize,
    bits: Box<[u64]>,
    written: Box<[u64]>,
}

impl ChangeSet {
    /// Create an empty (nothing changed) set for `len` fields.
    #[must_use]
    pub fn empty(len: usize) -> Self {
        let words = len.div_ceil(64);
        Self {
            len,
            bits: vec![0u64; words].into_boxed_slice(),
            written: vec![0u64; words].into_boxed_slice(),
        }
    }

    /// Number of fields represented by this set.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True if `len == 0`.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Mark a field index as changed. Indices outside `0..len` are ignored.
    pub fn mark(&mut self, idx: usize) {
        if idx >= self.len {
            return;
        }
        let word = idx / 64;
        let bit = idx % 64;
        if let Some(w) = self.bits.get_mut(word) {
            *w |= 1u64 << bit;
        }
    }

    /// Check whether a field index is marked.
    #[must_use]
    pub fn is_marked(&self, idx: usize) -> bool {
        if idx >= self.len {
            return false;
        }
        let word = idx / 64;
        let bit = idx % 64;
        self.bits
            .get(word)
            .is_some_and(|w| (w & (1u64 << bit)) != 0)
    }

    /// Whether any field is marked.
    #[must_use]
    pub fn any(&self) -> bool {
        self.bits.iter().any(|w| *w != 0)
    }

    /// Marked indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(|idx| self.is_marked(*idx))
    }

    /// Whether a flush in the open transaction wrote field `idx`.
    #[must_use]
    pub fn is_written(&self, idx: usize) -> bool {
        idx < self.len
            && self
                .written
                .get(idx / 64)
                .is_some_and(|w| (w & (1u64 << (idx % 64))) != 0)
    }

    /// Move marks through the unit of work.
    ///
    /// `Flushed` sets the current marks aside as written, `Committed` drops
    /// them and `RolledBack` marks them again.
    pub fn settle(&mut self, phase: WritePhase) {
        for (bits, written) in self.bits.iter_mut().zip(self.written.iter_mut()) {
            match phase {
                WritePhase::Flushed => {
                    *written |= *bits;
                    *bits = 0;
                }
                WritePhase::Committed => *written = 0,
                WritePhase::RolledBack => {
                    *bits |= *written;
                    *written = 0;
                }
            }
        }
    }

    /// Forget all marks, written ones included.
    pub fn clear(&mut self) {
        for w in self.bits.iter_mut().chain(self.written.iter_mut()) {
            *w = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_and_iter() {
        let mut set = ChangeSet::empty(70);
        assert!(!set.any());
        set.mark(1);
        set.mark(65);
        set.mark(200);
        assert!(set.any());
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![1, 65]);
        set.clear();
        assert!(!set.any());
        assert!(!set.is_marked(1));
    }

    #[test]
    fn test_rollback_marks_written_fields_again() {
        let mut set = ChangeSet::empty(3);
        set.mark(1);
        set.settle(WritePhase::Flushed);
        assert!(!set.any());
        assert!(set.is_written(1));

        set.mark(2);
        set.settle(WritePhase::RolledBack);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![1, 2]);
        assert!(!set.is_written(1));

        set.settle(WritePhase::Flushed);
        set.settle(WritePhase::Committed);
        assert!(!set.any());
        assert!(!set.is_written(1));
        assert!(!set.is_written(2));
    }
}
