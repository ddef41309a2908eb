//! Per-pass index counter.

/// Mints increasing indices for objects the dataplane does not number
/// itself (BFD auth keys, NAT mappings, ...).
///
/// Each resync pass owns its counter, so indices are only unique within
/// the registry the pass rebuilds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexSeq {
    next: u32,
}

impl IndexSeq {
    pub const fn new(start: u32) -> Self {
        Self { next: start }
    }

    /// Returns the current value and advances the counter.
    pub fn next_index(&mut self) -> u32 {
        let current = self.next;
        self.next = self.next.wrapping_add(1);
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_increments() {
        let mut seq = IndexSeq::new(1);
        assert_eq!(seq.next_index(), 1);
        assert_eq!(seq.next_index(), 2);
        assert_eq!(seq.next_index(), 3);
    }

    #[test]
    fn test_default_starts_at_zero() {
        let mut seq = IndexSeq::default();
        assert_eq!(seq.next_index(), 0);
    }
}
