/// Index spaces of the target subsystem, each with the value handed out when
/// the space is still empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexScope {
    /// Backstore indices, global across all backstores.
    Backstore,
    /// TPG tags of one target.
    TpgTag,
    /// LUN indices of one TPG.
    Lun,
    /// Mapped LUN indices of one node ACL.
    MappedLun,
}

impl IndexScope {
    pub fn empty_default(&self) -> u32 {
        match self {
            IndexScope::Backstore => 0,
            IndexScope::TpgTag => 1,
            IndexScope::Lun => 0,
            IndexScope::MappedLun => 0,
        }
    }

    /// Returns the index to use for the next entity of this scope, given the
    /// indices currently in use.
    pub fn next_free(&self, existing: impl IntoIterator<Item = u32>) -> u32 {
        next_free_index(existing, self.empty_default())
    }
}

/// Returns `empty_default` when `existing` is empty, otherwise one more than
/// the highest index in use. Freed indices below the maximum are not reused.
pub fn next_free_index(existing: impl IntoIterator<Item = u32>, empty_default: u32) -> u32 {
    existing
        .into_iter()
        .max()
        .map_or(empty_default, |max| max.saturating_add(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_free_index() {
        assert_eq!(next_free_index([0, 2, 3], 0), 4);
        assert_eq!(next_free_index([3, 0, 2], 0), 4);
        assert_eq!(next_free_index([], 0), 0);
        assert_eq!(next_free_index([], 1), 1);
        // Gaps are never filled
        assert_eq!(next_free_index([5], 0), 6);
        assert_eq!(next_free_index([1], 1), 2);
    }

    #[test]
    fn test_scope_defaults() {
        assert_eq!(IndexScope::Backstore.next_free([]), 0);
        assert_eq!(IndexScope::TpgTag.next_free([]), 1);
        assert_eq!(IndexScope::Lun.next_free([]), 0);
        assert_eq!(IndexScope::MappedLun.next_free([]), 0);

        assert_eq!(IndexScope::TpgTag.next_free([1]), 2);
        assert_eq!(IndexScope::Lun.next_free(vec![0, 1]), 2);
    }
}
