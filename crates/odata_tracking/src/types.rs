//! Core type definitions for change tracking.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sequence number fixing the replay order of pending changes.
///
/// Change orders are handed out by the tracker from a single counter and
/// are never reused within one tracker. Higher values were made later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChangeOrder(pub u64);

impl ChangeOrder {
    /// Creates a new change order.
    #[must_use]
    pub const fn new(order: u64) -> Self {
        Self(order)
    }

    /// Returns the raw order value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next change order.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ChangeOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "change:{}", self.0)
    }
}

/// Lifecycle state of a tracked entity or link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityState {
    /// Not tracked.
    Detached,
    /// Tracked with no pending change.
    Unchanged,
    /// Created locally, not yet sent to the server.
    Added,
    /// Marked for deletion on the server.
    Deleted,
    /// Modified locally since the last save.
    Modified,
}

impl EntityState {
    /// Returns true for the states that produce a server request.
    #[must_use]
    pub fn is_dirty(self) -> bool {
        matches!(
            self,
            EntityState::Added | EntityState::Modified | EntityState::Deleted
        )
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityState::Detached => "Detached",
            EntityState::Unchanged => "Unchanged",
            EntityState::Added => "Added",
            EntityState::Deleted => "Deleted",
            EntityState::Modified => "Modified",
        };
        f.write_str(name)
    }
}

/// Policy for reconciling server responses with locally tracked state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MergeOption {
    /// Tracked entities are left untouched; only new entities are attached.
    #[default]
    AppendOnly,
    /// Server values win; local changes are discarded.
    OverwriteChanges,
    /// Server values are applied only to entities without local changes.
    PreserveChanges,
    /// Results are returned without being tracked.
    NoTracking,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_order_next() {
        let c = ChangeOrder::new(5);
        assert_eq!(c.next().as_u64(), 6);
        assert!(c < c.next());
    }

    #[test]
    fn dirty_states() {
        assert!(EntityState::Added.is_dirty());
        assert!(EntityState::Modified.is_dirty());
        assert!(EntityState::Deleted.is_dirty());
        assert!(!EntityState::Unchanged.is_dirty());
        assert!(!EntityState::Detached.is_dirty());
    }

    #[test]
    fn change_order_display() {
        assert_eq!(format!("{}", ChangeOrder::new(3)), "change:3");
        assert_eq!(EntityState::Modified.to_string(), "Modified");
    }

    #[test]
    fn merge_option_default() {
        assert_eq!(MergeOption::default(), MergeOption::AppendOnly);
    }
}
