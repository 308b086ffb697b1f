//! Drag ownership arbitration.
//!
//! One lock per group id, independent across groups. First claimant wins; no
//! queueing and no priority. Release always succeeds, from anyone — cleanup
//! must never fail.

use puzzleroom_protocol::{ConnectionId, GroupId};
use std::collections::HashMap;

/// Outcome of a drag-start claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// Lock granted (or already held by the same connection — re-entrant).
    Granted,
    /// Another connection holds the lock; state unchanged.
    Denied { holder: ConnectionId },
}

/// Lock table for one room's groups. Owned by the room task, so mutation is
/// already serialized.
#[derive(Debug, Default)]
pub struct GroupLocks {
    held: HashMap<GroupId, ConnectionId>,
}

impl GroupLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to claim the lock for `group` on behalf of `conn`.
    pub fn try_claim(&mut self, group: &GroupId, conn: ConnectionId) -> Claim {
        match self.held.get(group) {
            Some(&holder) if holder != conn => Claim::Denied { holder },
            _ => {
                self.held.insert(group.clone(), conn);
                Claim::Granted
            }
        }
    }

    /// Whether `conn` currently holds the lock for `group`.
    pub fn holds(&self, group: &GroupId, conn: ConnectionId) -> bool {
        self.held.get(group) == Some(&conn)
    }

    /// Release the lock for `group`, no matter who holds it.
    pub fn release(&mut self, group: &GroupId) {
        self.held.remove(group);
    }

    /// Release every lock held by `conn` (disconnect cleanup).
    pub fn release_all_held_by(&mut self, conn: ConnectionId) {
        self.held.retain(|_, holder| *holder != conn);
    }

    #[cfg(test)]
    fn holder(&self, group: &GroupId) -> Option<ConnectionId> {
        self.held.get(group).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: ConnectionId = ConnectionId(1);
    const B: ConnectionId = ConnectionId(2);

    #[test]
    fn unlocked_group_grants_to_first_claimant() {
        let mut locks = GroupLocks::new();
        assert_eq!(locks.try_claim(&"g1".into(), A), Claim::Granted);
        assert_eq!(locks.holder(&"g1".into()), Some(A));
    }

    #[test]
    fn repeated_claim_by_holder_is_idempotent() {
        let mut locks = GroupLocks::new();
        assert_eq!(locks.try_claim(&"g1".into(), A), Claim::Granted);
        assert_eq!(locks.try_claim(&"g1".into(), A), Claim::Granted);
        assert_eq!(locks.holder(&"g1".into()), Some(A));
    }

    #[test]
    fn claim_on_held_group_is_denied_and_state_unchanged() {
        let mut locks = GroupLocks::new();
        assert_eq!(locks.try_claim(&"g1".into(), A), Claim::Granted);
        assert_eq!(locks.try_claim(&"g1".into(), B), Claim::Denied { holder: A });
        assert_eq!(locks.holder(&"g1".into()), Some(A));
    }

    #[test]
    fn release_makes_group_lockable_by_anyone() {
        let mut locks = GroupLocks::new();
        assert_eq!(locks.try_claim(&"g1".into(), A), Claim::Granted);
        locks.release(&"g1".into());
        assert_eq!(locks.try_claim(&"g1".into(), B), Claim::Granted);
    }

    #[test]
    fn release_by_non_holder_still_clears_the_lock() {
        let mut locks = GroupLocks::new();
        assert_eq!(locks.try_claim(&"g1".into(), A), Claim::Granted);
        // drag-end releases unconditionally, even from a non-holder
        locks.release(&"g1".into());
        assert_eq!(locks.holder(&"g1".into()), None);
    }

    #[test]
    fn release_of_unlocked_group_is_a_noop() {
        let mut locks = GroupLocks::new();
        locks.release(&"g1".into());
        assert_eq!(locks.holder(&"g1".into()), None);
    }

    #[test]
    fn disconnect_releases_only_the_holders_locks() {
        let mut locks = GroupLocks::new();
        assert_eq!(locks.try_claim(&"g1".into(), A), Claim::Granted);
        assert_eq!(locks.try_claim(&"g2".into(), A), Claim::Granted);
        assert_eq!(locks.try_claim(&"g3".into(), B), Claim::Granted);

        locks.release_all_held_by(A);

        assert_eq!(locks.holder(&"g1".into()), None);
        assert_eq!(locks.holder(&"g2".into()), None);
        assert_eq!(locks.holder(&"g3".into()), Some(B));
        assert_eq!(locks.try_claim(&"g1".into(), B), Claim::Granted);
    }

    #[test]
    fn locks_are_independent_across_groups() {
        let mut locks = GroupLocks::new();
        assert_eq!(locks.try_claim(&"g1".into(), A), Claim::Granted);
        assert_eq!(locks.try_claim(&"g2".into(), B), Claim::Granted);
        assert!(locks.holds(&"g1".into(), A));
        assert!(locks.holds(&"g2".into(), B));
    }
}
