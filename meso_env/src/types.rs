//! Common types for the Meso transport abstraction.

use serde::{Deserialize, Serialize};

/// Identity of one cooperating process within the group.
///
/// Ranks are dense: a group of `world_size` processes uses ranks
/// `0..world_size`. Rank 0 is the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rank(pub u32);

impl Rank {
    /// The rank that owns the authoritative command timeline.
    pub const COORDINATOR: Rank = Rank(0);

    /// Returns true if this is the coordinator rank.
    pub fn is_coordinator(&self) -> bool {
        *self == Self::COORDINATOR
    }

    /// Returns the rank as an index into per-rank tables.
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    /// Iterates over every rank of a group of the given size.
    pub fn all(world_size: usize) -> impl Iterator<Item = Rank> {
        (0..world_size as u32).map(Rank)
    }
}

impl std::fmt::Display for Rank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rank-{}", self.0)
    }
}

impl From<u32> for Rank {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_coordinator() {
        assert!(Rank::COORDINATOR.is_coordinator());
        assert!(!Rank(3).is_coordinator());
        assert_eq!(Rank(3).index(), 3);
        assert_eq!(Rank(2).to_string(), "rank-2");
    }

    #[test]
    fn test_rank_all() {
        let ranks: Vec<Rank> = Rank::all(3).collect();
        assert_eq!(ranks, vec![Rank(0), Rank(1), Rank(2)]);
    }
}
