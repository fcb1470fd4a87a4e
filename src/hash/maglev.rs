//! Maglev consistent hash table.
//!
//! Maps a 64-bit key to a backend name through a precomputed lookup
//! table of prime length, as described in the Maglev paper
//! (<https://static.googleusercontent.com/media/research.google.com/en//pubs/archive/44824.pdf>).
//! Backends can be added and removed at any time with minimal disruption
//! to the existing mapping, which keeps connections pinned to the same
//! backend across membership churn.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Common lookup table size for small deployments. Prime.
pub const SMALL_SIZE: u32 = 65_537;

/// Common lookup table size for large deployments. Prime.
pub const LARGE_SIZE: u32 = 655_373;

/// Per-backend permutation parameters.
///
/// `offset` and `skip` generate a stride-walk over `[0, size)` used to
/// populate the lookup table; `id` preserves insertion order so the
/// population is deterministic in the membership history.
#[derive(Debug, Clone, Copy)]
struct Permutation {
    id: u64,
    offset: u32,
    skip: u32,
}

#[derive(Debug, Default)]
struct Membership {
    backends: HashMap<String, Permutation>,
    // Insertion ids are never reused, even after removal.
    next_id: u64,
}

/// Thread-safe Maglev consistent hash table.
///
/// Readers take shared locks and hit the precomputed table; mutators
/// rebuild it. Membership is locked before the lookup table, always in
/// that order, so a reader can never observe a half-populated table.
pub struct ConsistentHash {
    size: u32,
    membership: RwLock<Membership>,
    lookup: RwLock<Vec<String>>,
}

impl ConsistentHash {
    /// Creates an empty table with the given lookup size.
    ///
    /// The size must be a prime number; [`SMALL_SIZE`] and [`LARGE_SIZE`]
    /// are the common choices.
    pub fn new(size: u32) -> Self {
        Self {
            size,
            membership: RwLock::new(Membership::default()),
            lookup: RwLock::new(Vec::new()),
        }
    }

    /// Returns the size of the lookup table.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Adds the given backends and rebuilds the lookup table.
    ///
    /// Names that are already present keep their existing permutation
    /// parameters and insertion id.
    pub fn add<I, S>(&self, backends: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut membership = self
            .membership
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        for name in backends {
            let name = name.into();
            if membership.backends.contains_key(&name) {
                continue;
            }
            let permutation = Permutation {
                id: membership.next_id,
                offset: permutation_seed(&name, "offset") % self.size,
                skip: permutation_seed(&name, "skip") % (self.size - 1) + 1,
            };
            membership.next_id += 1;
            membership.backends.insert(name, permutation);
        }

        let mut lookup = self.lookup.write().unwrap_or_else(PoisonError::into_inner);
        self.populate(&membership, &mut lookup);
    }

    /// Removes the given backends and rebuilds the lookup table.
    ///
    /// Unknown names are ignored.
    pub fn remove<I, S>(&self, backends: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut membership = self
            .membership
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        for name in backends {
            membership.backends.remove(name.as_ref());
        }

        let mut lookup = self.lookup.write().unwrap_or_else(PoisonError::into_inner);
        self.populate(&membership, &mut lookup);
    }

    /// Returns the backend for the given key, or `None` if the table has
    /// no backends.
    ///
    /// Amortized O(1); the first call after construction materializes the
    /// lookup table if a mutation has not already done so.
    pub fn hash(&self, key: u64) -> Option<String> {
        let membership = self
            .membership
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        if membership.backends.is_empty() {
            return None;
        }

        let index = (key % u64::from(self.size)) as usize;

        {
            let lookup = self.lookup.read().unwrap_or_else(PoisonError::into_inner);
            if lookup.len() == self.size as usize {
                return Some(lookup[index].clone());
            }
        }

        let mut lookup = self.lookup.write().unwrap_or_else(PoisonError::into_inner);
        if lookup.len() != self.size as usize {
            self.populate(&membership, &mut lookup);
        }
        Some(lookup[index].clone())
    }

    /// Rebuilds the lookup table from the current membership.
    ///
    /// Walks the backends in insertion order, each claiming the next free
    /// slot of its permutation in round-robin rounds, until every slot is
    /// assigned. With no backends the table is left empty.
    ///
    /// Caller holds the membership lock and the lookup lock exclusively.
    fn populate(&self, membership: &Membership, lookup: &mut Vec<String>) {
        lookup.clear();
        if membership.backends.is_empty() {
            return;
        }

        let mut order: Vec<(&str, Permutation)> = membership
            .backends
            .iter()
            .map(|(name, permutation)| (name.as_str(), *permutation))
            .collect();
        order.sort_by_key(|(_, permutation)| permutation.id);

        let size = self.size as usize;
        let mut table = vec![String::new(); size];
        let mut taken = vec![false; size];
        let mut next = vec![0u64; order.len()];
        let mut filled = 0usize;

        'rounds: loop {
            for (i, (name, permutation)) in order.iter().enumerate() {
                let mut candidate = self.permutation_at(permutation, next[i]);
                while taken[candidate] {
                    next[i] += 1;
                    candidate = self.permutation_at(permutation, next[i]);
                }

                taken[candidate] = true;
                table[candidate] = (*name).to_string();
                next[i] += 1;

                filled += 1;
                if filled == size {
                    break 'rounds;
                }
            }
        }

        *lookup = table;
    }

    /// Returns the j-th position of the backend's stride-walk.
    fn permutation_at(&self, permutation: &Permutation, j: u64) -> usize {
        let position =
            (u64::from(permutation.offset) + j * u64::from(permutation.skip)) % u64::from(self.size);
        position as usize
    }
}

/// IEEE CRC-32 over the backend name with a salt appended, the source of
/// the per-backend `offset` and `skip` parameters.
fn permutation_seed(name: &str, salt: &str) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(name.as_bytes());
    hasher.update(salt.as_bytes());
    hasher.finalize()
}
