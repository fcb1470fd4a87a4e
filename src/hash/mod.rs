//! Packet hashing and consistent backend selection.
//!
//! Provides the 5-tuple fingerprint used as the lookup key and the
//! Maglev consistent hash table that maps keys to backend names.
//! A fingerprint widened to `u64` feeds directly into
//! [`ConsistentHash::hash`].

mod maglev;
mod tuple;

pub use maglev::{ConsistentHash, LARGE_SIZE, SMALL_SIZE};
pub use tuple::fingerprint;
