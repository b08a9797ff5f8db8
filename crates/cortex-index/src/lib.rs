// In-RAM read-mostly caches over the store.
// Writes flow store -> cache via delta sync; eventual consistency is
// bounded by the sync interval.

mod index;
mod ring;

pub use index::MemoryIndex;
pub use ring::{ActiveSessionRing, RingEntry, RingRole};
