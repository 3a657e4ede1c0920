use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of unique supervisor instance ids.
///
/// Cloned handles share one counter, so every supervisor created from the
/// same source gets a distinct id usable for service naming and log
/// correlation. Injected at construction; there is no process-wide counter.
#[derive(Clone, Debug, Default)]
pub struct IdentitySource {
    next: Arc<AtomicU64>,
}

impl IdentitySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next instance id. Ids start at 1.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_monotonic() {
        let ids = IdentitySource::new();
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
        assert_eq!(ids.next_id(), 3);
    }

    #[test]
    fn test_clones_share_the_counter() {
        let ids = IdentitySource::new();
        let other = ids.clone();
        assert_eq!(ids.next_id(), 1);
        assert_eq!(other.next_id(), 2);
        assert_eq!(ids.next_id(), 3);
    }
}
