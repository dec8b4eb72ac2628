use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Listing snapshots produced by `opendir`, keyed by a generated handle id.
#[derive(Debug, Default)]
pub(crate) struct DirRegistry {
    next_id: AtomicU64,
    listings: Mutex<HashMap<u64, Arc<[String]>>>,
}

impl DirRegistry {
    pub fn register(self: &Arc<Self>, names: Vec<String>) -> DirHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let names: Arc<[String]> = names.into();
        self.lock().insert(id, Arc::clone(&names));
        DirHandle {
            id,
            names,
            cursor: 0,
            registry: Arc::clone(self),
        }
    }

    #[cfg(test)]
    pub fn get(&self, id: u64) -> Option<Arc<[String]>> {
        self.lock().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn release(&self, id: u64) {
        self.lock().remove(&id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Arc<[String]>>> {
        // A poisoned map still holds consistent snapshots.
        self.listings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Iterates the child names of a remote collection like a local directory stream.
///
/// The registration is released when the names are exhausted, on `close`, or on drop.
#[derive(Debug)]
pub struct DirHandle {
    id: u64,
    names: Arc<[String]>,
    cursor: usize,
    registry: Arc<DirRegistry>,
}

impl DirHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn read_next(&mut self) -> Option<String> {
        match self.names.get(self.cursor) {
            Some(name) => {
                self.cursor += 1;
                Some(name.clone())
            }
            None => {
                self.registry.release(self.id);
                None
            }
        }
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    pub fn close(self) {}
}

impl Iterator for DirHandle {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.read_next()
    }
}

impl Drop for DirHandle {
    fn drop(&mut self) {
        self.registry.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn yields_names_in_order_then_releases() {
        let registry = Arc::new(DirRegistry::default());
        let mut handle = registry.register(names(&["b.txt", "a.txt", "Sub"]));
        assert_eq!(registry.len(), 1);

        assert_eq!(handle.read_next().as_deref(), Some("b.txt"));
        assert_eq!(handle.read_next().as_deref(), Some("a.txt"));
        assert_eq!(handle.read_next().as_deref(), Some("Sub"));
        assert_eq!(registry.len(), 1);
        assert_eq!(handle.read_next(), None);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn rewind_restarts_from_the_snapshot() {
        let registry = Arc::new(DirRegistry::default());
        let mut handle = registry.register(names(&["one", "two"]));
        let first: Vec<String> = handle.by_ref().collect();
        handle.rewind();
        let second: Vec<String> = handle.by_ref().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn concurrent_listings_get_distinct_ids() {
        let registry = Arc::new(DirRegistry::default());
        let a = registry.register(names(&["x"]));
        let b = registry.register(names(&["y"]));

        assert_ne!(a.id(), b.id());
        assert_eq!(registry.get(a.id()).unwrap().as_ref(), ["x".to_string()]);
        assert_eq!(registry.len(), 2);

        a.close();
        drop(b);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn empty_listing_yields_nothing() {
        let registry = Arc::new(DirRegistry::default());
        let mut handle = registry.register(Vec::new());
        assert!(handle.is_empty());
        assert_eq!(handle.read_next(), None);
        assert_eq!(registry.len(), 0);
    }
}
