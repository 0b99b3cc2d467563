use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

/// A map that computes and caches a value for a key the first time it is
/// requested, the same role `KeyDefaultDict` plays in the original
/// implementation (a `defaultdict` whose factory receives the missing key
/// rather than being called with no arguments).
///
/// Rust has no subclassable `HashMap`, so the natural shape for "compute
/// once, cache forever, keyed by a value I don't have yet" is a mutex around
/// a plain map plus a factory closure, rather than trying to reproduce
/// `__missing__` dispatch.
pub struct KeyedCache<K, V, F> {
    entries: Mutex<HashMap<K, V>>,
    factory: F,
}

impl<K, V, F> KeyedCache<K, V, F>
where
    K: Eq + Hash + Clone,
    V: Clone,
    F: Fn(&K) -> V,
{
    pub fn new(factory: F) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            factory,
        }
    }

    /// Return the cached value for `key`, computing and storing it first if
    /// this is the first time `key` has been seen.
    pub fn get_or_init(&self, key: &K) -> V {
        let mut entries = self.entries.lock().unwrap_or_else(|poison| poison.into_inner());
        if let Some(v) = entries.get(key) {
            return v.clone();
        }
        let v = (self.factory)(key);
        entries.insert(key.clone(), v.clone());
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn computes_once_per_key() {
        let calls = AtomicUsize::new(0);
        let cache = KeyedCache::new(|columns: &usize| {
            calls.fetch_add(1, Ordering::SeqCst);
            "  * ".to_string() + &" ".repeat(*columns)
        });
        let a = cache.get_or_init(&80);
        let b = cache.get_or_init(&80);
        assert_eq!(a, b);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        cache.get_or_init(&100);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
