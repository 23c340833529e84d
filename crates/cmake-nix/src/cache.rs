use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Cache bounds. Eviction removes half the entries once a bound is
/// exceeded, which keeps memory flat on very large projects without the
/// bookkeeping an LRU would need.
pub const MAX_DERIVATION_NAME_CACHE_SIZE: usize = 10_000;
pub const MAX_LIBRARY_DEPENDENCY_CACHE_SIZE: usize = 1_000;
pub const MAX_TRANSITIVE_HEADER_CACHE_SIZE: usize = 10_000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub derivation_names: usize,
    pub library_dependencies: usize,
    pub transitive_headers: usize,
}

/// Thread-safe memoization for the generation pass: derivation names,
/// per-target library dependencies, and transitive header sets, plus the
/// used-name set backing derivation-name uniqueness.
///
/// Lookups follow the compute-once pattern: check under lock, compute
/// with the lock released (computations may spawn compilers), re-check
/// before inserting. Locks are never held across calls into other
/// components.
#[derive(Default)]
pub struct CacheManager {
    derivation_names: Mutex<HashMap<String, String>>,
    library_dependencies: Mutex<HashMap<(String, String), Vec<String>>>,
    transitive_headers: Mutex<HashMap<PathBuf, Vec<PathBuf>>>,
    used_names: Mutex<HashSet<String>>,
}

impl CacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Memoized derivation name for a `(target, source)` pair.
    pub fn derivation_name<F>(&self, target: &str, source: &str, compute: F) -> String
    where
        F: FnOnce() -> String,
    {
        let key = format!("{target}|{source}");

        {
            let cache = self.derivation_names.lock().expect("name cache mutex");
            if let Some(name) = cache.get(&key) {
                return name.clone();
            }
        }

        let result = compute();

        let mut cache = self.derivation_names.lock().expect("name cache mutex");
        if let Some(existing) = cache.get(&key) {
            return existing.clone();
        }
        cache.insert(key, result.clone());
        evict_half_if_needed(&mut cache, MAX_DERIVATION_NAME_CACHE_SIZE);
        result
    }

    /// Memoized library dependency list for a `(target, config)` pair.
    pub fn library_dependencies<F>(&self, target: &str, config: &str, compute: F) -> Vec<String>
    where
        F: FnOnce() -> Vec<String>,
    {
        let key = (target.to_string(), config.to_string());

        {
            let cache = self.library_dependencies.lock().expect("lib cache mutex");
            if let Some(deps) = cache.get(&key) {
                return deps.clone();
            }
        }

        let result = compute();

        let mut cache = self.library_dependencies.lock().expect("lib cache mutex");
        if let Some(existing) = cache.get(&key) {
            return existing.clone();
        }
        cache.insert(key, result.clone());
        evict_half_if_needed(&mut cache, MAX_LIBRARY_DEPENDENCY_CACHE_SIZE);
        result
    }

    /// Memoized transitive header set keyed on the canonicalized source
    /// path.
    pub fn transitive_headers<F>(&self, source: &Path, compute: F) -> Vec<PathBuf>
    where
        F: FnOnce() -> Vec<PathBuf>,
    {
        let key = std::fs::canonicalize(source).unwrap_or_else(|_| source.to_path_buf());

        {
            let cache = self.transitive_headers.lock().expect("header cache mutex");
            if let Some(headers) = cache.get(&key) {
                return headers.clone();
            }
        }

        let result = compute();

        let mut cache = self.transitive_headers.lock().expect("header cache mutex");
        if let Some(existing) = cache.get(&key) {
            return existing.clone();
        }
        cache.insert(key, result.clone());
        evict_half_if_needed(&mut cache, MAX_TRANSITIVE_HEADER_CACHE_SIZE);
        result
    }

    pub fn mark_name_used(&self, name: &str) {
        self.used_names
            .lock()
            .expect("used names mutex")
            .insert(name.to_string());
    }

    pub fn is_name_used(&self, name: &str) -> bool {
        self.used_names.lock().expect("used names mutex").contains(name)
    }

    /// Commit a unique variant of `base`, suffixing `_2`, `_3`, ... on
    /// collision.
    pub fn unique_name(&self, base: &str) -> String {
        let mut used = self.used_names.lock().expect("used names mutex");

        if !used.contains(base) {
            used.insert(base.to_string());
            return base.to_string();
        }

        let mut suffix = 2usize;
        loop {
            let candidate = format!("{base}_{suffix}");
            if !used.contains(&candidate) {
                used.insert(candidate.clone());
                return candidate;
            }
            suffix += 1;
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            derivation_names: self.derivation_names.lock().expect("name cache mutex").len(),
            library_dependencies: self
                .library_dependencies
                .lock()
                .expect("lib cache mutex")
                .len(),
            transitive_headers: self
                .transitive_headers
                .lock()
                .expect("header cache mutex")
                .len(),
        }
    }

    pub fn clear_all(&self) {
        self.derivation_names.lock().expect("name cache mutex").clear();
        self.library_dependencies.lock().expect("lib cache mutex").clear();
        self.transitive_headers.lock().expect("header cache mutex").clear();
        self.used_names.lock().expect("used names mutex").clear();
    }
}

fn evict_half_if_needed<K, V>(map: &mut HashMap<K, V>, bound: usize)
where
    K: Clone + std::hash::Hash + Eq,
{
    if map.len() <= bound {
        return;
    }

    let to_remove: Vec<K> = map.keys().take(map.len() / 2).cloned().collect();
    for key in to_remove {
        map.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_derivation_name_computed_once() {
        let cache = CacheManager::new();
        let calls = AtomicUsize::new(0);

        let compute = || {
            calls.fetch_add(1, Ordering::SeqCst);
            "app_main_c_o".to_string()
        };
        assert_eq!(cache.derivation_name("app", "main.c", compute), "app_main_c_o");

        let compute = || {
            calls.fetch_add(1, Ordering::SeqCst);
            "other".to_string()
        };
        assert_eq!(cache.derivation_name("app", "main.c", compute), "app_main_c_o");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_library_dependencies_keyed_by_config() {
        let cache = CacheManager::new();
        let release = cache.library_dependencies("app", "Release", || vec!["zlib".to_string()]);
        let debug = cache.library_dependencies("app", "Debug", || vec!["zlib-dbg".to_string()]);
        assert_eq!(release, ["zlib"]);
        assert_eq!(debug, ["zlib-dbg"]);
    }

    #[test]
    fn test_unique_name_suffixing() {
        let cache = CacheManager::new();
        assert_eq!(cache.unique_name("link_app"), "link_app");
        assert_eq!(cache.unique_name("link_app"), "link_app_2");
        assert_eq!(cache.unique_name("link_app"), "link_app_3");
        assert!(cache.is_name_used("link_app_2"));
    }

    #[test]
    fn test_mark_and_query() {
        let cache = CacheManager::new();
        assert!(!cache.is_name_used("headers_ext"));
        cache.mark_name_used("headers_ext");
        assert!(cache.is_name_used("headers_ext"));
    }

    #[test]
    fn test_eviction_halves_cache() {
        let mut map: HashMap<String, usize> = HashMap::new();
        for i in 0..11 {
            map.insert(format!("k{i}"), i);
        }
        evict_half_if_needed(&mut map, 10);
        assert_eq!(map.len(), 6);

        // Under the bound nothing happens.
        evict_half_if_needed(&mut map, 10);
        assert_eq!(map.len(), 6);
    }

    #[test]
    fn test_eviction_through_public_api() {
        let cache = CacheManager::new();
        for i in 0..=MAX_LIBRARY_DEPENDENCY_CACHE_SIZE {
            cache.library_dependencies(&format!("t{i}"), "Release", Vec::new);
        }
        let stats = cache.stats();
        assert!(stats.library_dependencies <= MAX_LIBRARY_DEPENDENCY_CACHE_SIZE / 2 + 1);
    }

    #[test]
    fn test_clear_all() {
        let cache = CacheManager::new();
        cache.derivation_name("t", "s", || "n".to_string());
        cache.mark_name_used("n");
        cache.clear_all();
        assert_eq!(cache.stats(), CacheStats::default());
        assert!(!cache.is_name_used("n"));
    }
}
