use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A point on the device screen, in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenCoords {
    pub x: u32,
    pub y: u32,
}

/// Success-only memoization for located controls.
///
/// Template search costs hundreds of milliseconds per scale; controls that
/// never move between screens (back, apply, save, the gallery icon) only need
/// to be found once per process. Failed lookups are never cached so a
/// transient miss stays retryable.
#[derive(Debug, Default)]
pub struct CoordsCache(HashMap<String, ScreenCoords>);

impl CoordsCache {
    pub fn get(&self, key: &str) -> Option<ScreenCoords> {
        self.0.get(key).copied()
    }

    pub fn put(&mut self, key: impl Into<String>, coords: ScreenCoords) {
        self.0.insert(key.into(), coords);
    }

    pub fn get_or_compute<E>(
        &mut self,
        key: &str,
        compute: impl FnOnce() -> Result<ScreenCoords, E>,
    ) -> Result<ScreenCoords, E> {
        if let Some(coords) = self.get(key) {
            return Ok(coords);
        }
        let coords = compute()?;
        self.put(key, coords);
        Ok(coords)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn computes_once_and_reuses() {
        let mut cache = CoordsCache::default();
        let mut calls = 0;

        let first = cache
            .get_or_compute("save", || -> Result<_, ()> {
                calls += 1;
                Ok(ScreenCoords { x: 10, y: 20 })
            })
            .unwrap();
        let second = cache
            .get_or_compute("save", || -> Result<_, ()> {
                calls += 1;
                Ok(ScreenCoords { x: 99, y: 99 })
            })
            .unwrap();

        assert_eq!(first, ScreenCoords { x: 10, y: 20 });
        assert_eq!(second, first);
        assert_eq!(calls, 1);
    }

    #[test]
    fn failure_is_not_cached() {
        let mut cache = CoordsCache::default();

        let err: Result<ScreenCoords, &str> = cache.get_or_compute("back", || Err("miss"));
        assert!(err.is_err());
        assert!(cache.is_empty());

        let ok = cache
            .get_or_compute("back", || -> Result<_, &str> {
                Ok(ScreenCoords { x: 5, y: 6 })
            })
            .unwrap();
        assert_eq!(ok, ScreenCoords { x: 5, y: 6 });
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn keys_are_independent() {
        let mut cache = CoordsCache::default();
        cache.put("a", ScreenCoords { x: 1, y: 1 });
        cache.put("b", ScreenCoords { x: 2, y: 2 });
        assert_eq!(cache.get("a"), Some(ScreenCoords { x: 1, y: 1 }));
        assert_eq!(cache.get("b"), Some(ScreenCoords { x: 2, y: 2 }));
        assert_eq!(cache.get("c"), None);
    }
}
