use std::collections::HashMap;
use std::sync::Arc;

use crate::data::{GeoIndex, List, Set, SortedSet, TtlMap};
use crate::engine::command::Command;

/// One of the 16 databases. Collections are created on first write and
/// dropped again when a pop/remove leaves them empty, so key existence
/// checks stay a plain map lookup.
#[derive(Debug)]
pub struct Database {
    pub index: usize,
    pub hm: TtlMap,
    lists: HashMap<String, List>,
    ssets: HashMap<String, SortedSet<f64>>,
    geo: HashMap<String, GeoIndex>,
    sets: HashMap<String, Set>,
    /// Parked BLPOP commands per list key, in arrival order.
    pub blocked_pop: HashMap<String, Vec<Arc<Command>>>,
}

impl Database {
    pub fn new(index: usize) -> Self {
        Database {
            index,
            hm: TtlMap::new(),
            lists: HashMap::new(),
            ssets: HashMap::new(),
            geo: HashMap::new(),
            sets: HashMap::new(),
            blocked_pop: HashMap::new(),
        }
    }

    /// One expiry sweep over the string keyspace.
    pub fn evict(&mut self) -> usize {
        self.hm.sweep()
    }

    pub fn get_or_create_list(&mut self, key: &str) -> &mut List {
        self.lists.entry(key.to_string()).or_default()
    }

    pub fn get_list_mut(&mut self, key: &str) -> Option<&mut List> {
        self.lists.get_mut(key)
    }

    pub fn get_list(&self, key: &str) -> Option<&List> {
        self.lists.get(key)
    }

    pub fn remove_list_if_empty(&mut self, key: &str) {
        if self.lists.get(key).is_some_and(|list| list.is_empty()) {
            self.lists.remove(key);
        }
    }

    pub fn get_or_create_sset(&mut self, key: &str) -> &mut SortedSet<f64> {
        self.ssets.entry(key.to_string()).or_default()
    }

    pub fn get_sset(&self, key: &str) -> Option<&SortedSet<f64>> {
        self.ssets.get(key)
    }

    pub fn get_sset_mut(&mut self, key: &str) -> Option<&mut SortedSet<f64>> {
        self.ssets.get_mut(key)
    }

    pub fn remove_sset_if_empty(&mut self, key: &str) {
        if self.ssets.get(key).is_some_and(|set| set.is_empty()) {
            self.ssets.remove(key);
        }
    }

    pub fn get_or_create_geo(&mut self, key: &str) -> &mut GeoIndex {
        self.geo.entry(key.to_string()).or_default()
    }

    pub fn get_geo(&self, key: &str) -> Option<&GeoIndex> {
        self.geo.get(key)
    }

    pub fn get_or_create_set(&mut self, key: &str) -> &mut Set {
        self.sets.entry(key.to_string()).or_default()
    }

    pub fn get_set(&self, key: &str) -> Option<&Set> {
        self.sets.get(key)
    }

    pub fn get_set_mut(&mut self, key: &str) -> Option<&mut Set> {
        self.sets.get_mut(key)
    }

    pub fn remove_set_if_empty(&mut self, key: &str) {
        if self.sets.get(key).is_some_and(|set| set.is_empty()) {
            self.sets.remove(key);
        }
    }
}
