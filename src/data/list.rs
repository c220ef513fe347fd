use std::collections::VecDeque;

use crate::resp::Value;

/// A list value: constant-time push/pop at both ends, range scans with
/// Redis negative-index semantics (negative counts from the end, bounds
/// clamp, `start > stop` yields nothing).
#[derive(Debug, Default)]
pub struct List {
    items: VecDeque<Value>,
}

impl List {
    pub fn new() -> Self {
        List::default()
    }

    pub fn push_left(&mut self, value: Value) {
        self.items.push_front(value);
    }

    pub fn push_right(&mut self, value: Value) {
        self.items.push_back(value);
    }

    pub fn pop_left(&mut self) -> Option<Value> {
        self.items.pop_front()
    }

    pub fn pop_right(&mut self) -> Option<Value> {
        self.items.pop_back()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn index(&self, index: i64) -> Option<&Value> {
        let len = self.items.len() as i64;
        let idx = if index < 0 { len + index } else { index };
        if idx < 0 || idx >= len {
            return None;
        }
        self.items.get(idx as usize)
    }

    pub fn range(&self, start: i64, stop: i64) -> Vec<Value> {
        let len = self.items.len() as i64;
        let mut start = if start < 0 { len + start } else { start };
        let mut stop = if stop < 0 { len + stop } else { stop };
        if start < 0 {
            start = 0;
        }
        if stop >= len {
            stop = len - 1;
        }
        if start > stop || len == 0 {
            return Vec::new();
        }

        self.items
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect()
    }
}
