//! Open-addressing hash table keyed by interned strings.
//!
//! Keys are [`ObjRef`] handles to interned strings, so key comparison is a
//! handle comparison. The hash travels with the key because the table never
//! looks into the heap itself.

use crate::gc::ObjRef;
use crate::value::Value;

const MAX_LOAD: f64 = 0.75;
const MIN_CAPACITY: usize = 8;

/// A string key paired with its cached hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Key {
    pub obj: ObjRef,
    pub hash: u32,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    key: Option<Key>,
    value: Value,
}

impl Entry {
    const EMPTY: Entry = Entry { key: None, value: Value::None };

    fn is_tombstone(&self) -> bool {
        self.key.is_none() && self.value == Value::Bool(true)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Table {
    count: usize,
    entries: Vec<Entry>,
}

impl Table {
    pub fn new() -> Self {
        Table { count: 0, entries: Vec::new() }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn mask(&self) -> usize {
        self.entries.len() - 1
    }

    /// Slot for `key`: its own slot if present, otherwise the first tombstone
    /// on the probe path, otherwise the empty slot that ended the probe.
    fn find_slot(entries: &[Entry], key: Key) -> usize {
        let mask = entries.len() - 1;
        let mut index = key.hash as usize & mask;
        let mut tombstone = None;
        loop {
            let entry = &entries[index];
            match entry.key {
                None if entry.is_tombstone() => {
                    tombstone.get_or_insert(index);
                }
                None => return tombstone.unwrap_or(index),
                Some(k) if k.obj == key.obj => return index,
                Some(_) => {}
            }
            index = (index + 1) & mask;
        }
    }

    pub fn get(&self, key: Key) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        let entry = &self.entries[Self::find_slot(&self.entries, key)];
        entry.key.map(|_| entry.value)
    }

    pub fn contains(&self, key: Key) -> bool {
        self.get(key).is_some()
    }

    /// Inserts or overwrites. Returns true when the key was not present.
    pub fn set(&mut self, key: Key, value: Value) -> bool {
        if (self.count + 1) as f64 > self.entries.len() as f64 * MAX_LOAD {
            let capacity = (self.entries.len() * 2).max(MIN_CAPACITY);
            self.resize(capacity);
        }
        let slot = Self::find_slot(&self.entries, key);
        let entry = &mut self.entries[slot];
        let is_new = entry.key.is_none();
        // reusing a tombstone does not change the count, it was already counted
        if is_new && !entry.is_tombstone() {
            self.count += 1;
        }
        entry.key = Some(key);
        entry.value = value;
        is_new
    }

    pub fn delete(&mut self, key: Key) -> bool {
        if self.count == 0 {
            return false;
        }
        let slot = Self::find_slot(&self.entries, key);
        let entry = &mut self.entries[slot];
        if entry.key.is_none() {
            return false;
        }
        entry.key = None;
        entry.value = Value::Bool(true);
        true
    }

    fn resize(&mut self, capacity: usize) {
        let mut entries = vec![Entry::EMPTY; capacity];
        self.count = 0;
        for entry in &self.entries {
            if let Some(key) = entry.key {
                let slot = Self::find_slot(&entries, key);
                entries[slot] = *entry;
                self.count += 1;
            }
        }
        self.entries = entries;
    }

    /// Copies every live entry of `self` into `to`.
    pub fn add_all(&self, to: &mut Table) {
        for (key, value) in self.iter() {
            to.set(key, value);
        }
    }

    /// Probes for a key whose string content satisfies `matches`. Used by the
    /// interning table, where the candidate has no handle yet.
    pub fn find(&self, hash: u32, mut matches: impl FnMut(ObjRef) -> bool) -> Option<ObjRef> {
        if self.count == 0 {
            return None;
        }
        let mask = self.mask();
        let mut index = hash as usize & mask;
        loop {
            let entry = &self.entries[index];
            match entry.key {
                None if !entry.is_tombstone() => return None,
                Some(k) if k.hash == hash && matches(k.obj) => return Some(k.obj),
                _ => {}
            }
            index = (index + 1) & mask;
        }
    }

    /// Iteration cursor: returns the next live entry at or after `cursor`
    /// together with the cursor to resume from.
    pub fn next(&self, cursor: usize) -> Option<(usize, Key, Value)> {
        self.entries
            .iter()
            .enumerate()
            .skip(cursor)
            .find_map(|(i, e)| e.key.map(|k| (i + 1, k, e.value)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Key, Value)> + '_ {
        self.entries.iter().filter_map(|e| e.key.map(|k| (k, e.value)))
    }

    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.iter().map(|(k, _)| k)
    }

    /// Deletes every entry whose key fails `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(Key) -> bool) {
        for entry in &mut self.entries {
            if let Some(key) = entry.key {
                if !keep(key) {
                    entry.key = None;
                    entry.value = Value::Bool(true);
                }
            }
        }
    }

    pub(crate) fn heap_size(&self) -> usize {
        self.entries.capacity() * std::mem::size_of::<Entry>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u32, hash: u32) -> Key {
        Key { obj: ObjRef::from_index(n), hash }
    }

    #[test]
    fn set_get_and_overwrite() {
        let mut t = Table::new();
        assert!(t.set(key(1, 10), Value::Number(1.0)));
        assert!(!t.set(key(1, 10), Value::Number(2.0)));
        assert_eq!(t.get(key(1, 10)), Some(Value::Number(2.0)));
        assert_eq!(t.get(key(2, 10)), None);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn capacity_is_power_of_two_and_grows() {
        let mut t = Table::new();
        for i in 0..100 {
            t.set(key(i, i * 7), Value::Number(i as f64));
        }
        assert!(t.capacity().is_power_of_two());
        assert!(t.capacity() as f64 * MAX_LOAD >= 100.0);
        for i in 0..100 {
            assert_eq!(t.get(key(i, i * 7)), Some(Value::Number(i as f64)));
        }
    }

    #[test]
    fn tombstones_keep_probe_chains_intact() {
        let mut t = Table::new();
        // same hash forces a shared probe chain
        t.set(key(1, 3), Value::Number(1.0));
        t.set(key(2, 3), Value::Number(2.0));
        t.set(key(3, 3), Value::Number(3.0));
        assert!(t.delete(key(2, 3)));
        assert!(!t.delete(key(2, 3)));
        assert_eq!(t.get(key(3, 3)), Some(Value::Number(3.0)));
        assert_eq!(t.get(key(2, 3)), None);
        // tombstone slot is reused
        assert!(t.set(key(4, 3), Value::Number(4.0)));
        assert_eq!(t.get(key(4, 3)), Some(Value::Number(4.0)));
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn resize_drops_tombstones() {
        let mut t = Table::new();
        for i in 0..6 {
            t.set(key(i, i), Value::None);
        }
        for i in 0..5 {
            t.delete(key(i, i));
        }
        for i in 10..40 {
            t.set(key(i, i), Value::Bool(false));
        }
        assert_eq!(t.len(), 31);
        assert_eq!(t.get(key(5, 5)), Some(Value::None));
    }

    #[test]
    fn add_all_and_cursor() {
        let mut a = Table::new();
        a.set(key(1, 1), Value::Number(1.0));
        a.set(key(2, 2), Value::Number(2.0));
        let mut b = Table::new();
        a.add_all(&mut b);
        assert_eq!(b.get(key(2, 2)), Some(Value::Number(2.0)));

        let mut cursor = 0;
        let mut seen = 0;
        while let Some((next, _, _)) = b.next(cursor) {
            seen += 1;
            cursor = next;
        }
        assert_eq!(seen, 2);
    }

    #[test]
    fn find_by_content() {
        let mut t = Table::new();
        t.set(key(7, 42), Value::None);
        assert_eq!(t.find(42, |r| r.index() == 7), Some(ObjRef::from_index(7)));
        assert_eq!(t.find(42, |_| false), None);
        assert_eq!(t.find(1, |_| true), None);
    }
}
