//! Storage behind the script-level `dict` type.
//!
//! Unlike [`crate::table::Table`], keys are owned strings rather than interned
//! handles. Capacity starts at 8, doubles when the load reaches 60% before an
//! insert and halves when it falls to 35% after a removal (never below 8).

use crate::value::Value;

pub const MIN_CAPACITY: usize = 8;
const GROW_PERCENT: usize = 60;
const SHRINK_PERCENT: usize = 35;

#[derive(Debug, Clone)]
enum Slot {
    Empty,
    Deleted,
    Full(DictItem),
}

#[derive(Debug, Clone)]
struct DictItem {
    key: Box<str>,
    hash: u32,
    value: Value,
}

/// djb2 over the key bytes.
pub fn hash_key(key: &str) -> u32 {
    key.bytes()
        .fold(5381u32, |h, c| h.wrapping_shl(5).wrapping_add(h).wrapping_add(c as u32))
}

#[derive(Debug, Clone)]
pub struct Dict {
    count: usize,
    slots: Vec<Slot>,
}

impl Default for Dict {
    fn default() -> Self {
        Self::new()
    }
}

impl Dict {
    pub fn new() -> Self {
        Dict { count: 0, slots: vec![Slot::Empty; MIN_CAPACITY] }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn locate(&self, key: &str, hash: u32) -> Option<usize> {
        let cap = self.slots.len();
        let mut index = hash as usize % cap;
        for _ in 0..cap {
            match &self.slots[index] {
                Slot::Empty => return None,
                Slot::Full(item) if item.hash == hash && &*item.key == key => return Some(index),
                _ => {}
            }
            index = (index + 1) % cap;
        }
        None
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.locate(key, hash_key(key)).map(|i| match &self.slots[i] {
            Slot::Full(item) => item.value,
            _ => unreachable!("located slot is full"),
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.locate(key, hash_key(key)).is_some()
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        if self.count * 100 / self.slots.len() >= GROW_PERCENT {
            self.resize(self.slots.len() << 1);
        }
        let hash = hash_key(key);
        if let Some(i) = self.locate(key, hash) {
            if let Slot::Full(item) = &mut self.slots[i] {
                item.value = value;
            }
            return;
        }
        let cap = self.slots.len();
        let mut index = hash as usize % cap;
        while let Slot::Full(_) = self.slots[index] {
            index = (index + 1) % cap;
        }
        self.slots[index] = Slot::Full(DictItem { key: key.into(), hash, value });
        self.count += 1;
    }

    /// Removes `key`, returning its value. Shrinks the slot array when the
    /// load drops low enough.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let index = self.locate(key, hash_key(key))?;
        let removed = std::mem::replace(&mut self.slots[index], Slot::Deleted);
        self.count -= 1;
        if self.slots.len() != MIN_CAPACITY && self.count * 100 / self.slots.len() <= SHRINK_PERCENT {
            self.resize(self.slots.len() >> 1);
        }
        match removed {
            Slot::Full(item) => Some(item.value),
            _ => unreachable!("located slot is full"),
        }
    }

    fn resize(&mut self, capacity: usize) {
        let capacity = capacity.max(MIN_CAPACITY);
        let old = std::mem::replace(&mut self.slots, vec![Slot::Empty; capacity]);
        for slot in old {
            if let Slot::Full(item) = slot {
                let mut index = item.hash as usize % capacity;
                while let Slot::Full(_) = self.slots[index] {
                    index = (index + 1) % capacity;
                }
                self.slots[index] = Slot::Full(item);
            }
        }
    }

    /// Live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Value)> + '_ {
        self.slots.iter().filter_map(|s| match s {
            Slot::Full(item) => Some((&*item.key, item.value)),
            _ => None,
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        self.iter().map(|(_, v)| v)
    }

    /// The `index`-th live key in slot order.
    pub fn key_at(&self, index: usize) -> Option<&str> {
        self.keys().nth(index)
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut Value> + '_ {
        self.slots.iter_mut().filter_map(|s| match s {
            Slot::Full(item) => Some(&mut item.value),
            _ => None,
        })
    }

    pub(crate) fn heap_size(&self) -> usize {
        self.slots.capacity() * std::mem::size_of::<Slot>()
            + self.iter().map(|(k, _)| k.len()).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn djb2_matches_reference_values() {
        assert_eq!(hash_key(""), 5381);
        assert_eq!(hash_key("a"), 5381 * 33 + 97);
    }

    #[test]
    fn insert_get_overwrite() {
        let mut d = Dict::new();
        d.insert("a", Value::Number(1.0));
        d.insert("b", Value::Number(2.0));
        d.insert("a", Value::Number(3.0));
        assert_eq!(d.len(), 2);
        assert_eq!(d.get("a"), Some(Value::Number(3.0)));
        assert_eq!(d.get("zz"), None);
    }

    #[test]
    fn grows_at_sixty_percent() {
        let mut d = Dict::new();
        for i in 0..5 {
            d.insert(&format!("k{i}"), Value::None);
        }
        assert_eq!(d.capacity(), 8);
        // 5 * 100 / 8 = 62 before the sixth insert
        d.insert("k5", Value::None);
        assert_eq!(d.capacity(), 16);
    }

    #[test]
    fn shrinks_after_removal_but_not_below_minimum() {
        let mut d = Dict::new();
        for i in 0..20 {
            d.insert(&format!("k{i}"), Value::Number(i as f64));
        }
        let grown = d.capacity();
        assert!(grown > MIN_CAPACITY);
        for i in 0..19 {
            assert_eq!(d.remove(&format!("k{i}")), Some(Value::Number(i as f64)));
        }
        assert!(d.capacity() < grown);
        assert_eq!(d.capacity(), MIN_CAPACITY);
        assert_eq!(d.get("k19"), Some(Value::Number(19.0)));
        assert_eq!(d.remove("k19"), Some(Value::Number(19.0)));
        assert_eq!(d.remove("k19"), None);
        assert_eq!(d.capacity(), MIN_CAPACITY);
    }

    #[test]
    fn deleted_slots_do_not_break_lookup() {
        let mut d = Dict::new();
        d.insert("x", Value::Number(1.0));
        d.insert("y", Value::Number(2.0));
        d.insert("z", Value::Number(3.0));
        d.remove("x");
        assert_eq!(d.get("y"), Some(Value::Number(2.0)));
        assert_eq!(d.get("z"), Some(Value::Number(3.0)));
        d.insert("y", Value::Bool(true));
        assert_eq!(d.len(), 2);
        assert_eq!(d.keys().filter(|k| *k == "y").count(), 1);
    }

    #[test]
    fn key_at_walks_slot_order() {
        let mut d = Dict::new();
        d.insert("one", Value::None);
        d.insert("two", Value::None);
        let keys: Vec<&str> = d.keys().collect();
        assert_eq!(d.key_at(0), Some(keys[0]));
        assert_eq!(d.key_at(1), Some(keys[1]));
        assert_eq!(d.key_at(2), None);
    }
}
