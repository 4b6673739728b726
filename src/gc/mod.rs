//! Object arena and mark-and-sweep collector.
//!
//! All heap objects live in one `Vec<Option<GcObject>>` addressed by
//! [`ObjRef`] indices; freed slots go on a free list for reuse. Collection is
//! a classic stop-the-world mark and sweep:
//!
//! 1. mark everything reachable from the roots the VM hands in,
//! 2. drop interned strings nobody marked,
//! 3. free every unmarked object and clear the marks of survivors.
//!
//! The heap never decides on its own to collect. The VM asks
//! [`Heap::should_collect`] at instruction boundaries, where every live value
//! is visible in the root set it builds.

use crate::dict::Dict;
use crate::object::{
    Obj, ObjBoundMethod, ObjClass, ObjClosure, ObjEnum, ObjEnumValue, ObjFunction, ObjInstance,
    ObjNative, ObjPackage, ObjString, ObjTask, Upvalue, hash_string,
};
use crate::table::{Key, Table};
use crate::value::Value;

/// Handle to a heap object: an index into the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef(u32);

impl ObjRef {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn from_index(index: u32) -> Self {
        ObjRef(index)
    }
}

#[derive(Debug)]
struct GcObject {
    obj: Obj,
    marked: bool,
    size: usize,
}

/// Statistics about collector activity.
#[derive(Clone, Debug, Default)]
pub struct GcStats {
    pub collections: u64,
    pub total_allocated: u64,
    pub total_freed: u64,
    pub peak_bytes: usize,
}

#[derive(Clone, Debug)]
pub struct GcConfig {
    /// Initial arena capacity, in objects.
    pub initial_capacity: usize,
    /// Bytes allocated before the first collection.
    pub gc_threshold: usize,
    /// After a collection the next threshold is live bytes times this.
    pub growth_factor: f64,
    /// Print a `[GC]` line per collection to stderr.
    pub debug: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 1024,
            gc_threshold: 1024 * 1024, // 1MB
            growth_factor: 2.0,
            debug: false,
        }
    }
}

pub struct Heap {
    objects: Vec<Option<GcObject>>,
    free_list: Vec<u32>,
    /// Intern table: every live string, keyed by itself.
    strings: Table,
    bytes_allocated: usize,
    next_gc: usize,
    /// Nesting depth of disabled regions; collection only runs at zero.
    disabled: u32,
    config: GcConfig,
    stats: GcStats,
}

macro_rules! accessors {
    ($($get:ident, $get_mut:ident => $variant:ident($ty:ty);)*) => {
        $(
            pub fn $get(&self, r: ObjRef) -> &$ty {
                match self.get(r) {
                    Obj::$variant(o) => o,
                    other => unreachable!(concat!("expected ", stringify!($variant), ", found {:?}"), other),
                }
            }

            pub fn $get_mut(&mut self, r: ObjRef) -> &mut $ty {
                match self.get_mut(r) {
                    Obj::$variant(o) => o,
                    other => unreachable!(concat!("expected ", stringify!($variant), ", found {:?}"), other),
                }
            }
        )*
    };
}

impl Heap {
    pub fn new(config: GcConfig) -> Self {
        Heap {
            objects: Vec::with_capacity(config.initial_capacity),
            free_list: Vec::new(),
            strings: Table::new(),
            bytes_allocated: 0,
            next_gc: config.gc_threshold,
            disabled: 0,
            config,
            stats: GcStats::default(),
        }
    }

    // ── Allocation ──────────────────────────────────────────────────

    pub fn alloc(&mut self, obj: Obj) -> ObjRef {
        let size = obj.estimate_size();
        self.bytes_allocated += size;
        self.stats.total_allocated += 1;
        self.stats.peak_bytes = self.stats.peak_bytes.max(self.bytes_allocated);
        let slot = GcObject { obj, marked: false, size };
        match self.free_list.pop() {
            Some(index) => {
                self.objects[index as usize] = Some(slot);
                ObjRef(index)
            }
            None => {
                self.objects.push(Some(slot));
                ObjRef((self.objects.len() - 1) as u32)
            }
        }
    }

    /// Returns the unique string object with these contents.
    pub fn intern(&mut self, s: &str) -> ObjRef {
        let hash = hash_string(s);
        let objects = &self.objects;
        let found = self.strings.find(hash, |r| match &objects[r.index()] {
            Some(GcObject { obj: Obj::String(o), .. }) => &*o.chars == s,
            _ => false,
        });
        if let Some(r) = found {
            return r;
        }
        let r = self.alloc(Obj::String(ObjString { chars: s.into(), hash }));
        self.strings.set(Key { obj: r, hash }, Value::None);
        r
    }

    pub fn intern_value(&mut self, s: &str) -> Value {
        Value::Obj(self.intern(s))
    }

    /// Table key for an interned string.
    pub fn key(&self, r: ObjRef) -> Key {
        Key { obj: r, hash: self.string(r).hash }
    }

    pub fn alloc_list(&mut self, items: Vec<Value>) -> Value {
        Value::Obj(self.alloc(Obj::List(items)))
    }

    pub fn alloc_dict(&mut self, dict: Dict) -> Value {
        Value::Obj(self.alloc(Obj::Dict(dict)))
    }

    // ── Access ──────────────────────────────────────────────────────

    pub fn get(&self, r: ObjRef) -> &Obj {
        match self.objects.get(r.index()) {
            Some(Some(o)) => &o.obj,
            _ => unreachable!("dangling object handle {}", r.index()),
        }
    }

    pub fn get_mut(&mut self, r: ObjRef) -> &mut Obj {
        match self.objects.get_mut(r.index()) {
            Some(Some(o)) => &mut o.obj,
            _ => unreachable!("dangling object handle {}", r.index()),
        }
    }

    pub fn contains(&self, r: ObjRef) -> bool {
        matches!(self.objects.get(r.index()), Some(Some(_)))
    }

    accessors! {
        string, string_mut => String(ObjString);
        function, function_mut => Function(ObjFunction);
        closure, closure_mut => Closure(ObjClosure);
        upvalue, upvalue_mut => Upvalue(Upvalue);
        class, class_mut => Class(ObjClass);
        instance, instance_mut => Instance(ObjInstance);
        bound_method, bound_method_mut => BoundMethod(ObjBoundMethod);
        list, list_mut => List(Vec<Value>);
        dict, dict_mut => Dict(Dict);
        enumeration, enumeration_mut => Enum(ObjEnum);
        enum_value, enum_value_mut => EnumValue(ObjEnumValue);
        package, package_mut => Package(ObjPackage);
        native, native_mut => Native(ObjNative);
        task, task_mut => Task(ObjTask);
    }

    pub fn str(&self, r: ObjRef) -> &str {
        &self.string(r).chars
    }

    /// The string contents if `v` is a string.
    pub fn as_str(&self, v: Value) -> Option<&str> {
        match v {
            Value::Obj(r) => match self.get(r) {
                Obj::String(s) => Some(&s.chars),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn is_string(&self, v: Value) -> bool {
        self.as_str(v).is_some()
    }

    // ── Collection ──────────────────────────────────────────────────

    pub fn should_collect(&self) -> bool {
        self.disabled == 0 && self.bytes_allocated > self.next_gc
    }

    /// Enters a region in which collection is suppressed. Regions nest.
    pub fn pause(&mut self) {
        self.disabled += 1;
    }

    pub fn resume(&mut self) {
        self.disabled = self.disabled.saturating_sub(1);
    }

    pub fn is_paused(&self) -> bool {
        self.disabled > 0
    }

    /// Full mark and sweep from `roots`. Returns the number of objects freed.
    pub fn collect(&mut self, roots: impl IntoIterator<Item = ObjRef>) -> usize {
        self.stats.collections += 1;
        let before = self.bytes_allocated;
        if self.config.debug {
            eprintln!(
                "[GC] Starting collection #{}, {} live objects, {} bytes",
                self.stats.collections,
                self.live_objects(),
                before
            );
        }

        self.mark(roots);
        let objects = &self.objects;
        self.strings.retain(|k| matches!(&objects[k.obj.index()], Some(o) if o.marked));
        let freed = self.sweep();

        self.next_gc = (self.bytes_allocated as f64 * self.config.growth_factor) as usize;
        if self.config.debug {
            eprintln!(
                "[GC] Collection complete, freed {} objects, {} -> {} bytes, next at {}",
                freed, before, self.bytes_allocated, self.next_gc
            );
        }
        freed
    }

    fn mark(&mut self, roots: impl IntoIterator<Item = ObjRef>) {
        let mut worklist: Vec<ObjRef> = roots.into_iter().collect();
        while let Some(r) = worklist.pop() {
            if let Some(Some(o)) = self.objects.get_mut(r.index()) {
                if !o.marked {
                    o.marked = true;
                    o.obj.trace(&mut worklist);
                }
            }
        }
    }

    fn sweep(&mut self) -> usize {
        let mut freed = 0;
        let mut live_bytes = 0;
        for (i, slot) in self.objects.iter_mut().enumerate() {
            let Some(o) = slot else { continue };
            if o.marked {
                o.marked = false;
                // survivors may have grown since allocation
                o.size = o.obj.estimate_size();
                live_bytes += o.size;
            } else {
                *slot = None;
                self.free_list.push(i as u32);
                freed += 1;
            }
        }
        self.stats.total_freed += freed as u64;
        self.bytes_allocated = live_bytes;
        freed
    }

    // ── Introspection ───────────────────────────────────────────────

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn next_gc(&self) -> usize {
        self.next_gc
    }

    pub fn live_objects(&self) -> usize {
        self.objects.len() - self.free_list.len()
    }

    pub fn interned_count(&self) -> usize {
        self.strings.len()
    }

    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    pub fn is_marked(&self, r: ObjRef) -> bool {
        matches!(self.objects.get(r.index()), Some(Some(o)) if o.marked)
    }

    /// Handles of every live object, for invariant checks.
    pub fn live_refs(&self) -> impl Iterator<Item = ObjRef> + '_ {
        self.objects
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.as_ref().map(|_| ObjRef(i as u32)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap() -> Heap {
        Heap::new(GcConfig::default())
    }

    #[test]
    fn interning_returns_same_handle() {
        let mut h = heap();
        let a = h.intern("hello");
        let b = h.intern(&(String::from("hel") + "lo"));
        let c = h.intern("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(h.str(a), "hello");

        let mut t = Table::new();
        t.set(h.key(a), Value::Number(1.0));
        assert_eq!(t.get(h.key(b)), Some(Value::Number(1.0)));
    }

    #[test]
    fn unreachable_objects_are_freed() {
        let mut h = heap();
        let keep = h.alloc(Obj::List(vec![Value::Number(1.0)]));
        for _ in 0..100 {
            h.alloc(Obj::List(vec![Value::None; 10]));
        }
        let before = h.bytes_allocated();
        let freed = h.collect([keep]);
        assert_eq!(freed, 100);
        assert!(h.bytes_allocated() < before);
        assert!(h.contains(keep));
        assert_eq!(h.list(keep), &vec![Value::Number(1.0)]);
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut h = heap();
        let dead = h.alloc(Obj::List(Vec::new()));
        h.collect([]);
        let fresh = h.alloc(Obj::List(Vec::new()));
        assert_eq!(dead.index(), fresh.index());
    }

    #[test]
    fn marking_is_transitive() {
        let mut h = heap();
        let s = h.intern("inner");
        let inner = h.alloc(Obj::List(vec![Value::Obj(s)]));
        let outer = h.alloc(Obj::List(vec![Value::Obj(inner)]));
        h.collect([outer]);
        assert!(h.contains(inner));
        assert!(h.contains(s));
    }

    #[test]
    fn cycles_are_collected() {
        let mut h = heap();
        let a = h.alloc(Obj::List(Vec::new()));
        let b = h.alloc(Obj::List(vec![Value::Obj(a)]));
        h.list_mut(a).push(Value::Obj(b));
        assert_eq!(h.collect([]), 2);
    }

    #[test]
    fn dead_strings_leave_the_intern_table() {
        let mut h = heap();
        let kept = h.intern("kept");
        h.intern("dropped");
        assert_eq!(h.interned_count(), 2);
        h.collect([kept]);
        assert_eq!(h.interned_count(), 1);
        // a fresh intern of the dropped text must allocate a new object
        let again = h.intern("dropped");
        assert!(h.contains(again));
        assert_eq!(h.str(again), "dropped");
        assert_eq!(h.intern("kept"), kept);
    }

    #[test]
    fn collect_is_idempotent_and_clears_marks() {
        let mut h = heap();
        let root = h.alloc(Obj::List(Vec::new()));
        let child = h.intern("child");
        h.list_mut(root).push(Value::Obj(child));
        h.alloc(Obj::List(Vec::new()));
        h.collect([root]);
        let bytes = h.bytes_allocated();
        let live = h.live_objects();
        assert_eq!(h.collect([root]), 0);
        assert_eq!(h.bytes_allocated(), bytes);
        assert_eq!(h.live_objects(), live);
        assert!(h.live_refs().all(|r| !h.is_marked(r)));
    }

    #[test]
    fn threshold_scales_with_growth_factor() {
        let mut h = Heap::new(GcConfig { gc_threshold: 0, growth_factor: 3.0, ..GcConfig::default() });
        let root = h.alloc(Obj::List(vec![Value::None; 64]));
        assert!(h.should_collect());
        h.collect([root]);
        assert_eq!(h.next_gc(), h.bytes_allocated() * 3);
    }

    #[test]
    fn threshold_follows_live_bytes_not_initial_threshold() {
        let mut h = Heap::new(GcConfig { gc_threshold: 1 << 20, ..GcConfig::default() });
        let root = h.alloc(Obj::List(vec![Value::None; 8]));
        h.alloc(Obj::List(vec![Value::None; 256]));
        h.collect([root]);
        assert_eq!(h.next_gc(), h.bytes_allocated() * 2);
        assert!(h.next_gc() < 1 << 20);
    }

    #[test]
    fn pause_regions_nest() {
        let mut h = Heap::new(GcConfig { gc_threshold: 0, ..GcConfig::default() });
        h.alloc(Obj::List(Vec::new()));
        h.pause();
        h.pause();
        h.resume();
        assert!(!h.should_collect());
        h.resume();
        assert!(h.should_collect());
    }
}
