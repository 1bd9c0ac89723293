//! Method resolution and the epoch-tagged per-class caches.
//!
//! `lookup` walks prepended modules (most recent first), then the class's own
//! table, then included modules (most recent first), then the superclass,
//! recursively. Results, including negative ones, are cached per class; a
//! cache is trusted only while its stored epoch equals the state's method
//! epoch, which every lookup-affecting mutation increments.

use super::heap::Heap;
use super::value::{GcRef, SymId, Value};

/// Method visibility. Private methods require an implicit receiver;
/// protected methods require the caller's self to share the receiver's
/// class hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Public,
    Protected,
    Private,
}

/// A successful lookup: the method value and the class or module whose table
/// defined it (the anchor for `super`).
#[derive(Debug, Clone, Copy)]
pub struct Resolved {
    pub method: Value,
    pub owner: GcRef,
}

/// Resolve an instance method through the full chain, consulting and filling
/// the class's cache.
pub fn lookup(heap: &mut Heap, epoch: u64, class: GcRef, name: SymId) -> Option<Resolved> {
    {
        let c = heap.class_mut(class);
        if c.cache.epoch != epoch {
            c.cache.entries.clear();
            c.cache.epoch = epoch;
        } else if let Some(cached) = c.cache.entries.get(&name) {
            return *cached;
        }
    }
    let found = lookup_uncached(heap, class, name);
    heap.class_mut(class).cache.entries.insert(name, found);
    found
}

fn lookup_uncached(heap: &Heap, class: GcRef, name: SymId) -> Option<Resolved> {
    let c = heap.class(class);
    for module in c.prepends.iter().rev() {
        if let Some(found) = lookup_in_module(heap, *module, name) {
            return Some(found);
        }
    }
    if let Some(method) = c.methods.get(&name) {
        return Some(Resolved {
            method: *method,
            owner: class,
        });
    }
    for module in c.includes.iter().rev() {
        if let Some(found) = lookup_in_module(heap, *module, name) {
            return Some(found);
        }
    }
    c.superclass
        .and_then(|sup| lookup_uncached(heap, sup, name))
}

/// Modules resolve through their own chain too (a module may include others).
fn lookup_in_module(heap: &Heap, module: GcRef, name: SymId) -> Option<Resolved> {
    lookup_uncached(heap, module, name)
}

/// Resolve a method as seen from `start`'s superclass upward; used by
/// `super`, which anchors at the defining method's class, not the receiver's.
pub fn lookup_super(heap: &Heap, defining: GcRef, name: SymId) -> Option<Resolved> {
    let sup = heap.class(defining).superclass?;
    lookup_uncached(heap, sup, name)
}

/// Resolve a singleton (class-level) method: the class's own singleton table
/// first, then superclass singleton tables, consulting the singleton cache.
pub fn lookup_singleton(heap: &mut Heap, epoch: u64, class: GcRef, name: SymId) -> Option<Resolved> {
    {
        let c = heap.class_mut(class);
        if c.singleton_cache.epoch != epoch {
            c.singleton_cache.entries.clear();
            c.singleton_cache.epoch = epoch;
        } else if let Some(cached) = c.singleton_cache.entries.get(&name) {
            return *cached;
        }
    }
    let found = singleton_uncached(heap, class, name);
    heap.class_mut(class)
        .singleton_cache
        .entries
        .insert(name, found);
    found
}

fn singleton_uncached(heap: &Heap, class: GcRef, name: SymId) -> Option<Resolved> {
    let c = heap.class(class);
    if let Some(method) = c.singleton.get(&name) {
        return Some(Resolved {
            method: *method,
            owner: class,
        });
    }
    // Extended modules contribute singleton methods through includes of the
    // singleton conceptually; here class methods inherit through the super
    // chain only.
    c.superclass
        .and_then(|sup| singleton_uncached(heap, sup, name))
}

/// Whether `class` is `ancestor` or has it anywhere in its chain (supers,
/// includes, prepends). Drives `is_a?` and protected-visibility checks.
pub fn is_descendant(heap: &Heap, class: GcRef, ancestor: GcRef) -> bool {
    if class == ancestor {
        return true;
    }
    let c = heap.class(class);
    if c.includes.iter().chain(c.prepends.iter()).any(|m| {
        *m == ancestor || is_descendant(heap, *m, ancestor)
    }) {
        return true;
    }
    match c.superclass {
        Some(sup) => is_descendant(heap, sup, ancestor),
        None => false,
    }
}

/// The ancestor list in resolution order, for `Class#ancestors`.
pub fn ancestors(heap: &Heap, class: GcRef) -> Vec<GcRef> {
    let mut out = Vec::new();
    let mut cur = Some(class);
    while let Some(r) = cur {
        let c = heap.class(r);
        out.extend(c.prepends.iter().rev().copied());
        out.push(r);
        out.extend(c.includes.iter().rev().copied());
        cur = c.superclass;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::heap::{ClassObj, Interner, Obj};

    fn setup() -> (Heap, Interner) {
        (Heap::new(1024, false), Interner::new())
    }

    fn new_class(heap: &mut Heap, syms: &mut Interner, name: &str, sup: Option<GcRef>) -> GcRef {
        let name = syms.intern(name);
        heap.alloc(Obj::Class(ClassObj::new(name, sup, false)))
    }

    fn def(heap: &mut Heap, syms: &mut Interner, class: GcRef, name: &str, marker: i64) -> SymId {
        let id = syms.intern(name);
        heap.class_mut(class).methods.insert(id, Value::Int(marker));
        id
    }

    #[test]
    fn test_own_then_super() {
        let (mut heap, mut syms) = setup();
        let a = new_class(&mut heap, &mut syms, "A", None);
        let b = new_class(&mut heap, &mut syms, "B", Some(a));
        let f = def(&mut heap, &mut syms, a, "f", 1);
        def(&mut heap, &mut syms, b, "g", 2);

        let hit = lookup(&mut heap, 1, b, f).unwrap();
        assert_eq!(hit.method, Value::Int(1));
        assert_eq!(hit.owner, a);
    }

    #[test]
    fn test_prepend_wins_over_own() {
        let (mut heap, mut syms) = setup();
        let c = new_class(&mut heap, &mut syms, "C", None);
        let m = new_class(&mut heap, &mut syms, "M", None);
        let f = def(&mut heap, &mut syms, c, "f", 1);
        heap.class_mut(m).methods.insert(f, Value::Int(2));
        heap.class_mut(c).prepends.push(m);

        let hit = lookup(&mut heap, 1, c, f).unwrap();
        assert_eq!(hit.method, Value::Int(2));
        assert_eq!(hit.owner, m);
    }

    #[test]
    fn test_include_loses_to_own_wins_over_super() {
        let (mut heap, mut syms) = setup();
        let a = new_class(&mut heap, &mut syms, "A", None);
        let b = new_class(&mut heap, &mut syms, "B", Some(a));
        let m = new_class(&mut heap, &mut syms, "M", None);
        let f = def(&mut heap, &mut syms, a, "f", 1);
        heap.class_mut(m).methods.insert(f, Value::Int(2));
        heap.class_mut(b).includes.push(m);

        // B has no own f: include beats super
        let hit = lookup(&mut heap, 1, b, f).unwrap();
        assert_eq!(hit.method, Value::Int(2));

        // own f beats include
        heap.class_mut(b).methods.insert(f, Value::Int(3));
        let hit = lookup(&mut heap, 2, b, f).unwrap();
        assert_eq!(hit.method, Value::Int(3));
    }

    #[test]
    fn test_stale_cache_is_discarded() {
        let (mut heap, mut syms) = setup();
        let a = new_class(&mut heap, &mut syms, "A", None);
        let f = def(&mut heap, &mut syms, a, "f", 1);

        assert_eq!(lookup(&mut heap, 1, a, f).unwrap().method, Value::Int(1));
        // mutate and bump the epoch: the cache must not serve the old method
        heap.class_mut(a).methods.insert(f, Value::Int(9));
        assert_eq!(lookup(&mut heap, 2, a, f).unwrap().method, Value::Int(9));
    }

    #[test]
    fn test_negative_lookup_cached() {
        let (mut heap, mut syms) = setup();
        let a = new_class(&mut heap, &mut syms, "A", None);
        let missing = syms.intern("missing");
        assert!(lookup(&mut heap, 1, a, missing).is_none());
        assert!(heap.class(a).cache.entries.contains_key(&missing));
    }

    #[test]
    fn test_super_anchors_at_defining_class() {
        let (mut heap, mut syms) = setup();
        let a = new_class(&mut heap, &mut syms, "A", None);
        let b = new_class(&mut heap, &mut syms, "B", Some(a));
        let c = new_class(&mut heap, &mut syms, "C", Some(b));
        let f = def(&mut heap, &mut syms, a, "f", 1);
        heap.class_mut(b).methods.insert(f, Value::Int(2));
        heap.class_mut(c).methods.insert(f, Value::Int(3));

        // super from the method defined on B resolves A's, regardless of the
        // receiver being a C
        let hit = lookup_super(&heap, b, f).unwrap();
        assert_eq!(hit.method, Value::Int(1));
    }

    #[test]
    fn test_is_descendant_through_modules() {
        let (mut heap, mut syms) = setup();
        let a = new_class(&mut heap, &mut syms, "A", None);
        let b = new_class(&mut heap, &mut syms, "B", Some(a));
        let m = new_class(&mut heap, &mut syms, "M", None);
        heap.class_mut(b).includes.push(m);
        assert!(is_descendant(&heap, b, a));
        assert!(is_descendant(&heap, b, m));
        assert!(!is_descendant(&heap, a, b));
    }
}
