//! The flat, offset-linked config store.
//!
//! A true AST would need an arena of boxed nodes in a language with a GC, or a lifetime-laden
//! tree of borrows in Rust; the source's own representation (a single growable buffer of
//! records linked by integer offsets) already IS the index-based arena design the language's
//! borrow checker would otherwise force us to build by hand, so it is kept directly (see
//! SPEC_FULL.md Design Notes). Offset 0 is reserved as the "no more" sentinel; the first real
//! entry therefore lives at offset 1.

use alloc::vec::Vec;

/// A scope is just the offset of its first child entry; 0 means empty / global.
pub type Scope = u32;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum EntryTag {
    Value,
    LoadableEntry,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value<'a> {
    None,
    Boolean(bool),
    Unsigned(u64),
    Signed(i64),
    String(&'a str),
    /// Offset of the nested object's first child entry (0 if the object is empty).
    Object(Scope),
}

impl<'a> Value<'a> {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Unsigned(v) => Some(*v),
            Value::Signed(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Signed(v) => Some(*v),
            Value::Unsigned(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&'a str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<Scope> {
        match self {
            Value::Object(scope) => Some(*scope),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ConfigEntry<'a> {
    pub key: &'a str,
    pub tag: EntryTag,
    pub value: Value<'a>,
    /// Next sibling within the same containing scope; 0 if last.
    pub next_in_scope: u32,
    /// Next top-level loadable entry, independent of `next_in_scope`; 0 if last. Unused
    /// (always 0) for non-`LoadableEntry` tagged records.
    pub next_loadable_entry: u32,
}

/// A loadable top-level entry, as handed back by iteration helpers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadableEntry<'a> {
    pub name: &'a str,
    pub cfg_off: Scope,
}

/// The parsed configuration: a flat buffer of entries plus the two store-wide loadable-entry
/// chain heads.
pub struct Config<'a> {
    // Index 0 is an unused placeholder so offset 1 is the first real entry, matching the
    // sentinel discipline described in spec §9.
    pub(crate) entries: Vec<ConfigEntry<'a>>,
    pub(crate) global_scope_head: u32,
    pub(crate) first_loadable: u32,
    pub(crate) last_loadable: u32,
}

impl<'a> Config<'a> {
    pub(crate) fn entry(&self, off: u32) -> &ConfigEntry<'a> {
        &self.entries[off as usize]
    }

    /// Iterate all direct siblings of `scope` (0 = global) in source order.
    pub fn iter_scope(&self, scope: Scope) -> ScopeIter<'a, '_> {
        let head = if scope == 0 {
            self.global_scope_head
        } else {
            scope
        };
        ScopeIter {
            store: self,
            next: head,
        }
    }

    /// Iterate every top-level loadable entry (`[name]` section) in source order.
    pub fn loadable_entries(&self) -> LoadableIter<'a, '_> {
        LoadableIter {
            store: self,
            next: self.first_loadable,
        }
    }

    /// Look up the first loadable entry with the given name.
    pub fn loadable_entry(&self, name: &str) -> Option<LoadableEntry<'a>> {
        self.loadable_entries().find(|e| e.name == name)
    }
}

pub struct ScopeIter<'a, 'c> {
    store: &'c Config<'a>,
    next: u32,
}

pub struct ScopeEntryRef<'a> {
    pub key: &'a str,
    pub value: Value<'a>,
    pub offset: u32,
}

impl<'a, 'c> Iterator for ScopeIter<'a, 'c> {
    type Item = ScopeEntryRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == 0 {
            return None;
        }
        let off = self.next;
        let entry = self.store.entry(off);
        self.next = entry.next_in_scope;
        Some(ScopeEntryRef {
            key: entry.key,
            value: entry.value,
            offset: off,
        })
    }
}

pub struct LoadableIter<'a, 'c> {
    store: &'c Config<'a>,
    next: u32,
}

impl<'a, 'c> Iterator for LoadableIter<'a, 'c> {
    type Item = LoadableEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == 0 {
            return None;
        }
        let off = self.next;
        let entry = self.store.entry(off);
        self.next = entry.next_loadable_entry;
        let cfg_off = entry.value.as_object().unwrap_or(0);
        Some(LoadableEntry {
            name: entry.key,
            cfg_off,
        })
    }
}
