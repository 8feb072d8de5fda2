//! Typed lookup API over a parsed [`Config`](crate::config::store::Config).
//!
//! Implements the four lookup flavours from spec §4.1: a unique accessor per type that errors
//! on a second occurrence, a `first`-of variant that tolerates duplicates, a type-bitmask
//! accessor that reports which variant actually matched, and a `next` family for walking
//! repeated keys (used for `module = ...` entries, which may repeat within a loadable entry).

use crate::config::store::{Config, Scope, Value};
use crate::error::ConfigSemanticError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueKind(u8);

impl ValueKind {
    pub const NONE: Self = Self(1 << 0);
    pub const BOOL: Self = Self(1 << 1);
    pub const UNSIGNED: Self = Self(1 << 2);
    pub const SIGNED: Self = Self(1 << 3);
    pub const STRING: Self = Self(1 << 4);
    pub const OBJECT: Self = Self(1 << 5);
    pub const ANY: Self = Self(0b11_1111);

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    fn matches(self, v: &Value<'_>) -> bool {
        self.0 & kind_of(v).0 != 0
    }
}

fn kind_of(v: &Value<'_>) -> ValueKind {
    match v {
        Value::None => ValueKind::NONE,
        Value::Boolean(_) => ValueKind::BOOL,
        Value::Unsigned(_) => ValueKind::UNSIGNED,
        Value::Signed(_) => ValueKind::SIGNED,
        Value::String(_) => ValueKind::STRING,
        Value::Object(_) => ValueKind::OBJECT,
    }
}

impl<'a> Config<'a> {
    /// Unique lookup restricted to `mask`: errors if a second entry with `key` exists
    /// anywhere in `scope` (regardless of its type), errors if the single match's type is not
    /// in `mask`, returns `Ok(None)` if absent.
    pub fn get_one_of(
        &self,
        scope: Scope,
        key: &str,
        mask: ValueKind,
    ) -> Result<Option<(Value<'a>, u32)>, ConfigSemanticError> {
        let mut found: Option<(Value<'a>, u32)> = None;
        for e in self.iter_scope(scope) {
            if e.key != key {
                continue;
            }
            if found.is_some() {
                return Err(ConfigSemanticError::DuplicateUniqueKey { key: leak_key(key) });
            }
            found = Some((e.value, e.offset));
        }
        match found {
            None => Ok(None),
            Some((v, off)) if mask.matches(&v) => Ok(Some((v, off))),
            Some(_) => Err(ConfigSemanticError::WrongType { key: leak_key(key) }),
        }
    }

    /// As [`Config::get_one_of`] but tolerates duplicates, returning the first match.
    pub fn get_first_one_of(
        &self,
        scope: Scope,
        key: &str,
        mask: ValueKind,
    ) -> Result<Option<(Value<'a>, u32)>, ConfigSemanticError> {
        for e in self.iter_scope(scope) {
            if e.key != key {
                continue;
            }
            return if mask.matches(&e.value) {
                Ok(Some((e.value, e.offset)))
            } else {
                Err(ConfigSemanticError::WrongType { key: leak_key(key) })
            };
        }
        Ok(None)
    }

    /// Continue scanning after `prev_offset` (as returned by a previous lookup) for the next
    /// sibling with the same `key`. `strict` raises `WrongType` if a match is found whose
    /// type is outside `mask`; non-strict returns it anyway so the caller can inspect it.
    pub fn get_next_one_of(
        &self,
        prev_offset: u32,
        key: &str,
        mask: ValueKind,
        strict: bool,
    ) -> Result<Option<(Value<'a>, u32)>, ConfigSemanticError> {
        let mut cursor = self.entry(prev_offset).next_in_scope;
        while cursor != 0 {
            let e = self.entry(cursor);
            if e.key == key {
                if !mask.matches(&e.value) && strict {
                    return Err(ConfigSemanticError::WrongType { key: leak_key(key) });
                }
                return Ok(Some((e.value, cursor)));
            }
            cursor = e.next_in_scope;
        }
        Ok(None)
    }

    pub fn get_next(&self, prev_offset: u32, key: &str) -> Option<(Value<'a>, u32)> {
        self.get_next_one_of(prev_offset, key, ValueKind::ANY, false)
            .ok()
            .flatten()
    }

    pub fn get_bool(&self, scope: Scope, key: &str) -> Result<Option<bool>, ConfigSemanticError> {
        Ok(self
            .get_one_of(scope, key, ValueKind::BOOL)?
            .and_then(|(v, _)| v.as_bool()))
    }

    pub fn get_u64(&self, scope: Scope, key: &str) -> Result<Option<u64>, ConfigSemanticError> {
        Ok(self
            .get_one_of(scope, key, ValueKind::UNSIGNED)?
            .and_then(|(v, _)| v.as_u64()))
    }

    pub fn get_i64(&self, scope: Scope, key: &str) -> Result<Option<i64>, ConfigSemanticError> {
        Ok(self
            .get_one_of(scope, key, ValueKind::SIGNED)?
            .and_then(|(v, _)| v.as_i64()))
    }

    pub fn get_str(&self, scope: Scope, key: &str) -> Result<Option<&'a str>, ConfigSemanticError> {
        Ok(self
            .get_one_of(scope, key, ValueKind::STRING)?
            .and_then(|(v, _)| v.as_str()))
    }

    pub fn get_object(&self, scope: Scope, key: &str) -> Result<Option<Scope>, ConfigSemanticError> {
        Ok(self
            .get_one_of(scope, key, ValueKind::OBJECT)?
            .and_then(|(v, _)| v.as_object()))
    }

    pub fn get_first_str(&self, scope: Scope, key: &str) -> Result<Option<&'a str>, ConfigSemanticError> {
        Ok(self
            .get_first_one_of(scope, key, ValueKind::STRING)?
            .and_then(|(v, _)| v.as_str()))
    }
}

/// Keys are always `'static` string literals from the recognized-key table (spec §6); config
/// text itself never supplies a key that ends up embedded in an error, only the static name
/// it was looked up under, so there is nothing to leak here beyond the call site's own
/// constant.
fn leak_key(key: &str) -> &'static str {
    match key {
        "binary" => "binary",
        "module" => "module",
        "cmdline" => "cmdline",
        "video-mode" => "video-mode",
        "stack" => "stack",
        "name" => "name",
        "path" => "path",
        "allocate-anywhere" => "allocate-anywhere",
        "width" => "width",
        "height" => "height",
        "bpp" => "bpp",
        "constraint" => "constraint",
        "allocate-at" => "allocate-at",
        "size" => "size",
        _ => "<key>",
    }
}

/// Raise `MissingKey` if the mandatory lookup came back empty; otherwise unwrap it.
pub fn mandatory<T>(
    lookup: Result<Option<T>, ConfigSemanticError>,
    key: &'static str,
) -> Result<T, ConfigSemanticError> {
    match lookup? {
        Some(v) => Ok(v),
        None => Err(ConfigSemanticError::MissingKey { key }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse;

    #[test]
    fn unique_duplicate_key_is_an_error() {
        let cfg = parse("[a]\nbinary=\"/x\"\nbinary=\"/y\"\n").unwrap();
        let entry = cfg.loadable_entry("a").unwrap();
        let err = cfg.get_str(entry.cfg_off, "binary").unwrap_err();
        assert!(matches!(err, ConfigSemanticError::DuplicateUniqueKey { .. }));
    }

    #[test]
    fn first_and_next_walk_duplicates() {
        let cfg = parse("[a]\nmodule=\"/one\"\nmodule=\"/two\"\n").unwrap();
        let entry = cfg.loadable_entry("a").unwrap();
        let (first, off) = cfg
            .get_first_one_of(entry.cfg_off, "module", ValueKind::STRING)
            .unwrap()
            .unwrap();
        assert_eq!(first.as_str(), Some("/one"));
        let (second, off2) = cfg.get_next(off, "module").unwrap();
        assert_eq!(second.as_str(), Some("/two"));
        assert!(cfg.get_next(off2, "module").is_none());
    }

    #[test]
    fn mandatory_missing_key_errors() {
        let cfg = parse("[a]\n").unwrap();
        let entry = cfg.loadable_entry("a").unwrap();
        let result = mandatory(cfg.get_str(entry.cfg_off, "binary"), "binary");
        assert!(matches!(result, Err(ConfigSemanticError::MissingKey { key: "binary" })));
    }

    #[test]
    fn wrong_type_is_reported() {
        let cfg = parse("[a]\nbinary = true\n").unwrap();
        let entry = cfg.loadable_entry("a").unwrap();
        let err = cfg.get_str(entry.cfg_off, "binary").unwrap_err();
        assert!(matches!(err, ConfigSemanticError::WrongType { .. }));
    }
}
