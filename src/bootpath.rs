//! `[disk:partition]/path` resolution (spec §4.2).
//!
//! No direct teacher precedent — `fzboot`'s own kernel-location logic
//! (`fzboot/main/src/boot/mod.rs::locate_kernel_partition`) walks concrete SATA/GPT structures
//! directly rather than parsing a path string — so this follows the config parser's hand-rolled
//! lexing idiom instead (`config::parser`), scaled down to a single small grammar.

use crate::error::PathError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector<'a> {
    ImplicitBoot,
    Index(u64),
    Guid(&'a str),
    Name(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FullPath<'a> {
    pub disk: Selector<'a>,
    pub partition: Selector<'a>,
    pub path: &'a str,
}

/// Consume one selector from `parts` starting at `*idx`, advancing it past whatever tokens
/// that selector used. `guid:` and `name:` selectors consume two `:`-separated tokens (the
/// tag plus the value) since the value itself never contains a colon; a bare integer or
/// `boot` consumes one.
fn consume_selector<'a>(parts: &[&'a str], idx: &mut usize) -> Result<Selector<'a>, PathError> {
    let tok = *parts.get(*idx).ok_or(PathError::Malformed)?;
    match tok {
        "boot" => {
            *idx += 1;
            Ok(Selector::ImplicitBoot)
        }
        "guid" => {
            *idx += 1;
            let v = *parts.get(*idx).ok_or(PathError::Malformed)?;
            *idx += 1;
            Ok(Selector::Guid(v))
        }
        "name" => {
            *idx += 1;
            let v = *parts.get(*idx).ok_or(PathError::Malformed)?;
            *idx += 1;
            Ok(Selector::Name(v))
        }
        _ => {
            *idx += 1;
            tok.parse::<u64>()
                .map(Selector::Index)
                .map_err(|_| PathError::Malformed)
        }
    }
}

/// Parse a full path per spec §4.2: `/abs/path`, `[selector]/path`, or `[disk:partition]/path`.
pub fn parse_path(s: &str) -> Result<FullPath<'_>, PathError> {
    if let Some(stripped) = s.strip_prefix('[') {
        let close = stripped.find(']').ok_or(PathError::Malformed)?;
        let inner = &stripped[..close];
        let rest = &stripped[close + 1..];
        if !rest.starts_with('/') {
            return Err(PathError::Malformed);
        }
        if inner.is_empty() {
            return Err(PathError::Malformed);
        }

        let parts: alloc::vec::Vec<&str> = inner.split(':').collect();
        let mut idx = 0;
        let first = consume_selector(&parts, &mut idx)?;

        let (disk, partition) = if idx == parts.len() {
            // A lone selector disambiguates by kind: `guid:`/`name:` identify a *disk* (spec
            // §4.2's `[guid:...]/k` example), while a bare index or `boot` identify a
            // *partition* on the implicit boot disk.
            match first {
                Selector::Guid(_) | Selector::Name(_) => (first, Selector::ImplicitBoot),
                Selector::Index(_) | Selector::ImplicitBoot => (Selector::ImplicitBoot, first),
            }
        } else {
            let second = consume_selector(&parts, &mut idx)?;
            if idx != parts.len() {
                return Err(PathError::Malformed);
            }
            (first, second)
        };

        return Ok(FullPath {
            disk,
            partition,
            path: rest,
        });
    }

    if s.starts_with('/') {
        return Ok(FullPath {
            disk: Selector::ImplicitBoot,
            partition: Selector::ImplicitBoot,
            path: s,
        });
    }

    Err(PathError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_path_is_fully_implicit() {
        let p = parse_path("/a/b.bin").unwrap();
        assert_eq!(p.disk, Selector::ImplicitBoot);
        assert_eq!(p.partition, Selector::ImplicitBoot);
        assert_eq!(p.path, "/a/b.bin");
    }

    #[test]
    fn single_selector_targets_partition_on_boot_disk() {
        let p = parse_path("[2]/k.elf").unwrap();
        assert_eq!(p.disk, Selector::ImplicitBoot);
        assert_eq!(p.partition, Selector::Index(2));
        assert_eq!(p.path, "/k.elf");
    }

    #[test]
    fn lone_guid_selector_targets_disk_with_implicit_partition() {
        let p = parse_path("[guid:00112233-4455-6677-8899-aabbccddeeff]/k").unwrap();
        assert_eq!(p.disk, Selector::Guid("00112233-4455-6677-8899-aabbccddeeff"));
        assert_eq!(p.partition, Selector::ImplicitBoot);
        assert_eq!(p.path, "/k");
    }

    #[test]
    fn guid_selector_on_disk_with_implicit_partition() {
        let p = parse_path("[guid:00112233-4455-6677-8899-aabbccddeeff:boot]/k").unwrap();
        assert_eq!(p.disk, Selector::Guid("00112233-4455-6677-8899-aabbccddeeff"));
        assert_eq!(p.partition, Selector::ImplicitBoot);
        assert_eq!(p.path, "/k");
    }

    #[test]
    fn name_selector_both_sides() {
        let p = parse_path("[name:disk0:name:esp]/vmlinuz").unwrap();
        assert_eq!(p.disk, Selector::Name("disk0"));
        assert_eq!(p.partition, Selector::Name("esp"));
    }

    #[test]
    fn missing_leading_slash_after_bracket_is_malformed() {
        assert!(parse_path("[2]k.elf").is_err());
    }

    #[test]
    fn unterminated_bracket_is_malformed() {
        assert!(parse_path("[2/k.elf").is_err());
    }

    #[test]
    fn bare_relative_path_is_malformed() {
        assert!(parse_path("k.elf").is_err());
    }
}
