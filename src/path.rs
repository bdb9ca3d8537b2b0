//! Path splitting helpers.
//!
//! Grounded on `src/dll/path.c`'s `FspPathPrefix`/`FspPathSuffix`/
//! `FspPathCombine`, which mutate a `PWSTR` buffer in place by overwriting
//! one `\` separator with a null terminator. Paths here are modeled as
//! `\`-separated `&str` (NT paths are UTF-16, but the separator logic is
//! ASCII and the rest is opaque to these helpers), and the in-place
//! overwrite becomes a borrow split — no allocation, matching the spirit of
//! the original.

const SEP: u8 = b'\\';

/// Splits `path` into its first component (`prefix`) and the remainder
/// (`remain`), skipping any run of repeated separators between them.
///
/// `root` substitutes for an empty prefix when `path` itself starts with a
/// separator (i.e. an absolute path's leading `\` is reported as `root`
/// rather than an empty string), mirroring `FspPathPrefix`'s `Root`
/// parameter.
pub fn split_prefix<'a>(path: &'a str, root: Option<&'a str>) -> (&'a str, &'a str) {
    let bytes = path.as_bytes();
    match memchr::memchr(SEP, bytes) {
        None => (path, ""),
        Some(i) => {
            let prefix = if i == 0 {
                root.unwrap_or(&path[..0])
            } else {
                &path[..i]
            };
            let mut j = i + 1;
            while j < bytes.len() && bytes[j] == SEP {
                j += 1;
            }
            (prefix, &path[j..])
        }
    }
}

/// Splits `path` into everything but the last component (`remain`) and the
/// last component itself (`suffix`).
///
/// If `path` has no separator, `remain` is empty and `suffix` is the whole
/// path. If `path` is exactly one separator followed by a single
/// component (e.g. `\Foo`), `remain` is `root` if given, else the
/// separator itself, matching `FspPathSuffix`.
pub fn split_suffix<'a>(path: &'a str, root: Option<&'a str>) -> (&'a str, &'a str) {
    let bytes = path.as_bytes();
    let mut remain_end = None;
    let mut suffix_start = None;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == SEP {
            let sep_at = i;
            i += 1;
            while i < bytes.len() && bytes[i] == SEP {
                i += 1;
            }
            remain_end = Some(sep_at);
            suffix_start = Some(i);
        } else {
            i += 1;
        }
    }
    match suffix_start {
        None => ("", path),
        Some(s) => {
            let remain_end = remain_end.unwrap();
            let remain = if remain_end == 0 && bytes[0] == SEP {
                root.unwrap_or(&path[..1])
            } else {
                &path[..remain_end]
            };
            (remain, &path[s..])
        }
    }
}

/// Rejoins a `prefix`/`suffix` pair produced by [`split_prefix`] (or the
/// original owning buffer of one) back into a single path, replacing the
/// null gap with a separator. Since this crate doesn't mutate a shared
/// buffer in place, rejoining is just concatenation with a single
/// separator — provided as the inverse of [`split_prefix`]/[`split_suffix`]
/// so splitting and rejoining a path round-trips.
pub fn combine(prefix: &str, suffix: &str) -> String {
    if prefix.is_empty() {
        suffix.to_string()
    } else if suffix.is_empty() {
        prefix.to_string()
    } else if prefix.ends_with('\\') {
        format!("{prefix}{suffix}")
    } else {
        format!("{prefix}\\{suffix}")
    }
}

/// Iterates the ancestor prefixes of an absolute path from the root
/// downward, used by the traverse walk in the access-check pipeline. For
/// `\A\B\C` this yields `\`, `\A`, `\A\B` (not the full path itself — the
/// leaf is handled separately).
pub fn ancestor_prefixes(path: &str) -> impl Iterator<Item = &str> {
    let bytes = path.as_bytes();
    let mut idx = 0usize;
    let mut done = false;
    std::iter::from_fn(move || {
        if done {
            return None;
        }
        if idx == 0 {
            idx = 1;
            if bytes.first() == Some(&SEP) {
                return Some(&path[..1]);
            }
            done = true;
            return None;
        }
        match bytes[idx..].iter().position(|&b| b == SEP) {
            Some(rel) => {
                let next = idx + rel;
                // Only yield if there is more path after this separator
                // (otherwise this separator belongs to the leaf, not an
                // ancestor).
                let mut after = next + 1;
                while after < bytes.len() && bytes[after] == SEP {
                    after += 1;
                }
                if after >= bytes.len() {
                    done = true;
                    return None;
                }
                idx = after;
                Some(&path[..next])
            }
            None => {
                done = true;
                None
            }
        }
    })
}
