//! Display-name handling: sanitizing and sibling collision suffixes.

use std::collections::HashSet;

use crate::{Result, SiloError};

/// Characters that never survive into a stored display name.
const UNSAFE_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Strip path-unsafe characters and surrounding whitespace from a name.
pub fn sanitize_name(name: &str) -> Result<String> {
    let cleaned: String = name
        .chars()
        .filter(|c| !UNSAFE_CHARS.contains(c) && !c.is_control())
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return Err(SiloError::FileManagement("the name is missing".to_string()));
    }

    Ok(cleaned.to_string())
}

/// Split a name into its base and extension (without the dot).
///
/// A leading dot does not start an extension: `.env` has none.
pub fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => (&name[..idx], Some(&name[idx + 1..])),
        _ => (name, None),
    }
}

/// Parse a trailing ` (N)` counter, returning the text before it and N.
fn trailing_counter(s: &str) -> Option<(&str, u64)> {
    let inner = s.strip_suffix(')')?;
    let open = inner.rfind(" (")?;
    let digits = &inner[open + 2..];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n = digits.parse().ok()?;
    Some((&inner[..open], n))
}

/// Make a name distinct by adding or incrementing a ` (N)` counter.
///
/// `a` becomes `a (1)`, `a (1)` becomes `a (2)`, `report.pdf` becomes
/// `report (1).pdf` and `report (1).pdf` becomes `report (2).pdf`.
pub fn append_unique_counter(name: &str) -> String {
    let name = name.trim();

    if let Some((main, n)) = trailing_counter(name) {
        return format!("{main} ({})", n.saturating_add(1));
    }

    match split_extension(name) {
        (base, Some(ext)) => match trailing_counter(base) {
            Some((main, n)) => format!("{main} ({}).{ext}", n.saturating_add(1)),
            None => format!("{base} (1).{ext}"),
        },
        (base, None) => format!("{base} (1)"),
    }
}

/// Suffix `candidate` until it no longer collides with any name in `taken`.
pub fn unique_name(candidate: &str, taken: &HashSet<String>) -> String {
    let mut name = candidate.to_string();
    while taken.contains(&name) {
        name = append_unique_counter(&name);
    }
    name
}

/// Replace the base of `current` with `new_base`, keeping its extension.
pub fn with_extension_of(current: &str, new_base: &str) -> String {
    match split_extension(current) {
        (_, Some(ext)) => format!("{new_base}.{ext}"),
        (_, None) => new_base.to_string(),
    }
}
