//! Identifier derivation helpers.
//!
//! Slugs are the engine's table and column names: lowercased, with runs of
//! non-alphanumeric characters collapsed to a single underscore. The
//! transformation is deterministic and idempotent, so a slug can be re-fed
//! through `slugify` without changing.

/// Derive a slug from a display name.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for ch in name.chars() {
        if ch.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            for low in ch.to_lowercase() {
                out.push(low);
            }
        } else {
            pending_sep = true;
        }
    }
    out
}

/// Naive English plural, used when a reciprocal collection name is
/// synthesized from a model name.
pub fn pluralize(name: &str) -> String {
    let lower = name.to_lowercase();
    if let Some(stem) = lower.strip_suffix('y') {
        let penultimate = stem.chars().last();
        if !matches!(penultimate, Some('a' | 'e' | 'i' | 'o' | 'u')) {
            return format!("{}ies", stem);
        }
    }
    if lower.ends_with('s')
        || lower.ends_with('x')
        || lower.ends_with('z')
        || lower.ends_with("ch")
        || lower.ends_with("sh")
    {
        return format!("{}es", lower);
    }
    format!("{}s", lower)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_separator_runs() {
        assert_eq!(slugify("OOOOOO mmmmm   ZZZZZZZZZZ"), "oooooo_mmmmm_zzzzzzzzzz");
    }

    #[test]
    fn slugify_is_idempotent() {
        let once = slugify("Some Field Name!");
        assert_eq!(once, "some_field_name");
        assert_eq!(slugify(&once), once);
    }

    #[test]
    fn slugify_trims_leading_and_trailing_separators() {
        assert_eq!(slugify("  padded out  "), "padded_out");
        assert_eq!(slugify("--dashed--"), "dashed");
    }

    #[test]
    fn pluralize_covers_common_endings() {
        assert_eq!(pluralize("yellow"), "yellows");
        assert_eq!(pluralize("box"), "boxes");
        assert_eq!(pluralize("category"), "categories");
        assert_eq!(pluralize("day"), "days");
        assert_eq!(pluralize("branch"), "branches");
    }
}
