//! Archive-internal path handling.
//!
//! Codec-reported paths are split on either separator; nothing a codec says
//! is trusted to name a destination file until every component has survived
//! [`sanitize_component`].

use std::path::PathBuf;

/// Split an archive-internal path into its non-empty components. Both
/// separators occur in the wild, depending on which platform produced the
/// container.
pub fn split_components(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(|c| c == '/' || c == '\\')
        .filter(|part| !part.is_empty())
}

/// Sanitize one path component for use in a destination path.
///
/// Rejects empty and dot components outright, and any component containing
/// control characters or non-space separator characters; the survivor is
/// NFC-normalized. Returns `None` for a component that cannot be represented
/// safely.
pub fn sanitize_component(component: &str) -> Option<String> {
    use unic_normal::StrNormalForm;
    use unic_ucd::GeneralCategory;

    let trimmed = component.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        return None;
    }

    let unsafe_char = trimmed.chars().any(|c| {
        let cat = GeneralCategory::of(c);
        cat == GeneralCategory::Control || (cat.is_separator() && c != ' ')
    });
    if unsafe_char {
        return None;
    }

    Some(trimmed.nfc().collect())
}

/// Sanitize a whole component chain into a relative `PathBuf`, failing if
/// any component is unrepresentable.
pub fn sanitize_relative<'a>(components: impl Iterator<Item = &'a str>) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in components {
        out.push(sanitize_component(component)?);
    }
    if out.as_os_str().is_empty() {
        return None;
    }
    Some(out)
}
