//! Text normalization and stable id helpers.
//!
//! These mimic the fingerprinting conventions used when computing entity
//! ids from names: ids must stay stable across runs, so the normalization
//! here is deliberately simple and frozen.

/// Collapse whitespace and return `None` for effectively empty input.
///
/// # Examples
///
/// ```
/// use entiq::util::clean_string;
///
/// assert_eq!(clean_string(" foo\n bar"), Some("foo bar".to_string()));
/// assert_eq!(clean_string("   "), None);
/// ```
#[must_use]
pub fn clean_string(value: &str) -> Option<String> {
    let cleaned = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Clean a value and return it only if it still contains word characters.
///
/// Strings made up entirely of punctuation (`"- - . *"`) are not names.
#[must_use]
pub fn clean_name(value: &str) -> Option<String> {
    let cleaned = clean_string(value)?;
    if cleaned.chars().any(char::is_alphanumeric) {
        Some(cleaned)
    } else {
        None
    }
}

/// Turn a value into a lowercase ascii-ish slug.
///
/// Non-alphanumeric runs collapse into a single separator.
#[must_use]
pub fn slugify(value: &str, sep: char) -> Option<String> {
    let mut out = String::with_capacity(value.len());
    let mut pending_sep = false;
    for ch in value.chars() {
        if ch.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push(sep);
            }
            pending_sep = false;
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
        } else {
            pending_sep = true;
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Create a stable, simplified fingerprint: sorted unique lowercase tokens.
///
/// # Examples
///
/// ```
/// use entiq::util::make_fingerprint;
///
/// assert_eq!(make_fingerprint("Mrs. Jane Doe"), Some("doe jane mrs".to_string()));
/// assert_eq!(make_fingerprint("#"), None);
/// ```
#[must_use]
pub fn make_fingerprint(value: &str) -> Option<String> {
    let name = clean_name(value)?;
    let slug = slugify(&name, '-')?;
    let mut tokens: Vec<&str> = slug.split('-').collect();
    tokens.sort_unstable();
    tokens.dedup();
    Some(tokens.join(" "))
}

/// Hash an ordered list of parts into a stable hex id.
fn hash_parts<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\x1e");
    }
    hasher.finalize().to_hex().to_string()
}

/// Compute a hash id from cleaned values; `None` if any part cleans to nothing.
#[must_use]
pub fn make_string_id(values: &[&str]) -> Option<String> {
    let cleaned: Option<Vec<String>> = values.iter().map(|v| clean_name(v)).collect();
    let cleaned = cleaned?;
    Some(hash_parts(cleaned.iter().map(String::as_str)))
}

/// Compute a hash id from value fingerprints; `None` if any part is not
/// fingerprintable.
#[must_use]
pub fn make_fingerprint_id(values: &[&str]) -> Option<String> {
    let prints: Option<Vec<String>> = values.iter().map(|v| make_fingerprint(v)).collect();
    let prints = prints?;
    Some(hash_parts(prints.iter().map(String::as_str)))
}

/// Join parts into a slug, shortening with a hash suffix past `max_len`.
///
/// With `strict` set, any `None`-slugifying part voids the whole slug.
#[must_use]
pub fn join_slug(parts: &[&str], sep: char, strict: bool, max_len: usize) -> Option<String> {
    let sections: Vec<Option<String>> = parts.iter().map(|p| slugify(p, sep)).collect();
    if strict && sections.iter().any(Option::is_none) {
        return None;
    }
    let texts: Vec<String> = sections.into_iter().flatten().collect();
    if texts.is_empty() {
        return None;
    }
    let slug = texts.join(&sep.to_string());
    if slug.len() <= max_len {
        return Some(slug);
    }
    // shorten but keep uniqueness
    let ident = &hash_parts([slug.as_str()])[..8];
    let cut = slug
        .char_indices()
        .take_while(|(i, _)| *i < max_len.saturating_sub(9))
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .unwrap_or(0);
    let head = slug[..cut].trim_matches(sep);
    Some(format!("{head}{sep}{ident}"))
}

/// Normalize a country code for counting: trimmed and lowercased.
#[must_use]
pub fn clean_country(value: &str) -> Option<String> {
    clean_string(value).map(|c| c.to_lowercase())
}

/// Extract the year from an ISO date string.
#[must_use]
pub fn get_year_from_iso(value: &str) -> Option<i32> {
    let cleaned = clean_string(value)?;
    let head: String = cleaned.chars().take(4).collect();
    head.parse().ok()
}
