//! String utilities
//!
//! Email normalization and log-safe redaction.

/// Safely truncate a string at a character boundary
pub fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Canonical form of an email address used as a storage key
///
/// # Example
/// ```
/// use postcard_studio::utils::normalize_email;
///
/// assert_eq!(normalize_email("  Ana@Example.COM "), "ana@example.com");
/// ```
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Redact an email for logs, keeping the first two characters of the local
/// part and the full domain
///
/// # Example
/// ```
/// use postcard_studio::utils::mask_email;
///
/// assert_eq!(mask_email("ana.maria@example.com"), "an***@example.com");
/// ```
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => format!("{}***@{}", truncate_str(local, 2), domain),
        None => format!("{}***", truncate_str(email, 2)),
    }
}

/// Trimmed value, or `None` when empty
pub fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_multibyte() {
        assert_eq!(truncate_str("Ünïcödé", 3), "Ünï");
        assert_eq!(truncate_str("ab", 10), "ab");
    }

    #[test]
    fn test_mask_email_short_local_part() {
        assert_eq!(mask_email("a@example.com"), "a***@example.com");
        assert_eq!(mask_email("not-an-email"), "no***");
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(Some("  x ")), Some("x".to_string()));
        assert_eq!(non_empty(Some("   ")), None);
        assert_eq!(non_empty(None), None);
    }
}
