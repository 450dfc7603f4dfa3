//! Namespace sanitization for MongoDB compatibility.
//!
//! Filters and updates are passed to the server verbatim, so only names are touched:
//! MongoDB rejects collection names containing `$` or null bytes, and empty names.

/// Sanitizes collection and bucket names.
pub(crate) struct NameSanitizer;

impl NameSanitizer {
    /// Character replacements for sanitization
    const REPLACEMENTS: [(&'static str, &'static str); 2] = [
        ("$", "__dollar__"),
        ("\0", "__null__"),
    ];

    /// Placeholder used for an empty name.
    const EMPTY: &'static str = "__empty__";

    /// Sanitizes a name by replacing problematic characters with safe escaped versions.
    pub(crate) fn sanitize(input: &str) -> String {
        if input.is_empty() {
            return Self::EMPTY.to_string();
        }

        let mut sanitized = input.to_string();
        for (target, replacement) in Self::REPLACEMENTS.iter() {
            sanitized = sanitized.replace(*target, *replacement);
        }
        sanitized
    }
}
