/// Words that may not be used bare as Nix attribute names in a `let`.
static RESERVED_WORDS: &[&str] = &[
    "let", "in", "if", "then", "else", "assert", "with", "rec", "inherit",
];

/// Turn an arbitrary string into a valid Nix identifier.
///
/// Characters outside `[A-Za-z0-9_-]` become `_`; a leading digit or a
/// collision with a reserved word gets a `_` prefix.
pub fn sanitize_identifier(s: &str) -> String {
    let mut result = String::with_capacity(s.len());

    for c in s.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            result.push(c);
        } else {
            result.push('_');
        }
    }

    if result.starts_with(|c: char| c.is_ascii_digit()) {
        result.insert(0, '_');
    }

    if RESERVED_WORDS.contains(&result.as_str()) {
        result.insert(0, '_');
    }

    result
}

/// Whether `s` already is a valid Nix identifier.
pub fn is_valid_identifier(s: &str) -> bool {
    if s.is_empty() || RESERVED_WORDS.contains(&s) {
        return false;
    }
    let mut chars = s.chars();
    let first = chars.next().unwrap();
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
