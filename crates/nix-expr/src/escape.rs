/// Escape a value for a double-quoted Nix string.
pub fn escape_nix_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 10);

    for c in s.chars() {
        match c {
            '"' => result.push_str("\\\""),
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            '$' => result.push_str("\\$"),
            '`' => result.push_str("\\`"),
            _ => result.push(c),
        }
    }

    result
}

/// Escape content embedded inside a Nix indented string (`''...''`).
///
/// Only the two-apostrophe sequence is special; interpolation sequences
/// pass through untouched so generated phases can reference derivations.
pub fn escape_indented_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if i + 1 < bytes.len() && bytes[i] == b'\'' && bytes[i + 1] == b'\'' {
            result.push_str("''\\''");
            i += 2;
        } else {
            let c = s[i..].chars().next().unwrap();
            result.push(c);
            i += c.len_utf8();
        }
    }

    result
}
