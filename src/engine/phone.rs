//! Phone normalization to canonical E.164.
//!
//! Numbers are normalized against the North American plan (the declared
//! country for every record this system sees). Normalization is idempotent:
//! `normalize(normalize(p)) == normalize(p)`.

/// Canonical E.164 form of a NANP number, when the input parses and passes
/// the validity checks.
pub fn normalize(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    let national = match digits.len() {
        10 => digits,
        // Leading country code 1.
        11 if digits.starts_with('1') => digits[1..].to_string(),
        _ => return None,
    };

    if !is_valid_national(&national) {
        return None;
    }

    Some(format!("+1{}", national))
}

/// NANP validity on the 10-digit national number: the area code cannot
/// start with 0 or 1, and all-zero exchange or line segments are reserved.
fn is_valid_national(national: &str) -> bool {
    let bytes = national.as_bytes();
    if bytes.len() != 10 {
        return false;
    }
    if bytes[0] == b'0' || bytes[0] == b'1' {
        return false;
    }
    let exchange = &national[3..6];
    let line = &national[6..10];
    exchange != "000" && line != "0000"
}
