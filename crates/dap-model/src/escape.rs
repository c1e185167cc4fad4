//! URL-safe quoting of variable names.
//!
//! Both metadata dialects store names in escaped form so that the keys of a
//! container, the fully qualified names and the constraint expressions built
//! from them are interchangeable. ASCII alphanumerics and `_ - ~` are kept;
//! every other byte is written as `%XX`. An existing well-formed `%XX`
//! sequence is left untouched, so escaping is idempotent and names that a
//! DDS already delivers escaped (`a%20b`) match the DMR spelling (`a b`).

const HEX: &[u8; 16] = b"0123456789ABCDEF";

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'~')
}

fn is_escape_at(bytes: &[u8], i: usize) -> bool {
    bytes[i] == b'%'
        && i + 2 < bytes.len()
        && bytes[i + 1].is_ascii_hexdigit()
        && bytes[i + 2].is_ascii_hexdigit()
}

/// Escape a raw name for use as a container key / FQN segment.
pub fn escape_name(name: &str) -> String {
    let bytes = name.as_bytes();
    let mut out = String::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if is_unreserved(b) {
            out.push(b as char);
        } else if is_escape_at(bytes, i) {
            out.push('%');
            out.push(bytes[i + 1].to_ascii_uppercase() as char);
            out.push(bytes[i + 2].to_ascii_uppercase() as char);
            i += 3;
            continue;
        } else {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0f) as usize] as char);
        }
        i += 1;
    }
    out
}

/// Decode `%XX` sequences back into the original name.
///
/// Malformed escapes are kept verbatim; invalid UTF-8 is replaced.
pub fn unescape_name(name: &str) -> String {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if is_escape_at(bytes, i) {
            let hi = hex_value(bytes[i + 1]);
            let lo = hex_value(bytes[i + 2]);
            out.push((hi << 4) | lo);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Percent-encode a constraint expression for the query part of a URL.
///
/// Path punctuation (`/ . , :`) is kept; everything else, including `%`,
/// is encoded so escaped names survive the server's query decoding.
pub fn encode_query_component(ce: &str) -> String {
    let mut out = String::with_capacity(ce.len());
    for &b in ce.as_bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'~' | b'.' | b'/' | b':' | b',') {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0f) as usize] as char);
        }
    }
    out
}

fn hex_value(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        b'A'..=b'F' => b - b'A' + 10,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_names_unchanged() {
        assert_eq!(escape_name("sea_surface_temp"), "sea_surface_temp");
        assert_eq!(escape_name("SST-2"), "SST-2");
    }

    #[test]
    fn test_whitespace_and_separators_escaped() {
        assert_eq!(escape_name("air temp"), "air%20temp");
        assert_eq!(escape_name("a.b"), "a%2Eb");
        assert_eq!(escape_name("a/b"), "a%2Fb");
    }

    #[test]
    fn test_escaping_is_idempotent() {
        let once = escape_name("air temp");
        assert_eq!(escape_name(&once), once);
        assert_eq!(escape_name("air%20temp"), "air%20temp");
        // Lower-case escapes are normalised
        assert_eq!(escape_name("air%2etemp"), "air%2Etemp");
        // A lone percent sign is escaped
        assert_eq!(escape_name("100%"), "100%25");
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape_name("air%20temp"), "air temp");
        assert_eq!(unescape_name(&escape_name("µ value")), "µ value");
        assert_eq!(unescape_name("bad%zz"), "bad%zz");
    }

    #[test]
    fn test_encode_query_component() {
        assert_eq!(
            encode_query_component("/g/x=[0:1:9];/g/y"),
            "/g/x%3D%5B0:1:9%5D%3B/g/y"
        );
        assert_eq!(encode_query_component("a%20b"), "a%2520b");
    }
}
