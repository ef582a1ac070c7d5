use sha2::{Digest, Sha256};

/// Line endings folded to `\n`. Everything else (including form feeds) is kept as-is.
pub fn normalize_text(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n")
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(digest)
}

/// First `max_chars` characters of the trimmed text, with `...` appended when cut.
pub fn snippet_first_chars(text: &str, max_chars: usize) -> String {
    let t = text.trim();
    match t.char_indices().nth(max_chars) {
        None => t.to_string(),
        Some((byte_idx, _)) => {
            let mut s = t[..byte_idx].to_string();
            s.push_str("...");
            s
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_crlf_and_lone_cr() {
        assert_eq!(normalize_text("a\r\nb\rc\n"), "a\nb\nc\n");
    }

    #[test]
    fn snippet_respects_char_boundaries() {
        let s = "é".repeat(10);
        assert_eq!(snippet_first_chars(&s, 3), "ééé...");
        assert_eq!(snippet_first_chars("  short  ", 150), "short");
    }

    #[test]
    fn sha256_is_lowercase_hex() {
        let h = sha256_hex(b"abc");
        assert_eq!(
            h,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
