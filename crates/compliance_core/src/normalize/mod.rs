mod text;
mod timestamps;

pub use text::{normalize_text, sha256_hex, snippet_first_chars};
pub use timestamps::now_rfc3339_utc;
