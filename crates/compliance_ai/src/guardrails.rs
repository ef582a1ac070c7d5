use std::collections::BTreeSet;

/// Chunk ids cited in model output as `[[chunk:<id>]]`.
pub fn extract_cited_chunk_ids(output: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    let bytes = output.as_bytes();
    let mut i = 0usize;
    while i + 8 < bytes.len() {
        if bytes[i..].starts_with(b"[[chunk:") {
            let start = i + 8;
            if let Some(end) = bytes[start..].iter().position(|&b| b == b']') {
                let after = start + end;
                // Expect closing "]]" after the first ']'.
                if output.get(after..after + 2) == Some("]]") {
                    if let Some(id) = output.get(start..after).map(str::trim) {
                        if !id.is_empty() {
                            out.insert(id.to_string());
                        }
                    }
                }
                i = after + 1;
                continue;
            }
        }
        i += 1;
    }
    out
}

/// Cited ids that were not part of the prompt context, in sorted order.
pub fn unknown_citations<'a>(
    cited: &'a BTreeSet<String>,
    allowed: &BTreeSet<&str>,
) -> Vec<&'a str> {
    cited
        .iter()
        .map(String::as_str)
        .filter(|id| !allowed.contains(id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_markers_and_ignores_malformed_ones() {
        let cited = extract_cited_chunk_ids(
            "Policy covers it [[chunk:req-1#00000]] and [[chunk: ev-2#00003 ]]; broken [[chunk:x] end",
        );
        let got: Vec<&str> = cited.iter().map(String::as_str).collect();
        assert_eq!(got, vec!["ev-2#00003", "req-1#00000"]);
    }

    #[test]
    fn unknown_citations_are_reported() {
        let cited = extract_cited_chunk_ids("[[chunk:a]] [[chunk:b]]");
        let allowed: BTreeSet<&str> = ["a"].into_iter().collect();
        assert_eq!(unknown_citations(&cited, &allowed), vec!["b"]);
    }
}
