use compliance_core::error::AppError;
use regex::Regex;

/// Pulls criterion identifiers out of chunk text. Results are advisory: a mismatch only
/// weakens pairing, it never fails ingestion.
pub trait CriterionExtractor: Send + Sync {
    /// Identifiers in first-appearance order, without duplicates.
    fn extract(&self, text: &str) -> Vec<String>;
}

/// Default extractor: labeled mentions ("Criterion 1.1", "Key Indicator 2.3.1", "Metric 3.2",
/// "Standard 4.1") plus bare three-level indicator codes ("2.3.1"). Both reduce to `major.minor`.
#[derive(Debug, Clone)]
pub struct PatternCriterionExtractor {
    labeled: Regex,
    bare: Regex,
}

pub const DEFAULT_LABELED_PATTERN: &str = r"(?i)\b(?:criterion|criteria|key\s+indicator|indicator|metric|standard)\s*[:#\-]?\s*(\d{1,2})(?:\.(\d{1,2}))?(?:\.\d{1,2})?\b";
pub const DEFAULT_BARE_PATTERN: &str = r"(?:^|[^\d.])(\d{1,2})\.(\d{1,2})\.(\d{1,2})";

impl PatternCriterionExtractor {
    pub fn new() -> Result<Self, AppError> {
        Self::with_patterns(DEFAULT_LABELED_PATTERN, DEFAULT_BARE_PATTERN)
    }

    /// Custom patterns. Group 1 is the major number, group 2 (optional for `labeled`) the minor.
    /// For `bare`, the last group must end the code; matches followed by more digits are dropped.
    pub fn with_patterns(labeled: &str, bare: &str) -> Result<Self, AppError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                AppError::new("CONFIG_CRITERION_PATTERN_INVALID", "Invalid criterion pattern")
                    .with_details(format!("pattern={pattern}; err={e}"))
            })
        };
        Ok(Self {
            labeled: compile(labeled)?,
            bare: compile(bare)?,
        })
    }
}

impl CriterionExtractor for PatternCriterionExtractor {
    fn extract(&self, text: &str) -> Vec<String> {
        let mut found: Vec<(usize, String)> = Vec::new();

        for caps in self.labeled.captures_iter(text) {
            let (Some(whole), Some(major)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let id = match caps.get(2) {
                Some(minor) => format!("{}.{}", major.as_str(), minor.as_str()),
                None => major.as_str().to_string(),
            };
            found.push((whole.start(), id));
        }

        for caps in self.bare.captures_iter(text) {
            let (Some(whole), Some(major), Some(minor)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            if continues_number(&text[whole.end()..]) {
                continue;
            }
            found.push((major.start(), format!("{}.{}", major.as_str(), minor.as_str())));
        }

        found.sort_by_key(|(pos, _)| *pos);
        let mut out: Vec<String> = Vec::new();
        for (_, id) in found {
            if !out.contains(&id) {
                out.push(id);
            }
        }
        out
    }
}

/// True when `rest` starts with a digit or with `.` followed by a digit.
fn continues_number(rest: &str) -> bool {
    let mut chars = rest.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => true,
        Some('.') => chars.next().is_some_and(|c| c.is_ascii_digit()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_labeled_and_bare_ids_in_order() {
        let x = PatternCriterionExtractor::new().expect("patterns");
        let ids = x.extract(
            "Key Indicator 2.3.1 covers teaching. See Criterion 1.1 and metric 3.2; 2.3.4 again.",
        );
        assert_eq!(ids, vec!["2.3", "1.1", "3.2"]);
    }

    #[test]
    fn major_only_label_is_kept_as_is() {
        let x = PatternCriterionExtractor::new().expect("patterns");
        assert_eq!(x.extract("CRITERION 4 - Infrastructure"), vec!["4"]);
    }

    #[test]
    fn invalid_custom_pattern_is_a_configuration_error() {
        let err = PatternCriterionExtractor::with_patterns("(", DEFAULT_BARE_PATTERN)
            .expect_err("invalid");
        assert_eq!(err.code, "CONFIG_CRITERION_PATTERN_INVALID");
    }

    #[test]
    fn plain_numbers_are_not_criteria() {
        let x = PatternCriterionExtractor::new().expect("patterns");
        assert!(x.extract("Budget grew 3.5 percent in 2023.").is_empty());
        assert!(x.extract("version 10.22.333.4").is_empty());
        assert!(x.extract("build 1.2.3.4").is_empty());
    }

    #[test]
    fn adjacent_bare_codes_are_both_found() {
        let x = PatternCriterionExtractor::new().expect("patterns");
        assert_eq!(x.extract("1.1.1 2.2.2."), vec!["1.1", "2.2"]);
    }
}
