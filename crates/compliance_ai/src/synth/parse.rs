use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    RequirementSummary,
    EvidenceSummary,
    Mapping,
    ComplianceAnalysis,
    Status,
    Recommendations,
    Gaps,
}

impl Section {
    /// Sections every answer must carry. `Gaps` is optional.
    pub const REQUIRED: [Section; 6] = [
        Section::RequirementSummary,
        Section::EvidenceSummary,
        Section::Mapping,
        Section::ComplianceAnalysis,
        Section::Status,
        Section::Recommendations,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            Section::RequirementSummary => "requirement_summary",
            Section::EvidenceSummary => "evidence_summary",
            Section::Mapping => "mapping",
            Section::ComplianceAnalysis => "compliance_analysis",
            Section::Status => "status",
            Section::Recommendations => "recommendations",
            Section::Gaps => "gaps",
        }
    }
}

/// Model output after the tag contract has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedOutput {
    /// At least one section was found. Missing ones are absent from the map.
    Sections(BTreeMap<Section, String>),
    /// No recognizable section.
    Unparseable,
}

impl ParsedOutput {
    pub fn section(&self, s: Section) -> Option<&str> {
        match self {
            ParsedOutput::Sections(map) => map.get(&s).map(String::as_str),
            ParsedOutput::Unparseable => None,
        }
    }

    /// Required sections present, as a fraction of all required sections.
    pub fn completeness(&self) -> f32 {
        let present = Section::REQUIRED
            .iter()
            .filter(|s| self.section(**s).is_some())
            .count();
        present as f32 / Section::REQUIRED.len() as f32
    }

    pub fn missing_required(&self) -> Vec<Section> {
        Section::REQUIRED
            .iter()
            .copied()
            .filter(|s| self.section(*s).is_none())
            .collect()
    }
}

fn extract_section<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = text.find(&open)? + open.len();
    let end = text[start..].find(&close)? + start;
    let body = text[start..end].trim();
    if body.is_empty() {
        None
    } else {
        Some(body)
    }
}

pub fn parse_output(raw: &str) -> ParsedOutput {
    let mut map = BTreeMap::new();
    for s in Section::REQUIRED.iter().chain(std::iter::once(&Section::Gaps)) {
        if let Some(body) = extract_section(raw, s.tag()) {
            map.insert(*s, body.to_string());
        }
    }
    if map.is_empty() {
        ParsedOutput::Unparseable
    } else {
        ParsedOutput::Sections(map)
    }
}

/// One item per non-empty line, list markers stripped.
pub fn list_items(body: &str) -> Vec<String> {
    body.lines()
        .map(|l| {
            l.trim()
                .trim_start_matches(['-', '*', '•'])
                .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')')
                .trim()
        })
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}
