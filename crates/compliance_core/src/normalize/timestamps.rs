use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Current time as canonical RFC3339 UTC. Falls back to the Unix epoch if formatting fails.
pub fn now_rfc3339_utc() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
