// Wall-clock timestamps shared by stored records and CLI notices.
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Current UTC time as RFC 3339; falls back to the epoch if formatting fails.
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::now_rfc3339;
    use time::OffsetDateTime;
    use time::format_description::well_known::Rfc3339;

    #[test]
    fn now_parses_back_as_rfc3339() {
        let stamp = now_rfc3339();
        let parsed = OffsetDateTime::parse(&stamp, &Rfc3339).expect("rfc3339");
        assert!(parsed.year() >= 2024);
        assert!(stamp.ends_with('Z'));
    }
}
