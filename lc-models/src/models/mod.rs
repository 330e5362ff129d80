//! Domain records exchanged with the backend.

pub mod chat;
pub mod contact;
pub mod message;
pub mod session;
pub mod user;
pub mod verification;

/// Read an optional string field from a JSON row.
pub(crate) fn str_field(row: &serde_json::Value, key: &str) -> Option<String> {
    row.get(key).and_then(|v| v.as_str()).map(String::from)
}

/// Read a required string field from a JSON row.
pub(crate) fn required_str(
    row: &serde_json::Value,
    key: &str,
    entity: &str,
) -> lc_core::LcResult<String> {
    str_field(row, key).ok_or_else(|| {
        lc_core::LcError::Serialization(format!("{entity} row is missing `{key}`"))
    })
}

/// Parse a timestamp field, falling back to the Unix epoch.
///
/// Accepts RFC 3339 and the zone-less form Postgres emits for
/// `timestamp without time zone` columns.
pub(crate) fn time_field(row: &serde_json::Value, key: &str) -> chrono::DateTime<chrono::Utc> {
    use chrono::TimeZone;

    let Some(raw) = row.get(key).and_then(|v| v.as_str()) else {
        return chrono::DateTime::default();
    };
    if let Ok(t) = chrono::DateTime::parse_from_rfc3339(raw) {
        return t.with_timezone(&chrono::Utc);
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| chrono::Utc.from_utc_datetime(&naive))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_time_field_formats() {
        let row = json!({
            "a": "2024-03-01T10:00:00.250+00:00",
            "b": "2024-03-01T10:00:00.250",
            "c": "yesterday",
        });
        assert_eq!(time_field(&row, "a"), time_field(&row, "b"));
        assert_eq!(time_field(&row, "c").timestamp(), 0);
        assert_eq!(time_field(&row, "missing").timestamp(), 0);
    }

    #[test]
    fn test_required_str() {
        let row = json!({"id": "u1"});
        assert_eq!(required_str(&row, "id", "user").unwrap(), "u1");
        assert!(required_str(&row, "phone", "user").is_err());
    }
}
