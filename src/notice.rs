//! Purpose: Define a stable, structured schema for non-fatal stderr notices.
//! Exports: `Notice`, `notice_json`.
//! Role: Shared contract helper for CLI diagnostics (non-error events).
//! Invariants: Notices are non-fatal and never alter stdout payloads.
//! Invariants: JSON schema is stable once published; fields are additive-only.
use serde_json::{Map, Value, json};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: String,
    pub time: String,
    pub cmd: String,
    pub store: String,
    pub message: String,
    pub details: Map<String, Value>,
}

pub fn notice_json(notice: &Notice) -> Value {
    json!({
        "notice": {
            "kind": notice.kind,
            "time": notice.time,
            "cmd": notice.cmd,
            "store": notice.store,
            "message": notice.message,
            "details": Value::Object(notice.details.clone()),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::{Notice, notice_json};
    use serde_json::{Map, Value};

    #[test]
    fn notice_json_has_required_fields() {
        let mut details = Map::new();
        details.insert("removed".to_string(), Value::from(3));

        let notice = Notice {
            kind: "cleanup".to_string(),
            time: "2026-02-01T00:00:00Z".to_string(),
            cmd: "cleanup".to_string(),
            store: "/home/me/.filestate/state.db".to_string(),
            message: "removed 3 records for missing files".to_string(),
            details,
        };

        let value = notice_json(&notice);
        let obj = value
            .get("notice")
            .and_then(|v| v.as_object())
            .expect("notice object");

        assert_eq!(obj.get("kind").and_then(|v| v.as_str()), Some("cleanup"));
        assert_eq!(
            obj.get("time").and_then(|v| v.as_str()),
            Some("2026-02-01T00:00:00Z")
        );
        assert_eq!(obj.get("cmd").and_then(|v| v.as_str()), Some("cleanup"));
        assert_eq!(
            obj.get("store").and_then(|v| v.as_str()),
            Some("/home/me/.filestate/state.db")
        );
        assert_eq!(
            obj.get("details")
                .and_then(|v| v.get("removed"))
                .and_then(|v| v.as_u64()),
            Some(3)
        );
    }
}
