//! Event assembly: joins a completed request/response plaintext pair into one [`ApiEvent`].

use swarpf_emitter::ApiEvent;

/// Parses `request` as JSON and extracts its top-level `command` field, producing an
/// [`ApiEvent`] if present as a string. Returns `None` (and the caller logs) if `command` is
/// missing or not a string; no other JSON inspection is performed.
pub fn assemble(request: String, response: String) -> Option<ApiEvent> {
    let parsed: serde_json::Value = match serde_json::from_str(&request) {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(error = %err, "request plaintext was not valid JSON, discarding event");
            return None;
        }
    };
    let command = match parsed.get("command").and_then(|v| v.as_str()) {
        Some(c) => c.to_string(),
        None => {
            tracing::warn!(request = %request, "request JSON has no string `command` field, discarding event");
            return None;
        }
    };
    Some(ApiEvent {
        command,
        request,
        response,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_command_from_request_json() {
        let event = assemble(
            r#"{"command":"BattleDungeonStart","wizard_id":42}"#.to_string(),
            r#"{"command":"BattleDungeonStart","ret_code":0}"#.to_string(),
        )
        .expect("should assemble");
        assert_eq!(event.command, "BattleDungeonStart");
    }

    #[test]
    fn discards_when_command_is_missing() {
        assert!(assemble(r#"{"wizard_id":42}"#.to_string(), "{}".to_string()).is_none());
    }

    #[test]
    fn discards_when_command_is_not_a_string() {
        assert!(assemble(r#"{"command":42}"#.to_string(), "{}".to_string()).is_none());
    }

    #[test]
    fn discards_when_request_is_not_json() {
        assert!(assemble("not json".to_string(), "{}".to_string()).is_none());
    }
}
