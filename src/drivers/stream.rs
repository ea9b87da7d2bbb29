//! `claude` driver stream-json event shapes (spec.md §4.3 driver
//! definitions, §4.4 "Streaming" session-id/cost capture).
//!
//! Every driver declares its own JSON shape; this module is the `claude`
//! driver's. Other drivers (`cursor-agent`, `opencode`, `amp`, `codex`)
//! would each get an analogous module the day they're added — the
//! registry only depends on the two free functions at the bottom.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "assistant")]
    Assistant {
        #[serde(default)]
        session_id: Option<String>,
    },

    #[serde(rename = "user")]
    User {},

    #[serde(rename = "result")]
    Result {
        subtype: String,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        total_cost_usd: Option<f64>,
        #[serde(default)]
        session_id: Option<String>,
    },

    #[serde(rename = "system")]
    System {
        #[serde(default)]
        session_id: Option<String>,
    },
}

/// Parse one line of child stdout and pull a session id out of it, if the
/// line both parses as JSON and carries one (spec.md §4.4).
pub fn extract_session_id(line: &str) -> Option<String> {
    let event: StreamEvent = serde_json::from_str(line).ok()?;
    match event {
        StreamEvent::Assistant { session_id } => session_id,
        StreamEvent::System { session_id } => session_id,
        StreamEvent::Result { session_id, .. } => session_id,
        StreamEvent::User {} => None,
    }
}

/// Pull an incremental cost contribution out of a `result`-typed event;
/// other drivers without cost reporting simply never match here.
pub fn extract_cost(line: &str) -> Option<f64> {
    let event: StreamEvent = serde_json::from_str(line).ok()?;
    match event {
        StreamEvent::Result { total_cost_usd, .. } => total_cost_usd,
        _ => None,
    }
}

/// Stderr/exit-code signatures this driver uses to recognize a
/// permission-denied refusal (spec.md §9 Open Question: "copy verbatim").
/// No upstream implementation was available to copy from, so this list is
/// the minimal, explicitly-documented assumption recorded in DESIGN.md.
pub const PERMISSION_DENIED_SIGNATURES: &[&str] = &[
    "permission denied",
    "requested permission",
    "tool use was denied",
];

/// Whether raw stderr text matches this driver's permission-denied
/// signature set.
pub fn is_permission_denied(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    PERMISSION_DENIED_SIGNATURES.iter().any(|sig| lower.contains(sig))
}

/// Transient network/timeout signatures (spec.md §4.4 reap classification).
pub const NETWORK_ERROR_SIGNATURES: &[&str] =
    &["connection reset", "timed out", "timeout", "network error", "econnreset"];

pub fn is_network_error(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    NETWORK_ERROR_SIGNATURES.iter().any(|sig| lower.contains(sig))
}

/// Extracts a best-effort human-readable excerpt from a `Value` tree,
/// used when building the bounded 16 KiB diagnostic ring buffer.
pub fn event_excerpt(value: &Value) -> Option<String> {
    value.get("result").and_then(|v| v.as_str()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_session_id_from_assistant_event() {
        let line = r#"{"type":"assistant","session_id":"abc123"}"#;
        assert_eq!(extract_session_id(line), Some("abc123".to_string()));
    }

    #[test]
    fn extracts_cost_from_result_event() {
        let line = r#"{"type":"result","subtype":"success","total_cost_usd":0.042}"#;
        assert_eq!(extract_cost(line), Some(0.042));
    }

    #[test]
    fn non_json_line_yields_nothing() {
        assert_eq!(extract_session_id("not json"), None);
        assert_eq!(extract_cost("not json"), None);
    }

    #[test]
    fn permission_signature_matching_is_case_insensitive() {
        assert!(is_permission_denied("Error: Permission Denied by user"));
        assert!(!is_permission_denied("all good"));
    }

    #[test]
    fn network_signature_matching() {
        assert!(is_network_error("Error: Connection reset by peer"));
        assert!(is_network_error("request timed out"));
        assert!(!is_network_error("compile error"));
    }
}
