//! The admin/probe wire protocol: newline-delimited JSON frames over a
//! local stream socket.
//!
//! Grounded on the original `UdsServer`'s line-buffered protocol
//! (`handle_client_data` splits on `\n`) and `StateManager::handle_probe_event`
//! for the message-type vocabulary, generalized into a typed envelope
//! instead of ad hoc `nlohmann::json` field lookups.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use cerberus_common::{AppPolicy, UserId};

pub const PROTOCOL_VERSION: u32 = 1;

/// One line on the wire: `{"v":1,"type":"...","req_id":"...","payload":{...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub v: u32,
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub req_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

impl Frame {
    pub fn request(frame_type: impl Into<String>, req_id: impl Into<String>, payload: Value) -> Self {
        Frame { v: PROTOCOL_VERSION, frame_type: frame_type.into(), req_id: Some(req_id.into()), payload }
    }

    pub fn event(frame_type: impl Into<String>, payload: Value) -> Self {
        Frame { v: PROTOCOL_VERSION, frame_type: frame_type.into(), req_id: None, payload }
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"v":1,"type":"error","payload":{}}"#.to_string())
    }

    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// A response frame, always echoing the originating `req_id`.
pub fn ok_response(req_id: &str, payload: Value) -> Frame {
    Frame { v: PROTOCOL_VERSION, frame_type: "resp.ok".to_string(), req_id: Some(req_id.to_string()), payload }
}

pub fn error_response(req_id: &str, err: &cerberus_common::Error) -> Frame {
    let structured = cerberus_common::StructuredError::from(err);
    let payload = serde_json::to_value(&structured).unwrap_or(Value::Null);
    Frame { v: PROTOCOL_VERSION, frame_type: "resp.error".to_string(), req_id: Some(req_id.to_string()), payload }
}

/// Decoded request/event vocabulary. `Frame` is the wire shape; this is
/// what `ipc::server` actually dispatches on after validating `payload`.
#[derive(Debug, Clone)]
pub enum Message {
    ScreenOn,
    ScreenOff,
    Charging(bool),
    DozeHint { state: String },
    NotificationPost { package_name: String, user_id: UserId },
    SetPolicy { package_name: String, policy: AppPolicy },
    GetState { req_id: String },
    ForceFreeze { package_name: String, user_id: UserId },
    ForceUnfreeze { package_name: String, user_id: UserId },
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown message type {0}")]
    UnknownType(String),
    #[error("missing or malformed field {0}")]
    MalformedField(&'static str),
}

impl Message {
    pub fn decode(frame: &Frame) -> Result<Self, DecodeError> {
        let p = &frame.payload;
        let str_field = |name: &'static str| p.get(name).and_then(Value::as_str).map(str::to_string).ok_or(DecodeError::MalformedField(name));
        let user_id = || p.get("user_id").and_then(Value::as_u64).map(|v| UserId(v as u32)).unwrap_or(UserId(0));

        match frame.frame_type.as_str() {
            "event.screen_on" => Ok(Message::ScreenOn),
            "event.screen_off" => Ok(Message::ScreenOff),
            "event.charging_changed" => Ok(Message::Charging(p.get("charging").and_then(Value::as_bool).unwrap_or(false))),
            "event.doze_state_changed" => Ok(Message::DozeHint { state: str_field("state")? }),
            "event.notification_post" => Ok(Message::NotificationPost { package_name: str_field("package_name")?, user_id: user_id() }),
            "cmd.set_policy" => {
                let package_name = str_field("package_name")?;
                let policy_ordinal = p.get("policy").and_then(Value::as_i64).ok_or(DecodeError::MalformedField("policy"))?;
                let policy = AppPolicy::from_i32(policy_ordinal as i32).ok_or(DecodeError::MalformedField("policy"))?;
                Ok(Message::SetPolicy { package_name, policy })
            }
            "cmd.get_state" => Ok(Message::GetState { req_id: frame.req_id.clone().unwrap_or_default() }),
            "cmd.force_freeze" => Ok(Message::ForceFreeze { package_name: str_field("package_name")?, user_id: user_id() }),
            "cmd.force_unfreeze" => Ok(Message::ForceUnfreeze { package_name: str_field("package_name")?, user_id: user_id() }),
            other => Err(DecodeError::UnknownType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips_through_json() {
        let frame = Frame::event("event.screen_on", serde_json::json!({}));
        let line = frame.to_line();
        let parsed = Frame::parse(&line).unwrap();
        assert_eq!(parsed.frame_type, "event.screen_on");
    }

    #[test]
    fn decodes_set_policy_command() {
        let frame = Frame::request("cmd.set_policy", "r1", serde_json::json!({"package_name": "com.example.app", "policy": 3}));
        let msg = Message::decode(&frame).unwrap();
        assert!(matches!(msg, Message::SetPolicy { policy: AppPolicy::Strict, .. }));
    }

    #[test]
    fn decode_rejects_unknown_type() {
        let frame = Frame::event("cmd.bogus", serde_json::json!({}));
        assert!(matches!(Message::decode(&frame), Err(DecodeError::UnknownType(_))));
    }

    #[test]
    fn decode_rejects_missing_package_name() {
        let frame = Frame::request("cmd.force_freeze", "r1", serde_json::json!({}));
        assert!(matches!(Message::decode(&frame), Err(DecodeError::MalformedField("package_name"))));
    }

    #[test]
    fn malformed_json_line_fails_to_parse() {
        assert!(Frame::parse("{not json").is_err());
    }
}
