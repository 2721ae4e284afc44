//! Phoenix channel messages used by the Supabase realtime service.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use leadsync_core::remote::{ChangeKind, RawChange, RowFilter, Table};

pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_LEAVE: &str = "phx_leave";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_ERROR: &str = "phx_error";
pub const EVENT_CLOSE: &str = "phx_close";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_CHANGES: &str = "postgres_changes";
pub const EVENT_SYSTEM: &str = "system";

/// Topic reserved for connection-level messages.
pub const PHOENIX_TOPIC: &str = "phoenix";

/// Envelope of every message on the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

impl PhoenixMessage {
    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Channel topic for a table's change subscription.
pub fn channel_topic(table: Table) -> String {
    format!("realtime:{}_changes", table)
}

pub fn join_message(
    topic: &str,
    table: Table,
    filter: &RowFilter,
    access_token: &str,
    msg_ref: &str,
) -> PhoenixMessage {
    PhoenixMessage {
        topic: topic.to_string(),
        event: EVENT_JOIN.to_string(),
        payload: json!({
            "config": {
                "broadcast": { "ack": false, "self": false },
                "presence": { "key": "" },
                "postgres_changes": [{
                    "event": "*",
                    "schema": "public",
                    "table": table.as_str(),
                    "filter": filter.to_string(),
                }],
                "private": false
            },
            "access_token": access_token,
        }),
        msg_ref: Some(msg_ref.to_string()),
        join_ref: Some(msg_ref.to_string()),
    }
}

pub fn leave_message(topic: &str, msg_ref: &str) -> PhoenixMessage {
    PhoenixMessage {
        topic: topic.to_string(),
        event: EVENT_LEAVE.to_string(),
        payload: json!({}),
        msg_ref: Some(msg_ref.to_string()),
        join_ref: None,
    }
}

pub fn heartbeat_message(msg_ref: &str) -> PhoenixMessage {
    PhoenixMessage {
        topic: PHOENIX_TOPIC.to_string(),
        event: EVENT_HEARTBEAT.to_string(),
        payload: json!({}),
        msg_ref: Some(msg_ref.to_string()),
        join_ref: None,
    }
}

/// What an inbound message means for a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Change(RawChange),
    Reply {
        msg_ref: Option<String>,
        ok: bool,
        detail: String,
    },
    /// The server failed or closed the channel.
    ChannelError(String),
    Closed,
    Ignored,
}

#[derive(Debug, Deserialize)]
struct ChangeData {
    #[serde(rename = "type")]
    kind: ChangeKind,
    #[serde(default)]
    record: Option<Value>,
    #[serde(default)]
    old_record: Option<Value>,
}

/// Classifies a message received for `topic`.
pub fn classify(message: PhoenixMessage, topic: &str) -> serde_json::Result<Inbound> {
    if message.topic != topic {
        return Ok(Inbound::Ignored);
    }

    let inbound = match message.event.as_str() {
        EVENT_CHANGES => {
            let data: ChangeData = serde_json::from_value(
                message.payload.get("data").cloned().unwrap_or(Value::Null),
            )?;
            Inbound::Change(RawChange {
                kind: data.kind,
                new: data.record.filter(non_empty),
                old: data.old_record.filter(non_empty),
            })
        }
        EVENT_REPLY => {
            let status = message.payload.get("status").and_then(Value::as_str);
            Inbound::Reply {
                msg_ref: message.msg_ref,
                ok: status == Some("ok"),
                detail: message
                    .payload
                    .get("response")
                    .map(Value::to_string)
                    .unwrap_or_default(),
            }
        }
        EVENT_SYSTEM => {
            let status = message.payload.get("status").and_then(Value::as_str);
            if status == Some("error") {
                Inbound::ChannelError(
                    message
                        .payload
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("system error")
                        .to_string(),
                )
            } else {
                Inbound::Ignored
            }
        }
        EVENT_ERROR => Inbound::ChannelError(format!("channel error: {}", message.payload)),
        EVENT_CLOSE => Inbound::Closed,
        _ => Inbound::Ignored,
    };
    Ok(inbound)
}

fn non_empty(value: &Value) -> bool {
    !matches!(value, Value::Null) && value.as_object().map_or(true, |o| !o.is_empty())
}
