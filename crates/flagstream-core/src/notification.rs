//! Notification envelopes carried by the event stream.
//!
//! Every data frame holds a JSON envelope. Occupancy notifications are
//! recognised by the envelope's `name`; every other kind is identified by
//! the `type` field of the inner `data` document, which is itself a JSON
//! string. Update payloads are forwarded undecoded.

use serde::{Deserialize, Serialize};

/// Envelope `name` of server-generated occupancy notifications.
pub const OCCUPANCY_NAME: &str = "[meta]occupancy";

// ── Kinds ────────────────────────────────────────────────────────────

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumString, strum::Display, strum::IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    SplitUpdate,
    SplitKill,
    SegmentUpdate,
    MySegmentsUpdate,
    #[strum(serialize = "MY_SEGMENTS_UPDATE_V2")]
    MySegmentsUpdateV2,
    MyLargeSegmentsUpdate,
    RuleBasedSegmentUpdate,
    Control,
    Occupancy,
}

impl NotificationType {
    /// Business updates, as opposed to streaming-infrastructure messages.
    pub fn is_update(self) -> bool {
        !matches!(self, Self::Control | Self::Occupancy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlType {
    StreamingPaused,
    StreamingEnabled,
    StreamingDisabled,
    StreamingReset,
}

// ── Envelope ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNotification {
    #[serde(default)]
    name: Option<String>,
    channel: String,
    timestamp: i64,
    data: String,
}

#[derive(Deserialize)]
struct TypeField {
    #[serde(rename = "type")]
    kind: String,
}

/// A decoded envelope. `payload` is the inner `data` string, untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingNotification {
    pub kind: NotificationType,
    pub channel: String,
    pub timestamp: i64,
    pub payload: String,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("malformed notification: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown notification type: {0}")]
    UnknownType(String),
}

impl IncomingNotification {
    /// Decode the `data` field of a stream frame.
    pub fn parse(frame_data: &str) -> Result<Self, NotificationError> {
        let raw: RawNotification = serde_json::from_str(frame_data)?;

        let kind = if raw.name.as_deref() == Some(OCCUPANCY_NAME) {
            NotificationType::Occupancy
        } else {
            let TypeField { kind } = serde_json::from_str(&raw.data)?;
            kind.parse()
                .map_err(|_| NotificationError::UnknownType(kind))?
        };

        Ok(Self {
            kind,
            channel: raw.channel,
            timestamp: raw.timestamp,
            payload: raw.data,
        })
    }
}

// ── Control / occupancy bodies ───────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlNotification {
    pub control_type: ControlType,
    pub timestamp: i64,
}

impl ControlNotification {
    pub fn from_incoming(n: &IncomingNotification) -> Result<Self, NotificationError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Body {
            control_type: ControlType,
        }

        let body: Body = serde_json::from_str(&n.payload)?;
        Ok(Self {
            control_type: body.control_type,
            timestamp: n.timestamp,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupancyNotification {
    pub channel: String,
    pub publishers: u32,
    pub timestamp: i64,
}

impl OccupancyNotification {
    pub fn from_incoming(n: &IncomingNotification) -> Result<Self, NotificationError> {
        #[derive(Deserialize)]
        struct Metrics {
            publishers: u32,
        }
        #[derive(Deserialize)]
        struct Body {
            metrics: Metrics,
        }

        let body: Body = serde_json::from_str(&n.payload)?;
        Ok(Self {
            channel: n.channel.clone(),
            publishers: body.metrics.publishers,
            timestamp: n.timestamp,
        })
    }
}

// ── Server errors ────────────────────────────────────────────────────

/// Body of an `event: error` frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingError {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub status_code: i64,
    #[serde(default)]
    pub href: Option<String>,
}

impl StreamingError {
    pub fn parse(frame_data: &str) -> Result<Self, NotificationError> {
        Ok(serde_json::from_str(frame_data)?)
    }

    /// Only 4xxxx codes concern this client; anything else is noise.
    pub fn should_be_ignored(&self) -> bool {
        !(40_000..=49_999).contains(&self.code)
    }

    /// Token-related codes: reconnecting with a fresh token fixes them.
    pub fn is_retryable(&self) -> bool {
        (40_140..=40_149).contains(&self.code)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn envelope(name: Option<&str>, channel: &str, timestamp: i64, data: &serde_json::Value) -> String {
        let mut env = json!({
            "id": "abc:0:0",
            "clientId": "client",
            "timestamp": timestamp,
            "encoding": "json",
            "channel": channel,
            "data": data.to_string(),
        });
        if let Some(name) = name {
            env["name"] = json!(name);
        }
        env.to_string()
    }

    #[test]
    fn parses_update_kind_from_inner_type() {
        let data = json!({"type": "SPLIT_UPDATE", "changeNumber": 42});
        let raw = envelope(None, "xxxx_splits", 1000, &data);

        let n = IncomingNotification::parse(&raw).unwrap();
        assert_eq!(n.kind, NotificationType::SplitUpdate);
        assert_eq!(n.channel, "xxxx_splits");
        assert_eq!(n.timestamp, 1000);
        assert_eq!(n.payload, data.to_string());
        assert!(n.kind.is_update());
    }

    #[test]
    fn parses_v2_kind() {
        let raw = envelope(None, "c", 1, &json!({"type": "MY_SEGMENTS_UPDATE_V2"}));
        let n = IncomingNotification::parse(&raw).unwrap();
        assert_eq!(n.kind, NotificationType::MySegmentsUpdateV2);
        assert_eq!(n.kind.to_string(), "MY_SEGMENTS_UPDATE_V2");
    }

    #[test]
    fn occupancy_is_identified_by_name() {
        let raw = envelope(
            Some(OCCUPANCY_NAME),
            "[?occupancy=metrics.publishers]control_pri",
            5,
            &json!({"metrics": {"publishers": 2}}),
        );
        let n = IncomingNotification::parse(&raw).unwrap();
        assert_eq!(n.kind, NotificationType::Occupancy);

        let occupancy = OccupancyNotification::from_incoming(&n).unwrap();
        assert_eq!(occupancy.publishers, 2);
        assert_eq!(occupancy.timestamp, 5);
    }

    #[test]
    fn control_body_decodes() {
        let raw = envelope(
            None,
            "control_pri",
            9,
            &json!({"type": "CONTROL", "controlType": "STREAMING_PAUSED"}),
        );
        let n = IncomingNotification::parse(&raw).unwrap();
        assert_eq!(n.kind, NotificationType::Control);

        let control = ControlNotification::from_incoming(&n).unwrap();
        assert_eq!(
            control,
            ControlNotification {
                control_type: ControlType::StreamingPaused,
                timestamp: 9,
            }
        );
    }

    #[test]
    fn unknown_type_is_rejected() {
        let raw = envelope(None, "c", 1, &json!({"type": "SOMETHING_NEW"}));
        assert!(matches!(
            IncomingNotification::parse(&raw),
            Err(NotificationError::UnknownType(t)) if t == "SOMETHING_NEW"
        ));
        assert!(matches!(
            IncomingNotification::parse("not json"),
            Err(NotificationError::Malformed(_))
        ));
    }

    #[test]
    fn streaming_error_classification() {
        let token_expired =
            StreamingError::parse(r#"{"message":"Token expired","code":40142,"statusCode":401}"#).unwrap();
        assert!(!token_expired.should_be_ignored());
        assert!(token_expired.is_retryable());

        let forbidden = StreamingError::parse(r#"{"message":"nope","code":40300,"statusCode":403}"#).unwrap();
        assert!(!forbidden.should_be_ignored());
        assert!(!forbidden.is_retryable());

        let internal = StreamingError::parse(r#"{"message":"oops","code":50000,"statusCode":500}"#).unwrap();
        assert!(internal.should_be_ignored());
    }
}
