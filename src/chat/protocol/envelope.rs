//! Post-decryption payloads relayed by the server.
//!
//! ```json
//! {"type":"user_update","username":"bob","ip":"10.0.0.3","port":"50412","status":"online"}
//! {"type":"message","username":"bob","ip":"10.0.0.3","port":"50412","content":"hi"}
//! ```

use std::fmt;

use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};

use crate::chat::error::ChatError;

/// Wire value for a connected peer.
pub const STATUS_ONLINE: &str = "online";

/// Prefix of the status sent when a peer disconnects.
pub const LAST_SEEN_PREFIX: &str = "last seen at ";

/// Timestamp format used in last-seen statuses.
pub const LAST_SEEN_FORMAT: &str = "%Y/%m/%d %H:%M";

/// Presence of a peer as announced by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerStatus {
    /// Connected now.
    Online,
    /// Disconnected; holds the formatted local time.
    LastSeen(String),
}

impl PeerStatus {
    /// Last-seen status stamped with the current local time.
    pub fn last_seen_now() -> Self {
        Self::last_seen_at(&Local::now())
    }

    /// Last-seen status for a given time.
    pub fn last_seen_at<Tz: TimeZone>(time: &DateTime<Tz>) -> Self
    where
        Tz::Offset: fmt::Display,
    {
        PeerStatus::LastSeen(time.format(LAST_SEEN_FORMAT).to_string())
    }

    /// Interpret a wire status string. Unknown strings are kept as last-seen text.
    pub fn parse(status: &str) -> Self {
        if status == STATUS_ONLINE {
            PeerStatus::Online
        } else {
            PeerStatus::LastSeen(
                status
                    .strip_prefix(LAST_SEEN_PREFIX)
                    .unwrap_or(status)
                    .to_string(),
            )
        }
    }
}

impl fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerStatus::Online => f.write_str(STATUS_ONLINE),
            PeerStatus::LastSeen(at) => write!(f, "{}{}", LAST_SEEN_PREFIX, at),
        }
    }
}

/// Presence change for one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUpdate {
    pub username: String,
    pub ip: String,
    pub port: String,
    pub status: String,
}

/// A relayed chat line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub username: String,
    pub ip: String,
    pub port: String,
    pub content: String,
}

/// Tagged union of everything the server sends after the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    UserUpdate(UserUpdate),
    Message(ChatMessage),
}

impl Envelope {
    /// Presence update for a peer.
    pub fn user_update(
        username: impl Into<String>,
        ip: impl Into<String>,
        port: impl Into<String>,
        status: &PeerStatus,
    ) -> Self {
        Envelope::UserUpdate(UserUpdate {
            username: username.into(),
            ip: ip.into(),
            port: port.into(),
            status: status.to_string(),
        })
    }

    /// Chat line from a peer.
    pub fn message(
        username: impl Into<String>,
        ip: impl Into<String>,
        port: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Envelope::Message(ChatMessage {
            username: username.into(),
            ip: ip.into(),
            port: port.into(),
            content: content.into(),
        })
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String, ChatError> {
        serde_json::to_string(self).map_err(|e| ChatError::SerializationFailed(e.to_string()))
    }

    /// Parse decrypted text.
    pub fn parse(text: &str) -> Result<Self, ChatError> {
        serde_json::from_str(text).map_err(|e| ChatError::InvalidEnvelope(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_user_update_json() {
        let envelope = Envelope::user_update("bob", "10.0.0.3", "50412", &PeerStatus::Online);
        let json: serde_json::Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "user_update");
        assert_eq!(json["username"], "bob");
        assert_eq!(json["port"], "50412");
        assert_eq!(json["status"], "online");
    }

    #[test]
    fn test_parse_message() {
        let text = r#"{"type":"message","username":"alice","ip":"1.2.3.4","port":"9","content":"hello"}"#;
        let envelope = Envelope::parse(text).unwrap();
        assert_eq!(envelope, Envelope::message("alice", "1.2.3.4", "9", "hello"));
    }

    #[test]
    fn test_unknown_or_malformed_rejected() {
        for text in [
            r#"{"type":"typing","username":"alice"}"#,
            r#"{"type":"message","username":"alice"}"#,
            r#"{"type":"user_update","username":"a","ip":"1","port":9,"status":"online"}"#,
            "plain text",
        ] {
            assert!(
                matches!(Envelope::parse(text), Err(ChatError::InvalidEnvelope(_))),
                "{} should be rejected",
                text
            );
        }
    }

    #[test]
    fn test_last_seen_format() {
        let time = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(7, 5, 59)
            .unwrap()
            .and_utc();
        let status = PeerStatus::last_seen_at(&time);
        assert_eq!(status.to_string(), "last seen at 2024/03/09 07:05");
        assert_eq!(PeerStatus::parse(&status.to_string()), status);
        assert_eq!(PeerStatus::parse("online"), PeerStatus::Online);
    }
}
