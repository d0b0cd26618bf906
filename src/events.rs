//! Raw protocol events and the typed message-content model.
//!
//! The live stream delivers loosely-typed JSON payloads; this module turns
//! them into a tagged union discriminated by message kind. Payloads that do
//! not satisfy their variant's required fields are rejected (and dropped by
//! the classifier), never coerced.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::ids::{OwnedEventId, OwnedRoomId, OwnedUserId};

/// The event type tag for plain (or decrypted) room messages.
pub const MESSAGE_EVENT_TYPE: &str = "m.room.message";
/// The event type tag for encrypted events whose payload may not yet be decryptable.
pub const ENCRYPTED_EVENT_TYPE: &str = "m.room.encrypted";
/// The event type tag for reaction (annotation) events.
pub const REACTION_EVENT_TYPE: &str = "m.reaction";

/// An immutable event as delivered by the protocol client's live stream.
#[derive(Debug, Clone)]
pub struct RawProtocolEvent {
    /// The event's id, stable once confirmed by the server.
    pub event_id: OwnedEventId,
    pub room_id: OwnedRoomId,
    pub sender: OwnedUserId,
    /// The sender's resolved display name, if the client knows it.
    pub sender_display_name: Option<String>,
    /// The protocol-level event type tag, e.g. `m.room.message`.
    pub event_type: String,
    /// Milliseconds since the Unix epoch, as stamped by the origin server.
    pub origin_server_ts: u64,
    /// The raw, loosely-typed content payload.
    pub content: Value,
    /// How this event relates to another event, if at all.
    pub relation: Option<RelationDescriptor>,
    /// For encrypted events: the clear payload, present only once the
    /// client has successfully decrypted it. Encrypted events without this
    /// are droppable and may be re-emitted later when decryption completes.
    pub decrypted: Option<DecryptedPayload>,
}

/// The clear payload of a successfully-decrypted encrypted event.
#[derive(Debug, Clone)]
pub struct DecryptedPayload {
    pub event_type: String,
    pub content: Value,
    pub relation: Option<RelationDescriptor>,
}

/// A protocol relation linking one event to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationDescriptor {
    /// An edit (`m.replace`) of the target event.
    Replace { target: OwnedEventId },
    /// A reaction (`m.annotation`) to the target event with the given key.
    Annotation { target: OwnedEventId, key: String },
    /// A threaded reply under the given parent event.
    Thread { parent: OwnedEventId },
}

/// A content-address URL (`mxc` scheme), resolved through an authenticated
/// download endpoint rather than fetched directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentUrl(Url);

impl ContentUrl {
    /// Parses and validates a content-address URL.
    ///
    /// Requires the `mxc` scheme, a server-name host, and a non-empty media id.
    pub fn parse(s: &str) -> Result<Self, PayloadError> {
        let url = Url::parse(s).map_err(|_| PayloadError::InvalidContentUrl(s.to_owned()))?;
        let ok = url.scheme() == "mxc"
            && url.host_str().is_some_and(|h| !h.is_empty())
            && url.path().len() > 1;
        if ok {
            Ok(Self(url))
        } else {
            Err(PayloadError::InvalidContentUrl(s.to_owned()))
        }
    }

    /// The server-name component of the content address.
    pub fn server_name(&self) -> &str {
        self.0.host_str().unwrap_or_default()
    }

    /// The opaque media id component of the content address.
    pub fn media_id(&self) -> &str {
        self.0.path().trim_start_matches('/')
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Display for ContentUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl TryFrom<String> for ContentUrl {
    type Error = PayloadError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ContentUrl> for String {
    fn from(url: ContentUrl) -> Self {
        url.0.into()
    }
}

/// The kind of a displayable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Audio,
    Video,
    File,
    Emote,
}

/// A message content payload, discriminated by kind.
///
/// Each variant carries exactly the fields its kind requires; construction
/// goes through [`MessageContent::from_payload`], which rejects payloads
/// missing a mandatory field instead of coercing them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text { body: String },
    /// `body` is the uploader-supplied caption/filename; when absent, the
    /// view model falls back to a bracketed placeholder label.
    Image { body: Option<String>, source: ContentUrl },
    Audio { body: Option<String>, source: ContentUrl },
    Video { body: Option<String>, source: ContentUrl },
    File { body: Option<String>, source: ContentUrl },
    Emote { body: String },
}

/// Why a content payload failed to parse into its typed variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    /// The payload carried no `msgtype` tag, or one we do not display.
    #[error("unknown or missing message kind")]
    UnknownKind,
    /// A field mandatory for the payload's kind was missing or mistyped.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    /// A media payload's source URL did not match the content-address scheme.
    #[error("invalid content-address url: {0}")]
    InvalidContentUrl(String),
}

impl MessageContent {
    /// Parses a raw `msgtype`-tagged content payload into its typed variant.
    pub fn from_payload(content: &Value) -> Result<Self, PayloadError> {
        let msgtype = content
            .get("msgtype")
            .and_then(Value::as_str)
            .ok_or(PayloadError::UnknownKind)?;
        match msgtype {
            "m.text" | "m.notice" => Ok(Self::Text { body: required_body(content)? }),
            "m.emote" => Ok(Self::Emote { body: required_body(content)? }),
            "m.image" => Ok(Self::Image {
                body: optional_body(content),
                source: required_source(content)?,
            }),
            "m.audio" => Ok(Self::Audio {
                body: optional_body(content),
                source: required_source(content)?,
            }),
            "m.video" => Ok(Self::Video {
                body: optional_body(content),
                source: required_source(content)?,
            }),
            "m.file" => Ok(Self::File {
                body: optional_body(content),
                source: required_source(content)?,
            }),
            _ => Err(PayloadError::UnknownKind),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Text { .. } => MessageKind::Text,
            Self::Image { .. } => MessageKind::Image,
            Self::Audio { .. } => MessageKind::Audio,
            Self::Video { .. } => MessageKind::Video,
            Self::File { .. } => MessageKind::File,
            Self::Emote { .. } => MessageKind::Emote,
        }
    }

    /// The displayable body for this content, applying the per-kind fallbacks:
    /// bracketed placeholder labels for media without a caption, and the
    /// `* ... *` wrap for emotes.
    pub fn display_body(&self) -> String {
        match self {
            Self::Text { body } => body.clone(),
            Self::Emote { body } => format!("* {body} *"),
            Self::Image { body, .. } => body.clone().unwrap_or_else(|| "[Image]".to_owned()),
            Self::Audio { body, .. } => body.clone().unwrap_or_else(|| "[Audio]".to_owned()),
            Self::Video { body, .. } => body.clone().unwrap_or_else(|| "[Video]".to_owned()),
            Self::File { body, .. } => body.clone().unwrap_or_else(|| "[File]".to_owned()),
        }
    }

    /// The content-address URL of this message's media, if it has any.
    pub fn source(&self) -> Option<&ContentUrl> {
        match self {
            Self::Image { source, .. }
            | Self::Audio { source, .. }
            | Self::Video { source, .. }
            | Self::File { source, .. } => Some(source),
            Self::Text { .. } | Self::Emote { .. } => None,
        }
    }
}

fn required_body(content: &Value) -> Result<String, PayloadError> {
    content
        .get("body")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or(PayloadError::MissingField("body"))
}

fn optional_body(content: &Value) -> Option<String> {
    content.get("body").and_then(Value::as_str).map(str::to_owned)
}

fn required_source(content: &Value) -> Result<ContentUrl, PayloadError> {
    let url = content
        .get("url")
        .and_then(Value::as_str)
        .ok_or(PayloadError::MissingField("url"))?;
    ContentUrl::parse(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_payload_requires_body() {
        let ok = MessageContent::from_payload(&json!({"msgtype": "m.text", "body": "hi"}));
        assert_eq!(ok, Ok(MessageContent::Text { body: "hi".into() }));

        let missing = MessageContent::from_payload(&json!({"msgtype": "m.text"}));
        assert_eq!(missing, Err(PayloadError::MissingField("body")));
    }

    #[test]
    fn media_payload_requires_content_address_url() {
        let no_url = MessageContent::from_payload(&json!({"msgtype": "m.image", "body": "cat.png"}));
        assert_eq!(no_url, Err(PayloadError::MissingField("url")));

        let https_url = MessageContent::from_payload(&json!({
            "msgtype": "m.image", "url": "https://example.org/cat.png",
        }));
        assert!(matches!(https_url, Err(PayloadError::InvalidContentUrl(_))));

        let ok = MessageContent::from_payload(&json!({
            "msgtype": "m.image", "url": "mxc://example.org/abc123",
        }))
        .unwrap();
        assert_eq!(ok.kind(), MessageKind::Image);
        assert_eq!(ok.display_body(), "[Image]");
    }

    #[test]
    fn emote_body_is_wrapped_in_asterisks() {
        let emote = MessageContent::from_payload(&json!({"msgtype": "m.emote", "body": "waves"}))
            .unwrap();
        assert_eq!(emote.display_body(), "* waves *");
    }

    #[test]
    fn unknown_msgtype_is_rejected_not_coerced() {
        let custom = MessageContent::from_payload(&json!({"msgtype": "org.example.widget", "body": "?"}));
        assert_eq!(custom, Err(PayloadError::UnknownKind));
        assert_eq!(
            MessageContent::from_payload(&json!({"body": "untagged"})),
            Err(PayloadError::UnknownKind),
        );
    }

    #[test]
    fn content_url_exposes_server_name_and_media_id() {
        let url = ContentUrl::parse("mxc://example.org/SoMeMediaId42").unwrap();
        assert_eq!(url.server_name(), "example.org");
        assert_eq!(url.media_id(), "SoMeMediaId42");
        assert!(ContentUrl::parse("mxc://example.org/").is_err());
        assert!(ContentUrl::parse("mxc:///no-server").is_err());
    }
}
