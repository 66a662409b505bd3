use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// One decoded frame of the streaming connection, as Flowdock sends it.
///
/// Fields the adapter never looks at are dropped during decode. `user` and
/// `id` arrive as either JSON numbers or numeric strings depending on the
/// event type, so both spellings are accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub flow: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub user: Option<u64>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub id: Option<u64>,
}

/// Deserializes a remote id given as a number or a numeric string.
pub(crate) fn de_id<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    id_from_value(&Value::deserialize(deserializer)?).ok_or_else(|| {
        serde::de::Error::custom("expected a numeric id")
    })
}

fn de_opt_id<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        value => id_from_value(&value)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom("expected a numeric id")),
    }
}

fn id_from_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// A chat event (top-level message or threaded comment) ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    /// Flow the event was posted in; absent for private 1:1 messages.
    pub flow: Option<String>,
    /// Remote id of the posting user.
    pub user: u64,
    /// The event's own id.
    pub id: u64,
    /// Message text; empty when the event carried no usable content.
    pub body: String,
    /// Thread root this event replies to. `Some` exactly for comments.
    pub thread_root: Option<u64>,
}

/// A classified stream event. Unrecognized discriminators become [`Unknown`],
/// never an error; records missing the fields dispatch needs become
/// [`Malformed`] and are dropped downstream.
///
/// [`Unknown`]: Event::Unknown
/// [`Malformed`]: Event::Malformed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Message(ChatEvent),
    Comment(ChatEvent),
    UserActivity,
    Action { action_type: Option<String> },
    Unknown(String),
    Malformed { event: String, reason: String },
}

/// Turns a raw frame into its typed form. Total: never fails, every input maps
/// to some variant.
pub fn classify(raw: RawEvent) -> Event {
    match raw.event.as_str() {
        "message" => chat_event(raw, false),
        "comment" => chat_event(raw, true),
        "activity.user" => Event::UserActivity,
        "action" => Event::Action {
            action_type: raw
                .content
                .get("type")
                .and_then(Value::as_str)
                .map(str::to_owned),
        },
        _ => Event::Unknown(raw.event),
    }
}

fn chat_event(raw: RawEvent, comment: bool) -> Event {
    let (Some(user), Some(id)) = (raw.user, raw.id) else {
        return Event::Malformed {
            event: raw.event,
            reason: "missing user or id".into(),
        };
    };

    let thread_root = if comment {
        match thread_root_from_tags(&raw.tags) {
            Some(root) => Some(root),
            // The remote should always tag comments with their thread root;
            // a comment without one cannot be addressed, so drop it.
            None => {
                return Event::Malformed {
                    event: raw.event,
                    reason: "comment without an influx tag".into(),
                }
            }
        }
    } else {
        None
    };

    let chat = ChatEvent {
        flow: raw.flow,
        user,
        id,
        body: body_text(&raw.content),
        thread_root,
    };
    if comment {
        Event::Comment(chat)
    } else {
        Event::Message(chat)
    }
}

/// Thread root of a reply, taken from the first `influx:<digits>` tag.
pub fn thread_root_from_tags(tags: &[String]) -> Option<u64> {
    tags.iter()
        .find_map(|tag| tag.strip_prefix("influx:").and_then(|digits| digits.parse().ok()))
}

fn body_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Object(map) => map
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}
