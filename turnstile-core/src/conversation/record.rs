//! Conversation Records
//!
//! A [`Record`] pairs a model-safe [`Message`] with structured metadata.
//! Raw caller items are split into the two halves by [`Record::from_raw`];
//! [`Record::to_message`] is the only projection ever handed to a model.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::message::{Message, MessageRole};

/// Loosely-typed conversation item as produced by an agent runner
pub type RawItem = Map<String, Value>;

/// `kind` tag of the synthetic user record that opens a summary pair
pub const SUMMARY_PROMPT_KIND: &str = "history_summary_prompt";

/// `kind` tag of the synthetic assistant record carrying the summary
pub const SUMMARY_KIND: &str = "history_summary";

const ROLE_KEY: &str = "role";
const CONTENT_KEY: &str = "content";
const NAME_KEY: &str = "name";
const METADATA_KEY: &str = "metadata";
const SYNTHETIC_KEY: &str = "synthetic";
const KIND_KEY: &str = "kind";
const SUMMARY_FOR_TURNS_KEY: &str = "summary_for_turns";

/// Where a record came from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RecordKind {
    /// Part of the live conversation
    #[default]
    Real,
    /// Synthetic user prompt standing in for a summarized prefix
    SummaryPrompt { summary_for_turns: Option<String> },
    /// Synthetic assistant summary of a summarized prefix
    Summary { summary_for_turns: Option<String> },
    /// Caller-marked synthetic record without a summary tag; its own
    /// `kind` and `summary_for_turns`, if any, stay in `extra`
    Synthetic,
}

impl RecordKind {
    pub fn is_synthetic(&self) -> bool {
        !matches!(self, RecordKind::Real)
    }

    /// Tag used in the metadata map view
    pub fn tag(&self) -> Option<&'static str> {
        match self {
            RecordKind::Real | RecordKind::Synthetic => None,
            RecordKind::SummaryPrompt { .. } => Some(SUMMARY_PROMPT_KIND),
            RecordKind::Summary { .. } => Some(SUMMARY_KIND),
        }
    }

    /// Description of the index range a synthetic record replaces
    pub fn summary_for_turns(&self) -> Option<&str> {
        match self {
            RecordKind::Real | RecordKind::Synthetic => None,
            RecordKind::SummaryPrompt { summary_for_turns }
            | RecordKind::Summary { summary_for_turns } => summary_for_turns.as_deref(),
        }
    }
}

/// Metadata attached to a record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordMetadata {
    /// Real or synthetic
    pub kind: RecordKind,
    /// Every caller-supplied key that is not part of the message
    pub extra: Map<String, Value>,
}

/// A message plus its metadata
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RecordParts")]
pub struct Record {
    pub message: Message,
    pub metadata: RecordMetadata,
}

#[derive(Deserialize)]
struct RecordParts {
    message: Message,
    #[serde(default)]
    metadata: Map<String, Value>,
}

impl From<RecordParts> for Record {
    fn from(parts: RecordParts) -> Self {
        Record::from_parts(parts.message, parts.metadata)
    }
}

impl Record {
    /// A real record with no extra metadata
    pub fn real(message: Message) -> Self {
        Self {
            message,
            metadata: RecordMetadata::default(),
        }
    }

    /// Synthetic user record opening a summary pair
    pub fn summary_prompt(content: impl Into<String>, summary_for_turns: impl Into<String>) -> Self {
        Self {
            message: Message::user(content),
            metadata: RecordMetadata {
                kind: RecordKind::SummaryPrompt {
                    summary_for_turns: Some(summary_for_turns.into()),
                },
                extra: Map::new(),
            },
        }
    }

    /// Synthetic assistant record holding the summary text
    pub fn summary(content: impl Into<String>, summary_for_turns: impl Into<String>) -> Self {
        Self {
            message: Message::assistant(content),
            metadata: RecordMetadata {
                kind: RecordKind::Summary {
                    summary_for_turns: Some(summary_for_turns.into()),
                },
                extra: Map::new(),
            },
        }
    }

    /// Split a raw item into message and metadata.
    ///
    /// Never fails: a missing role becomes `user`, a missing content becomes
    /// the JSON text of the whole item, and anything that does not fit the
    /// message is kept in metadata.
    pub fn from_raw(raw: RawItem) -> Self {
        let fallback_content =
            (!raw.contains_key(CONTENT_KEY)).then(|| Value::Object(raw.clone()).to_string());

        let mut metadata = raw;

        let role = match metadata.remove(ROLE_KEY) {
            Some(value) => match value.as_str().and_then(MessageRole::parse) {
                Some(role) => role,
                None => {
                    metadata.insert(ROLE_KEY.to_string(), value);
                    MessageRole::User
                }
            },
            None => MessageRole::User,
        };

        let content = match metadata.remove(CONTENT_KEY) {
            Some(Value::String(text)) => text,
            Some(other) => other.to_string(),
            None => fallback_content.unwrap_or_default(),
        };

        let name = match metadata.remove(NAME_KEY) {
            Some(Value::String(text)) => Some(text),
            Some(other) => {
                metadata.insert(NAME_KEY.to_string(), other);
                None
            }
            None => None,
        };

        match metadata.remove(METADATA_KEY) {
            Some(Value::Object(nested)) => metadata.extend(nested),
            Some(other) => {
                metadata.insert(METADATA_KEY.to_string(), other);
            }
            None => {}
        }

        let message = Message {
            role,
            content,
            name,
        };

        Self::from_parts(message, metadata)
    }

    /// Build a record from a message and a conventional metadata map
    pub fn from_parts(message: Message, mut extra: Map<String, Value>) -> Self {
        let kind = classify(message.role, &mut extra);
        Self {
            message,
            metadata: RecordMetadata { kind, extra },
        }
    }

    /// Model-safe projection
    pub fn to_message(&self) -> Message {
        self.message.clone()
    }

    pub fn is_synthetic(&self) -> bool {
        self.metadata.kind.is_synthetic()
    }

    /// A real user message starts a new turn
    pub fn is_turn_start(&self) -> bool {
        self.message.role == MessageRole::User && !self.is_synthetic()
    }

    /// Conventional metadata map: caller keys plus `synthetic`, `kind` and
    /// `summary_for_turns` where they apply
    pub fn metadata_map(&self) -> Map<String, Value> {
        let mut map = self.metadata.extra.clone();
        if self.message.role.is_conversational() {
            map.insert(
                SYNTHETIC_KEY.to_string(),
                Value::Bool(self.metadata.kind.is_synthetic()),
            );
        }
        if let Some(tag) = self.metadata.kind.tag() {
            map.insert(KIND_KEY.to_string(), Value::String(tag.to_string()));
        }
        if let Some(range) = self.metadata.kind.summary_for_turns() {
            map.insert(
                SUMMARY_FOR_TURNS_KEY.to_string(),
                Value::String(range.to_string()),
            );
        }
        map
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct View<'a> {
            message: &'a Message,
            metadata: Map<String, Value>,
        }

        View {
            message: &self.message,
            metadata: self.metadata_map(),
        }
        .serialize(serializer)
    }
}

fn classify(role: MessageRole, extra: &mut Map<String, Value>) -> RecordKind {
    if !role.is_conversational() {
        return RecordKind::Real;
    }

    let synthetic = match extra.remove(SYNTHETIC_KEY) {
        Some(Value::Bool(flag)) => flag,
        Some(other) => {
            // Not a flag we understand; keep it visible for debugging
            extra.insert(format!("raw_{}", SYNTHETIC_KEY), other);
            false
        }
        None => false,
    };

    if !synthetic {
        return RecordKind::Real;
    }

    let is_prompt = match extra.get(KIND_KEY).and_then(Value::as_str) {
        Some(SUMMARY_PROMPT_KIND) => true,
        Some(SUMMARY_KIND) => false,
        _ => return RecordKind::Synthetic,
    };
    extra.remove(KIND_KEY);

    let summary_for_turns = match extra.remove(SUMMARY_FOR_TURNS_KEY) {
        Some(Value::String(text)) => Some(text),
        Some(other) => Some(other.to_string()),
        None => None,
    };

    if is_prompt {
        RecordKind::SummaryPrompt { summary_for_turns }
    } else {
        RecordKind::Summary { summary_for_turns }
    }
}
