//! Typed view over a conversation's `MessageMap`.
//!
//! The chat backend stores messages as a map from node id to node. Content
//! items are polymorphic (`text`, `toolUse`, `toolResult`) and may carry a
//! nested message of their own. Parsing never fails: malformed fields become
//! empty values so token accounting stays total.

use crate::json_util::{is_blank, text_of};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    User,
    System,
    Instruction,
    Assistant,
    Bot,
    Other(String),
}

/// Which side of a model call a piece of text is billed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Input,
    Output,
}

impl Role {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "user" => Role::User,
            "system" => Role::System,
            "instruction" => Role::Instruction,
            "assistant" => Role::Assistant,
            "bot" => Role::Bot,
            other => Role::Other(other.to_string()),
        }
    }

    fn from_value(value: Option<&Value>) -> Self {
        Role::parse(value.and_then(Value::as_str).unwrap_or_default())
    }

    pub fn side(&self) -> Option<Side> {
        match self {
            Role::User | Role::System => Some(Side::Input),
            Role::Assistant | Role::Bot => Some(Side::Output),
            Role::Instruction | Role::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Empty,
    Plain(String),
    Items(Vec<ContentItem>),
}

impl Content {
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::String(s)) if !s.is_empty() => Content::Plain(s.clone()),
            Some(Value::Array(items)) => Content::Items(
                items
                    .iter()
                    .filter(|item| item.is_object())
                    .map(ContentItem::from_value)
                    .collect(),
            ),
            Some(item @ Value::Object(_)) => Content::Items(vec![ContentItem::from_value(item)]),
            _ => Content::Empty,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentKind {
    Text,
    /// A tool call produced by the model; `input` is the call's argument object.
    ToolUse { input: Value },
    /// Tool output fed back to the model, one string per result element.
    ToolResult { results: Vec<String> },
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NestedMessage {
    pub role: Role,
    pub content: Content,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContentItem {
    pub kind: ContentKind,
    /// `body` when it is a plain string, whatever the content type.
    pub body_text: Option<String>,
    pub nested: Option<Box<NestedMessage>>,
}

impl ContentItem {
    pub fn from_value(value: &Value) -> Self {
        let body = value.get("body");
        let content_type = value
            .get("content_type")
            .and_then(Value::as_str)
            .unwrap_or("text");

        let kind = match content_type {
            "text" => ContentKind::Text,
            "toolUse" => ContentKind::ToolUse {
                input: body
                    .and_then(|b| b.get("input"))
                    .cloned()
                    .unwrap_or(Value::Null),
            },
            "toolResult" => ContentKind::ToolResult {
                results: tool_result_texts(body),
            },
            other => ContentKind::Unknown(other.to_string()),
        };

        let nested = match (value.get("role"), value.get("content")) {
            (Some(role), Some(content)) => Some(Box::new(NestedMessage {
                role: Role::from_value(Some(role)),
                content: Content::from_value(Some(content)),
            })),
            _ => None,
        };

        ContentItem {
            kind,
            body_text: body.and_then(Value::as_str).map(str::to_string),
            nested,
        }
    }
}

fn tool_result_texts(body: Option<&Value>) -> Vec<String> {
    let Some(elements) = body
        .and_then(|b| b.get("content"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    elements
        .iter()
        .filter_map(|element| {
            if let Some(content) = element.get("json").and_then(|j| j.get("content")) {
                return (!is_blank(content)).then(|| text_of(content));
            }
            element
                .get("text")
                .and_then(Value::as_str)
                .filter(|text| !text.is_empty())
                .map(str::to_string)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Feedback {
    pub thumbs_up: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageNode {
    pub role: Role,
    pub content: Content,
    /// Retrieved context passed to the model alongside the message.
    pub used_chunks: Vec<String>,
    pub feedback: Option<Feedback>,
}

impl MessageNode {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_object()?;

        let used_chunks = value
            .get("used_chunks")
            .and_then(Value::as_array)
            .map(|chunks| {
                chunks
                    .iter()
                    .filter_map(|chunk| chunk.get("content"))
                    .filter(|content| !is_blank(content))
                    .map(text_of)
                    .collect()
            })
            .unwrap_or_default();

        let feedback = value
            .get("feedback")
            .and_then(|f| f.get("thumbs_up"))
            .and_then(Value::as_bool)
            .map(|thumbs_up| Feedback { thumbs_up });

        Some(MessageNode {
            role: Role::from_value(value.get("role")),
            content: Content::from_value(value.get("content")),
            used_chunks,
            feedback,
        })
    }

    /// Plain text the node contributes, for question extraction.
    pub fn text_bodies(&self) -> Vec<&str> {
        match &self.content {
            Content::Empty => Vec::new(),
            Content::Plain(text) => vec![text.as_str()],
            Content::Items(items) => items
                .iter()
                .filter(|item| item.kind == ContentKind::Text)
                .filter_map(|item| item.body_text.as_deref())
                .filter(|text| !text.is_empty())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageMap {
    pub nodes: Vec<(String, MessageNode)>,
}

impl MessageMap {
    pub fn from_value(value: &Value) -> Self {
        let nodes = value
            .as_object()
            .map(|map| {
                map.iter()
                    .filter_map(|(id, node)| MessageNode::from_value(node).map(|n| (id.clone(), n)))
                    .collect()
            })
            .unwrap_or_default();

        MessageMap { nodes }
    }

    pub fn iter(&self) -> impl Iterator<Item = &MessageNode> {
        self.nodes.iter().map(|(_, node)| node)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
