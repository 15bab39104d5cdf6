//! Conversation table access.
//!
//! Items are converted from DynamoDB attribute values to plain JSON right
//! after the scan, so everything downstream (and every test) works on
//! `serde_json` maps.

use crate::error::{PipelineError, Result};
use crate::pricing::parse_decimal;
use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rust_decimal::Decimal;
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use tracing::{debug, info, warn};

pub type Item = Map<String, Value>;

#[async_trait]
pub trait ConversationSource: Send + Sync {
    /// Returns every item of the table.
    async fn scan(&self) -> Result<Vec<Item>>;

    fn name(&self) -> &str;
}

pub struct DynamoConversationSource {
    client: Client,
    table_name: String,
}

impl DynamoConversationSource {
    pub fn new(client: Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    pub async fn from_env(table_name: impl Into<String>) -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(Client::new(&config), table_name)
    }
}

#[async_trait]
impl ConversationSource for DynamoConversationSource {
    async fn scan(&self) -> Result<Vec<Item>> {
        info!(table = %self.table_name, "Scanning conversation table");

        let mut items = Vec::new();
        let mut start_key: Option<HashMap<String, AttributeValue>> = None;
        let mut page = 1;

        loop {
            let output = self
                .client
                .scan()
                .table_name(&self.table_name)
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| {
                    warn!(table = %self.table_name, "Scan failed: {}", e);
                    PipelineError::DynamoDbError(e.into())
                })?;

            items.extend(output.items().iter().map(item_to_json));
            debug!(page, items = items.len(), "Scanned page");

            match output.last_evaluated_key() {
                Some(key) if !key.is_empty() => {
                    start_key = Some(key.clone());
                    page += 1;
                }
                _ => break,
            }
        }

        info!(table = %self.table_name, items = items.len(), pages = page, "Scan complete");
        Ok(items)
    }

    fn name(&self) -> &str {
        &self.table_name
    }
}

/// In-memory table, used for local runs and tests.
pub struct StaticConversationSource {
    name: String,
    items: Vec<Item>,
}

impl StaticConversationSource {
    pub fn new(name: impl Into<String>, items: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            items: items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect(),
        }
    }
}

#[async_trait]
impl ConversationSource for StaticConversationSource {
    async fn scan(&self) -> Result<Vec<Item>> {
        Ok(self.items.clone())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub fn item_to_json(item: &HashMap<String, AttributeValue>) -> Item {
    item.iter()
        .map(|(k, v)| (k.clone(), attribute_to_json(v)))
        .collect()
}

pub fn attribute_to_json(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => number_to_json(n),
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::M(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), attribute_to_json(v)))
                .collect(),
        ),
        AttributeValue::L(list) => Value::Array(list.iter().map(attribute_to_json).collect()),
        AttributeValue::Ss(set) => Value::Array(set.iter().cloned().map(Value::String).collect()),
        AttributeValue::Ns(set) => Value::Array(set.iter().map(|n| number_to_json(n)).collect()),
        AttributeValue::B(blob) => Value::String(STANDARD.encode(blob.as_ref())),
        AttributeValue::Bs(set) => Value::Array(
            set.iter()
                .map(|blob| Value::String(STANDARD.encode(blob.as_ref())))
                .collect(),
        ),
        _ => Value::Null,
    }
}

fn number_to_json(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Number(i.into());
    }
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(raw.to_string()))
}

/// The attributes of a conversation item the pipeline reads.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationItem {
    pub pk: String,
    pub sk: String,
    pub create_time: CreateTime,
    pub message_map: Option<Value>,
    pub total_price: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateTime {
    Missing,
    Invalid,
    /// Epoch milliseconds.
    Millis(i64),
}

impl ConversationItem {
    pub fn from_attributes(item: &Item) -> Self {
        let text = |name: &str| {
            item.get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        ConversationItem {
            pk: text("PK"),
            sk: text("SK"),
            create_time: parse_create_time(item.get("CreateTime")),
            message_map: item.get("MessageMap").and_then(decode_message_map),
            total_price: item.get("TotalPrice").and_then(decimal_of),
        }
    }

    /// Conversation rows, as opposed to bot or user-setting rows sharing the table.
    pub fn is_conversation(&self) -> bool {
        self.sk.contains("#CONV#")
    }
}

fn parse_create_time(value: Option<&Value>) -> CreateTime {
    match value {
        None | Some(Value::Null) => CreateTime::Missing,
        Some(Value::String(s)) if s.trim().is_empty() => CreateTime::Missing,
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .map(CreateTime::Millis)
            .unwrap_or(CreateTime::Invalid),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(CreateTime::Millis)
            .unwrap_or(CreateTime::Invalid),
        Some(_) => CreateTime::Invalid,
    }
}

fn decimal_of(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => parse_decimal(&n.to_string()),
        Value::String(s) => parse_decimal(s.trim()),
        _ => None,
    }
}

/// `MessageMap` is either a map attribute or a JSON document stored as a
/// string. Strings are parsed leniently; anything unusable becomes `None`.
pub fn decode_message_map(value: &Value) -> Option<Value> {
    let decoded = match value {
        Value::Object(map) if !map.is_empty() => Some(value.clone()),
        Value::String(raw) if !raw.trim().is_empty() => parse_lenient(raw),
        _ => None,
    };
    decoded.filter(|v| v.as_object().map(|m| !m.is_empty()).unwrap_or(false))
}

fn parse_lenient(raw: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        return Some(value);
    }

    let without_breaks: String = raw.chars().filter(|c| *c != '\n' && *c != '\r').collect();
    if let Ok(value) = serde_json::from_str::<Value>(&without_breaks) {
        return Some(value);
    }

    // Older writers truncated empty bodies to `"body": ",`.
    if raw.contains(r#"ody": ","#) {
        let repaired = raw.replace(r#"ody": ","#, r#"ody": "","#);
        if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
            return Some(value);
        }
    }

    warn!(length = raw.len(), "Unparseable MessageMap string");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_dynamodb::primitives::Blob;
    use std::str::FromStr;
    use serde_json::json;

    #[test]
    fn test_attribute_conversion() {
        let item = HashMap::from([
            ("PK".to_string(), AttributeValue::S("user-1".to_string())),
            ("CreateTime".to_string(), AttributeValue::N("1766916000000".to_string())),
            ("TotalPrice".to_string(), AttributeValue::N("0.0125".to_string())),
            ("IsPinned".to_string(), AttributeValue::Bool(false)),
            (
                "MessageMap".to_string(),
                AttributeValue::M(HashMap::from([(
                    "system".to_string(),
                    AttributeValue::M(HashMap::from([
                        ("role".to_string(), AttributeValue::S("system".to_string())),
                        ("content".to_string(), AttributeValue::L(vec![])),
                    ])),
                )])),
            ),
            ("Raw".to_string(), AttributeValue::B(Blob::new("hi"))),
        ]);

        let json = Value::Object(item_to_json(&item));
        assert_eq!(json["PK"], json!("user-1"));
        assert_eq!(json["CreateTime"], json!(1766916000000i64));
        assert_eq!(json["TotalPrice"], json!(0.0125));
        assert_eq!(json["IsPinned"], json!(false));
        assert_eq!(json["MessageMap"]["system"]["role"], json!("system"));
        assert_eq!(json["Raw"], json!("aGk="));
    }

    #[test]
    fn test_conversation_item_fields() {
        let item = json!({
            "PK": "user-1",
            "SK": "user-1#CONV#abc",
            "CreateTime": "1766916000000",
            "TotalPrice": 0.5,
            "MessageMap": "{\"n\": {\"role\": \"user\", \"content\": []}}"
        });
        let parsed = ConversationItem::from_attributes(item.as_object().unwrap());
        assert_eq!(parsed.pk, "user-1");
        assert!(parsed.is_conversation());
        assert_eq!(parsed.create_time, CreateTime::Millis(1_766_916_000_000));
        assert_eq!(parsed.total_price, Some(Decimal::from_str("0.5").unwrap()));
        assert_eq!(parsed.message_map.unwrap()["n"]["role"], json!("user"));
    }

    #[test]
    fn test_create_time_variants() {
        assert_eq!(parse_create_time(None), CreateTime::Missing);
        assert_eq!(parse_create_time(Some(&json!(""))), CreateTime::Missing);
        assert_eq!(parse_create_time(Some(&json!("yesterday"))), CreateTime::Invalid);
        assert_eq!(parse_create_time(Some(&json!(12))), CreateTime::Millis(12));
        assert_eq!(parse_create_time(Some(&json!([1]))), CreateTime::Invalid);
    }

    #[test]
    fn test_message_map_repairs() {
        let with_breaks = "{\"n\": {\"role\": \"user\",\n \"content\": \"line\nbreak\"}}";
        let decoded = decode_message_map(&json!(with_breaks)).unwrap();
        assert_eq!(decoded["n"]["content"], json!("linebreak"));

        let truncated = r#"{"n": {"role": "user", "content": [{"content_type": "text", "body": ", "x": 1}]}}"#;
        let decoded = decode_message_map(&json!(truncated)).unwrap();
        assert_eq!(decoded["n"]["content"][0]["body"], json!(""));

        assert_eq!(decode_message_map(&json!("not json")), None);
        assert_eq!(decode_message_map(&json!({})), None);
        assert_eq!(decode_message_map(&json!("[1, 2]")), None);
        assert_eq!(decode_message_map(&json!(42)), None);
    }

    #[tokio::test]
    async fn test_static_source_skips_non_objects() {
        let source = StaticConversationSource::new("t", vec![json!({"PK": "a"}), json!(1)]);
        assert_eq!(source.scan().await.unwrap().len(), 1);
        assert_eq!(source.name(), "t");
    }
}
