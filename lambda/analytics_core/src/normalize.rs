//! Extract stage: one row per user summarizing their conversations.

use crate::config::DateRange;
use crate::dynamo::{ConversationItem, CreateTime, Item};
use crate::error::Result;
use crate::message::{MessageMap, Role};
use crate::pricing::{fixed, Pricing};
use crate::processing::format_create_date;
use crate::tokens::{extract_tokens, Heuristic, TokenCounts};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

pub const NORMALIZED_COLUMNS: [&str; 12] = [
    "user_id",
    "conversation_count",
    "message_count",
    "positive_feedback",
    "negative_feedback",
    "feedback_classification",
    "first_conversation",
    "last_conversation",
    "questions",
    "input_tokens",
    "output_tokens",
    "total_price",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackClassification {
    Positive,
    Negative,
    Mixed,
    None,
}

impl FeedbackClassification {
    pub fn classify(positive: u64, negative: u64) -> Self {
        match (positive > 0, negative > 0) {
            (true, false) => FeedbackClassification::Positive,
            (false, true) => FeedbackClassification::Negative,
            (true, true) => FeedbackClassification::Mixed,
            (false, false) => FeedbackClassification::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRow {
    pub user_id: String,
    pub conversation_count: u64,
    pub message_count: u64,
    pub positive_feedback: u64,
    pub negative_feedback: u64,
    pub feedback_classification: FeedbackClassification,
    pub first_conversation: String,
    pub last_conversation: String,
    /// JSON array of the user's question texts.
    pub questions: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_price: Decimal,
}

impl NormalizedRow {
    pub fn question_list(&self) -> Vec<String> {
        serde_json::from_str(&self.questions).unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct UserAccumulator {
    conversations: Vec<(Option<i64>, MessageMap)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizeOutcome {
    pub rows: Vec<NormalizedRow>,
    pub conversations: usize,
    pub skipped: usize,
    pub unknown_content_types: BTreeSet<String>,
}

pub fn normalize_items(items: &[Item], range: &DateRange, pricing: &Pricing) -> NormalizeOutcome {
    let mut users: BTreeMap<String, UserAccumulator> = BTreeMap::new();
    let mut outcome = NormalizeOutcome::default();

    for raw in items {
        let item = ConversationItem::from_attributes(raw);
        if !item.is_conversation() || item.pk.is_empty() {
            outcome.skipped += 1;
            continue;
        }

        let millis = match item.create_time {
            CreateTime::Millis(millis) if range.contains_millis(millis) => Some(millis),
            CreateTime::Millis(_) => {
                outcome.skipped += 1;
                continue;
            }
            CreateTime::Invalid | CreateTime::Missing => {
                warn!(pk = %item.pk, sk = %item.sk, "Conversation without usable CreateTime");
                None
            }
        };

        let map = item
            .message_map
            .as_ref()
            .map(MessageMap::from_value)
            .unwrap_or_default();

        users
            .entry(item.pk)
            .or_default()
            .conversations
            .push((millis, map));
        outcome.conversations += 1;
    }

    for (user_id, mut user) in users {
        // Stable: conversations without a time keep scan order, ahead of dated ones.
        user.conversations.sort_by_key(|(millis, _)| *millis);

        let mut counts = TokenCounts::default();
        let mut message_count = 0;
        let mut positive = 0;
        let mut negative = 0;
        let mut questions: Vec<String> = Vec::new();

        for (_, map) in &user.conversations {
            let extraction = extract_tokens(map, Heuristic::Enhanced);
            counts += extraction.counts;
            outcome
                .unknown_content_types
                .extend(extraction.unknown_content_types);

            for node in map.iter() {
                if matches!(node.role, Role::User | Role::Assistant | Role::Bot) {
                    message_count += 1;
                }
                match node.feedback {
                    Some(feedback) if feedback.thumbs_up => positive += 1,
                    Some(_) => negative += 1,
                    None => {}
                }
                if node.role == Role::User {
                    questions.extend(node.text_bodies().into_iter().map(str::to_string));
                }
            }
        }

        let dated: Vec<i64> = user.conversations.iter().filter_map(|(m, _)| *m).collect();
        let date_of = |millis: Option<&i64>| {
            millis
                .and_then(|m| format_create_date(*m))
                .unwrap_or_default()
        };

        outcome.rows.push(NormalizedRow {
            user_id,
            conversation_count: user.conversations.len() as u64,
            message_count,
            positive_feedback: positive,
            negative_feedback: negative,
            feedback_classification: FeedbackClassification::classify(positive, negative),
            first_conversation: date_of(dated.iter().min()),
            last_conversation: date_of(dated.iter().max()),
            questions: serde_json::to_string(&questions).unwrap_or_else(|_| "[]".to_string()),
            input_tokens: counts.input,
            output_tokens: counts.output,
            total_price: fixed(pricing.price(counts).total),
        });
    }

    info!(
        users = outcome.rows.len(),
        conversations = outcome.conversations,
        skipped = outcome.skipped,
        "Normalized conversations"
    );
    outcome
}

pub fn write_normalized_csv(rows: &[NormalizedRow]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    writer.write_record(NORMALIZED_COLUMNS)?;
    for row in rows {
        writer.serialize(row)?;
    }

    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()).into())
}

pub fn read_normalized_csv(bytes: &[u8]) -> Result<Vec<NormalizedRow>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(bytes);
    let rows = reader
        .deserialize::<NormalizedRow>()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn range() -> DateRange {
        DateRange {
            start: NaiveDate::from_ymd_opt(2025, 8, 4).unwrap(),
            end: NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
        }
    }

    fn items(values: Vec<Value>) -> Vec<Item> {
        values
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    fn conversation(pk: &str, id: &str, millis: i64, question: &str, thumbs_up: Option<bool>) -> Value {
        let mut answer = json!({"role": "assistant", "content": [{"content_type": "text", "body": "12345678"}]});
        if let Some(up) = thumbs_up {
            answer["feedback"] = json!({"thumbs_up": up});
        }
        json!({
            "PK": pk,
            "SK": format!("{pk}#CONV#{id}"),
            "CreateTime": millis,
            "MessageMap": {
                "system": {"role": "system", "content": [{"content_type": "text", "body": ""}]},
                "q": {"role": "user", "content": [{"content_type": "text", "body": question}]},
                "a": answer
            }
        })
    }

    #[test]
    fn test_feedback_classification() {
        assert_eq!(FeedbackClassification::classify(2, 0), FeedbackClassification::Positive);
        assert_eq!(FeedbackClassification::classify(0, 1), FeedbackClassification::Negative);
        assert_eq!(FeedbackClassification::classify(1, 1), FeedbackClassification::Mixed);
        assert_eq!(FeedbackClassification::classify(0, 0), FeedbackClassification::None);
    }

    #[test]
    fn test_rows_per_user() {
        let input = items(vec![
            // 2025-12-28 10:00:00 and 2025-12-27 00:00:00
            conversation("u2", "b", 1766916000000, "Second question", Some(false)),
            conversation("u2", "a", 1766793600000, "First question", Some(true)),
            conversation("u1", "c", 1766916000000, "Only question", None),
            json!({"PK": "u1", "SK": "BOT#1", "CreateTime": 1766916000000i64}),
            // 2025-01-01, outside the range
            conversation("u3", "z", 1735689600000, "old", None),
        ]);

        let outcome = normalize_items(&input, &range(), &Pricing::default());
        assert_eq!(outcome.conversations, 3);
        assert_eq!(outcome.skipped, 2);
        assert_eq!(outcome.rows.len(), 2);

        let u1 = &outcome.rows[0];
        assert_eq!(u1.user_id, "u1");
        assert_eq!(u1.feedback_classification, FeedbackClassification::None);

        let u2 = &outcome.rows[1];
        assert_eq!(u2.conversation_count, 2);
        assert_eq!(u2.message_count, 4);
        assert_eq!(u2.positive_feedback, 1);
        assert_eq!(u2.negative_feedback, 1);
        assert_eq!(u2.feedback_classification, FeedbackClassification::Mixed);
        assert_eq!(u2.first_conversation, "2025-12-27 00:00:00");
        assert_eq!(u2.last_conversation, "2025-12-28 10:00:00");
        assert_eq!(
            u2.question_list(),
            vec!["First question".to_string(), "Second question".to_string()]
        );
        // "First question" and "Second question" give 3 tokens each; answers 2 each.
        assert_eq!(u2.input_tokens, 6);
        assert_eq!(u2.output_tokens, 4);
        assert_eq!(u2.total_price.to_string(), "0.000078");
    }

    #[test]
    fn test_csv_round_trip_keeps_questions() {
        let input = items(vec![conversation(
            "u1",
            "a",
            1766916000000,
            "Does \"quoted\", text survive?",
            Some(true),
        )]);
        let rows = normalize_items(&input, &range(), &Pricing::default()).rows;
        let bytes = write_normalized_csv(&rows).unwrap();
        let parsed = read_normalized_csv(&bytes).unwrap();
        assert_eq!(parsed, rows);
        assert_eq!(
            parsed[0].question_list(),
            vec!["Does \"quoted\", text survive?".to_string()]
        );
    }

    #[test]
    fn test_empty_output_is_header_only() {
        let bytes = write_normalized_csv(&[]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.trim_end(), NORMALIZED_COLUMNS.join(","));
    }
}
