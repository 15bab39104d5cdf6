//! Turns scanned conversation items into token usage rows.

use crate::config::DateRange;
use crate::dynamo::{ConversationItem, CreateTime, Item};
use crate::message::MessageMap;
use crate::pricing::{fixed, PriceBreakdown, Pricing};
use crate::tokens::{extract_tokens, Heuristic, TokenCounts};
use crate::usage::{Source, TokenUsageRow};
use chrono::DateTime;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use tracing::{debug, warn};

pub const CREATE_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone)]
pub struct ProcessingOptions {
    pub heuristic: Heuristic,
    pub range: DateRange,
    pub pricing: Pricing,
    pub source: Source,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessingOutcome {
    pub rows: Vec<TokenUsageRow>,
    /// Items that produced a row.
    pub processed: usize,
    /// Items dropped because their creation time was outside the range.
    pub filtered: usize,
    /// Items kept despite a defect (unreadable time or message map).
    pub errors: usize,
    pub unknown_content_types: BTreeSet<String>,
}

pub fn process_items(items: &[Item], options: &ProcessingOptions) -> ProcessingOutcome {
    let mut outcome = ProcessingOutcome::default();

    for raw in items {
        let item = ConversationItem::from_attributes(raw);

        let create_date = match item.create_time {
            CreateTime::Millis(millis) if !options.range.contains_millis(millis) => {
                outcome.filtered += 1;
                continue;
            }
            CreateTime::Millis(millis) => match format_create_date(millis) {
                Some(date) => date,
                None => {
                    warn!(pk = %item.pk, sk = %item.sk, millis, "CreateTime out of calendar range");
                    outcome.errors += 1;
                    String::new()
                }
            },
            CreateTime::Invalid => {
                warn!(pk = %item.pk, sk = %item.sk, "Unparseable CreateTime, keeping record without date");
                outcome.errors += 1;
                String::new()
            }
            CreateTime::Missing => String::new(),
        };

        let (counts, price) = match &item.message_map {
            Some(value) => {
                let extraction = extract_tokens(&MessageMap::from_value(value), options.heuristic);
                outcome
                    .unknown_content_types
                    .extend(extraction.unknown_content_types);
                (extraction.counts, options.pricing.price(extraction.counts))
            }
            None => {
                debug!(pk = %item.pk, sk = %item.sk, "No usable MessageMap, falling back to TotalPrice");
                let total = fixed(item.total_price.unwrap_or(Decimal::ZERO));
                (
                    TokenCounts::default(),
                    PriceBreakdown {
                        total,
                        ..PriceBreakdown::zero()
                    },
                )
            }
        };

        outcome.rows.push(TokenUsageRow {
            create_date,
            input_token: counts.input,
            output_token: counts.output,
            input_price: price.input,
            output_price: price.output,
            total_price: price.total,
            pk: item.pk,
            sk: item.sk,
            source: options.source,
        });
        outcome.processed += 1;
    }

    outcome
}

pub fn format_create_date(millis: i64) -> Option<String> {
    DateTime::from_timestamp_millis(millis).map(|dt| dt.format(CREATE_DATE_FORMAT).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::{json, Value};

    fn options(heuristic: Heuristic, source: Source) -> ProcessingOptions {
        ProcessingOptions {
            heuristic,
            range: DateRange {
                start: NaiveDate::from_ymd_opt(2025, 12, 27).unwrap(),
                end: NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
            },
            pricing: Pricing::default(),
            source,
        }
    }

    fn items(values: Vec<Value>) -> Vec<Item> {
        values
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    #[test]
    fn test_rows_from_items() {
        // 2025-12-28 10:00:00 UTC
        let input = items(vec![json!({
            "PK": "user-1",
            "SK": "user-1#CONV#a",
            "CreateTime": 1766916000000i64,
            "MessageMap": {
                "q": {"role": "user", "content": [{"content_type": "text", "body": "x".repeat(4000)}]},
                "a": {"role": "assistant", "content": [{"content_type": "text", "body": "y".repeat(2000)}]}
            }
        })]);

        let outcome = process_items(&input, &options(Heuristic::Enhanced, Source::NewTable));
        assert_eq!(outcome.processed, 1);
        let row = &outcome.rows[0];
        assert_eq!(row.create_date, "2025-12-28 10:00:00");
        assert_eq!(row.input_token, 1000);
        assert_eq!(row.output_token, 500);
        assert_eq!(row.input_price.to_string(), "0.003000");
        assert_eq!(row.output_price.to_string(), "0.007500");
        assert_eq!(row.total_price.to_string(), "0.010500");
        assert_eq!(row.source, Source::NewTable);
    }

    #[test]
    fn test_out_of_range_items_are_filtered() {
        let input = items(vec![
            // 2025-12-26 23:59:59.999
            json!({"PK": "a", "SK": "a#CONV#1", "CreateTime": 1766793599999i64}),
            // 2025-12-27 00:00:00.000
            json!({"PK": "b", "SK": "b#CONV#1", "CreateTime": 1766793600000i64}),
            // 2026-01-01 00:00:00.000
            json!({"PK": "c", "SK": "c#CONV#1", "CreateTime": 1767225600000i64}),
        ]);
        let outcome = process_items(&input, &options(Heuristic::Enhanced, Source::NewTable));
        assert_eq!(outcome.filtered, 2);
        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.rows[0].pk, "b");
    }

    #[test]
    fn test_bad_create_time_keeps_row_without_date() {
        let input = items(vec![json!({"PK": "a", "SK": "a#CONV#1", "CreateTime": "soon"})]);
        let outcome = process_items(&input, &options(Heuristic::Legacy, Source::OldTable));
        assert_eq!(outcome.errors, 1);
        assert_eq!(outcome.rows[0].create_date, "");
    }

    #[test]
    fn test_missing_message_map_uses_total_price() {
        let input = items(vec![json!({
            "PK": "a",
            "SK": "a#CONV#1",
            "CreateTime": 1766916000000i64,
            "MessageMap": "{broken",
            "TotalPrice": 0.25
        })]);
        let outcome = process_items(&input, &options(Heuristic::Legacy, Source::OldTable));
        let row = &outcome.rows[0];
        assert_eq!(row.input_token, 0);
        assert_eq!(row.output_token, 0);
        assert_eq!(row.input_price.to_string(), "0.000000");
        assert_eq!(row.total_price.to_string(), "0.250000");
        assert_eq!(row.source, Source::OldTable);
    }

    #[test]
    fn test_unknown_types_are_collected_across_items() {
        let input = items(vec![
            json!({"PK": "a", "SK": "1", "CreateTime": 1766916000000i64,
                   "MessageMap": {"n": {"role": "user", "content": [{"content_type": "image"}]}}}),
            json!({"PK": "b", "SK": "2", "CreateTime": 1766916000000i64,
                   "MessageMap": {"n": {"role": "user", "content": [{"content_type": "image"}, {"content_type": "document"}]}}}),
        ]);
        let outcome = process_items(&input, &options(Heuristic::Enhanced, Source::NewTable));
        assert_eq!(
            outcome.unknown_content_types.into_iter().collect::<Vec<_>>(),
            vec!["document".to_string(), "image".to_string()]
        );
    }

    #[test]
    fn test_format_create_date() {
        assert_eq!(format_create_date(0).as_deref(), Some("1970-01-01 00:00:00"));
        assert_eq!(
            format_create_date(1754265600000).as_deref(),
            Some("2025-08-04 00:00:00")
        );
    }
}
