//! Token usage rows and their CSV form.

use crate::error::Result;
use crate::pricing::fixed;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    #[serde(rename = "old_table")]
    OldTable,
    #[serde(rename = "new_table")]
    NewTable,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::OldTable => "old_table",
            Source::NewTable => "new_table",
        }
    }
}

/// One conversation's token usage. `(pk, sk)` identifies the conversation
/// across both source tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsageRow {
    /// `YYYY-MM-DD HH:MM:SS` in UTC, empty when the record had no usable time.
    pub create_date: String,
    pub input_token: u64,
    pub output_token: u64,
    #[serde(with = "price_column", alias = "precio_token_input")]
    pub input_price: Decimal,
    #[serde(with = "price_column", alias = "precio_token_output")]
    pub output_price: Decimal,
    #[serde(with = "price_column")]
    pub total_price: Decimal,
    pub pk: String,
    pub sk: String,
    pub source: Source,
}

/// Prices are written as fixed 6-digit strings. Reading also accepts the
/// float notation of older archival files and rescales it.
mod price_column {
    use crate::pricing::{fixed, parse_decimal};
    use rust_decimal::Decimal;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
        rust_decimal::serde::str::serialize(value, serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_decimal(raw.trim())
            .map(fixed)
            .ok_or_else(|| de::Error::custom(format!("invalid price '{raw}'")))
    }
}

impl TokenUsageRow {
    pub fn key(&self) -> (&str, &str) {
        (&self.pk, &self.sk)
    }
}

/// Header row first, then one line per row. An empty slice still produces
/// the header so readers see a valid empty table.
pub fn write_csv(rows: &[TokenUsageRow]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    writer.write_record([
        "create_date",
        "input_token",
        "output_token",
        "input_price",
        "output_price",
        "total_price",
        "pk",
        "sk",
        "source",
    ])?;
    for row in rows {
        writer.serialize(row)?;
    }

    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()).into())
}

pub fn read_csv(bytes: &[u8]) -> Result<Vec<TokenUsageRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(bytes);

    let rows = reader
        .deserialize::<TokenUsageRow>()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageStatistics {
    pub total_records: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_tokens: u64,
    pub total_input_cost: Decimal,
    pub total_output_cost: Decimal,
    pub total_cost: Decimal,
    pub average_cost_per_record: Decimal,
    pub average_input_tokens: f64,
    pub average_output_tokens: f64,
    pub old_table_records: usize,
    pub new_table_records: usize,
}

impl UsageStatistics {
    pub fn from_rows(rows: &[TokenUsageRow]) -> Self {
        let total_records = rows.len();
        let total_input_tokens: u64 = rows.iter().map(|r| r.input_token).sum();
        let total_output_tokens: u64 = rows.iter().map(|r| r.output_token).sum();
        let total_input_cost = fixed(rows.iter().map(|r| r.input_price).sum());
        let total_output_cost = fixed(rows.iter().map(|r| r.output_price).sum());
        let total_cost = fixed(rows.iter().map(|r| r.total_price).sum());

        let (average_cost_per_record, average_input_tokens, average_output_tokens) =
            if total_records == 0 {
                (fixed(Decimal::ZERO), 0.0, 0.0)
            } else {
                let n = total_records as f64;
                (
                    fixed(total_cost / Decimal::from(total_records)),
                    round2(total_input_tokens as f64 / n),
                    round2(total_output_tokens as f64 / n),
                )
            };

        Self {
            total_records,
            total_input_tokens,
            total_output_tokens,
            total_tokens: total_input_tokens + total_output_tokens,
            total_input_cost,
            total_output_cost,
            total_cost,
            average_cost_per_record,
            average_input_tokens,
            average_output_tokens,
            old_table_records: rows.iter().filter(|r| r.source == Source::OldTable).count(),
            new_table_records: rows.iter().filter(|r| r.source == Source::NewTable).count(),
        }
    }

    pub fn total_cost_f64(&self) -> f64 {
        self.total_cost.to_f64().unwrap_or_default()
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
