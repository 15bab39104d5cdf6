//! Transform stage: normalized CSV to a single Parquet object.
//!
//! Token metrics are recomputed from the question texts instead of being
//! copied from the CSV.

use crate::error::{PipelineError, Result};
use crate::normalize::NormalizedRow;
use crate::tokens::token_count;
use arrow::array::{Array as _, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;
use rust_decimal::prelude::ToPrimitive;
use std::io::Cursor;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct CuratedRow {
    pub user_id: String,
    pub conversation_count: i64,
    pub message_count: i64,
    pub positive_feedback: i64,
    pub negative_feedback: i64,
    pub feedback_classification: String,
    pub first_conversation: String,
    pub last_conversation: String,
    pub questions: String,
    pub question_count: i64,
    pub question_tokens: i64,
    pub total_price: f64,
}

impl CuratedRow {
    pub fn from_normalized(row: &NormalizedRow) -> Self {
        let questions = row.question_list();
        let question_tokens: u64 = questions.iter().map(|q| token_count(q)).sum();

        CuratedRow {
            user_id: row.user_id.clone(),
            conversation_count: to_i64(row.conversation_count),
            message_count: to_i64(row.message_count),
            positive_feedback: to_i64(row.positive_feedback),
            negative_feedback: to_i64(row.negative_feedback),
            feedback_classification: classification_name(row),
            first_conversation: row.first_conversation.clone(),
            last_conversation: row.last_conversation.clone(),
            questions: row.questions.clone(),
            question_count: to_i64(questions.len() as u64),
            question_tokens: to_i64(question_tokens),
            total_price: row.total_price.to_f64().unwrap_or_default(),
        }
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn classification_name(row: &NormalizedRow) -> String {
    serde_json::to_value(row.feedback_classification)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

pub fn curate_rows(rows: &[NormalizedRow]) -> Vec<CuratedRow> {
    rows.iter().map(CuratedRow::from_normalized).collect()
}

fn curated_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("user_id", DataType::Utf8, false),
        Field::new("conversation_count", DataType::Int64, false),
        Field::new("message_count", DataType::Int64, false),
        Field::new("positive_feedback", DataType::Int64, false),
        Field::new("negative_feedback", DataType::Int64, false),
        Field::new("feedback_classification", DataType::Utf8, false),
        Field::new("first_conversation", DataType::Utf8, false),
        Field::new("last_conversation", DataType::Utf8, false),
        Field::new("questions", DataType::Utf8, false),
        Field::new("question_count", DataType::Int64, false),
        Field::new("question_tokens", DataType::Int64, false),
        Field::new("total_price", DataType::Float64, false),
    ]))
}

/// The Arrow schema of the curated dataset, for catalog comparisons.
pub fn curated_arrow_schema() -> Schema {
    (*curated_schema()).clone()
}

fn parquet_error(context: &str, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::ParquetError(format!("{context}: {e}"))
}

fn writer_properties() -> WriterProperties {
    let created_by = KeyValue {
        key: "created_by".to_string(),
        value: Some("curate-conversations".to_string()),
    };
    WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_key_value_metadata(Some(vec![created_by]))
        .build()
}

fn strings<F>(rows: &[CuratedRow], field: F) -> StringArray
where
    F: Fn(&CuratedRow) -> &str,
{
    rows.iter().map(|r| Some(field(r))).collect()
}

fn ints<F>(rows: &[CuratedRow], field: F) -> Int64Array
where
    F: Fn(&CuratedRow) -> i64,
{
    rows.iter().map(|r| Some(field(r))).collect()
}

/// Encodes all rows as one Parquet file with a single row group.
pub fn write_parquet(rows: &[CuratedRow]) -> Result<Bytes> {
    let schema = curated_schema();

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(strings(rows, |r| r.user_id.as_str())),
            Arc::new(ints(rows, |r| r.conversation_count)),
            Arc::new(ints(rows, |r| r.message_count)),
            Arc::new(ints(rows, |r| r.positive_feedback)),
            Arc::new(ints(rows, |r| r.negative_feedback)),
            Arc::new(strings(rows, |r| r.feedback_classification.as_str())),
            Arc::new(strings(rows, |r| r.first_conversation.as_str())),
            Arc::new(strings(rows, |r| r.last_conversation.as_str())),
            Arc::new(strings(rows, |r| r.questions.as_str())),
            Arc::new(ints(rows, |r| r.question_count)),
            Arc::new(ints(rows, |r| r.question_tokens)),
            Arc::new(Float64Array::from(
                rows.iter().map(|r| r.total_price).collect::<Vec<_>>(),
            )),
        ],
    )
    .map_err(|e| parquet_error("record batch build failed", e))?;

    let mut cursor = Cursor::new(Vec::<u8>::new());
    let mut writer = ArrowWriter::try_new(&mut cursor, schema, Some(writer_properties()))
        .map_err(|e| parquet_error("parquet writer init failed", e))?;
    writer
        .write(&batch)
        .map_err(|e| parquet_error("parquet write failed", e))?;
    writer
        .close()
        .map_err(|e| parquet_error("parquet close failed", e))?;

    Ok(Bytes::from(cursor.into_inner()))
}

pub fn read_parquet(bytes: &Bytes) -> Result<Vec<CuratedRow>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes.clone())
        .map_err(|e| parquet_error("parquet reader init failed", e))?
        .build()
        .map_err(|e| parquet_error("parquet reader build failed", e))?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| parquet_error("parquet read batch failed", e))?;

        let user_id = col_string(&batch, "user_id")?;
        let conversation_count = col_i64(&batch, "conversation_count")?;
        let message_count = col_i64(&batch, "message_count")?;
        let positive = col_i64(&batch, "positive_feedback")?;
        let negative = col_i64(&batch, "negative_feedback")?;
        let classification = col_string(&batch, "feedback_classification")?;
        let first = col_string(&batch, "first_conversation")?;
        let last = col_string(&batch, "last_conversation")?;
        let questions = col_string(&batch, "questions")?;
        let question_count = col_i64(&batch, "question_count")?;
        let question_tokens = col_i64(&batch, "question_tokens")?;
        let total_price = col_f64(&batch, "total_price")?;

        for i in 0..batch.num_rows() {
            rows.push(CuratedRow {
                user_id: user_id.value(i).to_string(),
                conversation_count: conversation_count.value(i),
                message_count: message_count.value(i),
                positive_feedback: positive.value(i),
                negative_feedback: negative.value(i),
                feedback_classification: classification.value(i).to_string(),
                first_conversation: first.value(i).to_string(),
                last_conversation: last.value(i).to_string(),
                questions: questions.value(i).to_string(),
                question_count: question_count.value(i),
                question_tokens: question_tokens.value(i),
                total_price: total_price.value(i),
            });
        }
    }
    Ok(rows)
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str, kind: &str) -> Result<&'a T> {
    let idx = batch
        .schema()
        .index_of(name)
        .map_err(|e| parquet_error(&format!("missing column '{name}'"), e))?;

    batch
        .column(idx)
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| PipelineError::ParquetError(format!("column '{name}' is not {kind}")))
}

fn col_string<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    column(batch, name, "StringArray")
}

fn col_i64<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array> {
    column(batch, name, "Int64Array")
}

fn col_f64<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Float64Array> {
    column(batch, name, "Float64Array")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::FeedbackClassification;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn normalized(user_id: &str, questions: &[&str]) -> NormalizedRow {
        NormalizedRow {
            user_id: user_id.to_string(),
            conversation_count: 2,
            message_count: 4,
            positive_feedback: 1,
            negative_feedback: 0,
            feedback_classification: FeedbackClassification::Positive,
            first_conversation: "2025-12-27 00:00:00".to_string(),
            last_conversation: "2025-12-28 10:00:00".to_string(),
            questions: serde_json::to_string(questions).unwrap(),
            input_tokens: 9999,
            output_tokens: 9999,
            total_price: dec!(0.000078),
        }
    }

    #[test]
    fn test_question_tokens_are_recomputed() {
        let row = CuratedRow::from_normalized(&normalized("u1", &["First question", "12345678"]));
        assert_eq!(row.question_count, 2);
        assert_eq!(row.question_tokens, 5);
        assert_eq!(row.feedback_classification, "positive");
        assert_eq!(row.total_price, 0.000078);
    }

    #[test]
    fn test_unreadable_questions_count_zero() {
        let mut source = normalized("u1", &[]);
        source.questions = "not json".to_string();
        let row = CuratedRow::from_normalized(&source);
        assert_eq!(row.question_count, 0);
        assert_eq!(row.question_tokens, 0);
    }

    #[test]
    fn test_parquet_round_trip() {
        let rows = curate_rows(&[
            normalized("u1", &["What is the refund policy?"]),
            normalized("u2", &[]),
        ]);
        let bytes = write_parquet(&rows).unwrap();
        assert_eq!(&bytes[..4], b"PAR1");
        assert_eq!(read_parquet(&bytes).unwrap(), rows);
    }

    #[test]
    fn test_empty_dataset_still_has_schema() {
        let bytes = write_parquet(&[]).unwrap();
        let builder = ParquetRecordBatchReaderBuilder::try_new(bytes.clone()).unwrap();
        assert_eq!(builder.schema().fields().len(), curated_arrow_schema().fields().len());
        assert!(read_parquet(&bytes).unwrap().is_empty());
    }
}
