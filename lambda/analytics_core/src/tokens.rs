//! Character-based token estimation over message maps.
//!
//! Two heuristics exist because the two conversation tables store different
//! message schemas. The job picks one from the table it reads; the content
//! itself never selects the heuristic.

use crate::json_util::{is_blank, to_spaced_json};
use crate::message::{Content, ContentKind, MessageMap, Role, Side};
use serde::Serialize;
use std::collections::BTreeSet;

/// `floor(chars / 4)`, counting Unicode scalar values.
pub fn token_count(text: &str) -> u64 {
    (text.chars().count() / 4) as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Heuristic {
    /// Flat `content` lists with string bodies (legacy table).
    Legacy,
    /// Typed content items with tool calls and nesting (current table).
    Enhanced,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenCounts {
    pub input: u64,
    pub output: u64,
}

impl TokenCounts {
    pub fn total(&self) -> u64 {
        self.input + self.output
    }

    fn add(&mut self, side: Option<Side>, tokens: u64) {
        match side {
            Some(Side::Input) => self.input += tokens,
            Some(Side::Output) => self.output += tokens,
            None => {}
        }
    }
}

impl std::ops::AddAssign for TokenCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.input += rhs.input;
        self.output += rhs.output;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenExtraction {
    pub counts: TokenCounts,
    /// Content types the heuristic did not recognize; they counted as zero.
    pub unknown_content_types: BTreeSet<String>,
}

pub fn extract_tokens(map: &MessageMap, heuristic: Heuristic) -> TokenExtraction {
    match heuristic {
        Heuristic::Legacy => extract_legacy(map),
        Heuristic::Enhanced => extract_enhanced(map),
    }
}

fn count_used_chunks(chunks: &[String], counts: &mut TokenCounts) {
    for chunk in chunks {
        counts.input += token_count(chunk);
    }
}

fn extract_legacy(map: &MessageMap) -> TokenExtraction {
    let mut counts = TokenCounts::default();

    for node in map.iter() {
        if node.role.side().is_none() {
            continue;
        }
        count_used_chunks(&node.used_chunks, &mut counts);

        let side = node.role.side();
        match &node.content {
            Content::Plain(text) => counts.add(side, token_count(text)),
            Content::Items(items) => {
                for body in items.iter().filter_map(|item| item.body_text.as_deref()) {
                    counts.add(side, token_count(body));
                }
            }
            Content::Empty => {}
        }
    }

    TokenExtraction {
        counts,
        unknown_content_types: BTreeSet::new(),
    }
}

fn extract_enhanced(map: &MessageMap) -> TokenExtraction {
    let mut extraction = TokenExtraction::default();
    let mut pending: Vec<(&Content, &Role)> = Vec::new();

    for node in map.iter() {
        // Unrecognized roles contribute nothing, tool items and chunks included.
        if node.role.side().is_none() {
            continue;
        }
        count_used_chunks(&node.used_chunks, &mut extraction.counts);
        pending.push((&node.content, &node.role));

        while let Some((content, role)) = pending.pop() {
            visit_content(content, role, &mut extraction, &mut pending);
        }
    }

    extraction
}

fn visit_content<'a>(
    content: &'a Content,
    role: &'a Role,
    extraction: &mut TokenExtraction,
    pending: &mut Vec<(&'a Content, &'a Role)>,
) {
    let items = match content {
        Content::Empty => return,
        Content::Plain(text) => {
            extraction.counts.add(role.side(), token_count(text));
            return;
        }
        Content::Items(items) => items,
    };

    for item in items {
        match &item.kind {
            ContentKind::Text => {
                if let Some(body) = item.body_text.as_deref() {
                    extraction.counts.add(role.side(), token_count(body));
                }
            }
            ContentKind::ToolUse { input } => {
                if !is_blank(input) {
                    extraction.counts.output += token_count(&to_spaced_json(input));
                }
            }
            ContentKind::ToolResult { results } => {
                for result in results {
                    extraction.counts.input += token_count(result);
                }
            }
            ContentKind::Unknown(tag) => {
                extraction.unknown_content_types.insert(tag.clone());
            }
        }

        if let Some(nested) = &item.nested {
            pending.push((&nested.content, &nested.role));
        }
    }
}
