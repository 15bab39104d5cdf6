//! Merges archival usage rows with the current run's rows.
//!
//! Order of operations matters and is fixed here:
//! 1. concatenate archival rows, then fresh rows;
//! 2. keep the first row seen for each `(pk, sk)`, so archival rows win;
//! 3. stable-sort by `create_date`, newest first.
//!
//! Swapping steps 2 and 3 would let the newest row win instead.

use crate::usage::TokenUsageRow;
use std::collections::HashSet;

/// Which row survives when two rows share a composite key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// The earliest row in concatenation order (archival before fresh).
    #[default]
    KeepFirst,
}

pub fn consolidate(archival: Vec<TokenUsageRow>, fresh: Vec<TokenUsageRow>) -> Vec<TokenUsageRow> {
    consolidate_with(archival, fresh, DuplicatePolicy::KeepFirst)
}

pub fn consolidate_with(
    archival: Vec<TokenUsageRow>,
    fresh: Vec<TokenUsageRow>,
    policy: DuplicatePolicy,
) -> Vec<TokenUsageRow> {
    let mut merged = match policy {
        DuplicatePolicy::KeepFirst => keep_first(archival.into_iter().chain(fresh)),
    };

    // `sort_by` is stable; rows with equal dates keep concatenation order.
    merged.sort_by(|a, b| b.create_date.cmp(&a.create_date));
    merged
}

fn keep_first(rows: impl Iterator<Item = TokenUsageRow>) -> Vec<TokenUsageRow> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    rows.filter(|row| seen.insert((row.pk.clone(), row.sk.clone())))
        .collect()
}
