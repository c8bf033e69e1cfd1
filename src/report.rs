//! Verdict records emitted by the reconciliation engines.
//!
//! Every source row produces exactly one verdict; target rows never claimed
//! by a source produce trailing `unmatched-target` verdicts. Verdicts carry
//! the original rows (line provenance included), an optional confidence,
//! discrepancy strings, and a best-effort amount.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    data::{Scalar, to_number},
    mapping::ColumnMapping,
    row::Row,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStatus {
    #[serde(rename = "matched")]
    Matched,
    #[serde(rename = "discrepancy")]
    Discrepancy,
    #[serde(rename = "unmatched-source")]
    UnmatchedSource,
    #[serde(rename = "unmatched-target")]
    UnmatchedTarget,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Matched => "matched",
            MatchStatus::Discrepancy => "discrepancy",
            MatchStatus::UnmatchedSource => "unmatched-source",
            MatchStatus::UnmatchedTarget => "unmatched-target",
        }
    }
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_row: Option<Row>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_row: Option<Row>,
    pub status: MatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub discrepancies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_line: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_line: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
}

impl Verdict {
    /// A paired verdict: `matched` when no discrepancies survived the
    /// unit-aware comparison, `discrepancy` otherwise.
    pub fn paired(
        source: Row,
        target: Row,
        confidence: f64,
        discrepancies: Vec<String>,
        mappings: &[ColumnMapping],
    ) -> Self {
        let status = if discrepancies.is_empty() {
            MatchStatus::Matched
        } else {
            MatchStatus::Discrepancy
        };
        Verdict {
            id: Uuid::new_v4(),
            source_line: source.line(),
            target_line: target.line(),
            amount: extract_amount(mappings, Some(&source), Some(&target)),
            source_row: Some(source),
            target_row: Some(target),
            status,
            confidence: Some(confidence),
            discrepancies,
        }
    }

    pub fn unmatched_source(source: Row, mappings: &[ColumnMapping]) -> Self {
        Verdict {
            id: Uuid::new_v4(),
            source_line: source.line(),
            target_line: None,
            amount: extract_amount(mappings, Some(&source), None),
            source_row: Some(source),
            target_row: None,
            status: MatchStatus::UnmatchedSource,
            confidence: None,
            discrepancies: Vec::new(),
        }
    }

    pub fn unmatched_target(target: Row, mappings: &[ColumnMapping]) -> Self {
        Verdict {
            id: Uuid::new_v4(),
            source_line: None,
            target_line: target.line(),
            amount: extract_amount(mappings, None, Some(&target)),
            source_row: None,
            target_row: Some(target),
            status: MatchStatus::UnmatchedTarget,
            confidence: None,
            discrepancies: Vec::new(),
        }
    }

    pub fn is_paired(&self) -> bool {
        matches!(self.status, MatchStatus::Matched | MatchStatus::Discrepancy)
    }
}

/// Best-effort amount: the first mapping whose source or target column name
/// contains "amount" yields its numeric projection, source side preferred.
fn extract_amount(
    mappings: &[ColumnMapping],
    source: Option<&Row>,
    target: Option<&Row>,
) -> Option<f64> {
    for mapping in mappings {
        let source_names = mapping
            .source
            .as_ref()
            .map(|s| s.columns())
            .unwrap_or_default();
        let amountish = mapping.target.to_lowercase().contains("amount")
            || source_names
                .iter()
                .any(|name| name.to_lowercase().contains("amount"));
        if !amountish {
            continue;
        }
        let value = match (source, target) {
            (Some(row), _) => mapping.project_source(row),
            (None, Some(row)) => mapping.project_target(row),
            (None, None) => Scalar::Null,
        };
        if !value.is_missing() {
            return Some(to_number(&value));
        }
    }
    None
}

/// A completed batch: the ordered verdicts plus the rows each side dropped
/// through exclusion steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub verdicts: Vec<Verdict>,
    pub dropped_source: usize,
    pub dropped_target: usize,
}

impl ReconcileReport {
    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for verdict in &self.verdicts {
            match verdict.status {
                MatchStatus::Matched => counts.matched += 1,
                MatchStatus::Discrepancy => counts.discrepancy += 1,
                MatchStatus::UnmatchedSource => counts.unmatched_source += 1,
                MatchStatus::UnmatchedTarget => counts.unmatched_target += 1,
            }
        }
        counts
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub matched: usize,
    pub discrepancy: usize,
    pub unmatched_source: usize,
    pub unmatched_target: usize,
}
