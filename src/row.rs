//! Map-shaped rows and row identity.
//!
//! A [`Row`] is an unordered mapping from column name to [`Scalar`]. The
//! reserved `__line` key carries the 1-based source line number; it is
//! preserved through preprocessing but never participates in matching.
//! Target-side deduplication uses [`row_identity`]: the first id-like column
//! when one exists, otherwise a content hash over the sorted-key JSON
//! projection so cell order cannot change the identity.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::data::Scalar;

/// Reserved provenance key holding the 1-based source line number.
pub const LINE_KEY: &str = "__line";

/// Columns probed, in order, when deriving a row identity.
const ID_COLUMNS: &[&str] = &["id", "transaction_id", "reference", "ref_number"];

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Row {
    cells: BTreeMap<String, Scalar>,
}

impl Row {
    pub fn new() -> Self {
        Row::default()
    }

    pub fn insert(&mut self, column: impl Into<String>, value: Scalar) {
        self.cells.insert(column.into(), value);
    }

    pub fn get(&self, column: &str) -> Option<&Scalar> {
        self.cells.get(column)
    }

    /// Case-insensitive lookup, used by id heuristics and amount extraction.
    pub fn get_ignore_case(&self, column: &str) -> Option<&Scalar> {
        self.cells
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.cells.contains_key(column)
    }

    pub fn remove(&mut self, column: &str) -> Option<Scalar> {
        self.cells.remove(column)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.cells.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The 1-based source line number, when the producer attached one.
    pub fn line(&self) -> Option<u64> {
        match self.cells.get(LINE_KEY) {
            Some(Scalar::Int(n)) if *n > 0 => Some(*n as u64),
            _ => None,
        }
    }

    pub fn set_line(&mut self, line: u64) {
        self.cells.insert(LINE_KEY.to_string(), Scalar::Int(line as i64));
    }

    /// All matchable cells, i.e. everything except the provenance key.
    pub fn data_cells(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.cells
            .iter()
            .filter(|(name, _)| name.as_str() != LINE_KEY)
            .map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, Scalar)> for Row {
    fn from_iter<T: IntoIterator<Item = (String, Scalar)>>(iter: T) -> Self {
        Row {
            cells: iter.into_iter().collect(),
        }
    }
}

/// Derives a stable identity for a row: the display form of the first present
/// id-like column (case-insensitive), else a content hash of the sorted-key
/// JSON projection of the data cells.
pub fn row_identity(row: &Row) -> String {
    for candidate in ID_COLUMNS {
        if let Some(value) = row.get_ignore_case(candidate) {
            if !value.is_missing() {
                return value.as_display();
            }
        }
    }
    content_hash(row)
}

fn content_hash(row: &Row) -> String {
    // BTreeMap iteration is already key-sorted, so the JSON projection is
    // canonical regardless of insertion order.
    let projection: BTreeMap<&str, String> = row
        .data_cells()
        .map(|(name, value)| (name, value.as_display()))
        .collect();
    let encoded = serde_json::to_string(&projection).unwrap_or_default();
    let digest = Sha256::digest(encoded.as_bytes());
    format!("{digest:x}")
}
