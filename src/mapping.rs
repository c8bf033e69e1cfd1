//! Column mappings between the source and target datasets.
//!
//! A mapping pairs a source selector (one column, or an ordered list joined
//! with single spaces) with a target column and a match kind. Formula
//! mappings synthesize an amount from debit/credit columns (or the inverse)
//! before comparison, so ledgers with split columns can reconcile against
//! single-amount statements.

use serde::{Deserialize, Serialize};

use crate::{
    data::{Scalar, to_number, to_text},
    error::EngineError,
    row::Row,
};

/// How a mapped pair of values is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    #[default]
    Exact,
    Fuzzy,
    Formula,
}

/// One column name, or an ordered list concatenated with single spaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceSelector {
    One(String),
    Many(Vec<String>),
}

impl SourceSelector {
    pub fn is_empty(&self) -> bool {
        match self {
            SourceSelector::One(name) => name.is_empty(),
            SourceSelector::Many(names) => names.is_empty() || names.iter().all(String::is_empty),
        }
    }

    pub fn columns(&self) -> Vec<&str> {
        match self {
            SourceSelector::One(name) => vec![name.as_str()],
            SourceSelector::Many(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

/// Mapping-level formula semantics: `amount = credit - debit`, and inversely
/// a positive amount flows to credit while a negative amount flows to debit
/// as its absolute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FormulaDescriptor {
    DebitCreditToAmount { debit: String, credit: String },
    AmountToDebitCredit { amount: String, debit: String, credit: String },
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMapping {
    pub id: String,
    #[serde(default)]
    pub source: Option<SourceSelector>,
    pub target: String,
    #[serde(default)]
    pub match_kind: MatchKind,
    /// Per-mapping tolerance override used in discrepancy checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<FormulaDescriptor>,
}

impl ColumnMapping {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.target.is_empty() {
            return Err(EngineError::config(format!(
                "mapping '{}' has an empty target column",
                self.id
            )));
        }
        match self.match_kind {
            MatchKind::Formula => {
                if self.formula.is_none() {
                    return Err(EngineError::config(format!(
                        "formula mapping '{}' is missing its formula descriptor",
                        self.id
                    )));
                }
            }
            _ => {
                if self.source.as_ref().is_none_or(SourceSelector::is_empty) {
                    return Err(EngineError::config(format!(
                        "mapping '{}' has an empty source selector",
                        self.id
                    )));
                }
            }
        }
        if let Some(tolerance) = self.tolerance {
            if tolerance < 0.0 {
                return Err(EngineError::config(format!(
                    "mapping '{}' has a negative tolerance",
                    self.id
                )));
            }
        }
        Ok(())
    }

    /// The source-side value this mapping compares: the selected column, a
    /// space-joined concatenation for multi-column selectors, or the
    /// synthesized formula value.
    pub fn project_source(&self, row: &Row) -> Scalar {
        if let Some(formula) = &self.formula {
            if self.match_kind == MatchKind::Formula {
                return self.project_formula_source(formula, row);
            }
        }
        let Some(selector) = &self.source else {
            return Scalar::Null;
        };
        match selector {
            SourceSelector::One(name) => row.get(name).cloned().unwrap_or(Scalar::Null),
            SourceSelector::Many(names) => {
                let joined = names
                    .iter()
                    .map(|name| {
                        row.get(name).map(to_text).unwrap_or_default()
                    })
                    .collect::<Vec<_>>()
                    .join(" ");
                if joined.trim().is_empty() {
                    Scalar::Null
                } else {
                    Scalar::Str(joined)
                }
            }
        }
    }

    /// The target-side value this mapping compares. For
    /// `amount_to_debit_credit` the target's debit/credit columns collapse
    /// back into a signed amount; otherwise the target column is read as-is.
    pub fn project_target(&self, row: &Row) -> Scalar {
        if self.match_kind == MatchKind::Formula {
            if let Some(FormulaDescriptor::AmountToDebitCredit { debit, credit, .. }) =
                &self.formula
            {
                let debit = row.get(debit).map(to_number).unwrap_or(0.0);
                let credit = row.get(credit).map(to_number).unwrap_or(0.0);
                return Scalar::Float(credit - debit);
            }
        }
        row.get(&self.target).cloned().unwrap_or(Scalar::Null)
    }

    fn project_formula_source(&self, formula: &FormulaDescriptor, row: &Row) -> Scalar {
        match formula {
            FormulaDescriptor::DebitCreditToAmount { debit, credit } => {
                let debit = row.get(debit).map(to_number).unwrap_or(0.0);
                let credit = row.get(credit).map(to_number).unwrap_or(0.0);
                Scalar::Float(credit - debit)
            }
            FormulaDescriptor::AmountToDebitCredit { amount, .. } => row
                .get(amount)
                .map(|v| Scalar::Float(to_number(v)))
                .unwrap_or(Scalar::Null),
            FormulaDescriptor::Custom => self
                .source
                .as_ref()
                .and_then(|s| match s {
                    SourceSelector::One(name) => row.get(name).cloned(),
                    SourceSelector::Many(names) => names
                        .first()
                        .and_then(|name| row.get(name.as_str()).cloned()),
                })
                .unwrap_or(Scalar::Null),
        }
    }
}

/// Splits a signed amount into `(debit, credit)` per the inverse formula:
/// positive flows to credit, negative to debit as absolute value, zero to
/// both.
pub fn amount_to_debit_credit(amount: f64) -> (f64, f64) {
    if amount > 0.0 {
        (0.0, amount)
    } else if amount < 0.0 {
        (amount.abs(), 0.0)
    } else {
        (0.0, 0.0)
    }
}
