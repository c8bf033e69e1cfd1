//! Reconciliation configuration and the persisted JSON document.
//!
//! A [`ConfigDocument`] fully describes a reconciliation setup: column
//! mappings, per-side virtual fields and transformation pipelines, and the
//! sort/tolerance configuration. Validation is eager; nothing row-shaped is
//! processed until the whole document passes.

use std::{fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    error::EngineError, formula::VirtualField, mapping::ColumnMapping,
    transform::TransformPipeline,
};

/// Units for the tolerance window. `Exact` ignores the tolerance value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToleranceUnit {
    #[default]
    Exact,
    Minutes,
    Hours,
    Days,
    Amount,
    Percentage,
}

impl ToleranceUnit {
    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            ToleranceUnit::Minutes | ToleranceUnit::Hours | ToleranceUnit::Days
        )
    }

    /// Converts a temporal tolerance into milliseconds.
    pub fn tolerance_ms(&self, tolerance: f64) -> f64 {
        match self {
            ToleranceUnit::Minutes => tolerance * 60_000.0,
            ToleranceUnit::Hours => tolerance * 3_600_000.0,
            ToleranceUnit::Days => tolerance * 86_400_000.0,
            _ => 0.0,
        }
    }
}

impl std::str::FromStr for ToleranceUnit {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(ToleranceUnit::Exact),
            "minutes" | "min" => Ok(ToleranceUnit::Minutes),
            "hours" | "h" => Ok(ToleranceUnit::Hours),
            "days" | "d" => Ok(ToleranceUnit::Days),
            "amount" => Ok(ToleranceUnit::Amount),
            "percentage" | "percent" | "%" => Ok(ToleranceUnit::Percentage),
            other => anyhow::bail!(
                "Unknown tolerance unit '{other}'. Supported: exact, minutes, hours, days, amount, percentage"
            ),
        }
    }
}

/// How aggressively candidates are admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchStrategy {
    Exact,
    Fuzzy,
    #[default]
    Smart,
}

impl std::str::FromStr for MatchStrategy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(MatchStrategy::Exact),
            "fuzzy" => Ok(MatchStrategy::Fuzzy),
            "smart" => Ok(MatchStrategy::Smart),
            other => anyhow::bail!("Unknown match strategy '{other}'. Supported: exact, fuzzy, smart"),
        }
    }
}

fn default_chunk_size() -> usize {
    10_000
}

/// Sort keys, tolerance window, and matching strategy for one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileConfig {
    pub source_sort_key: String,
    pub target_sort_key: String,
    #[serde(default)]
    pub tolerance: f64,
    #[serde(default)]
    pub tolerance_unit: ToleranceUnit,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub match_strategy: MatchStrategy,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        ReconcileConfig {
            source_sort_key: String::new(),
            target_sort_key: String::new(),
            tolerance: 0.0,
            tolerance_unit: ToleranceUnit::Exact,
            chunk_size: default_chunk_size(),
            match_strategy: MatchStrategy::Smart,
        }
    }
}

impl ReconcileConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.source_sort_key.is_empty() || self.target_sort_key.is_empty() {
            return Err(EngineError::config("sort keys must be non-empty"));
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(EngineError::config(format!(
                "tolerance {} must be a non-negative number",
                self.tolerance
            )));
        }
        if self.chunk_size == 0 {
            return Err(EngineError::config("chunk size must be positive"));
        }
        Ok(())
    }
}

/// Virtual fields or pipelines, split per dataset side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerSide<T> {
    #[serde(default = "Vec::new")]
    pub source: Vec<T>,
    #[serde(default = "Vec::new")]
    pub target: Vec<T>,
}

impl<T> Default for PerSide<T> {
    fn default() -> Self {
        PerSide {
            source: Vec::new(),
            target: Vec::new(),
        }
    }
}

/// The persisted configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDocument {
    pub version: u32,
    pub mappings: Vec<ColumnMapping>,
    #[serde(default)]
    pub virtual_fields: PerSide<VirtualField>,
    #[serde(default)]
    pub transformations: PerSide<TransformPipeline>,
    pub sort_configuration: ReconcileConfig,
}

impl ConfigDocument {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let document: ConfigDocument = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing config file {path:?}"))?;
        Ok(document)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Parsing config document")
    }

    /// Eager whole-document validation: mappings, virtual-field plans
    /// (cycles are rejected here), pipelines, and the sort configuration.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.mappings.is_empty() {
            return Err(EngineError::config("mapping list is empty"));
        }
        let mut seen_ids = std::collections::HashSet::new();
        for mapping in &self.mappings {
            mapping.validate()?;
            if !seen_ids.insert(mapping.id.as_str()) {
                return Err(EngineError::config(format!(
                    "duplicate mapping id '{}'",
                    mapping.id
                )));
            }
        }
        for (side, fields) in [
            ("source", &self.virtual_fields.source),
            ("target", &self.virtual_fields.target),
        ] {
            let plan = crate::formula::VirtualFieldPlan::build(fields)
                .map_err(|reason| EngineError::config(format!("{side} virtual fields: {reason}")))?;
            if plan.has_cycles() {
                let cycle: Vec<&str> = plan.cyclic_fields().collect();
                return Err(EngineError::config(format!(
                    "{side} virtual fields contain a dependency cycle: {}",
                    cycle.join(", ")
                )));
            }
        }
        for pipeline in self
            .transformations
            .source
            .iter()
            .chain(&self.transformations.target)
        {
            pipeline.validate()?;
        }
        self.sort_configuration.validate()
    }
}
