//! Row enrichment: virtual fields first, then transformation pipelines.
//!
//! Virtual fields run before pipelines so computed columns are available to
//! transformations. Pipeline output lands in the pipeline's `outputColumn`
//! when set, else overwrites its `columnId`. Rows whose pipelines raise an
//! exclusion are dropped before reconciliation and counted in the batch's
//! dropped-row tally. The `__line` provenance key always survives.

use crate::{
    data::Scalar,
    error::EngineError,
    formula::{FieldNote, VirtualField, VirtualFieldPlan},
    rates::{Clock, RateProvider},
    row::Row,
    transform::{StepContext, TransformPipeline, run_pipeline},
};

/// A preprocessed row: the untouched original plus its enriched form and
/// any cell-level notes collected along the way.
#[derive(Debug, Clone)]
pub struct EnrichedRow {
    pub original: Row,
    pub enriched: Row,
    pub notes: Vec<FieldNote>,
    /// True when every pipeline step over every column succeeded.
    pub clean: bool,
}

/// Outcome of preprocessing one row.
#[derive(Debug, Clone)]
pub enum PreprocessOutcome {
    Keep(Box<EnrichedRow>),
    Exclude,
}

/// One side's row-level transform: a dependency-ordered virtual-field plan
/// plus that side's transformation pipelines.
pub struct Preprocessor<'a> {
    plan: VirtualFieldPlan,
    pipelines: Vec<TransformPipeline>,
    ctx: StepContext<'a>,
}

impl<'a> Preprocessor<'a> {
    pub fn new(
        virtual_fields: &[VirtualField],
        pipelines: Vec<TransformPipeline>,
        rates: &'a dyn RateProvider,
        clock: &'a dyn Clock,
    ) -> Result<Self, EngineError> {
        let plan = VirtualFieldPlan::build(virtual_fields).map_err(EngineError::config)?;
        for pipeline in &pipelines {
            pipeline.validate()?;
        }
        Ok(Preprocessor {
            plan,
            pipelines,
            ctx: StepContext { rates, clock },
        })
    }

    pub fn process(&self, row: Row) -> PreprocessOutcome {
        let mut enriched = row.clone();
        let notes = self.plan.apply(&mut enriched);
        let mut clean = notes.is_empty();

        for pipeline in &self.pipelines {
            let input = enriched
                .get(&pipeline.column_id)
                .cloned()
                .unwrap_or(Scalar::Null);
            let run = run_pipeline(input, pipeline, &self.ctx);
            if run.exclude_row {
                return PreprocessOutcome::Exclude;
            }
            if !run.success() {
                clean = false;
            }
            enriched.insert(pipeline.target_column().to_string(), run.value);
        }

        if let Some(line) = row.line() {
            enriched.set_line(line);
        }

        PreprocessOutcome::Keep(Box::new(EnrichedRow {
            original: row,
            enriched,
            notes,
            clean,
        }))
    }

    /// Preprocesses a whole dataset, returning surviving rows and the count
    /// of rows dropped by exclusion steps.
    pub fn process_all(&self, rows: Vec<Row>) -> (Vec<EnrichedRow>, usize) {
        let mut kept = Vec::with_capacity(rows.len());
        let mut dropped = 0usize;
        for row in rows {
            match self.process(row) {
                PreprocessOutcome::Keep(enriched) => kept.push(*enriched),
                PreprocessOutcome::Exclude => dropped += 1,
            }
        }
        (kept, dropped)
    }
}
