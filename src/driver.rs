//! End-to-end batch driver: validate, preprocess, pick an engine, emit.
//!
//! Strategy dispatch: `fuzzy` needs the full candidate scoring only the
//! in-memory engine does, so it always runs there. `exact` and `smart` run
//! the sorted-stream scans; when the caller cannot guarantee pre-sorted
//! inputs the datasets are sorted in memory first, which is the documented
//! bound for non-streaming use.

use log::{debug, info};

use crate::{
    config::{ConfigDocument, MatchStrategy},
    error::EngineError,
    predicate::MatchContext,
    preprocess::{EnrichedRow, PreprocessOutcome, Preprocessor},
    progress::{PROGRESS_INTERVAL, RunHooks, Stage},
    rates::{Clock, RateProvider},
    reconcile::ReconcileEngine,
    report::ReconcileReport,
    row::Row,
    stream::{StreamEngine, sort_by_key},
};

/// Caller-provided collaborators and guarantees for one batch.
pub struct BatchOptions<'a> {
    pub rates: &'a dyn RateProvider,
    pub clock: &'a dyn Clock,
    /// Caller guarantees both inputs arrive sorted by their sort keys.
    pub assume_sorted: bool,
}

/// Runs a whole reconciliation batch over in-memory row sets.
pub fn reconcile_rows(
    document: &ConfigDocument,
    source_rows: Vec<Row>,
    target_rows: Vec<Row>,
    options: &BatchOptions<'_>,
    hooks: &RunHooks,
) -> Result<ReconcileReport, EngineError> {
    document.validate()?;
    let cfg = &document.sort_configuration;

    let source_pre = Preprocessor::new(
        &document.virtual_fields.source,
        document.transformations.source.clone(),
        options.rates,
        options.clock,
    )?;
    let target_pre = Preprocessor::new(
        &document.virtual_fields.target,
        document.transformations.target.clone(),
        options.rates,
        options.clock,
    )?;

    let (mut sources, dropped_source) =
        preprocess_side(&source_pre, source_rows, Stage::SourceFile, hooks)?;
    let (mut targets, dropped_target) =
        preprocess_side(&target_pre, target_rows, Stage::TargetFile, hooks)?;

    check_sort_key_presence(cfg, &sources, &targets)?;

    let mappings = &document.mappings;
    let ctx = MatchContext::new(mappings, cfg.tolerance, cfg.tolerance_unit, cfg.match_strategy);

    let verdicts = match cfg.match_strategy {
        MatchStrategy::Fuzzy => {
            debug!("Dispatching to the in-memory engine for fuzzy matching");
            ReconcileEngine::new(ctx).run(&sources, &targets, hooks)?
        }
        _ => {
            if !options.assume_sorted {
                sort_by_key(&mut sources, &cfg.source_sort_key);
                sort_by_key(&mut targets, &cfg.target_sort_key);
            }
            StreamEngine::new(ctx, cfg).run(&sources, &targets, hooks)?
        }
    };

    hooks.emit(100, Stage::Complete);
    info!(
        "Reconciliation complete: {} verdict(s), {} source row(s) dropped, {} target row(s) dropped",
        verdicts.len(),
        dropped_source,
        dropped_target
    );

    Ok(ReconcileReport {
        verdicts,
        dropped_source,
        dropped_target,
    })
}

fn preprocess_side(
    preprocessor: &Preprocessor<'_>,
    rows: Vec<Row>,
    stage: Stage,
    hooks: &RunHooks,
) -> Result<(Vec<EnrichedRow>, usize), EngineError> {
    let total = rows.len().max(1);
    let mut kept = Vec::with_capacity(rows.len());
    let mut dropped = 0usize;
    for (processed, row) in rows.into_iter().enumerate() {
        if processed % PROGRESS_INTERVAL == 0 {
            if hooks.cancelled() {
                return Err(EngineError::Cancelled);
            }
            hooks.emit_ratio(processed, total, stage);
        }
        match preprocessor.process(row) {
            PreprocessOutcome::Keep(enriched) => kept.push(*enriched),
            PreprocessOutcome::Exclude => dropped += 1,
        }
    }
    hooks.emit(100, stage);
    Ok((kept, dropped))
}

/// The sort key must resolve on at least one side once enrichment has run;
/// a key absent from both is a configuration error, not an empty result.
fn check_sort_key_presence(
    cfg: &crate::config::ReconcileConfig,
    sources: &[EnrichedRow],
    targets: &[EnrichedRow],
) -> Result<(), EngineError> {
    let source_has = sources.is_empty()
        || sources
            .iter()
            .any(|r| r.enriched.contains(&cfg.source_sort_key));
    let target_has = targets.is_empty()
        || targets
            .iter()
            .any(|r| r.enriched.contains(&cfg.target_sort_key));
    if !source_has && !target_has {
        return Err(EngineError::config(format!(
            "sort keys '{}'/'{}' are absent from both datasets",
            cfg.source_sort_key, cfg.target_sort_key
        )));
    }
    Ok(())
}
