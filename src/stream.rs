//! Streaming reconciliation over sorted row streams.
//!
//! Two scan shapes share the sort-key projection and tolerance-aware key
//! comparison: a strict two-pointer walk for exact matching, and a sliding
//! window that scores every in-window target and keeps the best by
//! confidence when a tolerance admits several. Rows are consumed in
//! `chunkSize` batches above the streaming threshold so cancellation and
//! progress fire at chunk boundaries.

use std::cmp::Ordering;

use log::{debug, info};

use crate::{
    config::{MatchStrategy, ReconcileConfig, ToleranceUnit},
    data::{Scalar, parse_date_text},
    error::EngineError,
    predicate::{MatchContext, values_match},
    preprocess::EnrichedRow,
    progress::{PROGRESS_INTERVAL, RunHooks, Stage},
    reconcile::CANDIDATE_FLOOR,
    report::Verdict,
};

/// Combined row count above which chunked streaming kicks in.
pub const STREAM_THRESHOLD: usize = 50_000;

/// Projects a row's sort value from the configured key column.
///
/// Date-shaped strings become epoch milliseconds; numeric-looking strings
/// are parsed after stripping everything but digits, `.` and `-`; anything
/// else is carried as-is. Missing keys and empty cells project to null,
/// which sorts lowest.
pub fn sort_value(row: &crate::row::Row, key: &str) -> Scalar {
    let Some(value) = row.get(key) else {
        return Scalar::Null;
    };
    match value {
        Scalar::Str(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Scalar::Null;
            }
            if let Some(ms) = parse_date_text(trimmed) {
                return Scalar::Date(ms);
            }
            if trimmed.chars().any(|c| c.is_ascii_digit()) {
                let cleaned: String = trimmed
                    .chars()
                    .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                    .collect();
                if let Ok(parsed) = cleaned.parse::<f64>() {
                    if parsed.is_finite() {
                        return Scalar::Float(parsed);
                    }
                }
            }
            value.clone()
        }
        other => other.clone(),
    }
}

/// Tolerance-aware key comparison: `Equal` iff the keys fall inside the
/// window, otherwise the sign of their total order. Null keys only compare
/// equal to each other under the exact unit.
pub fn compare_keys(a: &Scalar, b: &Scalar, tolerance: f64, unit: ToleranceUnit) -> Ordering {
    if a.is_null() || b.is_null() {
        if a.is_null() && b.is_null() {
            return if unit == ToleranceUnit::Exact {
                Ordering::Equal
            } else {
                Ordering::Less
            };
        }
        return a.cmp_sort(b);
    }
    if unit == ToleranceUnit::Exact {
        return a.cmp_sort(b);
    }
    if values_match(a, b, tolerance, unit) {
        Ordering::Equal
    } else {
        a.cmp_sort(b)
    }
}

/// Sorted-stream reconciliation for one batch.
pub struct StreamEngine<'a> {
    ctx: MatchContext<'a>,
    cfg: &'a ReconcileConfig,
}

impl<'a> StreamEngine<'a> {
    pub fn new(ctx: MatchContext<'a>, cfg: &'a ReconcileConfig) -> Self {
        StreamEngine { ctx, cfg }
    }

    /// Runs the scan appropriate for the configured strategy. Inputs must
    /// already be sorted by their projected sort keys.
    pub fn run(
        &self,
        sources: &[EnrichedRow],
        targets: &[EnrichedRow],
        hooks: &RunHooks,
    ) -> Result<Vec<Verdict>, EngineError> {
        let source_keys = self.project_keys(sources, &self.cfg.source_sort_key);
        let target_keys = self.project_keys(targets, &self.cfg.target_sort_key);

        let total = sources.len() + targets.len();
        let chunked = total > STREAM_THRESHOLD;
        if chunked {
            info!(
                "Streaming reconciliation over {total} row(s) in chunks of {}",
                self.cfg.chunk_size
            );
        } else {
            debug!("Streaming scan over {total} row(s) without chunking");
        }

        match self.cfg.match_strategy {
            MatchStrategy::Exact => {
                self.two_pointer(sources, &source_keys, targets, &target_keys, hooks)
            }
            _ => self.sliding_window(sources, &source_keys, targets, &target_keys, hooks),
        }
    }

    fn project_keys(&self, rows: &[EnrichedRow], key: &str) -> Vec<Scalar> {
        rows.iter().map(|r| sort_value(&r.enriched, key)).collect()
    }

    fn compare(&self, a: &Scalar, b: &Scalar) -> Ordering {
        compare_keys(a, b, self.cfg.tolerance, self.cfg.tolerance_unit)
    }

    fn check_boundary(
        &self,
        processed: usize,
        total: usize,
        hooks: &RunHooks,
    ) -> Result<(), EngineError> {
        if processed % self.cfg.chunk_size == 0 || processed % PROGRESS_INTERVAL == 0 {
            if hooks.cancelled() {
                return Err(EngineError::Cancelled);
            }
            hooks.emit_ratio(processed, total.max(1), Stage::Streaming);
        }
        Ok(())
    }

    /// Strict O(1)-claim-state walk for exact matching: equal keys pair and
    /// both pointers advance; the lagging side emits an unmatched verdict
    /// and advances alone. Target-only verdicts are held until the source
    /// sweep completes so emission order matches the sliding window's.
    fn two_pointer(
        &self,
        sources: &[EnrichedRow],
        source_keys: &[Scalar],
        targets: &[EnrichedRow],
        target_keys: &[Scalar],
        hooks: &RunHooks,
    ) -> Result<Vec<Verdict>, EngineError> {
        let total = sources.len() + targets.len();
        let mut verdicts = Vec::with_capacity(total);
        let mut trailing = Vec::new();
        let mut i = 0usize;
        let mut j = 0usize;

        while i < sources.len() && j < targets.len() {
            self.check_boundary(i + j, total, hooks)?;
            match self.compare(&source_keys[i], &target_keys[j]) {
                Ordering::Equal => {
                    let discrepancies = self
                        .ctx
                        .discrepancies(&sources[i].enriched, &targets[j].enriched);
                    let confidence = self.ctx.confidence(&sources[i].enriched, &targets[j].enriched);
                    verdicts.push(Verdict::paired(
                        sources[i].original.clone(),
                        targets[j].original.clone(),
                        confidence,
                        discrepancies,
                        self.ctx.mappings,
                    ));
                    i += 1;
                    j += 1;
                }
                Ordering::Less => {
                    verdicts.push(Verdict::unmatched_source(
                        sources[i].original.clone(),
                        self.ctx.mappings,
                    ));
                    i += 1;
                }
                Ordering::Greater => {
                    trailing.push(Verdict::unmatched_target(
                        targets[j].original.clone(),
                        self.ctx.mappings,
                    ));
                    j += 1;
                }
            }
        }
        while i < sources.len() {
            verdicts.push(Verdict::unmatched_source(
                sources[i].original.clone(),
                self.ctx.mappings,
            ));
            i += 1;
        }
        while j < targets.len() {
            trailing.push(Verdict::unmatched_target(
                targets[j].original.clone(),
                self.ctx.mappings,
            ));
            j += 1;
        }

        verdicts.extend(trailing);
        hooks.emit(100, Stage::Streaming);
        Ok(verdicts)
    }

    /// Sliding-window scan: the window start advances past targets too old
    /// for any future source; every in-window target is scored and the best
    /// unclaimed candidate above the admission floor wins.
    fn sliding_window(
        &self,
        sources: &[EnrichedRow],
        source_keys: &[Scalar],
        targets: &[EnrichedRow],
        target_keys: &[Scalar],
        hooks: &RunHooks,
    ) -> Result<Vec<Verdict>, EngineError> {
        let total = sources.len() + targets.len();
        let mut verdicts = Vec::with_capacity(total);
        let mut matched = vec![false; targets.len()];
        let mut window_start = 0usize;

        for (i, source) in sources.iter().enumerate() {
            self.check_boundary(i, total, hooks)?;
            let key = &source_keys[i];

            while window_start < targets.len()
                && (matched[window_start]
                    || self.compare(key, &target_keys[window_start]) == Ordering::Greater)
            {
                window_start += 1;
            }

            let mut best: Option<(usize, f64)> = None;
            for k in window_start..targets.len() {
                if matched[k] {
                    continue;
                }
                match self.compare(key, &target_keys[k]) {
                    Ordering::Less => break,
                    Ordering::Greater => continue,
                    Ordering::Equal => {
                        let confidence =
                            self.ctx.confidence(&source.enriched, &targets[k].enriched);
                        if best.is_none_or(|(_, c)| confidence > c) {
                            best = Some((k, confidence));
                        }
                    }
                }
            }

            match best {
                Some((k, confidence)) if confidence > CANDIDATE_FLOOR => {
                    matched[k] = true;
                    let discrepancies = self
                        .ctx
                        .discrepancies(&source.enriched, &targets[k].enriched);
                    verdicts.push(Verdict::paired(
                        source.original.clone(),
                        targets[k].original.clone(),
                        confidence,
                        discrepancies,
                        self.ctx.mappings,
                    ));
                }
                _ => {
                    verdicts.push(Verdict::unmatched_source(
                        source.original.clone(),
                        self.ctx.mappings,
                    ));
                }
            }
        }

        for (k, target) in targets.iter().enumerate() {
            if !matched[k] {
                verdicts.push(Verdict::unmatched_target(
                    target.original.clone(),
                    self.ctx.mappings,
                ));
            }
        }

        hooks.emit(100, Stage::Streaming);
        Ok(verdicts)
    }
}

/// Sorts enriched rows in memory by their projected sort key, preserving
/// input order for ties. Used when the caller cannot guarantee pre-sorted
/// inputs and the dataset fits in memory.
pub fn sort_by_key(rows: &mut [EnrichedRow], key: &str) {
    rows.sort_by(|a, b| {
        sort_value(&a.enriched, key).cmp_sort(&sort_value(&b.enriched, key))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mapping::{ColumnMapping, SourceSelector},
        report::MatchStatus,
        row::Row,
    };

    fn enriched(pairs: &[(&str, Scalar)]) -> EnrichedRow {
        let row: Row = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        EnrichedRow {
            original: row.clone(),
            enriched: row,
            notes: Vec::new(),
            clean: true,
        }
    }

    fn mapping(id: &str, source: &str, target: &str) -> ColumnMapping {
        ColumnMapping {
            id: id.into(),
            source: Some(SourceSelector::One(source.into())),
            target: target.into(),
            match_kind: Default::default(),
            tolerance: None,
            formula: None,
        }
    }

    fn cfg(
        source_key: &str,
        target_key: &str,
        tolerance: f64,
        unit: ToleranceUnit,
        strategy: MatchStrategy,
    ) -> ReconcileConfig {
        ReconcileConfig {
            source_sort_key: source_key.into(),
            target_sort_key: target_key.into(),
            tolerance,
            tolerance_unit: unit,
            chunk_size: 10_000,
            match_strategy: strategy,
        }
    }

    #[test]
    fn sort_value_projects_dates_numbers_and_nulls() {
        let row: Row = [
            ("when".to_string(), Scalar::Str("15-01-2024 09:07".into())),
            ("amt".to_string(), Scalar::Str("$1,500.00".into())),
            ("name".to_string(), Scalar::Str("acme".into())),
            ("empty".to_string(), Scalar::Str("  ".into())),
        ]
        .into_iter()
        .collect();
        assert!(matches!(sort_value(&row, "when"), Scalar::Date(_)));
        assert_eq!(sort_value(&row, "amt"), Scalar::Float(1500.0));
        assert_eq!(sort_value(&row, "name"), Scalar::Str("acme".into()));
        assert_eq!(sort_value(&row, "empty"), Scalar::Null);
        assert_eq!(sort_value(&row, "missing"), Scalar::Null);
    }

    #[test]
    fn compare_keys_honors_the_tolerance_window() {
        let a = Scalar::Float(100.0);
        let b = Scalar::Float(100.4);
        assert_eq!(
            compare_keys(&a, &b, 0.5, ToleranceUnit::Amount),
            Ordering::Equal
        );
        assert_eq!(
            compare_keys(&a, &b, 0.1, ToleranceUnit::Amount),
            Ordering::Less
        );
        assert_eq!(
            compare_keys(&b, &a, 0.1, ToleranceUnit::Amount),
            Ordering::Greater
        );
    }

    #[test]
    fn null_keys_only_meet_under_exact_unit() {
        assert_eq!(
            compare_keys(&Scalar::Null, &Scalar::Null, 0.0, ToleranceUnit::Exact),
            Ordering::Equal
        );
        assert_eq!(
            compare_keys(&Scalar::Null, &Scalar::Null, 5.0, ToleranceUnit::Minutes),
            Ordering::Less
        );
        assert_eq!(
            compare_keys(&Scalar::Null, &Scalar::Int(1), 0.0, ToleranceUnit::Exact),
            Ordering::Less
        );
    }

    #[test]
    fn two_pointer_walk_matches_scenario_order() {
        let mappings = vec![mapping("m1", "K", "K")];
        let config = cfg("K", "K", 0.0, ToleranceUnit::Exact, MatchStrategy::Exact);
        let ctx = MatchContext::new(&mappings, 0.0, ToleranceUnit::Exact, MatchStrategy::Exact);
        let engine = StreamEngine::new(ctx, &config);

        let sources = vec![
            enriched(&[("K", Scalar::Int(1))]),
            enriched(&[("K", Scalar::Int(1))]),
        ];
        let targets = vec![
            enriched(&[("K", Scalar::Int(1))]),
            enriched(&[("K", Scalar::Int(1))]),
            enriched(&[("K", Scalar::Int(1))]),
        ];
        let verdicts = engine.run(&sources, &targets, &RunHooks::new()).unwrap();
        let statuses: Vec<MatchStatus> = verdicts.iter().map(|v| v.status).collect();
        assert_eq!(
            statuses,
            vec![
                MatchStatus::Matched,
                MatchStatus::Matched,
                MatchStatus::UnmatchedTarget
            ]
        );
    }

    #[test]
    fn time_window_pairs_rows_within_minutes() {
        let mappings = vec![mapping("m1", "Ts", "When")];
        let config = cfg("Ts", "When", 5.0, ToleranceUnit::Minutes, MatchStrategy::Smart);
        let ctx = MatchContext::new(&mappings, 5.0, ToleranceUnit::Minutes, MatchStrategy::Smart);
        let engine = StreamEngine::new(ctx, &config);

        let sources = vec![enriched(&[(
            "Ts",
            Scalar::Str("2024-01-15 09:03:00".into()),
        )])];
        let targets = vec![enriched(&[("When", Scalar::Str("15-01-2024 09:07".into()))])];
        let verdicts = engine.run(&sources, &targets, &RunHooks::new()).unwrap();
        assert_eq!(verdicts.len(), 1);
        assert_eq!(verdicts[0].status, MatchStatus::Matched);
    }

    #[test]
    fn window_keeps_the_best_candidate_by_confidence() {
        let mappings = vec![mapping("key", "Ts", "Ts"), mapping("ref", "Ref", "Ref")];
        let config = cfg("Ts", "Ts", 10.0, ToleranceUnit::Minutes, MatchStrategy::Smart);
        let ctx = MatchContext::new(&mappings, 10.0, ToleranceUnit::Minutes, MatchStrategy::Smart);
        let engine = StreamEngine::new(ctx, &config);

        let sources = vec![enriched(&[
            ("Ts", Scalar::Str("2024-01-15 09:00".into())),
            ("Ref", Scalar::Str("R1".into())),
        ])];
        // Both targets fall in the window; the second agrees on the
        // reference too and must win despite arriving later.
        let targets = vec![
            enriched(&[
                ("Ts", Scalar::Str("2024-01-15 09:01".into())),
                ("Ref", Scalar::Str("other".into())),
            ]),
            enriched(&[
                ("Ts", Scalar::Str("2024-01-15 09:05".into())),
                ("Ref", Scalar::Str("R1".into())),
            ]),
        ];
        let verdicts = engine.run(&sources, &targets, &RunHooks::new()).unwrap();
        assert_eq!(verdicts[0].status, MatchStatus::Matched);
        assert_eq!(verdicts[0].confidence, Some(1.0));
        let trailing: Vec<MatchStatus> = verdicts[1..].iter().map(|v| v.status).collect();
        assert_eq!(trailing, vec![MatchStatus::UnmatchedTarget]);
    }

    #[test]
    fn empty_sides_produce_only_unmatched_verdicts() {
        let mappings = vec![mapping("m1", "K", "K")];
        let config = cfg("K", "K", 0.0, ToleranceUnit::Exact, MatchStrategy::Smart);
        let ctx = MatchContext::new(&mappings, 0.0, ToleranceUnit::Exact, MatchStrategy::Smart);
        let engine = StreamEngine::new(ctx, &config);

        let targets = vec![
            enriched(&[("K", Scalar::Int(1))]),
            enriched(&[("K", Scalar::Int(2))]),
        ];
        let verdicts = engine.run(&[], &targets, &RunHooks::new()).unwrap();
        assert_eq!(verdicts.len(), 2);
        assert!(
            verdicts
                .iter()
                .all(|v| v.status == MatchStatus::UnmatchedTarget)
        );
    }

    #[test]
    fn streaming_and_in_memory_agree_on_exact_sorted_input() {
        use crate::reconcile::ReconcileEngine;

        let mappings = vec![mapping("m1", "K", "K")];
        let sources: Vec<EnrichedRow> = [1, 2, 4, 5]
            .iter()
            .map(|k| enriched(&[("K", Scalar::Int(*k))]))
            .collect();
        let targets: Vec<EnrichedRow> = [2, 3, 5]
            .iter()
            .map(|k| enriched(&[("K", Scalar::Int(*k))]))
            .collect();

        let config = cfg("K", "K", 0.0, ToleranceUnit::Exact, MatchStrategy::Exact);
        let stream_ctx =
            MatchContext::new(&mappings, 0.0, ToleranceUnit::Exact, MatchStrategy::Exact);
        let streamed = StreamEngine::new(stream_ctx, &config)
            .run(&sources, &targets, &RunHooks::new())
            .unwrap();

        let memory_ctx =
            MatchContext::new(&mappings, 0.0, ToleranceUnit::Exact, MatchStrategy::Exact);
        let in_memory = ReconcileEngine::new(memory_ctx)
            .run(&sources, &targets, &RunHooks::new())
            .unwrap();

        let mut streamed_statuses: Vec<(Option<u64>, &str)> = streamed
            .iter()
            .map(|v| (v.source_line, v.status.as_str()))
            .collect();
        let mut memory_statuses: Vec<(Option<u64>, &str)> = in_memory
            .iter()
            .map(|v| (v.source_line, v.status.as_str()))
            .collect();
        streamed_statuses.sort();
        memory_statuses.sort();
        assert_eq!(streamed_statuses, memory_statuses);
    }

    #[test]
    fn sort_by_key_orders_null_first_and_preserves_ties() {
        let mut rows = vec![
            enriched(&[("K", Scalar::Int(5)), ("tag", Scalar::Str("a".into()))]),
            enriched(&[("K", Scalar::Null)]),
            enriched(&[("K", Scalar::Int(5)), ("tag", Scalar::Str("b".into()))]),
            enriched(&[("K", Scalar::Int(1))]),
        ];
        sort_by_key(&mut rows, "K");
        assert_eq!(rows[0].enriched.get("K"), Some(&Scalar::Null));
        assert_eq!(rows[1].enriched.get("K"), Some(&Scalar::Int(1)));
        assert_eq!(rows[2].enriched.get("tag"), Some(&Scalar::Str("a".into())));
        assert_eq!(rows[3].enriched.get("tag"), Some(&Scalar::Str("b".into())));
    }
}
