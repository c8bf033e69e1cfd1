//! Streaming engine properties: ordering, windows, parity with the
//! in-memory engine, progress, and cancellation.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use recon_managed::{
    config::{MatchStrategy, ReconcileConfig, ToleranceUnit},
    data::Scalar,
    error::EngineError,
    mapping::{ColumnMapping, SourceSelector},
    predicate::MatchContext,
    preprocess::EnrichedRow,
    progress::{RunHooks, Stage},
    reconcile::ReconcileEngine,
    report::MatchStatus,
    row::Row,
    stream::{StreamEngine, sort_by_key},
};

fn enriched(line: u64, pairs: &[(&str, Scalar)]) -> EnrichedRow {
    let mut row: Row = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    row.set_line(line);
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

fn config(strategy: MatchStrategy, tolerance: f64, unit: ToleranceUnit) -> ReconcileConfig {
    ReconcileConfig {
        source_sort_key: "K".into(),
        target_sort_key: "K".into(),
        tolerance,
        tolerance_unit: unit,
        chunk_size: 100,
        match_strategy: strategy,
    }
}

fn keyed_rows(keys: &[i64]) -> Vec<EnrichedRow> {
    keys.iter()
        .enumerate()
        .map(|(i, k)| enriched((i + 2) as u64, &[("K", Scalar::Int(*k))]))
        .collect()
}

#[test]
fn source_verdicts_preserve_key_order_and_targets_trail() {
    let mappings = vec![mapping("k", "K", "K")];
    let cfg = config(MatchStrategy::Exact, 0.0, ToleranceUnit::Exact);
    let ctx = MatchContext::new(&mappings, 0.0, ToleranceUnit::Exact, MatchStrategy::Exact);
    let engine = StreamEngine::new(ctx, &cfg);

    let sources = keyed_rows(&[1, 3, 5]);
    let targets = keyed_rows(&[2, 3, 6]);
    let verdicts = engine.run(&sources, &targets, &RunHooks::new()).unwrap();

    let statuses: Vec<MatchStatus> = verdicts.iter().map(|v| v.status).collect();
    assert_eq!(
        statuses,
        vec![
            MatchStatus::UnmatchedSource,
            MatchStatus::Matched,
            MatchStatus::UnmatchedSource,
            MatchStatus::UnmatchedTarget,
            MatchStatus::UnmatchedTarget,
        ]
    );
    // Source-originated verdicts come out in source order.
    let source_lines: Vec<Option<u64>> = verdicts
        .iter()
        .filter(|v| v.source_row.is_some())
        .map(|v| v.source_line)
        .collect();
    assert_eq!(source_lines, vec![Some(2), Some(3), Some(4)]);
}

#[test]
fn amount_window_claims_each_target_once() {
    let mappings = vec![mapping("k", "K", "K")];
    let cfg = config(MatchStrategy::Smart, 1.0, ToleranceUnit::Amount);
    let ctx = MatchContext::new(&mappings, 1.0, ToleranceUnit::Amount, MatchStrategy::Smart);
    let engine = StreamEngine::new(ctx, &cfg);

    // Two sources compete for one in-window target.
    let sources = keyed_rows(&[100, 100]);
    let targets = keyed_rows(&[100]);
    let verdicts = engine.run(&sources, &targets, &RunHooks::new()).unwrap();
    let statuses: Vec<MatchStatus> = verdicts.iter().map(|v| v.status).collect();
    assert_eq!(
        statuses,
        vec![MatchStatus::Matched, MatchStatus::UnmatchedSource]
    );
}

#[test]
fn null_keys_never_match_under_temporal_tolerance() {
    let mappings = vec![mapping("k", "K", "K")];
    let cfg = config(MatchStrategy::Smart, 5.0, ToleranceUnit::Minutes);
    let ctx = MatchContext::new(&mappings, 5.0, ToleranceUnit::Minutes, MatchStrategy::Smart);
    let engine = StreamEngine::new(ctx, &cfg);

    let sources = vec![enriched(2, &[("K", Scalar::Null)])];
    let targets = vec![enriched(2, &[("K", Scalar::Null)])];
    let verdicts = engine.run(&sources, &targets, &RunHooks::new()).unwrap();
    let statuses: Vec<MatchStatus> = verdicts.iter().map(|v| v.status).collect();
    assert_eq!(
        statuses,
        vec![MatchStatus::UnmatchedSource, MatchStatus::UnmatchedTarget]
    );
}

#[test]
fn streaming_matches_in_memory_for_exact_total_keys() {
    let mappings = vec![mapping("k", "K", "K")];
    let source_keys = [1, 2, 2, 4, 7, 9, 9];
    let target_keys = [2, 2, 3, 7, 9, 10];

    let cfg = config(MatchStrategy::Exact, 0.0, ToleranceUnit::Exact);
    let ctx = MatchContext::new(&mappings, 0.0, ToleranceUnit::Exact, MatchStrategy::Exact);
    let streamed = StreamEngine::new(ctx, &cfg)
        .run(
            &keyed_rows(&source_keys),
            &keyed_rows(&target_keys),
            &RunHooks::new(),
        )
        .unwrap();

    let ctx = MatchContext::new(&mappings, 0.0, ToleranceUnit::Exact, MatchStrategy::Exact);
    let in_memory = ReconcileEngine::new(ctx)
        .run(
            &keyed_rows(&source_keys),
            &keyed_rows(&target_keys),
            &RunHooks::new(),
        )
        .unwrap();

    let multiset = |verdicts: &[recon_managed::report::Verdict]| {
        let mut entries: Vec<(String, Option<u64>, Option<u64>)> = verdicts
            .iter()
            .map(|v| (v.status.to_string(), v.source_line, v.target_line))
            .collect();
        entries.sort();
        entries
    };
    assert_eq!(multiset(&streamed), multiset(&in_memory));
}

#[test]
fn progress_reaches_one_hundred_per_stage() {
    let mappings = vec![mapping("k", "K", "K")];
    let cfg = config(MatchStrategy::Exact, 0.0, ToleranceUnit::Exact);
    let ctx = MatchContext::new(&mappings, 0.0, ToleranceUnit::Exact, MatchStrategy::Exact);
    let engine = StreamEngine::new(ctx, &cfg);

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let hooks = RunHooks::new().with_progress(move |pct, stage| {
        sink.lock().unwrap().push((pct, stage));
    });

    engine
        .run(&keyed_rows(&[1, 2, 3]), &keyed_rows(&[1, 2]), &hooks)
        .unwrap();
    let events = events.lock().unwrap();
    assert!(events.contains(&(100, Stage::Streaming)));
}

#[test]
fn cancellation_surfaces_at_the_first_boundary() {
    let mappings = vec![mapping("k", "K", "K")];
    let cfg = config(MatchStrategy::Smart, 0.0, ToleranceUnit::Exact);
    let ctx = MatchContext::new(&mappings, 0.0, ToleranceUnit::Exact, MatchStrategy::Smart);
    let engine = StreamEngine::new(ctx, &cfg);

    let flag = Arc::new(AtomicBool::new(true));
    flag.store(true, Ordering::Relaxed);
    let hooks = RunHooks::new().with_cancel_flag(flag);
    let result = engine.run(&keyed_rows(&[1]), &keyed_rows(&[1]), &hooks);
    assert!(matches!(result, Err(EngineError::Cancelled)));
}

#[test]
fn sort_by_key_projects_date_strings_before_ordering() {
    let mut rows = vec![
        enriched(2, &[("K", Scalar::Str("02/01/2024".into()))]),
        enriched(3, &[("K", Scalar::Str("2024-01-15".into()))]),
        enriched(4, &[("K", Scalar::Str("01-01-2024".into()))]),
    ];
    sort_by_key(&mut rows, "K");
    let lines: Vec<Option<u64>> = rows.iter().map(|r| r.enriched.line()).collect();
    // Jan 1 (day-first dashes), Jan 15 (ISO), Feb 1 (month-first slashes).
    assert_eq!(lines, vec![Some(4), Some(3), Some(2)]);
}
