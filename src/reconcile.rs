//! In-memory reconciliation across two preprocessed datasets.
//!
//! Every enriched source row is scored against every enriched target row.
//! Candidates above the admission floor survive the strategy filter, and the
//! source claims the best still-unclaimed one. Duplicate targets collapse to
//! a single candidate per round through their row identity, so each copy is
//! claimed at most once and surplus copies trail as unmatched.

use std::collections::HashSet;

use log::debug;

use crate::{
    config::MatchStrategy,
    error::EngineError,
    predicate::MatchContext,
    preprocess::EnrichedRow,
    progress::{PROGRESS_INTERVAL, RunHooks, Stage},
    report::Verdict,
    row::row_identity,
};

/// Minimum confidence for a target to be considered at all.
pub const CANDIDATE_FLOOR: f64 = 0.3;
/// Confidence above which a candidate counts as a strong match.
pub const STRONG_MATCH: f64 = 0.8;

struct Candidate {
    target_index: usize,
    confidence: f64,
}

/// Scores, filters, and claims in one pass per source row.
pub struct ReconcileEngine<'a> {
    ctx: MatchContext<'a>,
}

impl<'a> ReconcileEngine<'a> {
    pub fn new(ctx: MatchContext<'a>) -> Self {
        ReconcileEngine { ctx }
    }

    /// Reconciles two in-memory datasets into an ordered verdict list:
    /// source-driven verdicts in input order, then unmatched targets.
    pub fn run(
        &self,
        sources: &[EnrichedRow],
        targets: &[EnrichedRow],
        hooks: &RunHooks,
    ) -> Result<Vec<Verdict>, EngineError> {
        let mut claimed = vec![false; targets.len()];
        let mut verdicts = Vec::with_capacity(sources.len() + targets.len());

        // Duplicate targets collapse to one candidate per round through their
        // row identity; the next source sees the next unclaimed duplicate.
        let identities: Vec<String> = targets
            .iter()
            .map(|t| row_identity(&t.enriched))
            .collect();
        debug!(
            "Reconciling {} source row(s) against {} target row(s)",
            sources.len(),
            targets.len(),
        );

        let total = sources.len().max(1);
        for (processed, source) in sources.iter().enumerate() {
            if processed % PROGRESS_INTERVAL == 0 {
                if hooks.cancelled() {
                    return Err(EngineError::Cancelled);
                }
                hooks.emit_ratio(processed, total, Stage::Matching);
            }

            let candidates = self.score_candidates(source, targets, &identities, &claimed);
            let filtered = filter_by_strategy(candidates, self.ctx.strategy);

            match filtered.iter().find(|c| !claimed[c.target_index]) {
                Some(best) => {
                    claimed[best.target_index] = true;
                    let target = &targets[best.target_index];
                    let discrepancies = self
                        .ctx
                        .discrepancies(&source.enriched, &target.enriched);
                    verdicts.push(Verdict::paired(
                        source.original.clone(),
                        target.original.clone(),
                        best.confidence,
                        discrepancies,
                        self.ctx.mappings,
                    ));
                }
                None => {
                    verdicts.push(Verdict::unmatched_source(
                        source.original.clone(),
                        self.ctx.mappings,
                    ));
                }
            }
        }

        for (index, target) in targets.iter().enumerate() {
            if !claimed[index] {
                verdicts.push(Verdict::unmatched_target(
                    target.original.clone(),
                    self.ctx.mappings,
                ));
            }
        }

        hooks.emit(100, Stage::Matching);
        Ok(verdicts)
    }

    fn score_candidates(
        &self,
        source: &EnrichedRow,
        targets: &[EnrichedRow],
        identities: &[String],
        claimed: &[bool],
    ) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        let mut seen_identities: HashSet<&str> = HashSet::new();
        for (target_index, target) in targets.iter().enumerate() {
            if claimed[target_index] {
                continue;
            }
            if !seen_identities.insert(identities[target_index].as_str()) {
                continue;
            }
            let confidence = self.ctx.confidence(&source.enriched, &target.enriched);
            if confidence > CANDIDATE_FLOOR {
                candidates.push(Candidate {
                    target_index,
                    confidence,
                });
            }
        }
        // Descending confidence, earlier targets first on ties.
        candidates.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then(a.target_index.cmp(&b.target_index))
        });
        candidates
    }
}

fn filter_by_strategy(candidates: Vec<Candidate>, strategy: MatchStrategy) -> Vec<Candidate> {
    match strategy {
        MatchStrategy::Exact => candidates
            .into_iter()
            .filter(|c| c.confidence > STRONG_MATCH)
            .collect(),
        MatchStrategy::Fuzzy => candidates.into_iter().take(3).collect(),
        MatchStrategy::Smart => {
            let strong: Vec<Candidate> = candidates
                .iter()
                .filter(|c| c.confidence > STRONG_MATCH)
                .map(|c| Candidate {
                    target_index: c.target_index,
                    confidence: c.confidence,
                })
                .collect();
            if strong.is_empty() {
                candidates.into_iter().take(1).collect()
            } else {
                strong
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ToleranceUnit,
        data::Scalar,
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

    fn engine<'a>(
        mappings: &'a [ColumnMapping],
        tolerance: f64,
        unit: ToleranceUnit,
        strategy: MatchStrategy,
    ) -> ReconcileEngine<'a> {
        ReconcileEngine::new(MatchContext::new(mappings, tolerance, unit, strategy))
    }

    #[test]
    fn exact_amount_match_across_column_names() {
        let mappings = vec![mapping("m1", "Amount", "Value")];
        let eng = engine(&mappings, 0.0, ToleranceUnit::Exact, MatchStrategy::Smart);
        let sources = vec![enriched(&[("Amount", Scalar::Float(1500.0))])];
        let targets = vec![enriched(&[("Value", Scalar::Float(1500.0))])];
        let verdicts = eng.run(&sources, &targets, &RunHooks::new()).unwrap();
        assert_eq!(verdicts.len(), 1);
        assert_eq!(verdicts[0].status, MatchStatus::Matched);
        assert_eq!(verdicts[0].confidence, Some(1.0));
        assert!(verdicts[0].discrepancies.is_empty());
    }

    #[test]
    fn duplicate_targets_each_claimed_at_most_once() {
        let mappings = vec![mapping("m1", "K", "K")];
        let eng = engine(&mappings, 0.0, ToleranceUnit::Exact, MatchStrategy::Exact);
        let sources = vec![
            enriched(&[("K", Scalar::Int(1))]),
            enriched(&[("K", Scalar::Int(1))]),
        ];
        let targets = vec![
            enriched(&[("K", Scalar::Int(1))]),
            enriched(&[("K", Scalar::Int(1))]),
            enriched(&[("K", Scalar::Int(1))]),
        ];
        let verdicts = eng.run(&sources, &targets, &RunHooks::new()).unwrap();
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
    fn smart_strategy_prefers_strong_candidates() {
        let mappings = vec![
            mapping("m1", "Amount", "Amount"),
            mapping("m2", "Ref", "Ref"),
        ];
        let eng = engine(&mappings, 0.0, ToleranceUnit::Exact, MatchStrategy::Smart);
        let sources = vec![enriched(&[
            ("Amount", Scalar::Float(10.0)),
            ("Ref", Scalar::Str("R1".into())),
        ])];
        // First target agrees only on amount, second on both.
        let targets = vec![
            enriched(&[
                ("Amount", Scalar::Float(10.0)),
                ("Ref", Scalar::Str("zz".into())),
            ]),
            enriched(&[
                ("Amount", Scalar::Float(10.0)),
                ("Ref", Scalar::Str("R1".into())),
            ]),
        ];
        let verdicts = eng.run(&sources, &targets, &RunHooks::new()).unwrap();
        assert_eq!(verdicts[0].status, MatchStatus::Matched);
        assert_eq!(verdicts[0].confidence, Some(1.0));
        // The weaker duplicate becomes unmatched-target.
        assert_eq!(verdicts[1].status, MatchStatus::UnmatchedTarget);
    }

    #[test]
    fn weak_candidates_leave_sources_unmatched_under_exact_strategy() {
        let mappings = vec![
            mapping("m1", "Amount", "Amount"),
            mapping("m2", "Ref", "Ref"),
            mapping("m3", "Date", "Date"),
        ];
        let eng = engine(&mappings, 0.0, ToleranceUnit::Exact, MatchStrategy::Exact);
        let sources = vec![enriched(&[
            ("Amount", Scalar::Float(10.0)),
            ("Ref", Scalar::Str("R1".into())),
            ("Date", Scalar::Str("2024-01-01".into())),
        ])];
        let targets = vec![enriched(&[
            ("Amount", Scalar::Float(10.0)),
            ("Ref", Scalar::Str("other".into())),
            ("Date", Scalar::Str("2023-12-31".into())),
        ])];
        let verdicts = eng.run(&sources, &targets, &RunHooks::new()).unwrap();
        assert_eq!(verdicts[0].status, MatchStatus::UnmatchedSource);
        assert_eq!(verdicts[1].status, MatchStatus::UnmatchedTarget);
    }

    #[test]
    fn discrepancy_within_tolerance_matches() {
        let mappings = vec![mapping("m1", "Amount", "Value")];
        let eng = engine(&mappings, 0.01, ToleranceUnit::Amount, MatchStrategy::Smart);
        let sources = vec![enriched(&[("Amount", Scalar::Float(2200.0))])];
        let targets = vec![enriched(&[("Value", Scalar::Float(2199.99))])];
        let verdicts = eng.run(&sources, &targets, &RunHooks::new()).unwrap();
        assert_eq!(verdicts[0].status, MatchStatus::Matched);
    }

    #[test]
    fn zero_tolerance_reports_the_discrepancy_string() {
        let mappings = vec![mapping("m1", "Amount", "Value")];
        let eng = engine(&mappings, 0.0, ToleranceUnit::Amount, MatchStrategy::Smart);
        let sources = vec![enriched(&[("Amount", Scalar::Float(2200.0))])];
        let targets = vec![enriched(&[("Value", Scalar::Float(2199.99))])];
        let verdicts = eng.run(&sources, &targets, &RunHooks::new()).unwrap();
        assert_eq!(verdicts[0].status, MatchStatus::Discrepancy);
        assert_eq!(verdicts[0].discrepancies, vec!["Value: 2200 ≠ 2199.99"]);
    }

    #[test]
    fn cancellation_aborts_before_emitting_verdicts() {
        use std::sync::{Arc, atomic::AtomicBool};
        let mappings = vec![mapping("m1", "K", "K")];
        let eng = engine(&mappings, 0.0, ToleranceUnit::Exact, MatchStrategy::Exact);
        let sources = vec![enriched(&[("K", Scalar::Int(1))])];
        let targets = vec![enriched(&[("K", Scalar::Int(1))])];
        let flag = Arc::new(AtomicBool::new(true));
        let hooks = RunHooks::new().with_cancel_flag(flag);
        assert!(matches!(
            eng.run(&sources, &targets, &hooks),
            Err(EngineError::Cancelled)
        ));
    }
}
