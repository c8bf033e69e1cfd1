//! Tolerance-aware value comparison and confidence scoring.
//!
//! [`values_match`] decides whether two cells agree under the configured
//! tolerance window. [`MatchContext`] aggregates that decision over a
//! mapping set into a weighted confidence in `[0, 1]` and produces the
//! human-readable discrepancy strings carried by verdicts.

use crate::{
    config::{MatchStrategy, ToleranceUnit},
    data::{Scalar, parse_date_text, to_number, to_text},
    mapping::ColumnMapping,
    row::Row,
};

/// A value's date reading: canonical dates directly, strings through the
/// date grammar. Numbers are never read as dates here, so numeric columns
/// keep numeric tolerance semantics.
fn as_date_ms(value: &Scalar) -> Option<i64> {
    match value {
        Scalar::Date(ms) => Some(*ms),
        Scalar::Str(s) => parse_date_text(s),
        _ => None,
    }
}

/// Compares two scalars under a tolerance window.
///
/// Equal values always match. Date pairs (including date-shaped strings in
/// any supported format) compare in epoch milliseconds with the
/// unit-converted window; numeric pairs compare absolutely or relatively
/// per the unit; strings (and mixed types, through their textual form)
/// compare trimmed and lowercased.
pub fn values_match(a: &Scalar, b: &Scalar, tolerance: f64, unit: ToleranceUnit) -> bool {
    if a == b {
        return true;
    }
    if let (Some(left), Some(right)) = (as_date_ms(a), as_date_ms(b)) {
        let window = match unit {
            u if u.is_temporal() => u.tolerance_ms(tolerance),
            ToleranceUnit::Amount => tolerance,
            _ => 0.0,
        };
        return ((left - right).abs() as f64) <= window;
    }
    match (a, b) {
        (left, right) if left.is_numeric() && right.is_numeric() => {
            let l = to_number(left);
            let r = to_number(right);
            match unit {
                ToleranceUnit::Amount => (l - r).abs() <= tolerance,
                ToleranceUnit::Percentage => {
                    // The smaller magnitude is the base, so a zero on either
                    // side only ever matches an exact zero.
                    let base = l.abs().min(r.abs());
                    (l - r).abs() <= base * tolerance / 100.0
                }
                u if u.is_temporal() => (l - r).abs() <= u.tolerance_ms(tolerance),
                _ => l == r,
            }
        }
        (left, right) => {
            let l = to_text(left);
            let r = to_text(right);
            l.trim().eq_ignore_ascii_case(r.trim())
        }
    }
}

/// Relative window for near-miss candidate admission.
const NEAR_MATCH_RELATIVE: f64 = 0.01;

fn near_numeric_match(a: &Scalar, b: &Scalar) -> bool {
    if !a.is_numeric() || !b.is_numeric() {
        return false;
    }
    let l = to_number(a);
    let r = to_number(b);
    let base = l.abs().min(r.abs());
    (l - r).abs() <= base * NEAR_MATCH_RELATIVE
}

/// Name-based field weight used by the fuzzy and smart strategies:
/// id-like and amount-like columns count triple, dates and descriptions
/// double, everything else once.
pub fn field_weight(column: &str) -> u32 {
    let lowered = column.to_lowercase();
    if lowered.contains("id") || lowered.contains("reference") {
        3
    } else if lowered.contains("amount") || lowered.contains("value") {
        3
    } else if lowered.contains("date") {
        2
    } else if lowered.contains("description") || lowered.contains("details") {
        2
    } else {
        1
    }
}

/// Mapping set plus tolerance configuration, shared by both engines.
pub struct MatchContext<'a> {
    pub mappings: &'a [ColumnMapping],
    pub tolerance: f64,
    pub unit: ToleranceUnit,
    pub strategy: MatchStrategy,
}

impl<'a> MatchContext<'a> {
    pub fn new(
        mappings: &'a [ColumnMapping],
        tolerance: f64,
        unit: ToleranceUnit,
        strategy: MatchStrategy,
    ) -> Self {
        MatchContext {
            mappings,
            tolerance,
            unit,
            strategy,
        }
    }

    fn mapping_matches(&self, mapping: &ColumnMapping, source: &Row, target: &Row) -> bool {
        let s = mapping.project_source(source);
        let t = mapping.project_target(target);
        let tolerance = mapping.tolerance.unwrap_or(self.tolerance);
        values_match(&s, &t, tolerance, self.unit)
    }

    /// Scoring is slightly more lenient than the strict comparison: numeric
    /// pairs within one percent still count toward candidate admission, so a
    /// near-miss surfaces as a discrepancy verdict instead of two unmatched
    /// rows. The strict comparison alone decides matched vs discrepancy.
    fn mapping_scores(&self, mapping: &ColumnMapping, source: &Row, target: &Row) -> bool {
        if self.mapping_matches(mapping, source, target) {
            return true;
        }
        let s = mapping.project_source(source);
        let t = mapping.project_target(target);
        near_numeric_match(&s, &t)
    }

    fn mapping_weight(&self, mapping: &ColumnMapping) -> u32 {
        if self.strategy == MatchStrategy::Exact {
            return 1;
        }
        field_weight(&mapping.target)
    }

    /// Weighted fraction of mapped fields that agree, in `[0, 1]`.
    pub fn confidence(&self, source: &Row, target: &Row) -> f64 {
        let mut total = 0u32;
        let mut matched = 0u32;
        for mapping in self.mappings {
            let weight = self.mapping_weight(mapping);
            total += weight;
            if self.mapping_scores(mapping, source, target) {
                matched += weight;
            }
        }
        if total == 0 {
            0.0
        } else {
            f64::from(matched) / f64::from(total)
        }
    }

    /// Human-readable `"<col>: <sv> ≠ <tv>"` strings for every mapping that
    /// fails the unit-aware comparison.
    pub fn discrepancies(&self, source: &Row, target: &Row) -> Vec<String> {
        let mut found = Vec::new();
        for mapping in self.mappings {
            if !self.mapping_matches(mapping, source, target) {
                let s = mapping.project_source(source);
                let t = mapping.project_target(target);
                found.push(format!(
                    "{}: {} ≠ {}",
                    mapping.target,
                    s.as_display(),
                    t.as_display()
                ));
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data::parse_date_text, mapping::SourceSelector};

    fn row(pairs: &[(&str, Scalar)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
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

    #[test]
    fn numbers_match_within_amount_tolerance() {
        let a = Scalar::Float(2200.0);
        let b = Scalar::Float(2199.99);
        assert!(!values_match(&a, &b, 0.005, ToleranceUnit::Amount));
        assert!(values_match(&a, &b, 0.01, ToleranceUnit::Amount));
        assert!(!values_match(&a, &b, 0.0, ToleranceUnit::Exact));
    }

    #[test]
    fn percentage_tolerance_against_zero_admits_only_zero() {
        let zero = Scalar::Float(0.0);
        assert!(!values_match(
            &zero,
            &Scalar::Float(0.01),
            5.0,
            ToleranceUnit::Percentage
        ));
        assert!(!values_match(
            &Scalar::Float(0.01),
            &zero,
            100.0,
            ToleranceUnit::Percentage
        ));
        assert!(values_match(
            &zero,
            &Scalar::Int(0),
            5.0,
            ToleranceUnit::Percentage
        ));
    }

    #[test]
    fn percentage_tolerance_scales_with_magnitude() {
        let a = Scalar::Float(100.0);
        let b = Scalar::Float(104.0);
        assert!(values_match(&a, &b, 5.0, ToleranceUnit::Percentage));
        assert!(!values_match(&a, &b, 3.0, ToleranceUnit::Percentage));
    }

    #[test]
    fn dates_match_within_temporal_window() {
        let a = Scalar::Date(parse_date_text("2024-01-15 09:03:00").unwrap());
        let b = Scalar::Date(parse_date_text("2024-01-15 09:07:00").unwrap());
        assert!(values_match(&a, &b, 5.0, ToleranceUnit::Minutes));
        assert!(!values_match(&a, &b, 3.0, ToleranceUnit::Minutes));
    }

    #[test]
    fn strings_compare_trimmed_and_lowercased() {
        let a = Scalar::Str("  Acme Corp ".into());
        let b = Scalar::Str("acme corp".into());
        assert!(values_match(&a, &b, 0.0, ToleranceUnit::Exact));
    }

    #[test]
    fn mixed_types_fall_back_to_text_comparison() {
        let date = Scalar::Date(parse_date_text("2024-01-15").unwrap());
        let text = Scalar::Str("2024-01-15".into());
        assert!(values_match(&date, &text, 0.0, ToleranceUnit::Exact));
    }

    #[test]
    fn date_shaped_strings_compare_across_formats() {
        let a = Scalar::Str("2024-01-15 09:03:00".into());
        let b = Scalar::Str("15-01-2024 09:07".into());
        assert!(values_match(&a, &b, 5.0, ToleranceUnit::Minutes));
        assert!(!values_match(&a, &b, 0.0, ToleranceUnit::Exact));
    }

    #[test]
    fn weights_follow_the_name_heuristic() {
        assert_eq!(field_weight("transaction_id"), 3);
        assert_eq!(field_weight("Amount"), 3);
        assert_eq!(field_weight("posting_date"), 2);
        assert_eq!(field_weight("description"), 2);
        assert_eq!(field_weight("status"), 1);
    }

    #[test]
    fn confidence_is_the_weighted_match_fraction() {
        let mappings = vec![
            mapping("m1", "Amount", "Amount"), // weight 3
            mapping("m2", "Memo", "Memo"),     // weight 1
        ];
        let ctx = MatchContext::new(&mappings, 0.0, ToleranceUnit::Exact, MatchStrategy::Smart);
        let s = row(&[
            ("Amount", Scalar::Float(10.0)),
            ("Memo", Scalar::Str("a".into())),
        ]);
        let t = row(&[
            ("Amount", Scalar::Float(10.0)),
            ("Memo", Scalar::Str("b".into())),
        ]);
        assert!((ctx.confidence(&s, &t) - 0.75).abs() < 1e-9);

        let exact = MatchContext::new(&mappings, 0.0, ToleranceUnit::Exact, MatchStrategy::Exact);
        assert!((exact.confidence(&s, &t) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn discrepancies_render_target_column_and_both_values() {
        let mappings = vec![mapping("m1", "Amount", "Value")];
        let ctx = MatchContext::new(&mappings, 0.0, ToleranceUnit::Exact, MatchStrategy::Smart);
        let s = row(&[("Amount", Scalar::Float(2200.0))]);
        let t = row(&[("Value", Scalar::Float(2199.99))]);
        assert_eq!(ctx.discrepancies(&s, &t), vec!["Value: 2200 ≠ 2199.99"]);
    }

    #[test]
    fn per_mapping_tolerance_override_wins() {
        let mut m = mapping("m1", "Amount", "Value");
        m.tolerance = Some(0.5);
        let mappings = vec![m];
        let ctx = MatchContext::new(&mappings, 0.0, ToleranceUnit::Amount, MatchStrategy::Smart);
        let s = row(&[("Amount", Scalar::Float(10.0))]);
        let t = row(&[("Value", Scalar::Float(10.4))]);
        assert!(ctx.discrepancies(&s, &t).is_empty());
    }
}
