//! Cell-transformation pipelines.
//!
//! A [`TransformPipeline`] is an ordered chain of [`TransformStep`]s applied
//! to one column's value. Execution is resilient: a failed step records its
//! error and passes its *input* value to the next step, because downstream
//! steps often recover something usable. The pipeline as a whole only counts
//! as successful when every step succeeded. [`preview_pipeline`] exposes the
//! per-step trace that backs the `preview` subcommand.

pub mod date_ops;
pub mod number_ops;
pub mod string_ops;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    condition::evaluate_condition,
    data::{Scalar, parse_cell, to_epoch_ms, to_number, to_text},
    error::{CellError, CellResult, EngineError},
    rates::{Clock, RateProvider},
};

use number_ops::RoundingMode;

fn default_true() -> bool {
    true
}

fn default_auto() -> String {
    "auto".to_string()
}

fn default_exclude_threshold() -> f64 {
    1.0
}

/// Where `flag_missing` places its marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FlagPosition {
    #[default]
    Replace,
    Prefix,
    Suffix,
}

/// `standardize_format` targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StandardizeTarget {
    Phone,
    Email,
    Title,
    Sentence,
}

/// Result type the `conditional` step casts its chosen branch into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BranchType {
    #[default]
    String,
    Number,
    Date,
    Boolean,
}

/// The closed set of step kinds with their parameter bags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "parameters",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum StepKind {
    CleanString {
        #[serde(default = "default_true")]
        trim: bool,
        #[serde(default = "default_true")]
        normalize_spaces: bool,
    },
    Trim,
    Lowercase,
    Uppercase,
    RemoveSpecialChars {
        #[serde(default = "default_true")]
        keep_alphanumeric: bool,
        #[serde(default)]
        replacement: String,
    },
    CastToDate {
        #[serde(default = "default_auto")]
        input_format: String,
        #[serde(default)]
        strict_parsing: bool,
    },
    CastToNumber {
        #[serde(default = "default_true")]
        remove_commas: bool,
        #[serde(default = "default_true")]
        remove_currency: bool,
    },
    CastToString,
    ConvertTimezone {
        from_timezone: String,
        to_timezone: String,
        #[serde(default)]
        shift_wall_clock: bool,
    },
    FormatDate {
        output_format: String,
    },
    CurrencyConversion {
        from_currency: String,
        to_currency: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exchange_rate: Option<f64>,
    },
    RoundNumber {
        decimal_places: u32,
        #[serde(default)]
        rounding_mode: RoundingMode,
    },
    ReplaceText {
        search_text: String,
        #[serde(default)]
        replace_with: String,
        #[serde(default)]
        use_regex: bool,
        #[serde(default = "default_true")]
        case_sensitive: bool,
    },
    ExtractSubstring {
        start_position: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        length: Option<usize>,
    },
    StandardizeFormat {
        format_type: StandardizeTarget,
    },
    Conditional {
        condition: String,
        true_value: String,
        false_value: String,
        #[serde(default)]
        data_type: BranchType,
    },
    AbsoluteValue,
    NegateNumber,
    ScaleNumber {
        factor: f64,
    },
    FillNull {
        fill_value: String,
        #[serde(default = "default_true")]
        treat_empty_as_null: bool,
        #[serde(default)]
        treat_zero_as_null: bool,
    },
    FlagMissing {
        flag_value: String,
        #[serde(default)]
        flag_position: FlagPosition,
    },
    ExcludeIfNull {
        #[serde(default = "default_exclude_threshold")]
        threshold: f64,
        #[serde(default = "default_true")]
        treat_empty_as_null: bool,
    },
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::CleanString { .. } => "clean_string",
            StepKind::Trim => "trim",
            StepKind::Lowercase => "lowercase",
            StepKind::Uppercase => "uppercase",
            StepKind::RemoveSpecialChars { .. } => "remove_special_chars",
            StepKind::CastToDate { .. } => "cast_to_date",
            StepKind::CastToNumber { .. } => "cast_to_number",
            StepKind::CastToString => "cast_to_string",
            StepKind::ConvertTimezone { .. } => "convert_timezone",
            StepKind::FormatDate { .. } => "format_date",
            StepKind::CurrencyConversion { .. } => "currency_conversion",
            StepKind::RoundNumber { .. } => "round_number",
            StepKind::ReplaceText { .. } => "replace_text",
            StepKind::ExtractSubstring { .. } => "extract_substring",
            StepKind::StandardizeFormat { .. } => "standardize_format",
            StepKind::Conditional { .. } => "conditional",
            StepKind::AbsoluteValue => "absolute_value",
            StepKind::NegateNumber => "negate_number",
            StepKind::ScaleNumber { .. } => "scale_number",
            StepKind::FillNull { .. } => "fill_null",
            StepKind::FlagMissing { .. } => "flag_missing",
            StepKind::ExcludeIfNull { .. } => "exclude_if_null",
        }
    }
}

/// One step in a pipeline. `order` positions it within the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformStep {
    pub id: String,
    pub order: u32,
    #[serde(flatten)]
    pub kind: StepKind,
}

/// An ordered step chain bound to one column. Output lands in
/// `output_column` when set, else overwrites `column_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformPipeline {
    pub id: String,
    pub column_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_column: Option<String>,
    pub steps: Vec<TransformStep>,
}

impl TransformPipeline {
    /// Steps in execution order.
    pub fn ordered_steps(&self) -> Vec<&TransformStep> {
        self.steps.iter().sorted_by_key(|s| s.order).collect_vec()
    }

    pub fn target_column(&self) -> &str {
        self.output_column.as_deref().unwrap_or(&self.column_id)
    }

    /// Eager parameter and cross-step validation; nothing row-shaped runs
    /// until every pipeline passes.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.column_id.is_empty() {
            return Err(EngineError::config(format!(
                "pipeline '{}' has an empty column id",
                self.id
            )));
        }
        let mut date_cast_seen = false;
        for step in self.ordered_steps() {
            validate_step(&self.id, step)?;
            match &step.kind {
                StepKind::CastToDate { .. } => date_cast_seen = true,
                StepKind::ConvertTimezone { .. } if !date_cast_seen => {
                    return Err(EngineError::config(format!(
                        "pipeline '{}': convert_timezone requires a preceding cast_to_date",
                        self.id
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn validate_step(pipeline_id: &str, step: &TransformStep) -> Result<(), EngineError> {
    let fail = |reason: String| {
        Err(EngineError::config(format!(
            "pipeline '{pipeline_id}', step '{}': {reason}",
            step.id
        )))
    };
    match &step.kind {
        StepKind::CastToDate { input_format, .. } => {
            if !date_ops::known_input_format(input_format) {
                return fail(format!("unknown input format '{input_format}'"));
            }
        }
        StepKind::ConvertTimezone {
            from_timezone,
            to_timezone,
            ..
        } => {
            for zone in [from_timezone, to_timezone] {
                if date_ops::resolve_zone(zone).is_err() {
                    return Err(EngineError::unsupported(format!(
                        "timezone '{zone}' in pipeline '{pipeline_id}', step '{}'",
                        step.id
                    )));
                }
            }
        }
        StepKind::CurrencyConversion {
            from_currency,
            to_currency,
            exchange_rate,
        } => {
            if from_currency.is_empty() || to_currency.is_empty() {
                return fail("currency codes must be non-empty".to_string());
            }
            if let Some(rate) = exchange_rate {
                if !rate.is_finite() || *rate <= 0.0 {
                    return fail(format!("exchange rate {rate} is not a positive number"));
                }
            }
        }
        StepKind::RoundNumber { decimal_places, .. } => {
            if *decimal_places > 12 {
                return fail(format!("decimal places {decimal_places} exceeds 12"));
            }
        }
        StepKind::ReplaceText {
            search_text,
            use_regex,
            ..
        } => {
            if search_text.is_empty() {
                return fail("search text must be non-empty".to_string());
            }
            if *use_regex {
                if let Err(err) = regex::Regex::new(search_text) {
                    return fail(format!("invalid regex: {err}"));
                }
            }
        }
        StepKind::Conditional { condition, .. } => {
            if condition.trim().is_empty() {
                return fail("condition must be non-empty".to_string());
            }
            if let Err(err) = evalexpr::build_operator_tree(condition) {
                return fail(format!("condition does not parse: {err}"));
            }
        }
        StepKind::ScaleNumber { factor } => {
            if !factor.is_finite() {
                return fail("scale factor must be finite".to_string());
            }
        }
        StepKind::ExcludeIfNull { threshold, .. } => {
            if !(0.0..=1.0).contains(threshold) {
                return fail(format!("threshold {threshold} must be within [0, 1]"));
            }
        }
        _ => {}
    }
    Ok(())
}

/// Read-only collaborators every step execution may need.
pub struct StepContext<'a> {
    pub rates: &'a dyn RateProvider,
    pub clock: &'a dyn Clock,
}

/// Applies one step to one value.
pub fn execute_step(value: &Scalar, step: &TransformStep, ctx: &StepContext<'_>) -> CellResult<Scalar> {
    match &step.kind {
        StepKind::CleanString {
            trim,
            normalize_spaces,
        } => Ok(on_text(value, |s| {
            string_ops::clean(s, *trim, *normalize_spaces).into_owned()
        })),
        StepKind::Trim => Ok(on_text(value, |s| string_ops::trim(s).into_owned())),
        StepKind::Lowercase => Ok(on_text(value, |s| string_ops::lowercase(s).into_owned())),
        StepKind::Uppercase => Ok(on_text(value, |s| string_ops::uppercase(s).into_owned())),
        StepKind::RemoveSpecialChars {
            keep_alphanumeric,
            replacement,
        } => Ok(on_text(value, |s| {
            string_ops::remove_special_chars(s, *keep_alphanumeric, replacement).into_owned()
        })),
        StepKind::CastToDate {
            input_format,
            strict_parsing,
        } => date_ops::cast_to_date(value, input_format, *strict_parsing),
        StepKind::CastToNumber {
            remove_commas,
            remove_currency,
        } => cast_to_number(value, *remove_commas, *remove_currency),
        StepKind::CastToString => Ok(Scalar::Str(to_text(value))),
        StepKind::ConvertTimezone {
            from_timezone,
            to_timezone,
            shift_wall_clock,
        } => date_ops::convert_timezone(value, from_timezone, to_timezone, *shift_wall_clock),
        StepKind::FormatDate { output_format } => date_ops::format_date(value, output_format),
        StepKind::CurrencyConversion {
            from_currency,
            to_currency,
            exchange_rate,
        } => number_ops::convert_currency(
            to_number(value),
            from_currency,
            to_currency,
            *exchange_rate,
            ctx.rates,
        )
        .map(Scalar::Float),
        StepKind::RoundNumber {
            decimal_places,
            rounding_mode,
        } => Ok(Scalar::Float(number_ops::round_to(
            to_number(value),
            *decimal_places,
            *rounding_mode,
        ))),
        StepKind::ReplaceText {
            search_text,
            replace_with,
            use_regex,
            case_sensitive,
        } => replace_text(value, search_text, replace_with, *use_regex, *case_sensitive),
        StepKind::ExtractSubstring {
            start_position,
            length,
        } => Ok(on_text(value, |s| {
            string_ops::substring(s, *start_position, *length).into_owned()
        })),
        StepKind::StandardizeFormat { format_type } => Ok(on_text(value, |s| match format_type {
            StandardizeTarget::Phone => string_ops::standardize_phone(s).into_owned(),
            StandardizeTarget::Email => string_ops::standardize_email(s).into_owned(),
            StandardizeTarget::Title => string_ops::standardize_title(s).into_owned(),
            StandardizeTarget::Sentence => string_ops::standardize_sentence(s).into_owned(),
        })),
        StepKind::Conditional {
            condition,
            true_value,
            false_value,
            data_type,
        } => {
            let branch = if evaluate_condition(condition, value)? {
                true_value
            } else {
                false_value
            };
            cast_branch(branch, *data_type)
        }
        StepKind::AbsoluteValue => Ok(Scalar::Float(to_number(value).abs())),
        StepKind::NegateNumber => Ok(Scalar::Float(-to_number(value))),
        StepKind::ScaleNumber { factor } => {
            number_ops::scale(to_number(value), *factor).map(Scalar::Float)
        }
        StepKind::FillNull {
            fill_value,
            treat_empty_as_null,
            treat_zero_as_null,
        } => Ok(fill_null(
            value,
            fill_value,
            *treat_empty_as_null,
            *treat_zero_as_null,
            ctx.clock,
        )),
        StepKind::FlagMissing {
            flag_value,
            flag_position,
        } => Ok(flag_missing(value, flag_value, *flag_position)),
        StepKind::ExcludeIfNull {
            threshold,
            treat_empty_as_null,
        } => {
            let missing = if *treat_empty_as_null {
                value.is_missing()
            } else {
                value.is_null()
            };
            if missing && *threshold > 0.0 {
                Err(CellError::ExcludeRow)
            } else {
                Ok(value.clone())
            }
        }
    }
}

/// Applies a text operation; null passes through untouched so later
/// null-handling steps still see it.
fn on_text(value: &Scalar, f: impl Fn(&str) -> String) -> Scalar {
    if value.is_null() {
        return Scalar::Null;
    }
    Scalar::Str(f(&to_text(value)))
}

fn cast_to_number(value: &Scalar, remove_commas: bool, remove_currency: bool) -> CellResult<Scalar> {
    match value {
        Scalar::Null => Ok(Scalar::Float(0.0)),
        Scalar::Int(_) | Scalar::Float(_) => Ok(Scalar::Float(to_number(value))),
        Scalar::Bool(b) => Ok(Scalar::Float(if *b { 1.0 } else { 0.0 })),
        Scalar::Date(ms) => Ok(Scalar::Float(*ms as f64)),
        Scalar::Str(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| {
                    if c.is_whitespace() {
                        return false;
                    }
                    if *c == ',' {
                        return !remove_commas;
                    }
                    if matches!(c, '$' | '€' | '£' | '¥' | '₹' | '%') {
                        return !remove_currency;
                    }
                    true
                })
                .collect();
            cleaned
                .parse::<f64>()
                .map(Scalar::Float)
                .map_err(|_| CellError::TypeError(format!("'{s}' is not numeric")))
        }
    }
}

fn replace_text(
    value: &Scalar,
    search: &str,
    replacement: &str,
    use_regex: bool,
    case_sensitive: bool,
) -> CellResult<Scalar> {
    Ok(on_text(value, |s| {
        if use_regex {
            let pattern = if case_sensitive {
                search.to_string()
            } else {
                format!("(?i){search}")
            };
            match regex::Regex::new(&pattern) {
                Ok(re) => string_ops::regex_replace(s, &re, replacement).into_owned(),
                Err(_) => s.to_string(),
            }
        } else {
            string_ops::literal_replace(s, search, replacement, case_sensitive).into_owned()
        }
    }))
}

fn fill_null(
    value: &Scalar,
    fill_value: &str,
    treat_empty_as_null: bool,
    treat_zero_as_null: bool,
    clock: &dyn Clock,
) -> Scalar {
    let missing = match value {
        Scalar::Null => true,
        Scalar::Str(s) => treat_empty_as_null && s.trim().is_empty(),
        Scalar::Int(0) => treat_zero_as_null,
        Scalar::Float(f) => treat_zero_as_null && *f == 0.0,
        _ => false,
    };
    if !missing {
        return value.clone();
    }
    let now = clock.now_epoch_ms();
    match fill_value {
        "current_date" => Scalar::Date(now - now.rem_euclid(86_400_000)),
        "current_datetime" => Scalar::Date(now),
        "current_timestamp" => Scalar::Int(now),
        literal => parse_cell(literal),
    }
}

fn flag_missing(value: &Scalar, flag: &str, position: FlagPosition) -> Scalar {
    if !value.is_missing() {
        return value.clone();
    }
    let base = to_text(value);
    let flagged = match position {
        FlagPosition::Prefix => format!("{flag}{base}"),
        FlagPosition::Suffix => format!("{base}{flag}"),
        FlagPosition::Replace => flag.to_string(),
    };
    Scalar::Str(flagged)
}

fn cast_branch(literal: &str, ty: BranchType) -> CellResult<Scalar> {
    match ty {
        BranchType::String => Ok(Scalar::Str(literal.to_string())),
        BranchType::Number => Ok(Scalar::Float(to_number(&Scalar::Str(literal.to_string())))),
        BranchType::Date => to_epoch_ms(&Scalar::Str(literal.to_string())).map(Scalar::Date),
        BranchType::Boolean => Ok(Scalar::Bool(matches!(
            literal.trim().to_ascii_lowercase().as_str(),
            "true" | "t" | "yes" | "y" | "1"
        ))),
    }
}

/// One executed step's record inside a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub step_id: String,
    pub kind: &'static str,
    pub input: Scalar,
    pub output: Scalar,
    pub error: Option<CellError>,
}

impl StepOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// A completed pipeline run: the final value, the per-step trail, and
/// whether an `exclude_if_null` step fired.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub value: Scalar,
    pub steps: Vec<StepOutcome>,
    pub exclude_row: bool,
}

impl PipelineRun {
    pub fn success(&self) -> bool {
        self.steps.iter().all(StepOutcome::succeeded)
    }
}

/// Runs a pipeline over a single value. Step failures propagate the
/// pre-step value; `ExcludeRow` stops the chain and marks the run.
pub fn run_pipeline(
    value: Scalar,
    pipeline: &TransformPipeline,
    ctx: &StepContext<'_>,
) -> PipelineRun {
    let mut current = value;
    let mut outcomes = Vec::with_capacity(pipeline.steps.len());
    for step in pipeline.ordered_steps() {
        match execute_step(&current, step, ctx) {
            Ok(next) => {
                outcomes.push(StepOutcome {
                    step_id: step.id.clone(),
                    kind: step.kind.name(),
                    input: current.clone(),
                    output: next.clone(),
                    error: None,
                });
                current = next;
            }
            Err(CellError::ExcludeRow) => {
                outcomes.push(StepOutcome {
                    step_id: step.id.clone(),
                    kind: step.kind.name(),
                    input: current.clone(),
                    output: current.clone(),
                    error: Some(CellError::ExcludeRow),
                });
                return PipelineRun {
                    value: current,
                    steps: outcomes,
                    exclude_row: true,
                };
            }
            Err(err) => {
                outcomes.push(StepOutcome {
                    step_id: step.id.clone(),
                    kind: step.kind.name(),
                    input: current.clone(),
                    output: current.clone(),
                    error: Some(err),
                });
            }
        }
    }
    PipelineRun {
        value: current,
        steps: outcomes,
        exclude_row: false,
    }
}

/// Runs a pipeline purely for inspection, returning the step trail.
pub fn preview_pipeline(
    value: Scalar,
    pipeline: &TransformPipeline,
    ctx: &StepContext<'_>,
) -> Vec<StepOutcome> {
    run_pipeline(value, pipeline, ctx).steps
}
