//! The `conditional` step's restricted condition language.
//!
//! Conditions are evaluated with `evalexpr` against a context holding exactly
//! one bound variable, `value`, plus a fixed helper set. The grammar is
//! closed by construction: literals, comparisons, logical connectives, and
//! calls to the registered helpers resolve; any other identifier is an
//! evaluation error, so host-language code can never run.

use evalexpr::{
    ContextWithMutableFunctions, ContextWithMutableVariables, EvalexprError, Function,
    HashMapContext, Value as EvalValue, eval_with_context,
};

use crate::{
    data::{Scalar, format_epoch_ms},
    error::{CellError, CellResult},
};

/// Evaluates a condition against a single cell value, truthily.
pub fn evaluate_condition(condition: &str, value: &Scalar) -> CellResult<bool> {
    let context = build_condition_context(value)
        .map_err(|err| CellError::TypeError(format!("condition setup: {err}")))?;
    let result = eval_with_context(condition, &context)
        .map_err(|err| CellError::TypeError(format!("condition '{condition}': {err}")))?;
    Ok(truthy(result))
}

fn truthy(value: EvalValue) -> bool {
    match value {
        EvalValue::Boolean(b) => b,
        EvalValue::Int(i) => i != 0,
        EvalValue::Float(f) => f != 0.0,
        EvalValue::String(s) => !s.is_empty(),
        EvalValue::Tuple(values) => values.into_iter().any(truthy),
        EvalValue::Empty => false,
    }
}

fn scalar_to_eval(value: &Scalar) -> EvalValue {
    match value {
        Scalar::Null => EvalValue::Empty,
        Scalar::Bool(b) => EvalValue::Boolean(*b),
        Scalar::Int(i) => EvalValue::Int(*i),
        Scalar::Float(f) => EvalValue::Float(*f),
        Scalar::Str(s) => EvalValue::String(s.clone()),
        Scalar::Date(ms) => EvalValue::String(format_epoch_ms(*ms)),
    }
}

fn build_condition_context(value: &Scalar) -> Result<HashMapContext, EvalexprError> {
    let mut context = HashMapContext::new();
    context.set_value("value".to_string(), scalar_to_eval(value))?;
    register_helpers(&mut context)?;
    Ok(context)
}

fn register_helpers(context: &mut HashMapContext) -> Result<(), EvalexprError> {
    context.set_function(
        "isNull".into(),
        Function::new(|arguments| {
            let args = expect_args(arguments, 1, "isNull")?;
            Ok(EvalValue::Boolean(matches!(args[0], EvalValue::Empty)))
        }),
    )?;

    context.set_function(
        "isEmpty".into(),
        Function::new(|arguments| {
            let args = expect_args(arguments, 1, "isEmpty")?;
            let empty = match &args[0] {
                EvalValue::Empty => true,
                EvalValue::String(s) => s.trim().is_empty(),
                _ => false,
            };
            Ok(EvalValue::Boolean(empty))
        }),
    )?;

    context.set_function(
        "isNumber".into(),
        Function::new(|arguments| {
            let args = expect_args(arguments, 1, "isNumber")?;
            Ok(EvalValue::Boolean(matches!(
                args[0],
                EvalValue::Int(_) | EvalValue::Float(_)
            )))
        }),
    )?;

    context.set_function(
        "isString".into(),
        Function::new(|arguments| {
            let args = expect_args(arguments, 1, "isString")?;
            Ok(EvalValue::Boolean(matches!(args[0], EvalValue::String(_))))
        }),
    )?;

    context.set_function(
        "contains".into(),
        Function::new(|arguments| {
            let args = expect_args(arguments, 2, "contains")?;
            let haystack = expect_string(&args[0], "value")?;
            let needle = expect_string(&args[1], "needle")?;
            Ok(EvalValue::Boolean(haystack.contains(needle)))
        }),
    )?;

    context.set_function(
        "startsWith".into(),
        Function::new(|arguments| {
            let args = expect_args(arguments, 2, "startsWith")?;
            let haystack = expect_string(&args[0], "value")?;
            let prefix = expect_string(&args[1], "prefix")?;
            Ok(EvalValue::Boolean(haystack.starts_with(prefix)))
        }),
    )?;

    context.set_function(
        "endsWith".into(),
        Function::new(|arguments| {
            let args = expect_args(arguments, 2, "endsWith")?;
            let haystack = expect_string(&args[0], "value")?;
            let suffix = expect_string(&args[1], "suffix")?;
            Ok(EvalValue::Boolean(haystack.ends_with(suffix)))
        }),
    )?;

    context.set_function(
        "abs".into(),
        Function::new(|arguments| {
            let args = expect_args(arguments, 1, "abs")?;
            match &args[0] {
                EvalValue::Int(i) => Ok(EvalValue::Int(i.abs())),
                EvalValue::Float(f) => Ok(EvalValue::Float(f.abs())),
                other => Err(eval_error(&format!("abs expects a number, got {other:?}"))),
            }
        }),
    )?;

    context.set_function(
        "length".into(),
        Function::new(|arguments| {
            let args = expect_args(arguments, 1, "length")?;
            match &args[0] {
                EvalValue::String(s) => Ok(EvalValue::Int(s.chars().count() as i64)),
                EvalValue::Empty => Ok(EvalValue::Int(0)),
                other => Err(eval_error(&format!(
                    "length expects a string, got {other:?}"
                ))),
            }
        }),
    )?;

    Ok(())
}

fn expect_args(
    arguments: &EvalValue,
    expected: usize,
    name: &str,
) -> Result<Vec<EvalValue>, EvalexprError> {
    match arguments {
        EvalValue::Empty if expected == 0 => Ok(Vec::new()),
        value if expected == 1 && !matches!(value, EvalValue::Tuple(_)) => Ok(vec![value.clone()]),
        EvalValue::Tuple(values) => {
            if values.len() != expected {
                return Err(EvalexprError::wrong_function_argument_amount(
                    values.len(),
                    expected,
                ));
            }
            Ok(values.clone())
        }
        _ => Err(eval_error(&format!(
            "{name} expects {expected} argument(s) provided as a tuple"
        ))),
    }
}

fn expect_string<'a>(value: &'a EvalValue, name: &str) -> Result<&'a str, EvalexprError> {
    if let EvalValue::String(s) = value {
        Ok(s)
    } else {
        Err(eval_error(&format!("Expected string for {name}")))
    }
}

fn eval_error(message: &str) -> EvalexprError {
    EvalexprError::CustomMessage(message.to_string())
}
