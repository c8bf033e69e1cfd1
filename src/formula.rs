//! Virtual fields: computed columns evaluated before transformation.
//!
//! A [`VirtualField`] names an ordered list of field references and an
//! operation tape one shorter than the list. Evaluation folds left over the
//! referenced values. Fields may reference other virtual fields; the
//! [`VirtualFieldPlan`] orders them so dependencies are always evaluated
//! first, and quarantines unresolvable cycles so the row still survives with
//! a definite error instead of a stack blow-up.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{
    data::{Scalar, format_epoch_ms, to_epoch_ms, to_number, to_text},
    error::{CellError, CellResult},
    row::Row,
};

const DAY_MS: i64 = 86_400_000;

/// Declared result type of a virtual field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    Number,
    String,
    Date,
    Boolean,
}

/// Operations applied between consecutive field references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormulaOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Abs,
    Negate,
    Concat,
    DateDiff,
    /// Reserved by the format; evaluation reports it as unsupported.
    Conditional,
}

impl FormulaOp {
    /// Unary operations consume only the accumulator and ignore the paired
    /// field slot.
    pub fn is_unary(&self) -> bool {
        matches!(self, FormulaOp::Abs | FormulaOp::Negate)
    }
}

/// A reference to either a physical row column or another virtual field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRef {
    pub name: String,
    #[serde(default, rename = "virtual")]
    pub is_virtual: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualField {
    pub name: String,
    #[serde(default)]
    pub data_type: FieldType,
    pub fields: Vec<FieldRef>,
    #[serde(default)]
    pub operations: Vec<FormulaOp>,
}

impl VirtualField {
    /// Parses the `NAME=COLUMN` CLI shorthand into a single-column identity
    /// reference. Structured definitions with operation tapes come from the
    /// config document; this form only aliases an existing physical column.
    pub fn parse_shorthand(spec: &str) -> Result<Self, String> {
        let mut parts = spec.splitn(2, '=');
        let name = parts
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "virtual field shorthand is missing a name".to_string())?;
        let column = parts
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| format!("virtual field '{name}' is missing a source column"))?;
        Ok(VirtualField {
            name: name.to_string(),
            data_type: FieldType::String,
            fields: vec![FieldRef {
                name: column.to_string(),
                is_virtual: false,
            }],
            operations: Vec::new(),
        })
    }

    /// A single field with no operations is an identity reference; otherwise
    /// the tape must be exactly one shorter than the field list.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("virtual field has an empty name".to_string());
        }
        if self.fields.is_empty() {
            return Err(format!("virtual field '{}' references no fields", self.name));
        }
        let expected = self.fields.len().saturating_sub(1);
        if self.operations.len() != expected {
            return Err(format!(
                "virtual field '{}' declares {} operation(s) for {} field(s); expected {}",
                self.name,
                self.operations.len(),
                self.fields.len(),
                expected
            ));
        }
        Ok(())
    }

    fn virtual_deps(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.is_virtual)
            .map(|f| f.name.as_str())
    }

    /// Evaluates the formula against a row whose virtual dependencies have
    /// already been injected as columns.
    pub fn evaluate(&self, row: &Row) -> CellResult<Scalar> {
        let mut values = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let value = row
                .get(&field.name)
                .cloned()
                .ok_or_else(|| CellError::MissingField(field.name.clone()))?;
            values.push(value);
        }

        let mut accum = values[0].clone();
        for (op, next) in self.operations.iter().zip(values.iter().skip(1)) {
            accum = apply_op(*op, &accum, next)?;
        }
        Ok(cast_result(accum, self.data_type))
    }
}

fn apply_op(op: FormulaOp, left: &Scalar, right: &Scalar) -> CellResult<Scalar> {
    match op {
        FormulaOp::Add => numeric(left, right, |a, b| a + b),
        FormulaOp::Subtract => numeric(left, right, |a, b| a - b),
        FormulaOp::Multiply => numeric(left, right, |a, b| a * b),
        FormulaOp::Divide => {
            let divisor = to_number(right);
            if divisor == 0.0 {
                return Err(CellError::DivisionByZero);
            }
            numeric(left, right, |a, b| a / b)
        }
        FormulaOp::Abs => Ok(Scalar::Float(to_number(left).abs())),
        FormulaOp::Negate => Ok(Scalar::Float(-to_number(left))),
        FormulaOp::Concat => Ok(Scalar::Str(format!("{}{}", to_text(left), to_text(right)))),
        FormulaOp::DateDiff => {
            let l = to_epoch_ms(left)?;
            let r = to_epoch_ms(right)?;
            Ok(Scalar::Int((l - r).div_euclid(DAY_MS)))
        }
        FormulaOp::Conditional => Err(CellError::TypeError(
            "conditional virtual-field operation is reserved".to_string(),
        )),
    }
}

fn numeric(left: &Scalar, right: &Scalar, f: impl Fn(f64, f64) -> f64) -> CellResult<Scalar> {
    let result = f(to_number(left), to_number(right));
    if result.is_finite() {
        Ok(Scalar::Float(result))
    } else {
        Err(CellError::NonFinite)
    }
}

fn cast_result(value: Scalar, ty: FieldType) -> Scalar {
    match ty {
        FieldType::Number => match value {
            Scalar::Int(_) | Scalar::Float(_) => value,
            other => Scalar::Float(to_number(&other)),
        },
        FieldType::String => match value {
            Scalar::Str(_) => value,
            Scalar::Date(ms) => Scalar::Str(format_epoch_ms(ms)),
            other => Scalar::Str(to_text(&other)),
        },
        FieldType::Date => match to_epoch_ms(&value) {
            Ok(ms) => Scalar::Date(ms),
            Err(_) => value,
        },
        FieldType::Boolean => match value {
            Scalar::Bool(_) => value,
            other => Scalar::Bool(to_number(&other) != 0.0),
        },
    }
}

/// Note attached to a row when a virtual field could not be computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldNote {
    pub field: String,
    pub error: CellError,
}

/// Dependency-ordered evaluation plan for one side's virtual fields.
#[derive(Debug, Clone, Default)]
pub struct VirtualFieldPlan {
    ordered: Vec<VirtualField>,
    cyclic: HashSet<String>,
}

impl VirtualFieldPlan {
    /// Orders fields so every virtual dependency precedes its dependents.
    /// Members of unresolvable cycles are placed last and flagged; they
    /// evaluate to a definite `MissingField` error instead of recursing.
    pub fn build(fields: &[VirtualField]) -> Result<Self, String> {
        for field in fields {
            field.validate()?;
        }

        let mut remaining: Vec<VirtualField> = fields.to_vec();
        let mut placed: HashSet<String> = HashSet::new();
        let mut ordered = Vec::with_capacity(fields.len());

        loop {
            let mut progressed = false;
            let mut next_round = Vec::new();
            for field in remaining {
                let ready = field.virtual_deps().all(|dep| placed.contains(dep));
                if ready {
                    placed.insert(field.name.clone());
                    ordered.push(field);
                    progressed = true;
                } else {
                    next_round.push(field);
                }
            }
            remaining = next_round;
            if remaining.is_empty() {
                return Ok(VirtualFieldPlan {
                    ordered,
                    cyclic: HashSet::new(),
                });
            }
            if !progressed {
                break;
            }
        }

        let cyclic: HashSet<String> = remaining.iter().map(|f| f.name.clone()).collect();
        ordered.extend(remaining);
        Ok(VirtualFieldPlan { ordered, cyclic })
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn has_cycles(&self) -> bool {
        !self.cyclic.is_empty()
    }

    pub fn cyclic_fields(&self) -> impl Iterator<Item = &str> {
        self.cyclic.iter().map(String::as_str)
    }

    /// Evaluates all fields in dependency order, injecting each result as a
    /// named column for subsequent fields. Failed fields leave a null column
    /// and a note; the row always survives.
    pub fn apply(&self, row: &mut Row) -> Vec<FieldNote> {
        let mut notes = Vec::new();
        for field in &self.ordered {
            let outcome = if self.cyclic.contains(&field.name) {
                Err(CellError::MissingField(field.name.clone()))
            } else {
                field.evaluate(row)
            };
            match outcome {
                Ok(value) => row.insert(field.name.clone(), value),
                Err(error) => {
                    row.insert(field.name.clone(), Scalar::Null);
                    notes.push(FieldNote {
                        field: field.name.clone(),
                        error,
                    });
                }
            }
        }
        notes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, refs: &[(&str, bool)], ops: &[FormulaOp]) -> VirtualField {
        VirtualField {
            name: name.to_string(),
            data_type: FieldType::Number,
            fields: refs
                .iter()
                .map(|(n, v)| FieldRef {
                    name: n.to_string(),
                    is_virtual: *v,
                })
                .collect(),
            operations: ops.to_vec(),
        }
    }

    fn row(pairs: &[(&str, Scalar)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn fold_left_applies_operation_tape() {
        let f = field(
            "total",
            &[("a", false), ("b", false), ("c", false)],
            &[FormulaOp::Add, FormulaOp::Multiply],
        );
        let r = row(&[
            ("a", Scalar::Int(2)),
            ("b", Scalar::Int(3)),
            ("c", Scalar::Int(4)),
        ]);
        assert_eq!(f.evaluate(&r).unwrap(), Scalar::Float(20.0));
    }

    #[test]
    fn single_field_is_identity() {
        let f = field("alias", &[("a", false)], &[]);
        let r = row(&[("a", Scalar::Int(7))]);
        assert_eq!(f.evaluate(&r).unwrap(), Scalar::Int(7));
    }

    #[test]
    fn unary_ops_ignore_the_pairing_slot() {
        let f = field(
            "magnitude",
            &[("a", false), ("ignored", false)],
            &[FormulaOp::Abs],
        );
        let r = row(&[("a", Scalar::Int(-9)), ("ignored", Scalar::Int(999))]);
        assert_eq!(f.evaluate(&r).unwrap(), Scalar::Float(9.0));
    }

    #[test]
    fn divide_by_zero_is_an_error_not_nan() {
        let f = field("ratio", &[("a", false), ("b", false)], &[FormulaOp::Divide]);
        let r = row(&[("a", Scalar::Int(1)), ("b", Scalar::Int(0))]);
        assert_eq!(f.evaluate(&r), Err(CellError::DivisionByZero));
    }

    #[test]
    fn date_diff_floors_toward_negative_infinity() {
        let mut f = field(
            "age_days",
            &[("end", false), ("start", false)],
            &[FormulaOp::DateDiff],
        );
        f.data_type = FieldType::Number;
        let r = row(&[
            ("end", Scalar::Str("2024-01-10".into())),
            ("start", Scalar::Str("2024-01-01 12:00:00".into())),
        ]);
        // 8.5 days floors to 8; reversed it floors to -9.
        assert_eq!(f.evaluate(&r).unwrap(), Scalar::Int(8));
        let reversed = field(
            "neg",
            &[("start", false), ("end", false)],
            &[FormulaOp::DateDiff],
        );
        assert_eq!(reversed.evaluate(&r).unwrap(), Scalar::Int(-9));
    }

    #[test]
    fn concat_coerces_through_text() {
        let mut f = field(
            "label",
            &[("name", false), ("num", false)],
            &[FormulaOp::Concat],
        );
        f.data_type = FieldType::String;
        let r = row(&[
            ("name", Scalar::Str("inv-".into())),
            ("num", Scalar::Int(42)),
        ]);
        assert_eq!(f.evaluate(&r).unwrap(), Scalar::Str("inv-42".into()));
    }

    #[test]
    fn plan_orders_dependencies_regardless_of_declaration_order() {
        let a = field("A", &[("X", false), ("Y", false)], &[FormulaOp::Add]);
        let b = field("B", &[("A", true), ("two", false)], &[FormulaOp::Multiply]);

        for declaration in [vec![a.clone(), b.clone()], vec![b.clone(), a.clone()]] {
            let plan = VirtualFieldPlan::build(&declaration).unwrap();
            let mut r = row(&[
                ("X", Scalar::Int(3)),
                ("Y", Scalar::Int(4)),
                ("two", Scalar::Int(2)),
            ]);
            let notes = plan.apply(&mut r);
            assert!(notes.is_empty());
            assert_eq!(r.get("A"), Some(&Scalar::Float(7.0)));
            assert_eq!(r.get("B"), Some(&Scalar::Float(14.0)));
        }
    }

    #[test]
    fn cycles_are_quarantined_with_definite_errors() {
        let a = field("A", &[("B", true)], &[]);
        let b = field("B", &[("A", true)], &[]);
        let standalone = field("C", &[("X", false)], &[]);
        let plan = VirtualFieldPlan::build(&[a, b, standalone]).unwrap();
        assert!(plan.has_cycles());

        let mut r = row(&[("X", Scalar::Int(1))]);
        let notes = plan.apply(&mut r);
        assert_eq!(r.get("C"), Some(&Scalar::Int(1)));
        assert_eq!(r.get("A"), Some(&Scalar::Null));
        assert_eq!(r.get("B"), Some(&Scalar::Null));
        assert_eq!(notes.len(), 2);
        assert!(matches!(notes[0].error, CellError::MissingField(_)));
    }

    #[test]
    fn validate_enforces_tape_length() {
        let bad = field("bad", &[("a", false), ("b", false)], &[]);
        assert!(bad.validate().is_err());
        let empty = field("empty", &[], &[]);
        assert!(empty.validate().is_err());
    }

    #[test]
    fn shorthand_parses_identity_aliases() {
        let vf = VirtualField::parse_shorthand("RefKey = Ref No").unwrap();
        assert_eq!(vf.name, "RefKey");
        assert_eq!(vf.fields.len(), 1);
        assert_eq!(vf.fields[0].name, "Ref No");
        assert!(!vf.fields[0].is_virtual);
        assert!(vf.operations.is_empty());
        assert!(vf.validate().is_ok());

        let r = row(&[("Ref No", Scalar::Str("A1".into()))]);
        assert_eq!(vf.evaluate(&r).unwrap(), Scalar::Str("A1".into()));
    }

    #[test]
    fn shorthand_rejects_missing_name_or_column() {
        assert!(VirtualField::parse_shorthand("justname").is_err());
        assert!(VirtualField::parse_shorthand("=col").is_err());
        assert!(VirtualField::parse_shorthand("name=  ").is_err());
    }
}
