use crate::{
    error::{CellError, CellResult},
    rates::RateProvider,
};

/// Rounding behaviors for `round_number`. `Round` is half-away-from-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RoundingMode {
    #[default]
    Round,
    Ceil,
    Floor,
}

pub fn round_to(value: f64, decimal_places: u32, mode: RoundingMode) -> f64 {
    let factor = 10f64.powi(decimal_places as i32);
    let scaled = value * factor;
    let rounded = match mode {
        RoundingMode::Round => scaled.round(),
        RoundingMode::Ceil => scaled.ceil(),
        RoundingMode::Floor => scaled.floor(),
    };
    rounded / factor
}

pub fn scale(value: f64, factor: f64) -> CellResult<f64> {
    let result = value * factor;
    if result.is_finite() {
        Ok(result)
    } else {
        Err(CellError::NonFinite)
    }
}

/// Multiplies by an explicit rate, or one resolved through the injected
/// provider. Same-currency conversion is a no-op; an unknown pair is a
/// [`CellError::MissingRate`]. No implicit rounding is applied.
pub fn convert_currency(
    value: f64,
    from: &str,
    to: &str,
    explicit_rate: Option<f64>,
    rates: &dyn RateProvider,
) -> CellResult<f64> {
    if from.eq_ignore_ascii_case(to) {
        return Ok(value);
    }
    let rate = match explicit_rate {
        Some(rate) => rate,
        None => rates.rate(from, to).ok_or_else(|| CellError::MissingRate {
            from: from.to_string(),
            to: to.to_string(),
        })?,
    };
    let result = value * rate;
    if result.is_finite() {
        Ok(result)
    } else {
        Err(CellError::NonFinite)
    }
}
