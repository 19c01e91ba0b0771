use crate::{Position, Side, SymbolInfo};
use std::fmt;

/// Convert a price distance into account money per 1.0 lot.
///
/// Prefers the venue's tick size / tick value. Falls back to the FX point-value
/// approximation (`contract_size * point / price_ref`) when tick data is absent.
/// Returns 0.0 when neither is usable.
pub fn risk_money_per_lot(price_diff: f64, info: &SymbolInfo, price_ref: f64) -> f64 {
    if info.tick_size > 0.0 && info.tick_value > 0.0 {
        return (price_diff / info.tick_size) * info.tick_value;
    }
    if info.point > 0.0 && price_ref > 0.0 {
        let point_value = info.contract_size * info.point / price_ref;
        return (price_diff / info.point) * point_value;
    }
    0.0
}

/// Why a target stop-loss could not be derived for a position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopLossError {
    InvalidEquity,
    InvalidOpenPrice,
    InvalidVolume,
    InvalidAllowance,
    MissingSymbolInfo,
    InsufficientSymbolData,
    InvalidDistance,
    NonPositiveLevel,
}

impl fmt::Display for StopLossError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopLossError::InvalidEquity => "invalid equity",
            StopLossError::InvalidOpenPrice => "invalid open price",
            StopLossError::InvalidVolume => "invalid volume",
            StopLossError::InvalidAllowance => "invalid risk allowance",
            StopLossError::MissingSymbolInfo => "symbol metadata unavailable",
            StopLossError::InsufficientSymbolData => "insufficient symbol data (tick/point)",
            StopLossError::InvalidDistance => "invalid price distance",
            StopLossError::NonPositiveLevel => "computed stop-loss is not positive",
        };
        f.write_str(s)
    }
}

impl std::error::Error for StopLossError {}

/// Stop-loss price that caps the position's loss at exactly `max_risk_pct` of
/// `equity`, rounded to the symbol's digits.
pub fn stop_loss_for_risk(
    pos: &Position,
    equity: f64,
    max_risk_pct: f64,
) -> Result<f64, StopLossError> {
    if !(equity > 0.0) {
        return Err(StopLossError::InvalidEquity);
    }
    if !(pos.open_price > 0.0) {
        return Err(StopLossError::InvalidOpenPrice);
    }
    if !(pos.volume > 0.0) {
        return Err(StopLossError::InvalidVolume);
    }
    let allowed = equity * max_risk_pct / 100.0;
    if !(allowed > 0.0) {
        return Err(StopLossError::InvalidAllowance);
    }
    let info = pos
        .symbol_info
        .as_ref()
        .ok_or(StopLossError::MissingSymbolInfo)?;

    let distance = if info.tick_size > 0.0 && info.tick_value > 0.0 {
        allowed / (info.tick_value * pos.volume) * info.tick_size
    } else {
        let price_ref = pos.current_price.unwrap_or(pos.open_price);
        if info.point <= 0.0 || info.contract_size <= 0.0 || price_ref <= 0.0 {
            return Err(StopLossError::InsufficientSymbolData);
        }
        let point_value = info.contract_size * info.point / price_ref;
        if !(point_value > 0.0) {
            return Err(StopLossError::InsufficientSymbolData);
        }
        allowed / (point_value * pos.volume) * info.point
    };
    if !(distance > 0.0) || !distance.is_finite() {
        return Err(StopLossError::InvalidDistance);
    }

    let raw = match pos.side {
        Side::Buy => pos.open_price - distance,
        Side::Sell => pos.open_price + distance,
    };
    let level = info.round_price(raw);
    if level <= 0.0 {
        return Err(StopLossError::NonPositiveLevel);
    }
    Ok(level)
}
