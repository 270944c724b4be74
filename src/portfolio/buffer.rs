//! No-trade buffer around the held position.

use crate::utils::error::{Error, Result};
use crate::utils::types::{round_contracts, Book, IdealPositions};

/// Band `[held * (1 - f), held * (1 + f)]`, ordered so it also works for shorts.
pub fn buffer_band(held: i64, buffer_fraction: f64) -> (f64, f64) {
    let h = held as f64;
    let a = h * (1.0 - buffer_fraction);
    let b = h * (1.0 + buffer_fraction);
    (a.min(b), a.max(b))
}

/// Held position when `target` is inside the band, otherwise the rounded target.
///
/// With nothing held the band collapses to `[0, 0]`, so any nonzero target trades.
pub fn buffered_position(target: f64, held: i64, buffer_fraction: f64) -> i64 {
    let (lower, upper) = buffer_band(held, buffer_fraction);
    if lower <= target && target <= upper {
        held
    } else {
        round_contracts(target)
    }
}

/// Apply the buffer per instrument. `held` must cover exactly the target's instruments.
pub fn buffered_positions(
    targets: &IdealPositions, held: &Book, buffer_fraction: f64,
) -> Result<Book> {
    if !(buffer_fraction.is_finite() && buffer_fraction >= 0.0) {
        return Err(Error::ConfigError(format!(
            "buffer_fraction must not be negative, got {buffer_fraction}"
        )));
    }
    let held = held.aligned_to(targets.symbols(), "held positions")?;
    targets.try_map(|symbol, target| {
        if !target.is_finite() {
            return Err(Error::NumericalError(format!("target for {symbol} is not finite")));
        }
        Ok(buffered_position(target, held.require(symbol, "held positions")?, buffer_fraction))
    })
}
