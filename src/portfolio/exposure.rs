//! Notional exposure per contract.

use crate::utils::error::{Error, Result};
use crate::utils::types::{IdealPositions, Instrument, PositionVector};

/// Dollar value controlled by one contract.
#[inline]
pub fn notional_exposure_per_contract(price: f64, multiplier: f64) -> f64 {
    price * multiplier
}

/// Exposure for every instrument of `universe`, in universe order.
///
/// Fails with `MissingInstrumentData` when a price or multiplier is absent
/// (or not a finite number) for any instrument of the universe.
pub fn notional_exposures(
    universe: &[String], prices: &PositionVector<f64>, multipliers: &PositionVector<f64>,
) -> Result<IdealPositions> {
    let mut pairs = Vec::with_capacity(universe.len());
    for symbol in universe {
        let price = prices.get(symbol).filter(|p| p.is_finite());
        let price = price.ok_or_else(|| Error::missing(symbol, "price"))?;
        let multiplier = multipliers.get(symbol).filter(|m| m.is_finite());
        let multiplier = multiplier.ok_or_else(|| Error::missing(symbol, "multiplier"))?;
        pairs.push((symbol.clone(), notional_exposure_per_contract(price, multiplier)));
    }
    PositionVector::from_pairs(pairs)
}

/// Exposures straight from a built universe.
pub fn exposures_for(instruments: &[Instrument]) -> Result<IdealPositions> {
    PositionVector::from_pairs(
        instruments
            .iter()
            .map(|i| (i.symbol.clone(), notional_exposure_per_contract(i.price, i.multiplier))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn universe() -> Vec<String> {
        vec!["ES".into(), "ZF".into(), "ZN".into()]
    }

    #[test]
    fn test_single_exposure() {
        assert_eq!(notional_exposure_per_contract(100.0, 50.0), 5000.0);
    }

    #[test]
    fn test_batch_exposures() {
        let prices = PositionVector::from_pairs(vec![("ES", 100.0), ("ZF", 150.0), ("ZN", 50.0)])
            .unwrap();
        let multipliers =
            PositionVector::from_pairs(vec![("ZN", 1000.0), ("ES", 50.0), ("ZF", 1000.0)]).unwrap();
        let exposures = notional_exposures(&universe(), &prices, &multipliers).unwrap();
        assert_eq!(exposures.values(), &[5000.0, 150_000.0, 50_000.0]);
    }

    #[test]
    fn test_missing_inputs() {
        let prices = PositionVector::from_pairs(vec![("ES", 100.0), ("ZF", 150.0)]).unwrap();
        let multipliers =
            PositionVector::from_pairs(vec![("ES", 50.0), ("ZF", 1000.0), ("ZN", 1000.0)]).unwrap();
        assert_matches!(
            notional_exposures(&universe(), &prices, &multipliers),
            Err(Error::MissingInstrumentData { instrument, field: "price" }) if instrument == "ZN"
        );

        let prices = PositionVector::from_pairs(vec![("ES", 100.0), ("ZF", 150.0), ("ZN", 50.0)])
            .unwrap();
        let multipliers = PositionVector::from_pairs(vec![("ES", 50.0), ("ZN", 1000.0)]).unwrap();
        assert_matches!(
            notional_exposures(&universe(), &prices, &multipliers),
            Err(Error::MissingInstrumentData { field: "multiplier", .. })
        );
    }

    #[test]
    fn test_exposures_for_instruments() {
        let es = Instrument::new("ES", 50.0, 4000.0);
        let exposures = exposures_for(&[es]).unwrap();
        assert_eq!(exposures.get("ES"), Some(200_000.0));
    }
}
