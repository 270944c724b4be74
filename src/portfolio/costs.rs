use crate::utils::error::{Error, Result};
use crate::utils::types::{IdealPositions, PositionVector};

/// Cost of trading one contract for every instrument of `universe`: the
/// default unless an override names the instrument. Overrides for symbols
/// outside the universe are ignored.
pub fn cost_estimates(
    universe: &[String], default_per_contract: f64, overrides: &[(String, f64)],
) -> Result<IdealPositions> {
    if !(default_per_contract.is_finite() && default_per_contract >= 0.0) {
        return Err(Error::ConfigError(format!(
            "cost per contract must not be negative, got {default_per_contract}"
        )));
    }
    PositionVector::from_pairs(universe.iter().map(|symbol| {
        let cost = overrides
            .iter()
            .find(|(s, _)| s.eq_ignore_ascii_case(symbol))
            .map_or(default_per_contract, |(_, c)| *c);
        (symbol.clone(), cost)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_win() {
        let universe = vec!["ES".to_string(), "ZN".to_string()];
        let costs =
            cost_estimates(&universe, 5.0, &[("zn".into(), 12.5), ("CL".into(), 1.0)]).unwrap();
        assert_eq!(costs.values(), &[5.0, 12.5]);
        assert!(cost_estimates(&universe, -1.0, &[]).is_err());
    }
}
