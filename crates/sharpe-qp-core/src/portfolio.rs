use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::error::SharpeQpError;
use crate::market_data::{canonical_universe, AssetVector};
use crate::types::{AssetId, Money};
use crate::SharpeQpResult;

/// Positions worth less than this (in currency units, not weight) are zeroed
/// on construction. The optimizer may return tiny negative weights.
pub const DE_MINIMIS_VALUE: Money = dec!(0.01);

/// Capital, universe and per-asset market value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    capital: Money,
    universe: Vec<AssetId>,
    values: BTreeMap<AssetId, Money>,
}

impl Portfolio {
    /// Empty portfolio over `universe` (sorted and deduplicated here).
    pub fn new(initial_capital: Money, universe: Vec<AssetId>) -> SharpeQpResult<Self> {
        if initial_capital <= Decimal::ZERO {
            return Err(SharpeQpError::InvalidInput {
                field: "initial_capital".into(),
                reason: "Initial capital must be positive".into(),
            });
        }
        let universe = canonical_universe(universe);
        if universe.is_empty() {
            return Err(SharpeQpError::InsufficientData(
                "Portfolio universe is empty".into(),
            ));
        }
        Ok(Self {
            capital: initial_capital,
            universe,
            values: BTreeMap::new(),
        })
    }

    /// 1/N for every asset in the universe.
    pub fn equal_weights(&self) -> AssetVector {
        let w = 1.0 / self.universe.len() as f64;
        self.universe.iter().map(|a| (a.clone(), w)).collect()
    }

    /// Replace the holdings with `weight × capital` per asset.
    ///
    /// Assets outside the universe are ignored. Values below
    /// [`DE_MINIMIS_VALUE`] in magnitude become zero and everything is rounded
    /// to whole currency units (half to even). Never fails; degenerate
    /// weights simply give an all-zero portfolio.
    pub fn construct(&mut self, weights: &AssetVector) {
        let mut values = BTreeMap::new();
        for (asset, w) in weights {
            if self.universe.binary_search(asset).is_err() {
                continue;
            }
            let value = match Decimal::from_f64(*w).and_then(|w| w.checked_mul(self.capital)) {
                Some(value) => value,
                None => {
                    warn!(
                        asset = %asset,
                        weight = *w,
                        "Weight not representable as a value; treated as zero"
                    );
                    Decimal::ZERO
                }
            };
            let value = if value.abs() < DE_MINIMIS_VALUE {
                Decimal::ZERO
            } else {
                value
            };
            values.insert(asset.clone(), value.round_dp(0));
        }
        self.values = values;
    }

    pub fn universe(&self) -> &[AssetId] {
        &self.universe
    }

    pub fn capital(&self) -> Money {
        self.capital
    }

    pub fn value(&self) -> &BTreeMap<AssetId, Money> {
        &self.values
    }

    pub fn total_value(&self) -> Money {
        self.values.values().sum()
    }

    /// Value / total value for every universe asset, or `None` when the
    /// total is zero and weights are undefined.
    pub fn weight(&self) -> Option<AssetVector> {
        let total = self.total_value();
        if total.is_zero() {
            return None;
        }
        self.universe
            .iter()
            .map(|a| {
                let v = self.values.get(a).copied().unwrap_or(Decimal::ZERO);
                (v / total).to_f64().map(|w| (a.clone(), w))
            })
            .collect()
    }

    /// Weights as a dense vector in universe order.
    pub fn weight_vector(&self) -> Option<Vec<f64>> {
        self.weight().map(|w| w.into_values().collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn abc() -> Portfolio {
        Portfolio::new(dec!(1000000), vec!["C".into(), "A".into(), "B".into(), "A".into()])
            .unwrap()
    }

    #[test]
    fn test_universe_sorted_dedup() {
        let p = abc();
        assert_eq!(p.universe(), &["A".to_string(), "B".to_string(), "C".to_string()]);
    }

    #[test]
    fn test_rejects_non_positive_capital() {
        assert!(Portfolio::new(Decimal::ZERO, vec!["A".into()]).is_err());
        assert!(Portfolio::new(dec!(-5), vec!["A".into()]).is_err());
    }

    #[test]
    fn test_rejects_empty_universe() {
        assert!(Portfolio::new(dec!(100), vec![]).is_err());
    }

    #[test]
    fn test_equal_weight_values_rounded() {
        let mut p = abc();
        let w = p.equal_weights();
        p.construct(&w);
        assert_eq!(p.value()["A"], dec!(333333));
        assert_eq!(p.total_value(), dec!(999999));
    }

    #[test]
    fn test_de_minimis_zeroes_tiny_values() {
        let mut p = abc();
        let mut w = AssetVector::new();
        w.insert("A".into(), 0.5);
        w.insert("B".into(), 0.5);
        // 5e-9 * 1e6 = 0.005 currency units
        w.insert("C".into(), -5e-9);
        p.construct(&w);
        assert_eq!(p.value()["C"], Decimal::ZERO);
    }

    #[test]
    fn test_ignores_assets_outside_universe() {
        let mut p = abc();
        let mut w = AssetVector::new();
        w.insert("A".into(), 1.0);
        w.insert("ZZZ".into(), 1.0);
        p.construct(&w);
        assert_eq!(p.value().len(), 1);
        assert!(!p.value().contains_key("ZZZ"));
    }

    #[test]
    fn test_construct_replaces_state() {
        let mut p = abc();
        let w = p.equal_weights();
        p.construct(&w);
        let mut only_b = AssetVector::new();
        only_b.insert("B".into(), 1.0);
        p.construct(&only_b);
        assert_eq!(p.value().len(), 1);
        assert_eq!(p.value()["B"], dec!(1000000));
    }

    #[test]
    fn test_weight_undefined_when_empty() {
        let mut p = abc();
        assert!(p.weight().is_none());
        let mut zero = AssetVector::new();
        zero.insert("A".into(), 0.0);
        p.construct(&zero);
        assert!(p.weight().is_none());
    }

    #[test]
    fn test_weight_covers_universe() {
        let mut p = abc();
        let mut w = AssetVector::new();
        w.insert("A".into(), 0.25);
        w.insert("C".into(), 0.75);
        p.construct(&w);
        let weights = p.weight_vector().unwrap();
        assert_eq!(weights, vec![0.25, 0.0, 0.75]);
    }

    #[test]
    fn test_overflowing_value_zeroed() {
        let mut p = Portfolio::new(dec!(10000000), vec!["A".into(), "B".into()]).unwrap();
        let mut w = AssetVector::new();
        w.insert("A".into(), 1e22);
        w.insert("B".into(), 1.0 - 1e22);
        p.construct(&w);
        assert_eq!(p.value()["A"], Decimal::ZERO);
        assert_eq!(p.value()["B"], Decimal::ZERO);
        assert!(p.weight().is_none());
    }
}
