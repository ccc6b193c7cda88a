use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::series::{AssetVector, CovarianceMatrix, PriceTable, ReturnSeries};
use super::{canonical_universe, MarketDataProvider};
use crate::error::SharpeQpError;
use crate::types::{AssetId, Rate};
use crate::SharpeQpResult;

/// Market data held entirely in memory.
#[derive(Debug, Clone)]
pub struct InMemoryMarketData {
    universe: Vec<AssetId>,
    returns: ReturnSeries,
    alpha: AssetVector,
    volatility: AssetVector,
    covariance: CovarianceMatrix,
}

impl InMemoryMarketData {
    /// Build from an explicit alpha signal and covariance matrix.
    ///
    /// The universe is the covariance matrix's asset list, which must already
    /// be in canonical (sorted, unique) order. Volatility is read off the
    /// diagonal; the return series is empty.
    pub fn new(alpha: AssetVector, covariance: CovarianceMatrix) -> SharpeQpResult<Self> {
        let universe = covariance.assets().to_vec();
        if canonical_universe(universe.clone()) != universe {
            return Err(SharpeQpError::InvalidInput {
                field: "covariance_matrix.assets".into(),
                reason: "Assets must be sorted and unique".into(),
            });
        }
        let volatility = universe
            .iter()
            .enumerate()
            .map(|(i, a)| (a.clone(), covariance.get(i, i).max(0.0).sqrt()))
            .collect();

        Ok(Self {
            universe,
            returns: ReturnSeries::default(),
            alpha,
            volatility,
            covariance,
        })
    }

    /// Derive every view from a price history.
    ///
    /// Alpha is the mean return per asset plus uniform noise scaled by the
    /// risk-free rate, standing in for a real alpha model. The noise comes
    /// from a generator seeded with `seed`, so identical inputs give
    /// identical snapshots. Every universe member needs a price column;
    /// extra columns are dropped.
    pub fn from_prices(
        universe: Vec<AssetId>,
        prices: &PriceTable,
        seed: u64,
        risk_free_rate: Rate,
    ) -> SharpeQpResult<Self> {
        let universe = canonical_universe(universe);
        let missing: Vec<&str> = universe
            .iter()
            .filter(|a| !prices.assets().contains(a))
            .map(|a| a.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(SharpeQpError::InsufficientData(format!(
                "No price history for universe members: {}",
                missing.join(", ")
            )));
        }
        let prices = prices.restrict_to(&universe);
        if prices.assets().is_empty() {
            return Err(SharpeQpError::InsufficientData(
                "No price columns match the universe".into(),
            ));
        }

        let returns = ReturnSeries::from_prices(&prices);
        let mean_returns = returns.mean_returns()?;
        let volatility = returns.volatility()?;
        let covariance = returns.covariance()?;

        let mut rng = StdRng::seed_from_u64(seed);
        let alpha = mean_returns
            .into_iter()
            .map(|(asset, mean)| {
                let noise: f64 = rng.gen();
                (asset, mean + noise * risk_free_rate)
            })
            .collect();

        Ok(Self {
            universe,
            returns,
            alpha,
            volatility,
            covariance,
        })
    }
}

impl MarketDataProvider for InMemoryMarketData {
    fn universe(&self) -> &[AssetId] {
        &self.universe
    }

    fn returns(&self) -> &ReturnSeries {
        &self.returns
    }

    fn alpha(&self) -> &AssetVector {
        &self.alpha
    }

    fn volatility(&self) -> &AssetVector {
        &self.volatility
    }

    fn covariance(&self) -> &CovarianceMatrix {
        &self.covariance
    }
}

// ---------------------------------------------------------------------------
// Serialized snapshot
// ---------------------------------------------------------------------------

/// JSON form of a market snapshot: explicit alpha and covariance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshotInput {
    /// Asset identifiers; sorted into canonical order on load.
    pub assets: Vec<AssetId>,
    /// Expected excess return per asset, same order as `assets`.
    pub alpha: Vec<f64>,
    /// N x N covariance matrix, same order as `assets`.
    pub covariance_matrix: Vec<Vec<f64>>,
}

impl MarketSnapshotInput {
    pub fn into_provider(self) -> SharpeQpResult<InMemoryMarketData> {
        let n = self.assets.len();
        if self.alpha.len() != n {
            return Err(SharpeQpError::InvalidInput {
                field: "alpha".into(),
                reason: format!("Expected {} values but got {}", n, self.alpha.len()),
            });
        }
        if self.covariance_matrix.len() != n
            || self.covariance_matrix.iter().any(|row| row.len() != n)
        {
            return Err(SharpeQpError::InvalidInput {
                field: "covariance_matrix".into(),
                reason: format!("Expected a {}x{} matrix", n, n),
            });
        }

        // Permute everything into canonical asset order.
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|a, b| self.assets[*a].cmp(&self.assets[*b]));
        let assets: Vec<AssetId> = order.iter().map(|i| self.assets[*i].clone()).collect();
        if canonical_universe(assets.clone()).len() != n {
            return Err(SharpeQpError::InvalidInput {
                field: "assets".into(),
                reason: "Duplicate asset identifiers".into(),
            });
        }
        let rows = order
            .iter()
            .map(|i| order.iter().map(|j| self.covariance_matrix[*i][*j]).collect())
            .collect();
        let alpha = order
            .iter()
            .map(|i| (self.assets[*i].clone(), self.alpha[*i]))
            .collect();

        InMemoryMarketData::new(alpha, CovarianceMatrix::new(assets, rows)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn prices() -> PriceTable {
        let dates = (1..=5)
            .map(|d| NaiveDate::from_ymd_opt(2022, 8, d).unwrap())
            .collect();
        PriceTable::new(
            dates,
            vec!["A".into(), "B".into(), "Z".into()],
            vec![
                vec![Some(10.0), Some(20.0), Some(5.0)],
                vec![Some(10.5), Some(19.0), Some(5.1)],
                vec![Some(10.2), Some(19.5), Some(5.0)],
                vec![Some(10.8), Some(19.9), Some(5.2)],
                vec![Some(11.0), Some(20.4), Some(5.1)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_from_prices_restricts_to_universe() {
        let md =
            InMemoryMarketData::from_prices(vec!["B".into(), "A".into()], &prices(), 1, 0.0)
                .unwrap();
        assert_eq!(md.universe(), &["A".to_string(), "B".to_string()]);
        assert_eq!(md.covariance().len(), 2);
        assert_eq!(md.alpha().len(), 2);
    }

    #[test]
    fn test_universe_member_without_prices_rejected() {
        let err = InMemoryMarketData::from_prices(vec!["A".into(), "Q".into()], &prices(), 1, 0.0)
            .unwrap_err();
        assert!(matches!(err, SharpeQpError::InsufficientData(_)));
        assert!(err.to_string().contains("Q"));
    }

    #[test]
    fn test_same_seed_same_alpha() {
        let universe = vec!["A".to_string(), "B".to_string(), "Z".to_string()];
        let a = InMemoryMarketData::from_prices(universe.clone(), &prices(), 7, 0.03 / 250.0)
            .unwrap();
        let b = InMemoryMarketData::from_prices(universe.clone(), &prices(), 7, 0.03 / 250.0)
            .unwrap();
        let c = InMemoryMarketData::from_prices(universe, &prices(), 8, 0.03 / 250.0).unwrap();
        assert_eq!(a.alpha(), b.alpha());
        assert_ne!(a.alpha(), c.alpha());
    }

    #[test]
    fn test_alpha_noise_bounded_by_risk_free() {
        let rf = 0.03 / 250.0;
        let md = InMemoryMarketData::from_prices(
            vec!["A".into(), "B".into(), "Z".into()],
            &prices(),
            1,
            rf,
        )
        .unwrap();
        let means = md.returns().mean_returns().unwrap();
        for (asset, alpha) in md.alpha() {
            let noise = alpha - means[asset];
            assert!((0.0..rf).contains(&noise), "{} noise {}", asset, noise);
        }
    }

    #[test]
    fn test_snapshot_input_sorted() {
        let input = MarketSnapshotInput {
            assets: vec!["B".into(), "A".into()],
            alpha: vec![0.002, 0.001],
            covariance_matrix: vec![vec![0.09, 0.01], vec![0.01, 0.04]],
        };
        let md = input.into_provider().unwrap();
        assert_eq!(md.universe(), &["A".to_string(), "B".to_string()]);
        assert_eq!(md.alpha()["A"], 0.001);
        assert_eq!(md.covariance().get(0, 0), 0.04);
        assert_eq!(md.covariance().get(0, 1), 0.01);
        assert!((md.volatility()["B"] - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_snapshot_input_dimension_mismatch() {
        let input = MarketSnapshotInput {
            assets: vec!["A".into(), "B".into()],
            alpha: vec![0.001],
            covariance_matrix: vec![vec![0.04, 0.0], vec![0.0, 0.09]],
        };
        assert!(input.into_provider().is_err());
    }
}
