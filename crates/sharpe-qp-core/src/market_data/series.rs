use chrono::NaiveDate;
use nalgebra::DMatrix;
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

use crate::error::SharpeQpError;
use crate::types::AssetId;
use crate::SharpeQpResult;

/// Per-asset scalar keyed by ticker; iteration order is the universe order.
pub type AssetVector = BTreeMap<AssetId, f64>;

/// Relative tolerance used for the symmetry and eigenvalue checks.
const PSD_TOLERANCE: f64 = 1e-10;

// ---------------------------------------------------------------------------
// Price table
// ---------------------------------------------------------------------------

/// Date-indexed, asset-columned closing prices. `None` marks a missing price.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTable {
    dates: Vec<NaiveDate>,
    assets: Vec<AssetId>,
    rows: Vec<Vec<Option<f64>>>,
}

impl PriceTable {
    /// Build a table, sorting rows by date and columns by ticker.
    pub fn new(
        dates: Vec<NaiveDate>,
        assets: Vec<AssetId>,
        rows: Vec<Vec<Option<f64>>>,
    ) -> SharpeQpResult<Self> {
        if dates.len() != rows.len() {
            return Err(SharpeQpError::InvalidInput {
                field: "prices".into(),
                reason: format!("{} dates but {} price rows", dates.len(), rows.len()),
            });
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != assets.len() {
                return Err(SharpeQpError::InvalidInput {
                    field: format!("prices[{}]", i),
                    reason: format!("Expected {} columns but got {}", assets.len(), row.len()),
                });
            }
        }

        let mut column_order: Vec<usize> = (0..assets.len()).collect();
        column_order.sort_by(|a, b| assets[*a].cmp(&assets[*b]));
        for pair in column_order.windows(2) {
            if assets[pair[0]] == assets[pair[1]] {
                return Err(SharpeQpError::InvalidInput {
                    field: "prices".into(),
                    reason: format!("Duplicate ticker column {}", assets[pair[0]]),
                });
            }
        }

        let mut row_order: Vec<usize> = (0..dates.len()).collect();
        row_order.sort_by_key(|i| dates[*i]);

        let sorted_assets = column_order.iter().map(|j| assets[*j].clone()).collect();
        let sorted_dates = row_order.iter().map(|i| dates[*i]).collect();
        let sorted_rows = row_order
            .iter()
            .map(|i| column_order.iter().map(|j| rows[*i][*j]).collect())
            .collect();

        Ok(Self {
            dates: sorted_dates,
            assets: sorted_assets,
            rows: sorted_rows,
        })
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn assets(&self) -> &[AssetId] {
        &self.assets
    }

    pub fn rows(&self) -> &[Vec<Option<f64>>] {
        &self.rows
    }

    /// Keep only the columns whose ticker is in `universe`.
    pub fn restrict_to(&self, universe: &[AssetId]) -> PriceTable {
        let keep: Vec<usize> = self
            .assets
            .iter()
            .enumerate()
            .filter(|(_, a)| universe.binary_search(a).is_ok())
            .map(|(j, _)| j)
            .collect();
        PriceTable {
            dates: self.dates.clone(),
            assets: keep.iter().map(|j| self.assets[*j].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| keep.iter().map(|j| row[*j]).collect())
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Return series
// ---------------------------------------------------------------------------

/// Simple returns `(p_t - p_{t-1}) / p_{t-1}`. The first row never has a
/// predecessor and is always undefined.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReturnSeries {
    dates: Vec<NaiveDate>,
    assets: Vec<AssetId>,
    rows: Vec<Vec<Option<f64>>>,
}

impl ReturnSeries {
    pub fn from_prices(prices: &PriceTable) -> Self {
        let n_assets = prices.assets.len();
        let rows = prices
            .rows
            .iter()
            .enumerate()
            .map(|(t, row)| {
                if t == 0 {
                    return vec![None; n_assets];
                }
                let prev = &prices.rows[t - 1];
                row.iter()
                    .zip(prev.iter())
                    .map(|(cur, prev)| match (cur, prev) {
                        (Some(p), Some(q)) if *q != 0.0 => {
                            let r = (p - q) / q;
                            r.is_finite().then_some(r)
                        }
                        _ => None,
                    })
                    .collect()
            })
            .collect();

        Self {
            dates: prices.dates.clone(),
            assets: prices.assets.clone(),
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn assets(&self) -> &[AssetId] {
        &self.assets
    }

    pub fn rows(&self) -> &[Vec<Option<f64>>] {
        &self.rows
    }

    /// Rows in which every asset has a defined return.
    pub fn complete_rows(&self) -> Vec<Vec<f64>> {
        self.rows
            .iter()
            .filter_map(|row| row.iter().copied().collect::<Option<Vec<f64>>>())
            .collect()
    }

    /// Defined values of one column.
    fn column(&self, j: usize) -> Vec<f64> {
        self.rows.iter().filter_map(|row| row[j]).collect()
    }

    /// Mean return per asset, undefined values skipped.
    pub fn mean_returns(&self) -> SharpeQpResult<AssetVector> {
        self.per_asset("mean return", 1, |values| values.iter().mean())
    }

    /// Sample standard deviation of returns per asset, undefined values skipped.
    pub fn volatility(&self) -> SharpeQpResult<AssetVector> {
        self.per_asset("volatility", 2, |values| values.iter().std_dev())
    }

    fn per_asset(
        &self,
        what: &str,
        min_obs: usize,
        stat: impl Fn(&[f64]) -> f64,
    ) -> SharpeQpResult<AssetVector> {
        let mut out = AssetVector::new();
        for (j, asset) in self.assets.iter().enumerate() {
            let values = self.column(j);
            if values.len() < min_obs {
                return Err(SharpeQpError::InsufficientData(format!(
                    "{} for {} needs at least {} defined returns, got {}",
                    what,
                    asset,
                    min_obs,
                    values.len()
                )));
            }
            out.insert(asset.clone(), stat(&values));
        }
        Ok(out)
    }

    /// Sample covariance estimated over the complete rows only.
    pub fn covariance(&self) -> SharpeQpResult<CovarianceMatrix> {
        let complete = self.complete_rows();
        if complete.len() < 2 {
            return Err(SharpeQpError::InsufficientData(format!(
                "Covariance needs at least 2 complete return rows, got {}",
                complete.len()
            )));
        }

        let n = self.assets.len();
        let columns: Vec<Vec<f64>> = (0..n)
            .map(|j| complete.iter().map(|row| row[j]).collect())
            .collect();

        let mut matrix = DMatrix::<f64>::zeros(n, n);
        for i in 0..n {
            for j in i..n {
                let c = columns[i].iter().covariance(columns[j].iter());
                matrix[(i, j)] = c;
                matrix[(j, i)] = c;
            }
        }

        Ok(CovarianceMatrix {
            assets: self.assets.clone(),
            matrix,
        })
    }
}

// ---------------------------------------------------------------------------
// Covariance matrix
// ---------------------------------------------------------------------------

/// Square asset covariance matrix indexed by the universe order.
#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceMatrix {
    assets: Vec<AssetId>,
    matrix: DMatrix<f64>,
}

impl CovarianceMatrix {
    /// Build from row-major nested vectors.
    pub fn new(assets: Vec<AssetId>, rows: Vec<Vec<f64>>) -> SharpeQpResult<Self> {
        let n = assets.len();
        if rows.len() != n {
            return Err(SharpeQpError::InvalidInput {
                field: "covariance_matrix".into(),
                reason: format!("Expected {} rows but got {}", n, rows.len()),
            });
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != n {
                return Err(SharpeQpError::InvalidInput {
                    field: format!("covariance_matrix[{}]", i),
                    reason: format!("Expected {} columns but got {}", n, row.len()),
                });
            }
        }
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        Ok(Self {
            assets,
            matrix: DMatrix::from_row_slice(n, n, &flat),
        })
    }

    pub fn from_diagonal(assets: Vec<AssetId>, variances: &[f64]) -> SharpeQpResult<Self> {
        if variances.len() != assets.len() {
            return Err(SharpeQpError::InvalidInput {
                field: "variances".into(),
                reason: format!(
                    "Expected {} variances but got {}",
                    assets.len(),
                    variances.len()
                ),
            });
        }
        let n = assets.len();
        let mut matrix = DMatrix::<f64>::zeros(n, n);
        for (i, v) in variances.iter().enumerate() {
            matrix[(i, i)] = *v;
        }
        Ok(Self { assets, matrix })
    }

    pub fn assets(&self) -> &[AssetId] {
        &self.assets
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.matrix[(i, j)]
    }

    /// Reject non-finite, asymmetric or indefinite matrices.
    pub fn validate_psd(&self) -> SharpeQpResult<()> {
        if self.matrix.iter().any(|v| !v.is_finite()) {
            return Err(SharpeQpError::InvalidInput {
                field: "covariance_matrix".into(),
                reason: "Contains non-finite entries".into(),
            });
        }

        let scale = self.matrix.amax().max(1.0);
        let n = self.len();
        for i in 0..n {
            for j in (i + 1)..n {
                if (self.matrix[(i, j)] - self.matrix[(j, i)]).abs() > PSD_TOLERANCE * scale {
                    return Err(SharpeQpError::InvalidInput {
                        field: "covariance_matrix".into(),
                        reason: format!(
                            "Not symmetric at ({}, {}) / ({}, {})",
                            self.assets[i], self.assets[j], self.assets[j], self.assets[i]
                        ),
                    });
                }
            }
        }

        let eigenvalues = self.matrix.symmetric_eigenvalues();
        let min_eigenvalue = eigenvalues.iter().copied().fold(f64::INFINITY, f64::min);
        let eig_scale = eigenvalues.amax().max(1.0);
        if min_eigenvalue < -PSD_TOLERANCE * eig_scale {
            return Err(SharpeQpError::CovarianceNotPsd { min_eigenvalue });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, 8, d).unwrap()
    }

    fn sample_prices() -> PriceTable {
        PriceTable::new(
            vec![date(1), date(2), date(3), date(4)],
            vec!["B".into(), "A".into()],
            vec![
                vec![Some(20.0), Some(10.0)],
                vec![Some(22.0), Some(11.0)],
                vec![Some(20.9), Some(10.45)],
                vec![Some(22.99), Some(11.495)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_price_columns_sorted() {
        let prices = sample_prices();
        assert_eq!(prices.assets(), &["A".to_string(), "B".to_string()]);
        assert_eq!(prices.rows()[0], vec![Some(10.0), Some(20.0)]);
    }

    #[test]
    fn test_price_rows_sorted_by_date() {
        let prices = PriceTable::new(
            vec![date(3), date(1)],
            vec!["A".into()],
            vec![vec![Some(3.0)], vec![Some(1.0)]],
        )
        .unwrap();
        assert_eq!(prices.dates(), &[date(1), date(3)]);
        assert_eq!(prices.rows()[0], vec![Some(1.0)]);
    }

    #[test]
    fn test_duplicate_ticker_rejected() {
        let result = PriceTable::new(
            vec![date(1)],
            vec!["A".into(), "A".into()],
            vec![vec![Some(1.0), Some(2.0)]],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_first_return_row_undefined() {
        let returns = ReturnSeries::from_prices(&sample_prices());
        assert_eq!(returns.len(), 4);
        assert!(returns.rows()[0].iter().all(|r| r.is_none()));
        let r = returns.rows()[1][0].unwrap();
        assert!((r - 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_missing_price_gives_undefined_return() {
        let prices = PriceTable::new(
            vec![date(1), date(2), date(3)],
            vec!["A".into()],
            vec![vec![Some(1.0)], vec![None], vec![Some(1.2)]],
        )
        .unwrap();
        let returns = ReturnSeries::from_prices(&prices);
        assert_eq!(returns.rows()[1][0], None);
        assert_eq!(returns.rows()[2][0], None);
    }

    #[test]
    fn test_covariance_symmetric_and_perfectly_correlated() {
        let returns = ReturnSeries::from_prices(&sample_prices());
        let cov = returns.covariance().unwrap();
        assert_eq!(cov.len(), 2);
        assert!((cov.get(0, 1) - cov.get(1, 0)).abs() < 1e-15);
        // B moves exactly with A, so the correlation is one.
        let corr = cov.get(0, 1) / (cov.get(0, 0) * cov.get(1, 1)).sqrt();
        assert!((corr - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_covariance_requires_two_rows() {
        let prices = PriceTable::new(
            vec![date(1), date(2)],
            vec!["A".into()],
            vec![vec![Some(1.0)], vec![Some(1.1)]],
        )
        .unwrap();
        let returns = ReturnSeries::from_prices(&prices);
        assert!(returns.covariance().is_err());
    }

    #[test]
    fn test_indefinite_matrix_rejected() {
        let cov = CovarianceMatrix::new(
            vec!["A".into(), "B".into()],
            vec![vec![1.0, 2.0], vec![2.0, 1.0]],
        )
        .unwrap();
        match cov.validate_psd() {
            Err(SharpeQpError::CovarianceNotPsd { min_eigenvalue }) => {
                assert!((min_eigenvalue + 1.0).abs() < 1e-9)
            }
            other => panic!("expected CovarianceNotPsd, got {:?}", other),
        }
    }

    #[test]
    fn test_asymmetric_matrix_rejected() {
        let cov = CovarianceMatrix::new(
            vec!["A".into(), "B".into()],
            vec![vec![1.0, 0.5], vec![0.1, 1.0]],
        )
        .unwrap();
        assert!(cov.validate_psd().is_err());
    }

    #[test]
    fn test_from_diagonal_is_psd() {
        let cov =
            CovarianceMatrix::from_diagonal(vec!["A".into(), "B".into()], &[0.04, 0.09]).unwrap();
        assert!(cov.validate_psd().is_ok());
        assert_eq!(cov.get(1, 1), 0.09);
        assert_eq!(cov.get(0, 1), 0.0);
    }
}
