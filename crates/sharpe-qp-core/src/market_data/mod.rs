pub mod csv_provider;
pub mod in_memory;
pub mod series;

pub use csv_provider::CsvMarketData;
pub use in_memory::{InMemoryMarketData, MarketSnapshotInput};
pub use series::{AssetVector, CovarianceMatrix, PriceTable, ReturnSeries};

use crate::types::AssetId;

/// Read-only source of the inputs one optimization run consumes.
///
/// Every view is a snapshot taken when the provider was built and shares the
/// lexicographic asset order of [`MarketDataProvider::universe`].
pub trait MarketDataProvider {
    /// Sorted, deduplicated universe.
    fn universe(&self) -> &[AssetId];

    fn returns(&self) -> &ReturnSeries;

    /// Expected excess return estimate per asset.
    fn alpha(&self) -> &AssetVector;

    fn volatility(&self) -> &AssetVector;

    fn covariance(&self) -> &CovarianceMatrix;
}

/// Sort and deduplicate tickers into the canonical universe order.
pub fn canonical_universe(mut tickers: Vec<AssetId>) -> Vec<AssetId> {
    tickers.sort();
    tickers.dedup();
    tickers
}
