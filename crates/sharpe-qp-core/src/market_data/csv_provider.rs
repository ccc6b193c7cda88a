use chrono::NaiveDate;
use std::io::Read;
use std::path::Path;
use tracing::info;

use super::in_memory::InMemoryMarketData;
use super::series::{AssetVector, CovarianceMatrix, PriceTable, ReturnSeries};
use super::{canonical_universe, MarketDataProvider};
use crate::error::SharpeQpError;
use crate::types::{AssetId, Rate};
use crate::SharpeQpResult;

const TICKER_COLUMN: &str = "Ticker";
const DATE_COLUMN: &str = "Date";
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"];

/// Market data loaded from a constituents table and a price history table.
///
/// The constituents file needs a `Ticker` column. The price file needs a
/// `Date` column plus one column per ticker; a blank-named leading index
/// column is ignored, as are blank and `nan` cells.
#[derive(Debug, Clone)]
pub struct CsvMarketData {
    inner: InMemoryMarketData,
}

impl CsvMarketData {
    pub fn load(
        components_path: impl AsRef<Path>,
        prices_path: impl AsRef<Path>,
        seed: u64,
        risk_free_rate: Rate,
    ) -> SharpeQpResult<Self> {
        let components_path = components_path.as_ref();
        let prices_path = prices_path.as_ref();
        let universe = read_universe(std::fs::File::open(components_path)?)?;
        let prices = read_prices(std::fs::File::open(prices_path)?)?;
        info!(
            components = %components_path.display(),
            prices = %prices_path.display(),
            n_assets = universe.len(),
            n_dates = prices.dates().len(),
            "Loaded market data"
        );
        Self::from_tables(universe, &prices, seed, risk_free_rate)
    }

    pub fn from_readers<C: Read, P: Read>(
        components: C,
        prices: P,
        seed: u64,
        risk_free_rate: Rate,
    ) -> SharpeQpResult<Self> {
        let universe = read_universe(components)?;
        let prices = read_prices(prices)?;
        Self::from_tables(universe, &prices, seed, risk_free_rate)
    }

    fn from_tables(
        universe: Vec<AssetId>,
        prices: &PriceTable,
        seed: u64,
        risk_free_rate: Rate,
    ) -> SharpeQpResult<Self> {
        Ok(Self {
            inner: InMemoryMarketData::from_prices(universe, prices, seed, risk_free_rate)?,
        })
    }
}

impl MarketDataProvider for CsvMarketData {
    fn universe(&self) -> &[AssetId] {
        self.inner.universe()
    }

    fn returns(&self) -> &ReturnSeries {
        self.inner.returns()
    }

    fn alpha(&self) -> &AssetVector {
        self.inner.alpha()
    }

    fn volatility(&self) -> &AssetVector {
        self.inner.volatility()
    }

    fn covariance(&self) -> &CovarianceMatrix {
        self.inner.covariance()
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Read the `Ticker` column of a constituents table into a canonical universe.
pub fn read_universe<R: Read>(reader: R) -> SharpeQpResult<Vec<AssetId>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers()?.clone();
    let ticker_idx = headers
        .iter()
        .position(|h| h.trim() == TICKER_COLUMN)
        .ok_or_else(|| SharpeQpError::DataError(format!("Missing '{}' column", TICKER_COLUMN)))?;

    let mut tickers = Vec::new();
    for record in rdr.records() {
        let record = record?;
        if let Some(t) = record.get(ticker_idx).map(str::trim).filter(|t| !t.is_empty()) {
            tickers.push(t.to_string());
        }
    }

    let universe = canonical_universe(tickers);
    if universe.is_empty() {
        return Err(SharpeQpError::InsufficientData(
            "Constituents table lists no tickers".into(),
        ));
    }
    Ok(universe)
}

/// Read a date-by-ticker price table.
pub fn read_prices<R: Read>(reader: R) -> SharpeQpResult<PriceTable> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers()?.clone();

    let mut date_idx = None;
    let mut ticker_cols: Vec<(usize, AssetId)> = Vec::new();
    for (i, h) in headers.iter().enumerate() {
        let h = h.trim();
        if h.eq_ignore_ascii_case(DATE_COLUMN) {
            date_idx = Some(i);
        } else if !h.is_empty() && !h.starts_with("Unnamed") {
            ticker_cols.push((i, h.to_string()));
        }
    }
    let date_idx = date_idx
        .ok_or_else(|| SharpeQpError::DataError(format!("Missing '{}' column", DATE_COLUMN)))?;

    let mut dates = Vec::new();
    let mut rows = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record?;
        let raw_date = record.get(date_idx).unwrap_or_default().trim();
        dates.push(parse_date(raw_date).ok_or_else(|| {
            SharpeQpError::DataError(format!("Row {}: unparseable date '{}'", line + 1, raw_date))
        })?);

        let row = ticker_cols
            .iter()
            .map(|(i, ticker)| parse_price(record.get(*i).unwrap_or_default(), ticker, line + 1))
            .collect::<SharpeQpResult<Vec<Option<f64>>>>()?;
        rows.push(row);
    }

    let assets = ticker_cols.into_iter().map(|(_, t)| t).collect();
    PriceTable::new(dates, assets, rows)
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

fn parse_price(raw: &str, ticker: &str, line: usize) -> SharpeQpResult<Option<f64>> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    let value: f64 = raw.parse().map_err(|_| {
        SharpeQpError::DataError(format!("Row {}: bad price '{}' for {}", line, raw, ticker))
    })?;
    Ok(value.is_finite().then_some(value))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const COMPONENTS: &str = "\
,Ticker,Name
0,600519.SH,Kweichow Moutai
1,000001.SZ,Ping An Bank
2,600519.SH,Kweichow Moutai
";

    const PRICES: &str = "\
,Date,600519.SH,000001.SZ
0,2022-08-03,1900.0,12.10
1,2022-08-01,1880.0,12.00
2,2022-08-02,1890.0,
3,2022-08-04,1910.0,12.30
4,2022-08-05,1905.0,12.20
";

    #[test]
    fn test_read_universe_sorted_dedup() {
        let universe = read_universe(COMPONENTS.as_bytes()).unwrap();
        assert_eq!(universe, vec!["000001.SZ".to_string(), "600519.SH".to_string()]);
    }

    #[test]
    fn test_read_universe_requires_ticker_column() {
        assert!(read_universe("Name\nfoo\n".as_bytes()).is_err());
    }

    #[test]
    fn test_read_prices_sorted_and_blank_cells() {
        let prices = read_prices(PRICES.as_bytes()).unwrap();
        assert_eq!(prices.assets(), &["000001.SZ".to_string(), "600519.SH".to_string()]);
        assert_eq!(
            prices.dates()[0],
            NaiveDate::from_ymd_opt(2022, 8, 1).unwrap()
        );
        assert_eq!(prices.rows()[1], vec![None, Some(1890.0)]);
    }

    #[test]
    fn test_bad_price_rejected() {
        let bad = "Date,A\n2022-08-01,abc\n";
        assert!(read_prices(bad.as_bytes()).is_err());
    }

    #[test]
    fn test_bad_date_rejected() {
        let bad = "Date,A\nyesterday,1.0\n";
        assert!(read_prices(bad.as_bytes()).is_err());
    }

    #[test]
    fn test_from_readers_builds_snapshot() {
        let md = CsvMarketData::from_readers(COMPONENTS.as_bytes(), PRICES.as_bytes(), 1, 0.0)
            .unwrap();
        assert_eq!(md.universe().len(), 2);
        // Dates 08-02 and 08-03 lack a 000001.SZ return, plus the leading row.
        assert_eq!(md.returns().len(), 5);
        assert_eq!(md.returns().complete_rows().len(), 2);
    }

    #[test]
    fn test_constituent_without_prices_rejected() {
        let components = format!("{}3,300750.SZ,CATL\n", COMPONENTS);
        let err = CsvMarketData::from_readers(components.as_bytes(), PRICES.as_bytes(), 1, 0.0)
            .unwrap_err();
        assert!(matches!(err, SharpeQpError::InsufficientData(_)));
        assert!(err.to_string().contains("300750.SZ"));
    }
}
