use chrono::NaiveDate;
use sharpe_qp_core::market_data::{CsvMarketData, MarketDataProvider, PriceTable, ReturnSeries};
use std::io::Write;

fn price_table() -> PriceTable {
    let dates = (1..=6)
        .map(|d| NaiveDate::from_ymd_opt(2023, 3, d).unwrap())
        .collect();
    PriceTable::new(
        dates,
        vec!["X".into(), "Y".into()],
        vec![
            vec![Some(100.0), Some(50.0)],
            vec![Some(101.0), Some(49.0)],
            vec![Some(99.0), Some(50.5)],
            vec![Some(102.0), Some(51.0)],
            vec![Some(103.5), Some(50.0)],
            vec![Some(103.0), Some(52.0)],
        ],
    )
    .unwrap()
}

#[test]
fn test_covariance_uses_all_but_leading_row() {
    let prices = price_table();
    let returns = ReturnSeries::from_prices(&prices);
    assert_eq!(returns.len(), 6);
    assert_eq!(returns.complete_rows().len(), prices.rows().len() - 1);

    // Sample variance of X over the 5 defined returns, by hand.
    let px: Vec<f64> = prices.rows().iter().map(|r| r[0].unwrap()).collect();
    let rx: Vec<f64> = px.windows(2).map(|w| (w[1] - w[0]) / w[0]).collect();
    let mean = rx.iter().sum::<f64>() / rx.len() as f64;
    let var = rx.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (rx.len() - 1) as f64;

    let cov = returns.covariance().unwrap();
    assert!((cov.get(0, 0) - var).abs() < 1e-12);
    assert_eq!(cov.get(0, 1), cov.get(1, 0));
    cov.validate_psd().unwrap();
}

#[test]
fn test_csv_provider_from_files() {
    let dir = tempfile::tempdir().unwrap();
    let components = dir.path().join("components.csv");
    let prices = dir.path().join("prices.csv");
    std::fs::File::create(&components)
        .unwrap()
        .write_all(b",Ticker\n0,Y\n1,X\n")
        .unwrap();
    std::fs::File::create(&prices)
        .unwrap()
        .write_all(
            b",Date,X,Y,Z\n\
              0,2023-03-01,100,50,7\n\
              1,2023-03-02,101,49,7.1\n\
              2,2023-03-03,99,50.5,7.2\n\
              3,2023-03-04,102,51,7.0\n",
        )
        .unwrap();

    let md = CsvMarketData::load(&components, &prices, 42, 0.03 / 250.0).unwrap();
    assert_eq!(md.universe(), &["X".to_string(), "Y".to_string()]);
    assert_eq!(md.covariance().assets(), md.universe());
    assert_eq!(md.volatility().len(), 2);
    assert!(md.alpha().values().all(|a| a.is_finite()));

    let again = CsvMarketData::load(&components, &prices, 42, 0.03 / 250.0).unwrap();
    assert_eq!(md.alpha(), again.alpha());
}

#[test]
fn test_csv_provider_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = CsvMarketData::load(
        dir.path().join("nope.csv"),
        dir.path().join("nope.csv"),
        1,
        0.0,
    );
    assert!(result.is_err());
}
