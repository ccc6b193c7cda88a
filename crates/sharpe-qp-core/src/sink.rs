use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::portfolio::Portfolio;
use crate::SharpeQpResult;

/// Write one `ticker,value` row per universe asset. Assets without a
/// holding are written as zero.
pub fn write_portfolio_csv<W: Write>(portfolio: &Portfolio, writer: W) -> SharpeQpResult<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(["ticker", "value"])?;
    for asset in portfolio.universe() {
        let value = portfolio.value().get(asset).copied().unwrap_or_default();
        wtr.write_record([asset.as_str(), value.to_string().as_str()])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_portfolio_csv_file(portfolio: &Portfolio, path: impl AsRef<Path>) -> SharpeQpResult<()> {
    let path = path.as_ref();
    let file = std::fs::File::create(path)?;
    write_portfolio_csv(portfolio, file)?;
    info!(path = %path.display(), "Portfolio written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::AssetVector;
    use rust_decimal_macros::dec;

    #[test]
    fn test_csv_layout() {
        let mut p = Portfolio::new(dec!(1000), vec!["B".into(), "A".into()]).unwrap();
        let mut w = AssetVector::new();
        w.insert("B".into(), 1.0);
        p.construct(&w);

        let mut buf = Vec::new();
        write_portfolio_csv(&p, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "ticker,value\nA,0\nB,1000\n");
    }
}
