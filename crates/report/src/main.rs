use anyhow::Context;

use stockledger_infra::{StockConfig, StockReports};
use stockledger_report::{ReportKind, USAGE, open_store, render};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockledger_observability::init();

    let kind: ReportKind = std::env::args()
        .nth(1)
        .context(USAGE)?
        .parse()?;
    let config = StockConfig::from_env().context("invalid stock configuration")?;

    let store = open_store(&config).await?;
    let reports = StockReports::new(store);
    println!("{}", render(&reports, kind).await?);

    tracing::info!(report = ?kind, "report printed");
    Ok(())
}
