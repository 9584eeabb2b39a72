//! Operator reports over the configured stock store.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, bail};

use stockledger_infra::StockConfig;
use stockledger_infra::StockReports;
use stockledger_infra::store::{InMemoryStockStore, PostgresStockStore, StockStore};

pub const USAGE: &str = "usage: stockledger-report <state|valuation|reorder>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    /// Every product with stock, reorder flag and value.
    State,
    /// Global valuation summary.
    Valuation,
    /// Products at or under their reorder point.
    Reorder,
}

impl FromStr for ReportKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "state" => Ok(Self::State),
            "valuation" => Ok(Self::Valuation),
            "reorder" => Ok(Self::Reorder),
            other => bail!("unknown report {other:?}; {USAGE}"),
        }
    }
}

/// Open the store selected by `config`, creating the schema when persistent.
pub async fn open_store(config: &StockConfig) -> anyhow::Result<Arc<dyn StockStore>> {
    if !config.use_persistent_stores {
        tracing::warn!("USE_PERSISTENT_STORES not set; reporting on an empty in-memory store");
        return Ok(Arc::new(InMemoryStockStore::new()));
    }

    let store = PostgresStockStore::connect(config)
        .await
        .context("failed to connect to Postgres")?;
    store.migrate().await.context("failed to apply stock schema")?;
    Ok(Arc::new(store))
}

/// Render one report as pretty-printed JSON.
pub async fn render<S>(reports: &StockReports<S>, kind: ReportKind) -> anyhow::Result<String>
where
    S: StockStore + ?Sized,
{
    let json = match kind {
        ReportKind::State => serde_json::to_string_pretty(&reports.global_stock_state().await?)?,
        ReportKind::Valuation => serde_json::to_string_pretty(&reports.global_valuation().await?)?,
        ReportKind::Reorder => {
            serde_json::to_string_pretty(&reports.products_needing_reorder().await?)?
        }
    };
    Ok(json)
}
