use psx_domain::repositories::rendering::PageSession;
use psx_domain::value_objects::record::{
    is_data_symbol, RawRecord, MAX_SYMBOL_LEN, MIN_DATA_CELLS, SYMBOL_BLOCKLIST,
};
use std::time::{Duration, Instant};

const PROGRESS_EVERY_ROWS: usize = 50;

const TABLE_SCRIPT_TEMPLATE: &str = r#"(() => {
  const blocklist = __BLOCKLIST__;
  const minCells = __MIN_CELLS__;
  const maxSymbolLen = __MAX_SYMBOL_LEN__;
  const tables = Array.from(document.querySelectorAll('table'));
  const target = tables.find((table) => {
    const headers = Array.from(table.querySelectorAll('th'));
    if (headers.length < 10) {
      return false;
    }
    const text = headers.map((h) => h.innerText.trim()).join(' ');
    return text.includes('Symbol') || text.includes('Sector') || text.includes('LDCP');
  }) || tables[0];
  if (!target) {
    return [];
  }
  const body = target.querySelector('tbody');
  if (!body) {
    return [];
  }
  const cellText = (cell, fallback) => (cell ? cell.innerText.trim() : '') || fallback;
  const records = [];
  body.querySelectorAll('tr').forEach((row) => {
    const cells = row.querySelectorAll('td');
    if (cells.length < minCells) {
      return;
    }
    const symbol = cellText(cells[0], '');
    if (!symbol || symbol.length > maxSymbolLen || blocklist.some((m) => symbol.includes(m))) {
      return;
    }
    records.push({
      symbol: symbol,
      sector: cellText(cells[1], ''),
      listed_in: cellText(cells[2], ''),
      ldcp: cellText(cells[3], '0'),
      open: cellText(cells[4], '0'),
      high: cellText(cells[5], '0'),
      low: cellText(cells[6], '0'),
      current: cellText(cells[7], '0'),
      change: cellText(cells[8], '0'),
      change_percent: cellText(cells[9], '0'),
      volume: cellText(cells[10], '0'),
    });
  });
  return records;
})()"#;

pub fn table_script() -> String {
    let blocklist = SYMBOL_BLOCKLIST
        .iter()
        .map(|marker| format!("'{marker}'"))
        .collect::<Vec<_>>()
        .join(", ");
    TABLE_SCRIPT_TEMPLATE
        .replace("__BLOCKLIST__", &format!("[{blocklist}]"))
        .replace("__MIN_CELLS__", &MIN_DATA_CELLS.to_string())
        .replace("__MAX_SYMBOL_LEN__", &MAX_SYMBOL_LEN.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionTimeouts {
    pub primary_wait: Duration,
    pub settle_delay: Duration,
    pub secondary_wait: Duration,
}

impl Default for ExtractionTimeouts {
    fn default() -> Self {
        Self {
            primary_wait: Duration::from_secs(20),
            settle_delay: Duration::from_secs(2),
            secondary_wait: Duration::from_secs(25),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Table selection and row extraction in one in-page script.
    Script,
    /// Row-by-row walk over the first table, one cell read per row.
    RowWalk,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Script => "script",
            Strategy::RowWalk => "row_walk",
        }
    }

    /// Never fails: any rendering error is logged and yields no records.
    pub async fn attempt(
        &self,
        session: &mut dyn PageSession,
        timeouts: &ExtractionTimeouts,
    ) -> Vec<RawRecord> {
        match self {
            Strategy::Script => attempt_script(session, timeouts).await,
            Strategy::RowWalk => attempt_row_walk(session, timeouts).await,
        }
    }
}

async fn attempt_script(
    session: &mut dyn PageSession,
    timeouts: &ExtractionTimeouts,
) -> Vec<RawRecord> {
    if !session.wait_for_table(timeouts.primary_wait).await {
        tracing::warn!(
            wait_secs = timeouts.primary_wait.as_secs(),
            "no table appeared before script extraction"
        );
        return Vec::new();
    }
    tokio::time::sleep(timeouts.settle_delay).await;

    match session.evaluate_records(&table_script()).await {
        Ok(Some(records)) => records
            .into_iter()
            .filter(|record| is_data_symbol(&record.symbol))
            .collect(),
        Ok(None) => {
            tracing::warn!("extraction script returned null");
            Vec::new()
        }
        Err(err) => {
            tracing::warn!(error = %err, "extraction script failed");
            Vec::new()
        }
    }
}

async fn attempt_row_walk(
    session: &mut dyn PageSession,
    timeouts: &ExtractionTimeouts,
) -> Vec<RawRecord> {
    if !session.wait_for_table(timeouts.secondary_wait).await {
        tracing::warn!(
            wait_secs = timeouts.secondary_wait.as_secs(),
            "no table appeared for row walk"
        );
        return Vec::new();
    }

    let rows = match session.query_rows().await {
        Ok(rows) => rows,
        Err(err) => {
            tracing::warn!(error = %err, "failed to enumerate table rows");
            return Vec::new();
        }
    };
    tracing::info!(rows = rows.len(), "row walk found table rows");

    let mut records = Vec::new();
    for (idx, row) in rows.iter().enumerate() {
        let cells = match row.cell_texts().await {
            Ok(cells) => cells,
            Err(err) => {
                tracing::debug!(row = idx, error = %err, "skipping unreadable row");
                continue;
            }
        };
        let Some(record) = RawRecord::from_cells(&cells) else {
            continue;
        };
        records.push(record);
        if records.len() % PROGRESS_EVERY_ROWS == 0 {
            tracing::info!(processed = records.len(), "row walk progress");
        }
    }
    records
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub records: Vec<RawRecord>,
    pub strategy: Option<Strategy>,
}

/// Ordered fallback over extraction strategies; the first non-empty result
/// wins.
#[derive(Debug, Clone)]
pub struct ExtractionChain {
    strategies: Vec<Strategy>,
    timeouts: ExtractionTimeouts,
}

impl ExtractionChain {
    pub fn new(timeouts: ExtractionTimeouts) -> Self {
        Self::with_strategies(vec![Strategy::Script, Strategy::RowWalk], timeouts)
    }

    pub fn with_strategies(strategies: Vec<Strategy>, timeouts: ExtractionTimeouts) -> Self {
        Self {
            strategies,
            timeouts,
        }
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    pub async fn extract(&self, session: &mut dyn PageSession) -> Extraction {
        for strategy in &self.strategies {
            let start = Instant::now();
            let records = strategy.attempt(session, &self.timeouts).await;
            let result = if records.is_empty() { "empty" } else { "ok" };
            metrics::counter!(
                "psx.extract.attempts_total",
                "strategy" => strategy.name(),
                "result" => result
            )
            .increment(1);
            metrics::histogram!("psx.extract.attempt_ms", "strategy" => strategy.name())
                .record(start.elapsed().as_secs_f64() * 1000.0);

            if records.is_empty() {
                tracing::warn!(strategy = strategy.name(), "strategy yielded no records");
                continue;
            }

            tracing::info!(
                strategy = strategy.name(),
                records = records.len(),
                "extracted records"
            );
            return Extraction {
                records,
                strategy: Some(*strategy),
            };
        }
        Extraction::default()
    }
}
