use serde::{Deserialize, Serialize};

pub const MIN_DATA_CELLS: usize = 9;
pub const MAX_SYMBOL_LEN: usize = 20;

/// Header, footer and index labels that show up in the first column of the
/// market-watch table but are not listed securities. Matched case-sensitively
/// by containment.
pub const SYMBOL_BLOCKLIST: &[&str] = &[
    "Symbol", "Last", "Open", "High", "Low", "Current", "Change", "Volume", "PSX", "KSE",
];

const MISSING_NUMERIC: &str = "0";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub symbol: String,
    pub sector: String,
    pub listed_in: String,
    pub ldcp: String,
    pub open: String,
    pub high: String,
    pub low: String,
    pub current: String,
    pub change: String,
    pub change_percent: String,
    pub volume: String,
}

impl RawRecord {
    /// Builds a record from the text of one table row. Rows with fewer than
    /// [`MIN_DATA_CELLS`] cells or a non-data symbol yield `None`. Missing
    /// trailing numeric cells default to `"0"`, which later validation cannot
    /// tell apart from a genuine zero.
    pub fn from_cells<S: AsRef<str>>(cells: &[S]) -> Option<Self> {
        if cells.len() < MIN_DATA_CELLS {
            return None;
        }

        let text = |idx: usize| cells.get(idx).map(|cell| cell.as_ref().trim().to_string());
        let numeric = |idx: usize| text(idx).unwrap_or_else(|| MISSING_NUMERIC.to_string());

        let symbol = text(0).unwrap_or_default();
        if !is_data_symbol(&symbol) {
            return None;
        }

        Some(Self {
            symbol,
            sector: text(1).unwrap_or_default(),
            listed_in: text(2).unwrap_or_default(),
            ldcp: numeric(3),
            open: numeric(4),
            high: numeric(5),
            low: numeric(6),
            current: numeric(7),
            change: numeric(8),
            change_percent: numeric(9),
            volume: numeric(10),
        })
    }
}

pub fn is_data_symbol(symbol: &str) -> bool {
    if symbol.is_empty() || symbol.chars().count() > MAX_SYMBOL_LEN {
        return false;
    }
    !SYMBOL_BLOCKLIST
        .iter()
        .any(|marker| symbol.contains(marker))
}

/// A row that passed validation, with every numeric column typed. Only the
/// normalizer builds these, so a held value always has a non-empty symbol of
/// at most [`MAX_SYMBOL_LEN`] characters and a finite `current` in
/// `(0, 100000]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRecord {
    pub(crate) symbol: String,
    pub(crate) sector: String,
    pub(crate) listed_in: String,
    pub(crate) ldcp: f64,
    pub(crate) open: f64,
    pub(crate) high: f64,
    pub(crate) low: f64,
    pub(crate) current: f64,
    pub(crate) change: f64,
    pub(crate) change_percent: f64,
    pub(crate) volume: i64,
}

impl NormalizedRecord {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn sector(&self) -> &str {
        &self.sector
    }

    pub fn listed_in(&self) -> &str {
        &self.listed_in
    }

    pub fn ldcp(&self) -> f64 {
        self.ldcp
    }

    pub fn open(&self) -> f64 {
        self.open
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn change(&self) -> f64 {
        self.change
    }

    pub fn change_percent(&self) -> f64 {
        self.change_percent
    }

    pub fn volume(&self) -> i64 {
        self.volume
    }
}
