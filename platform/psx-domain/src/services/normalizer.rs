use crate::value_objects::record::{NormalizedRecord, RawRecord, MAX_SYMBOL_LEN};

pub const MAX_CURRENT: f64 = 100_000.0;

const ZERO: &str = "0";

const SENTINELS: &[&str] = &["", " ", "-", "N/A", "NAN", "NULL", "N/S", "N.S", "n/s"];

const NOISE_TOKENS: &[&str] = &[",", " ", "%", "(", ")", "$", "Rs.", "PKR", "\u{20a8}"];

/// Reduces a displayed cell value to a canonical decimal string. Anything
/// that cannot be read as a finite number becomes `"0"`.
///
/// Parentheses are stripped without implying a negative value; only a
/// leading `-` carries the sign.
pub fn clean_numeric(value: &str) -> String {
    if value.trim().is_empty() || SENTINELS.contains(&value) {
        return ZERO.to_string();
    }

    let mut cleaned = value.trim().to_string();
    for token in NOISE_TOKENS {
        cleaned = cleaned.replace(token, "");
    }
    cleaned = cleaned.replace("--", "0");

    if let Some(rest) = cleaned.strip_prefix('-') {
        cleaned = format!("-{}", rest.trim_start());
    }

    if cleaned.is_empty() || cleaned == "-" {
        return ZERO.to_string();
    }

    match cleaned.parse::<f64>() {
        Ok(parsed) if parsed.is_finite() => render_decimal(parsed),
        _ => ZERO.to_string(),
    }
}

fn render_decimal(value: f64) -> String {
    let value = if value == 0.0 { 0.0 } else { value };
    if value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

pub fn coerce_decimal(value: &str) -> f64 {
    let cleaned = clean_numeric(value);
    if cleaned == ZERO {
        return 0.0;
    }
    cleaned.parse::<f64>().unwrap_or(0.0)
}

pub fn coerce_volume(value: &str) -> i64 {
    let parsed = coerce_decimal(value);
    if parsed <= 0.0 {
        return 0;
    }
    parsed.trunc() as i64
}

pub fn validate(record: &RawRecord) -> bool {
    if record.symbol.is_empty() || record.symbol.chars().count() > MAX_SYMBOL_LEN {
        return false;
    }
    let current = coerce_decimal(&record.current);
    current > 0.0 && current <= MAX_CURRENT
}

pub fn normalize(record: &RawRecord) -> Option<NormalizedRecord> {
    if !validate(record) {
        return None;
    }

    Some(NormalizedRecord {
        symbol: record.symbol.clone(),
        sector: record.sector.clone(),
        listed_in: record.listed_in.clone(),
        ldcp: coerce_decimal(&record.ldcp),
        open: coerce_decimal(&record.open),
        high: coerce_decimal(&record.high),
        low: coerce_decimal(&record.low),
        current: coerce_decimal(&record.current),
        change: coerce_decimal(&record.change),
        change_percent: coerce_decimal(&record.change_percent),
        volume: coerce_volume(&record.volume),
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    pub records: Vec<NormalizedRecord>,
    pub rejected: Vec<String>,
}

pub fn normalize_batch(records: &[RawRecord]) -> NormalizedBatch {
    let mut batch = NormalizedBatch::default();
    for record in records {
        match normalize(record) {
            Some(normalized) => batch.records.push(normalized),
            None => batch.rejected.push(record.symbol.clone()),
        }
    }
    batch
}
