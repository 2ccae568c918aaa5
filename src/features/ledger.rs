//! CSV ingest for bank and card ledgers.
//!
//! Schema problems surface as `MalformedLedger` before any oracle call is
//! made. Rows are kept in file order; sorting is the extractor's job.

use crate::error::PipelineError;
use crate::models::{BankTransaction, CardTransaction, TransactionLedger};
use crate::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::StringRecord;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

const BANK_COLUMNS: &[&str] = &["date", "income", "expense", "balance", "description"];
const CARD_COLUMNS: &[&str] = &["date", "business_name", "amount_of_deal", "amount_paid", "category"];

/// Alternate header spellings accepted for card columns.
const CARD_ALIASES: &[(&str, &str)] = &[("merchant", "business_name"), ("deal_amount", "amount_of_deal")];

impl TransactionLedger {
    pub fn from_csv_paths(bank_path: &Path, card_path: &Path) -> Result<Self> {
        let bank = parse_bank_csv(open(bank_path)?)?;
        let card = parse_card_csv(open(card_path)?)?;
        Ok(Self { bank, card })
    }

    pub fn from_csv_text(bank_csv: &str, card_csv: &str) -> Result<Self> {
        Ok(Self {
            bank: parse_bank_csv(bank_csv.as_bytes())?,
            card: parse_card_csv(card_csv.as_bytes())?,
        })
    }
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| {
        PipelineError::MalformedLedger(format!("failed to open '{}': {}", path.display(), e))
    })
}

pub fn parse_bank_csv<R: Read>(reader: R) -> Result<Vec<BankTransaction>> {
    let mut table = LedgerTable::open("bank", reader, BANK_COLUMNS, &[])?;
    let mut rows = Vec::new();

    while let Some(record) = table.next_record()? {
        rows.push(BankTransaction {
            date: table.date(&record, "date")?,
            income: table.amount(&record, "income")?,
            expense: table.amount(&record, "expense")?,
            balance: table.amount(&record, "balance")?,
            description: table.text(&record, "description"),
        });
    }

    debug!(rows = rows.len(), "Parsed bank ledger");
    Ok(rows)
}

pub fn parse_card_csv<R: Read>(reader: R) -> Result<Vec<CardTransaction>> {
    let mut table = LedgerTable::open("card", reader, CARD_COLUMNS, CARD_ALIASES)?;
    let mut rows = Vec::new();

    while let Some(record) = table.next_record()? {
        rows.push(CardTransaction {
            date: table.date(&record, "date")?,
            merchant: table.text(&record, "business_name"),
            deal_amount: table.amount(&record, "amount_of_deal")?,
            amount_paid: table.amount(&record, "amount_paid")?,
            category: table.text(&record, "category"),
        });
    }

    debug!(rows = rows.len(), "Parsed card ledger");
    Ok(rows)
}

/// A CSV reader with its header map resolved and required columns checked.
struct LedgerTable<R: Read> {
    kind: &'static str,
    reader: csv::Reader<R>,
    columns: HashMap<String, usize>,
    line: u64,
}

impl<R: Read> LedgerTable<R> {
    fn open(
        kind: &'static str,
        reader: R,
        required: &[&str],
        aliases: &[(&str, &str)],
    ) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = reader
            .headers()
            .map_err(|e| PipelineError::MalformedLedger(format!("{} ledger headers: {}", kind, e)))?
            .clone();

        let mut columns = HashMap::new();
        for (idx, name) in headers.iter().enumerate() {
            let name = name.trim().to_lowercase();
            let canonical = aliases
                .iter()
                .find(|(alias, _)| *alias == name)
                .map(|(_, canonical)| canonical.to_string())
                .unwrap_or(name);
            columns.entry(canonical).or_insert(idx);
        }

        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|col| !columns.contains_key(*col))
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::MalformedLedger(format!(
                "{} ledger is missing required columns: {}",
                kind,
                missing.join(", ")
            )));
        }

        Ok(Self {
            kind,
            reader,
            columns,
            line: 1,
        })
    }

    fn next_record(&mut self) -> Result<Option<StringRecord>> {
        let mut record = StringRecord::new();
        let more = self.reader.read_record(&mut record).map_err(|e| {
            PipelineError::MalformedLedger(format!("{} ledger: {}", self.kind, e))
        })?;
        if !more {
            return Ok(None);
        }
        self.line = record.position().map(|p| p.line()).unwrap_or(self.line + 1);
        Ok(Some(record))
    }

    fn raw<'r>(&self, record: &'r StringRecord, column: &str) -> &'r str {
        self.columns
            .get(column)
            .and_then(|idx| record.get(*idx))
            .unwrap_or("")
    }

    fn text(&self, record: &StringRecord, column: &str) -> String {
        self.raw(record, column).to_string()
    }

    /// Blank cells read as zero.
    fn amount(&self, record: &StringRecord, column: &str) -> Result<f64> {
        let raw = self.raw(record, column);
        if raw.is_empty() {
            return Ok(0.0);
        }
        raw.replace(',', "")
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| self.bad_value(column, raw))
    }

    fn date(&self, record: &StringRecord, column: &str) -> Result<NaiveDate> {
        let raw = self.raw(record, column);
        parse_date(raw).ok_or_else(|| self.bad_value(column, raw))
    }

    fn bad_value(&self, column: &str, raw: &str) -> PipelineError {
        PipelineError::MalformedLedger(format!(
            "{} ledger line {}: invalid {} '{}'",
            self.kind, self.line, column, raw
        ))
    }
}

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"];

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|dt| dt.date())
        })
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.date_naive())
        })
        .or_else(|| NaiveDate::parse_from_str(raw, "%m/%d/%Y").ok())
}
