// CSV import
// Reads `date,type,amount,category,description` rows into create payloads.
// Rows are validated here for shape (date, type); amount/category rules are
// enforced by the store when the batch is written.

use std::io::Read;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use crate::error::{FieldError, LedgerError, LedgerResult};
use crate::transaction::{NewTransaction, TransactionKind};

#[derive(Debug, Deserialize)]
struct CsvRow {
    date: String,
    #[serde(rename = "type")]
    kind: String,
    amount: f64,
    category: String,
    description: String,
}

pub fn load_csv(csv_path: &Path) -> LedgerResult<Vec<NewTransaction>> {
    let rdr = csv::Reader::from_path(csv_path)?;
    read_rows(rdr)
}

pub fn load_csv_from_reader<R: Read>(reader: R) -> LedgerResult<Vec<NewTransaction>> {
    read_rows(csv::Reader::from_reader(reader))
}

fn read_rows<R: Read>(mut rdr: csv::Reader<R>) -> LedgerResult<Vec<NewTransaction>> {
    let mut rows = Vec::new();
    let mut errors = Vec::new();

    for (index, result) in rdr.deserialize::<CsvRow>().enumerate() {
        let line = index + 1;
        let row = result?;

        let kind = row.kind.parse::<TransactionKind>();
        let date = parse_date(&row.date);

        match (kind, date) {
            (Ok(kind), Some(occurred_at)) => rows.push(
                NewTransaction::new(kind, row.amount, row.category, row.description)
                    .at(occurred_at),
            ),
            (kind, date) => {
                if let Err(e) = kind {
                    errors.push(FieldError::new("type", format!("row {line}: {e}")));
                }
                if date.is_none() {
                    errors.push(FieldError::new(
                        "date",
                        format!("row {line}: expected RFC 3339 or YYYY-MM-DD, got '{}'", row.date),
                    ));
                }
            }
        }
    }

    if !errors.is_empty() {
        return Err(LedgerError::Validation(errors));
    }
    tracing::debug!(rows = rows.len(), "parsed csv rows");
    Ok(rows)
}

/// RFC 3339 instants, or bare dates taken as midnight UTC.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Some(instant.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
