//! The cleaned batch consumed by the engine.
//!
//! Fetching, cleansing and staging happen upstream; what arrives here is a
//! rectangular set of rows with the eight contract columns. Only
//! `description`, `customerid` and `country` may be missing.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Column names of the input contract, in order.
pub const BATCH_COLUMNS: [&str; 8] = [
    "invoiceno",
    "stockcode",
    "description",
    "quantity",
    "invoicedate",
    "unitprice",
    "customerid",
    "country",
];

/// One cleaned transaction line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRow {
    /// Invoice number
    pub invoiceno: String,
    /// Product stock code
    pub stockcode: String,
    /// Product description, used as the product's natural key
    pub description: Option<String>,
    /// Units sold
    pub quantity: i64,
    /// Invoice timestamp
    pub invoicedate: NaiveDateTime,
    /// Price per unit
    pub unitprice: Decimal,
    /// Customer identifier
    pub customerid: Option<i64>,
    /// Customer country
    pub country: Option<String>,
}

impl SourceRow {
    /// Calendar date of the sale.
    pub fn sale_date(&self) -> NaiveDate {
        self.invoicedate.date()
    }

    /// Description trimmed, `None` when missing or blank.
    pub fn product_name(&self) -> Option<&str> {
        non_blank(self.description.as_deref())
    }

    /// Country trimmed, `None` when missing or blank.
    pub fn country_name(&self) -> Option<&str> {
        non_blank(self.country.as_deref())
    }

    /// Number of missing cells in this row.
    pub fn null_cells(&self) -> usize {
        [
            self.description.is_none(),
            self.customerid.is_none(),
            self.country.is_none(),
        ]
        .iter()
        .filter(|missing| **missing)
        .count()
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// A cleaned batch of source rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CleanedBatch {
    rows: Vec<SourceRow>,
}

impl CleanedBatch {
    /// Wrap already-cleaned rows.
    pub fn new(rows: Vec<SourceRow>) -> Self {
        CleanedBatch { rows }
    }

    /// Rows in input order.
    pub fn rows(&self) -> &[SourceRow] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the batch has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of columns in the contract.
    pub fn column_count(&self) -> usize {
        BATCH_COLUMNS.len()
    }

    /// Total missing cells across the batch.
    pub fn null_cell_count(&self) -> usize {
        self.rows.iter().map(SourceRow::null_cells).sum()
    }

    /// Rows identical to an earlier row (the first occurrence is not counted).
    pub fn duplicate_row_count(&self) -> usize {
        let mut seen = HashSet::with_capacity(self.rows.len());
        self.rows.iter().filter(|row| !seen.insert(*row)).count()
    }
}

impl From<Vec<SourceRow>> for CleanedBatch {
    fn from(rows: Vec<SourceRow>) -> Self {
        CleanedBatch::new(rows)
    }
}

impl FromIterator<SourceRow> for CleanedBatch {
    fn from_iter<I: IntoIterator<Item = SourceRow>>(iter: I) -> Self {
        CleanedBatch::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn row(stockcode: &str, customer: Option<i64>) -> SourceRow {
        SourceRow {
            invoiceno: "536365".to_string(),
            stockcode: stockcode.to_string(),
            description: Some("WHITE METAL LANTERN".to_string()),
            quantity: 6,
            invoicedate: NaiveDate::from_ymd_opt(2024, 12, 1)
                .unwrap()
                .and_hms_opt(8, 26, 0)
                .unwrap(),
            unitprice: Decimal::from_str("3.39").unwrap(),
            customerid: customer,
            country: Some("United Kingdom".to_string()),
        }
    }

    #[test]
    fn test_null_cells_counted_per_row() {
        let mut r = row("71053", None);
        r.country = None;
        assert_eq!(r.null_cells(), 2);

        let batch = CleanedBatch::new(vec![r, row("71053", Some(17850))]);
        assert_eq!(batch.null_cell_count(), 2);
        assert_eq!(batch.column_count(), 8);
    }

    #[test]
    fn test_duplicates_exclude_first_occurrence() {
        let batch = CleanedBatch::new(vec![
            row("71053", Some(1)),
            row("71053", Some(1)),
            row("71053", Some(1)),
            row("84406B", Some(1)),
        ]);
        assert_eq!(batch.duplicate_row_count(), 2);
    }

    #[test]
    fn test_blank_description_has_no_product_name() {
        let mut r = row("71053", Some(1));
        r.description = Some("   ".to_string());
        assert_eq!(r.product_name(), None);

        r.description = Some("  LANTERN ".to_string());
        assert_eq!(r.product_name(), Some("LANTERN"));
    }

    #[test]
    fn test_batch_deserializes_from_json_rows() {
        let json = r#"[{
            "invoiceno": "536365",
            "stockcode": "85123A",
            "description": "WHITE HANGING HEART T-LIGHT HOLDER",
            "quantity": 6,
            "invoicedate": "2024-12-01T08:26:00",
            "unitprice": "2.55",
            "customerid": 17850,
            "country": "United Kingdom"
        }]"#;
        let batch: CleanedBatch = serde_json::from_str(json).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.rows()[0].unitprice, Decimal::from_str("2.55").unwrap());
    }
}
