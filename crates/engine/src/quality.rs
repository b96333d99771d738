//! Batch-level quality metrics.
//!
//! Both metrics are percentages. An empty batch yields NaN, which the
//! recorder refuses.

use retaildwh_core::CleanedBatch;

pub const COMPLETENESS: &str = "Completeness";
pub const UNIQUENESS: &str = "Uniqueness";

/// A computed metric, ready for the recorder.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricReading {
    pub name: &'static str,
    pub value: f64,
    pub threshold: f64,
    pub details: String,
}

/// `(1 - missing cells / all cells) * 100`.
pub fn completeness(batch: &CleanedBatch, threshold: f64) -> MetricReading {
    let cells = (batch.len() * batch.column_count()) as f64;
    let nulls = batch.null_cell_count() as f64;
    MetricReading {
        name: COMPLETENESS,
        value: (1.0 - nulls / cells) * 100.0,
        threshold,
        details: "Percentage of non-null values".to_string(),
    }
}

/// `100 - duplicate rows / rows * 100`, where a duplicate is any row equal to
/// an earlier one.
pub fn uniqueness(batch: &CleanedBatch, threshold: f64) -> MetricReading {
    let duplicates = batch.duplicate_row_count();
    let rows = batch.len() as f64;
    MetricReading {
        name: UNIQUENESS,
        value: 100.0 - duplicates as f64 / rows * 100.0,
        threshold,
        details: format!("Found {duplicates} duplicates in source data"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use retaildwh_core::SourceRow;
    use rust_decimal::Decimal;

    fn row(invoiceno: &str, customerid: Option<i64>) -> SourceRow {
        SourceRow {
            invoiceno: invoiceno.to_string(),
            stockcode: "22423".to_string(),
            description: Some("REGENCY CAKESTAND 3 TIER".to_string()),
            quantity: 2,
            invoicedate: NaiveDate::from_ymd_opt(2024, 3, 4)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
            unitprice: Decimal::new(1275, 2),
            customerid,
            country: Some("Germany".to_string()),
        }
    }

    #[test]
    fn test_completeness_counts_missing_cells() {
        let batch = CleanedBatch::new(vec![row("1", Some(12347)), row("2", None)]);
        let reading = completeness(&batch, 95.0);
        // 1 missing cell out of 16
        assert_eq!(reading.value, (1.0 - 1.0 / 16.0) * 100.0);
        assert_eq!(reading.threshold, 95.0);
    }

    #[test]
    fn test_uniqueness_counts_repeats_only() {
        let batch = CleanedBatch::new(vec![
            row("1", Some(12347)),
            row("1", Some(12347)),
            row("2", Some(12347)),
            row("3", Some(12347)),
        ]);
        let reading = uniqueness(&batch, 98.0);
        assert_eq!(reading.value, 75.0);
        assert_eq!(reading.details, "Found 1 duplicates in source data");
    }

    #[test]
    fn test_empty_batch_gives_nan() {
        let batch = CleanedBatch::default();
        assert!(completeness(&batch, 95.0).value.is_nan());
        assert!(uniqueness(&batch, 98.0).value.is_nan());
    }
}
