//! Range partition and index descriptors for the fact table.
//!
//! Partition names and bounds are always derived from a validated
//! `(year, month)` pair, never spliced in from free text. A `PartitionLayout`
//! holds the declared months in order and routes any timestamp to exactly one
//! segment, falling back to the default partition.

use crate::error::DescriptorError;
use crate::ident::SqlIdent;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use std::fmt;

/// Name of the catch-all partition.
pub const DEFAULT_PARTITION: &str = "sales_default";

const MIN_YEAR: i32 = 1900;
const MAX_YEAR: i32 = 9999;

/// One calendar month of the fact table: `[first day, first day of next month)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonthPartition {
    year: i32,
    month: u32,
}

impl MonthPartition {
    /// Validate and build a month partition.
    pub fn new(year: i32, month: u32) -> Result<Self, DescriptorError> {
        if !(1..=12).contains(&month) {
            return Err(DescriptorError::InvalidMonth(month));
        }
        if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
            return Err(DescriptorError::InvalidYear(year));
        }
        Ok(MonthPartition { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// `sales_YYYY_MM`.
    pub fn name(&self) -> SqlIdent {
        SqlIdent::derived(self.to_string())
    }

    /// First day of the month (inclusive bound).
    pub fn start(&self) -> NaiveDate {
        first_of_month(self.year, self.month)
    }

    /// First day of the following month (exclusive bound).
    pub fn end(&self) -> NaiveDate {
        if self.month == 12 {
            first_of_month(self.year + 1, 1)
        } else {
            first_of_month(self.year, self.month + 1)
        }
    }
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    // Year and month were validated at construction; chrono supports
    // years well beyond MAX_YEAR + 1.
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MAX)
}

impl fmt::Display for MonthPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sales_{:04}_{:02}", self.year, self.month)
    }
}

/// The segment a fact row is stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionTarget {
    /// A declared month range
    Month(MonthPartition),
    /// The catch-all partition
    Default,
}

impl PartitionTarget {
    /// Name of the partition table.
    pub fn name(&self) -> String {
        match self {
            PartitionTarget::Month(month) => month.to_string(),
            PartitionTarget::Default => DEFAULT_PARTITION.to_string(),
        }
    }
}

/// The ordered, non-overlapping set of declared month partitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionLayout {
    months: Vec<MonthPartition>,
}

impl PartitionLayout {
    /// Build a layout from arbitrary months; rejects duplicates, which are the
    /// only way two month ranges can overlap.
    pub fn new(mut months: Vec<MonthPartition>) -> Result<Self, DescriptorError> {
        months.sort();
        if let Some(pair) = months.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(DescriptorError::OverlappingRanges {
                first: pair[0].to_string(),
                second: pair[1].to_string(),
            });
        }
        Ok(PartitionLayout { months })
    }

    /// Twelve partitions for every listed year.
    pub fn for_years(years: &[i32]) -> Result<Self, DescriptorError> {
        let mut months = Vec::with_capacity(years.len() * 12);
        for &year in years {
            for month in 1..=12 {
                months.push(MonthPartition::new(year, month)?);
            }
        }
        PartitionLayout::new(months)
    }

    /// Declared months in ascending order.
    pub fn months(&self) -> &[MonthPartition] {
        &self.months
    }

    pub fn len(&self) -> usize {
        self.months.len()
    }

    pub fn is_empty(&self) -> bool {
        self.months.is_empty()
    }

    /// The single segment `ts` belongs to.
    pub fn route(&self, ts: NaiveDateTime) -> PartitionTarget {
        let key = (ts.year(), ts.month());
        match self
            .months
            .binary_search_by(|m| (m.year, m.month).cmp(&key))
        {
            Ok(idx) => PartitionTarget::Month(self.months[idx]),
            Err(_) => PartitionTarget::Default,
        }
    }
}

/// A secondary index on one column of a warehouse table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexSpec {
    pub name: &'static str,
    pub table: &'static str,
    pub column: &'static str,
}

impl IndexSpec {
    const fn new(name: &'static str, table: &'static str, column: &'static str) -> Self {
        IndexSpec { name, table, column }
    }
}

/// Secondary indexes of the star schema.
pub const STAR_SCHEMA_INDEXES: [IndexSpec; 12] = [
    IndexSpec::new("idx_fact_sales_date", "fact_sales", "sale_date"),
    IndexSpec::new("idx_fact_sales_product", "fact_sales", "product_id"),
    IndexSpec::new("idx_fact_sales_customer", "fact_sales", "customer_id"),
    IndexSpec::new("idx_fact_sales_part_product", "fact_sales_partitioned", "product_id"),
    IndexSpec::new("idx_fact_sales_part_customer", "fact_sales_partitioned", "customer_id"),
    IndexSpec::new("idx_dim_product_name", "dim_product", "product_name"),
    IndexSpec::new("idx_dim_product_category", "dim_product", "category"),
    IndexSpec::new("idx_dim_customer_location", "dim_customer", "location"),
    IndexSpec::new("idx_dim_time_year", "dim_time", "year"),
    IndexSpec::new("idx_dim_time_month", "dim_time", "month"),
    IndexSpec::new("idx_dim_time_quarter", "dim_time", "quarter"),
    IndexSpec::new("idx_dim_location_name", "dim_location", "country_name"),
];

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_month_validation() {
        assert_eq!(MonthPartition::new(2024, 0), Err(DescriptorError::InvalidMonth(0)));
        assert_eq!(MonthPartition::new(2024, 13), Err(DescriptorError::InvalidMonth(13)));
        assert_eq!(MonthPartition::new(1899, 5), Err(DescriptorError::InvalidYear(1899)));
        assert!(MonthPartition::new(9999, 12).is_ok());
    }

    #[test]
    fn test_name_and_bounds() {
        let dec = MonthPartition::new(2024, 12).unwrap();
        assert_eq!(dec.name().as_str(), "sales_2024_12");
        assert_eq!(dec.start(), NaiveDate::from_ymd_opt(2024, 12, 1).unwrap());
        assert_eq!(dec.end(), NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());

        let mar = MonthPartition::new(2023, 3).unwrap();
        assert_eq!(mar.name().as_str(), "sales_2023_03");
        assert_eq!(mar.end(), NaiveDate::from_ymd_opt(2023, 4, 1).unwrap());
    }

    #[test]
    fn test_adjacent_months_share_only_the_boundary() {
        let layout = PartitionLayout::for_years(&[2023, 2024]).unwrap();
        for pair in layout.months().windows(2) {
            assert_eq!(pair[0].end(), pair[1].start());
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_every_timestamp_routes_to_exactly_one_segment() {
        let layout = PartitionLayout::for_years(&[2023, 2024, 2025]).unwrap();
        assert_eq!(layout.len(), 36);

        let mut day = NaiveDate::from_ymd_opt(2022, 11, 1).unwrap();
        let last = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
        while day < last {
            let at = day.and_hms_opt(23, 59, 59).unwrap();
            let within = |m: &MonthPartition| m.start() <= day && day < m.end();
            let matching = layout.months().iter().filter(|m| within(m)).count();
            match layout.route(at) {
                PartitionTarget::Month(m) => {
                    assert_eq!(matching, 1);
                    assert!(within(&m));
                }
                PartitionTarget::Default => assert_eq!(matching, 0),
            }
            day = day.succ_opt().unwrap();
        }
    }

    #[test]
    fn test_out_of_range_routes_to_default() {
        let layout = PartitionLayout::for_years(&[2023]).unwrap();
        assert_eq!(layout.route(ts(2010, 12, 1)), PartitionTarget::Default);
        assert_eq!(PartitionTarget::Default.name(), "sales_default");
        assert_eq!(
            layout.route(ts(2023, 1, 1)).name(),
            "sales_2023_01".to_string()
        );
    }

    #[test]
    fn test_duplicate_months_are_overlaps() {
        let err = PartitionLayout::for_years(&[2024, 2024]).unwrap_err();
        assert!(matches!(err, DescriptorError::OverlappingRanges { .. }));
    }

    #[test]
    fn test_index_names_are_valid_identifiers() {
        for spec in STAR_SCHEMA_INDEXES {
            assert!(SqlIdent::parse(spec.name).is_ok());
            assert!(SqlIdent::parse(spec.table).is_ok());
            assert!(SqlIdent::parse(spec.column).is_ok());
        }
    }
}
