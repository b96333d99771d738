//! Batches and a ready-to-load in-memory warehouse.

#![allow(dead_code)]

use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};
use retaildwh_core::mocks::MemoryWarehouse;
use retaildwh_core::{CleanedBatch, SourceRow};
use retaildwh_engine::{Warehouse, WarehouseConfig};
use rust_decimal::Decimal;
use std::str::FromStr;

pub fn at(year: i32, month: u32, day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .unwrap()
        .and_hms_opt(8, 26, 0)
        .unwrap()
}

pub struct Sale {
    pub stockcode: &'static str,
    pub description: Option<&'static str>,
    pub quantity: i64,
    pub invoicedate: NaiveDateTime,
    pub unitprice: &'static str,
    pub customerid: Option<i64>,
    pub country: Option<&'static str>,
}

impl Sale {
    pub fn new(stockcode: &'static str, description: &'static str, customerid: Option<i64>) -> Self {
        Sale {
            stockcode,
            description: Some(description),
            quantity: 6,
            invoicedate: at(2024, 12, 1),
            unitprice: "2.55",
            customerid,
            country: Some("United Kingdom"),
        }
    }

    pub fn quantity(mut self, quantity: i64) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn on(mut self, invoicedate: NaiveDateTime) -> Self {
        self.invoicedate = invoicedate;
        self
    }

    pub fn country(mut self, country: Option<&'static str>) -> Self {
        self.country = country;
        self
    }

    pub fn row(&self, invoiceno: &str) -> SourceRow {
        SourceRow {
            invoiceno: invoiceno.to_string(),
            stockcode: self.stockcode.to_string(),
            description: self.description.map(str::to_string),
            quantity: self.quantity,
            invoicedate: self.invoicedate,
            unitprice: Decimal::from_str(self.unitprice).unwrap(),
            customerid: self.customerid,
            country: self.country.map(str::to_string),
        }
    }
}

pub fn batch(sales: &[Sale]) -> CleanedBatch {
    sales
        .iter()
        .enumerate()
        .map(|(i, sale)| sale.row(&format!("5363{i:02}")))
        .collect()
}

/// Two loadable rows and one without a customer.
pub fn three_row_batch() -> CleanedBatch {
    batch(&[
        Sale::new("85123A", "WHITE HANGING HEART T-LIGHT HOLDER", Some(17850)),
        Sale::new("71053", "WHITE METAL LANTERN", Some(13047)).quantity(8),
        Sale::new("84406B", "CREAM CUPID HEARTS COAT HANGER", None),
    ])
}

/// A warehouse that has gone through `setup`.
pub async fn ready(config: WarehouseConfig) -> Result<(Warehouse, MemoryWarehouse)> {
    let warehouse = Warehouse::new(config)?;
    let mut store = MemoryWarehouse::new();
    warehouse.setup(&mut store).await?;
    Ok((warehouse, store))
}

pub async fn ready_default() -> Result<(Warehouse, MemoryWarehouse)> {
    ready(WarehouseConfig::default()).await
}
