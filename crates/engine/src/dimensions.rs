//! Dimension resolver.
//!
//! Each dimension collects the distinct natural keys of a batch in first-seen
//! order and resolves every key with one conflict-aware upsert. A dimension
//! runs in its own scope, committed before the next one starts, so a failure
//! leaves the dimensions resolved before it in place.

use crate::error::EngineResult;
use crate::scope;
use chrono::NaiveDate;
use retaildwh_core::{
    CleanedBatch, CustomerRow, DimensionKind, DimensionStore, ProductRow, SurrogateKey, TimeRow,
    UNKNOWN_CATEGORY,
};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use tracing::{debug, info};

/// Natural key to surrogate key mappings of all four dimensions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DimensionMappings {
    /// Stock code to product key
    pub products: HashMap<String, SurrogateKey>,
    /// Customer id to customer key
    pub customers: HashMap<i64, SurrogateKey>,
    /// Calendar date to time key
    pub dates: HashMap<NaiveDate, SurrogateKey>,
    /// Country name to location key
    pub locations: HashMap<String, SurrogateKey>,
}

/// Distinct values in first-seen order.
fn distinct<T, I>(values: I) -> Vec<T>
where
    T: Eq + Hash + Clone,
    I: IntoIterator<Item = T>,
{
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|value| seen.insert(value.clone()))
        .collect()
}

pub struct DimensionResolver<'a, S> {
    store: &'a mut S,
}

impl<'a, S: DimensionStore> DimensionResolver<'a, S> {
    pub fn new(store: &'a mut S) -> Self {
        DimensionResolver { store }
    }

    /// Resolve all four dimensions in order: product, customer, time, location.
    pub async fn resolve_all(&mut self, batch: &CleanedBatch) -> EngineResult<DimensionMappings> {
        Ok(DimensionMappings {
            products: self.resolve_products(batch).await?,
            customers: self.resolve_customers(batch).await?,
            dates: self.resolve_dates(batch).await?,
            locations: self.resolve_locations(batch).await?,
        })
    }

    /// Stock code to product key. The product's natural key is its trimmed
    /// description; rows without one have no product. When a stock code
    /// appears with several descriptions the last one wins.
    pub async fn resolve_products(&mut self, batch: &CleanedBatch) -> EngineResult<HashMap<String, SurrogateKey>> {
        self.store.begin().await?;
        let result = self.upsert_products(batch).await;
        let mapping = scope::finish(self.store, result).await?;
        info!(dimension = %DimensionKind::Product, keys = mapping.len(), "Resolved dimension");
        Ok(mapping)
    }

    async fn upsert_products(&mut self, batch: &CleanedBatch) -> EngineResult<HashMap<String, SurrogateKey>> {
        let names = distinct(batch.rows().iter().filter_map(|row| row.product_name()));
        let mut keys = HashMap::with_capacity(names.len());
        for name in names {
            let row = ProductRow {
                product_name: name.to_string(),
                category: UNKNOWN_CATEGORY.to_string(),
            };
            let key = self.store.upsert_product(&row).await?;
            debug!(product = name, key, "Resolved product");
            keys.insert(name, key);
        }

        let mut mapping = HashMap::new();
        for row in batch.rows() {
            if let Some(key) = row.product_name().and_then(|name| keys.get(name)) {
                mapping.insert(row.stockcode.clone(), *key);
            }
        }
        Ok(mapping)
    }

    /// Customer id to customer key. Rows without a customer id are skipped; a
    /// new customer's location is the country of its first row.
    pub async fn resolve_customers(&mut self, batch: &CleanedBatch) -> EngineResult<HashMap<i64, SurrogateKey>> {
        self.store.begin().await?;
        let result = self.upsert_customers(batch).await;
        let mapping = scope::finish(self.store, result).await?;
        info!(dimension = %DimensionKind::Customer, keys = mapping.len(), "Resolved dimension");
        Ok(mapping)
    }

    async fn upsert_customers(&mut self, batch: &CleanedBatch) -> EngineResult<HashMap<i64, SurrogateKey>> {
        let mut first_location: HashMap<i64, Option<&str>> = HashMap::new();
        let mut order = Vec::new();
        for row in batch.rows() {
            if let Some(customer_id) = row.customerid {
                if !first_location.contains_key(&customer_id) {
                    first_location.insert(customer_id, row.country_name());
                    order.push(customer_id);
                }
            }
        }

        let mut mapping = HashMap::with_capacity(order.len());
        for customer_id in order {
            let row = CustomerRow {
                customer_id,
                location: first_location
                    .get(&customer_id)
                    .copied()
                    .flatten()
                    .map(str::to_string),
            };
            let key = self.store.upsert_customer(&row).await?;
            debug!(customer_id, key, "Resolved customer");
            mapping.insert(customer_id, key);
        }
        Ok(mapping)
    }

    /// Calendar date to time key.
    pub async fn resolve_dates(&mut self, batch: &CleanedBatch) -> EngineResult<HashMap<NaiveDate, SurrogateKey>> {
        self.store.begin().await?;
        let result = self.upsert_dates(batch).await;
        let mapping = scope::finish(self.store, result).await?;
        info!(dimension = %DimensionKind::Time, keys = mapping.len(), "Resolved dimension");
        Ok(mapping)
    }

    async fn upsert_dates(&mut self, batch: &CleanedBatch) -> EngineResult<HashMap<NaiveDate, SurrogateKey>> {
        let dates = distinct(batch.rows().iter().map(|row| row.sale_date()));
        let mut mapping = HashMap::with_capacity(dates.len());
        for date in dates {
            let key = self.store.upsert_time(&TimeRow::from_date(date)).await?;
            mapping.insert(date, key);
        }
        Ok(mapping)
    }

    /// Country name to location key. Rows without a country are skipped.
    pub async fn resolve_locations(&mut self, batch: &CleanedBatch) -> EngineResult<HashMap<String, SurrogateKey>> {
        self.store.begin().await?;
        let result = self.upsert_locations(batch).await;
        let mapping = scope::finish(self.store, result).await?;
        info!(dimension = %DimensionKind::Location, keys = mapping.len(), "Resolved dimension");
        Ok(mapping)
    }

    async fn upsert_locations(&mut self, batch: &CleanedBatch) -> EngineResult<HashMap<String, SurrogateKey>> {
        let countries = distinct(batch.rows().iter().filter_map(|row| row.country_name()));
        let mut mapping = HashMap::with_capacity(countries.len());
        for country in countries {
            let key = self.store.upsert_location(country).await?;
            mapping.insert(country.to_string(), key);
        }
        Ok(mapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distinct_keeps_first_seen_order() {
        assert_eq!(distinct(vec![3, 1, 3, 2, 1]), vec![3, 1, 2]);
        assert_eq!(distinct(Vec::<&str>::new()), Vec::<&str>::new());
    }
}
