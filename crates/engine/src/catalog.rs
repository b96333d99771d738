//! Catalog registry: warehouse objects, their columns and row counts.

use crate::error::{EngineError, EngineResult};
use crate::scope;
use retaildwh_core::{
    CatalogStore, ColumnId, ColumnRegistration, IntrospectedObject, ObjectDescription, ObjectId,
    ObjectRegistration, QualifiedName, SqlIdent, FACT_SALES, FACT_SALES_PARTITIONED,
    WAREHOUSE_SCHEMA,
};
use tracing::{debug, info};

/// Quality metrics shown per object by `describe_object`.
pub const RECENT_QUALITY_LIMIT: i64 = 10;

/// Object type recorded for introspected base tables.
pub const TABLE_OBJECT_TYPE: &str = "TABLE";

/// Maps an `information_schema.tables.table_type` to the recorded object type.
pub fn object_type_for(table_type: &str) -> &str {
    if table_type == "BASE TABLE" {
        TABLE_OBJECT_TYPE
    } else {
        table_type
    }
}

/// Registers and describes catalog objects on one connection.
pub struct CatalogRegistry<'a, S> {
    store: &'a mut S,
}

impl<'a, S: CatalogStore> CatalogRegistry<'a, S> {
    pub fn new(store: &'a mut S) -> Self {
        CatalogRegistry { store }
    }

    /// Upsert an object; a re-registration refreshes `last_modified` and
    /// `description` and keeps the id.
    pub async fn register_object(&mut self, registration: &ObjectRegistration) -> EngineResult<ObjectId> {
        self.store.begin().await?;
        let result = self.store.upsert_object(registration).await.map_err(Into::into);
        scope::finish(self.store, result).await
    }

    /// Upsert a column of a registered object.
    pub async fn register_column(
        &mut self,
        object_id: ObjectId,
        registration: &ColumnRegistration,
    ) -> EngineResult<ColumnId> {
        self.store.begin().await?;
        let result = self
            .store
            .upsert_column(object_id, registration)
            .await
            .map_err(Into::into);
        scope::finish(self.store, result).await
    }

    /// Count the object's live rows and persist the count.
    pub async fn update_row_count(&mut self, object_id: ObjectId) -> EngineResult<i64> {
        self.store.begin().await?;
        let result = self.refresh_row_count(object_id).await;
        scope::finish(self.store, result).await
    }

    async fn refresh_row_count(&mut self, object_id: ObjectId) -> EngineResult<i64> {
        let object = self
            .store
            .object_by_id(object_id)
            .await?
            .ok_or(EngineError::UnknownObject(object_id))?;
        let relation = QualifiedName::parse(&object.schema_name, &object.object_name)?;
        let row_count = self.store.count_rows(&relation).await?;
        self.store.set_row_count(object_id, row_count).await?;
        debug!(object = %relation, row_count, "Refreshed row count");
        Ok(row_count)
    }

    /// Register every table and view of `schema` with its columns and row
    /// count. Returns the number of objects scanned.
    pub async fn scan_objects(&mut self, schema: &str) -> EngineResult<usize> {
        let schema = SqlIdent::parse(schema)?;
        let objects = self.store.introspect_schema(&schema).await?;
        for object in &objects {
            self.store.begin().await?;
            let result = self.register_introspected(&schema, object).await;
            scope::finish(self.store, result).await?;
        }
        info!(schema = %schema, objects = objects.len(), "Registered objects from schema");
        Ok(objects.len())
    }

    async fn register_introspected(
        &mut self,
        schema: &SqlIdent,
        object: &IntrospectedObject,
    ) -> EngineResult<ObjectId> {
        let registration = ObjectRegistration::new(
            schema.as_str(),
            object.name.as_str(),
            object_type_for(&object.table_type),
        );
        let object_id = self.store.upsert_object(&registration).await?;
        for column in &object.columns {
            let mut column_registration =
                ColumnRegistration::new(column.name.as_str(), column.data_type.as_str(), column.is_nullable);
            column_registration.is_primary_key = column.is_primary_key;
            self.store.upsert_column(object_id, &column_registration).await?;
        }
        self.refresh_row_count(object_id).await?;
        Ok(object_id)
    }

    /// Id of a registered object.
    pub async fn lookup_object(&mut self, schema: &str, name: &str) -> EngineResult<ObjectId> {
        self.store
            .find_object(schema, name)
            .await?
            .map(|object| object.object_id)
            .ok_or_else(|| EngineError::UnregisteredObject {
                schema: schema.to_string(),
                name: name.to_string(),
            })
    }

    /// The object with its columns, lineage and recent quality metrics.
    pub async fn describe_object(
        &mut self,
        schema: &str,
        name: &str,
    ) -> EngineResult<Option<ObjectDescription>> {
        let Some(object) = self.store.find_object(schema, name).await? else {
            return Ok(None);
        };
        let columns = self.store.list_columns(object.object_id).await?;
        let lineage = self.store.list_lineage(object.object_id).await?;
        let quality = self
            .store
            .recent_quality(object.object_id, RECENT_QUALITY_LIMIT)
            .await?;
        Ok(Some(ObjectDescription {
            object,
            columns,
            lineage,
            quality,
        }))
    }

    /// Apply the curated descriptions and key metadata of the star schema.
    /// Returns the number of objects registered.
    pub async fn register_star_schema(&mut self) -> EngineResult<usize> {
        let curated = star_schema_registrations();
        self.store.begin().await?;
        let result = self.register_curated(&curated).await;
        scope::finish(self.store, result).await?;
        info!(objects = curated.len(), "Applied star schema registrations");
        Ok(curated.len())
    }

    async fn register_curated(
        &mut self,
        curated: &[(ObjectRegistration, Vec<ColumnRegistration>)],
    ) -> EngineResult<()> {
        for (object, columns) in curated {
            let object_id = self.store.upsert_object(object).await?;
            for column in columns {
                self.store.upsert_column(object_id, column).await?;
            }
        }
        Ok(())
    }
}

fn fact_columns() -> Vec<ColumnRegistration> {
    vec![
        ColumnRegistration::new("product_id", "bigint", false)
            .references("dwh.dim_product", "product_id")
            .describe("Reference to product dimension"),
        ColumnRegistration::new("customer_id", "bigint", false)
            .references("dwh.dim_customer", "customer_id")
            .describe("Reference to customer dimension"),
        ColumnRegistration::new("quantity_sold", "integer", false).describe("Quantity of product sold"),
        ColumnRegistration::new("sale_date", "timestamp without time zone", false)
            .describe("Date of the sale"),
        ColumnRegistration::new("revenue", "numeric", false).describe("Total revenue from the sale"),
    ]
}

/// Curated catalog entries for the fact and dimension tables.
pub fn star_schema_registrations() -> Vec<(ObjectRegistration, Vec<ColumnRegistration>)> {
    let table = |name: &str, description: &str| {
        ObjectRegistration::new(WAREHOUSE_SCHEMA, name, TABLE_OBJECT_TYPE).with_description(description)
    };

    let mut legacy_fact = vec![ColumnRegistration::new("id", "bigint", false)
        .primary_key()
        .describe("Primary key")];
    legacy_fact.extend(fact_columns());

    let mut partitioned_fact = vec![ColumnRegistration::new("id", "bigint", false)
        .describe("Row identifier, unique per load")];
    partitioned_fact.extend(fact_columns());

    vec![
        (table(FACT_SALES, "Main fact table for sales transactions"), legacy_fact),
        (
            table(
                FACT_SALES_PARTITIONED,
                "Sales transactions partitioned by month of sale_date",
            ),
            partitioned_fact,
        ),
        (
            table("dim_product", "Product dimension table"),
            vec![
                ColumnRegistration::new("product_id", "bigint", false)
                    .primary_key()
                    .describe("Primary key"),
                ColumnRegistration::new("product_name", "text", false).describe("Name of the product"),
                ColumnRegistration::new("category", "text", true).describe("Product category"),
            ],
        ),
        (
            table("dim_customer", "Customer dimension table"),
            vec![
                ColumnRegistration::new("customer_id", "bigint", false)
                    .primary_key()
                    .describe("Customer identifier from the source"),
                ColumnRegistration::new("location", "text", true)
                    .describe("Country of the customer's first recorded sale"),
            ],
        ),
        (
            table("dim_time", "Calendar date dimension table"),
            vec![
                ColumnRegistration::new("time_id", "bigint", false)
                    .primary_key()
                    .describe("Primary key"),
                ColumnRegistration::new("full_date", "date", false).describe("Calendar date"),
                ColumnRegistration::new("day", "integer", true).describe("Day of the month, 1-31"),
                ColumnRegistration::new("month", "integer", true).describe("Month of the year, 1-12"),
                ColumnRegistration::new("quarter", "integer", true).describe("Quarter of the year, 1-4"),
                ColumnRegistration::new("year", "integer", true).describe("Calendar year"),
            ],
        ),
        (
            table("dim_location", "Country dimension table"),
            vec![
                ColumnRegistration::new("country_id", "bigint", false)
                    .primary_key()
                    .describe("Primary key"),
                ColumnRegistration::new("country_name", "text", false).describe("Country name"),
            ],
        ),
    ]
}
