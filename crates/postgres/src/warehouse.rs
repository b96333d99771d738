//! Partitions, dimensions and facts of the `dwh` schema.

use crate::ddl::{default_partition_ddl, index_ddl, month_partition_ddl, PARTITIONED_FACT_DDL};
use crate::session::{map_db_error, PgSession, StoreFuture};
use async_trait::async_trait;
use retaildwh_core::{
    CustomerRow, DescriptorError, DimensionStore, FactRecord, FactStore, IndexSpec,
    MonthPartition, PartitionStore, ProductRow, Session, StoreError, StoreResult, SurrogateKey,
    TimeRow,
};
use tracing::debug;

fn descriptor_error(err: DescriptorError) -> StoreError {
    StoreError::database(err.to_string())
}

#[async_trait]
impl PartitionStore for PgSession {
    async fn create_partitioned_fact_table(&mut self) -> StoreResult<()> {
        self.execute_script("create partitioned fact table", PARTITIONED_FACT_DDL)
            .await
    }

    async fn create_month_partition(&mut self, month: &MonthPartition) -> StoreResult<()> {
        let ddl = month_partition_ddl(month).map_err(descriptor_error)?;
        debug!(partition = %month, "Creating month partition");
        self.execute_script("create month partition", &ddl).await
    }

    async fn create_default_partition(&mut self) -> StoreResult<()> {
        let ddl = default_partition_ddl().map_err(descriptor_error)?;
        self.execute_script("create default partition", &ddl).await
    }

    async fn create_index(&mut self, index: &IndexSpec) -> StoreResult<()> {
        let ddl = index_ddl(index).map_err(descriptor_error)?;
        self.execute_script("create index", &ddl).await
    }

    async fn count_invalid_sales(&mut self) -> StoreResult<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM dwh.fact_sales \
             WHERE quantity_sold <= 0 OR revenue < 0 OR sale_date IS NULL",
        )
        .fetch_one(self.conn())
        .await
        .map_err(|e| map_db_error("check sales invariants", e))
    }
}

// The no-op DO UPDATE makes RETURNING yield the existing key on conflict,
// which DO NOTHING would not.
#[async_trait]
impl DimensionStore for PgSession {
    async fn upsert_product(&mut self, row: &ProductRow) -> StoreResult<SurrogateKey> {
        sqlx::query_scalar(
            r#"
            INSERT INTO dwh.dim_product (product_name, category)
            VALUES ($1, $2)
            ON CONFLICT (product_name) DO UPDATE SET product_name = EXCLUDED.product_name
            RETURNING product_id
            "#,
        )
        .bind(&row.product_name)
        .bind(&row.category)
        .fetch_one(self.conn())
        .await
        .map_err(|e| map_db_error("resolve product", e))
    }

    async fn upsert_customer(&mut self, row: &CustomerRow) -> StoreResult<SurrogateKey> {
        sqlx::query_scalar(
            r#"
            INSERT INTO dwh.dim_customer (customer_id, location)
            VALUES ($1, $2)
            ON CONFLICT (customer_id) DO UPDATE SET customer_id = EXCLUDED.customer_id
            RETURNING customer_id
            "#,
        )
        .bind(row.customer_id)
        .bind(&row.location)
        .fetch_one(self.conn())
        .await
        .map_err(|e| map_db_error("resolve customer", e))
    }

    async fn upsert_time(&mut self, row: &TimeRow) -> StoreResult<SurrogateKey> {
        sqlx::query_scalar(
            r#"
            INSERT INTO dwh.dim_time (full_date, day, month, quarter, year)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (full_date) DO UPDATE SET full_date = EXCLUDED.full_date
            RETURNING time_id
            "#,
        )
        .bind(row.full_date)
        .bind(row.day)
        .bind(row.month)
        .bind(row.quarter)
        .bind(row.year)
        .fetch_one(self.conn())
        .await
        .map_err(|e| map_db_error("resolve date", e))
    }

    async fn upsert_location(&mut self, country_name: &str) -> StoreResult<SurrogateKey> {
        sqlx::query_scalar(
            r#"
            INSERT INTO dwh.dim_location (country_name)
            VALUES ($1)
            ON CONFLICT (country_name) DO UPDATE SET country_name = EXCLUDED.country_name
            RETURNING country_id
            "#,
        )
        .bind(country_name)
        .fetch_one(self.conn())
        .await
        .map_err(|e| map_db_error("resolve location", e))
    }
}

impl PgSession {
    fn insert_fact_row<'a>(&'a mut self, fact: &'a FactRecord) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            sqlx::query(
                r#"
            INSERT INTO dwh.fact_sales_partitioned
                (product_id, customer_id, quantity_sold, sale_date, revenue)
            VALUES ($1, $2, $3, $4, $5)
            "#,
            )
            .bind(fact.product_id)
            .bind(fact.customer_id)
            .bind(fact.quantity_sold)
            .bind(fact.sale_date)
            .bind(fact.revenue)
            .execute(self.conn())
            .await
            .map_err(|e| map_db_error("insert fact", e))?;
            Ok(())
        })
    }
}

#[async_trait]
impl FactStore for PgSession {
    async fn insert_fact(&mut self, fact: &FactRecord) -> StoreResult<()> {
        if !self.in_transaction() {
            return self.insert_fact_row(fact).await;
        }

        self.execute_script("open fact savepoint", "SAVEPOINT fact_insert")
            .await?;
        match self.insert_fact_row(fact).await {
            Ok(()) => {
                self.execute_script("release fact savepoint", "RELEASE SAVEPOINT fact_insert")
                    .await
            }
            Err(e) => {
                self.execute_script("roll back fact savepoint", "ROLLBACK TO SAVEPOINT fact_insert")
                    .await?;
                Err(e)
            }
        }
    }
}
