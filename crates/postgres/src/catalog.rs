//! `CatalogStore` over `dwh_metadata` and `information_schema`.

use crate::rows::{
    ColumnRow, IntrospectedColumnRow, IntrospectedTableRow, LineageRow, ObjectRow, QualityRow,
};
use crate::session::{map_db_error, PgSession};
use async_trait::async_trait;
use retaildwh_core::{
    CatalogObject, CatalogStore, ColumnDefinition, ColumnId, ColumnRegistration,
    DataQualityMetric, IntrospectedColumn, IntrospectedObject, LineageEntry, ObjectId,
    ObjectRegistration, QualifiedName, SqlIdent, StoreError, StoreResult,
};
use std::collections::BTreeMap;

const OBJECT_COLUMNS: &str = "object_id, schema_name, object_name, object_type, created_date, \
                              last_modified, description, row_count";

#[async_trait]
impl CatalogStore for PgSession {
    async fn upsert_object(&mut self, registration: &ObjectRegistration) -> StoreResult<ObjectId> {
        sqlx::query_scalar(
            r#"
            INSERT INTO dwh_metadata.dwh_objects (object_name, object_type, schema_name, description)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (schema_name, object_name)
            DO UPDATE SET last_modified = LOCALTIMESTAMP, description = EXCLUDED.description
            RETURNING object_id
            "#,
        )
        .bind(&registration.object_name)
        .bind(&registration.object_type)
        .bind(&registration.schema_name)
        .bind(&registration.description)
        .fetch_one(self.conn())
        .await
        .map_err(|e| map_db_error("register object", e))
    }

    async fn upsert_column(
        &mut self,
        object_id: ObjectId,
        registration: &ColumnRegistration,
    ) -> StoreResult<ColumnId> {
        sqlx::query_scalar(
            r#"
            INSERT INTO dwh_metadata.column_definitions
                (object_id, column_name, data_type, is_nullable, is_primary_key,
                 is_foreign_key, references_table, references_column, description)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (object_id, column_name)
            DO UPDATE SET
                data_type = EXCLUDED.data_type,
                is_nullable = EXCLUDED.is_nullable,
                is_primary_key = EXCLUDED.is_primary_key,
                is_foreign_key = EXCLUDED.is_foreign_key,
                references_table = EXCLUDED.references_table,
                references_column = EXCLUDED.references_column,
                description = EXCLUDED.description
            RETURNING column_id
            "#,
        )
        .bind(object_id)
        .bind(&registration.column_name)
        .bind(&registration.data_type)
        .bind(registration.is_nullable)
        .bind(registration.is_primary_key)
        .bind(registration.is_foreign_key)
        .bind(&registration.references_table)
        .bind(&registration.references_column)
        .bind(&registration.description)
        .fetch_one(self.conn())
        .await
        .map_err(|e| map_db_error("register column", e))
    }

    async fn find_object(&mut self, schema: &str, name: &str) -> StoreResult<Option<CatalogObject>> {
        let sql = format!(
            "SELECT {OBJECT_COLUMNS} FROM dwh_metadata.dwh_objects \
             WHERE schema_name = $1 AND object_name = $2"
        );
        let row: Option<ObjectRow> = sqlx::query_as(&sql)
            .bind(schema)
            .bind(name)
            .fetch_optional(self.conn())
            .await
            .map_err(|e| map_db_error("find object", e))?;
        Ok(row.map(CatalogObject::from))
    }

    async fn object_by_id(&mut self, object_id: ObjectId) -> StoreResult<Option<CatalogObject>> {
        let sql = format!("SELECT {OBJECT_COLUMNS} FROM dwh_metadata.dwh_objects WHERE object_id = $1");
        let row: Option<ObjectRow> = sqlx::query_as(&sql)
            .bind(object_id)
            .fetch_optional(self.conn())
            .await
            .map_err(|e| map_db_error("load object", e))?;
        Ok(row.map(CatalogObject::from))
    }

    async fn count_rows(&mut self, relation: &QualifiedName) -> StoreResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", relation.quoted());
        sqlx::query_scalar(&sql)
            .fetch_one(self.conn())
            .await
            .map_err(|e| map_db_error(&format!("count rows of {relation}"), e))
    }

    async fn set_row_count(&mut self, object_id: ObjectId, row_count: i64) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE dwh_metadata.dwh_objects \
             SET row_count = $1, last_modified = LOCALTIMESTAMP WHERE object_id = $2",
        )
        .bind(row_count)
        .bind(object_id)
        .execute(self.conn())
        .await
        .map_err(|e| map_db_error("update row count", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("object_id {object_id}")));
        }
        Ok(())
    }

    async fn introspect_schema(&mut self, schema: &SqlIdent) -> StoreResult<Vec<IntrospectedObject>> {
        let tables: Vec<IntrospectedTableRow> = sqlx::query_as(
            r#"
            SELECT table_name::text AS table_name, table_type::text AS table_type
            FROM information_schema.tables
            WHERE table_schema = $1
            ORDER BY table_name
            "#,
        )
        .bind(schema.as_str())
        .fetch_all(self.conn())
        .await
        .map_err(|e| map_db_error("list relations", e))?;

        let columns: Vec<IntrospectedColumnRow> = sqlx::query_as(
            r#"
            SELECT
                c.table_name::text AS table_name,
                c.column_name::text AS column_name,
                c.data_type::text AS data_type,
                (c.is_nullable = 'YES') AS is_nullable,
                EXISTS (
                    SELECT 1
                    FROM information_schema.table_constraints tc
                    JOIN information_schema.key_column_usage kcu
                      ON tc.constraint_name = kcu.constraint_name
                     AND tc.table_schema = kcu.table_schema
                     AND tc.table_name = kcu.table_name
                    WHERE tc.constraint_type = 'PRIMARY KEY'
                      AND tc.table_schema = c.table_schema
                      AND tc.table_name = c.table_name
                      AND kcu.column_name = c.column_name
                ) AS is_primary_key
            FROM information_schema.columns c
            WHERE c.table_schema = $1
            ORDER BY c.table_name, c.ordinal_position
            "#,
        )
        .bind(schema.as_str())
        .fetch_all(self.conn())
        .await
        .map_err(|e| map_db_error("list columns", e))?;

        let mut by_table: BTreeMap<String, Vec<IntrospectedColumn>> = BTreeMap::new();
        for column in columns {
            by_table
                .entry(column.table_name)
                .or_default()
                .push(IntrospectedColumn {
                    name: column.column_name,
                    data_type: column.data_type,
                    is_nullable: column.is_nullable,
                    is_primary_key: column.is_primary_key,
                });
        }

        Ok(tables
            .into_iter()
            .map(|table| IntrospectedObject {
                columns: by_table.remove(&table.table_name).unwrap_or_default(),
                name: table.table_name,
                table_type: table.table_type,
            })
            .collect())
    }

    async fn list_columns(&mut self, object_id: ObjectId) -> StoreResult<Vec<ColumnDefinition>> {
        let rows: Vec<ColumnRow> = sqlx::query_as(
            r#"
            SELECT column_id, object_id, column_name, data_type, is_nullable, is_primary_key,
                   is_foreign_key, references_table, references_column, description
            FROM dwh_metadata.column_definitions
            WHERE object_id = $1
            ORDER BY column_id
            "#,
        )
        .bind(object_id)
        .fetch_all(self.conn())
        .await
        .map_err(|e| map_db_error("list column definitions", e))?;
        Ok(rows.into_iter().map(ColumnDefinition::from).collect())
    }

    async fn list_lineage(&mut self, object_id: ObjectId) -> StoreResult<Vec<LineageEntry>> {
        let rows: Vec<LineageRow> = sqlx::query_as(
            r#"
            SELECT l.source_object, l.transformation_logic,
                   r.start_time AS etl_start_time, r.records_processed
            FROM dwh_metadata.data_lineage l
            JOIN dwh_metadata.etl_runs r ON l.etl_run_id = r.run_id
            WHERE l.target_object_id = $1
            ORDER BY l.last_updated DESC, l.lineage_id DESC
            "#,
        )
        .bind(object_id)
        .fetch_all(self.conn())
        .await
        .map_err(|e| map_db_error("list lineage", e))?;
        Ok(rows.into_iter().map(LineageEntry::from).collect())
    }

    async fn recent_quality(
        &mut self,
        object_id: ObjectId,
        limit: i64,
    ) -> StoreResult<Vec<DataQualityMetric>> {
        let rows: Vec<QualityRow> = sqlx::query_as(
            r#"
            SELECT quality_id, object_id, check_date, metric_name,
                   metric_value::float8 AS metric_value, threshold::float8 AS threshold,
                   pass_fail, details
            FROM dwh_metadata.data_quality
            WHERE object_id = $1
            ORDER BY check_date DESC, quality_id DESC
            LIMIT $2
            "#,
        )
        .bind(object_id)
        .bind(limit)
        .fetch_all(self.conn())
        .await
        .map_err(|e| map_db_error("list quality metrics", e))?;
        rows.into_iter().map(DataQualityMetric::try_from).collect()
    }
}
