//! DDL for the metadata and warehouse schemas.
//!
//! Static statements are plain constants. Statements that name a partition or
//! an index are rendered from validated descriptors only, with every
//! identifier double-quoted.

use retaildwh_core::{
    DescriptorError, IndexSpec, MonthPartition, QualifiedName, SqlIdent, DEFAULT_PARTITION,
    FACT_SALES_PARTITIONED, WAREHOUSE_SCHEMA,
};

/// Catalog, run, lineage and quality tables.
pub const METADATA_SCHEMA_DDL: &str = r#"
CREATE SCHEMA IF NOT EXISTS dwh_metadata;

CREATE TABLE IF NOT EXISTS dwh_metadata.dwh_objects (
    object_id BIGSERIAL PRIMARY KEY,
    object_name VARCHAR(100) NOT NULL,
    object_type VARCHAR(50) NOT NULL,
    schema_name VARCHAR(50) NOT NULL,
    created_date TIMESTAMP NOT NULL DEFAULT LOCALTIMESTAMP,
    last_modified TIMESTAMP NOT NULL DEFAULT LOCALTIMESTAMP,
    description TEXT,
    row_count BIGINT,
    UNIQUE (schema_name, object_name)
);

CREATE TABLE IF NOT EXISTS dwh_metadata.column_definitions (
    column_id BIGSERIAL PRIMARY KEY,
    object_id BIGINT NOT NULL REFERENCES dwh_metadata.dwh_objects(object_id),
    column_name VARCHAR(100) NOT NULL,
    data_type VARCHAR(100) NOT NULL,
    is_nullable BOOLEAN NOT NULL,
    is_primary_key BOOLEAN NOT NULL DEFAULT FALSE,
    is_foreign_key BOOLEAN NOT NULL DEFAULT FALSE,
    references_table VARCHAR(100),
    references_column VARCHAR(100),
    description TEXT,
    UNIQUE (object_id, column_name)
);

CREATE TABLE IF NOT EXISTS dwh_metadata.etl_runs (
    run_id BIGSERIAL PRIMARY KEY,
    source_name VARCHAR(200) NOT NULL,
    start_time TIMESTAMP NOT NULL,
    end_time TIMESTAMP,
    status VARCHAR(20) NOT NULL CHECK (status IN ('RUNNING', 'SUCCESS', 'FAILED')),
    records_processed BIGINT,
    records_inserted BIGINT,
    records_updated BIGINT,
    records_rejected BIGINT,
    error_message TEXT
);

CREATE TABLE IF NOT EXISTS dwh_metadata.data_lineage (
    lineage_id BIGSERIAL PRIMARY KEY,
    target_object_id BIGINT NOT NULL REFERENCES dwh_metadata.dwh_objects(object_id),
    source_object VARCHAR(200) NOT NULL,
    etl_run_id BIGINT REFERENCES dwh_metadata.etl_runs(run_id),
    transformation_logic TEXT,
    last_updated TIMESTAMP NOT NULL DEFAULT LOCALTIMESTAMP
);

CREATE TABLE IF NOT EXISTS dwh_metadata.data_quality (
    quality_id BIGSERIAL PRIMARY KEY,
    object_id BIGINT NOT NULL REFERENCES dwh_metadata.dwh_objects(object_id),
    check_date TIMESTAMP NOT NULL DEFAULT LOCALTIMESTAMP,
    metric_name VARCHAR(100) NOT NULL,
    metric_value NUMERIC,
    threshold NUMERIC,
    pass_fail VARCHAR(5) NOT NULL CHECK (pass_fail IN ('PASS', 'FAIL')),
    details TEXT
);
"#;

/// Star schema tables and the quality log.
///
/// `dim_product.product_name` gets a unique index even on tables created
/// before it was declared unique; the product upsert relies on it.
pub const WAREHOUSE_SCHEMA_DDL: &str = r#"
CREATE SCHEMA IF NOT EXISTS dwh;

CREATE TABLE IF NOT EXISTS dwh.fact_sales (
    id BIGSERIAL PRIMARY KEY,
    product_id BIGINT,
    customer_id BIGINT,
    quantity_sold INTEGER,
    sale_date TIMESTAMP,
    revenue NUMERIC
);

CREATE TABLE IF NOT EXISTS dwh.dim_product (
    product_id BIGSERIAL PRIMARY KEY,
    product_name TEXT NOT NULL UNIQUE,
    category TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS uq_dim_product_name ON dwh.dim_product(product_name);

CREATE TABLE IF NOT EXISTS dwh.dim_customer (
    customer_id BIGINT PRIMARY KEY,
    location TEXT
);

CREATE TABLE IF NOT EXISTS dwh.dim_time (
    time_id BIGSERIAL PRIMARY KEY,
    full_date DATE NOT NULL UNIQUE,
    day INTEGER,
    month INTEGER,
    quarter INTEGER,
    year INTEGER
);

CREATE TABLE IF NOT EXISTS dwh.dim_location (
    country_id BIGSERIAL PRIMARY KEY,
    country_name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS dwh.data_quality_logs (
    id BIGSERIAL PRIMARY KEY,
    check_type VARCHAR(255),
    table_name VARCHAR(255),
    issue_description TEXT,
    detected_at TIMESTAMP DEFAULT LOCALTIMESTAMP
);
"#;

/// Range-partitioned fact storage. No primary key: one on a partitioned
/// table would have to include `sale_date`.
pub const PARTITIONED_FACT_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS dwh.fact_sales_partitioned (
    id BIGSERIAL,
    product_id BIGINT NOT NULL,
    customer_id BIGINT NOT NULL,
    quantity_sold INTEGER NOT NULL,
    sale_date TIMESTAMP NOT NULL,
    revenue NUMERIC NOT NULL
) PARTITION BY RANGE (sale_date)
"#;

fn parent_table() -> Result<QualifiedName, DescriptorError> {
    QualifiedName::parse(WAREHOUSE_SCHEMA, FACT_SALES_PARTITIONED)
}

/// `CREATE TABLE ... PARTITION OF ... FOR VALUES FROM (start) TO (end)`.
pub fn month_partition_ddl(month: &MonthPartition) -> Result<String, DescriptorError> {
    let table = QualifiedName::parse(WAREHOUSE_SCHEMA, month.name().as_str())?;
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} PARTITION OF {} FOR VALUES FROM ('{}') TO ('{}')",
        table.quoted(),
        parent_table()?.quoted(),
        month.start().format("%Y-%m-%d"),
        month.end().format("%Y-%m-%d"),
    ))
}

/// `CREATE TABLE ... PARTITION OF ... DEFAULT`.
pub fn default_partition_ddl() -> Result<String, DescriptorError> {
    let table = QualifiedName::parse(WAREHOUSE_SCHEMA, DEFAULT_PARTITION)?;
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} PARTITION OF {} DEFAULT",
        table.quoted(),
        parent_table()?.quoted(),
    ))
}

/// `CREATE INDEX IF NOT EXISTS ... ON dwh.table (column)`.
pub fn index_ddl(index: &IndexSpec) -> Result<String, DescriptorError> {
    let name = SqlIdent::parse(index.name)?;
    let table = QualifiedName::parse(WAREHOUSE_SCHEMA, index.table)?;
    let column = SqlIdent::parse(index.column)?;
    Ok(format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
        name.quoted(),
        table.quoted(),
        column.quoted(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use retaildwh_core::STAR_SCHEMA_INDEXES;

    #[test]
    fn test_month_partition_bounds_are_half_open() {
        let month = MonthPartition::new(2024, 12).unwrap();
        assert_eq!(
            month_partition_ddl(&month).unwrap(),
            "CREATE TABLE IF NOT EXISTS \"dwh\".\"sales_2024_12\" PARTITION OF \
             \"dwh\".\"fact_sales_partitioned\" FOR VALUES FROM ('2024-12-01') TO ('2025-01-01')"
        );
    }

    #[test]
    fn test_default_partition() {
        let ddl = default_partition_ddl().unwrap();
        assert!(ddl.contains("\"dwh\".\"sales_default\""));
        assert!(ddl.ends_with("DEFAULT"));
    }

    #[test]
    fn test_index_ddl_quotes_everything() {
        let ddl = index_ddl(&STAR_SCHEMA_INDEXES[0]).unwrap();
        assert_eq!(
            ddl,
            "CREATE INDEX IF NOT EXISTS \"idx_fact_sales_date\" ON \"dwh\".\"fact_sales\" (\"sale_date\")"
        );
    }

    #[test]
    fn test_hostile_index_rejected() {
        let spec = IndexSpec {
            name: "idx; DROP TABLE x",
            table: "fact_sales",
            column: "sale_date",
        };
        assert!(index_ddl(&spec).is_err());
    }

    #[test]
    fn test_static_ddl_is_idempotent() {
        for ddl in [METADATA_SCHEMA_DDL, WAREHOUSE_SCHEMA_DDL, PARTITIONED_FACT_DDL] {
            for statement in ddl.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                assert!(statement.contains("IF NOT EXISTS"), "{statement}");
            }
        }
    }
}
