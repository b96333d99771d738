use std::io::Write;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use retaildwh_cli::{build_config, parse_staging_table, read_batch_file, Cli, Commands};
use retaildwh_engine::WarehouseConfig;
use tempfile::NamedTempFile;

const TWO_ROWS: &str = r#"[
    {
        "invoiceno": "536365",
        "stockcode": "85123A",
        "description": "WHITE HANGING HEART T-LIGHT HOLDER",
        "quantity": 6,
        "invoicedate": "2024-12-01T08:26:00",
        "unitprice": "2.55",
        "customerid": 17850,
        "country": "United Kingdom"
    },
    {
        "invoiceno": "536366",
        "stockcode": "84406B",
        "description": "CREAM CUPID HEARTS COAT HANGER",
        "quantity": 8,
        "invoicedate": "2024-12-01T08:28:00",
        "unitprice": "2.75",
        "customerid": null,
        "country": null
    }
]"#;

#[test]
fn load_requires_exactly_one_source() {
    assert!(Cli::try_parse_from(["retaildwh", "load"]).is_err());
    assert!(Cli::try_parse_from([
        "retaildwh",
        "load",
        "--batch",
        "rows.json",
        "--staging-table",
        "online_retail",
    ])
    .is_err());

    let cli = Cli::try_parse_from(["retaildwh", "load", "--staging-table", "staging.online_retail"])
        .unwrap();
    match cli.command {
        Commands::Load(args) => {
            assert_eq!(args.staging_table.as_deref(), Some("staging.online_retail"));
            assert!(args.batch.is_none());
        }
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn global_flags_follow_the_subcommand() {
    let cli = Cli::try_parse_from([
        "retaildwh",
        "reap-stale-runs",
        "--older-than-secs",
        "7200",
        "--verbose",
        "--database-url",
        "postgres://etl@localhost/retail",
    ])
    .unwrap();

    assert!(cli.verbose);
    assert_eq!(
        cli.connection.database_url.as_deref(),
        Some("postgres://etl@localhost/retail")
    );
    match cli.command {
        Commands::ReapStaleRuns(args) => assert_eq!(args.older_than_secs, 7200),
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn flags_override_environment_config() -> Result<()> {
    let cli = Cli::try_parse_from([
        "retaildwh",
        "setup",
        "--batch-size",
        "250",
        "--years",
        "2010, 2011",
        "--acquire-timeout-secs",
        "5",
        "--source-table",
        "online_retail_ii",
    ])?;
    let base = WarehouseConfig {
        database_url: Some("postgres://env@localhost/retail".to_string()),
        ..Default::default()
    };

    let config = build_config(&cli.connection, base)?;

    assert_eq!(config.fact_batch_size, 250);
    assert_eq!(config.partition_years, vec![2010, 2011]);
    assert_eq!(config.acquire_timeout, Duration::from_secs(5));
    assert_eq!(config.source_table, "online_retail_ii");
    assert_eq!(config.database_url.as_deref(), Some("postgres://env@localhost/retail"));
    assert_eq!(config.max_connections, 5);
    Ok(())
}

#[test]
fn invalid_overrides_are_rejected() {
    let cli = Cli::try_parse_from(["retaildwh", "setup", "--batch-size", "0"]).unwrap();
    assert!(build_config(&cli.connection, WarehouseConfig::default()).is_err());

    let cli = Cli::try_parse_from(["retaildwh", "setup", "--years", "2024,twenty"]).unwrap();
    assert!(build_config(&cli.connection, WarehouseConfig::default()).is_err());
}

#[test]
fn batch_file_is_read_as_cleaned_rows() -> Result<()> {
    let mut file = NamedTempFile::new()?;
    file.write_all(TWO_ROWS.as_bytes())?;

    let batch = read_batch_file(file.path())?;

    assert_eq!(batch.len(), 2);
    assert_eq!(batch.rows()[0].customerid, Some(17850));
    assert_eq!(batch.rows()[1].customerid, None);
    assert_eq!(batch.null_cell_count(), 2);
    Ok(())
}

#[test]
fn malformed_batch_file_names_the_file() -> Result<()> {
    let mut file = NamedTempFile::new()?;
    file.write_all(br#"[{"invoiceno": "536365"}]"#)?;

    let err = read_batch_file(file.path()).unwrap_err();

    assert!(format!("{err}").contains("invalid batch file"));
    Ok(())
}

#[test]
fn staging_table_defaults_to_public_schema() -> Result<()> {
    assert_eq!(parse_staging_table("online_retail")?.to_string(), "public.online_retail");
    assert_eq!(parse_staging_table("staging.online_retail")?.to_string(), "staging.online_retail");
    assert!(parse_staging_table("a.b.c").is_err());
    assert!(parse_staging_table("staging.online retail").is_err());
    Ok(())
}
