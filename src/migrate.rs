use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Column list of the `reports` table, as shown to the query model.
///
/// Kept next to the DDL so the prompt and the table cannot drift apart.
pub const REPORT_COLUMNS: &[(&str, &str)] = &[
    ("report_id", "integer"),
    ("primary_country", "text"),
    ("primary_country_iso3", "text"),
    ("primary_country_shortname", "text"),
    ("country_lat", "real"),
    ("country_long", "real"),
    ("geom", "text (EWKT point, SRID 4326)"),
    ("date_report_created", "text (UTC timestamp, YYYY-MM-DDTHH:MM:SSZ)"),
    ("headline_title", "text"),
    ("headline_summary", "text"),
    ("language", "text"),
    ("source_name", "text"),
    ("source_homepage", "text"),
    ("report_url_alias", "text"),
    ("disaster_id", "integer"),
    ("disaster_name", "text"),
    ("disaster_glide", "text"),
    ("disaster_type", "text"),
    ("disaster_status", "text"),
];

pub const REPORTS_TABLE: &str = "reports";

/// Create every table and index if absent. Safe to call repeatedly.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reports (
            report_id INTEGER PRIMARY KEY,
            primary_country TEXT NOT NULL,
            primary_country_iso3 TEXT NOT NULL,
            primary_country_shortname TEXT,
            country_lat REAL NOT NULL,
            country_long REAL NOT NULL,
            geom TEXT NOT NULL,
            date_report_created TEXT NOT NULL,
            headline_title TEXT,
            headline_summary TEXT,
            language TEXT,
            source_name TEXT,
            source_homepage TEXT,
            report_url_alias TEXT,
            disaster_id INTEGER,
            disaster_name TEXT,
            disaster_glide TEXT,
            disaster_type TEXT,
            disaster_status TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingest_locks (
            name TEXT PRIMARY KEY,
            holder TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_reports_created ON reports(date_report_created DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_reports_country ON reports(primary_country)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_reports_location ON reports(country_lat, country_long)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// `atlascope init`: open (creating if needed) the database and build the schema.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    ensure_schema(&pool).await?;
    pool.close().await;
    Ok(())
}
