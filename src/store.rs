//! Report persistence.
//!
//! [`ReportStore`] owns the write side (`upsert_many`) and the fixed read
//! surfaces (`get_report`, `last_updated`, `recent_events`). Generated
//! natural-language queries do not go through here; they run on the
//! gateway's read-only pool.
//!
//! Upserts are full overwrites keyed by `report_id`: a refetched report
//! replaces every non-key column, so re-ingesting an overlap window is
//! harmless.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::WriteError;
use crate::migrate;
use crate::models::Report;

const SELECT_REPORT: &str = r#"
    SELECT report_id, primary_country, primary_country_iso3, primary_country_shortname,
           country_lat, country_long, date_report_created, headline_title, headline_summary,
           language, source_name, source_homepage, report_url_alias, disaster_id,
           disaster_name, disaster_glide, disaster_type, disaster_status
    FROM reports
"#;

/// Reports sharing one country location, as served to the map view.
#[derive(Debug, Clone, Serialize)]
pub struct LocationGroup {
    pub lat: f64,
    pub long: f64,
    pub reports: Vec<Report>,
}

pub struct ReportStore {
    pool: SqlitePool,
    schema_ready: AtomicBool,
}

impl ReportStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            schema_ready: AtomicBool::new(false),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the schema on first use. Later calls are a flag check.
    pub async fn ensure_schema(&self) -> Result<()> {
        if self.schema_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        migrate::ensure_schema(&self.pool)
            .await
            .context("failed to create reports schema")?;
        self.schema_ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Upsert a batch, skipping (and logging) individual failures.
    ///
    /// Returns how many reports were written. A short count means partial
    /// failure; it is not an error. Only schema creation can fail the call.
    pub async fn upsert_many(&self, reports: &[Report]) -> Result<usize> {
        self.ensure_schema().await?;

        let mut written = 0usize;
        for report in reports {
            match self.upsert(report).await {
                Ok(()) => written += 1,
                Err(e) => tracing::warn!(report_id = e.report_id, error = %e.message, "skipping report"),
            }
        }

        tracing::debug!(batch = reports.len(), written, "upsert batch finished");
        Ok(written)
    }

    async fn upsert(&self, report: &Report) -> Result<(), WriteError> {
        sqlx::query(
            r#"
            INSERT INTO reports (report_id, primary_country, primary_country_iso3, primary_country_shortname,
                country_lat, country_long, geom, date_report_created, headline_title, headline_summary,
                language, source_name, source_homepage, report_url_alias, disaster_id, disaster_name,
                disaster_glide, disaster_type, disaster_status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(report_id) DO UPDATE SET
                primary_country = excluded.primary_country,
                primary_country_iso3 = excluded.primary_country_iso3,
                primary_country_shortname = excluded.primary_country_shortname,
                country_lat = excluded.country_lat,
                country_long = excluded.country_long,
                geom = excluded.geom,
                date_report_created = excluded.date_report_created,
                headline_title = excluded.headline_title,
                headline_summary = excluded.headline_summary,
                language = excluded.language,
                source_name = excluded.source_name,
                source_homepage = excluded.source_homepage,
                report_url_alias = excluded.report_url_alias,
                disaster_id = excluded.disaster_id,
                disaster_name = excluded.disaster_name,
                disaster_glide = excluded.disaster_glide,
                disaster_type = excluded.disaster_type,
                disaster_status = excluded.disaster_status
            "#,
        )
        .bind(report.report_id)
        .bind(&report.primary_country)
        .bind(&report.primary_country_iso3)
        .bind(&report.primary_country_shortname)
        .bind(report.country_lat)
        .bind(report.country_long)
        .bind(report.geom_ewkt())
        .bind(format_ts(&report.date_report_created))
        .bind(&report.headline_title)
        .bind(&report.headline_summary)
        .bind(&report.language)
        .bind(&report.source_name)
        .bind(&report.source_homepage)
        .bind(&report.report_url_alias)
        .bind(report.disaster_id)
        .bind(&report.disaster_name)
        .bind(&report.disaster_glide)
        .bind(&report.disaster_type)
        .bind(&report.disaster_status)
        .execute(&self.pool)
        .await
        .map_err(|e| WriteError {
            report_id: report.report_id,
            message: e.to_string(),
        })?;

        Ok(())
    }

    pub async fn get_report(&self, report_id: i64) -> Result<Option<Report>> {
        self.ensure_schema().await?;
        let row = sqlx::query(&format!("{} WHERE report_id = ?", SELECT_REPORT))
            .bind(report_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(report_from_row).transpose()
    }

    /// The stored point for a report, as written (`SRID=4326;POINT(long lat)`).
    pub async fn get_geom(&self, report_id: i64) -> Result<Option<String>> {
        self.ensure_schema().await?;
        let geom: Option<String> = sqlx::query_scalar("SELECT geom FROM reports WHERE report_id = ?")
            .bind(report_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(geom)
    }

    pub async fn count(&self) -> Result<i64> {
        self.ensure_schema().await?;
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reports")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    /// Newest `date_report_created` in the store, if any.
    pub async fn last_updated(&self) -> Result<Option<DateTime<Utc>>> {
        self.ensure_schema().await?;
        let latest: Option<String> = sqlx::query_scalar("SELECT MAX(date_report_created) FROM reports")
            .fetch_one(&self.pool)
            .await?;
        latest.as_deref().map(parse_ts).transpose()
    }

    /// Reports created at or after `since`, newest first, bucketed by location.
    ///
    /// Buckets keep the order in which each location first appears, so the
    /// bucket holding the newest report comes first.
    pub async fn recent_events(&self, since: DateTime<Utc>) -> Result<Vec<LocationGroup>> {
        self.ensure_schema().await?;
        let rows = sqlx::query(&format!(
            "{} WHERE date_report_created >= ? ORDER BY date_report_created DESC",
            SELECT_REPORT
        ))
        .bind(format_ts(&since))
        .fetch_all(&self.pool)
        .await?;

        let mut groups: Vec<LocationGroup> = Vec::new();
        for row in &rows {
            let report = report_from_row(row)?;
            match groups
                .iter_mut()
                .find(|g| g.lat == report.country_lat && g.long == report.country_long)
            {
                Some(group) => group.reports.push(report),
                None => groups.push(LocationGroup {
                    lat: report.country_lat,
                    long: report.country_long,
                    reports: vec![report],
                }),
            }
        }
        Ok(groups)
    }

    /// Drop the reports table. The next write recreates it.
    pub async fn reset(&self) -> Result<()> {
        sqlx::query("DROP TABLE IF EXISTS reports")
            .execute(&self.pool)
            .await?;
        self.schema_ready.store(false, Ordering::Release);
        Ok(())
    }
}

/// Timestamps are stored as fixed-width UTC text so string order is time order.
pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("invalid stored timestamp: {}", s))?
        .with_timezone(&Utc))
}

fn report_from_row(row: &SqliteRow) -> Result<Report> {
    let created: String = row.try_get("date_report_created")?;
    Ok(Report {
        report_id: row.try_get("report_id")?,
        primary_country: row.try_get("primary_country")?,
        primary_country_iso3: row.try_get("primary_country_iso3")?,
        primary_country_shortname: row.try_get("primary_country_shortname")?,
        country_lat: row.try_get("country_lat")?,
        country_long: row.try_get("country_long")?,
        date_report_created: parse_ts(&created)?,
        headline_title: row.try_get("headline_title")?,
        headline_summary: row.try_get("headline_summary")?,
        language: row.try_get("language")?,
        source_name: row.try_get("source_name")?,
        source_homepage: row.try_get("source_homepage")?,
        report_url_alias: row.try_get("report_url_alias")?,
        disaster_id: row.try_get("disaster_id")?,
        disaster_name: row.try_get("disaster_name")?,
        disaster_glide: row.try_get("disaster_glide")?,
        disaster_type: row.try_get("disaster_type")?,
        disaster_status: row.try_get("disaster_status")?,
    })
}

/// Human-readable form used by `last-updated`.
pub fn format_last_updated(ts: &DateTime<Utc>) -> String {
    ts.format("%B %d, %Y at %I:%M %p UTC").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_ts_is_fixed_width_utc() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 5, 3, 4, 5).unwrap();
        assert_eq!(format_ts(&ts), "2024-01-05T03:04:05Z");
        assert_eq!(parse_ts("2024-01-05T03:04:05Z").unwrap(), ts);
    }

    #[test]
    fn test_last_updated_format() {
        let ts = Utc.with_ymd_and_hms(2024, 7, 9, 15, 30, 0).unwrap();
        assert_eq!(format_last_updated(&ts), "July 09, 2024 at 03:30 PM UTC");
    }

    fn report(id: i64, lat: f64) -> Report {
        Report {
            report_id: id,
            primary_country: "Kenya".to_string(),
            primary_country_iso3: "ken".to_string(),
            primary_country_shortname: None,
            country_lat: lat,
            country_long: 36.8,
            date_report_created: Utc.with_ymd_and_hms(2024, 5, 2, 9, 15, 0).unwrap(),
            headline_title: Some(format!("Report {}", id)),
            headline_summary: None,
            language: Some("English".to_string()),
            source_name: None,
            source_homepage: None,
            report_url_alias: None,
            disaster_id: None,
            disaster_name: None,
            disaster_glide: None,
            disaster_type: None,
            disaster_status: None,
        }
    }

    #[tokio::test]
    async fn test_failed_record_does_not_abort_batch() {
        let tmp = tempfile::TempDir::new().unwrap();
        let url = format!("sqlite:{}?mode=rwc", tmp.path().join("store.sqlite").display());
        let store = ReportStore::new(SqlitePool::connect(&url).await.unwrap());

        // SQLite binds NaN as NULL, which the NOT NULL column refuses.
        let batch = [report(1, -1.3), report(2, f64::NAN), report(3, -1.3)];
        assert_eq!(store.upsert_many(&batch).await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 2);
        assert!(store.get_report(2).await.unwrap().is_none());
        assert!(store.get_report(3).await.unwrap().is_some());
    }
}
