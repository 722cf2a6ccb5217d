//! CLI read commands over the report store.
//!
//! `get`, `last-updated`, `recent` and `reset` all go through
//! [`ReportStore`]; the HTTP server exposes the same reads as JSON.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::models::{lookback_days, Report, TimeWindow};
use crate::store::{format_last_updated, format_ts, ReportStore};

async fn open_store(config: &Config) -> Result<ReportStore> {
    let pool = db::connect(config).await?;
    Ok(ReportStore::new(pool))
}

/// `atlascope get <id>`: print one report, exit 1 when it is not stored.
pub async fn run_get(config: &Config, report_id: i64) -> Result<()> {
    let store = open_store(config).await?;
    let report = store.get_report(report_id).await?;
    let geom = store.get_geom(report_id).await?;
    store.pool().close().await;

    let report = match report {
        Some(r) => r,
        None => {
            eprintln!("Error: report not found: {}", report_id);
            std::process::exit(1);
        }
    };

    print_report(&report);
    if let Some(geom) = geom {
        println!("geom:         {}", geom);
    }
    Ok(())
}

fn print_report(report: &Report) {
    let opt = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());

    println!("--- Report {} ---", report.report_id);
    println!(
        "title:        {}",
        report.headline_title.as_deref().unwrap_or("(untitled)")
    );
    println!(
        "country:      {} ({})",
        report.primary_country, report.primary_country_iso3
    );
    println!(
        "location:     {}, {}",
        report.country_lat, report.country_long
    );
    println!("created:      {}", format_ts(&report.date_report_created));
    println!("language:     {}", opt(&report.language));
    println!("source:       {}", opt(&report.source_name));
    println!("url:          {}", opt(&report.report_url_alias));
    if let Some(ref name) = report.disaster_name {
        println!(
            "disaster:     {} [{}] {}",
            name,
            opt(&report.disaster_type),
            opt(&report.disaster_status)
        );
    }
    if let Some(ref summary) = report.headline_summary {
        println!();
        println!("{}", summary);
    }
}

/// `atlascope last-updated`
pub async fn run_last_updated(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let newest = store.last_updated().await?;
    store.pool().close().await;

    match newest {
        Some(ts) => println!("Last updated: {}", format_last_updated(&ts)),
        None => println!("No reports stored yet."),
    }
    Ok(())
}

/// `atlascope recent [--days N]`: reports from the last `days` days,
/// grouped by location, newest location first.
pub async fn run_recent(config: &Config, days: i64) -> Result<()> {
    let lookback = lookback_days(days).map_err(|e| anyhow::anyhow!("--{}", e))?;
    let since = TimeWindow::ending_now(lookback).start;

    let store = open_store(config).await?;
    let groups = store.recent_events(since).await?;
    store.pool().close().await;

    if groups.is_empty() {
        println!("No reports since {}.", format_ts(&since));
        return Ok(());
    }

    let total: usize = groups.iter().map(|g| g.reports.len()).sum();
    println!(
        "{} reports at {} locations since {}",
        total,
        groups.len(),
        format_ts(&since)
    );
    for group in &groups {
        println!();
        println!("({}, {})", group.lat, group.long);
        for report in &group.reports {
            println!(
                "  {}  [{}] {}",
                format_ts(&report.date_report_created),
                report.report_id,
                report.headline_title.as_deref().unwrap_or("(untitled)")
            );
        }
    }
    Ok(())
}

/// `atlascope reset`: drop every stored report.
pub async fn run_reset(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    store.reset().await?;
    store.pool().close().await;
    println!("Reports table dropped.");
    Ok(())
}
