//! Raw feed record → [`Report`] normalization.
//!
//! Normalization is total: every raw record becomes either a [`Report`] or
//! a [`Rejection`]. Nothing in here returns an error or panics on odd
//! input, since malformed records are just another rejection reason.
//!
//! Filters, in order:
//!
//! 1. language must equal the configured accepted language
//! 2. the country must not be the `"World"` aggregate
//! 3. the title must not match a boilerplate pattern
//! 4. latitude and longitude must both be present
//! 5. a linked disaster must not have status `"past"`

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::config::FeedConfig;
use crate::models::Report;

/// Country name the feed uses for global, non-country reports.
pub const WORLD_AGGREGATE: &str = "World";

/// Disaster status that excludes a report from the store.
pub const PAST_STATUS: &str = "past";

// ============ Wire shapes ============
//
// Every field is optional so that decoding only fails on type mismatches.
// Missing fields are judged by the filters below, not by serde.

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Int(i64),
    Text(String),
}

impl RawId {
    fn as_i64(&self) -> Option<i64> {
        match self {
            RawId::Int(n) => Some(*n),
            RawId::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    id: Option<RawId>,
    fields: Option<RawFields>,
}

#[derive(Debug, Default, Deserialize)]
struct RawFields {
    title: Option<String>,
    body: Option<String>,
    language: Option<Vec<RawNamed>>,
    primary_country: Option<RawCountry>,
    date: Option<RawDate>,
    source: Option<Vec<RawSource>>,
    url_alias: Option<String>,
    disaster: Option<Vec<RawDisaster>>,
}

#[derive(Debug, Deserialize)]
struct RawNamed {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCountry {
    name: Option<String>,
    iso3: Option<String>,
    shortname: Option<String>,
    location: Option<RawLocation>,
}

#[derive(Debug, Deserialize)]
struct RawLocation {
    lat: Option<f64>,
    lon: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawDate {
    created: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSource {
    shortname: Option<String>,
    homepage: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDisaster {
    id: Option<i64>,
    name: Option<String>,
    glide: Option<String>,
    status: Option<String>,
    #[serde(rename = "type")]
    kind: Option<Vec<RawNamed>>,
}

// ============ Rejections ============

/// Why a raw record did not become a [`Report`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Rejection {
    Malformed,
    MissingId,
    Language,
    WorldAggregate,
    MissingCountry,
    BoilerplateTitle,
    MissingLocation,
    PastDisaster,
    MissingDate,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::Malformed => "malformed",
            Rejection::MissingId => "missing_id",
            Rejection::Language => "language",
            Rejection::WorldAggregate => "world_aggregate",
            Rejection::MissingCountry => "missing_country",
            Rejection::BoilerplateTitle => "boilerplate_title",
            Rejection::MissingLocation => "missing_location",
            Rejection::PastDisaster => "past_disaster",
            Rejection::MissingDate => "missing_date",
        }
    }
}

/// Per-reason rejection counts for one batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RejectionTally {
    counts: BTreeMap<Rejection, usize>,
}

impl RejectionTally {
    pub fn record(&mut self, reason: Rejection) {
        *self.counts.entry(reason).or_insert(0) += 1;
    }

    pub fn merge(&mut self, other: &RejectionTally) {
        for (reason, n) in &other.counts {
            *self.counts.entry(*reason).or_insert(0) += n;
        }
    }

    pub fn get(&self, reason: Rejection) -> usize {
        self.counts.get(&reason).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    /// `reason=count` pairs, for log lines.
    pub fn summary(&self) -> String {
        self.counts
            .iter()
            .map(|(r, n)| format!("{}={}", r.as_str(), n))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ============ Normalizer ============

#[derive(Debug, Clone)]
pub struct Normalizer {
    accepted_language: String,
    excluded_title_patterns: Vec<String>,
}

impl Normalizer {
    pub fn new(accepted_language: impl Into<String>, excluded_title_patterns: Vec<String>) -> Self {
        Self {
            accepted_language: accepted_language.into(),
            excluded_title_patterns,
        }
    }

    pub fn from_config(config: &FeedConfig) -> Self {
        Self::new(
            config.accepted_language.clone(),
            config.excluded_title_patterns.clone(),
        )
    }

    /// Normalize a page of raw records.
    pub fn normalize_batch(&self, records: &[Value]) -> (Vec<Report>, RejectionTally) {
        let mut reports = Vec::with_capacity(records.len());
        let mut tally = RejectionTally::default();
        for record in records {
            match self.normalize(record) {
                Ok(report) => reports.push(report),
                Err(reason) => tally.record(reason),
            }
        }
        (reports, tally)
    }

    pub fn normalize(&self, record: &Value) -> Result<Report, Rejection> {
        let raw: RawRecord =
            serde_json::from_value(record.clone()).map_err(|_| Rejection::Malformed)?;

        let report_id = raw
            .id
            .as_ref()
            .and_then(RawId::as_i64)
            .ok_or(Rejection::MissingId)?;
        let fields = raw.fields.unwrap_or_default();

        // 1. language
        let language = fields
            .language
            .as_deref()
            .and_then(|langs| langs.first())
            .and_then(|l| l.name.clone());
        if language.as_deref() != Some(self.accepted_language.as_str()) {
            return Err(Rejection::Language);
        }

        // 2. country
        let country = fields.primary_country.ok_or(Rejection::MissingCountry)?;
        let primary_country = country.name.ok_or(Rejection::MissingCountry)?;
        if primary_country == WORLD_AGGREGATE {
            return Err(Rejection::WorldAggregate);
        }
        let primary_country_iso3 = country.iso3.ok_or(Rejection::MissingCountry)?;

        // 3. title
        if let Some(title) = fields.title.as_deref() {
            if self
                .excluded_title_patterns
                .iter()
                .any(|pattern| title.contains(pattern.as_str()))
            {
                return Err(Rejection::BoilerplateTitle);
            }
        }

        // 4. geolocation
        let location = country.location.ok_or(Rejection::MissingLocation)?;
        let (country_lat, country_long) = match (location.lat, location.lon) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => return Err(Rejection::MissingLocation),
        };

        // 5. disaster status
        let disaster = fields.disaster.and_then(|d| d.into_iter().next());
        if let Some(status) = disaster.as_ref().and_then(|d| d.status.as_deref()) {
            if status == PAST_STATUS {
                return Err(Rejection::PastDisaster);
            }
        }

        let date_report_created = fields
            .date
            .and_then(|d| d.created)
            .and_then(|s| parse_timestamp(&s))
            .ok_or(Rejection::MissingDate)?;

        let source = fields.source.and_then(|s| s.into_iter().next());
        let (source_name, source_homepage) = match source {
            Some(s) => (s.shortname, s.homepage),
            None => (None, None),
        };

        let (disaster_id, disaster_name, disaster_glide, disaster_type, disaster_status) =
            match disaster {
                Some(d) => (
                    d.id,
                    d.name,
                    d.glide,
                    d.kind
                        .and_then(|k| k.into_iter().next())
                        .and_then(|k| k.name),
                    d.status,
                ),
                None => (None, None, None, None, None),
            };

        Ok(Report {
            report_id,
            primary_country,
            primary_country_iso3,
            primary_country_shortname: country.shortname,
            country_lat,
            country_long,
            date_report_created,
            headline_title: fields.title,
            headline_summary: fields.body,
            language,
            source_name,
            source_homepage,
            report_url_alias: fields.url_alias,
            disaster_id,
            disaster_name,
            disaster_glide,
            disaster_type,
            disaster_status,
        })
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
