//! Upstream report feed client.
//!
//! [`ReportFeed`] is the seam the ingestion loop depends on; [`ReliefWebFeed`]
//! is the HTTP implementation against the ReliefWeb v1 reports API. A fetch
//! returns the raw `data[]` entries untouched. Decoding them into
//! [`Report`](crate::models::Report)s is the normalizer's job, so one odd
//! record never fails a whole page.
//!
//! # Request shape
//!
//! ```text
//! GET {base_url}?appname=atlascope
//!     &filter[conditions][0][field]=date.created
//!     &filter[conditions][0][value][from]=<start>
//!     &filter[conditions][0][value][to]=<end>
//!     &sort[]=date.created:desc
//!     &fields[include][]=disaster&fields[include][]=body&...
//!     &limit=<limit>&offset=<offset>
//! ```
//!
//! No retries happen here. A failed page is reported as a [`FetchError`]
//! and the orchestrator decides what to do with the run.

use async_trait::async_trait;
use chrono::SecondsFormat;
use serde::Deserialize;
use serde_json::Value;

use crate::config::FeedConfig;
use crate::error::FetchError;
use crate::models::TimeWindow;

/// Fields requested from the feed for every report.
pub const INCLUDED_FIELDS: &[&str] = &[
    "disaster",
    "body",
    "id",
    "primary_country",
    "source",
    "source.type.name",
    "date",
    "language",
    "url_alias",
];

/// A paginated source of raw report records.
#[async_trait]
pub trait ReportFeed: Send + Sync {
    /// Fetch one page of records created inside `window`, newest first.
    async fn fetch(
        &self,
        window: &TimeWindow,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Value>, FetchError>;
}

#[derive(Debug, Deserialize)]
struct FeedPage {
    data: Option<Vec<Value>>,
}

/// HTTP client for the ReliefWeb reports endpoint.
pub struct ReliefWebFeed {
    client: reqwest::Client,
    base_url: String,
    appname: String,
    timeout_secs: u64,
}

impl ReliefWebFeed {
    pub fn new(config: &FeedConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            appname: config.appname.clone(),
            timeout_secs: config.timeout_secs,
        })
    }
}

/// Query parameters for one page. Repeated keys are kept as separate pairs.
pub fn build_query(
    appname: &str,
    window: &TimeWindow,
    offset: usize,
    limit: usize,
) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("appname", appname.to_string()),
        ("filter[conditions][0][field]", "date.created".to_string()),
        (
            "filter[conditions][0][value][from]",
            window.start.to_rfc3339_opts(SecondsFormat::Secs, false),
        ),
        (
            "filter[conditions][0][value][to]",
            window.end.to_rfc3339_opts(SecondsFormat::Secs, false),
        ),
        ("sort[]", "date.created:desc".to_string()),
    ];
    for field in INCLUDED_FIELDS {
        params.push(("fields[include][]", field.to_string()));
    }
    params.push(("limit", limit.to_string()));
    params.push(("offset", offset.to_string()));
    params
}

#[async_trait]
impl ReportFeed for ReliefWebFeed {
    async fn fetch(
        &self,
        window: &TimeWindow,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Value>, FetchError> {
        let params = build_query(&self.appname, window, offset, limit);

        let response = self
            .client
            .get(&self.base_url)
            .query(&params)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let page: FeedPage = response.json().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(self.timeout_secs)
            } else {
                FetchError::Decode(e.to_string())
            }
        })?;

        page.data
            .ok_or_else(|| FetchError::Decode("response has no `data` array".to_string()))
    }
}

impl ReliefWebFeed {
    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout_secs)
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn test_build_query_window_and_paging() {
        let end = Utc.with_ymd_and_hms(2024, 3, 10, 6, 0, 0).unwrap();
        let window = TimeWindow::ending_at(end, Duration::hours(4));
        let params = build_query("atlascope", &window, 2000, 1000);

        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("appname"), Some("atlascope"));
        assert_eq!(
            get("filter[conditions][0][value][from]"),
            Some("2024-03-10T02:00:00+00:00")
        );
        assert_eq!(
            get("filter[conditions][0][value][to]"),
            Some("2024-03-10T06:00:00+00:00")
        );
        assert_eq!(get("sort[]"), Some("date.created:desc"));
        assert_eq!(get("limit"), Some("1000"));
        assert_eq!(get("offset"), Some("2000"));
    }

    #[test]
    fn test_build_query_repeats_field_includes() {
        let window = TimeWindow::ending_now(Duration::hours(1));
        let params = build_query("atlascope", &window, 0, 10);
        let fields: Vec<&str> = params
            .iter()
            .filter(|(k, _)| *k == "fields[include][]")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(fields, INCLUDED_FIELDS);
    }

    #[test]
    fn test_feed_page_without_data_is_none() {
        let page: FeedPage = serde_json::from_str(r#"{"count": 0}"#).unwrap();
        assert!(page.data.is_none());
    }
}
