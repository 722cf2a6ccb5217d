//! The natural-language query entry point.
//!
//! [`QueryGateway::handle`] composes the pieces in a fixed order:
//!
//! 1. anonymous callers pass through the [`QuotaTracker`] (authenticated
//!    callers skip it entirely)
//! 2. the [`Translator`] turns the question into a [`TranslatedQuery`]
//! 3. [`check_query`] vets the generated SQL
//! 4. the [`QueryExecutor`] runs it on a read-only pool under a timeout
//!
//! Every failure is returned to the caller as a [`GatewayError`]; nothing
//! is retried.
//!
//! [`TranslatedQuery`]: crate::models::TranslatedQuery

use futures_util::TryStreamExt;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, SqlitePool, TypeInfo, ValueRef};
use std::time::Duration;

use crate::config::Config;
use crate::error::GatewayError;
use crate::quota::QuotaTracker;
use crate::sql_guard::check_query;
use crate::translator::{create_model, Translator};

/// A successful answer.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    #[serde(rename = "prompt_results")]
    pub results: Vec<Map<String, Value>>,
    #[serde(rename = "sql")]
    pub generated_query: String,
    pub highlight_condition: String,
    /// Rows beyond `query.max_rows` were dropped.
    pub truncated: bool,
    /// Queries left in the window; only present for anonymous callers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u64>,
}

// ============ Executor ============

/// Runs vetted SQL against the read store and returns rows as JSON objects.
pub struct QueryExecutor {
    pool: SqlitePool,
    timeout: Duration,
    max_rows: usize,
}

impl QueryExecutor {
    /// `pool` should be opened read-only (see [`db::connect_read_only`](crate::db::connect_read_only)).
    pub fn new(pool: SqlitePool, timeout: Duration, max_rows: usize) -> Self {
        Self {
            pool,
            timeout,
            max_rows,
        }
    }

    /// Execute `query`, returning at most `max_rows` rows and whether more existed.
    ///
    /// Rows are pulled from a stream and the statement is abandoned as soon
    /// as one row past the cap shows up, so an unfiltered query never loads
    /// the whole table.
    pub async fn execute(
        &self,
        query: &str,
    ) -> Result<(Vec<Map<String, Value>>, bool), GatewayError> {
        let collect = async {
            let mut stream = sqlx::query(query).fetch(&self.pool);
            let mut out = Vec::new();
            while let Some(row) = stream.try_next().await? {
                if out.len() == self.max_rows {
                    return Ok::<_, sqlx::Error>((out, true));
                }
                out.push(row_to_json(&row)?);
            }
            Ok((out, false))
        };

        tokio::time::timeout(self.timeout, collect)
            .await
            .map_err(|_| GatewayError::ExecutionTimeout {
                query: query.to_string(),
                seconds: self.timeout.as_secs(),
            })?
            .map_err(|e| GatewayError::Execution {
                query: query.to_string(),
                message: e.to_string(),
            })
    }
}

/// Convert one row of arbitrary shape into a JSON object keyed by column name.
fn row_to_json(row: &SqliteRow) -> Result<Map<String, Value>, sqlx::Error> {
    let mut object = Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_string();
            match type_name.as_str() {
                "INTEGER" | "BOOLEAN" => Value::from(row.try_get::<i64, _>(i)?),
                "REAL" => float_value(row.try_get::<f64, _>(i)?),
                "TEXT" | "DATE" | "TIME" | "DATETIME" => Value::from(row.try_get::<String, _>(i)?),
                "BLOB" => Value::from(format!("<{} bytes>", row.try_get::<Vec<u8>, _>(i)?.len())),
                // NUMERIC and anything else: take the first decoding that works.
                _ => {
                    if let Ok(n) = row.try_get::<i64, _>(i) {
                        Value::from(n)
                    } else if let Ok(f) = row.try_get::<f64, _>(i) {
                        float_value(f)
                    } else {
                        Value::from(row.try_get::<String, _>(i)?)
                    }
                }
            }
        };
        object.insert(column.name().to_string(), value);
    }
    Ok(object)
}

fn float_value(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

// ============ Gateway ============

pub struct QueryGateway {
    quota: QuotaTracker,
    translator: Translator,
    executor: QueryExecutor,
}

impl QueryGateway {
    pub fn new(quota: QuotaTracker, translator: Translator, executor: QueryExecutor) -> Self {
        Self {
            quota,
            translator,
            executor,
        }
    }

    /// Build the configured quota backend, model, and executor over `read_pool`.
    pub async fn from_config(config: &Config, read_pool: SqlitePool) -> anyhow::Result<Self> {
        let quota = QuotaTracker::from_config(&config.quota).await?;
        let translator = Translator::new(create_model(&config.model)?, config.model.timeout());
        let executor = QueryExecutor::new(read_pool, config.query.timeout(), config.query.max_rows);
        Ok(Self::new(quota, translator, executor))
    }

    pub async fn handle(
        &self,
        user_text: &str,
        identity: &str,
        is_authenticated: bool,
    ) -> Result<QueryResponse, GatewayError> {
        let remaining = if is_authenticated {
            None
        } else {
            let decision = self.quota.check_and_increment(identity).await?;
            if !decision.allowed {
                tracing::info!(identity, "anonymous query limit reached");
                return Err(GatewayError::RateLimited { remaining: 0 });
            }
            Some(decision.remaining)
        };

        let translated = self.translator.translate(user_text).await?;

        let query = check_query(&translated.query).map_err(|reason| {
            tracing::warn!(query = %translated.query, %reason, "generated query rejected");
            GatewayError::Rejected {
                query: translated.query.clone(),
                reason,
            }
        })?;

        let (results, truncated) = self.executor.execute(&query).await?;
        tracing::info!(
            rows = results.len(),
            truncated,
            authenticated = is_authenticated,
            "query answered"
        );

        Ok(QueryResponse {
            results,
            generated_query: query,
            highlight_condition: translated.highlight_condition,
            truncated,
            remaining,
        })
    }
}

/// `atlascope query "<text>"`: one gateway call, printed as JSON.
pub async fn run_query(
    config: &Config,
    user_text: &str,
    identity: &str,
    is_authenticated: bool,
) -> anyhow::Result<()> {
    // The writer creates the schema and WAL files the read-only pool needs.
    let pool = crate::db::connect(config).await?;
    crate::migrate::ensure_schema(&pool).await?;
    let read_pool = crate::db::connect_read_only(config).await?;
    let gateway = QueryGateway::from_config(config, read_pool.clone()).await?;

    let result = gateway.handle(user_text, identity, is_authenticated).await;
    read_pool.close().await;
    pool.close().await;

    match result {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Err(err) => {
            if let Some(query) = err.query() {
                eprintln!("Generated query: {}", query);
            }
            Err(err.into())
        }
    }
}
