use crate::cli::{Command, EngineName};
use crate::config::Config;
use crate::data::PgStore;
use crate::data::source::ScoreCache;
use crate::matching::remote::{self, OpenAiClient};
use crate::matching::{
    LlmEngine, MatchingConfig, RecalcDriver, RecalcOutcome, RecalculateAllOptions, ScoringEngine,
    TagEngine, tag_engine,
};
use crate::triggers::{DEFAULT_QUEUE_CAPACITY, TriggerDispatcher, listen_for_invalidations};
use crate::utils::fmt_duration;
use anyhow::{Context, Result, bail};
use sqlx::ConnectOptions;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Main application struct: configuration, store and the shared shutdown token.
pub struct App {
    config: Config,
    matching: MatchingConfig,
    store: Arc<PgStore>,
    cancel: CancellationToken,
}

impl App {
    /// Connect to the database and apply migrations.
    pub async fn new(config: Config) -> Result<Self> {
        let connect_options = PgConnectOptions::from_str(&config.database_url)
            .context("Failed to parse database URL")?
            .log_statements(tracing::log::LevelFilter::Debug)
            .log_slow_statements(tracing::log::LevelFilter::Warn, Duration::from_secs(1));

        // Batches run concurrently, so size the pool to the batch
        let max_connections = u32::try_from(config.batch_size.clamp(2, 32)).unwrap_or(32);
        let pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(max_connections)
            .acquire_slow_threshold(Duration::from_millis(500))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(60 * 2))
            .connect_with(connect_options)
            .await
            .context("Failed to create database pool")?;

        info!(max_connections, "database pool established");

        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;
        info!("Database migrations completed successfully");

        Ok(App {
            matching: config.matching(),
            config,
            store: Arc::new(PgStore::new(pool)),
            cancel: CancellationToken::new(),
        })
    }

    fn engine(&self, name: EngineName) -> Result<Arc<dyn ScoringEngine>> {
        match name {
            EngineName::Tag => Ok(Arc::new(TagEngine::new(self.matching.tag))),
            EngineName::Llm => {
                let Some(api_key) = self.config.llm_api_key.as_deref() else {
                    bail!("LLM_API_KEY is not set; the llm engine is unavailable");
                };
                let mut client =
                    OpenAiClient::new(&self.config.llm_base_url, &self.config.llm_model, api_key)?;
                if let Some(per_minute) = self.config.llm_requests_per_minute {
                    client = client.with_rate_limit(per_minute);
                }
                Ok(Arc::new(LlmEngine::new(
                    Arc::new(client),
                    self.matching.llm_timeout,
                    self.matching.llm,
                )))
            }
        }
    }

    fn driver(&self, name: EngineName) -> Result<RecalcDriver<PgStore>> {
        Ok(
            RecalcDriver::new(self.store.clone(), self.engine(name)?, &self.matching)
                .with_cancellation(self.cancel.clone()),
        )
    }

    /// Every engine that can run with the current configuration.
    fn available_drivers(&self) -> Vec<RecalcDriver<PgStore>> {
        [EngineName::Tag, EngineName::Llm]
            .into_iter()
            .filter_map(|name| match self.driver(name) {
                Ok(driver) => Some(driver),
                Err(e) => {
                    warn!(engine = ?name, error = %e, "Engine disabled");
                    None
                }
            })
            .collect()
    }

    /// Run a command to completion. Ctrl-C cancels the shared token; in-flight
    /// work then gets `SHUTDOWN_TIMEOUT` to wind down.
    pub async fn run(self, command: Command) -> ExitCode {
        let shutdown_timeout = self.config.shutdown_timeout;
        let cancel = self.cancel.clone();

        let work = self.execute(command);
        tokio::pin!(work);

        let result = tokio::select! {
            result = &mut work => result,
            _ = tokio::signal::ctrl_c() => {
                info!(
                    timeout = fmt_duration(shutdown_timeout),
                    "Shutdown requested, finishing in-flight work"
                );
                cancel.cancel();
                match tokio::time::timeout(shutdown_timeout, &mut work).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!("Shutdown timeout elapsed, abandoning in-flight work");
                        return ExitCode::FAILURE;
                    }
                }
            }
        };

        match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = ?e, "Command failed");
                ExitCode::FAILURE
            }
        }
    }

    async fn execute(&self, command: Command) -> Result<()> {
        match command {
            Command::RecalculateOne {
                user_id,
                engine,
                chunk,
            } => {
                let driver = self.driver(engine)?;
                let outcome = driver.recalculate_one(user_id, &chunk.options()).await?;
                info!(user_id, outcome = ?outcome, "Recalculation finished");
                if outcome == RecalcOutcome::Cancelled {
                    bail!("recalculation cancelled");
                }
                Ok(())
            }
            Command::RecalculateAll {
                engine,
                limit,
                batch_size,
                batch_delay,
                chunk,
            } => {
                let driver = self.driver(engine)?;
                let options = RecalculateAllOptions {
                    limit,
                    batch_size,
                    batch_delay,
                    per_user: chunk.options(),
                };
                let summary = driver.recalculate_all(&options).await?;
                println!(
                    "total={} succeeded={} failed={} skipped={} batches={}{}",
                    summary.total,
                    summary.succeeded,
                    summary.failed,
                    summary.skipped,
                    summary.batches,
                    if summary.cancelled { " (cancelled)" } else { "" }
                );
                Ok(())
            }
            Command::Top {
                user_id,
                engine,
                limit,
                min_score,
            } => {
                let version = match engine {
                    EngineName::Tag => tag_engine::ALGORITHM_VERSION,
                    EngineName::Llm => remote::ALGORITHM_VERSION,
                };
                let rows = self
                    .store
                    .top_matches(user_id, version, limit, min_score)
                    .await?;
                for row in rows {
                    println!(
                        "{:>8}  {:>5.1}  {}",
                        row.recommended_user_id, row.score, row.explanation.summary
                    );
                }
                Ok(())
            }
            Command::Listen => {
                let drivers = self.available_drivers();
                if drivers.is_empty() {
                    bail!("no scoring engines available");
                }
                let (handle, worker) = TriggerDispatcher::spawn(
                    self.store.clone(),
                    drivers,
                    DEFAULT_QUEUE_CAPACITY,
                    self.cancel.clone(),
                );
                let listened =
                    listen_for_invalidations(self.store.pool(), handle, self.cancel.clone()).await;
                // Stop the worker even if the listener died on its own
                self.cancel.cancel();
                if let Err(e) = worker.await {
                    warn!(error = ?e, "Dispatcher task did not shut down cleanly");
                }
                listened
            }
        }
    }
}
