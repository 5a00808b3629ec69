use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{error, info, info_span, Instrument, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

mod aggregate;
mod config;
mod db;
mod error;
mod grades;
mod merge;
mod metrics;
mod models;
mod normalize;
mod pipeline;
mod report;
mod risk;
mod sentiment;
mod sources;
mod validation;

use config::ModelConfig;
use error::{PipelineError, PipelineResult};
use metrics::{MetricsEngine, RankMetrics};
use models::{AnalysisResult, FailureResponse};
use sentiment::SentimentClassifier;
use sources::{Source, SourceSnapshot};

const SENTIMENT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "cohort-early-warning")]
#[command(about = "Early warning analysis of student risk from school records", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Postgres connection string for the document store
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// Dataset (school database) whose collections are analysed
    #[arg(long, global = true, env = "EARLY_WARNING_DATASET", default_value = "escuela_db")]
    dataset: String,

    /// TOML file overriding model parameters
    #[arg(long, global = true)]
    model_config: Option<PathBuf>,

    /// Base URL of an external sentiment service
    #[arg(long, global = true, env = "SENTIMENT_SERVICE_URL")]
    sentiment_url: Option<String>,

    /// Preferred metrics backend
    #[arg(long, global = true, value_enum, default_value_t = MetricsChoice::Rank)]
    metrics: MetricsChoice,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed documents into every collection
    Seed,
    /// Import documents for one collection from a CSV file
    Import {
        /// Collection name, e.g. asistencia or primer_bimestre
        #[arg(long)]
        collection: String,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Run the analysis and emit the result as JSON
    Analyze {
        /// Read collections from <dir>/<collection>.json|csv instead of Postgres
        #[arg(long)]
        from_dir: Option<PathBuf>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Run the analysis and write a markdown report
    Report {
        #[arg(long)]
        from_dir: Option<PathBuf>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum MetricsChoice {
    /// Rank-based AUC, falling back to pairwise on bad input
    Rank,
    /// Direct pairwise computation only
    Pairwise,
}

impl MetricsChoice {
    fn engine(self) -> MetricsEngine {
        match self {
            MetricsChoice::Rank => MetricsEngine::with_backend(Box::new(RankMetrics)),
            MetricsChoice::Pairwise => MetricsEngine::manual(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let span = info_span!("analysis", run_id = %Uuid::new_v4());
    run(cli).instrument(span).await
}

fn database_url(cli: &Cli) -> anyhow::Result<&str> {
    cli.database_url
        .as_deref()
        .context("DATABASE_URL must be set to the Postgres document store")
}

async fn open_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
}

async fn connect(cli: &Cli) -> anyhow::Result<PgPool> {
    open_pool(database_url(cli)?)
        .await
        .context("failed to connect to Postgres")
}

/// An unreachable store is a retrieval failure of the run, not a setup error.
fn connection_failure(e: sqlx::Error) -> PipelineError {
    PipelineError::Retrieval {
        source_name: "connection".to_string(),
        message: e.to_string(),
    }
}

fn failure_json(e: &PipelineError) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&FailureResponse::new(e.to_string()))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::InitDb => {
            let pool = connect(&cli).await?;
            let outcome = db::init_db(&pool).await;
            pool.close().await;
            outcome?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect(&cli).await?;
            let outcome = db::seed(&pool, &cli.dataset).await;
            pool.close().await;
            let inserted = outcome?;
            println!("Inserted {inserted} seed documents into {}.", cli.dataset);
        }
        Commands::Import { collection, csv } => {
            let source = Source::from_collection(collection).with_context(|| {
                format!("unknown collection '{collection}'")
            })?;
            let pool = connect(&cli).await?;
            let outcome = db::import_csv(&pool, &cli.dataset, source, csv).await;
            pool.close().await;
            let inserted = outcome?;
            println!(
                "Inserted {inserted} {} documents from {}.",
                source,
                csv.display()
            );
        }
        Commands::Analyze { from_dir, out } => match analyze(&cli, from_dir.as_deref()).await? {
            Ok(result) => {
                let json = serde_json::to_string_pretty(&result)?;
                match out {
                    Some(path) => {
                        std::fs::write(path, json)?;
                        println!("Analysis written to {}.", path.display());
                    }
                    None => println!("{json}"),
                }
            }
            Err(e) => {
                error!("analysis failed: {}", e);
                println!("{}", failure_json(&e)?);
                anyhow::bail!("analysis failed: {e}");
            }
        },
        Commands::Report {
            from_dir,
            out,
            limit,
        } => {
            let result = analyze(&cli, from_dir.as_deref()).await??;
            let report = report::build_report(&result, *limit);
            std::fs::write(out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

/// Outer errors are caller or setup problems; the inner result is the
/// pipeline outcome.
async fn analyze(
    cli: &Cli,
    from_dir: Option<&Path>,
) -> anyhow::Result<PipelineResult<AnalysisResult>> {
    let config = match &cli.model_config {
        Some(path) => ModelConfig::load(path)?,
        None => ModelConfig::default(),
    };

    let snapshot = match from_dir {
        Some(dir) => SourceSnapshot::load_dir(dir),
        None => match open_pool(database_url(cli)?).await {
            Ok(pool) => {
                let snapshot = db::fetch_snapshot(&pool, &cli.dataset).await;
                pool.close().await;
                snapshot
            }
            Err(e) => Err(connection_failure(e)),
        },
    };
    let snapshot = match snapshot {
        Ok(snapshot) => snapshot,
        Err(e) => return Ok(Err(e)),
    };
    info!("snapshot loaded for dataset {}", cli.dataset);

    let sentiment_url = cli.sentiment_url.clone();
    let engine = cli.metrics.engine();
    let span = Span::current();
    let outcome = tokio::task::spawn_blocking(move || {
        span.in_scope(|| -> anyhow::Result<PipelineResult<AnalysisResult>> {
            let classifier =
                SentimentClassifier::from_service(sentiment_url.as_deref(), SENTIMENT_TIMEOUT)
                    .context("failed to build sentiment classifier")?;
            Ok(pipeline::run_analysis(&snapshot, &config, &classifier, &engine))
        })
    })
    .await
    .context("analysis task failed")??;

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn connection_failure_renders_as_failed_run() {
        let e = connection_failure(sqlx::Error::PoolTimedOut);
        assert!(matches!(&e, PipelineError::Retrieval { source_name, .. } if source_name == "connection"));

        let json: serde_json::Value = serde_json::from_str(&failure_json(&e).unwrap()).unwrap();
        assert_eq!(json["success"], false);
        let message = json["error"].as_str().unwrap();
        assert!(message.contains("connection"));
        assert!(message.contains("timed out"));
    }

    #[tokio::test]
    async fn unreachable_database_is_a_pipeline_failure() {
        let cli = cli(&[
            "cohort-early-warning",
            "--database-url",
            "not-a-postgres-url",
            "analyze",
        ]);
        let outcome = analyze(&cli, None).await.unwrap();
        assert!(matches!(
            outcome,
            Err(PipelineError::Retrieval { source_name, .. }) if source_name == "connection"
        ));
    }

    #[tokio::test]
    async fn missing_database_url_is_a_caller_error() {
        let mut cli = cli(&["cohort-early-warning", "analyze"]);
        cli.database_url = None;
        assert!(analyze(&cli, None).await.is_err());
    }
}
