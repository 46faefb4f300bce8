use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use daily_html::background_jobs::jobs::DailyReportJob;
use daily_html::background_jobs::{run_job_now, BackgroundJob, JobContext, JobScheduler};
use daily_html::config::{
    AppConfig, CliConfig, ConnectPolicyKind, EntityErrorPolicy, FileConfig, SinkKind,
    DEFAULT_INTERVAL_HOURS,
};
use daily_html::connection::{
    ConnectPolicy, ConnectionProvider, ScopedConnection, DEFAULT_CONNECT_ATTEMPTS,
    DEFAULT_CONNECT_DELAY,
};
use daily_html::history_store::{Entity, EntityId, HistoryStore, SqliteHistoryStore};
use daily_html::ReportRenderer;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

/// Publishes a daily HTML history report for every tracked entity.
#[derive(Parser, Debug)]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH")), about)]
struct CliArgs {
    /// Path to a TOML config file. Values in the file override CLI arguments.
    #[clap(long, global = true, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite database holding the source and history tables.
    #[clap(long, global = true, env = "SERVERLESS_DB")]
    pub db: Option<String>,

    /// Whether to retry the initial database connection.
    #[clap(long, global = true, value_enum, default_value_t = ConnectPolicyKind::Bounded)]
    pub connect_policy: ConnectPolicyKind,

    /// Connection attempts under the bounded policy.
    #[clap(long, global = true, default_value_t = DEFAULT_CONNECT_ATTEMPTS)]
    pub connect_attempts: u32,

    /// Seconds to wait between connection attempts.
    #[clap(long, global = true, default_value_t = DEFAULT_CONNECT_DELAY.as_secs())]
    pub connect_delay_secs: u64,

    /// Where rendered reports go.
    #[clap(long, global = true, value_enum, default_value_t = SinkKind::Filesystem)]
    pub sink: SinkKind,

    /// Output directory of the filesystem sink.
    #[clap(long, global = true, value_parser = parse_path)]
    pub out_dir: Option<PathBuf>,

    /// Storage account connection string of the blob sink.
    #[clap(long, global = true, env = "HTML_ASA_CONN_STRING", hide_env_values = true)]
    pub blob_connection_string: Option<String>,

    /// HTML template to use instead of the built-in one.
    #[clap(long, global = true, value_parser = parse_path)]
    pub template: Option<PathBuf>,

    /// What to do when the report of a single entity fails.
    #[clap(long, global = true, value_enum, default_value_t = EntityErrorPolicy::Skip)]
    pub on_entity_error: EntityErrorPolicy,

    /// Hours between scheduled runs.
    #[clap(long, global = true, default_value_t = DEFAULT_INTERVAL_HOURS)]
    pub interval_hours: u64,

    /// Wait for the first interval instead of running on startup.
    #[clap(long, global = true)]
    pub no_startup_run: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the report job on a schedule until interrupted.
    Run,

    /// Run the report job once and exit. Exits non-zero if the run fails.
    RunOnce,

    /// Inserts an entity into the source table, or updates its name and value.
    AddEntity {
        uid: EntityId,
        name: String,
        value: i64,
    },

    /// Prints the latest stored history of an entity as JSON.
    History { uid: EntityId },
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db: self.db.clone(),
            connect_policy: self.connect_policy,
            connect_attempts: self.connect_attempts,
            connect_delay_secs: self.connect_delay_secs,
            sink: self.sink,
            out_dir: self.out_dir.clone(),
            blob_connection_string: self.blob_connection_string.clone(),
            template_path: self.template.clone(),
            on_entity_error: self.on_entity_error,
            interval_hours: self.interval_hours,
            run_on_startup: !self.no_startup_run,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    match cli_args.command {
        Command::Run => run_scheduled(config).await,
        Command::RunOnce => run_once(config).await,
        Command::AddEntity { uid, name, value } => {
            tokio::task::spawn_blocking(move || add_entity(&config, Entity { uid, name, value }))
                .await?
        }
        Command::History { uid } => {
            tokio::task::spawn_blocking(move || print_history(&config, uid)).await?
        }
    }
}

/// Fail at startup on a template that every run would reject.
fn check_template(config: &AppConfig) -> Result<()> {
    if let Some(path) = &config.template_path {
        ReportRenderer::from_file(path)
            .with_context(|| format!("Invalid template {:?}", path))?;
    }
    Ok(())
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C, shutting down...");
                token.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });
}

async fn run_scheduled(config: AppConfig) -> Result<()> {
    check_template(&config)?;
    info!(
        "daily-html {}-{} running every {:?}, sink: {:?}",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        config.schedule.interval,
        config.sink
    );

    let shutdown_token = CancellationToken::new();
    cancel_on_ctrl_c(shutdown_token.clone());

    let mut scheduler = JobScheduler::new(shutdown_token);
    scheduler.register_job(Arc::new(DailyReportJob::new(&config)));
    scheduler.run().await;
    Ok(())
}

async fn run_once(config: AppConfig) -> Result<()> {
    check_template(&config)?;
    info!("Running daily report once, sink: {:?}", config.sink);

    let token = CancellationToken::new();
    cancel_on_ctrl_c(token.clone());

    let job: Arc<dyn BackgroundJob> = Arc::new(DailyReportJob::new(&config));
    if let Err(e) = run_job_now(job, JobContext::new(token)).await {
        bail!("Daily report run failed: {}", e);
    }
    Ok(())
}

fn open_connection(config: &AppConfig) -> Result<ScopedConnection> {
    ConnectionProvider::new(config.db.clone(), ConnectPolicy::Single)
        .acquire()?
        .context("No database connection")
}

fn add_entity(config: &AppConfig, entity: Entity) -> Result<()> {
    let conn = open_connection(config)?;
    SqliteHistoryStore::new(&conn).upsert_entity(&entity)?;
    conn.release()?;
    println!("Saved entity {} ({}) with value {}", entity.uid, entity.name, entity.value);
    Ok(())
}

fn print_history(config: &AppConfig, uid: EntityId) -> Result<()> {
    let conn = open_connection(config)?;
    let store = SqliteHistoryStore::new(&conn);
    if store.get_entity(uid)?.is_none() {
        bail!("Entity {} not found in source table", uid);
    }
    match store.get_latest_snapshot(uid)? {
        Some(snapshot) => {
            let rows = snapshot
                .rows()
                .with_context(|| format!("Corrupt history for entity {}", uid))?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        None => println!("No history for entity {}", uid),
    }
    conn.release()?;
    Ok(())
}
