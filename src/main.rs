use std::{io::Write, path::PathBuf, process::ExitCode, sync::Arc};

use clap::Parser;
use mongo_purge::{
    config::{self, ConfigError, ConfigOverrides, LogFormat, LogLevel, PurgeConfig},
    error::PurgeError,
    observability,
    retention::{write_interrupted, write_summary},
    runner::{RunSummary, Runner},
    store::MongoConnector,
};

/// CLI arguments for mongo-purge.
///
/// Every option overrides the matching value of the config file. The
/// snake_case spellings (`--mongo_uri`, `--db_name`, ...) are accepted too.
#[derive(Parser, Debug)]
#[command(
    version,
    about = "Delete MongoDB documents older than a retention period, in paced batches",
    long_about = None
)]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// MongoDB connection URI (e.g. mongodb://host:27017)
    #[arg(long, alias = "mongo_uri")]
    mongo_uri: Option<String>,

    /// Database to clean up
    #[arg(long, alias = "db_name")]
    db_name: Option<String>,

    /// Collection to clean up (all collections when omitted)
    #[arg(long)]
    collection: Option<String>,

    /// Username for authentication
    #[arg(long)]
    username: Option<String>,

    /// Password, or `secret-ref:<name>` to read it from the secrets backend
    #[arg(long)]
    password: Option<String>,

    /// Database holding the user's credentials [default: admin]
    #[arg(long, alias = "auth_db")]
    auth_db: Option<String>,

    /// Days of data to keep [default: 30]
    #[arg(long, alias = "days_to_keep")]
    days_to_keep: Option<u32>,

    /// Documents deleted per batch [default: 5000]
    #[arg(long, alias = "batch_size")]
    batch_size: Option<u32>,

    /// Seconds to pause after each batch [default: 0.5]
    #[arg(long, alias = "sleep_time")]
    sleep_time: Option<f64>,

    /// Print progress every this many deleted documents [default: 20000]
    #[arg(long, alias = "progress_interval")]
    progress_interval: Option<u64>,

    /// Field holding each document's age, used to filter and to order deletion [default: timestamp]
    #[arg(long, alias = "order_by_field")]
    order_by_field: Option<String>,

    /// Report how many documents would be deleted without deleting any
    #[arg(long, alias = "dry_run")]
    dry_run: bool,

    /// Maximum documents deleted per second, 0 = unlimited [default: 0]
    #[arg(long, alias = "delete_rate")]
    delete_rate: Option<u32>,

    /// Extra filter in MongoDB Extended JSON, e.g. '{"status": "inactive"}'
    #[arg(long)]
    filter: Option<String>,

    /// Append logs to this file instead of standard output
    #[arg(long, alias = "log_file")]
    log_file: Option<PathBuf>,

    /// Log level
    #[arg(long, value_enum)]
    log_level: Option<LogLevel>,

    /// Log format
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

impl Args {
    fn into_overrides(self) -> (Option<PathBuf>, ConfigOverrides) {
        let overrides = ConfigOverrides {
            uri: self.mongo_uri,
            database: self.db_name,
            collection: self.collection,
            username: self.username,
            password: self.password,
            auth_database: self.auth_db,
            age_field: self.order_by_field,
            days_to_keep: self.days_to_keep,
            filter: self.filter,
            batch_size: self.batch_size,
            sleep_secs: self.sleep_time,
            delete_rate: self.delete_rate,
            progress_interval: self.progress_interval,
            dry_run: self.dry_run,
            log_file: self.log_file,
            log_level: self.log_level,
            log_format: self.log_format,
        };
        (self.config, overrides)
    }
}

fn load_config(args: Args) -> Result<PurgeConfig, ConfigError> {
    let (path, overrides) = args.into_overrides();
    let file = path.map(|p| PurgeConfig::from_file(&p)).transpose()?;
    config::resolve(file, overrides)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(args) {
        Ok(config) => config,
        Err(e) => {
            let error = PurgeError::from(e);
            eprintln!("ERROR: {error}");
            return ExitCode::from(error.exit_code());
        }
    };

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("ERROR: {e}");
        return ExitCode::from(2);
    }

    let runner = Runner::new(config, Arc::new(MongoConnector));

    match runner.run().await {
        Ok(summary) => {
            print_summary(&summary);
            ExitCode::SUCCESS
        }
        Err(failure) => {
            let mut out = std::io::stdout().lock();
            let written = match &failure.error {
                PurgeError::Interrupted => write_interrupted(&mut out, &failure.deleted),
                error => {
                    eprintln!("ERROR: {error}");
                    if failure.deleted.values().any(|count| *count > 0) {
                        write_summary(&mut out, &failure.deleted)
                    } else {
                        Ok(())
                    }
                }
            };
            if let Err(e) = written.and_then(|()| out.flush()) {
                eprintln!("ERROR: failed to write summary: {e}");
            }
            ExitCode::from(failure.exit_code())
        }
    }
}

fn print_summary(summary: &RunSummary) {
    if summary.dry_run {
        println!(
            "[DRY RUN] {} documents would be deleted across {} collection(s).",
            summary.total_matched(),
            summary.collections.len()
        );
        return;
    }

    let mut out = std::io::stdout().lock();
    if let Err(e) = write_summary(&mut out, &summary.deleted) {
        eprintln!("ERROR: failed to write summary: {e}");
    }
}
