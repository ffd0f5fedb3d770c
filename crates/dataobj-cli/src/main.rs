//! CLI tool for ingesting, pruning, and scanning log data objects.

mod error;
mod ingest;
mod prune;
mod scan;

use std::{
    cell::RefCell,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use dataobj_core::{
    Config, LabelMatcher, QueryContext, StorageLocation, TenantId, scan::ColumnRef,
};
use prometheus_client::registry::Registry;
use snafu::ResultExt;
use tracing_subscriber::EnvFilter;

use crate::error::{
    CliResult, EncodeMetricsSnafu, InvalidConfigSnafu, OpenStoreSnafu, ParseConfigSnafu,
    ReadConfigSnafu, TenantSnafu,
};

#[derive(Debug, Parser)]
#[command(name = "dobj", version)]
struct Cli {
    /// Root directory of the local object store (created if missing)
    #[arg(long, global = true, default_value = "./dobj-store")]
    store: PathBuf,

    /// Tenant whose objects and index are used
    #[arg(long, global = true, default_value = "fake")]
    tenant: String,

    /// JSON config file ({"metastore": {..}, "uploader": {..}, "builder": {..}})
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace); RUST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print the command's Prometheus counters to stderr on success
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    cmd: Command,
}

/// Time window and stream selector shared by pruning commands.
#[derive(Debug, Args)]
struct WindowArgs {
    /// Window start, RFC3339
    #[arg(long, value_parser = parse_time)]
    start: DateTime<Utc>,

    /// Window end (inclusive), RFC3339
    #[arg(long, value_parser = parse_time)]
    end: DateTime<Utc>,

    /// Repeatable stream matcher: name=value, name!=value, name=~re, name!~re
    #[arg(short = 'm', long = "matcher")]
    matchers: Vec<LabelMatcher>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build, upload, and index one data object from a JSON-lines file
    Ingest {
        /// One record per line: {"labels", "timestamp", "line", "metadata"}
        #[arg(long)]
        input: PathBuf,
    },

    /// Label names of matching streams
    Labels {
        #[command(flatten)]
        window: WindowArgs,
    },

    /// Label values of matching streams
    Values {
        #[command(flatten)]
        window: WindowArgs,
    },

    /// Matching stream IDs per object and streams section
    Streams {
        #[command(flatten)]
        window: WindowArgs,
    },

    /// Logs sections with matching records
    Sections {
        #[command(flatten)]
        window: WindowArgs,

        /// Repeatable structured-metadata predicate, same syntax as --matcher
        #[arg(short = 'p', long = "predicate")]
        predicates: Vec<LabelMatcher>,
    },

    /// Print the rows of every logs section of one object
    Scan {
        /// Object path, as printed by `ingest` or `streams`
        #[arg(long)]
        object: String,

        /// Repeatable stream ID filter (default: every stream)
        #[arg(long = "stream-id")]
        stream_ids: Vec<i64>,

        /// Repeatable column: label:NAME, metadata:NAME, builtin:NAME or bare NAME
        #[arg(long = "column")]
        columns: Vec<ColumnRef>,

        #[arg(long, default_value_t = 1024)]
        batch_size: usize,
    },
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc))
}

/// Everything a command needs: configuration, storage, query context and
/// the metrics registry its components report to.
pub(crate) struct Env {
    pub(crate) config: Config,
    pub(crate) storage: StorageLocation,
    pub(crate) ctx: QueryContext,
    registry: RefCell<Registry>,
}

impl Env {
    /// Let a component register its counters.
    pub(crate) fn register_metrics(&self, register: impl FnOnce(&mut Registry)) {
        register(&mut self.registry.borrow_mut());
    }

    fn encode_metrics(&self) -> CliResult<String> {
        let mut out = String::new();
        prometheus_client::encoding::text::encode(&mut out, &self.registry.borrow())
            .context(EncodeMetricsSnafu)?;
        Ok(out)
    }
}

fn load_config(path: Option<&Path>) -> CliResult<Config> {
    let config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path).context(ReadConfigSnafu { path })?;
            serde_json::from_str(&raw).context(ParseConfigSnafu { path })?
        }
        None => Config::default(),
    };
    config.validate().context(InvalidConfigSnafu)?;
    Ok(config)
}

fn open_env(cli: &Cli) -> CliResult<Env> {
    let config = load_config(cli.config.as_deref())?;
    let tenant = TenantId::new(cli.tenant.clone()).context(TenantSnafu)?;
    let storage = StorageLocation::local(&cli.store).context(OpenStoreSnafu {
        path: cli.store.clone(),
    })?;
    Ok(Env {
        config,
        storage,
        ctx: QueryContext::new(tenant),
        registry: RefCell::new(Registry::default()),
    })
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let env = open_env(&cli)?;
    let print_metrics = cli.metrics;

    let outcome = match cli.cmd {
        Command::Ingest { input } => ingest::cmd_ingest(&env, &input).await,
        Command::Labels { window } => {
            prune::cmd_labels(&env, window.start, window.end, &window.matchers).await
        }
        Command::Values { window } => {
            prune::cmd_values(&env, window.start, window.end, &window.matchers).await
        }
        Command::Streams { window } => {
            prune::cmd_streams(&env, window.start, window.end, &window.matchers).await
        }
        Command::Sections { window, predicates } => {
            prune::cmd_sections(&env, window.start, window.end, &window.matchers, &predicates)
                .await
        }
        Command::Scan {
            object,
            stream_ids,
            columns,
            batch_size,
        } => scan::cmd_scan(&env, &object, &stream_ids, columns, batch_size).await,
    };
    outcome?;

    if print_metrics {
        eprint!("{}", env.encode_metrics()?);
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
