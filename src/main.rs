use anyhow::{bail, Context, Result};
use azinv::azure::client::AzureClient;
use azinv::azure::error::ApiError;
use azinv::azure::http::format_azure_error;
use azinv::config::Config;
use azinv::plugin::{Cancellation, Plugin, QueryRequest, Row};
use azinv::resource::{get_all_table_names, get_table, transform::format_cell, TableDef};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Widest a text table cell may get before it is truncated
const MAX_CELL_WIDTH: usize = 60;

/// Query Azure resources as tables
#[derive(Parser, Debug)]
#[command(name = "azinv", version = azinv::VERSION, about, long_about = None)]
struct Args {
    /// Config file (defaults to the azinv config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Azure subscription to query
    #[arg(short, long)]
    subscription: Option<String>,

    /// Azure cloud environment (AzurePublicCloud, AzureUSGovernmentCloud, AzureChinaCloud)
    #[arg(short, long)]
    environment: Option<String>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List available tables
    Tables,

    /// Show the columns of a table
    Columns { table: String },

    /// Query a table
    Query {
        table: String,

        /// Equality qualifier, `column=value` (repeatable)
        #[arg(short = 'w', long = "where", value_parser = parse_qual)]
        quals: Vec<(String, String)>,

        /// Comma separated columns to return
        #[arg(short, long, value_delimiter = ',')]
        columns: Option<Vec<String>>,

        /// Maximum number of rows
        #[arg(short, long)]
        limit: Option<u64>,

        #[arg(short, long, value_enum, default_value = "table")]
        output: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn parse_qual(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((column, value)) if !column.trim().is_empty() => {
            Ok((column.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected column=value, got '{}'", s)),
    }
}

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok());

    let tracing_level = match (level.to_tracing_level(), &env_filter) {
        (Some(l), _) => l,
        (None, Some(_)) => Level::TRACE,
        (None, None) => return None,
    };

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file {}: {}", log_path.display(), e);
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    let builder = tracing_subscriber::fmt()
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    match env_filter {
        Some(filter) => builder.with_env_filter(filter).init(),
        None => builder.with_max_level(tracing_level).init(),
    }

    tracing::info!("azinv {} started with log level: {:?}", azinv::VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("azinv").join("azinv.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".azinv").join("azinv.log");
    }
    PathBuf::from("azinv.log")
}

/// File, then environment, then flags
fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(args.config.as_deref())?;
    config.apply_env();

    if let Some(subscription) = &args.subscription {
        config.subscription_id = Some(subscription.clone());
    }
    if let Some(environment) = &args.environment {
        config.environment = Some(environment.clone());
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level);

    match &args.command {
        Command::Tables => {
            for name in get_all_table_names() {
                if let Some(table) = get_table(name) {
                    println!("{:<45} {}", name, table.description);
                }
            }
            Ok(())
        }
        Command::Columns { table } => {
            let table = lookup_table(table)?;
            for column in &table.columns {
                println!(
                    "{:<40} {:<10} {}",
                    column.name,
                    column.column_type.as_str(),
                    column.description
                );
            }
            Ok(())
        }
        Command::Query {
            table,
            quals,
            columns,
            limit,
            output,
        } => {
            let table = lookup_table(table)?;
            let config = load_config(&args)?;

            let request = QueryRequest {
                table: table.name.clone(),
                quals: quals.iter().cloned().collect(),
                columns: columns.clone(),
                limit: *limit,
            };

            if let Err(e) = run_query(&config, table, request, *output).await {
                match e.downcast_ref::<ApiError>() {
                    Some(api_err) => bail!("{}", format_azure_error(api_err)),
                    None => return Err(e),
                }
            }
            Ok(())
        }
    }
}

fn lookup_table(name: &str) -> Result<&'static TableDef> {
    get_table(name).with_context(|| {
        format!(
            "Unknown table '{}'. Run 'azinv tables' to list tables",
            name
        )
    })
}

async fn run_query(
    config: &Config,
    table: &'static TableDef,
    request: QueryRequest,
    output: OutputFormat,
) -> Result<()> {
    let client = AzureClient::new(config).await?;
    let plugin = Plugin::new(client, config.rate_limit);

    let headers: Vec<String> = match &request.columns {
        Some(columns) => columns.clone(),
        None => table.columns.iter().map(|c| c.name.clone()).collect(),
    };

    let (tx, mut rx) = mpsc::channel::<Row>(64);
    let cancel = Cancellation::new();

    let query = {
        let cancel = cancel.clone();
        tokio::spawn(async move { plugin.execute(request, tx, cancel).await })
    };

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, cancelling query");
                cancel.cancel();
            }
        });
    }

    let mut rows = Vec::new();
    while let Some(row) = rx.recv().await {
        match output {
            OutputFormat::Json => println!("{}", serde_json::to_string(&row)?),
            OutputFormat::Table => rows.push(row),
        }
    }

    let streamed = query.await.context("Query task failed")??;
    tracing::info!("Query returned {} rows", streamed);

    if let OutputFormat::Table = output {
        print_table(&headers, &rows);
        eprintln!("({} rows)", streamed);
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(3)).collect();
        out.push_str("...");
        out
    }
}

fn print_table(headers: &[String], rows: &[Row]) {
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            headers
                .iter()
                .map(|h| {
                    let value = row.get(h).cloned().unwrap_or_default();
                    truncate(&format_cell(&value), MAX_CELL_WIDTH)
                })
                .collect()
        })
        .collect();

    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            cells
                .iter()
                .map(|r| r[i].chars().count())
                .chain(std::iter::once(h.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |values: Vec<String>| {
        values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{:<width$}", v, width = *w))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    println!("{}", line(headers.iter().map(|h| h.to_uppercase()).collect()));
    for row in cells {
        println!("{}", line(row));
    }
}
