//! mssql-pg-script CLI - turn an MSSQL database into a PostgreSQL script.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use dialoguer::Password;
use mssql_pg_script::{
    LogProgress, MssqlPool, ScriptError, ScriptGenerator, ScriptOptions, ScriptReport,
    SourceConfig, WriterSink,
};
use tokio::sync::watch;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "mssql-pg-script")]
#[command(about = "Convert an MSSQL database into a replayable PostgreSQL psql script")]
#[command(version)]
struct Cli {
    /// MSSQL server host
    host: String,

    /// Source database name
    database: String,

    /// Login user
    user: String,

    /// Login password (prompted when omitted)
    #[arg(short = 'p', long)]
    password: Option<String>,

    /// MSSQL server port
    #[arg(long, default_value = "1433")]
    port: u16,

    /// Name of the database the script creates [default: source name lowercased]
    #[arg(short = 'd', long)]
    destination_database: Option<String>,

    /// Write the script to this file instead of stdout
    #[arg(short = 'f', long)]
    output_file: Option<PathBuf>,

    /// Rewrite CamelCase identifiers to snake_case
    #[arg(short = 'u', long)]
    underscore_identifiers: bool,

    /// Cap on rows emitted per table
    #[arg(short = 'n', long)]
    limit_records: Option<u64>,

    /// Schema to skip (repeatable)
    #[arg(short = 'x', long = "exclude-schema")]
    exclude_schemas: Vec<String>,

    /// Encrypt the source connection: true, false or dangerously_disabled
    #[arg(long, default_value = "true")]
    encrypt: String,

    /// Trust the server certificate
    #[arg(long)]
    trust_server_cert: bool,

    /// Print the run report as JSON to stderr
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), ScriptError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| ScriptError::Config(e.to_string()))?;

    let password = match cli.password {
        Some(p) => p,
        None => Password::new()
            .with_prompt(format!("Password for {}@{}", cli.user, cli.host))
            .interact()
            .map_err(|e| ScriptError::Config(e.to_string()))?,
    };

    let source = SourceConfig {
        host: cli.host,
        port: cli.port,
        database: cli.database,
        user: cli.user,
        password,
        encrypt: cli.encrypt,
        trust_server_cert: cli.trust_server_cert,
    };
    source.validate()?;

    let options = ScriptOptions {
        destination_database: cli
            .destination_database
            .unwrap_or_else(|| source.database.to_lowercase()),
        exclude_schemas: cli.exclude_schemas.into_iter().collect::<BTreeSet<_>>(),
        underscore_identifiers: cli.underscore_identifiers,
        row_limit: cli.limit_records,
    };

    let cancel = setup_signal_handler();

    let pool = MssqlPool::new(source).await?;
    let catalog = pool.read_catalog(&options.exclude_schemas).await?;

    let generator = ScriptGenerator::new(options)?;
    let mut progress = LogProgress;

    let report = match &cli.output_file {
        Some(path) => {
            info!("Writing script to {}", path.display());
            let file = File::create(path)?;
            let mut sink = WriterSink::new(file);
            generator
                .generate(&catalog, &pool, &mut sink, &mut progress, Some(cancel))
                .await?
        }
        None => {
            let mut sink = WriterSink::new(io::stdout().lock());
            generator
                .generate(&catalog, &pool, &mut sink, &mut progress, Some(cancel))
                .await?
        }
    };

    report_summary(&report, cli.output_json)?;
    Ok(())
}

fn report_summary(report: &ScriptReport, as_json: bool) -> Result<(), ScriptError> {
    // The script itself may be on stdout, so the report goes to stderr
    let mut err = io::stderr().lock();
    if as_json {
        writeln!(err, "{}", report.to_json()?)?;
    } else {
        writeln!(err)?;
        writeln!(err, "Script completed!")?;
        writeln!(err, "  Duration: {:.2}s", report.duration_seconds)?;
        writeln!(err, "  Tables: {}", report.tables_written)?;
        writeln!(err, "  Rows: {}", report.rows_written)?;
        writeln!(err, "  Sequences: {}", report.sequences_written)?;
    }
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so a script written to stdout stays clean
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Flip the cancellation flag on SIGINT or SIGTERM. The generator checks it
/// between tables.
#[cfg(unix)]
fn setup_signal_handler() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(_) => return,
        };
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => return,
        };
        tokio::select! {
            _ = sigint.recv() => eprintln!("\nReceived SIGINT, stopping at the next table..."),
            _ = sigterm.recv() => eprintln!("\nReceived SIGTERM, stopping at the next table..."),
        }
        let _ = tx.send(true);
    });

    rx
}

#[cfg(not(unix))]
fn setup_signal_handler() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C, stopping at the next table...");
            let _ = tx.send(true);
        }
    });

    rx
}
