//! `active-ddns` command line: run either the server or the client.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use active_ddns::client::{Client, ClientConfigBuilder, ClientError};
use active_ddns::hooks::{ScriptHook, TracingErrorSink};
use active_ddns::server::{Server, ServerConfigBuilder, ServerError};
use active_ddns::transport::{TlsError, client_config, server_config_from_pem};
use active_ddns::{ConfigError, ErrorSink};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, ValueEnum};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    if cli.version {
        print_version();
        return Ok(());
    }
    let directive = log_directive(cli.log, std::env::var(EnvFilter::DEFAULT_ENV).ok());
    init_logging(&directive, cli.logtime);

    if let Some(listen_addr) = cli.server.clone() {
        return run_server(&cli, listen_addr).await;
    }
    if let Some(connect_addr) = cli.client.clone() {
        return run_client(&cli, connect_addr).await;
    }
    Cli::command().print_help()?;
    Ok(())
}

#[derive(Parser, Debug)]
#[command(
    name = "active-ddns",
    about = "A simple DDNS tool",
    disable_version_flag = true
)]
struct Cli {
    #[arg(
        short = 's',
        value_name = "ADDR",
        conflicts_with = "client",
        help = "Run as a server and listen at the specific address"
    )]
    server: Option<String>,

    #[arg(
        short = 'c',
        value_name = "ADDR",
        help = "Run as a client and connect to the specific address"
    )]
    client: Option<String>,

    #[arg(
        long,
        help = "Specify the script to be executed when the IP address is updated"
    )]
    script: Option<String>,

    #[arg(
        long,
        default_value = "{}",
        help = "Specify the keyword in the script to be replaced by the updated IP address"
    )]
    keyword: String,

    #[arg(
        long,
        help = "Specify the shell and arguments which is used to run the DDNS script"
    )]
    shell: Option<String>,

    #[arg(
        long,
        value_name = "FILE",
        help = "Specify the path to the TLS certificate file"
    )]
    cert: Option<PathBuf>,

    #[arg(
        long,
        value_name = "FILE",
        help = "Specify the path to the TLS private key file"
    )]
    key: Option<PathBuf>,

    #[arg(long, help = "Disable TLS")]
    notls: bool,

    #[arg(long, help = "Skip verification of the server certificate")]
    insecuretls: bool,

    #[arg(
        long,
        value_name = "MS",
        default_value_t = 5000,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Specify the interval between heartbeats in milliseconds"
    )]
    hbi: u64,

    #[arg(
        long,
        value_name = "COUNT",
        default_value_t = 3,
        value_parser = clap::value_parser!(u32).range(1..),
        help = "Specify the number of missed heartbeats allowed before disconnection"
    )]
    mhb: u32,

    #[arg(
        long,
        value_name = "MS",
        default_value_t = 1000,
        help = "Specify the minimal interval between reconnections in milliseconds"
    )]
    minri: u64,

    #[arg(
        long,
        value_name = "MS",
        default_value_t = 15000,
        help = "Specify the maximal interval between reconnections in milliseconds"
    )]
    maxri: u64,

    #[arg(
        long,
        value_enum,
        help = "Specify the log level [default: info, or RUST_LOG when set]"
    )]
    log: Option<LogLevel>,

    #[arg(long, help = "Output logs with timestamps")]
    logtime: bool,

    #[arg(long, help = "Print version information and exit")]
    version: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Off,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Tls(#[from] TlsError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// `--log` wins over `RUST_LOG`; with neither, log at info.
fn log_directive(flag: Option<LogLevel>, env: Option<String>) -> String {
    match (flag, env) {
        (Some(level), _) => level.directive().to_string(),
        (None, Some(env)) if !env.trim().is_empty() => env,
        (None, _) => LogLevel::Info.directive().to_string(),
    }
}

/// Errors go to stderr, everything else to stdout.
fn init_logging(directive: &str, timestamps: bool) {
    let filter = EnvFilter::try_new(directive)
        .unwrap_or_else(|_| EnvFilter::new(LogLevel::Info.directive()));
    let writer = std::io::stderr
        .with_max_level(Level::ERROR)
        .or_else(std::io::stdout);
    let layer = fmt::layer().with_target(false).with_writer(writer);

    if timestamps {
        tracing_subscriber::registry().with(layer).with(filter).init();
    } else {
        tracing_subscriber::registry()
            .with(layer.without_time())
            .with(filter)
            .init();
    }
}

fn version_statement() -> [String; 2] {
    [
        format!(
            "{} {} ({}/{})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS,
            std::env::consts::ARCH
        ),
        "A simple DDNS tool".to_string(),
    ]
}

fn print_version() {
    for line in version_statement() {
        println!("{line}");
    }
}

fn shutdown_on_ctrl_c() -> CancellationToken {
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutting down"),
            Err(err) => error!("cannot listen for ctrl-c: {err}"),
        }
        token.cancel();
    });
    shutdown
}

async fn run_server(cli: &Cli, listen_addr: String) -> Result<(), CliError> {
    let tls = if cli.notls {
        None
    } else {
        let (Some(cert), Some(key)) = (cli.cert.as_deref(), cli.key.as_deref()) else {
            Cli::command()
                .error(
                    ErrorKind::MissingRequiredArgument,
                    "a valid certificate and private key should be specified with --cert and --key",
                )
                .exit()
        };
        Some(server_config_from_pem(cert, key)?)
    };
    let config = ServerConfigBuilder::new()
        .listen_addr(listen_addr)
        .heartbeat_interval(Duration::from_millis(cli.hbi))
        .missed_heartbeats(cli.mhb)
        .build()?;
    let errors: Arc<dyn ErrorSink> = Arc::new(TracingErrorSink::new());

    print_version();
    match tls {
        Some(tls) => {
            let server = Server::bind_tls(config, tls, errors).await?;
            server.run(shutdown_on_ctrl_c()).await;
        }
        None => {
            let server = Server::bind(config, errors).await?;
            server.run(shutdown_on_ctrl_c()).await;
        }
    }
    Ok(())
}

async fn run_client(cli: &Cli, connect_addr: String) -> Result<(), CliError> {
    let Some(script) = cli.script.as_deref() else {
        Cli::command()
            .error(
                ErrorKind::MissingRequiredArgument,
                "a script should be specified with --script",
            )
            .exit()
    };
    if cli.keyword.is_empty() {
        Cli::command()
            .error(
                ErrorKind::InvalidValue,
                "a non-empty keyword should be specified with --keyword",
            )
            .exit()
    }
    let mut hook = ScriptHook::with_keyword(script, cli.keyword.as_str())?;
    if let Some(shell) = cli.shell.as_deref() {
        hook = hook.with_shell(shell);
    }

    let config = ClientConfigBuilder::new()
        .connect_addr(connect_addr)
        .heartbeat_interval(Duration::from_millis(cli.hbi))
        .missed_heartbeats(cli.mhb)
        .redial_interval(Duration::from_millis(cli.minri), Duration::from_millis(cli.maxri))
        .build()?;
    let errors: Arc<dyn ErrorSink> = Arc::new(TracingErrorSink::new());

    print_version();
    if cli.notls {
        let client = Client::tcp(config, errors, Arc::new(hook)).await?;
        client.run(shutdown_on_ctrl_c()).await;
        return Ok(());
    }
    let tls = client_config(cli.insecuretls)?;
    let client = Client::tls(config, tls, errors, Arc::new(hook)).await?;
    client.run(shutdown_on_ctrl_c()).await;
    Ok(())
}
