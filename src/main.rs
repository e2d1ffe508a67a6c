//! wsrpc — WebSocket JSON-RPC server with binary attachment support.
//!
//! Usage:
//!   wsrpc                          # print help
//!   wsrpc -p 9001                  # listen on 0.0.0.0:9001
//!   wsrpc -l debug -t 300          # debug logging, 5 minute idle exit

use clap::error::ErrorKind;
use clap::{ArgAction, CommandFactory, Parser, ValueEnum};
use tracing::error;
use tracing_subscriber::EnvFilter;
use wsrpc_transport::{Options, Server};

#[derive(Parser, Debug)]
#[command(
    name = "wsrpc",
    version,
    about = "A WebSocket JSON-RPC server",
    disable_help_flag = true,
    disable_version_flag = true
)]
struct Cli {
    /// Print the help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,

    /// Print the version number
    #[arg(long, action = ArgAction::Version)]
    version: Option<bool>,

    /// Set the log level
    #[arg(short, long, value_enum, default_value_t = default_level())]
    level: LogLevel,

    /// Set the listening host
    #[arg(short = 'h', long, default_value = "0.0.0.0")]
    host: String,

    /// Set the listening port
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Set the idle timeout in seconds before exit
    #[arg(short, long, default_value_t = 60)]
    timeout: u64,
}

fn default_level() -> LogLevel {
    if cfg!(debug_assertions) {
        LogLevel::Debug
    } else {
        LogLevel::Info
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Err,
    Critical,
    Off,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            // tracing has no critical tier; both map to error.
            LogLevel::Err | LogLevel::Critical => "error",
            LogLevel::Off => "off",
        }
    }
}

/// Log any panic before the default hook unwinds. Handler panics are
/// caught and mapped to error responses long before they get here; a
/// panic that does reach this hook is a bug on its way to killing the
/// process, and this makes sure it lands in the log first.
fn init_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        error!("Uncaught panic: {info}");
        default_hook(info);
    }));
}

fn parse_cli() -> Cli {
    if std::env::args().len() == 1 {
        Cli::command().print_help().ok();
        std::process::exit(0);
    }
    match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            print!("{e}");
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("Error parsing options: {e}");
            let _ = Cli::command().write_help(&mut std::io::stderr());
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = parse_cli();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(cli.level.directive()))
        .init();
    init_panic_hook();

    let options = Options {
        host: cli.host,
        port: cli.port,
        timeout_secs: cli.timeout,
        ..Options::default()
    };

    let server = Server::with_default_app();
    if let Err(e) = server.serve(options).await {
        error!("Fatal: {e}");
        std::process::abort();
    }
}
