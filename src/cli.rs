use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug, Clone)]
#[command(name = "quillcdc", about = "Tail MySQL binlogs and replay them into target databases")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Minimum level to emit
    #[arg(long, value_enum, global = true, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Structured (json) or human-readable (console) log output
    #[arg(long, value_enum, global = true, default_value_t = LogFormat::Console)]
    pub log_format: LogFormat,

    /// Serve /metrics and /health over HTTP
    #[arg(long, global = true)]
    pub monitor: bool,

    /// Interval, in seconds, between supervisor health-loop passes
    #[arg(long, global = true, default_value_t = 30)]
    pub monitor_interval: u64,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the supervisor and run until shutdown
    Run {
        /// Path to the JSON configuration document
        config: String,
    },
    /// Open every configured source/target connection and report pass/fail, then exit
    Test {
        /// Path to the JSON configuration document
        config: String,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warning => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Console,
}

/// Process exit codes, per the CLI contract.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const CONFIG_ERROR: i32 = 1;
    pub const CONNECTION_ERROR: i32 = 2;
    pub const INTERRUPTED: i32 = 130;
}
