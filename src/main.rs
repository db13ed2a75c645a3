mod bus;
mod cli;
mod config;
mod db;
mod error;
mod filter;
mod http;
mod metrics;
mod model;
mod sql;
mod supervisor;
mod transform;
mod workers;

use clap::Parser;
use cli::{exit_code, Cli, Command, LogFormat};
use config::AppConfig;
use error::AppError;
use std::time::Duration;
use supervisor::Supervisor;

const TRANSFORM_DIR: &str = "./transforms";

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    let code = match cli.command.clone() {
        Command::Run { config } => run_pipeline(&cli, &config).await,
        Command::Test { config } => test_connections(&config).await,
    };

    std::process::exit(code);
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_tracing_level().to_string()));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match cli.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Console => subscriber.init(),
    }
}

async fn run_pipeline(cli: &Cli, config_path: &str) -> i32 {
    let config = match AppConfig::load(config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return exit_code::CONFIG_ERROR;
        }
    };

    let monitoring_enabled = cli.monitor || config.monitoring.as_ref().is_some_and(|m| m.enabled);
    let metrics_port = config.monitoring.as_ref().map(|m| m.metrics_port).unwrap_or(8080);

    let supervisor = match Supervisor::new(config, TRANSFORM_DIR, Duration::from_secs(cli.monitor_interval)) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize pipeline");
            return exit_code::CONFIG_ERROR;
        }
    };

    if monitoring_enabled {
        let ctx = supervisor.context();
        tokio::spawn(async move {
            let gather_ctx = ctx.clone();
            let health_ctx = ctx.clone();
            let result = http::run_http_server(
                "0.0.0.0",
                metrics_port,
                move || gather_ctx.metrics.encode_text(),
                move || build_health_report(&health_ctx),
            )
            .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "metrics/health server exited");
            }
        });
    }

    match supervisor.run().await {
        Ok(()) => exit_code::SUCCESS,
        Err(AppError::Shutdown) => exit_code::INTERRUPTED,
        Err(e) => {
            tracing::error!(error = %e, "pipeline exited with error");
            exit_code::CONNECTION_ERROR
        }
    }
}

fn build_health_report(ctx: &workers::SharedContext) -> http::HealthReport {
    let connections = ctx
        .connection_health
        .lock()
        .expect("connection health mutex poisoned")
        .clone();
    let workers = ctx
        .worker_running
        .lock()
        .expect("worker running mutex poisoned")
        .clone();

    let connections_down = connections.values().filter(|h| !**h).count();
    let workers_down = workers.values().filter(|r| !**r).count();

    let status = if connections_down == 0 && workers_down == 0 {
        http::OverallStatus::Healthy
    } else if connections_down == connections.len().max(1) || workers_down == workers.len().max(1) {
        http::OverallStatus::Unhealthy
    } else if connections_down > 0 {
        http::OverallStatus::Critical
    } else {
        http::OverallStatus::Warning
    };

    http::HealthReport {
        status,
        connections,
        workers,
    }
}

async fn test_connections(config_path: &str) -> i32 {
    let config = match AppConfig::load(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("config error: {e}");
            return exit_code::CONFIG_ERROR;
        }
    };

    let pool = db::ConnectionPool::new();
    let mut all_ok = true;

    for (name, conn) in config.sources.iter() {
        pool.register(name, conn.clone()).await;
        let ok = pool.is_healthy(name).await;
        println!("source '{name}': {}", if ok { "OK" } else { "FAIL" });
        all_ok &= ok;
    }
    for (name, target) in config.targets.iter() {
        pool.register(name, target.connection.clone()).await;
        let ok = pool.is_healthy(name).await;
        println!("target '{name}': {}", if ok { "OK" } else { "FAIL" });
        all_ok &= ok;
    }

    pool.close_all().await;

    if all_ok {
        exit_code::SUCCESS
    } else {
        exit_code::CONNECTION_ERROR
    }
}
