//! Startup ordering, health polling, and shutdown orchestration.
//!
//! Targets subscribe to the bus before any source can publish to them, backfills run
//! once targets are up and before sources start tailing, and sources restart themselves
//! on unexpected stop with a short gap rather than taking the whole process down.

use crate::bus::{ControlKind, Message, MessageBus};
use crate::config::AppConfig;
use crate::db::{ConnectionPool, TableMetaCache};
use crate::error::{AppError, AppResult};
use crate::metrics::PipelineMetrics;
use crate::model::MappingRule;
use crate::transform::TransformEngine;
use crate::workers::init_load::InitLoadWorker;
use crate::workers::source::SourceWorker;
use crate::workers::target::TargetWorker;
use crate::workers::{new_running_flag, RunningFlag, SharedContext};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SOURCE_RESTART_GAP: Duration = Duration::from_secs(2);
const SHUTDOWN_GRACE_FLOOR: Duration = Duration::from_secs(5);

pub struct Supervisor {
    config: AppConfig,
    ctx: Arc<SharedContext>,
    monitor_interval: Duration,
    shutting_down: Arc<AtomicBool>,
}

impl Supervisor {
    pub fn new(config: AppConfig, transform_dir: impl AsRef<std::path::Path>, monitor_interval: Duration) -> AppResult<Self> {
        let ctx = Arc::new(SharedContext {
            bus: Arc::new(MessageBus::new()),
            pool: Arc::new(ConnectionPool::new()),
            metrics: Arc::new(PipelineMetrics::new()?),
            transforms: Arc::new(TransformEngine::new(transform_dir)),
            table_meta: Arc::new(TableMetaCache::new()),
            connection_health: Arc::new(Mutex::new(HashMap::new())),
            worker_running: Arc::new(Mutex::new(HashMap::new())),
        });
        Ok(Self {
            config,
            ctx,
            monitor_interval,
            shutting_down: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn context(&self) -> Arc<SharedContext> {
        self.ctx.clone()
    }

    /// Runs until a shutdown signal (SIGINT/SIGTERM) arrives, then drains in-flight work
    /// up to a bounded grace period.
    pub async fn run(&self) -> AppResult<()> {
        let rules = build_mapping_rules(&self.config)?;
        self.ctx.transforms.preload(transform_refs(&rules))?;

        let mut running_flags: Vec<(String, RunningFlag)> = Vec::new();
        let mut handles = Vec::new();

        self.spawn_targets(&rules, &mut running_flags, &mut handles).await?;
        self.run_init_loads(&rules).await;
        self.spawn_sources(&rules, &mut running_flags, &mut handles).await?;

        let health_handle = self.spawn_health_loop(running_flags);

        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received, draining workers");
        self.shutting_down.store(true, Ordering::Relaxed);
        self.ctx.bus.publish_shutdown();

        let flush_interval_floor = self
            .config
            .targets
            .values()
            .map(|t| Duration::from_secs_f64(t.batch_flush_interval))
            .max()
            .unwrap_or_default();
        let grace = SHUTDOWN_GRACE_FLOOR + flush_interval_floor;

        let drain = futures_util::future::join_all(handles);
        if tokio::time::timeout(grace, drain).await.is_err() {
            tracing::warn!("workers did not finish within the shutdown grace period");
        }

        health_handle.abort();
        self.ctx.pool.close_all().await;
        Ok(())
    }

    async fn spawn_targets(
        &self,
        rules: &[Arc<MappingRule>],
        running_flags: &mut Vec<(String, RunningFlag)>,
        handles: &mut Vec<tokio::task::JoinHandle<()>>,
    ) -> AppResult<()> {
        let mut by_target: HashMap<String, HashMap<String, Arc<MappingRule>>> = HashMap::new();
        for rule in rules {
            by_target
                .entry(rule.target.clone())
                .or_default()
                .insert(rule.target_table.clone(), rule.clone());
        }

        for (target_name, rules_by_table) in by_target {
            let target_cfg = self
                .config
                .targets
                .get(&target_name)
                .ok_or_else(|| AppError::UnknownMappingRef(target_name.clone()))?;

            let sub = self.ctx.bus.subscribe(&target_name).await;
            let running = new_running_flag();
            running_flags.push((target_name.clone(), running.clone()));

            let worker = TargetWorker {
                name: target_name.clone(),
                connection: target_cfg.connection.clone(),
                batch_size: target_cfg.batch_size,
                batch_flush_interval: Duration::from_secs_f64(target_cfg.batch_flush_interval),
                rules_by_table,
                ctx: self.ctx.clone(),
                running,
            };

            handles.push(tokio::spawn(async move {
                worker.run(sub).await;
            }));
        }
        Ok(())
    }

    async fn run_init_loads(&self, rules: &[Arc<MappingRule>]) {
        // Give target subscribers a moment to register before the backfill starts
        // publishing, so early rows don't land on an empty subscriber map.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let backfills: Vec<_> = rules
            .iter()
            .filter(|r| r.init_query.is_some())
            .map(|r| {
                let worker = InitLoadWorker {
                    rule: r.clone(),
                    ctx: self.ctx.clone(),
                };
                tokio::spawn(async move { worker.run().await })
            })
            .collect();

        for handle in backfills {
            let _ = handle.await;
        }
    }

    async fn spawn_sources(
        &self,
        rules: &[Arc<MappingRule>],
        running_flags: &mut Vec<(String, RunningFlag)>,
        handles: &mut Vec<tokio::task::JoinHandle<()>>,
    ) -> AppResult<()> {
        let mut by_source: HashMap<String, Vec<Arc<MappingRule>>> = HashMap::new();
        for rule in rules {
            by_source.entry(rule.source.clone()).or_default().push(rule.clone());
        }

        for (source_name, mapping_rules) in by_source {
            let connection = self
                .config
                .sources
                .get(&source_name)
                .ok_or_else(|| AppError::UnknownMappingRef(source_name.clone()))?
                .clone();
            let replication = self
                .config
                .replication
                .get(&source_name)
                .ok_or_else(|| AppError::UnknownMappingRef(source_name.clone()))?
                .clone();

            let running = new_running_flag();
            running_flags.push((source_name.clone(), running.clone()));

            let worker = SourceWorker {
                name: source_name.clone(),
                connection,
                replication,
                mapping_rules,
                ctx: self.ctx.clone(),
                running: running.clone(),
            };

            let bus = self.ctx.bus.clone();
            let shutting_down = self.shutting_down.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    running.store(true, Ordering::Relaxed);
                    worker.run(bus.shutdown_subscribe()).await;
                    if shutting_down.load(Ordering::Relaxed) {
                        break;
                    }
                    tracing::warn!(source = %worker.name, "source worker stopped unexpectedly, restarting");
                    tokio::time::sleep(SOURCE_RESTART_GAP).await;
                }
            }));
        }
        Ok(())
    }

    fn spawn_health_loop(&self, running_flags: Vec<(String, RunningFlag)>) -> tokio::task::JoinHandle<()> {
        let pool = self.ctx.pool.clone();
        let bus = self.ctx.bus.clone();
        let metrics = self.ctx.metrics.clone();
        let connection_health = self.ctx.connection_health.clone();
        let worker_running = self.ctx.worker_running.clone();
        let interval = self.monitor_interval;
        let connection_names: Vec<String> = self
            .config
            .sources
            .keys()
            .chain(self.config.targets.keys())
            .cloned()
            .collect();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                bus.publish(Message::control(ControlKind::Healthcheck)).await;

                for name in &connection_names {
                    let healthy = pool.is_healthy(name).await;
                    connection_health
                        .lock()
                        .expect("connection health mutex poisoned")
                        .insert(name.clone(), healthy);
                    if !healthy {
                        tracing::warn!(connection = %name, "health check failed, reconnecting");
                        metrics.inc_reconnect(name);
                        let _ = pool.reconnect(name).await;
                    }
                }
                {
                    let mut worker_running = worker_running.lock().expect("worker running mutex poisoned");
                    for (name, running) in &running_flags {
                        let is_running = running.load(Ordering::Relaxed);
                        worker_running.insert(name.clone(), is_running);
                        if !is_running {
                            tracing::debug!(worker = %name, "worker reports not running");
                        }
                    }
                }
                metrics.set_bus_stats(bus.published(), bus.dropped(), bus.total_queue_depth().await);
            }
        })
    }
}

fn build_mapping_rules(cfg: &AppConfig) -> AppResult<Vec<Arc<MappingRule>>> {
    cfg.mapping
        .iter()
        .map(|rule_cfg| MappingRule::from_config(rule_cfg).map(Arc::new))
        .collect()
}

fn transform_refs(rules: &[Arc<MappingRule>]) -> Vec<String> {
    rules
        .iter()
        .flat_map(|r| r.column_mapping.values())
        .filter_map(|spec| match spec {
            crate::model::ColumnSpec::Transform { module, function, .. } => {
                Some(format!("{module}.{function}"))
            }
            _ => None,
        })
        .collect()
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
