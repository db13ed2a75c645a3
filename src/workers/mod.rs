pub mod init_load;
pub mod source;
pub mod target;

use crate::bus::MessageBus;
use crate::db::{ConnectionPool, TableMetaCache};
use crate::metrics::PipelineMetrics;
use crate::transform::TransformEngine;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

/// Dependencies every worker needs; constructed once by the Supervisor and shared via
/// `Arc` rather than threaded through globals.
pub struct SharedContext {
    pub bus: Arc<MessageBus>,
    pub pool: Arc<ConnectionPool>,
    pub metrics: Arc<PipelineMetrics>,
    pub transforms: Arc<TransformEngine>,
    pub table_meta: Arc<TableMetaCache>,
    /// Last-observed health per connection name, refreshed by the supervisor's health
    /// loop. A plain `std::sync::Mutex` so the `/health` handler can read it without
    /// needing to be async.
    pub connection_health: Arc<Mutex<HashMap<String, bool>>>,
    /// Last-observed running state per worker name, refreshed on the same cadence.
    pub worker_running: Arc<Mutex<HashMap<String, bool>>>,
}

/// Each worker flips this to `false` on terminal stop; the Supervisor's health loop polls
/// it to decide whether a restart is due.
pub type RunningFlag = Arc<AtomicBool>;

pub fn new_running_flag() -> RunningFlag {
    Arc::new(AtomicBool::new(true))
}
