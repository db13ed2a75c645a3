//! Named, retrying MySQL connection pools.
//!
//! One `ConnectionHandle` per configured source/target name; `reconnect` replaces the
//! handle's pool atomically so in-flight borrowers of the old pool finish against it
//! while new callers get the fresh one.

use crate::config::ConnectionConfig;
use crate::error::{AppError, AppResult};
use mysql_async::{Opts, OptsBuilder, Pool};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_WRITE_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRY_ATTEMPTS: usize = 3;

struct ConnectionHandle {
    config: ConnectionConfig,
    pool: Pool,
    last_ping: Option<Instant>,
}

fn opts_for(config: &ConnectionConfig) -> Opts {
    OptsBuilder::default()
        .ip_or_hostname(config.host.clone())
        .tcp_port(config.port)
        .user(Some(config.user.clone()))
        .pass(Some(config.password.clone()))
        .db_name(Some(config.database.clone()))
        .tcp_connect_timeout(Some(CONNECT_TIMEOUT))
        .read_timeout(Some(READ_WRITE_TIMEOUT))
        .write_timeout(Some(READ_WRITE_TIMEOUT))
        .init(vec![
            "SET NAMES utf8mb4".to_string(),
            "SET SESSION wait_timeout=28800, interactive_timeout=28800".to_string(),
        ])
        .into()
}

pub struct ConnectionPool {
    handles: Mutex<HashMap<String, ConnectionHandle>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub async fn register(&self, name: &str, config: ConnectionConfig) {
        let pool = Pool::new(opts_for(&config));
        let mut handles = self.handles.lock().await;
        handles.insert(
            name.to_string(),
            ConnectionHandle {
                config,
                pool,
                last_ping: None,
            },
        );
    }

    pub async fn get(&self, name: &str) -> AppResult<Pool> {
        let handles = self.handles.lock().await;
        handles
            .get(name)
            .map(|h| h.pool.clone())
            .ok_or_else(|| AppError::ConnectionNotFound(name.to_string()))
    }

    /// Ping without reconnecting; records the attempt time.
    pub async fn is_healthy(&self, name: &str) -> bool {
        let pool = match self.get(name).await {
            Ok(p) => p,
            Err(_) => return false,
        };
        let healthy = match pool.get_conn().await {
            Ok(mut conn) => mysql_async::prelude::Queryable::query_drop(&mut conn, "SELECT 1").await.is_ok(),
            Err(_) => false,
        };

        let mut handles = self.handles.lock().await;
        if let Some(h) = handles.get_mut(name) {
            h.last_ping = Some(Instant::now());
        }
        healthy
    }

    /// Closes and rebuilds the named connection pool from its stored config.
    pub async fn reconnect(&self, name: &str) -> AppResult<()> {
        let mut handles = self.handles.lock().await;
        let handle = handles
            .get_mut(name)
            .ok_or_else(|| AppError::ConnectionNotFound(name.to_string()))?;

        let old_pool = std::mem::replace(&mut handle.pool, Pool::new(opts_for(&handle.config)));
        handle.last_ping = None;
        tokio::spawn(async move {
            let _ = old_pool.disconnect().await;
        });
        Ok(())
    }

    pub async fn close(&self, name: &str) {
        let mut handles = self.handles.lock().await;
        if let Some(handle) = handles.remove(name) {
            let _ = handle.pool.disconnect().await;
        }
    }

    pub async fn close_all(&self) {
        let mut handles = self.handles.lock().await;
        for (_, handle) in handles.drain() {
            let _ = handle.pool.disconnect().await;
        }
    }

    /// Runs `op` against the named pool, retrying up to `MAX_RETRY_ATTEMPTS` on
    /// connection-class errors with `attempt * 1s` backoff; reconnects the pool between
    /// attempts. Any other error is surfaced immediately without retry.
    pub async fn with_retry<T, F, Fut>(&self, name: &str, mut op: F) -> AppResult<T>
    where
        F: FnMut(Pool) -> Fut,
        Fut: std::future::Future<Output = AppResult<T>>,
    {
        let mut attempt = 0usize;
        loop {
            let pool = self.get(name).await?;
            match op(pool).await {
                Ok(v) => return Ok(v),
                Err(AppError::MySql(e)) if is_connection_class(&e) && attempt < MAX_RETRY_ATTEMPTS => {
                    attempt += 1;
                    tracing::warn!(name, attempt, error = %e, "connection-class error, reconnecting and retrying");
                    let _ = self.reconnect(name).await;
                    tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection-class errors warrant reconnect-and-retry; everything else surfaces
/// immediately.
pub fn is_connection_class(e: &mysql_async::Error) -> bool {
    match e {
        mysql_async::Error::Io(_) => true,
        mysql_async::Error::Driver(_) => true,
        mysql_async::Error::Server(server_err) => {
            // 2006 (server gone), 2013 (lost connection during query)
            matches!(server_err.code, 2006 | 2013)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unregistered_name_is_not_found() {
        let pool = ConnectionPool::new();
        let err = pool.get("nope").await.unwrap_err();
        assert!(matches!(err, AppError::ConnectionNotFound(_)));
    }
}
