//! Top-level wiring: one `Server` owns the config, the log sink, the SQL
//! pool, the worker pool, and the reactor, and exposes a single blocking
//! `run`.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::log::{self, Log};
use crate::pool::WorkerPool;
use crate::reactor::{Reactor, ShutdownHandle};
use crate::sql::SqlPool;

pub struct Server {
    config: Config,
    reactor: Reactor,
    _sql_pool: Arc<SqlPool>,
    _log: Option<Arc<Log>>,
}

impl Server {
    /// Builds every collaborator described by `config` and registers the
    /// listener, but does not start serving — call `run` for that.
    pub fn build(config: Config) -> Result<Self> {
        let log = if config.open_log {
            let log = Log::init(&config.log_dir, config.log_level, config.log_queue_size, config.log_max_lines)?;
            log::install_global(log.clone());
            Some(log)
        } else {
            None
        };

        let sql_pool = Arc::new(SqlPool::new(
            config.connect_pool_num,
            &config.sql_host,
            config.sql_port,
            &config.sql_user,
            &config.sql_pwd,
            &config.sql_db,
        ));

        let pool = Arc::new(WorkerPool::new(config.thread_num));

        let reactor = Reactor::new(
            config.bind_addr(),
            config.src_dir.clone(),
            config.max_body_bytes,
            Duration::from_millis(config.timeout_ms),
            pool,
        )?;

        info!(port = config.port, thread_num = config.thread_num, "server built");

        Ok(Server { config, reactor, _sql_pool: sql_pool, _log: log })
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.reactor.shutdown_handle()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Blocks, serving connections until `shutdown_handle().shutdown()` is
    /// called from another thread (typically a signal handler).
    pub fn run(&mut self) -> Result<()> {
        self.reactor.run()
    }
}
