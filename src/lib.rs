//! Concurrency and lifecycle core of a single-host HTTP/1.1 serving engine:
//! reactor loop, timer heap, worker pool, byte buffer, and connection state
//! machine. TLS, HTTP/2, multi-process sharding, and cross-host
//! coordination are out of scope — this crate is the part of a web server
//! that reads bytes, dispatches work, and writes bytes back.

pub mod buffer;
pub mod config;
pub mod error;
pub mod http;
pub mod log;
pub mod pool;
pub mod reactor;
pub mod server;
pub mod sql;
pub mod timer;

pub use config::Config;
pub use error::{Error, Result};
pub use server::Server;
