//! Request parsing, response assembly, and the per-connection state machine.

pub mod connection;
pub mod request;
pub mod response;

pub use connection::{Connection, State as ConnectionState};
pub use request::{Method, Request, RequestParser};
pub use response::Response;
