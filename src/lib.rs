//! Broadcast relay server core: a single-threaded readiness-driven event
//! loop that forwards every byte chunk received from one client to all
//! other connected clients, with per-connection outbound queues and
//! best-effort delivery.

pub mod broadcast;
pub mod conn;
pub mod error;
pub mod pool;
pub mod server;
pub mod shutdown;
