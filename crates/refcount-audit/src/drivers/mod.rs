//! Database driver implementations.
//!
//! - [`mysql`]: MySQL/MariaDB connection provider
//!
//! Each driver implements [`ConnectionProvider`](crate::core::ConnectionProvider),
//! turning driver rows into typed records at the boundary.

pub mod mysql;

#[cfg(test)]
pub(crate) mod memory;

pub use mysql::MysqlConnector;
