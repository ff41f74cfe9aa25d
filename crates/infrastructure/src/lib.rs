//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod postgres_grant_connection;

pub use postgres_grant_connection::PostgresGrantConnection;
