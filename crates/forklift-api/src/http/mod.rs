//! HTTP interface.

pub mod handlers;
pub mod routes;
