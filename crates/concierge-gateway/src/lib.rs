//! HTTP surface for the concierge backend
//!
//! Exposes the chat query endpoint, the office add-in and browser plugin
//! endpoints, PDF upload, and project/program/task record CRUD.

pub mod api;
pub mod server;

pub use server::{GatewayServer, GatewayState, router};
