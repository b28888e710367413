//! Mailbox adapters for the concierge mail agents
//!
//! This crate provides [`MailProvider`](concierge_core::MailProvider)
//! implementations for Gmail and Microsoft Graph, both authenticated with an
//! OAuth refresh token.

pub mod gmail;
pub mod oauth;
pub mod outlook;

pub use gmail::{GmailMailbox, GmailSettings};
pub use oauth::{RefreshCredentials, TokenSource};
pub use outlook::{OutlookMailbox, OutlookSettings};
