//! frpc-panel - a small web control panel for the frpc reverse-proxy client
//!
//! This library provides:
//! - Storage for the TOML config files in a single directory
//! - Supervision of one frpc process running the active config
//! - An HTTP JSON API behind Basic authentication, plus the static front end
//! - Admin credential resolution (environment, persisted file, or generated)

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod panel;
pub mod process;
pub mod store;
pub mod tls;
