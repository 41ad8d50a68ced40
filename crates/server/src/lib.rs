//! Watches externally-hosted registration pages and notifies subscribers,
//! exactly once each, when a page first opens.
//!
//! The pipeline is poller -> fan-out -> delay queue -> dispatch workers;
//! each stage hands off through the backing store so a crash at any point
//! is recoverable without duplicate notifications.

use std::sync::Arc;

use lettre::{AsyncSmtpTransport, Tokio1Executor};
use sea_orm::DatabaseConnection;

use crate::config::AppConfig;

pub mod api;
pub mod cache;
pub mod channels;
pub mod config;
pub mod directory;
pub mod dispatch;
pub mod entity;
pub mod error;
pub mod fanout;
pub mod fetch;
pub mod poller;
pub mod recovery;
pub mod status;

#[derive(Clone, Debug)]
pub struct AppResources {
    pub db: Arc<DatabaseConnection>,
    pub mailer: Arc<AsyncSmtpTransport<Tokio1Executor>>,
    pub config: Arc<AppConfig>,
}
