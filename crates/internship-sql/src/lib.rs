//! SQL queries of the internship platform, grouped by table.
//! Every function runs a single statement unless noted otherwise.

pub mod applications;
pub mod internships;
pub mod jobs;
pub mod notifications;
pub mod subscriptions;
pub mod users;

/// Migrations of the platform database, embedded at build time.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");
