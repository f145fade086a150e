mod account;
mod admin;
mod health;

pub use account::{me, session};
pub use admin::purge_cache;
pub use health::{health_check, readiness_check, stats};
