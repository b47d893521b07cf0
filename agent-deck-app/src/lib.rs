pub mod auth;
pub mod config;
pub mod dashboard;
pub mod input;
pub mod listener;
pub mod render;
pub mod session;

pub use config::Config;
pub use dashboard::{Control, Dashboard, DashboardDeps, Layout, View};
