// Library exports for traffic-analyzer
pub mod analysis;
pub mod config;
pub mod traffic;
pub mod ui;
pub mod utils;

pub use analysis::statistics;
pub use config::settings;
pub use traffic::{generator, probe, receiver};
pub use ui::app;
pub use utils::formatting;

// Error types
pub use anyhow::{Error, Result};
