pub mod settings;

pub use settings::{Config, GeneratorConfig, LoggingConfig, ReceiverConfig, UiConfig};
