pub mod statistics;

pub use statistics::{DelayRecorder, TrafficStatistics};
