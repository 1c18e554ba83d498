pub mod errors;
pub mod generator;
pub mod probe;
pub mod receiver;

pub use errors::TrafficError;
pub use generator::{GeneratorHandle, GeneratorSummary, TrafficGenerator};
pub use probe::ProbeHeader;
pub use receiver::{ReceiverHandle, ReceiverProgress, TrafficReceiver};
