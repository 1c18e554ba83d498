pub mod formatting;

pub use formatting::{format_bitrate, format_bytes, format_elapsed, truncate_string};
