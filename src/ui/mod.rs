pub mod app;
pub mod form;

pub use app::App;
pub use form::{FieldId, InputForm};
