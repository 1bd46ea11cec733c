pub mod error;
pub mod types;
pub mod value;

pub use error::{DbError, Result};
pub use types::{ConnectionId, Field, Row};
pub use value::Value;
