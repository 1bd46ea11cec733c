pub mod retry;
pub mod sql_text;

pub use retry::{run_with_retry, Attempt, Backoff, RetryPolicy};
pub use sql_text::{is_query, trim_sql};
