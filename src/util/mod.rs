//! Small helpers shared by the commands.
//!
//! - **URL validation**: feed URLs must be http(s) with a host
//! - **Durations**: `agg` takes intervals such as `30s` or `1h30m`
//! - **Text**: feed text is remote input and is flattened before printing

mod duration;
mod text;
mod url_validator;

pub use duration::{parse_duration, DurationError};
pub use text::{excerpt, one_line};
pub use url_validator::{validate_feed_url, UrlValidationError};
