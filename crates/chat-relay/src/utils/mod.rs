pub mod error;
pub mod telemetry;

pub use error::{ErrorCode, RelayError, UpstreamFailure};
