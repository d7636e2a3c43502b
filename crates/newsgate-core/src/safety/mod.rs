//! Cross-cutting safety helpers shared by every component that touches
//! secrets or logs.

pub mod redact;

pub use redact::{mask_secret, redact_secrets, Redacted};
