//! Secret payloads and how they are read from the store.

pub mod payload;
pub mod resolve;

pub use payload::{DbCredential, SecretPayload};
pub use resolve::SecretResolver;
