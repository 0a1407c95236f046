//! Secret providers and output masking

pub mod mask;
pub mod provider;

pub use mask::Masker;
pub use provider::{DotenvProvider, EnvProvider, SecretProvider, SecretRegistry};
