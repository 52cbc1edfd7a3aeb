//! Model backends for Jarvis.
//!
//! All providers implement the `jarvis_core::Provider` trait.
//! [`factory::build_from_config`] picks the backend from configuration.

pub mod factory;
pub mod openai_compat;

pub use factory::build_from_config;
pub use openai_compat::OpenAiCompatProvider;
