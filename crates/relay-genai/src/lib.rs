//! Client for the Gemini `generateContent` REST endpoint.

pub mod client;
pub mod config;
pub mod error;
pub mod types;

pub use client::GeminiClient;
pub use config::{GenerationConfig, SamplingParams};
pub use error::GenerationError;
