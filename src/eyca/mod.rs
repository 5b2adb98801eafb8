pub mod client;
pub mod error;
pub mod types;

pub use client::{CardIssuer, EycaClient};
pub use error::EycaError;
pub use types::{ApiEnvelope, ApiResponse, PreIssueRequest, UpdateCardRequest};
