pub mod client;
pub mod error;
pub mod types;

pub use client::{BackendClient, DEFAULT_API_URL, Download};
pub use error::ApiError;
pub use types::{LoginResponse, PaymentStatusResponse, UserInfo};
