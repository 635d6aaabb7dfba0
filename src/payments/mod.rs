//! Payment gateway integration: wire types, signature checks and the outbound client.

pub mod error;
pub mod gateway;
pub mod signature;
pub mod types;
pub mod utils;

pub use error::{GatewayError, GatewayResult};
pub use gateway::{OfflineGateway, PaymentGateway, RazorpayGateway};
pub use signature::{SignatureError, SignatureVerifier};
