//! Access Client - typed gRPC client for the access decision service
//!
//! ```no_run
//! use access_client::Client;
//! use access_core::ClientConfig;
//!
//! # async fn run() -> Result<(), access_client::ClientError> {
//! let client = Client::new(ClientConfig {
//!     addr: "localhost:8003".into(),
//!     retry: true,
//!     ..Default::default()
//! });
//! client.connect().await?;
//! let allowed = client.authorize("alice_acme", "reports", "read").await?;
//! println!("allowed: {}", allowed);
//! # Ok(())
//! # }
//! ```

pub mod chain;
pub mod client;
pub mod error;
pub mod metrics;

pub use chain::{ClientChain, RetryPolicy, RETRYABLE_CODES};
pub use client::Client;
pub use error::ClientError;
