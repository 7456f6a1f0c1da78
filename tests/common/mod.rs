//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{FakeBehavior, FakeDgraph, TestClient, TestServer};
//!
//! #[tokio::test]
//! async fn test_export() {
//!     let dgraph = FakeDgraph::spawn(FakeBehavior::Success).await;
//!     let server = TestServer::spawn(&dgraph.admin_url).await;
//!     let client = TestClient::new(server.base_url.clone());
//!
//!     assert!(client.export().await.status().is_success());
//! }
//! ```

#![allow(dead_code)]

mod client;
mod constants;
mod fake_dgraph;
mod server;

pub use client::TestClient;
pub use constants::*;
pub use fake_dgraph::{FakeBehavior, FakeDgraph};
pub use server::{TestServer, TestServerOptions};
