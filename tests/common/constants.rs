//! Shared constants for end-to-end tests

/// How long to wait for a spawned server to answer /health
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Poll interval while waiting for readiness
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 20;

/// Timeout for individual HTTP requests made by tests
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Files reported by the fake admin endpoint on success
pub const EXPORTED_FILES: [&str; 3] = [
    "dgraph.r110.u0101.1200/g01.rdf.gz",
    "dgraph.r110.u0101.1200/g01.schema.gz",
    "dgraph.r110.u0101.1200/g01.gql_schema.gz",
];
