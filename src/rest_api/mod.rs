//! HTTP endpoints for probes and metrics
//!
//! Serves `/metrics` on the metrics address and `/healthz` + `/readyz` on the
//! health probe address.

mod server;

pub use server::{metrics_router, probe_router, run_server};
