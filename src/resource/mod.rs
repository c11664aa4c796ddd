//! Table abstraction layer
//!
//! This module provides a data-driven approach to exposing Azure resources
//! as tables. Table definitions are loaded from JSON files at compile time,
//! so new tables can be added without code changes.
//!
//! # Architecture
//!
//! - [`registry`] - Loads and caches table definitions from embedded JSON
//! - [`fetcher`] - Generic List/Get handlers with `nextLink` pagination
//! - [`transform`] - Column lookup, named transforms and type coercion
//! - [`hydrate`] - Extra per-row API calls referenced by name
//! - [`metrics`] - Azure Monitor metric statistics
//!
//! # Table Definitions
//!
//! Tables are defined in JSON files under `src/resources/`:
//! - `subscription.json` - The connection's subscription
//! - `network.json` - Network watchers, flow logs, load balancers
//! - `authorization.json` - Policy assignments, role definitions
//! - `security.json` - Security Center
//! - `app_configuration.json` - App Configuration stores
//! - `compute.json` - Managed disks and their metrics

pub mod fetcher;
pub mod hydrate;
pub mod metrics;
mod registry;
pub mod transform;

pub use registry::*;
