//! chctl - declarative access control for ClickHouse.
//!
//! chctl reconciles a declared set of users, roles, grants, role memberships,
//! settings profiles and quotas against what a ClickHouse server actually
//! holds, issuing the minimal DDL to converge. Declarations are YAML; the
//! server is reached over its HTTP interface; only objects stored in the
//! local access directory are ever touched.
//!
//! The crate is layered bottom-up:
//! - [`spec`] - declared-state records, validated at the YAML boundary
//! - [`privileges`] - privilege canonicalization, including `ALL` expansion
//! - [`observe`] - observed-state reads from the `system.*` tables
//! - [`diff`] - set difference between canonical forms
//! - [`statement`] - all DDL rendering
//! - [`reconcile`] - per-entity planning and pass execution
//! - [`transport`] - the HTTP wire, behind a trait for testing

pub mod config;
pub mod diff;
pub mod errors;
pub mod observe;
pub mod privileges;
pub mod reconcile;
pub mod spec;
pub mod statement;
pub mod telemetry;
pub mod transport;

pub use config::{Args, Config};
pub use errors::{Error, Result};
pub use reconcile::{Environment, PassReport, Reconciler};
pub use spec::Declarations;
