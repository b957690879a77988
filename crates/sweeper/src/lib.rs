//! # Sweeper
//!
//! Sweeper inventories, validates, and conditionally deletes or resizes
//! AWS resources that are no longer in use: load balancers, VPC endpoints,
//! NAT gateways, and RDS instances.
//!
//! ## Concepts
//!
//! The crate is built around a single **resource lifecycle controller**
//! ([`Controller`]) parameterized over a kind-specific strategy
//! ([`Lifecycle`]). Given a resource identifier, the controller:
//!
//! 1. Fetches a fresh snapshot of the resource and its *dependents* from
//!    the provider (listeners and target groups for a load balancer, route
//!    tables and subnets for a VPC endpoint, route tables for a NAT
//!    gateway).
//! 2. Decides whether deletion is permitted: **any** dependent blocks the
//!    deletion, unconditionally. There is no forced-override path.
//! 3. If permitted, runs the ordered deletion protocol: optional snapshot,
//!    provider delete, bounded poll until the terminal state, and finally
//!    the release of any attached resource (e.g. a NAT gateway's elastic
//!    IP allocation).
//!
//! The block-check is always re-run immediately before the mutating call,
//! bounding the race between listing and deleting. State transitions are
//! provider-owned; the controller only observes them by polling.
//!
//! Each identifier in a batch is processed in isolation: a failure on one
//! never aborts the rest, and nothing is retried automatically. Every
//! outcome carries the concrete reason (the dependent list, the current
//! state, or the provider's error text).
//!
//! ## Error Handling
//!
//! Fallible operations return a `Result` with the crate-level [`Error`]
//! enum. Expected non-error outcomes — a resource being blocked by its
//! dependents, or skipped by an operator exception — are values of
//! [`Decision`] and [`Outcome`], not errors.

use snafu::prelude::*;

pub mod aws;
pub mod controller;
pub mod report;
#[cfg(test)]
mod test;

pub use controller::{
    Controller, ControllerConfig, ExceptionAction, Lifecycle, SnapshotCollisionPolicy, WaitConfig,
};

/// Marker trait for provider-level errors carried inside [`Error`].
pub trait ProviderError: core::fmt::Display + core::fmt::Debug + Send + Sync + 'static {}
impl<T: core::fmt::Display + core::fmt::Debug + Send + Sync + 'static> ProviderError for T {}

/// Top-level error enum that encompasses all errors.
#[derive(snafu::Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("No {kind} found for identifier '{id}'"))]
    NotFound { kind: ResourceKind, id: String },

    #[snafu(display("{op} for '{id}' failed: {error}"))]
    Provider {
        op: &'static str,
        id: String,
        error: Box<dyn ProviderError>,
    },

    #[snafu(display("Snapshot '{name}' already exists for today's run"))]
    SnapshotCollision { name: String },

    #[snafu(display("Pre-deletion snapshots are not supported for {kind} resources"))]
    SnapshotUnsupported { kind: ResourceKind },

    #[snafu(display(
        "Timed out after {}s waiting for '{id}' to reach a terminal state",
        waited.as_secs()
    ))]
    WaitTimeout {
        id: String,
        waited: std::time::Duration,
    },

    #[snafu(display("Could not read identifier file '{path:?}': {source}"))]
    InputFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
}

impl Error {
    /// Wrap a raw provider (SDK) error for the given call and identifier.
    pub fn provider(op: &'static str, id: impl Into<String>, error: impl ProviderError) -> Self {
        Error::Provider {
            op,
            id: id.into(),
            error: Box::new(error),
        }
    }
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Read a file of resource identifiers, one per line.
///
/// Blank lines are ignored; surrounding whitespace is trimmed. Lines keep
/// their order so a batch processes identifiers the way the operator wrote
/// them.
pub fn read_identifier_file(path: impl AsRef<std::path::Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).context(InputFileSnafu { path })?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect())
}

/// The resource kinds the controller knows how to manage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ResourceKind {
    LoadBalancer,
    VpcEndpoint,
    NatGateway,
    DbInstance,
}

impl core::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            ResourceKind::LoadBalancer => "load balancer",
            ResourceKind::VpcEndpoint => "VPC endpoint",
            ResourceKind::NatGateway => "NAT gateway",
            ResourceKind::DbInstance => "DB instance",
        })
    }
}

/// A resource whose existence on a parent blocks that parent's deletion.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DependentRef {
    /// What the dependent is, e.g. "listener" or "route table".
    pub category: String,
    /// Human-readable identification, e.g. "Port 443 - Protocol HTTPS".
    pub detail: String,
}

impl DependentRef {
    pub fn new(category: impl Into<String>, detail: impl Into<String>) -> Self {
        DependentRef {
            category: category.into(),
            detail: detail.into(),
        }
    }
}

/// A point-in-time snapshot of a provider resource.
///
/// Constructed fresh on every describe call and discarded once the
/// controller's decision for that invocation is made; there is no local
/// cache of provider state.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ManagedResource {
    /// ARN or provider-assigned name.
    pub id: String,
    pub kind: ResourceKind,
    /// Provider-reported lifecycle state, e.g. "available" or "deleted".
    pub state: String,
    /// Dependents whose presence blocks deletion.
    pub dependents: Vec<DependentRef>,
    /// Parent aggregate, e.g. a database cluster identifier. Lookup only.
    pub cluster_parent: Option<String>,
    /// A resource to release only *after* this one is fully deleted,
    /// e.g. a NAT gateway's elastic IP allocation.
    pub attached_resource: Option<String>,
}

/// The read-only verdict of [`Controller::evaluate`].
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Decision {
    /// No dependents, state permits mutation.
    Deletable,
    /// Deletion is not permitted; the reasons name each dependent (or the
    /// offending state).
    Blocked { reasons: Vec<String> },
}

impl core::fmt::Display for Decision {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Decision::Deletable => f.write_str("deletable"),
            Decision::Blocked { .. } => f.write_str("blocked"),
        }
    }
}

/// The terminal result of a mutating controller operation.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Outcome {
    /// The resource was deleted (and, for asynchronous kinds, reached its
    /// terminal state with any attached resource released).
    Deleted,
    /// A resize was applied. `applied_to` may differ from the requested
    /// identifier when a read replica redirects to its source instance.
    Resized {
        applied_to: String,
        instance_class: String,
    },
    /// The fresh block-check rejected the mutation.
    Blocked { reasons: Vec<String> },
    /// The operator's exception action excluded this resource.
    Skipped,
    /// The primary mutation succeeded but a later protocol step failed;
    /// an operator must finish the cleanup manually.
    Partial { done: String, failed: String },
}

impl core::fmt::Display for Outcome {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Outcome::Deleted => f.write_str("deleted"),
            Outcome::Resized { .. } => f.write_str("resized"),
            Outcome::Blocked { .. } => f.write_str("blocked"),
            Outcome::Skipped => f.write_str("skipped"),
            Outcome::Partial { .. } => f.write_str("partially completed"),
        }
    }
}
