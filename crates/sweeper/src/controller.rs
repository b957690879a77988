//! The resource lifecycle controller and its kind-specific strategy seam.

use std::{future::Future, time::Duration};

use crate::{
    Decision, Error, ManagedResource, Outcome, ResourceKind, Result, SnapshotCollisionSnafu,
    SnapshotUnsupportedSnafu, WaitTimeoutSnafu,
};

/// The state every asynchronous delete polls toward.
const TERMINAL_DELETED: &str = "deleted";

/// How the controller paces and bounds its polling waits.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WaitConfig {
    /// Pause between state polls.
    pub poll_interval: Duration,
    /// Upper bound on any single wait. Expiry surfaces as
    /// [`Error::WaitTimeout`] (or a partial outcome, once the primary
    /// mutation has already been issued) rather than hanging forever.
    pub timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        WaitConfig {
            poll_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(600),
        }
    }
}

/// What to do when a rerun produces the same-day snapshot name again.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum SnapshotCollisionPolicy {
    /// Treat the existing snapshot as this run's snapshot and proceed.
    ReuseExisting,
    /// Refuse: the delete is not issued.
    #[default]
    Fail,
}

/// Explicit controller configuration. Replaces what the original scripts
/// kept in module-level globals.
#[derive(Clone, Debug, Default)]
pub struct ControllerConfig {
    pub wait: WaitConfig,
    pub snapshot_collision: SnapshotCollisionPolicy,
}

/// The operator's per-resource exception action for deletions.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ExceptionAction {
    /// Leave the resource alone entirely.
    NoAction,
    /// Snapshot first, wait for the snapshot, then delete.
    TerminateWithSnapshot,
    /// Delete directly.
    TerminateWithoutSnapshot,
}

impl core::fmt::Display for ExceptionAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            ExceptionAction::NoAction => "no action",
            ExceptionAction::TerminateWithSnapshot => "terminate with snapshot",
            ExceptionAction::TerminateWithoutSnapshot => "terminate without snapshot",
        })
    }
}

/// Kind-specific protocol hooks.
///
/// One implementation exists per resource kind (see the [`crate::aws`]
/// modules); the controller supplies the sequencing, the strategy supplies
/// the provider calls. Describe/list failures from the provider directory
/// should degrade to empty results with a logged error where the
/// surrounding batch can still make progress (e.g. a listing probe), and
/// propagate otherwise.
pub trait Lifecycle {
    /// Type of the platform/resource provider.
    ///
    /// `aws_config::SdkConfig` for the real strategies.
    type Provider;

    fn kind(&self) -> ResourceKind;

    /// Fetch a fresh snapshot of the resource, dependents included.
    ///
    /// Must fail with [`Error::NotFound`] when the identifier does not
    /// resolve.
    fn describe(
        &self,
        provider: &Self::Provider,
        id: &str,
    ) -> impl Future<Output = Result<ManagedResource>>;

    /// List every resource of this kind in the region.
    fn list(&self, provider: &Self::Provider) -> impl Future<Output = Result<Vec<ManagedResource>>>;

    /// Whether `state` permits a mutating call.
    fn is_modifiable_state(&self, _state: &str) -> bool {
        true
    }

    /// Issue the provider delete call.
    fn delete(
        &self,
        provider: &Self::Provider,
        resource: &ManagedResource,
    ) -> impl Future<Output = Result<()>>;

    /// Whether the provider delete is asynchronous: the controller must
    /// poll the resource to its terminal state before it may touch
    /// attached resources.
    fn awaits_termination(&self) -> bool {
        false
    }

    /// Request the pre-deletion snapshot and return its identifier.
    ///
    /// Must fail with [`Error::SnapshotCollision`] when the derived name
    /// already exists; the controller applies the configured
    /// [`SnapshotCollisionPolicy`], not the strategy.
    fn create_snapshot(
        &self,
        _provider: &Self::Provider,
        resource: &ManagedResource,
    ) -> impl Future<Output = Result<String>> {
        let kind = resource.kind;
        async move { SnapshotUnsupportedSnafu { kind }.fail() }
    }

    /// Block until the named snapshot is usable, bounded by the configured
    /// wait.
    fn await_snapshot(
        &self,
        _provider: &Self::Provider,
        _name: &str,
        _cfg: &ControllerConfig,
    ) -> impl Future<Output = Result<()>> {
        async { Ok(()) }
    }

    /// Release a resource attached to a deleted one (e.g. an elastic IP
    /// allocation). Only ever called after the owner reached its terminal
    /// state.
    fn release_attached(
        &self,
        _provider: &Self::Provider,
        attached_id: &str,
    ) -> impl Future<Output = Result<()>> {
        let id = attached_id.to_owned();
        async move {
            log::debug!("no attached-resource release defined for '{id}'");
            Ok(())
        }
    }
}

/// The resource lifecycle controller.
///
/// Strictly sequential: one identifier at a time, a fresh describe per
/// invocation, and no state carried between invocations beyond the
/// provider handle.
pub struct Controller<L: Lifecycle> {
    lifecycle: L,
    provider: L::Provider,
    cfg: ControllerConfig,
}

impl<L: Lifecycle> Controller<L> {
    pub fn new(provider: L::Provider, lifecycle: L) -> Self {
        Controller {
            lifecycle,
            provider,
            cfg: ControllerConfig::default(),
        }
    }

    pub fn with_config(mut self, cfg: ControllerConfig) -> Self {
        self.cfg = cfg;
        self
    }

    pub fn provider(&self) -> &L::Provider {
        &self.provider
    }

    pub fn lifecycle(&self) -> &L {
        &self.lifecycle
    }

    /// List every resource of this controller's kind in the region.
    pub async fn list(&self) -> Result<Vec<ManagedResource>> {
        self.lifecycle.list(&self.provider).await
    }

    /// Read-only: decide whether `id` may be deleted right now.
    pub async fn evaluate(&self, id: &str) -> Result<Decision> {
        let resource = self.lifecycle.describe(&self.provider, id).await?;
        Ok(self.decide(&resource))
    }

    /// Presence of *any* dependent unconditionally blocks deletion; only
    /// then is the lifecycle state consulted.
    fn decide(&self, resource: &ManagedResource) -> Decision {
        if !resource.dependents.is_empty() {
            return Decision::Blocked {
                reasons: resource
                    .dependents
                    .iter()
                    .map(|dep| dep.detail.clone())
                    .collect(),
            };
        }
        if !self.lifecycle.is_modifiable_state(&resource.state) {
            return Decision::Blocked {
                reasons: vec![format!(
                    "not in a modifiable state (current state: {})",
                    resource.state
                )],
            };
        }
        Decision::Deletable
    }

    /// Run the deletion protocol for `id`.
    ///
    /// The block-check is re-run here on a fresh describe regardless of any
    /// earlier [`Controller::evaluate`] call; a delete is never issued
    /// without it.
    pub async fn delete(&self, id: &str, action: ExceptionAction) -> Result<Outcome> {
        if action == ExceptionAction::NoAction {
            log::info!("'{id}' excluded by operator exception, skipping");
            return Ok(Outcome::Skipped);
        }

        let resource = self.lifecycle.describe(&self.provider, id).await?;
        if let Decision::Blocked { reasons } = self.decide(&resource) {
            log::warn!("cannot delete '{id}': {}", reasons.join("; "));
            return Ok(Outcome::Blocked { reasons });
        }

        let resource = if action == ExceptionAction::TerminateWithSnapshot {
            let snapshot_id = match self
                .lifecycle
                .create_snapshot(&self.provider, &resource)
                .await
            {
                Ok(snapshot_id) => snapshot_id,
                Err(Error::SnapshotCollision { name }) => match self.cfg.snapshot_collision {
                    SnapshotCollisionPolicy::ReuseExisting => {
                        log::warn!("snapshot '{name}' already exists, reusing it");
                        name
                    }
                    SnapshotCollisionPolicy::Fail => return SnapshotCollisionSnafu { name }.fail(),
                },
                Err(e) => return Err(e),
            };
            self.lifecycle
                .await_snapshot(&self.provider, &snapshot_id, &self.cfg)
                .await?;
            log::info!("snapshot '{snapshot_id}' is available, proceeding with deletion");

            // The snapshot wait can be long and the instance may have left
            // its modifiable state meanwhile; the delete is gated on a
            // fresh describe.
            let resource = self.lifecycle.describe(&self.provider, id).await?;
            if let Decision::Blocked { reasons } = self.decide(&resource) {
                log::warn!("cannot delete '{id}': {}", reasons.join("; "));
                return Ok(Outcome::Blocked { reasons });
            }
            resource
        } else {
            resource
        };

        self.lifecycle.delete(&self.provider, &resource).await?;
        log::info!("delete issued for {} '{id}'", resource.kind);

        if self.lifecycle.awaits_termination() {
            if let Err(error) = self.wait_until_deleted(id).await {
                return Ok(Outcome::Partial {
                    done: format!("delete of '{id}' was issued"),
                    failed: format!("waiting for termination: {error}"),
                });
            }
            if let Some(attached) = &resource.attached_resource {
                if let Err(error) = self.lifecycle.release_attached(&self.provider, attached).await
                {
                    return Ok(Outcome::Partial {
                        done: format!("'{id}' reached its terminal state"),
                        failed: format!("release of '{attached}' failed: {error}"),
                    });
                }
                log::info!("released attached resource '{attached}'");
            }
        }

        Ok(Outcome::Deleted)
    }

    /// Poll until the resource reports `deleted` or disappears from the
    /// directory, bounded by the configured timeout.
    async fn wait_until_deleted(&self, id: &str) -> Result<()> {
        log::info!("waiting for '{id}' to be deleted...");
        let started = std::time::Instant::now();
        loop {
            match self.lifecycle.describe(&self.provider, id).await {
                Err(Error::NotFound { .. }) => {
                    log::info!("'{id}' is gone from the directory");
                    return Ok(());
                }
                Err(e) => return Err(e),
                Ok(resource) if resource.state == TERMINAL_DELETED => {
                    log::info!("'{id}' is fully deleted");
                    return Ok(());
                }
                Ok(resource) => {
                    log::debug!("'{id}' still '{}'", resource.state);
                }
            }
            if started.elapsed() >= self.cfg.wait.timeout {
                return WaitTimeoutSnafu {
                    id,
                    waited: self.cfg.wait.timeout,
                }
                .fail();
            }
            tokio::time::sleep(self.cfg.wait.poll_interval).await;
        }
    }
}
