//! RDS instance lifecycle: resize, and terminate with operator exceptions.

use aws_config::SdkConfig;
use snafu::prelude::*;

use crate::{
    ControllerConfig, Error, Lifecycle, ManagedResource, NotFoundSnafu, Outcome, ResourceKind,
    Result, SnapshotCollisionSnafu, WaitTimeoutSnafu,
};

/// The single state in which an RDS instance accepts modify/delete calls.
const MODIFIABLE_STATE: &str = "available";

/// What `DescribeDBInstances` tells us about one instance.
#[derive(Clone, Debug, PartialEq)]
pub struct DbInstanceDetails {
    pub id: String,
    pub instance_class: String,
    pub state: String,
    pub multi_az: bool,
    /// Populated when the instance is a read replica.
    pub replica_source: Option<String>,
    /// Populated when the instance belongs to a cluster.
    pub cluster: Option<String>,
}

/// Where a resize should land, given the instance's replication role.
///
/// A read replica redirects to its source instance; a Multi-AZ member
/// resizes in place. Both return a warning for the operator. Deletion has
/// no such redirection — a replica is deleted directly.
pub fn resize_target(details: &DbInstanceDetails) -> (String, Option<String>) {
    if let Some(source) = &details.replica_source {
        (
            source.clone(),
            Some(format!(
                "'{}' is a read replica; the resize is redirected to its source instance '{source}'",
                details.id
            )),
        )
    } else if details.multi_az {
        (
            details.id.clone(),
            Some(format!(
                "'{}' is a Multi-AZ member; the resize applies to the instance itself",
                details.id
            )),
        )
    } else {
        (details.id.clone(), None)
    }
}

/// Deterministic pre-deletion snapshot name: the cluster identifier when
/// the instance belongs to one (otherwise the instance identifier), plus a
/// same-day date stamp. Rerunning on the same day reproduces the name; the
/// collision policy decides what that means.
pub fn snapshot_name(instance_id: &str, cluster: Option<&str>, date: chrono::NaiveDate) -> String {
    let base = cluster.unwrap_or(instance_id);
    format!("{base}-final-{}", date.format("%Y-%m-%d"))
}

/// RDS database instances, addressed by instance identifier.
#[derive(Clone, Copy, Debug, Default)]
pub struct DbInstances;

impl DbInstances {
    /// Fetch the instance attributes the gating and redirection rules need.
    pub async fn details(&self, cfg: &SdkConfig, id: &str) -> Result<DbInstanceDetails> {
        let client = aws_sdk_rds::Client::new(cfg);
        let out = match client
            .describe_db_instances()
            .db_instance_identifier(id)
            .send()
            .await
        {
            Ok(out) => out,
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_db_instance_not_found_fault()) =>
            {
                return NotFoundSnafu {
                    kind: ResourceKind::DbInstance,
                    id,
                }
                .fail()
            }
            Err(e) => return Err(Error::provider("DescribeDBInstances", id, e)),
        };
        let db = out.db_instances().first().context(NotFoundSnafu {
            kind: ResourceKind::DbInstance,
            id,
        })?;

        Ok(DbInstanceDetails {
            id: db.db_instance_identifier().unwrap_or(id).to_owned(),
            instance_class: db.db_instance_class().unwrap_or_default().to_owned(),
            state: db.db_instance_status().unwrap_or_default().to_owned(),
            multi_az: db.multi_az().unwrap_or_default(),
            replica_source: db
                .read_replica_source_db_instance_identifier()
                .map(str::to_owned),
            cluster: db.db_cluster_identifier().map(str::to_owned),
        })
    }

    /// Apply a new instance class, redirecting read replicas to their
    /// source instance. The change applies immediately, which may incur
    /// downtime; there is no maintenance-window deferral.
    pub async fn resize(
        &self,
        cfg: &SdkConfig,
        id: &str,
        instance_class: &str,
    ) -> Result<Outcome> {
        let details = self.details(cfg, id).await?;
        log::info!(
            "instance '{}': current class {}, state {}, multi-az {}",
            details.id,
            details.instance_class,
            details.state,
            details.multi_az
        );

        let (target, warning) = resize_target(&details);
        if let Some(warning) = warning {
            log::warn!("{warning}");
        }

        // Redirection may land on a different instance; gate on its state.
        let details = if target == details.id {
            details
        } else {
            self.details(cfg, &target).await?
        };
        if details.state != MODIFIABLE_STATE {
            return Ok(Outcome::Blocked {
                reasons: vec![format!(
                    "not in a modifiable state (current state: {})",
                    details.state
                )],
            });
        }

        let client = aws_sdk_rds::Client::new(cfg);
        client
            .modify_db_instance()
            .db_instance_identifier(&target)
            .db_instance_class(instance_class)
            .apply_immediately(true)
            .send()
            .await
            .map_err(|e| Error::provider("ModifyDBInstance", &target, e))?;
        log::info!("resize of '{target}' to '{instance_class}' initiated");

        Ok(Outcome::Resized {
            applied_to: target,
            instance_class: instance_class.to_owned(),
        })
    }
}

impl Lifecycle for DbInstances {
    type Provider = SdkConfig;

    fn kind(&self) -> ResourceKind {
        ResourceKind::DbInstance
    }

    async fn describe(&self, cfg: &SdkConfig, id: &str) -> Result<ManagedResource> {
        let details = self.details(cfg, id).await?;
        Ok(ManagedResource {
            id: details.id,
            kind: self.kind(),
            state: details.state,
            // No dependents are modeled for DB instances beyond the
            // replica/cluster linkage carried below.
            dependents: Vec::new(),
            cluster_parent: details.cluster,
            attached_resource: None,
        })
    }

    async fn list(&self, cfg: &SdkConfig) -> Result<Vec<ManagedResource>> {
        let client = aws_sdk_rds::Client::new(cfg);
        let out = match client.describe_db_instances().send().await {
            Ok(out) => out,
            Err(e) => {
                log::error!("failed to fetch RDS instances: {e}");
                return Ok(Vec::new());
            }
        };
        Ok(out
            .db_instances()
            .iter()
            .map(|db| ManagedResource {
                id: db.db_instance_identifier().unwrap_or_default().to_owned(),
                kind: self.kind(),
                state: db.db_instance_status().unwrap_or_default().to_owned(),
                dependents: Vec::new(),
                cluster_parent: db.db_cluster_identifier().map(str::to_owned),
                attached_resource: None,
            })
            .collect())
    }

    fn is_modifiable_state(&self, state: &str) -> bool {
        state == MODIFIABLE_STATE
    }

    async fn delete(&self, cfg: &SdkConfig, resource: &ManagedResource) -> Result<()> {
        let client = aws_sdk_rds::Client::new(cfg);
        client
            .delete_db_instance()
            .db_instance_identifier(&resource.id)
            .skip_final_snapshot(true)
            .send()
            .await
            .map_err(|e| Error::provider("DeleteDBInstance", &resource.id, e))?;
        Ok(())
    }

    async fn create_snapshot(&self, cfg: &SdkConfig, resource: &ManagedResource) -> Result<String> {
        let name = snapshot_name(
            &resource.id,
            resource.cluster_parent.as_deref(),
            chrono::Utc::now().date_naive(),
        );

        let client = aws_sdk_rds::Client::new(cfg);
        match client
            .create_db_snapshot()
            .db_instance_identifier(&resource.id)
            .db_snapshot_identifier(&name)
            .send()
            .await
        {
            Ok(_) => {
                log::info!("snapshot '{name}' of '{}' requested", resource.id);
                Ok(name)
            }
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_db_snapshot_already_exists_fault()) =>
            {
                SnapshotCollisionSnafu { name }.fail()
            }
            Err(e) => Err(Error::provider("CreateDBSnapshot", &resource.id, e)),
        }
    }

    // Wait until the snapshot is usable before the delete is allowed.
    async fn await_snapshot(
        &self,
        cfg: &SdkConfig,
        name: &str,
        controller_cfg: &ControllerConfig,
    ) -> Result<()> {
        let client = aws_sdk_rds::Client::new(cfg);
        let started = std::time::Instant::now();
        loop {
            let out = client
                .describe_db_snapshots()
                .db_snapshot_identifier(name)
                .send()
                .await
                .map_err(|e| Error::provider("DescribeDBSnapshots", name, e))?;
            let status = out
                .db_snapshots()
                .first()
                .and_then(|snap| snap.status())
                .unwrap_or_default();
            match status {
                "available" => return Ok(()),
                "failed" => {
                    return Err(Error::provider(
                        "CreateDBSnapshot",
                        name,
                        format!("snapshot '{name}' entered the failed state"),
                    ))
                }
                other => log::debug!("snapshot '{name}' still '{other}'"),
            }
            if started.elapsed() >= controller_cfg.wait.timeout {
                return WaitTimeoutSnafu {
                    id: name,
                    waited: controller_cfg.wait.timeout,
                }
                .fail();
            }
            tokio::time::sleep(controller_cfg.wait.poll_interval).await;
        }
    }
}
