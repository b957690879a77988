//! Elastic Load Balancer lifecycles: ALB/NLB and classic.

use aws_config::SdkConfig;
use snafu::prelude::*;

use crate::{DependentRef, Error, Lifecycle, ManagedResource, NotFoundSnafu, ResourceKind, Result};

/// Application and network load balancers, addressed by ARN.
///
/// Dependents are the balancer's target groups and listeners. Either probe
/// failing degrades to "nothing found by that probe" with a logged error,
/// so one broken API never hides the other probe's findings.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoadBalancers;

impl LoadBalancers {
    async fn dependents(
        &self,
        client: &aws_sdk_elasticloadbalancingv2::Client,
        id: &str,
    ) -> Vec<DependentRef> {
        let mut dependents = Vec::new();

        match client
            .describe_target_groups()
            .load_balancer_arn(id)
            .send()
            .await
        {
            Ok(out) => {
                for tg in out.target_groups() {
                    dependents.push(DependentRef::new(
                        "target group",
                        format!(
                            "{} (ARN: {})",
                            tg.target_group_name().unwrap_or_default(),
                            tg.target_group_arn().unwrap_or_default()
                        ),
                    ));
                }
            }
            Err(e) => log::error!("target group probe for '{id}' failed: {e}"),
        }

        match client
            .describe_listeners()
            .load_balancer_arn(id)
            .send()
            .await
        {
            Ok(out) => {
                for listener in out.listeners() {
                    dependents.push(DependentRef::new(
                        "listener",
                        format!(
                            "Port {} - Protocol {}",
                            listener.port().unwrap_or_default(),
                            listener.protocol().map(|p| p.as_str()).unwrap_or("unknown")
                        ),
                    ));
                }
            }
            Err(e) => log::error!("listener probe for '{id}' failed: {e}"),
        }

        dependents
    }
}

impl Lifecycle for LoadBalancers {
    type Provider = SdkConfig;

    fn kind(&self) -> ResourceKind {
        ResourceKind::LoadBalancer
    }

    async fn describe(&self, cfg: &SdkConfig, id: &str) -> Result<ManagedResource> {
        let client = aws_sdk_elasticloadbalancingv2::Client::new(cfg);
        let out = match client
            .describe_load_balancers()
            .load_balancer_arns(id)
            .send()
            .await
        {
            Ok(out) => out,
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_load_balancer_not_found_exception()) =>
            {
                return NotFoundSnafu {
                    kind: self.kind(),
                    id,
                }
                .fail()
            }
            Err(e) => return Err(Error::provider("DescribeLoadBalancers", id, e)),
        };
        let lb = out.load_balancers().first().cloned().context(NotFoundSnafu {
            kind: self.kind(),
            id,
        })?;

        Ok(ManagedResource {
            id: lb.load_balancer_arn().unwrap_or(id).to_owned(),
            kind: self.kind(),
            state: lb
                .state()
                .and_then(|s| s.code())
                .map(|c| c.as_str().to_owned())
                .unwrap_or_default(),
            dependents: self.dependents(&client, id).await,
            cluster_parent: None,
            attached_resource: None,
        })
    }

    async fn list(&self, cfg: &SdkConfig) -> Result<Vec<ManagedResource>> {
        let client = aws_sdk_elasticloadbalancingv2::Client::new(cfg);
        let out = match client.describe_load_balancers().send().await {
            Ok(out) => out,
            Err(e) => {
                // A broken listing degrades to empty so the classic ELB
                // listing alongside it can still proceed.
                log::error!("failed to fetch ALB/NLBs: {e}");
                return Ok(Vec::new());
            }
        };
        Ok(out
            .load_balancers()
            .iter()
            .map(|lb| ManagedResource {
                id: lb.load_balancer_arn().unwrap_or_default().to_owned(),
                kind: self.kind(),
                state: lb
                    .state()
                    .and_then(|s| s.code())
                    .map(|c| c.as_str().to_owned())
                    .unwrap_or_default(),
                dependents: Vec::new(),
                cluster_parent: None,
                attached_resource: None,
            })
            .collect())
    }

    async fn delete(&self, cfg: &SdkConfig, resource: &ManagedResource) -> Result<()> {
        let client = aws_sdk_elasticloadbalancingv2::Client::new(cfg);
        client
            .delete_load_balancer()
            .load_balancer_arn(&resource.id)
            .send()
            .await
            .map_err(|e| Error::provider("DeleteLoadBalancer", &resource.id, e))?;
        Ok(())
    }
}

/// Classic ELBs, addressed by name rather than ARN.
///
/// The classic API has no target groups or listeners to probe, so no
/// dependents are modeled; a still-in-use balancer surfaces as the delete
/// call's own synchronous failure.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClassicLoadBalancers;

impl Lifecycle for ClassicLoadBalancers {
    type Provider = SdkConfig;

    fn kind(&self) -> ResourceKind {
        ResourceKind::LoadBalancer
    }

    async fn describe(&self, cfg: &SdkConfig, id: &str) -> Result<ManagedResource> {
        let client = aws_sdk_elasticloadbalancing::Client::new(cfg);
        let out = match client
            .describe_load_balancers()
            .load_balancer_names(id)
            .send()
            .await
        {
            Ok(out) => out,
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_access_point_not_found_exception()) =>
            {
                return NotFoundSnafu {
                    kind: self.kind(),
                    id,
                }
                .fail()
            }
            Err(e) => return Err(Error::provider("DescribeLoadBalancers", id, e)),
        };
        let lb = out
            .load_balancer_descriptions()
            .first()
            .context(NotFoundSnafu {
                kind: self.kind(),
                id,
            })?;

        Ok(ManagedResource {
            id: lb.load_balancer_name().unwrap_or(id).to_owned(),
            kind: self.kind(),
            // The classic API reports no lifecycle state.
            state: "available".to_owned(),
            dependents: Vec::new(),
            cluster_parent: None,
            attached_resource: None,
        })
    }

    async fn list(&self, cfg: &SdkConfig) -> Result<Vec<ManagedResource>> {
        let client = aws_sdk_elasticloadbalancing::Client::new(cfg);
        let out = match client.describe_load_balancers().send().await {
            Ok(out) => out,
            Err(e) => {
                log::error!("failed to fetch classic ELBs: {e}");
                return Ok(Vec::new());
            }
        };
        Ok(out
            .load_balancer_descriptions()
            .iter()
            .map(|lb| ManagedResource {
                id: lb.load_balancer_name().unwrap_or_default().to_owned(),
                kind: self.kind(),
                state: "available".to_owned(),
                dependents: Vec::new(),
                cluster_parent: None,
                attached_resource: None,
            })
            .collect())
    }

    async fn delete(&self, cfg: &SdkConfig, resource: &ManagedResource) -> Result<()> {
        let client = aws_sdk_elasticloadbalancing::Client::new(cfg);
        client
            .delete_load_balancer()
            .load_balancer_name(&resource.id)
            .send()
            .await
            .map_err(|e| Error::provider("DeleteLoadBalancer", &resource.id, e))?;
        Ok(())
    }
}
