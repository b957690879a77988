//! NAT gateway lifecycle.
//!
//! The only asynchronous delete in the crate: the gateway lingers in
//! `deleting` after the delete call, so the controller polls it to
//! `deleted` and only then releases the attached elastic IP allocation.

use aws_config::SdkConfig;
use aws_sdk_ec2::types::Filter;
use snafu::prelude::*;

use crate::{DependentRef, Error, Lifecycle, ManagedResource, NotFoundSnafu, ResourceKind, Result};

/// NAT gateways, addressed by `nat-` identifier.
#[derive(Clone, Copy, Debug, Default)]
pub struct NatGateways;

fn to_resource(gateway: &aws_sdk_ec2::types::NatGateway) -> ManagedResource {
    ManagedResource {
        id: gateway.nat_gateway_id().unwrap_or_default().to_owned(),
        kind: ResourceKind::NatGateway,
        state: gateway
            .state()
            .map(|s| s.as_str().to_owned())
            .unwrap_or_default(),
        dependents: Vec::new(),
        cluster_parent: None,
        attached_resource: gateway
            .nat_gateway_addresses()
            .first()
            .and_then(|addr| addr.allocation_id())
            .map(str::to_owned),
    }
}

impl NatGateways {
    /// Route tables with a route through the gateway block its deletion.
    async fn route_table_dependents(
        &self,
        client: &aws_sdk_ec2::Client,
        id: &str,
    ) -> Vec<DependentRef> {
        match client
            .describe_route_tables()
            .filters(
                Filter::builder()
                    .name("route.nat-gateway-id")
                    .values(id)
                    .build(),
            )
            .send()
            .await
        {
            Ok(out) => out
                .route_tables()
                .iter()
                .map(|rt| {
                    DependentRef::new("route table", rt.route_table_id().unwrap_or_default())
                })
                .collect(),
            Err(e) => {
                log::error!("route table probe for '{id}' failed: {e}");
                Vec::new()
            }
        }
    }
}

impl Lifecycle for NatGateways {
    type Provider = SdkConfig;

    fn kind(&self) -> ResourceKind {
        ResourceKind::NatGateway
    }

    async fn describe(&self, cfg: &SdkConfig, id: &str) -> Result<ManagedResource> {
        let client = aws_sdk_ec2::Client::new(cfg);
        let out = client
            .describe_nat_gateways()
            .filter(Filter::builder().name("nat-gateway-id").values(id).build())
            .send()
            .await
            .map_err(|e| Error::provider("DescribeNatGateways", id, e))?;
        let gateway = out.nat_gateways().first().context(NotFoundSnafu {
            kind: self.kind(),
            id,
        })?;

        let mut resource = to_resource(gateway);
        resource.dependents = self.route_table_dependents(&client, id).await;
        Ok(resource)
    }

    async fn list(&self, cfg: &SdkConfig) -> Result<Vec<ManagedResource>> {
        let client = aws_sdk_ec2::Client::new(cfg);
        let out = match client.describe_nat_gateways().send().await {
            Ok(out) => out,
            Err(e) => {
                log::error!("failed to fetch NAT gateways: {e}");
                return Ok(Vec::new());
            }
        };
        Ok(out.nat_gateways().iter().map(to_resource).collect())
    }

    /// A gateway already reporting `deleted` has nothing left to delete.
    fn is_modifiable_state(&self, state: &str) -> bool {
        state != "deleted"
    }

    async fn delete(&self, cfg: &SdkConfig, resource: &ManagedResource) -> Result<()> {
        let client = aws_sdk_ec2::Client::new(cfg);
        client
            .delete_nat_gateway()
            .nat_gateway_id(&resource.id)
            .send()
            .await
            .map_err(|e| Error::provider("DeleteNatGateway", &resource.id, e))?;
        Ok(())
    }

    fn awaits_termination(&self) -> bool {
        true
    }

    async fn release_attached(&self, cfg: &SdkConfig, attached_id: &str) -> Result<()> {
        let client = aws_sdk_ec2::Client::new(cfg);
        client
            .release_address()
            .allocation_id(attached_id)
            .send()
            .await
            .map_err(|e| Error::provider("ReleaseAddress", attached_id, e))?;
        log::info!("released elastic IP allocation '{attached_id}'");
        Ok(())
    }
}
