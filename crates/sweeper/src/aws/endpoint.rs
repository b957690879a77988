//! VPC endpoint lifecycle.

use aws_config::SdkConfig;
use aws_sdk_ec2::error::ProvideErrorMetadata;
use snafu::prelude::*;

use crate::{DependentRef, Error, Lifecycle, ManagedResource, NotFoundSnafu, ResourceKind, Result};

/// VPC endpoints, addressed by `vpce-` identifier.
///
/// An endpoint's dependents are its own route table and subnet
/// associations, both carried on the describe response itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct VpcEndpoints;

fn to_resource(endpoint: &aws_sdk_ec2::types::VpcEndpoint, with_dependents: bool) -> ManagedResource {
    let mut dependents = Vec::new();
    if with_dependents {
        for rtb in endpoint.route_table_ids() {
            dependents.push(DependentRef::new("route table", rtb.clone()));
        }
        for subnet in endpoint.subnet_ids() {
            dependents.push(DependentRef::new("subnet", subnet.clone()));
        }
    }
    ManagedResource {
        id: endpoint.vpc_endpoint_id().unwrap_or_default().to_owned(),
        kind: ResourceKind::VpcEndpoint,
        state: endpoint
            .state()
            .map(|s| s.as_str().to_owned())
            .unwrap_or_default(),
        dependents,
        cluster_parent: None,
        attached_resource: None,
    }
}

impl Lifecycle for VpcEndpoints {
    type Provider = SdkConfig;

    fn kind(&self) -> ResourceKind {
        ResourceKind::VpcEndpoint
    }

    async fn describe(&self, cfg: &SdkConfig, id: &str) -> Result<ManagedResource> {
        let client = aws_sdk_ec2::Client::new(cfg);
        let out = match client
            .describe_vpc_endpoints()
            .vpc_endpoint_ids(id)
            .send()
            .await
        {
            Ok(out) => out,
            // EC2 errors are identified by code, not by modeled variants.
            Err(e) if e.code() == Some("InvalidVpcEndpointId.NotFound") => {
                return NotFoundSnafu {
                    kind: self.kind(),
                    id,
                }
                .fail()
            }
            Err(e) => return Err(Error::provider("DescribeVpcEndpoints", id, e)),
        };
        let endpoint = out.vpc_endpoints().first().context(NotFoundSnafu {
            kind: self.kind(),
            id,
        })?;
        Ok(to_resource(endpoint, true))
    }

    async fn list(&self, cfg: &SdkConfig) -> Result<Vec<ManagedResource>> {
        let client = aws_sdk_ec2::Client::new(cfg);
        let out = match client.describe_vpc_endpoints().send().await {
            Ok(out) => out,
            Err(e) => {
                log::error!("failed to fetch VPC endpoints: {e}");
                return Ok(Vec::new());
            }
        };
        Ok(out
            .vpc_endpoints()
            .iter()
            .map(|endpoint| to_resource(endpoint, false))
            .collect())
    }

    async fn delete(&self, cfg: &SdkConfig, resource: &ManagedResource) -> Result<()> {
        let client = aws_sdk_ec2::Client::new(cfg);
        let out = client
            .delete_vpc_endpoints()
            .vpc_endpoint_ids(&resource.id)
            .send()
            .await
            .map_err(|e| Error::provider("DeleteVpcEndpoints", &resource.id, e))?;
        // The batch API reports per-endpoint failures in-band.
        if let Some(item) = out.unsuccessful().first() {
            let message = item
                .error()
                .and_then(|e| e.message())
                .unwrap_or("unspecified error")
                .to_owned();
            return Err(Error::provider("DeleteVpcEndpoints", &resource.id, message));
        }
        Ok(())
    }
}
