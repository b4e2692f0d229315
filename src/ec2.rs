//! EC2 instance inventory across all opted-in regions.
//!
//! For each region a region-scoped client is built with adaptive retry
//! (bounded attempts, increasing backoff, applied uniformly to throttling
//! and transient faults) and the DescribeInstances paginator is driven to
//! exhaustion. Every instance is normalized through a single ingestion
//! boundary, [`Ec2Instance::from_sdk`]: required fields are trusted
//! invariants of the DescribeInstances response and their absence fails the
//! run with a typed error; the two public-network fields are genuinely
//! optional and feed the derived `IsPublic` flag.
//!
//! Output order is region-enumeration order, instance-discovery order
//! within a region. Field names are the exact PascalCase keys of the
//! published `processed_ec2_instances` dataset.

use aws_config::retry::RetryConfig;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_ec2::types::Instance;
use aws_smithy_types::date_time::Format;
use serde::Serialize;
use tracing::info;

use crate::error::{PostureError, Result};

/// Retry budget for the per-region clients. Adaptive mode also rate-limits
/// the client when the API starts throttling.
const EC2_MAX_ATTEMPTS: u32 = 10;

/// A normalized compute record as published in `processed_ec2_instances`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Ec2Instance {
    /// AMI the instance was launched from.
    pub image_id: String,
    /// Instance identifier.
    pub instance_id: String,
    /// Instance type (e.g. `t3.micro`).
    pub instance_type: String,
    /// Launch timestamp, RFC 3339.
    pub launch_time: String,
    /// Private DNS name.
    pub private_dns_name: String,
    /// Private IPv4 address.
    pub private_ip_address: String,
    /// Public IPv4 address, when one is associated.
    pub public_ip_address: Option<String>,
    /// Public DNS name. The API reports an empty string for instances
    /// without one; that is normalized to null here.
    pub public_dns_name: Option<String>,
    /// Derived: true iff a public IP or a non-empty public DNS name is
    /// present.
    pub is_public: bool,
    /// Instance state name (`running`, `stopped`, ...).
    pub state: String,
    /// Subnet the primary interface lives in.
    pub subnet_id: String,
    /// VPC identifier.
    pub vpc_id: String,
    /// CPU architecture.
    pub architecture: String,
    /// Volume id of the first block device mapping.
    pub volume_id: String,
    /// Instance profile ARN. Not all instances carry a role.
    pub iam_instance_profile_arn: Option<String>,
    /// Id of the first network interface.
    pub network_interface_id: String,
    /// Id of the first security group.
    pub security_group_id: String,
    /// Name of the first security group.
    pub security_group_name: String,
    /// IMDS token requirement (`optional` or `required`).
    pub metadata_options_http_tokens: String,
    /// IMDS hop limit, stringified.
    pub metadata_options_http_put_response_hop_limit: String,
    /// Whether the IMDS endpoint is enabled.
    pub metadata_options_http_endpoint: String,
    /// Whether instance tags are exposed through IMDS.
    pub metadata_options_instance_metadata_tags: String,
    /// Whether Nitro Enclaves are enabled, stringified.
    pub enclave_options: String,
}

/// Shorthand for required-field extraction inside `from_sdk`.
fn required(instance_id: &str, field: &'static str, value: Option<String>) -> Result<String> {
    value.ok_or_else(|| PostureError::MissingField {
        instance_id: instance_id.to_string(),
        field,
    })
}

impl Ec2Instance {
    /// Normalizes one DescribeInstances record.
    ///
    /// This is the only place upstream compute fields are read, so a schema
    /// drift surfaces here as a single `MissingField` error instead of
    /// scattered fallback values.
    pub fn from_sdk(i: &Instance) -> Result<Self> {
        let id = i
            .instance_id()
            .map(str::to_string)
            .ok_or_else(|| PostureError::MissingField {
                instance_id: "<unknown>".to_string(),
                field: "InstanceId",
            })?;

        let launch_time = i
            .launch_time()
            .and_then(|t| t.fmt(Format::DateTime).ok())
            .ok_or_else(|| PostureError::MissingField {
                instance_id: id.clone(),
                field: "LaunchTime",
            })?;

        let public_ip_address = i.public_ip_address().map(str::to_string);
        // Public DNS reports an empty string instead of omitting the field.
        let public_dns_name = i
            .public_dns_name()
            .filter(|dns| !dns.is_empty())
            .map(str::to_string);
        let is_public = public_ip_address.is_some() || public_dns_name.is_some();

        let metadata = i.metadata_options();
        let first_group = i.security_groups().first();

        Ok(Ec2Instance {
            image_id: required(&id, "ImageId", i.image_id().map(str::to_string))?,
            instance_type: required(
                &id,
                "InstanceType",
                i.instance_type().map(|t| t.as_str().to_string()),
            )?,
            launch_time,
            private_dns_name: required(
                &id,
                "PrivateDnsName",
                i.private_dns_name().map(str::to_string),
            )?,
            private_ip_address: required(
                &id,
                "PrivateIpAddress",
                i.private_ip_address().map(str::to_string),
            )?,
            public_ip_address,
            public_dns_name,
            is_public,
            state: required(
                &id,
                "State",
                i.state().and_then(|s| s.name()).map(|n| n.as_str().to_string()),
            )?,
            subnet_id: required(&id, "SubnetId", i.subnet_id().map(str::to_string))?,
            vpc_id: required(&id, "VpcId", i.vpc_id().map(str::to_string))?,
            architecture: required(
                &id,
                "Architecture",
                i.architecture().map(|a| a.as_str().to_string()),
            )?,
            volume_id: required(
                &id,
                "VolumeId",
                i.block_device_mappings()
                    .first()
                    .and_then(|b| b.ebs())
                    .and_then(|e| e.volume_id())
                    .map(str::to_string),
            )?,
            iam_instance_profile_arn: i
                .iam_instance_profile()
                .and_then(|p| p.arn())
                .map(str::to_string),
            network_interface_id: required(
                &id,
                "NetworkInterfaceId",
                i.network_interfaces()
                    .first()
                    .and_then(|n| n.network_interface_id())
                    .map(str::to_string),
            )?,
            security_group_id: required(
                &id,
                "SecurityGroupId",
                first_group.and_then(|g| g.group_id()).map(str::to_string),
            )?,
            security_group_name: required(
                &id,
                "SecurityGroupName",
                first_group.and_then(|g| g.group_name()).map(str::to_string),
            )?,
            metadata_options_http_tokens: required(
                &id,
                "MetadataOptionsHttpTokens",
                metadata
                    .and_then(|m| m.http_tokens())
                    .map(|t| t.as_str().to_string()),
            )?,
            metadata_options_http_put_response_hop_limit: required(
                &id,
                "MetadataOptionsHttpPutResponseHopLimit",
                metadata
                    .and_then(|m| m.http_put_response_hop_limit())
                    .map(|h| h.to_string()),
            )?,
            metadata_options_http_endpoint: required(
                &id,
                "MetadataOptionsHttpEndpoint",
                metadata
                    .and_then(|m| m.http_endpoint())
                    .map(|e| e.as_str().to_string()),
            )?,
            metadata_options_instance_metadata_tags: required(
                &id,
                "MetadataOptionsInstanceMetadataTags",
                metadata
                    .and_then(|m| m.instance_metadata_tags())
                    .map(|t| t.as_str().to_string()),
            )?,
            enclave_options: required(
                &id,
                "EnclaveOptions",
                i.enclave_options().and_then(|e| e.enabled()).map(|b| b.to_string()),
            )?,
            instance_id: id,
        })
    }
}

/// Builds an EC2 client scoped to one region with the adaptive retry
/// policy. Throttling and transient faults are absorbed here and never
/// reach the collector logic.
async fn regional_client(region: &str) -> aws_sdk_ec2::Client {
    let config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .retry_config(RetryConfig::adaptive().with_max_attempts(EC2_MAX_ATTEMPTS))
        .load()
        .await;
    aws_sdk_ec2::Client::new(&config)
}

/// Collects the normalized instance inventory across all given regions,
/// in region order.
///
/// # Errors
///
/// A DescribeInstances failure (after the retry budget) or a missing
/// required field aborts the run — a partial inventory must not be
/// published.
pub async fn collect_instances(regions: &[String]) -> Result<Vec<Ec2Instance>> {
    let mut records = Vec::new();

    for region in regions {
        let client = regional_client(region).await;
        let before = records.len();

        let mut pages = client.describe_instances().into_paginator().send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(aws_sdk_ec2::Error::from)?;
            for reservation in page.reservations() {
                for instance in reservation.instances() {
                    records.push(Ec2Instance::from_sdk(instance)?);
                }
            }
        }

        info!(
            region = %region,
            instances = records.len() - before,
            "EC2 collection for region complete"
        );
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_ec2::types::{
        ArchitectureValues, EbsInstanceBlockDevice, EnclaveOptions, GroupIdentifier,
        HttpTokensState, IamInstanceProfile, InstanceBlockDeviceMapping,
        InstanceMetadataEndpointState, InstanceMetadataOptionsResponse, InstanceMetadataTagsState,
        InstanceNetworkInterface, InstanceState, InstanceStateName, InstanceType,
    };
    use aws_smithy_types::DateTime;

    /// A fully populated instance as DescribeInstances would return it.
    fn complete_instance() -> Instance {
        Instance::builder()
            .instance_id("i-0a1b2c3d4e5f6g7h8")
            .image_id("ami-12345678")
            .instance_type(InstanceType::T3Micro)
            .launch_time(DateTime::from_secs(1_700_000_000))
            .private_dns_name("ip-10-0-0-5.ec2.internal")
            .private_ip_address("10.0.0.5")
            .state(
                InstanceState::builder()
                    .name(InstanceStateName::Running)
                    .build(),
            )
            .subnet_id("subnet-aaaa")
            .vpc_id("vpc-bbbb")
            .architecture(ArchitectureValues::X8664)
            .block_device_mappings(
                InstanceBlockDeviceMapping::builder()
                    .ebs(
                        EbsInstanceBlockDevice::builder()
                            .volume_id("vol-0123")
                            .build(),
                    )
                    .build(),
            )
            .network_interfaces(
                InstanceNetworkInterface::builder()
                    .network_interface_id("eni-0456")
                    .build(),
            )
            .security_groups(
                GroupIdentifier::builder()
                    .group_id("sg-0789")
                    .group_name("default")
                    .build(),
            )
            .metadata_options(
                InstanceMetadataOptionsResponse::builder()
                    .http_tokens(HttpTokensState::Required)
                    .http_put_response_hop_limit(2)
                    .http_endpoint(InstanceMetadataEndpointState::Enabled)
                    .instance_metadata_tags(InstanceMetadataTagsState::Disabled)
                    .build(),
            )
            .enclave_options(EnclaveOptions::builder().enabled(false).build())
            .build()
    }

    #[test]
    fn complete_instance_normalizes() {
        let record = Ec2Instance::from_sdk(&complete_instance()).unwrap();
        assert_eq!(record.instance_id, "i-0a1b2c3d4e5f6g7h8");
        assert_eq!(record.image_id, "ami-12345678");
        assert_eq!(record.instance_type, "t3.micro");
        assert_eq!(record.launch_time, "2023-11-14T22:13:20Z");
        assert_eq!(record.state, "running");
        assert_eq!(record.architecture, "x86_64");
        assert_eq!(record.volume_id, "vol-0123");
        assert_eq!(record.network_interface_id, "eni-0456");
        assert_eq!(record.security_group_id, "sg-0789");
        assert_eq!(record.security_group_name, "default");
        assert_eq!(record.metadata_options_http_tokens, "required");
        assert_eq!(record.metadata_options_http_put_response_hop_limit, "2");
        assert_eq!(record.metadata_options_http_endpoint, "enabled");
        assert_eq!(record.metadata_options_instance_metadata_tags, "disabled");
        assert_eq!(record.enclave_options, "false");
        assert!(record.iam_instance_profile_arn.is_none());
    }

    #[test]
    fn missing_public_fields_are_not_public() {
        let record = Ec2Instance::from_sdk(&complete_instance()).unwrap();
        assert!(record.public_ip_address.is_none());
        assert!(record.public_dns_name.is_none());
        assert!(!record.is_public);
    }

    #[test]
    fn empty_public_dns_is_normalized_to_null() {
        // The API reports "" rather than omitting PublicDnsName.
        let instance = complete_instance().to_builder().public_dns_name("").build();
        let record = Ec2Instance::from_sdk(&instance).unwrap();
        assert!(record.public_dns_name.is_none());
        assert!(!record.is_public);
    }

    #[test]
    fn public_ip_makes_instance_public() {
        let instance = complete_instance()
            .to_builder()
            .public_ip_address("54.1.2.3")
            .public_dns_name("")
            .build();
        let record = Ec2Instance::from_sdk(&instance).unwrap();
        assert_eq!(record.public_ip_address.as_deref(), Some("54.1.2.3"));
        assert!(record.is_public);
    }

    #[test]
    fn public_dns_alone_makes_instance_public() {
        let instance = complete_instance()
            .to_builder()
            .public_dns_name("ec2-54-1-2-3.compute-1.amazonaws.com")
            .build();
        let record = Ec2Instance::from_sdk(&instance).unwrap();
        assert!(record.public_ip_address.is_none());
        assert!(record.is_public);
    }

    #[test]
    fn instance_profile_arn_is_carried_when_present() {
        let instance = complete_instance()
            .to_builder()
            .iam_instance_profile(
                IamInstanceProfile::builder()
                    .arn("arn:aws:iam::111122223333:instance-profile/web")
                    .build(),
            )
            .build();
        let record = Ec2Instance::from_sdk(&instance).unwrap();
        assert_eq!(
            record.iam_instance_profile_arn.as_deref(),
            Some("arn:aws:iam::111122223333:instance-profile/web")
        );
    }

    #[test]
    fn missing_required_field_is_a_typed_error() {
        let instance = complete_instance().to_builder().set_subnet_id(None).build();
        let err = Ec2Instance::from_sdk(&instance).unwrap_err();
        match err {
            PostureError::MissingField { instance_id, field } => {
                assert_eq!(instance_id, "i-0a1b2c3d4e5f6g7h8");
                assert_eq!(field, "SubnetId");
            }
            other => panic!("expected MissingField, got {other}"),
        }
    }

    #[test]
    fn serialized_record_uses_dataset_key_names() {
        let json = serde_json::to_value(Ec2Instance::from_sdk(&complete_instance()).unwrap())
            .unwrap();
        for key in [
            "ImageId",
            "InstanceId",
            "InstanceType",
            "LaunchTime",
            "PrivateDnsName",
            "PrivateIpAddress",
            "PublicIpAddress",
            "PublicDnsName",
            "IsPublic",
            "State",
            "SubnetId",
            "VpcId",
            "Architecture",
            "VolumeId",
            "IamInstanceProfileArn",
            "NetworkInterfaceId",
            "SecurityGroupId",
            "SecurityGroupName",
            "MetadataOptionsHttpTokens",
            "MetadataOptionsHttpPutResponseHopLimit",
            "MetadataOptionsHttpEndpoint",
            "MetadataOptionsInstanceMetadataTags",
            "EnclaveOptions",
        ] {
            assert!(json.get(key).is_some(), "dataset key {key} missing");
        }
        assert_eq!(json["PublicDnsName"], serde_json::Value::Null);
        assert_eq!(json["IsPublic"], false);
    }
}
