//! Batch pipeline correlating Microsoft Defender for Endpoint (MDE)
//! device/vulnerability data with the EC2 inventory of an AWS account and
//! publishing the merged result as QuickSight datasets.
//!
//! The pipeline is an extract-correlate-publish batch job: collect, match
//! devices to instances by tag inference, write each derived dataset plus a
//! QuickSight manifest to S3 with read-visibility confirmation, then
//! idempotently reconcile the QuickSight group and data sources.
//!
//! # Modules
//!
//! - [`auth`] — OAuth2 client-credentials exchange against Azure AD.
//! - [`client`] — Authenticated HTTP wrapper for the MDE REST API.
//! - [`ec2`] — Compute inventory collection and normalization.
//! - [`error`] — Typed error hierarchy (`PostureError`).
//! - [`machines`] — Device inventory and EC2 tag correlation.
//! - [`pipeline`] — Client lifecycle and run orchestration.
//! - [`publish`] — Dataset/manifest publishing with consistency polls.
//! - [`quicksight`] — Group and data-source reconciliation.
//! - [`regions`] — Opted-in region enumeration.
//! - [`secrets`] — Credential retrieval from SSM Parameter Store.
//! - [`vulns`] — Per-device vulnerability collection and normalization.

#![warn(missing_docs)]

pub mod auth;
pub mod client;
pub mod ec2;
pub mod error;
pub mod machines;
pub mod pipeline;
pub mod publish;
pub mod quicksight;
pub mod regions;
pub mod secrets;
pub mod vulns;
