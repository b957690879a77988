//! AWS strategies for the lifecycle controller.
//!
//! Each submodule implements [`crate::Lifecycle`] for one resource kind
//! over the corresponding service client. The provider handle is the
//! shared [`SdkConfig`]; clients are constructed per call and carry no
//! domain state.

pub use aws_config::SdkConfig;

pub mod elb;
pub mod endpoint;
pub mod nat;
pub mod rds;
