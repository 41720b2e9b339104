//! HF Endpoint Stack - HuggingFace inference endpoint composer
//!
//! Composes a CloudFormation template that hosts a HuggingFace model on a
//! SageMaker endpoint, optionally fronted by an API Gateway POST route.
//! Deployment itself is left to CloudFormation.

pub mod compose;
pub mod config;
pub mod error;
pub mod regions;
pub mod synth;
pub mod template;

pub use compose::{ComposedStack, StackComposer, StackSummary, compose};
pub use config::{BucketMode, DeployConfig, PermissionScope};
pub use error::{ConfigResult, ConfigurationError, SynthError, SynthResult};
pub use regions::{RegionTable, RegionTarget, RepositoryRef};
pub use template::Template;
