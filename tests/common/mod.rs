//! Shared fixtures for integration tests

#![allow(dead_code)]

use hf_endpoint_stack::config::{ArtifactSettings, ImageSettings, ModelSettings};
use hf_endpoint_stack::{BucketMode, DeployConfig};
use std::path::PathBuf;

pub const MODEL_NAME: &str = "distilbert-base-uncased-finetuned-sst-2-english";
pub const IMAGE_TAG: &str = "1.13.1-transformers4.26.0-cpu-py39-ubuntu20.04";
pub const BUCKET: &str = "generative-ai-model-bucket-123874692351";

/// Sentiment model in eu-central-1, existing bucket, gateway on
pub fn sst2_config() -> DeployConfig {
    DeployConfig {
        region: "eu-central-1".to_string(),
        model: ModelSettings {
            name: MODEL_NAME.to_string(),
            ..Default::default()
        },
        image: ImageSettings {
            tag: IMAGE_TAG.to_string(),
            ..Default::default()
        },
        artifacts: ArtifactSettings {
            bucket: Some(BUCKET.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Same deployment with a stack-created bucket seeded from a local archive
pub fn provisioned_config(bucket: Option<&str>) -> DeployConfig {
    let mut config = sst2_config();
    config.artifacts = ArtifactSettings {
        mode: BucketMode::Provisioned,
        bucket: bucket.map(str::to_string),
        key: None,
        source: Some(PathBuf::from("models/sst2.tar.gz")),
    };
    config
}
