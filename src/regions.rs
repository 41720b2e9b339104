//! Region to repository-account resolution
//!
//! The HuggingFace inference containers live in shared ECR repositories owned
//! by a per-region AWS account. This module maps a region to that account and
//! builds fully-qualified repository ARNs and image URIs from it.

use crate::error::{ConfigResult, ConfigurationError};
use std::collections::BTreeMap;

/// Account hosting the deep learning containers in most commercial regions
const DLC_ACCOUNT: &str = "763104351884";

/// Built-in region table
const BUILTIN_REGIONS: &[(&str, &str)] = &[
    ("af-south-1", "626614931356"),
    ("ap-east-1", "871362719292"),
    ("ap-northeast-1", DLC_ACCOUNT),
    ("ap-northeast-2", DLC_ACCOUNT),
    ("ap-northeast-3", "364406365360"),
    ("ap-south-1", DLC_ACCOUNT),
    ("ap-southeast-1", DLC_ACCOUNT),
    ("ap-southeast-2", DLC_ACCOUNT),
    ("ca-central-1", DLC_ACCOUNT),
    ("cn-north-1", "727897471807"),
    ("cn-northwest-1", "727897471807"),
    ("eu-central-1", DLC_ACCOUNT),
    ("eu-north-1", DLC_ACCOUNT),
    ("eu-south-1", "692866216735"),
    ("eu-west-1", DLC_ACCOUNT),
    ("eu-west-2", DLC_ACCOUNT),
    ("eu-west-3", DLC_ACCOUNT),
    ("me-south-1", "217643126080"),
    ("sa-east-1", DLC_ACCOUNT),
    ("us-east-1", DLC_ACCOUNT),
    ("us-east-2", DLC_ACCOUNT),
    ("us-gov-west-1", "442386744353"),
    ("us-iso-east-1", "886529160074"),
    ("us-west-1", DLC_ACCOUNT),
    ("us-west-2", DLC_ACCOUNT),
];

/// Lookup table from region identifier to repository account id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionTable {
    accounts: BTreeMap<String, String>,
}

impl Default for RegionTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RegionTable {
    /// Table with the well-known HuggingFace container accounts
    pub fn builtin() -> Self {
        Self {
            accounts: BUILTIN_REGIONS
                .iter()
                .map(|(region, account)| (region.to_string(), account.to_string()))
                .collect(),
        }
    }

    /// Add or replace entries. Later entries win.
    pub fn with_overrides<I, K, V>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (region, account) in overrides {
            self.accounts.insert(region.into(), account.into());
        }
        self
    }

    /// Return the account id hosting the inference repository for `region`
    pub fn resolve(&self, region: &str) -> ConfigResult<&str> {
        self.accounts
            .get(region)
            .map(String::as_str)
            .ok_or_else(|| ConfigurationError::UnknownRegion {
                region: region.to_string(),
            })
    }

    /// Resolve the account together with partition and URL suffix
    pub fn resolve_target(&self, region: &str) -> ConfigResult<RegionTarget> {
        let account = self.resolve(region)?;
        let partition = Partition::for_region(region);

        Ok(RegionTarget {
            region: region.to_string(),
            account: account.to_string(),
            partition,
        })
    }

    pub fn contains(&self, region: &str) -> bool {
        self.accounts.contains_key(region)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Entries sorted by region
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.accounts
            .iter()
            .map(|(region, account)| (region.as_str(), account.as_str()))
    }
}

/// AWS partition a region belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Aws,
    China,
    GovCloud,
    Iso,
}

impl Partition {
    pub fn for_region(region: &str) -> Self {
        if region.starts_with("cn-") {
            Self::China
        } else if region.starts_with("us-gov-") {
            Self::GovCloud
        } else if region.starts_with("us-iso-") {
            Self::Iso
        } else {
            Self::Aws
        }
    }

    /// Partition name used in ARNs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::China => "aws-cn",
            Self::GovCloud => "aws-us-gov",
            Self::Iso => "aws-iso",
        }
    }

    /// Domain suffix for service endpoints such as ECR registries
    pub fn url_suffix(&self) -> &'static str {
        match self {
            Self::Aws | Self::GovCloud => "amazonaws.com",
            Self::China => "amazonaws.com.cn",
            Self::Iso => "c2s.ic.gov",
        }
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved region: where the shared container repository lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionTarget {
    pub region: String,
    pub account: String,
    pub partition: Partition,
}

impl RegionTarget {
    /// Reference to `repository` inside this region's container account
    pub fn repository(&self, repository: &str) -> RepositoryRef {
        RepositoryRef {
            target: self.clone(),
            name: repository.to_string(),
        }
    }
}

/// Fully-qualified reference to a shared ECR repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRef {
    pub target: RegionTarget,
    pub name: String,
}

impl RepositoryRef {
    /// e.g. `arn:aws:ecr:eu-central-1:763104351884:repository/huggingface-pytorch-inference`
    pub fn repository_arn(&self) -> String {
        format!(
            "arn:{}:ecr:{}:{}:repository/{}",
            self.target.partition, self.target.region, self.target.account, self.name
        )
    }

    /// Registry host, e.g. `763104351884.dkr.ecr.eu-central-1.amazonaws.com`
    pub fn registry(&self) -> String {
        format!(
            "{}.dkr.ecr.{}.{}",
            self.target.account,
            self.target.region,
            self.target.partition.url_suffix()
        )
    }

    pub fn image_uri(&self, tag: &str) -> String {
        format!("{}/{}:{}", self.registry(), self.name, tag)
    }
}
