//! Resource composition
//!
//! Turns a [`DeployConfig`] into a CloudFormation [`Template`] declaring:
//!
//! ```text
//! SagemakerRole ─ SagemakerPolicy
//!        │
//! HuggingFaceModel (image + model data) ─ EndpointConfig ─ Endpoint
//!                                                            │
//!                      ApiGatewayRole ─ ApiGatewayPolicy ────┤ (optional)
//!                      ApiGateway ─ ModelRoute ─ POST ───────┘
//! ```
//!
//! Composition is pure: it validates, resolves the region, then declares
//! resources. Nothing is deployed here.

use crate::config::{BucketMode, DeployConfig, PermissionScope};
use crate::error::ConfigResult;
use crate::regions::{RegionTable, RegionTarget, RepositoryRef};
use crate::template::{
    Output, Resource, Statement, Template, assume_role_policy, escape_sub, get_att,
    policy_document, reference, sub,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;

// Logical ids
pub const SAGEMAKER_ROLE: &str = "SagemakerRole";
pub const SAGEMAKER_POLICY: &str = "SagemakerPolicy";
pub const MODEL_BUCKET: &str = "ModelBucket";
pub const MODEL: &str = "HuggingFaceModel";
pub const ENDPOINT_CONFIG: &str = "EndpointConfig";
pub const ENDPOINT: &str = "Endpoint";
pub const GATEWAY_ROLE: &str = "ApiGatewayRole";
pub const GATEWAY_POLICY: &str = "ApiGatewayPolicy";
pub const REST_API: &str = "ApiGateway";
pub const ROUTE_RESOURCE: &str = "ModelRoute";
pub const ROUTE_POST: &str = "ModelRoutePost";
pub const ROUTE_OPTIONS: &str = "ModelRouteOptions";
pub const DEPLOYMENT_PREFIX: &str = "ApiGatewayDeployment";
pub const STAGE: &str = "ApiGatewayStage";

const SAGEMAKER_FULL_ACCESS: &str = "AmazonSageMakerFullAccess";

const LOG_AND_METRIC_ACTIONS: &[&str] = &[
    "cloudwatch:PutMetricData",
    "cloudwatch:GetMetricData",
    "cloudwatch:GetMetricStatistics",
    "cloudwatch:ListMetrics",
    "logs:CreateLogGroup",
    "logs:CreateLogStream",
    "logs:DescribeLogStreams",
    "logs:PutLogEvents",
    "logs:GetLogEvents",
];

const LOG_WRITE_ACTIONS: &[&str] = &[
    "logs:CreateLogGroup",
    "logs:CreateLogStream",
    "logs:DescribeLogStreams",
    "logs:PutLogEvents",
];

const ECR_PULL_ACTIONS: &[&str] = &[
    "ecr:BatchCheckLayerAvailability",
    "ecr:GetDownloadUrlForLayer",
    "ecr:BatchGetImage",
];

const ECR_PUSH_ACTIONS: &[&str] = &[
    "ecr:PutImage",
    "ecr:InitiateLayerUpload",
    "ecr:UploadLayerPart",
    "ecr:CompleteLayerUpload",
];

const S3_READ_WRITE_ACTIONS: &[&str] = &[
    "s3:GetObject*",
    "s3:GetBucket*",
    "s3:List*",
    "s3:DeleteObject*",
    "s3:PutObject",
    "s3:PutObjectLegalHold",
    "s3:PutObjectRetention",
    "s3:PutObjectTagging",
    "s3:PutObjectVersionTagging",
    "s3:Abort*",
];

const CORS_ALLOW_HEADERS: &str =
    "'Content-Type,X-Amz-Date,Authorization,X-Api-Key,X-Amz-Security-Token,X-Amz-User-Agent'";
const CORS_ALLOW_METHODS: &str = "'OPTIONS,GET,PUT,POST,DELETE,PATCH,HEAD'";
const CORS_ALLOW_ORIGIN: &str = "'*'";

/// Logical id of a deployment snapshotting the given resources
///
/// The id carries a digest of the resources, so any change to a method or
/// route yields a new deployment that the stage then points at.
pub fn deployment_logical_id(template: &Template, logical_ids: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for id in logical_ids {
        hasher.update(id.as_bytes());
        if let Some(resource) = template.resource(id) {
            // Value maps are ordered, so the serialized bytes are stable
            hasher.update(serde_json::to_vec(resource).unwrap_or_default());
        }
    }
    let digest = hex::encode(hasher.finalize());
    format!("{}{}", DEPLOYMENT_PREFIX, &digest[..16])
}

/// Invocation path of a SageMaker endpoint on the `runtime.sagemaker` service
pub fn invocation_path(endpoint_name: &str) -> String {
    format!("endpoints/{}/invocations", endpoint_name)
}

/// A local model archive to upload into a bucket created by the stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSeed {
    pub source: PathBuf,
    pub bucket: SeedBucket,
    pub key: String,
}

/// Where a seed goes: a known bucket name, or a name the stack reports as an output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedBucket {
    Name(String),
    StackOutput(String),
}

/// Identifiers known at composition time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackSummary {
    pub stack_name: String,
    pub region: String,
    pub endpoint_name: String,
    pub repository_arn: String,
    pub image_uri: String,
    pub artifact_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
}

/// Result of a successful composition
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedStack {
    pub template: Template,
    pub seeds: Vec<ArtifactSeed>,
    pub summary: StackSummary,
}

/// The artifact bucket as seen from other resources
enum BucketRef {
    Existing(String),
    Created,
}

impl BucketRef {
    fn arn(&self, partition: &str) -> Value {
        match self {
            Self::Existing(name) => json!(format!("arn:{}:s3:::{}", partition, name)),
            Self::Created => get_att(MODEL_BUCKET, "Arn"),
        }
    }

    fn object_arn(&self, partition: &str, key: &str) -> Value {
        match self {
            Self::Existing(name) => json!(format!("arn:{}:s3:::{}/{}", partition, name, key)),
            Self::Created => sub(format!("${{{}.Arn}}/{}", MODEL_BUCKET, escape_sub(key))),
        }
    }

    fn url(&self, key: &str) -> Value {
        match self {
            Self::Existing(name) => json!(format!("s3://{}/{}", name, key)),
            Self::Created => sub(format!("s3://${{{}}}/{}", MODEL_BUCKET, escape_sub(key))),
        }
    }
}

/// Composes the resource graph for one deployment
pub struct StackComposer<'a> {
    config: &'a DeployConfig,
    regions: &'a RegionTable,
}

impl<'a> StackComposer<'a> {
    pub fn new(config: &'a DeployConfig, regions: &'a RegionTable) -> Self {
        Self { config, regions }
    }

    /// Validate, resolve the region, then declare every resource
    pub fn compose(&self) -> ConfigResult<ComposedStack> {
        let config = self.config;
        config.validate()?;

        let target = self.regions.resolve_target(&config.region)?;
        let repository = target.repository(&config.image.repository);
        tracing::debug!(
            region = %target.region,
            account = %target.account,
            partition = %target.partition,
            "Resolved container repository account"
        );

        let mut template = Template::new(format!(
            "HuggingFace inference endpoint for {} in {}",
            config.model.name, config.region
        ));
        let mut seeds = Vec::new();

        let key = config.artifact_key();
        let bucket = self.declare_bucket(&mut template, &mut seeds, &key);

        self.declare_execution_role(&mut template, &target, &repository, &bucket, &key);

        let image_uri = repository.image_uri(&config.image.tag);
        self.declare_model(&mut template, &image_uri, &bucket, &key);
        self.declare_endpoint(&mut template);

        let route = if config.gateway.enabled {
            let route = config.route_path();
            self.declare_gateway(&mut template, &route);
            Some(route)
        } else {
            tracing::debug!("Gateway disabled, skipping API resources");
            None
        };

        template.add_output(
            "EndpointName",
            Output::new(json!(config.endpoint.name)).describe("SageMaker endpoint name"),
        );
        template.add_output(
            "ImageUri",
            Output::new(json!(image_uri)).describe("Inference container image"),
        );
        template.add_output(
            "ModelDataUrl",
            Output::new(bucket.url(&key)).describe("Packaged model artifact"),
        );

        let summary = StackSummary {
            stack_name: config.stack_name.clone(),
            region: config.region.clone(),
            endpoint_name: config.endpoint.name.clone(),
            repository_arn: repository.repository_arn(),
            image_uri,
            artifact_key: key,
            route,
        };

        tracing::info!(
            stack = %summary.stack_name,
            region = %summary.region,
            endpoint = %summary.endpoint_name,
            resources = template.resources.len(),
            gateway = summary.route.is_some(),
            "Composed stack"
        );

        Ok(ComposedStack {
            template,
            seeds,
            summary,
        })
    }

    fn declare_bucket(
        &self,
        template: &mut Template,
        seeds: &mut Vec<ArtifactSeed>,
        key: &str,
    ) -> BucketRef {
        let artifacts = &self.config.artifacts;

        match (artifacts.mode, &artifacts.source) {
            (BucketMode::Provisioned, Some(source)) => {
                let mut properties = json!({
                    "BucketEncryption": {
                        "ServerSideEncryptionConfiguration": [{
                            "ServerSideEncryptionByDefault": { "SSEAlgorithm": "AES256" }
                        }]
                    },
                    "PublicAccessBlockConfiguration": {
                        "BlockPublicAcls": true,
                        "BlockPublicPolicy": true,
                        "IgnorePublicAcls": true,
                        "RestrictPublicBuckets": true
                    }
                });
                let seed_bucket = match &artifacts.bucket {
                    Some(name) => {
                        properties["BucketName"] = json!(name);
                        SeedBucket::Name(name.clone())
                    }
                    None => SeedBucket::StackOutput("ModelBucketName".to_string()),
                };

                template.add_resource(
                    MODEL_BUCKET,
                    Resource::new("AWS::S3::Bucket", properties).retain(),
                );
                template.add_output(
                    "ModelBucketName",
                    Output::new(reference(MODEL_BUCKET)).describe("Model artifact bucket"),
                );
                seeds.push(ArtifactSeed {
                    source: source.clone(),
                    bucket: seed_bucket,
                    key: key.to_string(),
                });
                tracing::debug!(source = ?source, key, "Declared artifact bucket with seed");

                BucketRef::Created
            }
            // validate() guarantees the remaining cases carry a bucket name
            _ => BucketRef::Existing(artifacts.bucket.clone().unwrap_or_default()),
        }
    }

    fn declare_execution_role(
        &self,
        template: &mut Template,
        target: &RegionTarget,
        repository: &RepositoryRef,
        bucket: &BucketRef,
        key: &str,
    ) {
        let partition = target.partition.as_str();
        let repository_arn = json!(repository.repository_arn());

        let mut role = json!({
            "AssumeRolePolicyDocument": assume_role_policy("sagemaker.amazonaws.com"),
        });

        let statements = match self.config.permission_scope {
            PermissionScope::Managed => {
                role["ManagedPolicyArns"] = json!([format!(
                    "arn:{}:iam::aws:policy/{}",
                    partition, SAGEMAKER_FULL_ACCESS
                )]);

                let mut ecr_actions = ECR_PULL_ACTIONS.to_vec();
                ecr_actions.extend_from_slice(ECR_PUSH_ACTIONS);

                vec![
                    Statement::allow(LOG_AND_METRIC_ACTIONS, vec![json!("*")]),
                    Statement::allow(
                        S3_READ_WRITE_ACTIONS,
                        vec![bucket.arn(partition), bucket.object_arn(partition, "*")],
                    ),
                    Statement::allow(&ecr_actions, vec![repository_arn]),
                    Statement::allow(&["ecr:GetAuthorizationToken"], vec![json!("*")]),
                ]
            }
            PermissionScope::LeastPrivilege => vec![
                Statement::allow(&["ecr:GetAuthorizationToken"], vec![json!("*")]),
                Statement::allow(ECR_PULL_ACTIONS, vec![repository_arn]),
                Statement::allow(
                    LOG_WRITE_ACTIONS,
                    vec![sub(
                        "arn:${AWS::Partition}:logs:${AWS::Region}:${AWS::AccountId}:log-group:/aws/sagemaker/*",
                    )],
                ),
                // PutMetricData has no resource-level scoping
                Statement::allow(&["cloudwatch:PutMetricData"], vec![json!("*")]),
                Statement::allow(&["s3:GetObject"], vec![bucket.object_arn(partition, key)]),
                Statement::allow(&["s3:ListBucket"], vec![bucket.arn(partition)]),
            ],
        };

        template.add_resource(SAGEMAKER_ROLE, Resource::new("AWS::IAM::Role", role));
        template.add_resource(
            SAGEMAKER_POLICY,
            Resource::new(
                "AWS::IAM::Policy",
                json!({
                    "PolicyName": SAGEMAKER_POLICY,
                    "PolicyDocument": policy_document(&statements),
                    "Roles": [reference(SAGEMAKER_ROLE)],
                }),
            ),
        );
        tracing::debug!(
            scope = ?self.config.permission_scope,
            statements = statements.len(),
            "Declared execution role"
        );
    }

    fn declare_model(
        &self,
        template: &mut Template,
        image_uri: &str,
        bucket: &BucketRef,
        key: &str,
    ) {
        let model = &self.config.model;

        let mut environment = BTreeMap::from([
            ("HF_MODEL_ID".to_string(), model.name.clone()),
            ("HF_TASK".to_string(), model.task.clone()),
            (
                "MMS_DEFAULT_WORKERS_PER_MODEL".to_string(),
                model.workers_per_model.to_string(),
            ),
        ]);
        environment.extend(model.environment.clone());

        template.add_resource(
            MODEL,
            Resource::new(
                "AWS::SageMaker::Model",
                json!({
                    "ExecutionRoleArn": get_att(SAGEMAKER_ROLE, "Arn"),
                    "PrimaryContainer": {
                        "Image": image_uri,
                        "ModelDataUrl": bucket.url(key),
                        "Environment": environment,
                    },
                }),
            )
            // The role must carry its grants before SageMaker pulls the image
            .depends_on(&[SAGEMAKER_POLICY]),
        );
        tracing::debug!(image = image_uri, key, "Declared model");
    }

    fn declare_endpoint(&self, template: &mut Template) {
        let endpoint = &self.config.endpoint;

        template.add_resource(
            ENDPOINT_CONFIG,
            Resource::new(
                "AWS::SageMaker::EndpointConfig",
                json!({
                    "ProductionVariants": [{
                        "ModelName": get_att(MODEL, "ModelName"),
                        "VariantName": endpoint.variant_name,
                        "InstanceType": endpoint.instance_type,
                        "InitialInstanceCount": endpoint.initial_instance_count,
                        "InitialVariantWeight": endpoint.initial_variant_weight,
                    }]
                }),
            ),
        );

        template.add_resource(
            ENDPOINT,
            Resource::new(
                "AWS::SageMaker::Endpoint",
                json!({
                    "EndpointConfigName": get_att(ENDPOINT_CONFIG, "EndpointConfigName"),
                    "EndpointName": endpoint.name,
                }),
            ),
        );
        tracing::debug!(
            endpoint = %endpoint.name,
            variant = %endpoint.variant_name,
            instance_type = %endpoint.instance_type,
            "Declared endpoint"
        );
    }

    fn declare_gateway(&self, template: &mut Template, route: &str) {
        let gateway = &self.config.gateway;
        let endpoint_name = &self.config.endpoint.name;

        template.add_resource(
            GATEWAY_ROLE,
            Resource::new(
                "AWS::IAM::Role",
                json!({
                    "AssumeRolePolicyDocument": assume_role_policy("apigateway.amazonaws.com"),
                }),
            ),
        );
        template.add_resource(
            GATEWAY_POLICY,
            Resource::new(
                "AWS::IAM::Policy",
                json!({
                    "PolicyName": GATEWAY_POLICY,
                    "PolicyDocument": policy_document(&[Statement::allow(
                        &["sagemaker:InvokeEndpoint"],
                        // Ref on an endpoint yields its ARN
                        vec![reference(ENDPOINT)],
                    )]),
                    "Roles": [reference(GATEWAY_ROLE)],
                }),
            ),
        );

        template.add_resource(
            REST_API,
            Resource::new(
                "AWS::ApiGateway::RestApi",
                json!({
                    "Name": self.config.stack_name,
                    "Description": format!("Invokes SageMaker endpoint {}", endpoint_name),
                }),
            ),
        );
        template.add_resource(
            ROUTE_RESOURCE,
            Resource::new(
                "AWS::ApiGateway::Resource",
                json!({
                    "ParentId": get_att(REST_API, "RootResourceId"),
                    "PathPart": route,
                    "RestApiId": reference(REST_API),
                }),
            ),
        );

        let mut integration_response = json!({ "StatusCode": "200" });
        let mut method_response = json!({ "StatusCode": "200" });
        if gateway.cors {
            integration_response["ResponseParameters"] = json!({
                "method.response.header.Access-Control-Allow-Origin": CORS_ALLOW_ORIGIN,
            });
            method_response["ResponseParameters"] = json!({
                "method.response.header.Access-Control-Allow-Origin": true,
            });
        }

        template.add_resource(
            ROUTE_POST,
            Resource::new(
                "AWS::ApiGateway::Method",
                json!({
                    "AuthorizationType": "NONE",
                    "HttpMethod": "POST",
                    "ResourceId": reference(ROUTE_RESOURCE),
                    "RestApiId": reference(REST_API),
                    "Integration": {
                        "Type": "AWS",
                        "IntegrationHttpMethod": "POST",
                        "Uri": sub(format!(
                            "arn:${{AWS::Partition}}:apigateway:${{AWS::Region}}:runtime.sagemaker:path/{}",
                            invocation_path(endpoint_name)
                        )),
                        "Credentials": get_att(GATEWAY_ROLE, "Arn"),
                        "IntegrationResponses": [integration_response],
                    },
                    "MethodResponses": [method_response],
                }),
            )
            .depends_on(&[ENDPOINT, GATEWAY_POLICY]),
        );

        let mut methods = vec![ROUTE_POST];
        if gateway.cors {
            template.add_resource(ROUTE_OPTIONS, preflight_method());
            methods.push(ROUTE_OPTIONS);
        }

        let mut snapshot = vec![ROUTE_RESOURCE];
        snapshot.extend_from_slice(&methods);
        let deployment = deployment_logical_id(template, &snapshot);

        template.add_resource(
            &deployment,
            Resource::new(
                "AWS::ApiGateway::Deployment",
                json!({ "RestApiId": reference(REST_API) }),
            )
            .depends_on(&methods),
        );
        template.add_resource(
            STAGE,
            Resource::new(
                "AWS::ApiGateway::Stage",
                json!({
                    "StageName": gateway.stage_name,
                    "RestApiId": reference(REST_API),
                    "DeploymentId": reference(&deployment),
                    "TracingEnabled": gateway.tracing_enabled,
                    "MethodSettings": [{
                        "ResourcePath": "/*",
                        "HttpMethod": "*",
                        "MetricsEnabled": gateway.metrics_enabled,
                    }],
                }),
            ),
        );

        template.add_output(
            "ApiGatewayUrl",
            Output::new(sub(format!(
                "https://${{{}}}.execute-api.${{AWS::Region}}.${{AWS::URLSuffix}}/{}/{}",
                REST_API, gateway.stage_name, route
            )))
            .describe("POST model inputs here"),
        );
        tracing::debug!(
            route,
            stage = %gateway.stage_name,
            deployment = %deployment,
            "Declared gateway route"
        );
    }
}

/// Mock `OPTIONS` method answering CORS preflight requests
fn preflight_method() -> Resource {
    Resource::new(
        "AWS::ApiGateway::Method",
        json!({
            "AuthorizationType": "NONE",
            "HttpMethod": "OPTIONS",
            "ResourceId": reference(ROUTE_RESOURCE),
            "RestApiId": reference(REST_API),
            "Integration": {
                "Type": "MOCK",
                "RequestTemplates": { "application/json": "{ \"statusCode\": 200 }" },
                "IntegrationResponses": [{
                    "StatusCode": "204",
                    "ResponseParameters": {
                        "method.response.header.Access-Control-Allow-Headers": CORS_ALLOW_HEADERS,
                        "method.response.header.Access-Control-Allow-Methods": CORS_ALLOW_METHODS,
                        "method.response.header.Access-Control-Allow-Origin": CORS_ALLOW_ORIGIN,
                    },
                }],
            },
            "MethodResponses": [{
                "StatusCode": "204",
                "ResponseParameters": {
                    "method.response.header.Access-Control-Allow-Headers": true,
                    "method.response.header.Access-Control-Allow-Methods": true,
                    "method.response.header.Access-Control-Allow-Origin": true,
                },
            }],
        }),
    )
}

/// Compose with the configuration's own region table
pub fn compose(config: &DeployConfig) -> ConfigResult<ComposedStack> {
    let regions = config.region_table();
    StackComposer::new(config, &regions).compose()
}
