//! CloudFormation template model
//!
//! A small typed layer over the template document. Maps are ordered so that a
//! given set of resources always renders to the same JSON.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

pub const FORMAT_VERSION: &str = "2010-09-09";

/// A complete CloudFormation template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,
    pub description: String,
    pub resources: BTreeMap<String, Resource>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Output>,
}

impl Template {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            format_version: FORMAT_VERSION.to_string(),
            description: description.into(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Declare a resource under `logical_id`, replacing any previous declaration
    pub fn add_resource(&mut self, logical_id: &str, resource: Resource) {
        if self
            .resources
            .insert(logical_id.to_string(), resource)
            .is_some()
        {
            tracing::warn!(logical_id, "Resource declared twice, keeping the latest");
        }
    }

    pub fn add_output(&mut self, name: &str, output: Output) {
        self.outputs.insert(name.to_string(), output);
    }

    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.resources.get(logical_id)
    }

    /// Logical ids of every resource with the given type
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a Resource)> + 'a {
        self.resources
            .iter()
            .filter(move |(_, r)| r.resource_type == resource_type)
            .map(|(id, r)| (id.as_str(), r))
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// One resource declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Resource {
    #[serde(rename = "Type")]
    pub resource_type: String,
    pub properties: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<String>,
}

impl Resource {
    pub fn new(resource_type: &str, properties: Value) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            properties,
            depends_on: Vec::new(),
            deletion_policy: None,
        }
    }

    pub fn depends_on(mut self, logical_ids: &[&str]) -> Self {
        self.depends_on
            .extend(logical_ids.iter().map(|id| id.to_string()));
        self
    }

    pub fn retain(mut self) -> Self {
        self.deletion_policy = Some("Retain".to_string());
        self
    }
}

/// A stack output surfaced by the provisioning engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub value: Value,
}

impl Output {
    pub fn new(value: Value) -> Self {
        Self {
            description: None,
            value,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// `{ "Ref": id }`
pub fn reference(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

/// `{ "Fn::GetAtt": [id, attribute] }`
pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

/// `{ "Fn::Sub": template }`
pub fn sub(template: impl Into<String>) -> Value {
    json!({ "Fn::Sub": template.into() })
}

/// Escape literal text for use inside an `Fn::Sub` template
///
/// `${` in the input would otherwise be read as a variable; `${!` renders as
/// a literal `${`.
pub fn escape_sub(text: &str) -> String {
    text.replace("${", "${!")
}

/// Trust policy letting `service` assume a role
pub fn assume_role_policy(service: &str) -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": service },
            "Action": "sts:AssumeRole"
        }]
    })
}

/// An `Allow` statement of an IAM policy document
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub actions: Vec<&'static str>,
    pub resources: Vec<Value>,
}

impl Statement {
    pub fn allow(actions: &[&'static str], resources: Vec<Value>) -> Self {
        Self {
            actions: actions.to_vec(),
            resources,
        }
    }

    pub fn to_value(&self) -> Value {
        json!({
            "Effect": "Allow",
            "Action": self.actions,
            "Resource": self.resources,
        })
    }
}

pub fn policy_document(statements: &[Statement]) -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": statements.iter().map(Statement::to_value).collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_serializes_with_cloudformation_keys() {
        let mut template = Template::new("test");
        template.add_resource(
            "Role",
            Resource::new("AWS::IAM::Role", json!({ "Path": "/" })).depends_on(&["Other"]),
        );
        template.add_output("RoleArn", Output::new(get_att("Role", "Arn")));

        let value = serde_json::to_value(&template).unwrap();
        assert_eq!(value["AWSTemplateFormatVersion"], "2010-09-09");
        assert_eq!(value["Description"], "test");
        assert_eq!(value["Resources"]["Role"]["Type"], "AWS::IAM::Role");
        assert_eq!(value["Resources"]["Role"]["DependsOn"], json!(["Other"]));
        assert!(value["Resources"]["Role"].get("DeletionPolicy").is_none());
        assert_eq!(
            value["Outputs"]["RoleArn"]["Value"],
            json!({ "Fn::GetAtt": ["Role", "Arn"] })
        );
    }

    #[test]
    fn test_empty_outputs_are_omitted() {
        let template = Template::new("empty");
        let value = serde_json::to_value(&template).unwrap();
        assert!(value.get("Outputs").is_none());
    }

    #[test]
    fn test_resources_of_type() {
        let mut template = Template::new("t");
        template.add_resource("A", Resource::new("AWS::IAM::Role", json!({})));
        template.add_resource("B", Resource::new("AWS::S3::Bucket", json!({})));
        template.add_resource("C", Resource::new("AWS::IAM::Role", json!({})));

        let roles: Vec<&str> = template
            .resources_of_type("AWS::IAM::Role")
            .map(|(id, _)| id)
            .collect();
        assert_eq!(roles, vec!["A", "C"]);
    }

    #[test]
    fn test_intrinsics() {
        assert_eq!(reference("X"), json!({ "Ref": "X" }));
        assert_eq!(sub("${X}"), json!({ "Fn::Sub": "${X}" }));
    }

    #[test]
    fn test_escape_sub() {
        assert_eq!(escape_sub("models/bert.tar.gz"), "models/bert.tar.gz");
        assert_eq!(escape_sub("a${B}c${D}"), "a${!B}c${!D}");
        assert_eq!(escape_sub("cost$5"), "cost$5");
    }

    #[test]
    fn test_policy_document() {
        let doc = policy_document(&[Statement::allow(&["s3:GetObject"], vec![json!("*")])]);
        assert_eq!(doc["Statement"][0]["Effect"], "Allow");
        assert_eq!(doc["Statement"][0]["Action"], json!(["s3:GetObject"]));
        assert_eq!(doc["Statement"][0]["Resource"], json!(["*"]));
    }
}
