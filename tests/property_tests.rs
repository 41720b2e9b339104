//! Property-based tests using proptest
//!
//! These tests check resolution and composition invariants across randomized
//! regions, model names and gateway settings.

mod common;

use hf_endpoint_stack::compose::{ENDPOINT, ROUTE_POST, invocation_path};
use hf_endpoint_stack::config::{DeployConfig, PermissionScope};
use hf_endpoint_stack::{ConfigurationError, RegionTable, StackComposer, compose, synth};
use proptest::prelude::*;

// =============================================================================
// Strategies
// =============================================================================

fn arb_builtin_region() -> impl Strategy<Value = String> {
    let regions: Vec<String> = RegionTable::builtin()
        .entries()
        .map(|(region, _)| region.to_string())
        .collect();
    prop::sample::select(regions)
}

/// Model ids like "distilbert-base-uncased" or "org/model-name"
fn arb_model_name() -> impl Strategy<Value = String> {
    (
        prop::option::of("[a-z][a-z0-9-]{0,15}"),
        "[a-z][a-z0-9.-]{0,40}[a-z0-9]",
    )
        .prop_map(|(org, name)| match org {
            Some(org) => format!("{}/{}", org, name),
            None => name,
        })
}

fn arb_endpoint_name() -> impl Strategy<Value = String> {
    // Names equal to a fixed path segment would be counted twice
    "[A-Za-z][A-Za-z0-9-]{0,40}[A-Za-z0-9]"
        .prop_filter("collides with a fixed path segment", |name| {
            name != "endpoints" && name != "invocations"
        })
}

fn arb_config() -> impl Strategy<Value = DeployConfig> {
    (
        arb_builtin_region(),
        arb_model_name(),
        arb_endpoint_name(),
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(
            |(region, model_name, endpoint_name, gateway, cors, least_privilege)| {
                let mut config = common::sst2_config();
                config.region = region;
                config.model.name = model_name;
                config.endpoint.name = endpoint_name;
                config.gateway.enabled = gateway;
                config.gateway.cors = cors;
                config.permission_scope = if least_privilege {
                    PermissionScope::LeastPrivilege
                } else {
                    PermissionScope::Managed
                };
                config
            },
        )
}

// =============================================================================
// Region Resolution
// =============================================================================

proptest! {
    /// Every region in the table resolves to a non-empty account
    #[test]
    fn builtin_regions_resolve(region in arb_builtin_region()) {
        let table = RegionTable::builtin();
        let account = table.resolve(&region).unwrap();
        prop_assert!(!account.is_empty());
    }

    /// Regions outside the table fail with UnknownRegion
    #[test]
    fn absent_regions_fail(region in "[a-z]{2}-[a-z]{4,9}-[0-9]") {
        let table = RegionTable::builtin();
        prop_assume!(!table.contains(&region));
        prop_assert_eq!(
            table.resolve(&region),
            Err(ConfigurationError::UnknownRegion { region: region.clone() })
        );
    }

    /// Overrides are visible and leave other entries intact
    #[test]
    fn overrides_take_effect(region in "xx-[a-z]{4,8}-[0-9]", account in "[0-9]{12}") {
        let table = RegionTable::builtin().with_overrides([(region.clone(), account.clone())]);
        prop_assert_eq!(table.resolve(&region).unwrap(), account.as_str());
        prop_assert_eq!(table.len(), RegionTable::builtin().len() + 1);
    }
}

// =============================================================================
// Composition Invariants
// =============================================================================

proptest! {
    /// Composing the same configuration twice renders identical JSON
    #[test]
    fn composition_is_deterministic(config in arb_config()) {
        let first = synth::render_template(&compose(&config).unwrap()).unwrap();
        let second = synth::render_template(&compose(&config).unwrap()).unwrap();
        prop_assert_eq!(first, second);
    }

    /// The gateway is all-or-nothing
    #[test]
    fn gateway_flag_controls_gateway_resources(config in arb_config()) {
        let stack = compose(&config).unwrap();
        let has_api = stack
            .template
            .resources
            .values()
            .any(|r| r.resource_type.starts_with("AWS::ApiGateway::"));
        let rendered = synth::render_template(&stack).unwrap();

        prop_assert_eq!(has_api, config.gateway.enabled);
        prop_assert_eq!(rendered.contains("sagemaker:InvokeEndpoint"), config.gateway.enabled);
    }

    /// The integration path has exactly one segment equal to the endpoint name
    #[test]
    fn integration_path_names_endpoint_once(mut config in arb_config()) {
        config.gateway.enabled = true;
        let stack = compose(&config).unwrap();

        let uri = stack.template.resource(ROUTE_POST).unwrap().properties["Integration"]["Uri"]
            ["Fn::Sub"]
            .as_str()
            .unwrap()
            .to_string();
        let expected = invocation_path(&config.endpoint.name);
        let suffix = format!(":path/{}", expected);
        prop_assert!(uri.ends_with(&suffix), "uri {} does not end with {}", uri, suffix);

        // Whole segments only: the name may also occur inside "endpoints" or "invocations"
        let path = uri.split(":path/").nth(1).unwrap();
        let segments = path.split('/').filter(|s| *s == config.endpoint.name).count();
        prop_assert_eq!(segments, 1);

        let endpoint = &stack.template.resource(ENDPOINT).unwrap().properties;
        prop_assert_eq!(endpoint["EndpointName"].as_str().unwrap(), config.endpoint.name.as_str());
    }

    /// The artifact key always derives from the model name
    #[test]
    fn artifact_key_follows_model_name(config in arb_config()) {
        let stack = compose(&config).unwrap();
        prop_assert_eq!(stack.summary.artifact_key, format!("{}.tar.gz", config.model.name));
    }

    /// An unknown region fails regardless of other settings
    #[test]
    fn unknown_region_always_fails(mut config in arb_config()) {
        config.region = "xx-unknown-1".to_string();
        let table = config.region_table();
        let result = StackComposer::new(&config, &table).compose();
        prop_assert!(
            matches!(result, Err(ConfigurationError::UnknownRegion { .. })),
            "expected UnknownRegion, got {:?}",
            result
        );
    }
}

// =============================================================================
// Config Serialization
// =============================================================================

proptest! {
    /// DeployConfig serializes to TOML and deserializes back to an equal value
    #[test]
    fn deploy_config_roundtrip(config in arb_config()) {
        let toml_str = toml::to_string(&config).expect("Failed to serialize to TOML");
        let parsed: DeployConfig = toml::from_str(&toml_str).expect("Failed to parse TOML");
        prop_assert_eq!(config, parsed);
    }
}
