//! Property-based tests using proptest
//!
//! These tests verify schema rendering, reference parsing and the
//! vocabulary translation of the read path using randomized inputs.

use cimi_bridge::codec::{self, WireFormat};
use cimi_bridge::driver::{Credentials, MockDriver};
use cimi_bridge::mapper::{MachineMapper, ResourceMapper};
use cimi_bridge::resource::{self, reference, AttrValue, ResourceInstance, ResourceReference};
use cimi_bridge::{CimiError, Context, Engine, EngineSettings};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;

const ACTION_PREFIX: &str = "http://www.dmtf.org/cimi/action/";

fn context_with(driver: Arc<MockDriver>) -> Context {
    let engine = Arc::new(Engine::standard(
        EngineSettings::new("http://localhost:3001/cimi").unwrap(),
    ));
    engine.context(driver, Credentials::default())
}

/// Instance with an opaque profile, so mapping needs no backend lookups
fn opaque_instance(id: &str, state: &str, image_id: &str, actions: &[String]) -> Value {
    json!({
        "id": id,
        "state": state,
        "image_id": image_id,
        "instance_profile": { "id": "opaque" },
        "actions": actions
    })
}

fn map_machine(object: Value) -> ResourceInstance {
    let ctx = context_with(Arc::new(MockDriver::new()));
    tokio_test::block_on(MachineMapper.from_backend_object(object, &ctx)).expect("mapping should succeed")
}

/// Generate a backend identifier, including characters that need escaping
fn arb_identifier() -> impl Strategy<Value = String> {
    "[A-Za-z0-9][A-Za-z0-9 ._~%:-]{0,24}"
}

/// Generate a string that cannot be a reference
fn arb_malformed_href() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        "[^/]{1,40}",
        "[a-z:/.]{0,30}/",
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Rendering keeps declaration order and passes values through unchanged
    #[test]
    fn test_render_follows_declaration_order(type_index in 0usize..64, mask in prop::collection::vec(any::<bool>(), 32)) {
        let registry = resource::builtin();
        let defs: Vec<_> = registry.resource_types().collect();
        let def = defs[type_index % defs.len()];

        let mut instance = ResourceInstance::new(def.name.clone());
        let mut expected = Vec::new();
        for (i, decl) in def.attributes.iter().enumerate() {
            if decl.required || mask[i % mask.len()] {
                instance.set_text(decl.name.clone(), format!("value-{}", i));
                expected.push((decl.name.clone(), AttrValue::Text(format!("value-{}", i))));
            }
        }
        instance.set_text("not_declared_anywhere", "dropped");

        let rendered = registry.render(&instance).unwrap();
        prop_assert_eq!(rendered.attributes, expected);
    }

    /// A missing required attribute is named exactly
    #[test]
    fn test_render_names_missing_required_attribute(type_index in 0usize..64, pick in 0usize..16) {
        let registry = resource::builtin();
        let defs: Vec<_> = registry.resource_types().collect();
        let def = defs[type_index % defs.len()];
        let required: Vec<_> = def.attributes.iter().filter(|d| d.required).collect();
        prop_assume!(!required.is_empty());
        let missing = &required[pick % required.len()].name;

        let mut instance = ResourceInstance::new(def.name.clone());
        for decl in def.attributes.iter().filter(|d| &d.name != missing) {
            instance.set_text(decl.name.clone(), "x");
        }

        let err = registry.render(&instance).unwrap_err();
        prop_assert_eq!(err, CimiError::MissingRequiredAttribute {
            resource_type: def.name.clone(),
            attribute: missing.clone(),
        });
    }

    /// Malformed references fail before the backend is called
    #[test]
    fn test_malformed_reference_never_reaches_backend(href in arb_malformed_href()) {
        let driver = Arc::new(MockDriver::new());
        let ctx = context_with(Arc::clone(&driver));

        let result = tokio_test::block_on(reference::resolve(&href, "machines", &ctx));
        let calls = tokio_test::block_on(driver.calls());

        prop_assert!(
            matches!(result, Err(CimiError::MalformedReference { .. })),
            "unexpected result: {:?}",
            result
        );
        prop_assert!(calls.is_empty());
    }

    /// RUNNING maps to STARTED; anything else passes through
    #[test]
    fn test_state_mapping(state in prop_oneof![Just("RUNNING".to_string()), "\\PC{0,12}"]) {
        let machine = map_machine(opaque_instance("vm", &state, "img1", &[]));
        let expected = if state == "RUNNING" { "STARTED" } else { state.as_str() };
        prop_assert_eq!(machine.text("state"), Some(expected));
    }

    /// Backend actions come out in CIMI vocabulary, one descriptor each
    #[test]
    fn test_action_descriptors_use_standard_vocabulary(
        actions in Just(vec!["delete".to_string(), "reboot".to_string()]).prop_shuffle()
    ) {
        let machine = map_machine(opaque_instance("vm", "STOPPED", "img1", &actions));
        let Some(AttrValue::Records(records)) = machine.get("operations") else {
            panic!("operations missing");
        };

        let mut rels: Vec<_> = records.iter().filter_map(|r| r.get("rel").cloned()).collect();
        rels.sort();
        prop_assert_eq!(
            rels,
            vec![format!("{}destroy", ACTION_PREFIX), format!("{}restart", ACTION_PREFIX)]
        );
    }

    /// Links in the rendered output lead back to the backend identifiers
    #[test]
    fn test_rendered_links_round_trip(id in arb_identifier(), image_id in arb_identifier()) {
        let registry = resource::builtin();
        let machine = map_machine(opaque_instance(&id, "RUNNING", &image_id, &[]));
        let rendered = registry.render(&machine).unwrap();
        let body = codec::render(&rendered, WireFormat::Json).unwrap();
        let json: Value = serde_json::from_str(&body).unwrap();

        let self_href = json["id"].as_str().unwrap();
        prop_assert_eq!(ResourceReference::trailing_segment(self_href).unwrap(), id.clone());

        let disks = json["disks"]["href"].as_str().unwrap();
        let owner = disks.strip_suffix("/disks").unwrap();
        prop_assert_eq!(ResourceReference::trailing_segment(owner).unwrap(), id);

        let image_href = json["property"]["machine_image"].as_str().unwrap();
        prop_assert_eq!(ResourceReference::trailing_segment(image_href).unwrap(), image_id);
    }
}
