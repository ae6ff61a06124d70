//! End-to-end tests of the request pipeline against the in-memory driver
//!
//! Each test builds a fresh engine and driver, so backend state changes
//! never leak between tests.

use async_trait::async_trait;
use cimi_bridge::codec::{self, WireFormat};
use cimi_bridge::driver::{Credentials, Driver, MockDriver, OperationSet};
use cimi_bridge::mapper::{MapperRegistry, ResourceMapper};
use cimi_bridge::resource::{self, reference, AttrValue, OutcomeHandler, ResourceInstance};
use cimi_bridge::{CimiError, Context, Engine, EngineSettings};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

const BASE: &str = "http://localhost:3001/cimi";

fn engine() -> Arc<Engine> {
    Arc::new(Engine::standard(EngineSettings::new(BASE).unwrap()))
}

fn context_with(driver: Arc<MockDriver>) -> (Arc<Engine>, Context) {
    let engine = engine();
    let ctx = engine.context(driver, Credentials::new("mockuser", "mockpassword"));
    (engine, ctx)
}

fn operation_rels(instance: &ResourceInstance) -> Vec<String> {
    match instance.get("operations") {
        Some(AttrValue::Records(records)) => records
            .iter()
            .filter_map(|r| r.get("rel").cloned())
            .collect(),
        other => panic!("operations missing or malformed: {other:?}"),
    }
}

mod read_path {
    use super::*;

    #[tokio::test]
    async fn test_show_machine_combines_override_and_template() {
        let (engine, ctx) = context_with(Arc::new(MockDriver::new()));
        let machine = engine.find("Machine", "inst0", &ctx).await.unwrap();

        assert_eq!(machine.id(), Some("http://localhost:3001/cimi/machines/inst0"));
        assert_eq!(machine.text("name"), Some("inst0"));
        assert_eq!(machine.text("description"), Some("Mock Instance With Profile Change"));
        assert_eq!(machine.text("state"), Some("STARTED"));
        assert_eq!(machine.text("cpu"), Some("4"));
        assert_eq!(machine.text("memory"), Some("7864320"));
        assert_eq!(machine.text("created"), Some("2012-05-01T10:30:00Z"));
        assert_eq!(
            machine.href("volumes"),
            Some("http://localhost:3001/cimi/machines/inst0/volumes")
        );
        assert_eq!(
            operation_rels(&machine),
            vec![
                "http://www.dmtf.org/cimi/action/restart",
                "http://www.dmtf.org/cimi/action/stop"
            ]
        );
    }

    #[tokio::test]
    async fn test_opaque_profile_hides_sizing() {
        let (engine, ctx) = context_with(Arc::new(MockDriver::new()));
        let machine = engine.find("Machine", "inst2", &ctx).await.unwrap();

        assert_eq!(machine.text("cpu"), Some("n/a"));
        assert_eq!(machine.text("memory"), Some("n/a"));
    }

    #[tokio::test]
    async fn test_stopped_machine_exposes_destroy() {
        let (engine, ctx) = context_with(Arc::new(MockDriver::new()));
        let machine = engine.find("Machine", "inst1", &ctx).await.unwrap();

        assert_eq!(machine.text("state"), Some("STOPPED"));
        assert_eq!(
            operation_rels(&machine),
            vec![
                "http://www.dmtf.org/cimi/action/start",
                "http://www.dmtf.org/cimi/action/destroy"
            ]
        );
    }

    #[tokio::test]
    async fn test_find_all_machines() {
        let (engine, ctx) = context_with(Arc::new(MockDriver::new()));
        let machines = engine.find_all("Machine", &ctx).await.unwrap();

        let ids: Vec<_> = machines.iter().filter_map(|m| m.backend_id()).collect();
        assert_eq!(ids, vec!["inst0", "inst1", "inst2"]);
    }

    #[tokio::test]
    async fn test_show_falls_back_to_list_without_lookup() {
        let driver = Arc::new(MockDriver::new().without_operations(&["image"]));
        let (engine, ctx) = context_with(Arc::clone(&driver));

        let image = engine.find("MachineImage", "img3", &ctx).await.unwrap();
        assert_eq!(image.backend_id().as_deref(), Some("img3"));
        assert_eq!(driver.calls().await, vec!["images"]);
    }

    #[tokio::test]
    async fn test_missing_resource_is_not_found() {
        let (engine, ctx) = context_with(Arc::new(MockDriver::new()));
        let err = engine.find("Machine", "ghost", &ctx).await.unwrap_err();

        assert_eq!(err, CimiError::not_found("Machine", "ghost"));
        assert_eq!(err.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_resource_type() {
        let (engine, ctx) = context_with(Arc::new(MockDriver::new()));
        let err = engine.find("Toaster", "t1", &ctx).await.unwrap_err();
        assert_eq!(err, CimiError::UnknownResourceType("Toaster".to_string()));
    }

    #[tokio::test]
    async fn test_rendered_machine_in_both_formats() {
        let (engine, ctx) = context_with(Arc::new(MockDriver::new()));
        let machine = engine.find("Machine", "inst0", &ctx).await.unwrap();
        let rendered = engine.render(&machine).unwrap();

        assert_eq!(rendered.names().first(), Some(&"id"));
        assert_eq!(rendered.names().last(), Some(&"property"));

        let json: Value = serde_json::from_str(&codec::render(&rendered, WireFormat::Json).unwrap()).unwrap();
        assert_eq!(json["state"], "STARTED");
        assert_eq!(
            json["networkInterfaces"]["href"],
            "http://localhost:3001/cimi/machines/inst0/network_interfaces"
        );
        assert_eq!(
            json["property"]["credential"],
            "http://localhost:3001/cimi/credentials/test-key"
        );

        let xml = codec::render(&rendered, WireFormat::Xml).unwrap();
        assert!(xml.contains("<Machine"));
        assert!(xml.contains("<state>STARTED</state>"));
        assert!(xml.contains(r#"href="http://localhost:3001/cimi/machines/inst0/disks""#));
    }
}

mod write_path {
    use super::*;

    #[tokio::test]
    async fn test_create_machine_from_json() {
        let driver = Arc::new(MockDriver::new());
        let (engine, ctx) = context_with(Arc::clone(&driver));
        let body = json!({
            "name": "web",
            "machineTemplate": {
                "machineConfig": {"href": format!("{}/machine_configurations/m1-small", BASE)},
                "machineImage": {"href": format!("{}/machine_images/img1", BASE)},
                "credential": {"href": format!("{}/credentials/test-key", BASE)}
            }
        })
        .to_string();

        let machine = engine
            .create("Machine", &body, WireFormat::Json, &ctx)
            .await
            .unwrap();

        assert_eq!(machine.text("description"), Some("web"));
        assert_eq!(machine.text("state"), Some("PENDING"));
        assert_eq!(machine.text("cpu"), Some("1"));
        assert!(driver.calls().await.contains(&"create_instance".to_string()));
    }

    #[tokio::test]
    async fn test_create_machine_from_xml() {
        let (engine, ctx) = context_with(Arc::new(MockDriver::new()));
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<MachineCreate xmlns="http://schemas.dmtf.org/cimi/1">
  <name>xml-vm</name>
  <machineTemplate>
    <machineConfig href="http://localhost:3001/cimi/machine_configurations/m1-large"/>
    <machineImage href="http://localhost:3001/cimi/machine_images/img2"/>
  </machineTemplate>
</MachineCreate>"#;

        let machine = engine
            .create("Machine", body, WireFormat::Xml, &ctx)
            .await
            .unwrap();

        assert_eq!(machine.text("description"), Some("xml-vm"));
        assert_eq!(machine.text("memory"), Some("7864320"));
        let rendered = engine.render(&machine).unwrap();
        assert!(matches!(
            rendered.get("property"),
            Some(AttrValue::Map(map)) if map.get("machine_image").map(String::as_str)
                == Some("http://localhost:3001/cimi/machine_images/img2")
        ));
    }

    #[tokio::test]
    async fn test_create_without_template_never_reaches_backend() {
        let driver = Arc::new(MockDriver::new());
        let (engine, ctx) = context_with(Arc::clone(&driver));
        let body = r#"{"name": "incomplete"}"#;

        let err = engine
            .create("Machine", body, WireFormat::Json, &ctx)
            .await
            .unwrap_err();

        match err {
            CimiError::BadRequest { supplied, derived, .. } => {
                assert_eq!(supplied, body);
                assert!(derived.contains("\"image_id\":null"));
                assert!(derived.contains("\"hwp_id\":null"));
            },
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(driver.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_create_makes_no_backend_call() {
        let driver = Arc::new(MockDriver::new().without_operations(&["create_instance"]));
        let (engine, ctx) = context_with(Arc::clone(&driver));

        let err = engine
            .create("Machine", "{}", WireFormat::Json, &ctx)
            .await
            .unwrap_err();

        assert_eq!(err, CimiError::unsupported("Machine", "create"));
        assert!(driver.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_type_without_write_path_rejects_create() {
        let (engine, ctx) = context_with(Arc::new(MockDriver::new()));
        let err = engine
            .create("Volume", "{}", WireFormat::Json, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, CimiError::UnsupportedOperation { .. }));
    }

    #[tokio::test]
    async fn test_unparsable_body_is_bad_request() {
        let (engine, ctx) = context_with(Arc::new(MockDriver::new()));
        let err = engine
            .create("Machine", "<unclosed>", WireFormat::Json, &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_network_port_by_template() {
        let (engine, ctx) = context_with(Arc::new(MockDriver::new()));
        let body = json!({
            "name": "edge",
            "networkPortTemplate": {"href": format!("{}/network_port_templates/npt1", BASE)}
        })
        .to_string();

        let port = engine
            .create("NetworkPort", &body, WireFormat::Json, &ctx)
            .await
            .unwrap();

        assert_eq!(port.text("name"), Some("edge"));
        assert_eq!(port.text("port_type"), Some("ACCESS"));
        assert_eq!(port.href("network"), Some("http://localhost:3001/cimi/networks/net1"));
        assert_eq!(port.text("state"), Some("STOPPED"));
    }

    #[tokio::test]
    async fn test_template_reference_wins_over_inline_config() {
        let (engine, ctx) = context_with(Arc::new(MockDriver::new()));
        let body = json!({
            "networkPortTemplate": {
                "href": format!("{}/network_port_templates/npt1", BASE),
                "networkPortConfig": {"portType": "TRUNK", "classOfService": "bronze"}
            }
        })
        .to_string();

        let port = engine
            .create("NetworkPort", &body, WireFormat::Json, &ctx)
            .await
            .unwrap();

        assert_eq!(port.text("port_type"), Some("ACCESS"));
        assert_eq!(port.text("class_of_service"), Some("gold"));
    }
}

mod actions {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        successes: usize,
        failures: Vec<String>,
    }

    impl OutcomeHandler for Recorder {
        fn on_success(&mut self) {
            self.successes += 1;
        }

        fn on_failure(&mut self, message: &str) {
            self.failures.push(message.to_string());
        }
    }

    #[tokio::test]
    async fn test_stop_then_destroy() {
        let (engine, ctx) = context_with(Arc::new(MockDriver::new()));

        let outcome = engine.perform("Machine", "inst0", "stop", &ctx).await;
        assert!(outcome.is_success());

        let machine = engine.find("Machine", "inst0", &ctx).await.unwrap();
        assert_eq!(machine.text("state"), Some("STOPPED"));

        engine.delete("Machine", "inst0", &ctx).await.unwrap();
        let err = engine.find("Machine", "inst0", &ctx).await.unwrap_err();
        assert!(matches!(err, CimiError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_restart_by_action_uri() {
        let (engine, ctx) = context_with(Arc::new(MockDriver::new()));
        let mut recorder = Recorder::default();

        engine
            .perform_with(
                "Machine",
                "inst0",
                "http://www.dmtf.org/cimi/action/restart",
                &ctx,
                &mut recorder,
            )
            .await;

        assert_eq!(recorder.successes, 1);
        assert!(recorder.failures.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_action_reports_failure_once() {
        let (engine, ctx) = context_with(Arc::new(MockDriver::new()));
        let mut recorder = Recorder::default();

        engine
            .perform_with("Machine", "inst0", "capture", &ctx, &mut recorder)
            .await;

        assert_eq!(recorder.successes, 0);
        assert_eq!(recorder.failures.len(), 1);
        assert!(recorder.failures[0].contains("not supported"));
    }

    #[tokio::test]
    async fn test_declined_action_is_dispatch_failure() {
        let (engine, ctx) = context_with(Arc::new(MockDriver::new()));
        let err = engine
            .perform("Machine", "inst0", "start", &ctx)
            .await
            .into_result("Machine", "inst0", "start")
            .unwrap_err();

        assert!(matches!(err, CimiError::ActionDispatchFailure { ref action, .. } if action == "start"));
    }

    #[tokio::test]
    async fn test_delete_running_machine_is_declined() {
        let (engine, ctx) = context_with(Arc::new(MockDriver::new()));
        let err = engine.delete("Machine", "inst0", &ctx).await.unwrap_err();
        assert!(matches!(err, CimiError::Backend { ref operation, .. } if operation == "destroy_instance"));
    }

    #[tokio::test]
    async fn test_attach_then_detach_volume() {
        let driver = Arc::new(MockDriver::new());
        let (engine, ctx) = context_with(Arc::clone(&driver));
        let volumes = vec![(format!("{}/volumes/vol2", BASE), "/dev/sdc".to_string())];

        engine.attach_volumes("inst1", &volumes, &ctx).await.unwrap();
        let volume = engine.find("Volume", "vol2", &ctx).await.unwrap();
        assert_eq!(volume.text("state"), Some("IN-USE"));

        engine.detach_volumes("inst1", &volumes, &ctx).await.unwrap();
        let volume = engine.find("Volume", "vol2", &ctx).await.unwrap();
        assert_eq!(volume.text("state"), Some("AVAILABLE"));

        let calls = driver.calls().await;
        assert!(calls.contains(&"attach_storage_volume".to_string()));
        assert!(calls.contains(&"detach_storage_volume".to_string()));
    }
}

mod metadata {
    use super::*;

    #[tokio::test]
    async fn test_describe_all_skips_internal_types() {
        let (engine, ctx) = context_with(Arc::new(MockDriver::new()));
        let names: Vec<_> = engine
            .describe_all(&ctx)
            .into_iter()
            .map(|m| m.name)
            .collect();

        assert_eq!(names.first().map(String::as_str), Some("Machine"));
        assert!(names.contains(&"NetworkPort".to_string()));
        assert!(!names.contains(&"EntityMetadata".to_string()));
    }

    #[tokio::test]
    async fn test_capabilities_follow_driver() {
        let driver = Arc::new(MockDriver::new().without_operations(&["create_instance"]));
        let (engine, ctx) = context_with(driver);
        let described = engine.describe("Machine", &ctx).unwrap();
        let rendered = engine.render(&described).unwrap();

        let Some(AttrValue::Records(capabilities)) = rendered.get("capabilities") else {
            panic!("capabilities missing");
        };
        let names: Vec<_> = capabilities.iter().filter_map(|c| c.get("name")).collect();
        assert!(names.iter().any(|n| n.as_str() == "index"));
        assert!(!names.iter().any(|n| n.as_str() == "create"));
    }

    #[tokio::test]
    async fn test_describe_unknown_type() {
        let (engine, ctx) = context_with(Arc::new(MockDriver::new()));
        let err = engine.describe("Toaster", &ctx).unwrap_err();
        assert_eq!(err, CimiError::UnknownResourceType("Toaster".to_string()));
    }
}

mod resolution {
    use super::*;

    /// Backend whose templates all point back at themselves
    struct LoopingDriver {
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl Driver for LoopingDriver {
        fn name(&self) -> &str {
            "looping"
        }

        fn operations(&self) -> OperationSet {
            ["network_port_templates", "network_port_template"]
                .into_iter()
                .collect()
        }

        async fn invoke(&self, _credentials: &Credentials, _method: &str, params: &Value) -> anyhow::Result<Value> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            let id = params["id"].as_str().unwrap_or("loop");
            Ok(json!({ "id": id, "parent": id }))
        }
    }

    /// Follows `parent` while mapping, like a template whose config is
    /// itself a template
    struct ParentFollowingMapper;

    #[async_trait]
    impl ResourceMapper for ParentFollowingMapper {
        fn resource_type(&self) -> &'static str {
            "NetworkPortTemplate"
        }

        async fn from_backend_object(&self, object: Value, ctx: &Context) -> cimi_bridge::Result<ResourceInstance> {
            let parent = object["parent"].as_str().unwrap_or_default();
            let href = ctx.resource_url("network_port_templates", parent);
            reference::resolve(&href, "network_port_templates", ctx).await
        }
    }

    #[tokio::test]
    async fn test_self_referential_chain_hits_depth_bound() {
        let mut mappers = MapperRegistry::builtin();
        mappers.register(Box::new(ParentFollowingMapper));
        let engine = Arc::new(Engine::new(
            resource::builtin(),
            mappers,
            EngineSettings::new(BASE).unwrap(),
        ));
        let driver = Arc::new(LoopingDriver {
            lookups: AtomicUsize::new(0),
        });
        let ctx = engine
            .context(Arc::clone(&driver) as Arc<dyn Driver>, Credentials::default())
            .with_max_depth(3);

        let err = engine
            .find("NetworkPortTemplate", "loop", &ctx)
            .await
            .unwrap_err();

        assert!(
            matches!(err, CimiError::ReferenceResolution { ref reason, .. } if reason.contains("depth bound of 3"))
        );
        // the initial lookup plus one per permitted level
        assert_eq!(driver.lookups.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_cancelled_request_stops_before_backend() {
        let driver = Arc::new(MockDriver::new());
        let (engine, ctx) = context_with(Arc::clone(&driver));
        let token = CancellationToken::new();
        let ctx = ctx.with_cancellation(token.clone());
        token.cancel();

        let err = engine.find("Machine", "inst0", &ctx).await.unwrap_err();
        assert_eq!(err, CimiError::Cancelled);
        assert!(driver.calls().await.is_empty());
    }

    /// Backend whose network lookups never finish on their own
    struct StalledDriver {
        entered: Notify,
    }

    #[async_trait]
    impl Driver for StalledDriver {
        fn name(&self) -> &str {
            "stalled"
        }

        fn operations(&self) -> OperationSet {
            ["networks", "network"].into_iter().collect()
        }

        async fn invoke(&self, _credentials: &Credentials, _method: &str, params: &Value) -> anyhow::Result<Value> {
            self.entered.notify_one();
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(json!({ "id": params["id"].clone() }))
        }
    }

    fn stalled_context() -> (Arc<Engine>, Arc<StalledDriver>, Context) {
        let engine = engine();
        let driver = Arc::new(StalledDriver { entered: Notify::new() });
        let ctx = engine.context(Arc::clone(&driver) as Arc<dyn Driver>, Credentials::default());
        (engine, driver, ctx)
    }

    #[tokio::test]
    async fn test_cancel_aborts_resolution_in_flight() {
        let (_engine, driver, ctx) = stalled_context();
        let token = CancellationToken::new();
        let ctx = ctx.with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            driver.entered.notified().await;
            token.cancel();
        });

        let href = format!("{}/networks/net1", BASE);
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            reference::resolve(&href, "networks", &ctx),
        )
        .await
        .expect("cancellation should end the lookup");

        assert_eq!(result.unwrap_err(), CimiError::Cancelled);
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_deadline_ends_backend_call() {
        let (engine, _driver, ctx) = stalled_context();
        let ctx = ctx.with_timeout(Duration::from_millis(50));

        let err = tokio::time::timeout(Duration::from_secs(5), engine.find("Network", "net1", &ctx))
            .await
            .expect("deadline should end the lookup")
            .unwrap_err();

        assert_eq!(
            err,
            CimiError::Timeout {
                operation: "network".to_string()
            }
        );
        assert_eq!(err.status(), reqwest::StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_malformed_volume_reference() {
        let (engine, ctx) = context_with(Arc::new(MockDriver::new()));
        let volumes = vec![("vol2".to_string(), "/dev/sdc".to_string())];

        let err = engine.attach_volumes("inst1", &volumes, &ctx).await.unwrap_err();
        assert!(matches!(err, CimiError::MalformedReference { .. }));
    }
}
