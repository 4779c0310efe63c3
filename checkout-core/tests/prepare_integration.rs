//! Preparation tests: binding, isolation of failures, shared expansion

mod common;

use checkout_core::config::{
    ComparisonSlot, DeviceConfiguration, Ping, PvConfiguration, Tool, ToolConfiguration,
};
use checkout_core::dynamic::DynamicValue;
use checkout_core::prepare::BoundSource;
use checkout_core::{
    prepare, Comparison, ConfigurationFile, ConfigurationGroup, GroupMode, Identifier, NodeState, PrepareError,
    Severity,
};
use common::{ping_output, StubNamespace, StubSignal, StubTool};

fn file_with(config: impl Into<checkout_core::Configuration>) -> ConfigurationFile {
    ConfigurationFile::new(ConfigurationGroup::new("root", GroupMode::All).with_config(config))
}

#[test]
fn missing_device_only_fails_its_own_comparisons() {
    let namespace = StubNamespace::new().attribute("m1", "readback", StubSignal::constant("m1.readback", 5));
    let config = DeviceConfiguration::new("motors", ["m1", "m2"]).with_attr("readback", vec![Comparison::equals(5)]);
    let prepared = prepare(&file_with(config), &namespace).unwrap();

    let comparisons: Vec<_> = prepared.walk_comparisons().collect();
    assert_eq!(comparisons.len(), 2);

    let m1 = comparisons.iter().find(|pc| pc.identifier == Identifier::attribute("m1", "readback")).unwrap();
    assert!(matches!(m1.source, BoundSource::Signal(_)));
    assert_eq!(m1.state(), NodeState::Incomplete);

    let m2 = comparisons.iter().find(|pc| pc.identifier == Identifier::attribute("m2", "readback")).unwrap();
    assert_eq!(m2.state(), NodeState::InternalError);
    assert_eq!(m2.result().severity, Severity::InternalError);
    assert!(m2.result().reason[0].contains("device m2 not found"));
}

#[test]
fn missing_attribute_leaves_siblings_bound() {
    let namespace = StubNamespace::new().attribute("m1", "readback", StubSignal::constant("m1.readback", 5));
    let config = DeviceConfiguration::new("motors", ["m1"])
        .with_attr("readback", vec![Comparison::equals(5)])
        .with_attr("velocity", vec![Comparison::equals(1)]);
    let prepared = prepare(&file_with(config), &namespace).unwrap();

    let states: Vec<_> = prepared.walk_comparisons().map(|pc| (pc.identifier.canonical(), pc.state())).collect();
    assert_eq!(
        states,
        vec![
            ("m1.readback".to_string(), NodeState::Incomplete),
            ("m1.velocity".to_string(), NodeState::InternalError),
        ]
    );
}

#[test]
fn invalid_device_is_reported_as_invalid() {
    let namespace = StubNamespace::new().invalid("broken");
    let config = DeviceConfiguration::new("motors", ["broken"]).with_attr("readback", vec![Comparison::equals(5)]);
    let prepared = prepare(&file_with(config), &namespace).unwrap();
    let pc = prepared.walk_comparisons().next().unwrap();
    assert!(pc.result().reason[0].contains("broken is invalid"));
}

#[test]
fn shared_comparisons_run_once_per_device() {
    let mut namespace = StubNamespace::new();
    for device in ["m1", "m2", "m3"] {
        namespace = namespace.attribute(device, "readback", StubSignal::constant(device, 1));
    }
    let shared = Comparison::equals(1);
    let shared_id = shared.id;
    let config = DeviceConfiguration::new("motors", ["m1", "m2", "m3"])
        .with_attr("readback", vec![])
        .with_shared(vec![shared]);
    let prepared = prepare(&file_with(config), &namespace).unwrap();

    let expanded: Vec<_> = prepared.comparisons_for(shared_id).collect();
    assert_eq!(expanded.len(), 3);
    assert!(expanded.iter().all(|pc| pc.slot == ComparisonSlot::Shared));
}

#[test]
fn shared_without_identifiers_is_vacuous() {
    let config = PvConfiguration::new("empty").with_shared(vec![Comparison::equals(1)]);
    let prepared = prepare(&file_with(config), &StubNamespace::new()).unwrap();
    assert_eq!(prepared.walk_comparisons().count(), 0);
    assert_eq!(prepared.walk_configurations().count(), 1);
}

#[test]
fn same_node_twice_is_rejected() {
    let leaf = PvConfiguration::new("leaf").with_pv("SIM:PV1", vec![Comparison::equals(1)]);
    let root = ConfigurationGroup::new("root", GroupMode::All).with_config(leaf.clone()).with_config(leaf);
    let err = prepare(&ConfigurationFile::new(root), &StubNamespace::new()).unwrap_err();
    assert!(matches!(err, PrepareError::DuplicateNode { .. }));
}

#[test]
fn duplicated_nodes_are_accepted() {
    let leaf = PvConfiguration::new("leaf").with_pv("SIM:PV1", vec![Comparison::equals(1)]);
    let copy = PvConfiguration {
        info: checkout_core::config::ConfigInfo::named("copy"),
        by_pv: leaf
            .by_pv
            .iter()
            .map(|(k, v)| (k.clone(), v.iter().map(Comparison::duplicate).collect()))
            .collect(),
        shared: Vec::new(),
    };
    let root = ConfigurationGroup::new("root", GroupMode::All).with_config(leaf).with_config(copy);
    assert!(prepare(&ConfigurationFile::new(root), &StubNamespace::new()).is_ok());
}

#[test]
fn unknown_tool_key_fails_only_that_key() {
    let namespace = StubNamespace::new().tool(StubTool::new(Ok(ping_output(&["h1"], &[]))));
    let config = ToolConfiguration::new("ping", Tool::Ping(Ping::new(["h1"])))
        .with_key("num_alive", vec![Comparison::equals(1)])
        .with_key("bogus", vec![Comparison::equals(1)]);
    let prepared = prepare(&file_with(config), &namespace).unwrap();

    let by_key: Vec<_> = prepared.walk_comparisons().map(|pc| (pc.identifier.canonical(), pc.state())).collect();
    assert!(by_key.contains(&("ping:num_alive".to_string(), NodeState::Incomplete)));
    assert!(by_key.contains(&("ping:bogus".to_string(), NodeState::InternalError)));
}

#[test]
fn tool_shared_comparisons_cover_every_key_when_none_listed() {
    let output = ping_output(&["h1"], &["h2"]);
    let key_count = output.len();
    let namespace = StubNamespace::new().tool(StubTool::new(Ok(output)));
    let config = ToolConfiguration::new("ping", Tool::Ping(Ping::new(["h1", "h2"])))
        .with_shared(vec![Comparison::value_set([1, 2])]);
    let prepared = prepare(&file_with(config), &namespace).unwrap();
    assert_eq!(prepared.walk_comparisons().count(), key_count);
}

#[test]
fn unresolved_tool_unbinds_every_key() {
    let config = ToolConfiguration::new("ping", Tool::Ping(Ping::new(["h1"])))
        .with_key("num_alive", vec![Comparison::equals(1)]);
    let prepared = prepare(&file_with(config), &StubNamespace::new()).unwrap();
    let pc = prepared.walk_comparisons().next().unwrap();
    assert!(pc.result().reason[0].contains("not supported"));
}

#[test]
fn unresolvable_dynamic_target_unbinds_comparison() {
    let namespace = StubNamespace::new().point(StubSignal::constant("SIM:PV1", 5));
    let check = Comparison::equals(0).with_dynamic_target(DynamicValue::point("SIM:MISSING"));
    let config = PvConfiguration::new("pvs").with_pv("SIM:PV1", vec![check]);
    let prepared = prepare(&file_with(config), &namespace).unwrap();
    let pc = prepared.walk_comparisons().next().unwrap();
    assert_eq!(pc.state(), NodeState::InternalError);
    assert!(pc.result().reason[0].contains("SIM:MISSING"));
}

#[test]
fn walks_are_restartable() {
    let namespace = StubNamespace::new().point(StubSignal::constant("A", 1));
    let inner = ConfigurationGroup::new("inner", GroupMode::Any)
        .with_config(PvConfiguration::new("a").with_pv("A", vec![Comparison::equals(1)]));
    let root = ConfigurationGroup::new("root", GroupMode::All)
        .with_config(inner)
        .with_config(PvConfiguration::new("b").with_pv("A", vec![Comparison::equals(1), Comparison::equals(2)]));
    let prepared = prepare(&ConfigurationFile::new(root), &namespace).unwrap();

    let names: Vec<_> = prepared.walk_groups().map(|g| g.name.clone()).collect();
    assert_eq!(names, vec!["root".to_string(), "inner".to_string()]);
    assert_eq!(prepared.walk_comparisons().count(), 3);
    assert_eq!(prepared.walk_comparisons().count(), 3);
    let leaves: Vec<_> = prepared.walk_configurations().map(|c| c.name.as_str()).collect();
    assert_eq!(leaves, vec!["a", "b"]);
}
