//! Declarative configuration tree
//!
//! A [`ConfigurationFile`] holds one root [`ConfigurationGroup`]. Groups nest
//! further configurations; leaves map identifiers (device attributes, point
//! names, tool result keys) to ordered comparison lists, plus a `shared`
//! list applied to every identifier of the leaf.
//!
//! Comparisons are located by [`NodeId`] through [`IdentifierTable`], so two
//! comparisons with identical settings are still distinct nodes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::comparison::Comparison;
use crate::identifier::NodeId;
use crate::result::GroupMode;

/// Comparison lists keyed by identifier
pub type ComparisonTable = BTreeMap<String, Vec<Comparison>>;

/// Metadata common to every configuration node
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfigInfo {
    /// Identity within the declarative tree
    #[serde(skip, default = "NodeId::fresh")]
    pub id: NodeId,
    /// Short name
    #[serde(default)]
    pub name: String,
    /// Free text
    #[serde(default)]
    pub description: String,
    /// Free-form labels
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl ConfigInfo {
    /// Metadata with a fresh id
    pub fn named(name: impl Into<String>) -> Self {
        Self { id: NodeId::fresh(), name: name.into(), ..Self::default() }
    }
}

/// Where a comparison sits inside a leaf configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ComparisonSlot {
    /// Under one identifier
    Identifier(String),
    /// In the `shared` list
    Shared,
}

impl fmt::Display for ComparisonSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identifier(name) => f.write_str(name),
            Self::Shared => f.write_str("shared"),
        }
    }
}

/// Identity-based editing of a leaf's comparison lists
pub trait IdentifierTable {
    /// Per-identifier comparisons
    fn table(&self) -> &ComparisonTable;

    /// Per-identifier comparisons, mutable
    fn table_mut(&mut self) -> &mut ComparisonTable;

    /// Comparisons applied to every identifier
    fn shared(&self) -> &[Comparison];

    /// Comparisons applied to every identifier, mutable
    fn shared_mut(&mut self) -> &mut Vec<Comparison>;

    /// Remove an identifier, moving its comparisons to the end of `shared`
    fn remove_identifier(&mut self, identifier: &str) -> bool {
        match self.table_mut().remove(identifier) {
            Some(comparisons) => {
                self.shared_mut().extend(comparisons);
                true
            }
            None => false,
        }
    }

    /// Slot and index of the comparison with this id
    fn comparison_location(&self, id: NodeId) -> Option<(ComparisonSlot, usize)> {
        if let Some(index) = self.shared().iter().position(|c| c.id == id) {
            return Some((ComparisonSlot::Shared, index));
        }
        self.table().iter().find_map(|(name, comparisons)| {
            comparisons
                .iter()
                .position(|c| c.id == id)
                .map(|index| (ComparisonSlot::Identifier(name.clone()), index))
        })
    }

    /// Comparison with this id
    fn find_comparison(&self, id: NodeId) -> Option<&Comparison> {
        let (slot, index) = self.comparison_location(id)?;
        match slot {
            ComparisonSlot::Shared => self.shared().get(index),
            ComparisonSlot::Identifier(name) => self.table().get(&name)?.get(index),
        }
    }

    /// Append a comparison to a slot, creating the identifier entry if needed
    fn add_comparison(&mut self, slot: ComparisonSlot, comparison: Comparison) {
        match slot {
            ComparisonSlot::Shared => self.shared_mut().push(comparison),
            ComparisonSlot::Identifier(name) => self.table_mut().entry(name).or_default().push(comparison),
        }
    }

    /// Detach the comparison with this id
    fn take_comparison(&mut self, id: NodeId) -> Option<Comparison> {
        let (slot, index) = self.comparison_location(id)?;
        match slot {
            ComparisonSlot::Shared => Some(self.shared_mut().remove(index)),
            ComparisonSlot::Identifier(name) => {
                let list = self.table_mut().get_mut(&name)?;
                Some(list.remove(index))
            }
        }
    }

    /// Move the comparison with this id to the end of another slot
    fn move_comparison(&mut self, id: NodeId, to: ComparisonSlot) -> bool {
        match self.take_comparison(id) {
            Some(comparison) => {
                self.add_comparison(to, comparison);
                true
            }
            None => false,
        }
    }
}

macro_rules! impl_identifier_table {
    ($ty:ty, $field:ident) => {
        impl IdentifierTable for $ty {
            fn table(&self) -> &ComparisonTable {
                &self.$field
            }

            fn table_mut(&mut self) -> &mut ComparisonTable {
                &mut self.$field
            }

            fn shared(&self) -> &[Comparison] {
                &self.shared
            }

            fn shared_mut(&mut self) -> &mut Vec<Comparison> {
                &mut self.shared
            }
        }
    };
}

/// Comparisons against attributes of named devices
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceConfiguration {
    /// Node metadata
    #[serde(flatten)]
    pub info: ConfigInfo,
    /// Device names resolved through the naming service
    #[serde(default)]
    pub devices: Vec<String>,
    /// Attribute path to comparisons, applied on every device
    #[serde(default)]
    pub by_attr: ComparisonTable,
    /// Applied to every (device, attribute) pair
    #[serde(default)]
    pub shared: Vec<Comparison>,
}

impl DeviceConfiguration {
    /// Empty configuration over the given devices
    pub fn new<I, S>(name: impl Into<String>, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            info: ConfigInfo::named(name),
            devices: devices.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Add comparisons for an attribute
    pub fn with_attr(mut self, attribute: impl Into<String>, comparisons: Vec<Comparison>) -> Self {
        self.by_attr.entry(attribute.into()).or_default().extend(comparisons);
        self
    }

    /// Add shared comparisons
    pub fn with_shared(mut self, comparisons: Vec<Comparison>) -> Self {
        self.shared.extend(comparisons);
        self
    }
}

impl_identifier_table!(DeviceConfiguration, by_attr);

/// Comparisons against raw points
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PvConfiguration {
    /// Node metadata
    #[serde(flatten)]
    pub info: ConfigInfo,
    /// Point name to comparisons
    #[serde(default)]
    pub by_pv: ComparisonTable,
    /// Applied to every point
    #[serde(default)]
    pub shared: Vec<Comparison>,
}

impl PvConfiguration {
    /// Empty configuration
    pub fn new(name: impl Into<String>) -> Self {
        Self { info: ConfigInfo::named(name), ..Self::default() }
    }

    /// Add comparisons for a point
    pub fn with_pv(mut self, pvname: impl Into<String>, comparisons: Vec<Comparison>) -> Self {
        self.by_pv.entry(pvname.into()).or_default().extend(comparisons);
        self
    }

    /// Add shared comparisons
    pub fn with_shared(mut self, comparisons: Vec<Comparison>) -> Self {
        self.shared.extend(comparisons);
        self
    }
}

impl_identifier_table!(PvConfiguration, by_pv);

/// Network reachability probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    /// Hosts to probe
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Echo requests per host
    #[serde(default = "Ping::default_count")]
    pub count: u32,
    /// Encoding of the ping binary's output
    #[serde(default = "Ping::default_encoding")]
    pub encoding: String,
}

impl Ping {
    /// Result keys that do not depend on the host list
    pub const FIXED_KEYS: [&'static str; 6] =
        ["alive", "num_alive", "unresponsive", "num_unresponsive", "min_time", "max_time"];

    /// Prefix of the per-host round-trip keys
    pub const TIMES_PREFIX: &'static str = "times.";

    fn default_count() -> u32 {
        3
    }

    fn default_encoding() -> String {
        "utf-8".to_string()
    }

    /// Probe with default settings
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hosts: hosts.into_iter().map(Into::into).collect(),
            count: Self::default_count(),
            encoding: Self::default_encoding(),
        }
    }

    /// Every key a run produces
    pub fn result_keys(&self) -> Vec<String> {
        Self::FIXED_KEYS
            .iter()
            .map(|k| (*k).to_string())
            .chain(self.hosts.iter().map(|h| format!("{}{h}", Self::TIMES_PREFIX)))
            .collect()
    }
}

/// External procedure whose named results are checked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Tool {
    /// Reachability probe
    Ping(Ping),
}

impl Tool {
    /// Tool name used for resolution and identifiers
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ping(_) => "ping",
        }
    }

    /// Every key a run produces
    pub fn result_keys(&self) -> Vec<String> {
        match self {
            Self::Ping(ping) => ping.result_keys(),
        }
    }
}

/// Comparisons against a tool's result keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfiguration {
    /// Node metadata
    #[serde(flatten)]
    pub info: ConfigInfo,
    /// Procedure to run
    pub tool: Tool,
    /// Result key to comparisons
    #[serde(default, alias = "by_attr")]
    pub by_key: ComparisonTable,
    /// Applied to every listed key, or every result key when none are listed
    #[serde(default)]
    pub shared: Vec<Comparison>,
}

impl ToolConfiguration {
    /// Empty configuration for a tool
    pub fn new(name: impl Into<String>, tool: Tool) -> Self {
        Self {
            info: ConfigInfo::named(name),
            tool,
            by_key: ComparisonTable::new(),
            shared: Vec::new(),
        }
    }

    /// Add comparisons for a result key
    pub fn with_key(mut self, key: impl Into<String>, comparisons: Vec<Comparison>) -> Self {
        self.by_key.entry(key.into()).or_default().extend(comparisons);
        self
    }

    /// Add shared comparisons
    pub fn with_shared(mut self, comparisons: Vec<Comparison>) -> Self {
        self.shared.extend(comparisons);
        self
    }
}

impl_identifier_table!(ToolConfiguration, by_key);

/// Nested configurations combined under a mode
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfigurationGroup {
    /// Node metadata
    #[serde(flatten)]
    pub info: ConfigInfo,
    /// Children, in order
    #[serde(default)]
    pub configs: Vec<Configuration>,
    /// Aggregation mode
    #[serde(default)]
    pub mode: GroupMode,
}

impl ConfigurationGroup {
    /// Empty group
    pub fn new(name: impl Into<String>, mode: GroupMode) -> Self {
        Self { info: ConfigInfo::named(name), configs: Vec::new(), mode }
    }

    /// Append a child
    pub fn with_config(mut self, config: impl Into<Configuration>) -> Self {
        self.configs.push(config.into());
        self
    }
}

/// Any node of the declarative tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Configuration {
    /// Device attributes
    DeviceConfiguration(DeviceConfiguration),
    /// Raw points
    #[serde(rename = "PVConfiguration")]
    PvConfiguration(PvConfiguration),
    /// Tool results
    ToolConfiguration(ToolConfiguration),
    /// Nested group
    ConfigurationGroup(ConfigurationGroup),
}

impl From<DeviceConfiguration> for Configuration {
    fn from(c: DeviceConfiguration) -> Self {
        Self::DeviceConfiguration(c)
    }
}

impl From<PvConfiguration> for Configuration {
    fn from(c: PvConfiguration) -> Self {
        Self::PvConfiguration(c)
    }
}

impl From<ToolConfiguration> for Configuration {
    fn from(c: ToolConfiguration) -> Self {
        Self::ToolConfiguration(c)
    }
}

impl From<ConfigurationGroup> for Configuration {
    fn from(c: ConfigurationGroup) -> Self {
        Self::ConfigurationGroup(c)
    }
}

impl Configuration {
    /// Node metadata
    pub fn info(&self) -> &ConfigInfo {
        match self {
            Self::DeviceConfiguration(c) => &c.info,
            Self::PvConfiguration(c) => &c.info,
            Self::ToolConfiguration(c) => &c.info,
            Self::ConfigurationGroup(c) => &c.info,
        }
    }

    /// Node identity
    pub fn id(&self) -> NodeId {
        self.info().id
    }

    /// Node name
    pub fn name(&self) -> &str {
        &self.info().name
    }

    /// Identifier table of a leaf; `None` for groups
    pub fn table(&self) -> Option<&dyn IdentifierTable> {
        match self {
            Self::DeviceConfiguration(c) => Some(c),
            Self::PvConfiguration(c) => Some(c),
            Self::ToolConfiguration(c) => Some(c),
            Self::ConfigurationGroup(_) => None,
        }
    }

    /// Mutable identifier table of a leaf; `None` for groups
    pub fn table_mut(&mut self) -> Option<&mut dyn IdentifierTable> {
        match self {
            Self::DeviceConfiguration(c) => Some(c),
            Self::PvConfiguration(c) => Some(c),
            Self::ToolConfiguration(c) => Some(c),
            Self::ConfigurationGroup(_) => None,
        }
    }

    /// Ids of every node in this subtree, with names, in depth-first order
    pub fn node_ids(&self) -> Vec<(NodeId, String)> {
        let mut out = Vec::new();
        self.collect_ids(&mut out);
        out
    }

    fn collect_ids(&self, out: &mut Vec<(NodeId, String)>) {
        out.push((self.id(), self.name().to_string()));
        match self {
            Self::ConfigurationGroup(group) => {
                for child in &group.configs {
                    child.collect_ids(out);
                }
            }
            leaf => {
                if let Some(table) = leaf.table() {
                    let comparisons = table.table().values().flatten().chain(table.shared());
                    for comparison in comparisons {
                        let name = comparison.label().to_string();
                        out.extend(comparison.node_ids().into_iter().map(|id| (id, name.clone())));
                    }
                }
            }
        }
    }

    /// What a comparison in `slot` of this node is compared against
    pub fn describe_context(&self, slot: &ComparisonSlot) -> String {
        if matches!(slot, ComparisonSlot::Identifier(name) if name.is_empty()) {
            return "Error loading context information".to_string();
        }
        match self {
            Self::DeviceConfiguration(c) => describe_device_context(c, slot),
            Self::PvConfiguration(c) => match slot {
                ComparisonSlot::Shared => match c.by_pv.len() {
                    0 => "Invalid comparison to zero PVs".to_string(),
                    1 => format!("Comparison to value of {}", first_key(&c.by_pv)),
                    n => format!("Comparison to value of each of {n} pvs"),
                },
                ComparisonSlot::Identifier(pv) => format!("Comparison to value of {pv}"),
            },
            Self::ToolConfiguration(c) => match &c.tool {
                Tool::Ping(ping) => {
                    let hosts = &ping.hosts;
                    match (slot, hosts.len()) {
                        (_, 0) => "Invalid comparison to zero ping hosts".to_string(),
                        (ComparisonSlot::Shared, 1) => {
                            format!("Comparison to all different results from pinging {}", hosts[0])
                        }
                        (ComparisonSlot::Shared, n) => {
                            format!("Comparison to all different results from pinging {n} hosts")
                        }
                        (ComparisonSlot::Identifier(key), 1) => {
                            format!("Comparison to {key} result from pinging {}", hosts[0])
                        }
                        (ComparisonSlot::Identifier(key), n) => {
                            format!("Comparison to {key} result from pinging {n} hosts")
                        }
                    }
                }
            },
            Self::ConfigurationGroup(_) => "Invalid comparison".to_string(),
        }
    }
}

fn first_key(table: &ComparisonTable) -> &str {
    table.keys().next().map_or("", String::as_str)
}

fn describe_device_context(c: &DeviceConfiguration, slot: &ComparisonSlot) -> String {
    let num_devices = c.devices.len();
    if num_devices == 0 {
        return "Invalid comparison to zero devices".to_string();
    }
    match slot {
        ComparisonSlot::Shared => {
            let num_signals = c.by_attr.len();
            match (num_devices, num_signals) {
                (_, 0) => "Invalid comparison to zero signals".to_string(),
                (1, 1) => format!("Comparison to value of {}.{}", c.devices[0], first_key(&c.by_attr)),
                (n, 1) => format!("Comparison to value of {} signal on each of {n} devices", first_key(&c.by_attr)),
                (1, s) => format!("Comparison to value of {s} signals on {}", c.devices[0]),
                (n, s) => format!("Comparison to value of {s} signals on each of {n} devices"),
            }
        }
        ComparisonSlot::Identifier(attr) if num_devices == 1 => {
            format!("Comparison to value of {}.{attr}", c.devices[0])
        }
        ComparisonSlot::Identifier(attr) => {
            format!("Comparison to value of {attr} on each of {num_devices} devices")
        }
    }
}

/// Top-level document
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfigurationFile {
    /// Document version
    #[serde(default)]
    pub version: u32,
    /// Root group
    pub root: ConfigurationGroup,
}

impl ConfigurationFile {
    /// File around a root group
    pub fn new(root: ConfigurationGroup) -> Self {
        Self { version: 0, root }
    }

    /// Root as a configuration node
    pub fn root_node(&self) -> Configuration {
        Configuration::ConfigurationGroup(self.root.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_identifier_migrates_to_shared_in_order() {
        let a = Comparison::equals(1);
        let b = Comparison::equals(2);
        let (a_id, b_id) = (a.id, b.id);
        let mut config = PvConfiguration::new("pvs")
            .with_shared(vec![Comparison::equals(0)])
            .with_pv("SIM:PV1", vec![a, b]);

        assert!(config.remove_identifier("SIM:PV1"));
        assert!(config.by_pv.is_empty());
        assert_eq!(config.comparison_location(a_id), Some((ComparisonSlot::Shared, 1)));
        assert_eq!(config.comparison_location(b_id), Some((ComparisonSlot::Shared, 2)));
        assert!(!config.remove_identifier("SIM:PV1"));
    }

    #[test]
    fn lookup_is_by_identity_not_value() {
        let first = Comparison::equals(5);
        let second = Comparison::equals(5);
        let second_id = second.id;
        let config = PvConfiguration::new("pvs").with_pv("A", vec![first]).with_pv("B", vec![second]);

        assert_eq!(
            config.comparison_location(second_id),
            Some((ComparisonSlot::Identifier("B".into()), 0)),
        );
        assert_eq!(config.find_comparison(second_id).map(|c| c.id), Some(second_id));
        assert!(config.find_comparison(NodeId::fresh()).is_none());
    }

    #[test]
    fn move_comparison_between_slots() {
        let check = Comparison::equals(5);
        let id = check.id;
        let mut config = DeviceConfiguration::new("motors", ["m1"]).with_shared(vec![check]);

        assert!(config.move_comparison(id, ComparisonSlot::Identifier("readback".into())));
        assert!(config.shared.is_empty());
        assert_eq!(config.by_attr["readback"][0].id, id);
    }

    #[test]
    fn ping_result_keys_include_hosts() {
        let ping = Ping::new(["a.local", "b.local"]);
        let keys = ping.result_keys();
        assert!(keys.contains(&"num_alive".to_string()));
        assert!(keys.contains(&"times.b.local".to_string()));
        assert_eq!(keys.len(), Ping::FIXED_KEYS.len() + 2);
    }

    #[test]
    fn describe_context_wording() {
        let devices: Configuration = DeviceConfiguration::new("d", ["m1", "m2", "m3"])
            .with_attr("readback", vec![])
            .into();
        assert_eq!(
            devices.describe_context(&ComparisonSlot::Shared),
            "Comparison to value of readback signal on each of 3 devices",
        );
        assert_eq!(
            devices.describe_context(&ComparisonSlot::Identifier("readback".into())),
            "Comparison to value of readback on each of 3 devices",
        );

        let pvs: Configuration = PvConfiguration::new("p").into();
        assert_eq!(pvs.describe_context(&ComparisonSlot::Shared), "Invalid comparison to zero PVs");

        let tool: Configuration = ToolConfiguration::new("t", Tool::Ping(Ping::new(["h1"]))).into();
        assert_eq!(
            tool.describe_context(&ComparisonSlot::Identifier("num_alive".into())),
            "Comparison to num_alive result from pinging h1",
        );
    }

    #[test]
    fn node_ids_cover_the_subtree() {
        let leaf = PvConfiguration::new("leaf")
            .with_pv("A", vec![Comparison::equals(1)])
            .with_shared(vec![Comparison::any_of(vec![Comparison::equals(2)])]);
        let group: Configuration = ConfigurationGroup::new("root", GroupMode::All).with_config(leaf).into();
        // group, leaf, A's comparison, any-of and its alternative
        assert_eq!(group.node_ids().len(), 5);
    }

    #[test]
    fn deserializes_tagged_tree() {
        let json = r#"{
            "version": 1,
            "root": {
                "name": "root",
                "mode": "any",
                "configs": [
                    {
                        "type": "PVConfiguration",
                        "name": "pvs",
                        "by_pv": {"SIM:PV1": [{"type": "Equals", "value": 5}]}
                    },
                    {
                        "type": "ToolConfiguration",
                        "tool": {"type": "Ping", "hosts": ["localhost"]},
                        "by_attr": {"num_alive": [{"type": "Equals", "value": 1}]}
                    }
                ]
            }
        }"#;
        let file: ConfigurationFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.root.mode, GroupMode::Any);
        assert_eq!(file.root.configs.len(), 2);
        match &file.root.configs[1] {
            Configuration::ToolConfiguration(tool) => {
                assert!(tool.by_key.contains_key("num_alive"));
                assert_eq!(tool.tool, Tool::Ping(Ping::new(["localhost"])));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
