use crate::error::{HearthError, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::path::Path;
use tracing::{info, warn};

pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5000;
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 3000;

/// Static descriptor of one node, as declared in the cluster file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
}

/// Cluster topology and probe timings.
///
/// Loaded from an XML descriptor of the shape
///
/// ```xml
/// <cluster name="production">
///   <heartbeatInterval>5000</heartbeatInterval>
///   <heartbeatTimeout>3000</heartbeatTimeout>
///   <nodes>
///     <node name="node1" host="localhost" port="8080"/>
///   </nodes>
/// </cluster>
/// ```
///
/// A missing file or any parse or validation error falls back to the
/// default single-node configuration rather than failing startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    pub name: String,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub nodes: Vec<NodeConfig>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: "defaultCluster".to_string(),
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            heartbeat_timeout_ms: DEFAULT_HEARTBEAT_TIMEOUT_MS,
            nodes: vec![NodeConfig {
                name: "node1".to_string(),
                host: "localhost".to_string(),
                port: 8080,
            }],
        }
    }
}

impl ClusterConfig {
    /// Loads the descriptor at `path`, falling back to the default
    /// configuration on any failure.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!(
                    "could not read cluster config {}: {}, using default configuration",
                    path.display(),
                    e
                );
                return Self::default();
            }
        };
        match Self::parse(&contents) {
            Ok(config) => {
                info!(
                    "loaded cluster config {} ({} nodes) from {}",
                    config.name,
                    config.nodes.len(),
                    path.display()
                );
                config
            }
            Err(e) => {
                warn!(
                    "invalid cluster config {}: {}, using default configuration",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Parses an XML descriptor. Unknown elements are ignored; malformed
    /// numbers, out-of-range ports and incomplete node declarations are
    /// errors.
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);

        let mut name = String::new();
        let mut heartbeat_interval_ms = DEFAULT_HEARTBEAT_INTERVAL_MS;
        let mut heartbeat_timeout_ms = DEFAULT_HEARTBEAT_TIMEOUT_MS;
        let mut nodes = Vec::new();
        let mut current_element = Vec::new();

        loop {
            match reader
                .read_event()
                .map_err(|e| HearthError::Config(format!("malformed XML: {}", e)))?
            {
                Event::Start(e) => {
                    current_element = e.name().as_ref().to_vec();
                    if current_element == b"cluster" {
                        name = attribute(&e, b"name")?.unwrap_or_default();
                    } else if current_element == b"node" {
                        nodes.push(parse_node(&e)?);
                    }
                }
                Event::Empty(e) => {
                    if e.name().as_ref() == b"node" {
                        nodes.push(parse_node(&e)?);
                    }
                }
                Event::Text(t) => {
                    let text = t
                        .unescape()
                        .map_err(|e| HearthError::Config(format!("malformed text: {}", e)))?;
                    let text = text.trim();
                    if text.is_empty() {
                        continue;
                    }
                    match current_element.as_slice() {
                        b"heartbeatInterval" => {
                            heartbeat_interval_ms = parse_millis("heartbeatInterval", text)?;
                        }
                        b"heartbeatTimeout" => {
                            heartbeat_timeout_ms = parse_millis("heartbeatTimeout", text)?;
                        }
                        _ => {}
                    }
                }
                Event::End(_) => {
                    current_element.clear();
                }
                Event::Eof => break,
                _ => {}
            }
        }

        let config = Self {
            name,
            heartbeat_interval_ms,
            heartbeat_timeout_ms,
            nodes,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(HearthError::Validation("cluster name is empty".into()));
        }
        if self.nodes.is_empty() {
            return Err(HearthError::Validation("cluster declares no nodes".into()));
        }
        if self.heartbeat_interval_ms == 0 || self.heartbeat_timeout_ms == 0 {
            return Err(HearthError::Validation(
                "heartbeat timings must be positive".into(),
            ));
        }
        for node in &self.nodes {
            if node.name.trim().is_empty() || node.host.trim().is_empty() {
                return Err(HearthError::Validation(format!(
                    "incomplete node declaration: {:?}",
                    node
                )));
            }
        }
        Ok(())
    }
}

fn parse_node(e: &quick_xml::events::BytesStart<'_>) -> Result<NodeConfig> {
    let name = attribute(e, b"name")?
        .ok_or_else(|| HearthError::Config("node is missing a name".into()))?;
    let host = attribute(e, b"host")?
        .ok_or_else(|| HearthError::Config("node is missing a host".into()))?;
    let port_raw = attribute(e, b"port")?
        .ok_or_else(|| HearthError::Config("node is missing a port".into()))?;
    let port: u16 = port_raw
        .parse()
        .map_err(|_| HearthError::Config(format!("invalid node port: {}", port_raw)))?;
    if port == 0 {
        return Err(HearthError::Config("node port must be nonzero".into()));
    }
    Ok(NodeConfig { name, host, port })
}

fn attribute(e: &quick_xml::events::BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| HearthError::Config(format!("malformed attribute: {}", e)))?;
        if attr.key.as_ref() == key {
            let value = attr
                .unescape_value()
                .map_err(|e| HearthError::Config(format!("malformed attribute value: {}", e)))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn parse_millis(field: &str, text: &str) -> Result<u64> {
    text.parse()
        .map_err(|_| HearthError::Config(format!("invalid {}: {}", field, text)))
}
