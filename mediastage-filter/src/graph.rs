//! Graph construction and validation.

use crate::config::FilterGraphConfig;
use crate::error::{FilterError, Result};
use crate::node::{self, FilterNode, LinkContext};
use crate::parser::{FilterSpec, GraphDescription};
use crate::stage::{FilterGraphStage, GraphNode};
use mediastage_core::error::ConfigError;
use mediastage_hwaccel::HardwareContext;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Structural description of a filter graph.
///
/// Nodes are named filter instances; links connect node names and the
/// source and sink pads (`in` and `out` unless renamed in the config).
/// Every check happens in [`GraphBuilder::build`].
///
/// ```ignore
/// let graph = GraphBuilder::new(config)
///     .node("up", "hwupload")
///     .node("down", "scale_vaapi=640:360")
///     .link("in", "up")
///     .link("up", "down")
///     .link("down", "out")
///     .hardware_context(&ctx)
///     .build()?;
/// ```
#[derive(Debug)]
pub struct GraphBuilder {
    config: FilterGraphConfig,
    nodes: Vec<(String, Result<FilterSpec>)>,
    links: Vec<(String, String)>,
    devices: Vec<(String, HardwareContext)>,
    device: Option<HardwareContext>,
}

impl GraphBuilder {
    /// Start an empty graph.
    pub fn new(config: FilterGraphConfig) -> Self {
        Self {
            config,
            nodes: Vec::new(),
            links: Vec::new(),
            devices: Vec::new(),
            device: None,
        }
    }

    /// Describe a graph in the textual syntax.
    ///
    /// Filters are named `<filter><index>` in order of appearance.
    pub fn parse(config: FilterGraphConfig, description: &str) -> Result<Self> {
        let graph = GraphDescription::parse(description)?;
        let mut builder = Self::new(config);
        let source = builder.config.source_pad.clone();
        let sink = builder.config.sink_pad.clone();
        let mut produced: BTreeMap<String, String> = BTreeMap::new();
        let mut consumed: BTreeMap<String, String> = BTreeMap::new();
        let mut index = 0;
        let last_chain = graph.chains.len().saturating_sub(1);

        for (c, chain) in graph.chains.iter().enumerate() {
            let mut names = Vec::with_capacity(chain.filters.len());
            for spec in &chain.filters {
                let name = format!("{}{}", spec.name, index);
                index += 1;
                builder.nodes.push((name.clone(), Ok(spec.clone())));
                names.push(name);
            }
            for pair in names.windows(2) {
                builder.links.push((pair[0].clone(), pair[1].clone()));
            }
            let (Some(first), Some(last)) = (names.first(), names.last()) else {
                continue;
            };

            match &chain.input {
                Some(label) if *label == source => builder.links.push((source.clone(), first.clone())),
                Some(label) => {
                    if consumed.insert(label.clone(), first.clone()).is_some() {
                        return Err(FilterError::Duplicate {
                            what: "input label",
                            name: label.clone(),
                        });
                    }
                }
                None if c == 0 => builder.links.push((source.clone(), first.clone())),
                None => {
                    return Err(FilterError::Unconnected {
                        name: first.clone(),
                        message: "chain has no input label".into(),
                    })
                }
            }
            match &chain.output {
                Some(label) if *label == sink => builder.links.push((last.clone(), sink.clone())),
                Some(label) => {
                    if produced.insert(label.clone(), last.clone()).is_some() {
                        return Err(FilterError::Duplicate {
                            what: "output label",
                            name: label.clone(),
                        });
                    }
                }
                None if c == last_chain => builder.links.push((last.clone(), sink.clone())),
                None => {
                    return Err(FilterError::Unconnected {
                        name: last.clone(),
                        message: "chain has no output label".into(),
                    })
                }
            }
        }

        for (label, producer) in produced {
            let consumer = consumed.remove(&label).ok_or_else(|| FilterError::Unconnected {
                name: label.clone(),
                message: "label is never consumed".into(),
            })?;
            builder.links.push((producer, consumer));
        }
        if let Some(label) = consumed.into_keys().next() {
            return Err(FilterError::Unconnected {
                name: label,
                message: "label is never produced".into(),
            });
        }
        Ok(builder)
    }

    /// Add a filter instance, e.g. `node("shrink", "scale=640:360")`.
    pub fn node(mut self, name: impl Into<String>, spec: &str) -> Self {
        self.nodes.push((name.into(), FilterSpec::parse(spec)));
        self
    }

    /// Connect the output of `from` to the input of `to`.
    pub fn link(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.links.push((from.into(), to.into()));
        self
    }

    /// Bind one node to a hardware device.
    pub fn device(mut self, node: impl Into<String>, ctx: &HardwareContext) -> Self {
        self.devices.push((node.into(), ctx.clone()));
        self
    }

    /// Bind every hardware-aware node without its own device to `ctx`.
    pub fn hardware_context(mut self, ctx: &HardwareContext) -> Self {
        self.device = Some(ctx.clone());
        self
    }

    /// The graph's single hardware context.
    fn shared_device(&self) -> Result<Option<HardwareContext>> {
        let mut all = self.device.iter().chain(self.devices.iter().map(|(_, ctx)| ctx));
        let Some(first) = all.next() else {
            return Ok(None);
        };
        if let Some(other) = all.find(|ctx| !ctx.same_device(first)) {
            return Err(ConfigError::Invalid(format!(
                "graph mixes hardware contexts {} ({}) and {} ({})",
                first.id(),
                first.device_type(),
                other.id(),
                other.device_type()
            ))
            .into());
        }
        Ok(Some(first.clone()))
    }

    // Nodes in processing order, from the source pad to the sink pad.
    fn path(&self, names: &HashMap<String, usize>) -> Result<Vec<usize>> {
        let (source, sink) = (&self.config.source_pad, &self.config.sink_pad);
        let mut next: HashMap<&str, &str> = HashMap::new();
        let mut prev: HashMap<&str, &str> = HashMap::new();
        for (from, to) in &self.links {
            for end in [from, to] {
                if end != source && end != sink && !names.contains_key(end) {
                    return Err(FilterError::Unconnected {
                        name: end.clone(),
                        message: "link names an unknown node".into(),
                    });
                }
            }
            if from == sink || to == source {
                return Err(FilterError::Unconnected {
                    name: format!("{from} -> {to}"),
                    message: "links run from the source pad towards the sink pad".into(),
                });
            }
            if next.insert(from.as_str(), to.as_str()).is_some() {
                return Err(FilterError::Duplicate {
                    what: "output link of",
                    name: from.clone(),
                });
            }
            if prev.insert(to.as_str(), from.as_str()).is_some() {
                return Err(FilterError::Duplicate {
                    what: "input link of",
                    name: to.clone(),
                });
            }
        }

        let mut order = Vec::with_capacity(names.len());
        let mut current: &str = source;
        loop {
            let Some(&to) = next.get(current) else {
                return Err(FilterError::Unconnected {
                    name: current.to_string(),
                    message: "output is not linked".into(),
                });
            };
            if to == sink.as_str() {
                break;
            }
            let index = names[to];
            if order.contains(&index) {
                return Err(FilterError::Unconnected {
                    name: to.to_string(),
                    message: "node is part of a cycle".into(),
                });
            }
            order.push(index);
            current = to;
        }
        if let Some((name, _)) = self
            .nodes
            .iter()
            .enumerate()
            .find(|(i, _)| !order.contains(i))
            .map(|(_, n)| n)
        {
            return Err(FilterError::Unconnected {
                name: name.clone(),
                message: "node is not on the path from the source pad to the sink pad".into(),
            });
        }
        Ok(order)
    }

    /// Validate the graph, set up device pools and return a ready-to-open stage.
    pub fn build(self) -> Result<FilterGraphStage> {
        self.config.validate()?;
        let mut names = HashMap::new();
        for (i, (name, _)) in self.nodes.iter().enumerate() {
            if *name == self.config.source_pad || *name == self.config.sink_pad || names.insert(name.clone(), i).is_some() {
                return Err(FilterError::Duplicate {
                    what: "node",
                    name: name.clone(),
                });
            }
        }
        for (name, _) in &self.devices {
            if !names.contains_key(name) {
                return Err(FilterError::Unconnected {
                    name: name.clone(),
                    message: "device assigned to an unknown node".into(),
                });
            }
        }
        let order = self.path(&names)?;
        let device = self.shared_device()?;

        let GraphBuilder {
            config,
            nodes,
            devices,
            device: default_device,
            ..
        } = self;
        let mut instances: Vec<Option<(String, Box<dyn FilterNode>)>> = nodes
            .into_iter()
            .map(|(name, spec)| Ok(Some((name, node::create(&spec?)?))))
            .collect::<Result<_>>()?;

        let mut link = config.source.link_format();
        let mut chain = Vec::with_capacity(order.len());
        for index in order {
            let Some((name, mut filter)) = instances[index].take() else {
                continue;
            };
            let location = format!("node '{name}' ({})", filter.filter_name());
            if let Some(media_type) = filter.media_type() {
                if media_type != link.media_type() {
                    return Err(ConfigError::Invalid(format!(
                        "{location} filters {media_type} frames, its input carries {}",
                        link.media_type()
                    ))
                    .into());
                }
            }
            filter.input_residency().check(location, link.residency())?;
            let node_device = devices
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, ctx)| ctx)
                .or(default_device.as_ref())
                .filter(|_| filter.uses_device());
            link = filter.configure(&LinkContext {
                node: &name,
                input: &link,
                device: node_device,
            })?;
            debug!(node = %name, filter = filter.filter_name(), residency = %link.residency(), "node linked");
            chain.push(GraphNode { name, filter });
        }
        config
            .sink_residency
            .check(format!("sink pad '{}'", config.sink_pad), link.residency())?;

        FilterGraphStage::from_parts(config, chain, link, device)
    }
}
