//! Lazy bean walk
//!
//! `BeanWalk` enumerates matching beans once, then reads and flattens them one
//! bean at a time as leaves are pulled. Per-bean and per-attribute failures are
//! skipped and counted; only connection-level failures end the walk.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use super::node::{BeanLeaf, BeanNode};
use super::object_name::{ObjectName, ObjectNamePattern};
use super::parser::CollectResult;
use super::ManagementConnection;

/// Walk settings derived from configuration
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Empty means every bean
    pub include: Vec<ObjectNamePattern>,
    pub exclude: Vec<ObjectNamePattern>,
    /// Attributes never read, keyed by `ObjectName::canonical`
    pub exclude_attributes: HashMap<String, HashSet<String>>,
    pub auto_exclude: bool,
    /// Nesting bound for composite, table and array values
    pub max_depth: usize,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            exclude_attributes: HashMap::new(),
            auto_exclude: true,
            max_depth: 4,
        }
    }
}

/// Attributes found to be unsupported, remembered across scrapes of one endpoint
#[derive(Debug, Default)]
pub struct AutoExclusions {
    entries: RwLock<HashMap<String, HashSet<String>>>,
}

impl AutoExclusions {
    fn add(&self, bean: &ObjectName, attribute: &str) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries
            .entry(bean.canonical())
            .or_default()
            .insert(attribute.to_string());
    }

    fn extend_into(&self, bean: &ObjectName, target: &mut HashSet<String>) {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(attrs) = entries.get(&bean.canonical()) {
            target.extend(attrs.iter().cloned());
        }
    }

    pub fn contains(&self, bean: &ObjectName, attribute: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&bean.canonical())
            .map(|attrs| attrs.contains(attribute))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(HashSet::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Counters for one walk
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WalkStats {
    pub beans: u64,
    pub leaves: u64,
    pub bean_errors: u64,
    pub attribute_errors: u64,
    pub duplicates: u64,
    pub depth_exceeded: u64,
    pub unsupported: u64,
}

impl WalkStats {
    /// Failures that count against the endpoint's scrape-error counter
    pub fn errors(&self) -> u64 {
        self.bean_errors + self.attribute_errors + self.depth_exceeded
    }

    /// Values read but not turned into leaves
    pub fn dropped(&self) -> u64 {
        self.unsupported + self.duplicates
    }
}

/// Flattening state for one attribute
struct AttributeScope {
    object_name: Arc<ObjectName>,
    description: Option<Arc<str>>,
    leaves: usize,
    unsupported: bool,
}

/// One pass over an endpoint
pub struct BeanWalk {
    connection: Arc<dyn ManagementConnection>,
    options: Arc<WalkOptions>,
    exclusions: Arc<AutoExclusions>,
    names: Option<VecDeque<ObjectName>>,
    pending: VecDeque<BeanLeaf>,
    seen: HashSet<String>,
    stats: WalkStats,
}

impl BeanWalk {
    pub fn new(
        connection: Arc<dyn ManagementConnection>,
        options: Arc<WalkOptions>,
        exclusions: Arc<AutoExclusions>,
    ) -> Self {
        Self {
            connection,
            options,
            exclusions,
            names: None,
            pending: VecDeque::new(),
            seen: HashSet::new(),
            stats: WalkStats::default(),
        }
    }

    pub fn stats(&self) -> WalkStats {
        self.stats
    }

    /// Next distinct leaf, or `None` once every bean has been read
    pub async fn next(&mut self) -> CollectResult<Option<BeanLeaf>> {
        if self.names.is_none() {
            self.names = Some(self.enumerate().await?);
        }

        loop {
            if let Some(leaf) = self.pending.pop_front() {
                if self.seen.insert(leaf.raw_identity().to_string()) {
                    self.stats.leaves += 1;
                    return Ok(Some(leaf));
                }
                self.stats.duplicates += 1;
                continue;
            }

            let Some(name) = self.names.as_mut().and_then(VecDeque::pop_front) else {
                return Ok(None);
            };
            self.load_bean(name).await?;
        }
    }

    /// Drain the walk into a vector
    pub async fn collect(mut self) -> CollectResult<(Vec<BeanLeaf>, WalkStats)> {
        let mut leaves = Vec::new();
        while let Some(leaf) = self.next().await? {
            leaves.push(leaf);
        }
        Ok((leaves, self.stats))
    }

    async fn enumerate(&mut self) -> CollectResult<VecDeque<ObjectName>> {
        let match_all = [ObjectNamePattern::match_all()];
        let includes: &[ObjectNamePattern] = if self.options.include.is_empty() {
            &match_all
        } else {
            &self.options.include
        };

        let mut seen = HashSet::new();
        let mut names = VecDeque::new();
        for pattern in includes {
            for name in self.connection.query_names(pattern).await? {
                if self.options.exclude.iter().any(|p| p.matches(&name)) {
                    continue;
                }
                if seen.insert(name.clone()) {
                    names.push_back(name);
                }
            }
        }

        debug!(
            endpoint = %self.connection.endpoint(),
            beans = names.len(),
            "Enumerated beans"
        );
        Ok(names)
    }

    async fn load_bean(&mut self, name: ObjectName) -> CollectResult<()> {
        let mut skip = self
            .options
            .exclude_attributes
            .get(&name.canonical())
            .cloned()
            .unwrap_or_default();
        if self.options.auto_exclude {
            self.exclusions.extend_into(&name, &mut skip);
        }

        let attributes = match self.connection.read_attributes(&name, &skip).await {
            Ok(attributes) => attributes,
            Err(e) if e.is_connection_level() => return Err(e),
            Err(e) => {
                self.stats.bean_errors += 1;
                debug!(mbean = %name, error = %e, "Skipping unreadable bean");
                return Ok(());
            }
        };

        self.stats.beans += 1;
        let object_name = Arc::new(name);

        for attribute in attributes {
            let node = match attribute.value {
                Ok(node) => node,
                Err(e) => {
                    self.stats.attribute_errors += 1;
                    debug!(
                        mbean = %object_name,
                        attribute = %attribute.name,
                        error = %e,
                        "Skipping unreadable attribute"
                    );
                    continue;
                }
            };

            let mut scope = AttributeScope {
                object_name: Arc::clone(&object_name),
                description: attribute.description.map(Arc::from),
                leaves: 0,
                unsupported: false,
            };
            let mut path = vec![attribute.name.clone()];
            let mut labels = Vec::new();
            self.flatten(&mut scope, node, &mut path, &mut labels, 0);

            if scope.unsupported && scope.leaves == 0 && self.options.auto_exclude {
                info!(
                    mbean = %object_name,
                    attribute = %attribute.name,
                    "Auto-excluding attribute with unsupported value"
                );
                self.exclusions.add(&object_name, &attribute.name);
            }
        }

        Ok(())
    }

    fn flatten(
        &mut self,
        scope: &mut AttributeScope,
        node: BeanNode,
        path: &mut Vec<String>,
        labels: &mut Vec<(String, String)>,
        depth: usize,
    ) {
        if node.is_structure() && depth >= self.options.max_depth {
            self.stats.depth_exceeded += 1;
            return;
        }

        match node {
            BeanNode::Scalar(value) => {
                scope.leaves += 1;
                self.pending.push_back(BeanLeaf::new(
                    Arc::clone(&scope.object_name),
                    path.clone(),
                    labels.clone(),
                    value,
                    scope.description.clone(),
                ));
            }
            BeanNode::Composite(fields) => {
                for (field, value) in fields {
                    path.push(field);
                    self.flatten(scope, value, path, labels, depth + 1);
                    path.pop();
                }
            }
            BeanNode::Table { index, rows } => {
                for row in rows {
                    let mut row_labels = labels.clone();
                    for column in &index {
                        let Some((_, value)) = row.iter().find(|(k, _)| k == column) else {
                            continue;
                        };
                        match value {
                            BeanNode::Scalar(v) => {
                                push_label(&mut row_labels, column.clone(), v.to_label_value())
                            }
                            BeanNode::Composite(fields) => {
                                for (field, fv) in fields {
                                    if let BeanNode::Scalar(v) = fv {
                                        push_label(
                                            &mut row_labels,
                                            format!("{}_{}", column, field),
                                            v.to_label_value(),
                                        );
                                    }
                                }
                            }
                            _ => {}
                        }
                    }

                    for (column, value) in row {
                        if index.contains(&column) {
                            continue;
                        }
                        if column == "value" {
                            self.flatten(scope, value, path, &mut row_labels, depth + 1);
                        } else {
                            path.push(column);
                            self.flatten(scope, value, path, &mut row_labels, depth + 1);
                            path.pop();
                        }
                    }
                }
            }
            BeanNode::Array(items) => {
                for (i, item) in items.into_iter().enumerate() {
                    path.push(i.to_string());
                    self.flatten(scope, item, path, labels, depth + 1);
                    path.pop();
                }
            }
            BeanNode::Null => {}
            BeanNode::Unsupported(kind) => {
                self.stats.unsupported += 1;
                scope.unsupported = true;
                debug!(
                    mbean = %scope.object_name,
                    path = %path.join("."),
                    kind = %kind,
                    "Skipping unsupported value"
                );
            }
        }
    }
}

/// Add a structural label; a name already taken gets `_` appended
fn push_label(labels: &mut Vec<(String, String)>, mut name: String, value: String) {
    while labels.iter().any(|(existing, _)| *existing == name) {
        name.push('_');
    }
    labels.push((name, value));
}
