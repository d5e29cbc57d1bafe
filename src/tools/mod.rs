pub mod fetch_url;
pub mod read_file;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Names that executed code resolves specially; a tool must not shadow them.
const RESERVED_NAMES: &[&str] = &["SUBMIT"];

#[derive(Debug)]
pub enum ToolError {
    ReservedName(String),
    InvalidArguments(String),
    ExecutionFailed(String),
    PermissionDenied(String),
    UnknownTool(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::ReservedName(name) => write!(f, "Tool name is reserved: {}", name),
            ToolError::InvalidArguments(msg) => write!(f, "Invalid arguments: {}", msg),
            ToolError::ExecutionFailed(msg) => write!(f, "Execution failed: {}", msg),
            ToolError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            ToolError::UnknownTool(name) => write!(f, "Unknown tool: {}", name),
        }
    }
}

impl std::error::Error for ToolError {}

/// A capability callable by executed code: positional arguments in, text out.
pub type ToolFn = Arc<dyn Fn(&[serde_json::Value]) -> Result<String, ToolError> + Send + Sync>;

#[derive(Clone)]
struct ToolEntry {
    description: String,
    func: ToolFn,
}

/// The set of capabilities the owning loop exposes to executed code.
///
/// Plain name-to-callable mapping. The loop may replace it wholesale between
/// turns; the sandbox reads it fresh on every execution.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: BTreeMap<String, ToolEntry>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Rejects reserved names instead of silently shadowing
    /// the submission marker.
    pub fn insert(&mut self, name: &str, description: &str, func: ToolFn) -> Result<(), ToolError> {
        if RESERVED_NAMES.contains(&name) {
            return Err(ToolError::ReservedName(name.to_string()));
        }
        self.tools.insert(
            name.to_string(),
            ToolEntry {
                description: description.to_string(),
                func,
            },
        );
        Ok(())
    }

    pub fn call(&self, name: &str, args: &[serde_json::Value]) -> Result<String, ToolError> {
        let entry = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        (entry.func)(args)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Iterate (name, description) pairs, for listings.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tools
            .iter()
            .map(|(name, entry)| (name.as_str(), entry.description.as_str()))
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Build the tool set the demo driver injects: file reading and URL fetching.
pub fn demo_toolset() -> ToolSet {
    let mut tools = ToolSet::new();
    read_file::register(&mut tools);
    fetch_url::register(&mut tools);
    tools
}
