use super::{KernelError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Path segment under which a binary's description resource lives.
pub const DESCRIPTION_SEGMENT: &str = "fcr:metadata";

/// Path segment under which a resource's time map is addressed.
pub const TIMEMAP_SEGMENT: &str = "fcr:versions";

/// Absolute, normalized resource path such as `/collection/item`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourcePath(String);

impl ResourcePath {
    /// Parse a path. It must be absolute; trailing slashes are dropped and
    /// empty segments are rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        if !raw.starts_with('/') {
            return Err(KernelError::InvalidPath(format!(
                "'{}' must start with '/'",
                raw
            )));
        }

        let trimmed = raw.trim_end_matches('/');
        if trimmed.is_empty() {
            return Ok(ResourcePath("/".to_string()));
        }

        if trimmed[1..].split('/').any(|segment| segment.is_empty()) {
            return Err(KernelError::InvalidPath(format!(
                "'{}' contains an empty segment",
                raw
            )));
        }

        Ok(ResourcePath(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Append one segment.
    pub fn child(&self, segment: &str) -> Self {
        if self.0 == "/" {
            ResourcePath(format!("/{}", segment))
        } else {
            ResourcePath(format!("{}/{}", self.0, segment))
        }
    }

    /// Where the description of a binary at this path lives.
    pub fn description_path(&self) -> Self {
        self.child(DESCRIPTION_SEGMENT)
    }

    pub fn is_description(&self) -> bool {
        self.described_path().is_some()
    }

    /// For a description path, the binary it describes.
    pub fn described_path(&self) -> Option<Self> {
        let parent = self.0.strip_suffix(DESCRIPTION_SEGMENT)?.strip_suffix('/')?;
        if parent.is_empty() {
            return None;
        }
        Some(ResourcePath(parent.to_string()))
    }

    /// The resource whose history this path belongs to: a description maps to
    /// its binary, everything else to itself.
    pub fn original(&self) -> Self {
        self.described_path().unwrap_or_else(|| self.clone())
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ResourcePath {
    type Error = KernelError;

    fn try_from(value: String) -> Result<Self> {
        ResourcePath::parse(&value)
    }
}

impl From<ResourcePath> for String {
    fn from(path: ResourcePath) -> Self {
        path.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Container,
    Binary,
    /// Metadata resource attached to a binary.
    Description,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Container => write!(f, "CONTAINER"),
            ResourceKind::Binary => write!(f, "BINARY"),
            ResourceKind::Description => write!(f, "DESCRIPTION"),
        }
    }
}

/// Binary payload. The bytes are shared, never mutated in place; replacing
/// content swaps the whole reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryContent {
    bytes: Arc<[u8]>,
    mime_type: String,
}

impl BinaryContent {
    pub fn new(bytes: impl Into<Vec<u8>>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes: Arc::from(bytes.into()),
            mime_type: mime_type.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether two contents share the same underlying buffer.
    pub fn shares_buffer(&self, other: &BinaryContent) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }
}

/// A stored resource: path, kind, flat property metadata and, for binaries,
/// the content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    path: ResourcePath,
    kind: ResourceKind,
    properties: BTreeMap<String, String>,
    content: Option<BinaryContent>,
}

impl Resource {
    pub fn container(path: ResourcePath) -> Self {
        Self {
            path,
            kind: ResourceKind::Container,
            properties: BTreeMap::new(),
            content: None,
        }
    }

    pub fn binary(path: ResourcePath, content: BinaryContent) -> Self {
        Self {
            path,
            kind: ResourceKind::Binary,
            properties: BTreeMap::new(),
            content: Some(content),
        }
    }

    /// The description resource of the binary at `binary`.
    pub fn description_of(binary: &ResourcePath) -> Self {
        Self {
            path: binary.description_path(),
            kind: ResourceKind::Description,
            properties: BTreeMap::new(),
            content: None,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn is_binary(&self) -> bool {
        self.kind == ResourceKind::Binary
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn remove_property(&mut self, key: &str) -> Option<String> {
        self.properties.remove(key)
    }

    pub fn content(&self) -> Option<&BinaryContent> {
        self.content.as_ref()
    }

    /// Replace a binary's content.
    pub fn set_content(&mut self, content: BinaryContent) -> Result<()> {
        if !self.is_binary() {
            return Err(KernelError::IllegalStateTransition(format!(
                "cannot set content on {} resource '{}'",
                self.kind, self.path
            )));
        }
        self.content = Some(content);
        Ok(())
    }
}
