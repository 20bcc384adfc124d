//! The camera SDK contract.
//!
//! Devices are reached through a [System] singleton, expose their settings as
//! a reflective [NodeMap] and deliver frames either on demand through
//! [Camera::next_image] or to a registered [ImageEventHandler].

use std::fmt;
use std::time::Duration;

use crate::image::Image;
use crate::Result;

/// Version of the SDK library backing a [System].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibraryVersion {
    pub major: u32,
    pub minor: u32,
    pub kind: u32,
    pub build: u32,
}

impl fmt::Display for LibraryVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.kind, self.build)
    }
}

/// Access mode of a node or enumeration entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    NotAvailable,
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    pub fn is_available(self) -> bool {
        self != AccessMode::NotAvailable
    }

    pub fn is_readable(self) -> bool {
        matches!(self, AccessMode::ReadOnly | AccessMode::ReadWrite)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, AccessMode::WriteOnly | AccessMode::ReadWrite)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumEntry {
    pub symbolic: String,
    pub value: i64,
    pub access: AccessMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Enumeration { entries: Vec<EnumEntry>, current: i64 },
    Float {
        min: f64,
        max: f64,
        value: f64,
        unit: &'static str,
    },
    Integer { min: i64, max: i64, inc: i64, value: i64 },
    Boolean(bool),
    Command,
    String(String),
    Category { features: Vec<String> },
}

impl NodeKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Enumeration { .. } => "enumeration",
            NodeKind::Float { .. } => "float",
            NodeKind::Integer { .. } => "integer",
            NodeKind::Boolean(_) => "boolean",
            NodeKind::Command => "command",
            NodeKind::String(_) => "string",
            NodeKind::Category { .. } => "category",
        }
    }
}

/// Snapshot of a node as seen through the node map.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub access: AccessMode,
    pub kind: NodeKind,
}

impl Node {
    pub fn entry(&self, symbolic: &str) -> Option<&EnumEntry> {
        match &self.kind {
            NodeKind::Enumeration { entries, .. } => {
                entries.iter().find(|e| e.symbolic == symbolic)
            }
            _ => None,
        }
    }

    /// The current value rendered the way the SDK's `ToString` does.
    pub fn value_string(&self) -> String {
        match &self.kind {
            NodeKind::Enumeration { entries, current } => entries
                .iter()
                .find(|e| e.value == *current)
                .map(|e| e.symbolic.clone())
                .unwrap_or_else(|| current.to_string()),
            NodeKind::Float { value, .. } => value.to_string(),
            NodeKind::Integer { value, .. } => value.to_string(),
            NodeKind::Boolean(b) => b.to_string(),
            NodeKind::Command => String::new(),
            NodeKind::String(s) => s.clone(),
            NodeKind::Category { features } => features.join(", "),
        }
    }
}

/// Value written to a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Enum(i64),
    Float(f64),
    Integer(i64),
    Boolean(bool),
    String(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Enum(v) | Value::Integer(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v}"),
        }
    }
}

/// Reflective property registry of a device.
pub trait NodeMap {
    fn node(&self, name: &str) -> Option<Node>;
    fn write(&mut self, name: &str, value: Value) -> Result<()>;
    fn execute(&mut self, name: &str) -> Result<()>;
}

/// Receives frames as the SDK delivers them.
///
/// Handlers may be called from an SDK thread, so they must be `Send`.
pub trait ImageEventHandler: Send {
    fn on_image(&mut self, image: &Image);
}

impl<F> ImageEventHandler for F
where
    F: FnMut(&Image) + Send,
{
    fn on_image(&mut self, image: &Image) {
        self(image)
    }
}

pub trait Camera {
    fn init(&mut self) -> Result<()>;
    fn deinit(&mut self) -> Result<()>;
    fn is_initialized(&self) -> bool;

    /// The GenICam device node map. Only usable after [Camera::init].
    fn node_map(&self) -> &dyn NodeMap;
    fn node_map_mut(&mut self) -> &mut dyn NodeMap;
    /// The transport layer device node map, usable without [Camera::init].
    fn tl_device_node_map(&self) -> &dyn NodeMap;

    fn begin_acquisition(&mut self) -> Result<()>;
    fn end_acquisition(&mut self) -> Result<()>;
    fn is_streaming(&self) -> bool;

    /// Wait for the next frame. `None` waits indefinitely.
    fn next_image(&mut self, timeout: Option<Duration>) -> Result<Image>;

    fn register_image_handler(&mut self, handler: Box<dyn ImageEventHandler>);
    fn unregister_image_handler(&mut self);

    /// Give the device back to the SDK.
    fn release(&mut self);
}

/// Entry point of the SDK.
pub trait System {
    type Camera: Camera;

    fn name(&self) -> &str;
    fn library_version(&self) -> LibraryVersion;
    fn cameras(&mut self) -> Result<Vec<Self::Camera>>;
    /// Release the system instance.
    fn release(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_mode_guards() {
        assert!(!AccessMode::NotAvailable.is_available());
        assert!(AccessMode::ReadOnly.is_readable());
        assert!(!AccessMode::ReadOnly.is_writable());
        assert!(AccessMode::WriteOnly.is_writable());
        assert!(!AccessMode::WriteOnly.is_readable());
        assert!(AccessMode::ReadWrite.is_readable() && AccessMode::ReadWrite.is_writable());
    }

    #[test]
    fn library_version_display() {
        let v = LibraryVersion {
            major: 1,
            minor: 27,
            kind: 0,
            build: 48,
        };
        assert_eq!(v.to_string(), "1.27.0.48");
    }

    #[test]
    fn enum_value_string_uses_symbolic() {
        let node = Node {
            name: "TriggerMode".into(),
            access: AccessMode::ReadWrite,
            kind: NodeKind::Enumeration {
                entries: vec![
                    EnumEntry {
                        symbolic: "Off".into(),
                        value: 0,
                        access: AccessMode::ReadOnly,
                    },
                    EnumEntry {
                        symbolic: "On".into(),
                        value: 1,
                        access: AccessMode::ReadOnly,
                    },
                ],
                current: 1,
            },
        };
        assert_eq!(node.value_string(), "On");
        assert_eq!(node.entry("Off").map(|e| e.value), Some(0));
        assert!(node.entry("Maybe").is_none());
    }
}
