use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Failure reported by the camera SDK itself.
    #[error("SDK error: {0}")]
    Sdk(String),
    #[error("No camera detected!")]
    NoCamera,
    #[error("node {node} not available")]
    NodeUnavailable { node: String },
    #[error("node {node} not readable")]
    NodeNotReadable { node: String },
    #[error("node {node} not writable")]
    NodeNotWritable { node: String },
    #[error("entry {entry} of node {node} not available")]
    EntryUnavailable { node: String, entry: String },
    #[error("node {node} is not of type {expected}")]
    WrongNodeType {
        node: String,
        expected: &'static str,
    },
    #[error("no image received {waited:?} after software trigger")]
    TriggerTimeout { waited: Duration },
    #[error("image incomplete: {0}")]
    IncompleteImage(String),
    #[error("cannot convert {from} to {to}")]
    UnsupportedConversion { from: String, to: String },
    #[error("invalid region of interest: {0}")]
    InvalidRoi(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("unknown pixel format {0}")]
    UnknownPixelFormat(String),

    #[error("{0}")]
    Image(#[from] image::ImageError),
    #[error("demosaic: {0}")]
    Demosaic(#[from] bayer::BayerError),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Config(#[from] toml::de::Error),
}

fn _test_error_is_send() {
    fn implements<T: Send>() {}
    implements::<Error>();
}

impl Error {
    pub(crate) fn unavailable(node: &str) -> Self {
        Error::NodeUnavailable {
            node: node.to_string(),
        }
    }

    pub(crate) fn not_readable(node: &str) -> Self {
        Error::NodeNotReadable {
            node: node.to_string(),
        }
    }

    pub(crate) fn not_writable(node: &str) -> Self {
        Error::NodeNotWritable {
            node: node.to_string(),
        }
    }
}
