//! Guarded access to device nodes.
//!
//! Every helper checks availability and readability or writability before
//! touching a node and fails with the matching [Error] on the first unmet
//! precondition.

use log::{debug, warn};

use crate::sdk::{Node, NodeKind, NodeMap, Value};
use crate::{Error, Result};

/// GenICam feature names used by this crate.
pub mod names {
    pub const TRIGGER_MODE: &str = "TriggerMode";
    pub const TRIGGER_SOURCE: &str = "TriggerSource";
    pub const TRIGGER_SOFTWARE: &str = "TriggerSoftware";
    pub const ACQUISITION_MODE: &str = "AcquisitionMode";
    pub const PIXEL_FORMAT: &str = "PixelFormat";
    pub const OFFSET_X: &str = "OffsetX";
    pub const OFFSET_Y: &str = "OffsetY";
    pub const WIDTH: &str = "Width";
    pub const HEIGHT: &str = "Height";
    pub const EXPOSURE_AUTO: &str = "ExposureAuto";
    pub const EXPOSURE_TIME: &str = "ExposureTime";
    pub const GAIN_AUTO: &str = "GainAuto";
    pub const GAIN: &str = "Gain";
    pub const BALANCE_WHITE_AUTO: &str = "BalanceWhiteAuto";
    pub const BALANCE_RATIO_SELECTOR: &str = "BalanceRatioSelector";
    pub const BALANCE_RATIO: &str = "BalanceRatio";
    pub const GAMMA_ENABLE: &str = "GammaEnable";
    pub const GAMMA: &str = "Gamma";
    pub const DEVICE_INFORMATION: &str = "DeviceInformation";
    pub const DEVICE_SERIAL_NUMBER: &str = "DeviceSerialNumber";
    pub const DEVICE_MODEL_NAME: &str = "DeviceModelName";
    pub const DEVICE_VENDOR_NAME: &str = "DeviceVendorName";
    pub const DEVICE_VERSION: &str = "DeviceVersion";
}

fn available(map: &dyn NodeMap, name: &str) -> Result<Node> {
    match map.node(name) {
        Some(node) if node.access.is_available() => Ok(node),
        _ => Err(Error::unavailable(name)),
    }
}

fn readable(map: &dyn NodeMap, name: &str) -> Result<Node> {
    let node = available(map, name)?;
    if !node.access.is_readable() {
        return Err(Error::not_readable(name));
    }
    Ok(node)
}

fn writable(map: &dyn NodeMap, name: &str) -> Result<Node> {
    let node = available(map, name)?;
    if !node.access.is_writable() {
        return Err(Error::not_writable(name));
    }
    Ok(node)
}

fn wrong_type(name: &str, expected: &'static str) -> Error {
    Error::WrongNodeType {
        node: name.to_string(),
        expected,
    }
}

/// Select the enumeration entry `entry` of node `name`.
///
/// Returns the symbolic name of the entry current after the write.
pub fn set_enum(map: &mut dyn NodeMap, name: &str, entry: &str) -> Result<String> {
    let node = writable(map, name)?;
    if !matches!(node.kind, NodeKind::Enumeration { .. }) {
        return Err(wrong_type(name, "enumeration"));
    }
    let value = match node.entry(entry) {
        Some(e) if e.access.is_available() && e.access.is_readable() => e.value,
        _ => {
            return Err(Error::EntryUnavailable {
                node: name.to_string(),
                entry: entry.to_string(),
            })
        }
    };
    debug!("{name} <- {entry} ({value})");
    map.write(name, Value::Enum(value))?;
    match map.node(name) {
        Some(node) if node.access.is_readable() => Ok(node.value_string()),
        _ => Ok(entry.to_string()),
    }
}

pub fn enum_symbolic(map: &dyn NodeMap, name: &str) -> Result<String> {
    let node = readable(map, name)?;
    match node.kind {
        NodeKind::Enumeration { .. } => Ok(node.value_string()),
        _ => Err(wrong_type(name, "enumeration")),
    }
}

pub fn float_range(map: &dyn NodeMap, name: &str) -> Result<(f64, f64)> {
    match available(map, name)?.kind {
        NodeKind::Float { min, max, .. } => Ok((min, max)),
        _ => Err(wrong_type(name, "float")),
    }
}

pub fn float_value(map: &dyn NodeMap, name: &str) -> Result<f64> {
    match readable(map, name)?.kind {
        NodeKind::Float { value, .. } => Ok(value),
        _ => Err(wrong_type(name, "float")),
    }
}

/// Write a float node, clamping `value` into the node's range.
/// NaN and infinities are refused.
///
/// Returns the value actually written.
pub fn set_float(map: &mut dyn NodeMap, name: &str, value: f64) -> Result<f64> {
    let (min, max, unit) = match writable(map, name)?.kind {
        NodeKind::Float { min, max, unit, .. } => (min, max, unit),
        _ => return Err(wrong_type(name, "float")),
    };
    if !value.is_finite() {
        return Err(Error::Sdk(format!("{name}: {value} is not a finite number")));
    }
    let clamped = value.clamp(min, max);
    if clamped != value {
        warn!("{name}: {value} {unit} outside [{min}, {max}], using {clamped}");
    }
    debug!("{name} <- {clamped} {unit}");
    map.write(name, Value::Float(clamped))?;
    Ok(clamped)
}

pub fn int_range(map: &dyn NodeMap, name: &str) -> Result<(i64, i64, i64)> {
    match available(map, name)?.kind {
        NodeKind::Integer { min, max, inc, .. } => Ok((min, max, inc)),
        _ => Err(wrong_type(name, "integer")),
    }
}

pub fn int_value(map: &dyn NodeMap, name: &str) -> Result<i64> {
    match readable(map, name)?.kind {
        NodeKind::Integer { value, .. } => Ok(value),
        _ => Err(wrong_type(name, "integer")),
    }
}

/// Write an integer node. Values outside the range or off the increment
/// grid are refused.
pub fn set_int(map: &mut dyn NodeMap, name: &str, value: i64) -> Result<i64> {
    let (min, max, inc) = match writable(map, name)?.kind {
        NodeKind::Integer { min, max, inc, .. } => (min, max, inc),
        _ => return Err(wrong_type(name, "integer")),
    };
    if value < min || value > max {
        return Err(Error::Sdk(format!(
            "{name}: {value} outside [{min}, {max}]"
        )));
    }
    if inc > 1 && (value - min) % inc != 0 {
        return Err(Error::Sdk(format!(
            "{name}: {value} not a multiple of increment {inc} from {min}"
        )));
    }
    debug!("{name} <- {value}");
    map.write(name, Value::Integer(value))?;
    Ok(value)
}

pub fn bool_value(map: &dyn NodeMap, name: &str) -> Result<bool> {
    match readable(map, name)?.kind {
        NodeKind::Boolean(b) => Ok(b),
        _ => Err(wrong_type(name, "boolean")),
    }
}

pub fn set_bool(map: &mut dyn NodeMap, name: &str, value: bool) -> Result<()> {
    if !matches!(writable(map, name)?.kind, NodeKind::Boolean(_)) {
        return Err(wrong_type(name, "boolean"));
    }
    debug!("{name} <- {value}");
    map.write(name, Value::Boolean(value))
}

pub fn string_value(map: &dyn NodeMap, name: &str) -> Result<String> {
    match readable(map, name)?.kind {
        NodeKind::String(s) => Ok(s),
        _ => Err(wrong_type(name, "string")),
    }
}

pub fn execute(map: &mut dyn NodeMap, name: &str) -> Result<()> {
    if !matches!(writable(map, name)?.kind, NodeKind::Command) {
        return Err(wrong_type(name, "command"));
    }
    debug!("{name}()");
    map.execute(name)
}

/// Feature names listed under a category node.
pub fn category_features(map: &dyn NodeMap, name: &str) -> Result<Vec<String>> {
    match readable(map, name)?.kind {
        NodeKind::Category { features } => Ok(features),
        _ => Err(wrong_type(name, "category")),
    }
}

macro_rules! enum_feature {
    ($fn_name:ident, $node:expr) => {
        paste::paste! {
            pub fn $fn_name(map: &dyn NodeMap) -> Result<String> {
                enum_symbolic(map, $node)
            }

            pub fn [<set_ $fn_name>](map: &mut dyn NodeMap, entry: &str) -> Result<String> {
                set_enum(map, $node, entry)
            }
        }
    };
}

macro_rules! float_feature {
    ($fn_name:ident, $node:expr) => {
        paste::paste! {
            pub fn $fn_name(map: &dyn NodeMap) -> Result<f64> {
                float_value(map, $node)
            }

            pub fn [<set_ $fn_name>](map: &mut dyn NodeMap, value: f64) -> Result<f64> {
                set_float(map, $node, value)
            }
        }
    };
}

macro_rules! int_feature {
    ($fn_name:ident, $node:expr) => {
        paste::paste! {
            pub fn $fn_name(map: &dyn NodeMap) -> Result<i64> {
                int_value(map, $node)
            }

            pub fn [<set_ $fn_name>](map: &mut dyn NodeMap, value: i64) -> Result<i64> {
                set_int(map, $node, value)
            }
        }
    };
}

enum_feature!(trigger_mode, names::TRIGGER_MODE);
enum_feature!(trigger_source, names::TRIGGER_SOURCE);
enum_feature!(acquisition_mode, names::ACQUISITION_MODE);
enum_feature!(pixel_format, names::PIXEL_FORMAT);
enum_feature!(exposure_auto, names::EXPOSURE_AUTO);
enum_feature!(gain_auto, names::GAIN_AUTO);
enum_feature!(balance_white_auto, names::BALANCE_WHITE_AUTO);
enum_feature!(balance_ratio_selector, names::BALANCE_RATIO_SELECTOR);

float_feature!(exposure_time, names::EXPOSURE_TIME);
float_feature!(gain, names::GAIN);
float_feature!(balance_ratio, names::BALANCE_RATIO);
float_feature!(gamma, names::GAMMA);

int_feature!(offset_x, names::OFFSET_X);
int_feature!(offset_y, names::OFFSET_Y);
int_feature!(width, names::WIDTH);
int_feature!(height, names::HEIGHT);
