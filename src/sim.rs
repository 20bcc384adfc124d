//! A simulated camera SDK.
//!
//! The simulated device exposes the node layout of a small color GenICam
//! camera, renders a test scene on every software trigger and records
//! every write, command and release on a shared [SimRecorder].

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;
use parking_lot::Mutex;

use crate::convert;
use crate::features::names;
use crate::image::{Image, ImageStatus, PixelFormat};
use crate::sdk::{
    AccessMode, Camera, EnumEntry, ImageEventHandler, LibraryVersion, Node, NodeKind, NodeMap,
    System, Value,
};
use crate::{Error, Result};

pub const SENSOR_WIDTH: u32 = 720;
pub const SENSOR_HEIGHT: u32 = 540;

const WIDTH_INC: i64 = 16;
const HEIGHT_INC: i64 = 4;
const OFFSET_INC: i64 = 4;

/// Exposure at which the test scene reaches its nominal brightness.
const REFERENCE_EXPOSURE_US: f64 = 1e6;

/// A node write or command seen by the simulated device.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeWrite {
    pub node: String,
    /// `None` for command execution.
    pub value: Option<Value>,
}

#[derive(Debug, Default)]
struct RecorderState {
    writes: Vec<NodeWrite>,
    software_triggers: usize,
    frames_delivered: usize,
    acquisitions_begun: usize,
    acquisitions_ended: usize,
    inits: usize,
    deinits: usize,
    camera_releases: usize,
    system_releases: usize,
}

/// Shared record of what happened to the simulated SDK.
#[derive(Debug, Clone, Default)]
pub struct SimRecorder {
    state: Arc<Mutex<RecorderState>>,
}

impl SimRecorder {
    pub fn writes(&self) -> Vec<NodeWrite> {
        self.state.lock().writes.clone()
    }

    /// Names of the nodes written, in order, without commands.
    pub fn written_nodes(&self) -> Vec<String> {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|w| w.value.is_some())
            .map(|w| w.node.clone())
            .collect()
    }

    pub fn last_value(&self, node: &str) -> Option<Value> {
        self.state
            .lock()
            .writes
            .iter()
            .rev()
            .find(|w| w.node == node)
            .and_then(|w| w.value.clone())
    }

    pub fn software_triggers(&self) -> usize {
        self.state.lock().software_triggers
    }

    pub fn frames_delivered(&self) -> usize {
        self.state.lock().frames_delivered
    }

    pub fn acquisitions_begun(&self) -> usize {
        self.state.lock().acquisitions_begun
    }

    pub fn acquisitions_ended(&self) -> usize {
        self.state.lock().acquisitions_ended
    }

    pub fn inits(&self) -> usize {
        self.state.lock().inits
    }

    pub fn deinits(&self) -> usize {
        self.state.lock().deinits
    }

    pub fn camera_releases(&self) -> usize {
        self.state.lock().camera_releases
    }

    pub fn system_releases(&self) -> usize {
        self.state.lock().system_releases
    }

    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    fn record(&self, node: &str, value: Option<Value>) {
        self.state.lock().writes.push(NodeWrite {
            node: node.to_string(),
            value,
        });
    }
}

#[derive(Debug, Default)]
struct NodeStore {
    nodes: BTreeMap<String, Node>,
    access_overrides: HashMap<String, AccessMode>,
}

impl NodeStore {
    fn insert(&mut self, name: &str, access: AccessMode, kind: NodeKind) {
        self.nodes.insert(
            name.to_string(),
            Node {
                name: name.to_string(),
                access,
                kind,
            },
        );
    }

    fn insert_enum(&mut self, name: &str, entries: &[&str], current: &str) {
        let entries: Vec<EnumEntry> = entries
            .iter()
            .enumerate()
            .map(|(i, s)| EnumEntry {
                symbolic: s.to_string(),
                value: i as i64,
                access: AccessMode::ReadOnly,
            })
            .collect();
        let current = entries
            .iter()
            .find(|e| e.symbolic == current)
            .map(|e| e.value)
            .unwrap_or(0);
        self.insert(
            name,
            AccessMode::ReadWrite,
            NodeKind::Enumeration { entries, current },
        );
    }

    fn insert_string(&mut self, name: &str, value: &str) {
        self.insert(name, AccessMode::ReadOnly, NodeKind::String(value.to_string()));
    }

    fn get(&self, name: &str) -> Option<Node> {
        let mut node = self.nodes.get(name)?.clone();
        if let Some(access) = self.access_overrides.get(name) {
            node.access = *access;
        }
        Some(node)
    }

    fn enum_symbolic(&self, name: &str) -> Option<String> {
        self.nodes.get(name).map(Node::value_string)
    }

    fn float(&self, name: &str) -> Option<f64> {
        match self.nodes.get(name)?.kind {
            NodeKind::Float { value, .. } => Some(value),
            _ => None,
        }
    }

    fn int(&self, name: &str) -> Option<i64> {
        match self.nodes.get(name)?.kind {
            NodeKind::Integer { value, .. } => Some(value),
            _ => None,
        }
    }

    fn boolean(&self, name: &str) -> Option<bool> {
        match self.nodes.get(name)?.kind {
            NodeKind::Boolean(b) => Some(b),
            _ => None,
        }
    }
}

/// Transport layer node map: device identity, read-only.
#[derive(Debug, Default)]
pub struct SimTlNodeMap {
    store: NodeStore,
}

impl SimTlNodeMap {
    fn new(serial: &str) -> Self {
        let mut store = NodeStore::default();
        store.insert(
            names::DEVICE_INFORMATION,
            AccessMode::ReadOnly,
            NodeKind::Category {
                features: vec![
                    names::DEVICE_SERIAL_NUMBER.to_string(),
                    names::DEVICE_VENDOR_NAME.to_string(),
                    names::DEVICE_MODEL_NAME.to_string(),
                    names::DEVICE_VERSION.to_string(),
                    "DeviceUserID".to_string(),
                ],
            },
        );
        store.insert_string(names::DEVICE_SERIAL_NUMBER, serial);
        store.insert_string(names::DEVICE_VENDOR_NAME, "Simulated Imaging");
        store.insert_string(names::DEVICE_MODEL_NAME, "SIM-U3-04S2C");
        store.insert_string(names::DEVICE_VERSION, "1.0.0");
        store.insert("DeviceUserID", AccessMode::WriteOnly, NodeKind::String(String::new()));
        SimTlNodeMap { store }
    }
}

impl NodeMap for SimTlNodeMap {
    fn node(&self, name: &str) -> Option<Node> {
        self.store.get(name)
    }

    fn write(&mut self, name: &str, _value: Value) -> Result<()> {
        Err(Error::Sdk(format!("{name}: transport layer nodes are read-only")))
    }

    fn execute(&mut self, name: &str) -> Result<()> {
        Err(Error::Sdk(format!("{name} is not a command")))
    }
}

#[derive(Debug, Clone, Copy)]
struct Faults {
    drop_triggers: usize,
    incomplete_frames: usize,
    frames_per_trigger: usize,
    fail_begin_acquisition: bool,
}

impl Default for Faults {
    fn default() -> Self {
        Faults {
            drop_triggers: 0,
            incomplete_frames: 0,
            frames_per_trigger: 1,
            fail_begin_acquisition: false,
        }
    }
}

/// GenICam device node map of the simulated camera.
///
/// This is also where frames are produced, since a software trigger is a
/// command executed on this map.
pub struct SimNodeMap {
    store: NodeStore,
    initialized: bool,
    streaming: bool,
    handler: Option<Box<dyn ImageEventHandler>>,
    queue: VecDeque<Image>,
    next_frame_id: u64,
    started: Instant,
    faults: Faults,
    recorder: SimRecorder,
}

impl SimNodeMap {
    fn new(recorder: SimRecorder) -> Self {
        let mut store = NodeStore::default();
        store.insert_enum(names::TRIGGER_MODE, &["Off", "On"], "Off");
        store.insert_enum(names::TRIGGER_SOURCE, &["Software", "Line0", "Line2"], "Line0");
        store.insert(names::TRIGGER_SOFTWARE, AccessMode::WriteOnly, NodeKind::Command);
        store.insert_enum(
            names::ACQUISITION_MODE,
            &["Continuous", "SingleFrame", "MultiFrame"],
            "Continuous",
        );
        let formats: Vec<&str> = PixelFormat::ALL.iter().map(|f| f.symbolic()).collect();
        store.insert_enum(names::PIXEL_FORMAT, &formats, PixelFormat::BayerRG8.symbolic());
        store.insert(
            names::WIDTH,
            AccessMode::ReadWrite,
            NodeKind::Integer {
                min: WIDTH_INC,
                max: SENSOR_WIDTH.into(),
                inc: WIDTH_INC,
                value: SENSOR_WIDTH.into(),
            },
        );
        store.insert(
            names::HEIGHT,
            AccessMode::ReadWrite,
            NodeKind::Integer {
                min: HEIGHT_INC,
                max: SENSOR_HEIGHT.into(),
                inc: HEIGHT_INC,
                value: SENSOR_HEIGHT.into(),
            },
        );
        for offset in [names::OFFSET_X, names::OFFSET_Y] {
            store.insert(
                offset,
                AccessMode::ReadWrite,
                NodeKind::Integer {
                    min: 0,
                    max: 0,
                    inc: OFFSET_INC,
                    value: 0,
                },
            );
        }
        store.insert_enum(names::EXPOSURE_AUTO, &["Off", "Once", "Continuous"], "Continuous");
        store.insert(
            names::EXPOSURE_TIME,
            AccessMode::ReadWrite,
            NodeKind::Float {
                min: 10.0,
                max: 30_000_000.0,
                value: 10_000.0,
                unit: "us",
            },
        );
        store.insert_enum(names::GAIN_AUTO, &["Off", "Once", "Continuous"], "Continuous");
        store.insert(
            names::GAIN,
            AccessMode::ReadWrite,
            NodeKind::Float {
                min: 0.0,
                max: 47.99,
                value: 0.0,
                unit: "dB",
            },
        );
        store.insert_enum(names::BALANCE_WHITE_AUTO, &["Off", "Once", "Continuous"], "Continuous");
        store.insert_enum(names::BALANCE_RATIO_SELECTOR, &["Red", "Blue"], "Red");
        // ratios are kept per selector, the node itself shows the selected one
        store.insert(
            names::BALANCE_RATIO,
            AccessMode::ReadWrite,
            NodeKind::Float {
                min: 0.25,
                max: 8.0,
                value: 1.0,
                unit: "",
            },
        );
        store.insert("BalanceRatioRed", AccessMode::NotAvailable, hidden_ratio(1.0));
        store.insert("BalanceRatioBlue", AccessMode::NotAvailable, hidden_ratio(1.0));
        store.insert(names::GAMMA_ENABLE, AccessMode::ReadWrite, NodeKind::Boolean(false));
        store.insert(
            names::GAMMA,
            AccessMode::ReadWrite,
            NodeKind::Float {
                min: 0.25,
                max: 4.0,
                value: 0.8,
                unit: "",
            },
        );
        SimNodeMap {
            store,
            initialized: false,
            streaming: false,
            handler: None,
            queue: VecDeque::new(),
            next_frame_id: 0,
            started: Instant::now(),
            faults: Faults::default(),
            recorder,
        }
    }

    fn is_on(&self, node: &str, symbolic: &str) -> bool {
        self.store.enum_symbolic(node).as_deref() == Some(symbolic)
    }

    /// Apply the state dependent access rules and ranges of the device.
    fn effective(&self, mut node: Node) -> Node {
        let read_only_when = |cond: bool, access: AccessMode| {
            if cond && access.is_available() {
                AccessMode::ReadOnly
            } else {
                access
            }
        };
        match node.name.as_str() {
            names::PIXEL_FORMAT | names::WIDTH | names::HEIGHT | names::OFFSET_X
            | names::OFFSET_Y => {
                node.access = read_only_when(self.streaming, node.access);
            }
            names::TRIGGER_SOURCE => {
                node.access = read_only_when(self.is_on(names::TRIGGER_MODE, "On"), node.access);
            }
            names::TRIGGER_SOFTWARE => {
                if !(self.is_on(names::TRIGGER_MODE, "On")
                    && self.is_on(names::TRIGGER_SOURCE, "Software"))
                {
                    node.access = AccessMode::NotAvailable;
                }
            }
            names::EXPOSURE_TIME => {
                node.access = read_only_when(!self.is_on(names::EXPOSURE_AUTO, "Off"), node.access);
            }
            names::GAIN => {
                node.access = read_only_when(!self.is_on(names::GAIN_AUTO, "Off"), node.access);
            }
            names::BALANCE_RATIO => {
                node.access =
                    read_only_when(!self.is_on(names::BALANCE_WHITE_AUTO, "Off"), node.access);
            }
            names::GAMMA => {
                node.access = read_only_when(
                    !self.store.boolean(names::GAMMA_ENABLE).unwrap_or(false),
                    node.access,
                );
            }
            _ => {}
        }
        let (width, height) = (self.int(names::WIDTH), self.int(names::HEIGHT));
        let (offset_x, offset_y) = (self.int(names::OFFSET_X), self.int(names::OFFSET_Y));
        if let NodeKind::Integer { max, .. } = &mut node.kind {
            match node.name.as_str() {
                names::WIDTH => *max = i64::from(SENSOR_WIDTH) - offset_x,
                names::HEIGHT => *max = i64::from(SENSOR_HEIGHT) - offset_y,
                names::OFFSET_X => *max = i64::from(SENSOR_WIDTH) - width,
                names::OFFSET_Y => *max = i64::from(SENSOR_HEIGHT) - height,
                _ => {}
            }
        }
        node
    }

    fn int(&self, name: &str) -> i64 {
        self.store.int(name).unwrap_or(0)
    }

    fn float(&self, name: &str) -> f64 {
        self.store.float(name).unwrap_or(0.0)
    }

    fn selected_ratio_node(&self) -> &'static str {
        if self.is_on(names::BALANCE_RATIO_SELECTOR, "Blue") {
            "BalanceRatioBlue"
        } else {
            "BalanceRatioRed"
        }
    }

    fn store_value(&mut self, name: &str, value: &Value) {
        if let Some(node) = self.store.nodes.get_mut(name) {
            match (&mut node.kind, value) {
                (NodeKind::Enumeration { current, .. }, Value::Enum(v)) => *current = *v,
                (NodeKind::Float { value: stored, .. }, Value::Float(v)) => *stored = *v,
                (NodeKind::Integer { value: stored, .. }, Value::Integer(v)) => *stored = *v,
                (NodeKind::Boolean(stored), Value::Boolean(v)) => *stored = *v,
                (NodeKind::String(stored), Value::String(v)) => stored.clone_from(v),
                _ => {}
            }
        }
    }

    /// Keep `BalanceRatio` showing the ratio of the selected channel.
    fn sync_balance_ratio(&mut self, written: &str) {
        let ratio_node = self.selected_ratio_node();
        match written {
            names::BALANCE_RATIO => {
                let v = self.float(names::BALANCE_RATIO);
                self.store_value(ratio_node, &Value::Float(v));
            }
            names::BALANCE_RATIO_SELECTOR => {
                let v = self.float(ratio_node);
                self.store_value(names::BALANCE_RATIO, &Value::Float(v));
            }
            _ => {}
        }
    }

    fn check_value(node: &Node, value: &Value) -> Result<()> {
        let refuse = |why: String| Err(Error::Sdk(format!("{}: {why}", node.name)));
        match (&node.kind, value) {
            (NodeKind::Enumeration { entries, .. }, Value::Enum(v)) => {
                match entries.iter().find(|e| e.value == *v) {
                    Some(e) if e.access.is_available() => Ok(()),
                    _ => refuse(format!("no entry with value {v}")),
                }
            }
            (NodeKind::Float { min, max, .. }, Value::Float(v)) => {
                if !v.is_finite() || v < min || v > max {
                    refuse(format!("{v} out of range [{min}, {max}]"))
                } else {
                    Ok(())
                }
            }
            (NodeKind::Integer { min, max, inc, .. }, Value::Integer(v)) => {
                if v < min || v > max {
                    refuse(format!("{v} out of range [{min}, {max}]"))
                } else if *inc > 1 && (v - min) % inc != 0 {
                    refuse(format!("{v} violates increment {inc}"))
                } else {
                    Ok(())
                }
            }
            (NodeKind::Boolean(_), Value::Boolean(_)) | (NodeKind::String(_), Value::String(_)) => {
                Ok(())
            }
            (kind, value) => refuse(format!("cannot write {value} to a {} node", kind.type_name())),
        }
    }

    fn software_trigger(&mut self) -> Result<()> {
        self.recorder.state.lock().software_triggers += 1;
        if !self.streaming {
            debug!("software trigger ignored, acquisition not started");
            return Ok(());
        }
        if self.faults.drop_triggers > 0 {
            self.faults.drop_triggers -= 1;
            debug!("software trigger dropped");
            return Ok(());
        }
        for _ in 0..self.faults.frames_per_trigger {
            let image = self.render()?;
            self.deliver(image);
        }
        Ok(())
    }

    fn deliver(&mut self, image: Image) {
        self.recorder.state.lock().frames_delivered += 1;
        match self.handler.as_mut() {
            Some(handler) => handler.on_image(&image),
            None => self.queue.push_back(image),
        }
    }

    /// Render the test scene with the current settings.
    fn render(&mut self) -> Result<Image> {
        let width = self.int(names::WIDTH) as usize;
        let height = self.int(names::HEIGHT) as usize;
        let offset_x = self.int(names::OFFSET_X) as usize;
        let offset_y = self.int(names::OFFSET_Y) as usize;
        let format: PixelFormat = self
            .store
            .enum_symbolic(names::PIXEL_FORMAT)
            .unwrap_or_default()
            .parse()?;
        let exposure_us = self.float(names::EXPOSURE_TIME);
        let gain = 10f64.powf(self.float(names::GAIN) / 20.0);
        let (red, blue) = (self.float("BalanceRatioRed"), self.float("BalanceRatioBlue"));
        let gamma = if self.store.boolean(names::GAMMA_ENABLE).unwrap_or(false) {
            self.float(names::GAMMA)
        } else {
            1.0
        };
        let scale = exposure_us / REFERENCE_EXPOSURE_US * gain;
        let level = |v: f64| -> u8 {
            let v = (v * scale / 255.0).clamp(0.0, 1.0);
            (v.powf(1.0 / gamma) * 255.0).round() as u8
        };

        let mut data = Vec::with_capacity(width * height * format.bytes_per_pixel());
        for y in 0..height {
            let sy = (y + offset_y) as f64 / f64::from(SENSOR_HEIGHT);
            for x in 0..width {
                let sx = (x + offset_x) as f64 / f64::from(SENSOR_WIDTH);
                let rgb = [
                    level(255.0 * sx * red),
                    level(160.0),
                    level(255.0 * sy * blue),
                ];
                match (format, format.bayer_pattern()) {
                    (_, Some(pattern)) => data.push(rgb[pattern.channel_index(x, y)]),
                    (PixelFormat::BGR8, _) => data.extend_from_slice(&[rgb[2], rgb[1], rgb[0]]),
                    _ => data.extend_from_slice(&rgb),
                }
            }
        }

        if format == PixelFormat::Mono8 {
            data = convert::rgb_to_mono(width as u32, height as u32, data)?;
        }

        let frame_id = self.next_frame_id;
        self.next_frame_id += 1;
        let timestamp = self.started.elapsed().as_nanos() as u64;
        let mut image = Image::new(width as u32, height as u32, format, data)?
            .with_frame_info(frame_id, exposure_us, timestamp);
        if self.faults.incomplete_frames > 0 {
            self.faults.incomplete_frames -= 1;
            image = image.with_status(ImageStatus::DataMissing);
        }
        Ok(image)
    }
}

fn hidden_ratio(value: f64) -> NodeKind {
    NodeKind::Float {
        min: 0.25,
        max: 8.0,
        value,
        unit: "",
    }
}

impl NodeMap for SimNodeMap {
    fn node(&self, name: &str) -> Option<Node> {
        if !self.initialized {
            return None;
        }
        self.store.get(name).map(|n| self.effective(n))
    }

    fn write(&mut self, name: &str, value: Value) -> Result<()> {
        let node = self
            .node(name)
            .ok_or_else(|| Error::Sdk(format!("{name}: node not available")))?;
        if !node.access.is_writable() {
            return Err(Error::Sdk(format!("{name}: access denied")));
        }
        Self::check_value(&node, &value)?;
        self.store_value(name, &value);
        self.sync_balance_ratio(name);
        self.recorder.record(name, Some(value));
        Ok(())
    }

    fn execute(&mut self, name: &str) -> Result<()> {
        let node = self
            .node(name)
            .ok_or_else(|| Error::Sdk(format!("{name}: node not available")))?;
        if !matches!(node.kind, NodeKind::Command) {
            return Err(Error::Sdk(format!("{name} is not a command")));
        }
        if !node.access.is_writable() {
            return Err(Error::Sdk(format!("{name}: access denied")));
        }
        self.recorder.record(name, None);
        if name == names::TRIGGER_SOFTWARE {
            self.software_trigger()?;
        }
        Ok(())
    }
}

/// A simulated color camera.
pub struct SimCamera {
    nodes: SimNodeMap,
    tl_nodes: SimTlNodeMap,
    released: bool,
}

impl Default for SimCamera {
    fn default() -> Self {
        SimCamera::new("19240001")
    }
}

impl SimCamera {
    pub fn new(serial: &str) -> Self {
        SimCamera {
            nodes: SimNodeMap::new(SimRecorder::default()),
            tl_nodes: SimTlNodeMap::new(serial),
            released: false,
        }
    }

    pub fn recorder(&self) -> SimRecorder {
        self.nodes.recorder.clone()
    }

    fn attach_recorder(&mut self, recorder: SimRecorder) {
        self.nodes.recorder = recorder;
    }

    /// Remove a node from the device node map.
    pub fn remove_node(&mut self, name: &str) {
        self.nodes.store.nodes.remove(name);
    }

    /// Force the access mode of a device node.
    pub fn set_node_access(&mut self, name: &str, access: AccessMode) {
        self.nodes
            .store
            .access_overrides
            .insert(name.to_string(), access);
    }

    /// The next `n` software triggers deliver no frame.
    pub fn drop_next_triggers(&mut self, n: usize) {
        self.nodes.faults.drop_triggers = n;
    }

    /// The next `n` frames are delivered as incomplete.
    pub fn mark_next_frames_incomplete(&mut self, n: usize) {
        self.nodes.faults.incomplete_frames = n;
    }

    /// Frames delivered per software trigger, like a burst or
    /// short-interval-shutter mode.
    pub fn set_frames_per_trigger(&mut self, n: usize) {
        self.nodes.faults.frames_per_trigger = n;
    }

    pub fn fail_begin_acquisition(&mut self) {
        self.nodes.faults.fail_begin_acquisition = true;
    }
}

impl Camera for SimCamera {
    fn init(&mut self) -> Result<()> {
        if self.released {
            return Err(Error::Sdk("camera already released".into()));
        }
        self.nodes.initialized = true;
        self.nodes.recorder.state.lock().inits += 1;
        Ok(())
    }

    fn deinit(&mut self) -> Result<()> {
        if self.nodes.streaming {
            self.end_acquisition()?;
        }
        self.nodes.initialized = false;
        self.nodes.recorder.state.lock().deinits += 1;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.nodes.initialized
    }

    fn node_map(&self) -> &dyn NodeMap {
        &self.nodes
    }

    fn node_map_mut(&mut self) -> &mut dyn NodeMap {
        &mut self.nodes
    }

    fn tl_device_node_map(&self) -> &dyn NodeMap {
        &self.tl_nodes
    }

    fn begin_acquisition(&mut self) -> Result<()> {
        if !self.nodes.initialized {
            return Err(Error::Sdk("camera not initialized".into()));
        }
        if self.nodes.streaming {
            return Err(Error::Sdk("acquisition already started".into()));
        }
        if self.nodes.faults.fail_begin_acquisition {
            return Err(Error::Sdk("failed to start stream: device busy".into()));
        }
        self.nodes.streaming = true;
        self.nodes.recorder.state.lock().acquisitions_begun += 1;
        Ok(())
    }

    fn end_acquisition(&mut self) -> Result<()> {
        if !self.nodes.streaming {
            return Err(Error::Sdk("acquisition not started".into()));
        }
        self.nodes.streaming = false;
        self.nodes.queue.clear();
        self.nodes.recorder.state.lock().acquisitions_ended += 1;
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.nodes.streaming
    }

    fn next_image(&mut self, timeout: Option<Duration>) -> Result<Image> {
        if !self.nodes.streaming {
            return Err(Error::Sdk("acquisition not started".into()));
        }
        // frames are produced synchronously, so an empty queue stays empty
        self.nodes.queue.pop_front().ok_or_else(|| {
            Error::Sdk(match timeout {
                Some(t) => format!("no image within {t:?}"),
                None => "no image pending".to_string(),
            })
        })
    }

    fn register_image_handler(&mut self, handler: Box<dyn ImageEventHandler>) {
        self.nodes.handler = Some(handler);
    }

    fn unregister_image_handler(&mut self) {
        self.nodes.handler = None;
    }

    fn release(&mut self) {
        self.released = true;
        self.nodes.handler = None;
        self.nodes.recorder.state.lock().camera_releases += 1;
    }
}

/// The simulated SDK entry point.
pub struct SimSystem {
    cameras: Vec<SimCamera>,
    recorder: SimRecorder,
}

impl Default for SimSystem {
    /// One attached camera.
    fn default() -> Self {
        SimSystem::with_cameras(vec![SimCamera::default()])
    }
}

impl SimSystem {
    /// A system with no camera attached.
    pub fn empty() -> Self {
        SimSystem::with_cameras(Vec::new())
    }

    /// Attach `cameras`; they all report to the system's recorder.
    pub fn with_cameras(mut cameras: Vec<SimCamera>) -> Self {
        let recorder = SimRecorder::default();
        for cam in &mut cameras {
            cam.attach_recorder(recorder.clone());
        }
        SimSystem { cameras, recorder }
    }

    pub fn recorder(&self) -> SimRecorder {
        self.recorder.clone()
    }
}

impl System for SimSystem {
    type Camera = SimCamera;

    fn name(&self) -> &str {
        "Simulated"
    }

    fn library_version(&self) -> LibraryVersion {
        LibraryVersion {
            major: 4,
            minor: 0,
            kind: 0,
            build: 116,
        }
    }

    /// Cameras are handed out once; later calls return an empty list.
    fn cameras(&mut self) -> Result<Vec<SimCamera>> {
        Ok(std::mem::take(&mut self.cameras))
    }

    fn release(&mut self) {
        self.recorder.state.lock().system_releases += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::features;

    fn camera() -> SimCamera {
        let mut cam = SimCamera::default();
        cam.init().unwrap();
        cam
    }

    fn arm_software_trigger(cam: &mut SimCamera) {
        let map = cam.node_map_mut();
        features::set_trigger_source(map, "Software").unwrap();
        features::set_trigger_mode(map, "On").unwrap();
    }

    #[test]
    fn nodes_hidden_until_init() {
        let mut cam = SimCamera::default();
        assert!(cam.node_map().node(names::GAIN).is_none());
        cam.init().unwrap();
        assert!(cam.node_map().node(names::GAIN).is_some());
        assert_eq!(cam.recorder().inits(), 1);
    }

    #[test]
    fn trigger_source_locked_while_trigger_mode_on() {
        let mut cam = camera();
        arm_software_trigger(&mut cam);
        assert!(matches!(
            features::set_trigger_source(cam.node_map_mut(), "Line0"),
            Err(Error::NodeNotWritable { .. })
        ));
    }

    #[test]
    fn geometry_locked_while_streaming() {
        let mut cam = camera();
        cam.begin_acquisition().unwrap();
        assert!(matches!(
            features::set_pixel_format(cam.node_map_mut(), "RGB8"),
            Err(Error::NodeNotWritable { .. })
        ));
        cam.end_acquisition().unwrap();
        features::set_pixel_format(cam.node_map_mut(), "RGB8").unwrap();
    }

    #[test]
    fn exposure_locked_under_auto() {
        let mut cam = camera();
        assert!(features::set_exposure_time(cam.node_map_mut(), 1000.0).is_err());
        features::set_exposure_auto(cam.node_map_mut(), "Off").unwrap();
        features::set_exposure_time(cam.node_map_mut(), 1000.0).unwrap();
    }

    #[test]
    fn offsets_shrink_size_range() {
        let mut cam = camera();
        features::set_width(cam.node_map_mut(), 320).unwrap();
        let (_, max_x, _) = features::int_range(cam.node_map(), names::OFFSET_X).unwrap();
        assert_eq!(max_x, i64::from(SENSOR_WIDTH) - 320);
        features::set_offset_x(cam.node_map_mut(), 400).unwrap();
        let (_, max_w, _) = features::int_range(cam.node_map(), names::WIDTH).unwrap();
        assert_eq!(max_w, i64::from(SENSOR_WIDTH) - 400);
    }

    #[test]
    fn balance_ratio_follows_selector() {
        let mut cam = camera();
        let map = cam.node_map_mut();
        features::set_balance_white_auto(map, "Off").unwrap();
        features::set_balance_ratio_selector(map, "Red").unwrap();
        features::set_balance_ratio(map, 2.0).unwrap();
        features::set_balance_ratio_selector(map, "Blue").unwrap();
        features::set_balance_ratio(map, 0.5).unwrap();
        features::set_balance_ratio_selector(map, "Red").unwrap();
        assert_eq!(features::balance_ratio(map).unwrap(), 2.0);
    }

    #[test]
    fn software_trigger_delivers_to_queue() {
        let mut cam = camera();
        features::set_pixel_format(cam.node_map_mut(), "Mono8").unwrap();
        arm_software_trigger(&mut cam);
        cam.begin_acquisition().unwrap();
        features::execute(cam.node_map_mut(), names::TRIGGER_SOFTWARE).unwrap();
        let image = cam.next_image(Some(Duration::from_millis(100))).unwrap();
        assert_eq!(image.pixel_format(), PixelFormat::Mono8);
        assert_eq!((image.width(), image.height()), (SENSOR_WIDTH, SENSOR_HEIGHT));
        assert!(cam.next_image(None).is_err());
    }

    #[test]
    fn software_trigger_unavailable_when_trigger_off() {
        let mut cam = camera();
        assert!(matches!(
            features::execute(cam.node_map_mut(), names::TRIGGER_SOFTWARE),
            Err(Error::NodeUnavailable { .. })
        ));
    }

    #[test]
    fn dropped_triggers_and_handler_delivery() {
        let mut cam = camera();
        arm_software_trigger(&mut cam);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        cam.register_image_handler(Box::new(move |_: &Image| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        cam.drop_next_triggers(2);
        cam.begin_acquisition().unwrap();
        for _ in 0..3 {
            features::execute(cam.node_map_mut(), names::TRIGGER_SOFTWARE).unwrap();
        }
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(cam.recorder().software_triggers(), 3);
        assert_eq!(cam.recorder().frames_delivered(), 1);
        // handler frames do not also land in the queue
        assert!(cam.next_image(None).is_err());
    }

    #[test]
    fn software_trigger_needs_software_source() {
        let mut cam = camera();
        features::set_trigger_source(cam.node_map_mut(), "Line0").unwrap();
        features::set_trigger_mode(cam.node_map_mut(), "On").unwrap();
        assert!(matches!(
            features::execute(cam.node_map_mut(), names::TRIGGER_SOFTWARE),
            Err(Error::NodeUnavailable { .. })
        ));
    }

    #[test]
    fn trigger_before_streaming_is_ignored() {
        let mut cam = camera();
        arm_software_trigger(&mut cam);
        features::execute(cam.node_map_mut(), names::TRIGGER_SOFTWARE).unwrap();
        assert_eq!(cam.recorder().software_triggers(), 1);
        assert_eq!(cam.recorder().frames_delivered(), 0);
    }

    #[test]
    fn non_finite_float_write_is_refused() {
        let mut cam = camera();
        features::set_bool(cam.node_map_mut(), names::GAMMA_ENABLE, true).unwrap();
        assert!(cam
            .node_map_mut()
            .write(names::GAMMA, Value::Float(f64::NAN))
            .is_err());
        assert_eq!(features::gamma(cam.node_map()).unwrap(), 0.8);
    }

    #[test]
    fn longer_exposure_is_brighter() {
        let mut cam = camera();
        let map = cam.node_map_mut();
        features::set_pixel_format(map, "Mono8").unwrap();
        features::set_exposure_auto(map, "Off").unwrap();
        arm_software_trigger(&mut cam);
        let mut mean_at = |us: f64| {
            features::set_exposure_time(cam.node_map_mut(), us).unwrap();
            cam.begin_acquisition().unwrap();
            features::execute(cam.node_map_mut(), names::TRIGGER_SOFTWARE).unwrap();
            let img = cam.next_image(None).unwrap();
            cam.end_acquisition().unwrap();
            img.data().iter().map(|&v| u64::from(v)).sum::<u64>() / img.data().len() as u64
        };
        let dim = mean_at(250_000.0);
        let bright = mean_at(1_000_000.0);
        assert!(bright > dim, "{bright} <= {dim}");
    }

    #[test]
    fn system_hands_out_cameras_once() {
        let mut system = SimSystem::default();
        assert_eq!(system.cameras().unwrap().len(), 1);
        assert!(system.cameras().unwrap().is_empty());
        system.release();
        assert_eq!(system.recorder().system_releases(), 1);
    }

    #[test]
    fn tl_map_is_read_only() {
        let mut cam = SimCamera::new("42");
        assert_eq!(
            features::string_value(cam.tl_device_node_map(), names::DEVICE_SERIAL_NUMBER)
                .unwrap(),
            "42"
        );
        let tl: &dyn NodeMap = cam.tl_device_node_map();
        assert!(tl.node("DeviceUserID").is_some());
        assert!(cam
            .tl_nodes
            .write(names::DEVICE_SERIAL_NUMBER, Value::String("x".into()))
            .is_err());
    }
}
