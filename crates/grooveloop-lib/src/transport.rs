//! USB transport — enumeration, connect/claim, interrupt I/O.
//!
//! Everything above this module talks to the pedal through the [`LooperBus`]
//! trait; the [`UsbTransport`] implementation drives the real device via
//! libusb and the [`mock::MockBus`] drives tests.

use std::fmt;
use std::time::Duration;

use rusb::{Context, DeviceHandle, UsbContext};

use crate::models::DeviceDescriptor;
use crate::protocol::{PRODUCT_ID, VENDOR_ID};

/// Timeout for every interrupt transfer.
pub const TRANSFER_TIMEOUT: Duration = Duration::from_secs(5);

/// Interfaces the protocol needs claimed.
const CLAIMED_INTERFACES: [u8; 2] = [0, 1];

/// Fallback product name when the string descriptor is missing or unreadable.
const FALLBACK_NAME: &str = "Mooer Device";

// ── Error type ──

/// Transport and session errors.
#[derive(Debug)]
pub enum DeviceError {
    NotFound,
    PermissionDenied,
    ConnectFailed(String),
    NotConnected,
    /// An interrupt transfer hit the 5-second timeout. Non-fatal on the
    /// status endpoint, fatal mid-chunk on the data endpoint.
    Timeout,
    TransferFailed(String),
    NoSuchTrack(u8),
    InvalidSlot(u8),
    /// The stop flag was observed; a clean exit, not a failure.
    Cancelled,
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::NotFound => write!(f, "Groove Loop device not found"),
            DeviceError::PermissionDenied => {
                write!(f, "Permission denied opening the device (udev rule missing?)")
            }
            DeviceError::ConnectFailed(e) => write!(f, "Failed to connect: {e}"),
            DeviceError::NotConnected => write!(f, "Not connected to a device"),
            DeviceError::Timeout => write!(f, "Device timed out"),
            DeviceError::TransferFailed(e) => write!(f, "Transfer failed: {e}"),
            DeviceError::NoSuchTrack(slot) => write!(f, "Slot {slot} holds no track"),
            DeviceError::InvalidSlot(slot) => {
                write!(f, "Slot {slot} is out of range (0-99)")
            }
            DeviceError::Cancelled => write!(f, "Operation cancelled"),
        }
    }
}

impl std::error::Error for DeviceError {}

pub type Result<T> = std::result::Result<T, DeviceError>;

// ── Bus trait ──

/// Byte-level access to the pedal's endpoints.
///
/// Both calls block for at most [`TRANSFER_TIMEOUT`]. `read` may return
/// fewer bytes than requested without error; a timeout is surfaced as
/// [`DeviceError::Timeout`] and the caller decides whether that is fatal
/// for the endpoint in question.
pub trait LooperBus {
    fn write(&self, endpoint: u8, data: &[u8]) -> Result<usize>;
    fn read(&self, endpoint: u8, len: usize) -> Result<Vec<u8>>;

    /// `(bus, address)` of the underlying device, for hotplug identity
    /// checks by the front-end.
    fn identity(&self) -> (u8, u8) {
        (0, 0)
    }
}

// ── Enumeration ──

/// List every Mooer device on the bus, probing each for accessibility.
///
/// Opening is attempted on each match purely to learn whether we *can*
/// (permissions) and to fetch the name/serial strings; the handle is closed
/// again immediately. Returns an empty list when libusb itself is
/// unavailable.
pub fn enumerate() -> Vec<DeviceDescriptor> {
    let ctx = match Context::new() {
        Ok(ctx) => ctx,
        Err(e) => {
            log::warn!("USB context init failed: {e}");
            return Vec::new();
        }
    };
    let devices = match ctx.devices() {
        Ok(list) => list,
        Err(e) => {
            log::warn!("USB enumeration failed: {e}");
            return Vec::new();
        }
    };

    let mut found = Vec::new();
    for device in devices.iter() {
        let Ok(desc) = device.device_descriptor() else {
            continue;
        };
        if desc.vendor_id() != VENDOR_ID {
            continue;
        }

        let mut info = DeviceDescriptor {
            vid: desc.vendor_id(),
            pid: desc.product_id(),
            bus: device.bus_number(),
            address: device.address(),
            name: String::new(),
            serial: None,
            accessible: false,
        };

        match device.open() {
            Ok(handle) => {
                info.accessible = true;
                if let Ok(languages) = handle.read_languages(TRANSFER_TIMEOUT)
                    && let Some(&language) = languages.first()
                {
                    if let Ok(name) = handle.read_product_string(language, &desc, TRANSFER_TIMEOUT)
                    {
                        info.name = name;
                    }
                    info.serial = handle
                        .read_serial_number_string(language, &desc, TRANSFER_TIMEOUT)
                        .ok();
                }
            }
            Err(e) => {
                log::debug!(
                    "cannot open {:03}/{:03}: {e}",
                    info.bus,
                    info.address
                );
            }
        }

        if info.name.is_empty() {
            info.name = FALLBACK_NAME.into();
        }
        found.push(info);
    }
    found
}

// ── USB implementation ──

/// An opened, claimed Groove Loop device.
///
/// Exclusive: one transport per process. Claims interfaces 0 and 1 on
/// connect (detaching the kernel driver where active) and releases both on
/// `disconnect` or drop.
pub struct UsbTransport {
    handle: DeviceHandle<Context>,
    bus: u8,
    address: u8,
    connected: bool,
}

impl UsbTransport {
    /// Open the first device matching the Groove Loop VID/PID.
    pub fn connect_first() -> Result<Self> {
        Self::connect_matching(|bus, address, is_product| {
            let _ = (bus, address);
            is_product
        })
    }

    /// Open the device at a specific bus/address from enumeration.
    pub fn connect(bus: u8, address: u8) -> Result<Self> {
        Self::connect_matching(move |b, a, _| b == bus && a == address)
    }

    fn connect_matching(matches: impl Fn(u8, u8, bool) -> bool) -> Result<Self> {
        let ctx = Context::new().map_err(|e| DeviceError::ConnectFailed(e.to_string()))?;
        let devices = ctx
            .devices()
            .map_err(|e| DeviceError::ConnectFailed(e.to_string()))?;

        for device in devices.iter() {
            let Ok(desc) = device.device_descriptor() else {
                continue;
            };
            if desc.vendor_id() != VENDOR_ID {
                continue;
            }
            let is_product = desc.product_id() == PRODUCT_ID;
            if !matches(device.bus_number(), device.address(), is_product) {
                continue;
            }

            let handle = device.open().map_err(|e| match e {
                rusb::Error::Access => DeviceError::PermissionDenied,
                e => DeviceError::ConnectFailed(format!("USB open: {e}")),
            })?;
            let mut transport = UsbTransport {
                handle,
                bus: device.bus_number(),
                address: device.address(),
                connected: false,
            };
            transport.claim()?;
            return Ok(transport);
        }
        Err(DeviceError::NotFound)
    }

    fn claim(&mut self) -> Result<()> {
        for (i, &iface) in CLAIMED_INTERFACES.iter().enumerate() {
            if self.handle.kernel_driver_active(iface).unwrap_or(false) {
                if let Err(e) = self.handle.detach_kernel_driver(iface) {
                    log::warn!("kernel driver detach on interface {iface}: {e}");
                }
            }
            if let Err(e) = self.handle.claim_interface(iface) {
                // Release whatever was claimed before this one.
                for &claimed in &CLAIMED_INTERFACES[..i] {
                    let _ = self.handle.release_interface(claimed);
                }
                return Err(DeviceError::ConnectFailed(format!(
                    "claim interface {iface}: {e}"
                )));
            }
        }
        self.connected = true;
        Ok(())
    }

    /// Release both interfaces and mark the transport closed. Idempotent;
    /// the handle itself closes when the transport drops.
    pub fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        for &iface in &CLAIMED_INTERFACES {
            let _ = self.handle.release_interface(iface);
        }
        self.connected = false;
    }
}

impl LooperBus for UsbTransport {
    fn write(&self, endpoint: u8, data: &[u8]) -> Result<usize> {
        if !self.connected {
            return Err(DeviceError::NotConnected);
        }
        match self.handle.write_interrupt(endpoint, data, TRANSFER_TIMEOUT) {
            Ok(n) => Ok(n),
            Err(rusb::Error::Timeout) => Err(DeviceError::Timeout),
            Err(e) => Err(DeviceError::TransferFailed(format!(
                "write to endpoint 0x{endpoint:02X}: {e}"
            ))),
        }
    }

    fn read(&self, endpoint: u8, len: usize) -> Result<Vec<u8>> {
        if !self.connected {
            return Err(DeviceError::NotConnected);
        }
        let mut buf = vec![0u8; len];
        match self.handle.read_interrupt(endpoint, &mut buf, TRANSFER_TIMEOUT) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(rusb::Error::Timeout) => Err(DeviceError::Timeout),
            Err(e) => Err(DeviceError::TransferFailed(format!(
                "read from endpoint 0x{endpoint:02X}: {e}"
            ))),
        }
    }

    fn identity(&self) -> (u8, u8) {
        (self.bus, self.address)
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ── udev helper (Linux) ──

/// Path the permission rule is expected at.
pub const UDEV_RULE_PATH: &str = "/etc/udev/rules.d/99-mooer-looper.rules";

/// Rule body granting unprivileged access to the pedal. Installation is the
/// operator's job (it needs root); the library only detects and renders.
pub fn udev_rule_contents() -> String {
    format!(
        "# Mooer GL100/GL200 Looper Pedal\n\
         SUBSYSTEM==\"usb\", ATTRS{{idVendor}}==\"{VENDOR_ID:04x}\", \
         MODE=\"0666\", TAG+=\"uaccess\"\n"
    )
}

/// Whether the udev rule file is missing. Always `false` off Linux.
pub fn udev_rule_needed() -> bool {
    #[cfg(target_os = "linux")]
    {
        !std::path::Path::new(UDEV_RULE_PATH).exists()
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

// ── Mock bus for testing ──

/// In-memory bus for unit and integration tests.
///
/// Always compiled (zero runtime cost), hidden from public docs.
#[doc(hidden)]
pub mod mock {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use crate::protocol::{EP_IN_STATUS, STATUS_SIZE};

    /// Scripted bus: reads pop from per-endpoint queues, writes are
    /// recorded. An empty queue behaves like a device that never answers
    /// (`Timeout`), which is what a silent endpoint looks like in practice.
    #[derive(Default)]
    pub struct MockBus {
        reads: Mutex<HashMap<u8, VecDeque<Vec<u8>>>>,
        writes: Mutex<Vec<(u8, Vec<u8>)>>,
        /// Artificial per-read delay, for tests that need an in-flight job.
        read_delay: Mutex<Option<Duration>>,
        pub identity: (u8, u8),
    }

    impl MockBus {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue the next response for reads on `endpoint`.
        pub fn queue_read(&self, endpoint: u8, data: Vec<u8>) {
            self.reads
                .lock()
                .unwrap()
                .entry(endpoint)
                .or_default()
                .push_back(data);
        }

        /// Queue a 64-byte all-zero status acknowledgement.
        pub fn queue_status_ack(&self) {
            self.queue_read(EP_IN_STATUS, vec![0u8; STATUS_SIZE]);
        }

        /// Snapshot of all recorded writes as `(endpoint, bytes)`.
        pub fn writes(&self) -> Vec<(u8, Vec<u8>)> {
            self.writes.lock().unwrap().clone()
        }

        /// Make every read sleep first, so tests can observe a running job.
        pub fn set_read_delay(&self, delay: Duration) {
            *self.read_delay.lock().unwrap() = Some(delay);
        }

        /// Number of responses still queued for `endpoint`.
        pub fn queued(&self, endpoint: u8) -> usize {
            self.reads
                .lock()
                .unwrap()
                .get(&endpoint)
                .map_or(0, VecDeque::len)
        }
    }

    impl LooperBus for MockBus {
        fn write(&self, endpoint: u8, data: &[u8]) -> Result<usize> {
            self.writes.lock().unwrap().push((endpoint, data.to_vec()));
            Ok(data.len())
        }

        fn read(&self, endpoint: u8, len: usize) -> Result<Vec<u8>> {
            if let Some(delay) = *self.read_delay.lock().unwrap() {
                std::thread::sleep(delay);
            }
            match self
                .reads
                .lock()
                .unwrap()
                .get_mut(&endpoint)
                .and_then(VecDeque::pop_front)
            {
                Some(mut data) => {
                    data.truncate(len);
                    Ok(data)
                }
                None => Err(DeviceError::Timeout),
            }
        }

        fn identity(&self) -> (u8, u8) {
            self.identity
        }
    }
}
