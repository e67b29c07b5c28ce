//! Transport link: one open USB connection to one panel.
//!
//! ## Sub-modules
//!
//! | Module       | Purpose                                          |
//! |--------------|--------------------------------------------------|
//! | `phase`      | Validated link state machine                     |
//! | `throughput` | Frames and bytes sent since the last report      |
//! | `usb`        | `rusb`-backed [`UsbBackend`]                     |
//!
//! The link itself only knows the [`UsbBackend`] / [`UsbWriter`] seams, so
//! tests drive it with an in-memory fake.

pub mod phase;
pub mod throughput;
pub mod usb;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::DeviceSelector;
use crate::encoder::EncodedFrame;
use crate::error::LcdError;
use crate::profile::{DeviceId, DeviceProfile, ProfileRegistry};

pub use phase::LinkPhase;
pub use throughput::{ThroughputMeter, ThroughputReport};
pub use usb::RusbBackend;

// ── Backend seam ─────────────────────────────────────────────────

/// One attached USB device as seen during enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsbDeviceInfo {
    pub id: DeviceId,
    pub bus: u8,
    pub address: u8,
}

/// Write half of an opened device.
pub trait UsbWriter: Send {
    /// Write one packet; returns the number of bytes accepted.
    fn write(&mut self, data: &[u8]) -> Result<usize, LcdError>;
}

/// Host USB stack.
pub trait UsbBackend: Send + Sync {
    fn enumerate(&self) -> Result<Vec<UsbDeviceInfo>, LcdError>;

    /// Open `info`, claim the profile's interface and locate its OUT
    /// endpoint.
    fn open(
        &self,
        info: &UsbDeviceInfo,
        profile: &DeviceProfile,
        write_timeout: Duration,
    ) -> Result<Box<dyn UsbWriter>, LcdError>;
}

/// Attached devices that the registry knows, in enumeration order.
pub fn supported_devices(
    backend: &dyn UsbBackend,
    registry: &ProfileRegistry,
) -> Result<Vec<(UsbDeviceInfo, DeviceProfile)>, LcdError> {
    Ok(backend
        .enumerate()?
        .into_iter()
        .filter_map(|info| registry.lookup(info.id).map(|p| (info, p.clone())))
        .collect())
}

// ── LinkStats ────────────────────────────────────────────────────

/// Cumulative counters for one link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub frames_sent: u64,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub connects: u64,
    pub failures: u64,
}

// ── TransportLink ────────────────────────────────────────────────

struct OpenDevice {
    info: UsbDeviceInfo,
    profile: DeviceProfile,
    writer: Box<dyn UsbWriter>,
}

/// A single writer over a single device.
pub struct TransportLink {
    registry: Arc<ProfileRegistry>,
    backend: Arc<dyn UsbBackend>,
    write_timeout: Duration,
    phase: LinkPhase,
    device: Option<OpenDevice>,
    stats: LinkStats,
    throughput: ThroughputMeter,
}

impl TransportLink {
    pub fn new(
        registry: Arc<ProfileRegistry>,
        backend: Arc<dyn UsbBackend>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            backend,
            write_timeout,
            phase: LinkPhase::Disconnected,
            device: None,
            stats: LinkStats::default(),
            throughput: ThroughputMeter::default(),
        }
    }

    pub fn phase(&self) -> &LinkPhase {
        &self.phase
    }

    pub fn is_connected(&self) -> bool {
        self.phase.is_connected()
    }

    /// Profile of the connected device.
    pub fn profile(&self) -> Option<&DeviceProfile> {
        self.device.as_ref().map(|d| &d.profile)
    }

    pub fn device_info(&self) -> Option<&UsbDeviceInfo> {
        self.device.as_ref().map(|d| &d.info)
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    pub fn throughput(&self) -> &ThroughputMeter {
        &self.throughput
    }

    /// Throughput since the previous call, `elapsed` ago.
    pub fn drain_throughput(&mut self, elapsed: Duration) -> ThroughputReport {
        self.throughput.drain(elapsed)
    }

    pub fn set_write_timeout(&mut self, timeout: Duration) {
        self.write_timeout = timeout;
    }

    /// Move the link out, leaving a disconnected one on the same backend
    /// in its place. Used to hand the link to a blocking thread.
    pub fn take(&mut self) -> TransportLink {
        let empty = TransportLink::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.backend),
            self.write_timeout,
        );
        std::mem::replace(self, empty)
    }

    /// Open the `selector.index`-th attached device that both the registry
    /// and the selector accept.
    pub fn connect(&mut self, selector: &DeviceSelector) -> Result<&DeviceProfile, LcdError> {
        self.phase.begin_connect()?;
        match self.open_matching(selector) {
            Ok(device) => {
                self.phase.complete_connect()?;
                self.stats.connects += 1;
                tracing::info!(
                    "connected to {} ({}) on bus {} address {}",
                    device.profile.name,
                    device.info.id,
                    device.info.bus,
                    device.info.address
                );
                Ok(&self.device.insert(device).profile)
            }
            Err(e) => {
                self.phase.disconnect()?;
                Err(e)
            }
        }
    }

    fn open_matching(&self, selector: &DeviceSelector) -> Result<OpenDevice, LcdError> {
        let (info, profile) = supported_devices(self.backend.as_ref(), &self.registry)?
            .into_iter()
            .filter(|(info, _)| selector.matches(info.id))
            .nth(selector.index)
            .ok_or_else(|| LcdError::DeviceNotFound(selector.describe()))?;
        let writer = self.backend.open(&info, &profile, self.write_timeout)?;
        Ok(OpenDevice {
            info,
            profile,
            writer,
        })
    }

    /// Write every packet of `frame` in order.
    ///
    /// Any failed or short write drops the device and returns
    /// [`LcdError::LinkLost`]; the frame is not retried.
    pub fn send(&mut self, frame: &EncodedFrame) -> Result<(), LcdError> {
        if !self.phase.is_connected() {
            return Err(LcdError::LinkLost(format!("link is {}", self.phase)));
        }
        let Some(device) = self.device.as_mut() else {
            return Err(LcdError::LinkLost("no device open".into()));
        };
        if frame.device != device.profile.id {
            return Err(LcdError::ProfileMismatch {
                expected: device.profile.id,
                actual: frame.device,
            });
        }

        let started = Instant::now();
        for packet in &frame.packets {
            let result = device.writer.write(&packet.data);
            let failure = match result {
                Ok(n) if n == packet.data.len() => None,
                Ok(n) => Some(format!(
                    "short write on packet {}: {n} of {} bytes",
                    packet.index,
                    packet.data.len()
                )),
                Err(e) => Some(format!("packet {}: {e}", packet.index)),
            };
            if let Some(reason) = failure {
                return Err(self.fail(reason));
            }
            self.stats.packets_sent += 1;
            self.stats.bytes_sent += packet.data.len() as u64;
        }

        self.stats.frames_sent += 1;
        self.throughput
            .record(frame.total_bytes() as u64, started.elapsed());
        tracing::trace!(
            "sent frame {} ({} packets)",
            frame.sequence,
            frame.packet_count()
        );
        Ok(())
    }

    fn fail(&mut self, reason: String) -> LcdError {
        tracing::warn!("link lost: {reason}");
        self.device = None;
        self.stats.failures += 1;
        let _ = self.phase.disconnect();
        LcdError::LinkLost(reason)
    }

    /// Release the device but allow a later [`connect`](Self::connect).
    pub fn disconnect(&mut self) {
        if self.device.take().is_some() {
            tracing::info!("released device");
        }
        let _ = self.phase.disconnect();
    }

    /// Release the device for good.
    pub fn close(&mut self) {
        self.device = None;
        self.phase.close();
    }
}

impl Drop for TransportLink {
    fn drop(&mut self) {
        self.close();
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::encoder_for;
    use crate::types::Frame;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Shared {
        devices: Vec<UsbDeviceInfo>,
        busy: bool,
        writes: Vec<usize>,
        fail_after: Option<usize>,
        short: bool,
    }

    #[derive(Clone, Default)]
    struct Fake(Arc<Mutex<Shared>>);

    struct FakeWriter(Arc<Mutex<Shared>>);

    impl UsbWriter for FakeWriter {
        fn write(&mut self, data: &[u8]) -> Result<usize, LcdError> {
            let mut s = self.0.lock().unwrap();
            if s.fail_after.is_some_and(|n| s.writes.len() >= n) {
                return Err(LcdError::LinkLost("pipe error".into()));
            }
            s.writes.push(data.len());
            Ok(if s.short { data.len() - 1 } else { data.len() })
        }
    }

    impl UsbBackend for Fake {
        fn enumerate(&self) -> Result<Vec<UsbDeviceInfo>, LcdError> {
            Ok(self.0.lock().unwrap().devices.clone())
        }

        fn open(
            &self,
            _info: &UsbDeviceInfo,
            _profile: &DeviceProfile,
            _timeout: Duration,
        ) -> Result<Box<dyn UsbWriter>, LcdError> {
            if self.0.lock().unwrap().busy {
                return Err(LcdError::DeviceBusy("claimed".into()));
            }
            Ok(Box::new(FakeWriter(Arc::clone(&self.0))))
        }
    }

    fn info(vid: u16, pid: u16, address: u8) -> UsbDeviceInfo {
        UsbDeviceInfo {
            id: DeviceId::new(vid, pid),
            bus: 1,
            address,
        }
    }

    fn link(fake: &Fake) -> TransportLink {
        TransportLink::new(
            Arc::new(ProfileRegistry::builtin()),
            Arc::new(fake.clone()),
            Duration::from_millis(100),
        )
    }

    fn encoded(profile: &DeviceProfile) -> EncodedFrame {
        let res = profile.native_resolution();
        encoder_for(profile, res)
            .unwrap()
            .encode(&Frame::blank(res, 0))
            .unwrap()
    }

    #[test]
    fn connect_skips_unknown_devices() {
        let fake = Fake::default();
        fake.0.lock().unwrap().devices = vec![info(0x1234, 0x0001, 1), info(0x0418, 0x5304, 2)];
        let mut link = link(&fake);
        let profile = link.connect(&DeviceSelector::default()).unwrap();
        assert_eq!(profile.id, DeviceId::new(0x0418, 0x5304));
        assert!(link.is_connected());
        assert_eq!(link.device_info().unwrap().address, 2);
    }

    #[test]
    fn selector_index_picks_nth_match() {
        let fake = Fake::default();
        fake.0.lock().unwrap().devices = vec![info(0x0416, 0x5302, 1), info(0x0416, 0x5302, 2)];
        let mut link = link(&fake);
        let sel = DeviceSelector {
            index: 1,
            ..DeviceSelector::for_device(DeviceId::new(0x0416, 0x5302))
        };
        link.connect(&sel).unwrap();
        assert_eq!(link.device_info().unwrap().address, 2);
    }

    #[test]
    fn no_match_is_device_not_found() {
        let fake = Fake::default();
        fake.0.lock().unwrap().devices = vec![info(0x1234, 0x0001, 1)];
        let mut link = link(&fake);
        assert!(matches!(
            link.connect(&DeviceSelector::default()),
            Err(LcdError::DeviceNotFound(_))
        ));
        assert_eq!(link.phase(), &LinkPhase::Disconnected);
    }

    #[test]
    fn busy_device() {
        let fake = Fake::default();
        {
            let mut s = fake.0.lock().unwrap();
            s.devices = vec![info(0x0416, 0x5302, 1)];
            s.busy = true;
        }
        let mut link = link(&fake);
        assert!(matches!(
            link.connect(&DeviceSelector::default()),
            Err(LcdError::DeviceBusy(_))
        ));
        assert!(!link.is_connected());
    }

    #[test]
    fn send_writes_packets_in_order() {
        let fake = Fake::default();
        fake.0.lock().unwrap().devices = vec![info(0x87AD, 0x70DB, 1)];
        let mut link = link(&fake);
        let profile = link.connect(&DeviceSelector::default()).unwrap().clone();
        let frame = encoded(&profile);
        link.send(&frame).unwrap();

        let writes = fake.0.lock().unwrap().writes.clone();
        let expected: Vec<usize> = frame.packets.iter().map(|p| p.data.len()).collect();
        assert_eq!(writes, expected);

        let stats = link.stats();
        assert_eq!(stats.frames_sent, 1);
        assert_eq!(stats.packets_sent, frame.packet_count() as u64);
        assert_eq!(stats.bytes_sent, frame.total_bytes() as u64);
        assert_eq!(link.throughput().frames(), 1);
    }

    #[test]
    fn failed_write_is_link_lost() {
        let fake = Fake::default();
        {
            let mut s = fake.0.lock().unwrap();
            s.devices = vec![info(0x0416, 0x5302, 1)];
            s.fail_after = Some(3);
        }
        let mut link = link(&fake);
        let profile = link.connect(&DeviceSelector::default()).unwrap().clone();
        let frame = encoded(&profile);
        assert!(matches!(link.send(&frame), Err(LcdError::LinkLost(_))));
        assert_eq!(link.phase(), &LinkPhase::Disconnected);
        assert!(link.profile().is_none());
        // No mid-frame retry.
        assert_eq!(fake.0.lock().unwrap().writes.len(), 3);
        assert_eq!(link.stats().failures, 1);
    }

    #[test]
    fn short_write_is_link_lost() {
        let fake = Fake::default();
        {
            let mut s = fake.0.lock().unwrap();
            s.devices = vec![info(0x0416, 0x5302, 1)];
            s.short = true;
        }
        let mut link = link(&fake);
        let profile = link.connect(&DeviceSelector::default()).unwrap().clone();
        assert!(matches!(
            link.send(&encoded(&profile)),
            Err(LcdError::LinkLost(_))
        ));
        assert!(!link.is_connected());
    }

    #[test]
    fn frame_for_other_device_is_rejected() {
        let fake = Fake::default();
        fake.0.lock().unwrap().devices = vec![info(0x0416, 0x5302, 1)];
        let mut link = link(&fake);
        link.connect(&DeviceSelector::default()).unwrap();

        let reg = ProfileRegistry::builtin();
        let other = reg.lookup(DeviceId::new(0x87AD, 0x70DB)).unwrap();
        assert!(matches!(
            link.send(&encoded(other)),
            Err(LcdError::ProfileMismatch { .. })
        ));
        // Mismatch is a wiring bug, not a link failure.
        assert!(link.is_connected());
    }

    #[test]
    fn send_without_connect_is_link_lost() {
        let fake = Fake::default();
        let mut link = link(&fake);
        let reg = ProfileRegistry::builtin();
        let p = reg.lookup(DeviceId::new(0x0416, 0x5302)).unwrap();
        assert!(matches!(link.send(&encoded(p)), Err(LcdError::LinkLost(_))));
    }

    #[test]
    fn close_is_terminal() {
        let fake = Fake::default();
        fake.0.lock().unwrap().devices = vec![info(0x0416, 0x5302, 1)];
        let mut link = link(&fake);
        link.connect(&DeviceSelector::default()).unwrap();
        link.close();
        assert!(link.phase().is_closed());
        assert!(matches!(
            link.connect(&DeviceSelector::default()),
            Err(LcdError::InvalidTransition(_))
        ));
    }

    #[test]
    fn disconnect_allows_reconnect() {
        let fake = Fake::default();
        fake.0.lock().unwrap().devices = vec![info(0x0416, 0x5302, 1)];
        let mut link = link(&fake);
        link.connect(&DeviceSelector::default()).unwrap();
        link.disconnect();
        assert!(link.connect(&DeviceSelector::default()).is_ok());
        assert_eq!(link.stats().connects, 2);
    }

    #[test]
    fn take_moves_the_open_device() {
        let fake = Fake::default();
        fake.0.lock().unwrap().devices = vec![info(0x0416, 0x5302, 1)];
        let mut link = link(&fake);
        let profile = link.connect(&DeviceSelector::default()).unwrap().clone();

        let mut moved = link.take();
        assert!(!link.is_connected());
        assert!(moved.is_connected());
        assert!(moved.send(&encoded(&profile)).is_ok());

        link = moved;
        assert_eq!(link.stats().frames_sent, 1);
    }
}
