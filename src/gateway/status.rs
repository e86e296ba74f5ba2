//! Network status record for the peer.
//!
//! # Record Layout (little-endian, 136 bytes)
//! ```text
//! 0   u32  format version
//! 4   [4]  local IPv4 address, network order
//! 8   u32  free memory
//! 12  u32  last reset cause
//! 16  u32  flash size
//! 20  u16  operating mode (0 unknown, 1 client, 2 access point)
//! 22  u16  supply voltage, mV
//! 24  [16] firmware version
//! 40  [64] host name
//! 104 [32] network name
//! ```
//!
//! Strings are truncated to their field and null-padded; a string that fills
//! its field exactly carries no terminator.

use std::net::Ipv4Addr;

use crate::bus::engine::TransactionEngine;
use crate::bus::frame::{Opcode, ScheduleError};
use crate::bus::transport::BusTransport;
use crate::config::{DeviceConfig, OperatingMode};

pub const STATUS_RECORD_LEN: usize = 136;
pub const STATUS_FORMAT_VERSION: u32 = 1;

const FIRMWARE_LEN: usize = 16;
const HOSTNAME_LEN: usize = 64;
const NETWORK_NAME_LEN: usize = 32;

/// Platform-dependent values of the status record.
pub trait DeviceSensors: Send {
    fn free_memory(&self) -> u32;
    fn reset_cause(&self) -> u32;
    fn flash_size(&self) -> u32;
    fn supply_mv(&self) -> u16;
}

/// Sensors of a regular host: memory from `/proc/meminfo`, the rest configured.
#[derive(Debug, Clone)]
pub struct HostSensors {
    reset_cause: u32,
    flash_size: u32,
    supply_mv: u16,
}

impl HostSensors {
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self {
            reset_cause: config.reset_cause,
            flash_size: config.flash_size,
            supply_mv: config.supply_mv,
        }
    }
}

impl DeviceSensors for HostSensors {
    fn free_memory(&self) -> u32 {
        std::fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|meminfo| parse_mem_available(&meminfo))
            .map(|bytes| u32::try_from(bytes).unwrap_or(u32::MAX))
            .unwrap_or(0)
    }

    fn reset_cause(&self) -> u32 {
        self.reset_cause
    }

    fn flash_size(&self) -> u32 {
        self.flash_size
    }

    fn supply_mv(&self) -> u16 {
        self.supply_mv
    }
}

/// `MemAvailable` in bytes.
fn parse_mem_available(meminfo: &str) -> Option<u64> {
    let line = meminfo.lines().find(|l| l.starts_with("MemAvailable:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024)
}

/// Decoded status record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord {
    pub ip: Ipv4Addr,
    pub free_memory: u32,
    pub reset_cause: u32,
    pub flash_size: u32,
    pub mode: OperatingMode,
    pub supply_mv: u16,
    pub firmware_version: String,
    pub hostname: String,
    pub network_name: String,
}

impl StatusRecord {
    pub fn encode(&self) -> [u8; STATUS_RECORD_LEN] {
        let mut out = [0u8; STATUS_RECORD_LEN];
        out[0..4].copy_from_slice(&STATUS_FORMAT_VERSION.to_le_bytes());
        out[4..8].copy_from_slice(&self.ip.octets());
        out[8..12].copy_from_slice(&self.free_memory.to_le_bytes());
        out[12..16].copy_from_slice(&self.reset_cause.to_le_bytes());
        out[16..20].copy_from_slice(&self.flash_size.to_le_bytes());
        out[20..22].copy_from_slice(&mode_code(self.mode).to_le_bytes());
        out[22..24].copy_from_slice(&self.supply_mv.to_le_bytes());
        put_str(&mut out[24..24 + FIRMWARE_LEN], &self.firmware_version);
        put_str(&mut out[40..40 + HOSTNAME_LEN], &self.hostname);
        put_str(&mut out[104..104 + NETWORK_NAME_LEN], &self.network_name);
        out
    }
}

fn mode_code(mode: OperatingMode) -> u16 {
    match mode {
        OperatingMode::Unknown => 0,
        OperatingMode::Client => 1,
        OperatingMode::AccessPoint => 2,
    }
}

fn put_str(field: &mut [u8], value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(field.len());
    field[..len].copy_from_slice(&bytes[..len]);
}

/// Builds and sends the status record.
pub struct StatusPublisher {
    device: DeviceConfig,
    fallback_ip: Ipv4Addr,
    sensors: Box<dyn DeviceSensors>,
}

impl StatusPublisher {
    pub fn new(
        device: DeviceConfig,
        fallback_ip: Ipv4Addr,
        sensors: Box<dyn DeviceSensors>,
    ) -> Self {
        Self {
            device,
            fallback_ip,
            sensors,
        }
    }

    /// Publisher backed by [`HostSensors`].
    pub fn from_config(device: &DeviceConfig, fallback_ip: Ipv4Addr) -> Self {
        Self::new(
            device.clone(),
            fallback_ip,
            Box::new(HostSensors::from_config(device)),
        )
    }

    pub fn set_device(&mut self, device: DeviceConfig) {
        self.device = device;
    }

    pub fn snapshot(&self) -> StatusRecord {
        let network_name = match self.device.mode {
            OperatingMode::Client => self.device.network_name.clone(),
            OperatingMode::AccessPoint => self.device.ap_name.clone(),
            OperatingMode::Unknown => String::new(),
        };
        StatusRecord {
            ip: self.device.local_ip.unwrap_or(self.fallback_ip),
            free_memory: self.sensors.free_memory(),
            reset_cause: self.sensors.reset_cause(),
            flash_size: self.sensors.flash_size(),
            mode: self.device.mode,
            supply_mv: self.sensors.supply_mv(),
            firmware_version: self.device.firmware_version.clone(),
            hostname: self.device.hostname.clone(),
            network_name,
        }
    }

    /// Push the record to the peer as an info message. Failure is not an error.
    pub fn publish<T: BusTransport>(&self, engine: &mut TransactionEngine<T>) {
        let record = self.snapshot().encode();
        match engine.schedule_info(Opcode::NETWORK_INFO, &record) {
            Ok(()) => tracing::debug!("Network status scheduled"),
            Err(e) => tracing::debug!(error = %e, "Network status not sent"),
        }
    }

    /// Answer a peer's get-network-info request.
    pub fn reply<T: BusTransport>(
        &self,
        engine: &mut TransactionEngine<T>,
    ) -> Result<(), ScheduleError> {
        let record = self.snapshot().encode();
        engine.schedule_reply(Opcode::GET_NETWORK_INFO, &record)
    }
}
