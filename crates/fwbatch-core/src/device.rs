//! Device-side types: the target device, core selectors and command options.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// An attached device as seen by the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Sandbox-assigned device id.
    pub id: u64,
    /// Stable identifier used to address the device; required to run a batch.
    #[serde(default)]
    pub serial_number: Option<String>,
    /// Capabilities of the device.
    #[serde(default)]
    pub traits: DeviceTraits,
}

impl Device {
    /// Create a device with the given id and serial number.
    pub fn new(id: u64, serial_number: impl Into<String>) -> Self {
        Self {
            id,
            serial_number: Some(serial_number.into()),
            traits: DeviceTraits::default(),
        }
    }
}

/// CPU core of a multi-core device that an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceCore {
    Application,
    Modem,
    Network,
}

impl DeviceCore {
    /// Name passed to the sandbox's `--core` argument.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Application => "Application",
            Self::Modem => "Modem",
            Self::Network => "Network",
        }
    }
}

impl fmt::Display for DeviceCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of reset performed by `reset` or after programming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResetKind {
    ResetSystem,
    ResetHard,
    ResetDebug,
    ResetPin,
}

impl ResetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResetSystem => "RESET_SYSTEM",
            Self::ResetHard => "RESET_HARD",
            Self::ResetDebug => "RESET_DEBUG",
            Self::ResetPin => "RESET_PIN",
        }
    }
}

impl fmt::Display for ResetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capabilities of a device. Enabled traits tell the sandbox which
/// programming path to use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceTraits {
    pub jlink: bool,
    pub nordic_usb: bool,
    pub nordic_dfu: bool,
    pub segger_usb: bool,
    pub serial_ports: bool,
    pub mcu_boot: bool,
    pub modem: bool,
    pub broken: bool,
    pub usb: bool,
}

impl DeviceTraits {
    /// Sandbox arguments selecting these traits, e.g. `--traits jlink,mcuBoot`.
    ///
    /// Empty if no trait is enabled.
    pub fn to_args(&self) -> Vec<String> {
        let enabled: Vec<&str> = [
            (self.jlink, "jlink"),
            (self.nordic_usb, "nordicUsb"),
            (self.nordic_dfu, "nordicDfu"),
            (self.segger_usb, "seggerUsb"),
            (self.serial_ports, "serialPorts"),
            (self.mcu_boot, "mcuBoot"),
            (self.modem, "modem"),
            (self.broken, "broken"),
            (self.usb, "usb"),
        ]
        .into_iter()
        .filter_map(|(on, name)| on.then_some(name))
        .collect();

        if enabled.is_empty() {
            Vec::new()
        } else {
            vec!["--traits".to_string(), enabled.join(",")]
        }
    }
}

/// Chip erase behaviour when programming over J-Link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipEraseMode {
    EraseAll,
    EraseNone,
    EraseRangesTouchedByFirmware,
}

impl ChipEraseMode {
    fn as_str(&self) -> &'static str {
        match self {
            Self::EraseAll => "ERASE_ALL",
            Self::EraseNone => "ERASE_NONE",
            Self::EraseRangesTouchedByFirmware => "ERASE_RANGES_TOUCHED_BY_FIRMWARE",
        }
    }
}

/// Verification after programming over J-Link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    VerifyHash,
    VerifyNone,
    VerifyRead,
}

impl VerifyMode {
    fn as_str(&self) -> &'static str {
        match self {
            Self::VerifyHash => "VERIFY_HASH",
            Self::VerifyNone => "VERIFY_NONE",
            Self::VerifyRead => "VERIFY_READ",
        }
    }
}

/// State the MCU is left in after a bootloader upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McuEndState {
    Application,
    Programming,
}

impl McuEndState {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Application => "NRFDL_MCU_STATE_APPLICATION",
            Self::Programming => "NRFDL_MCU_STATE_PROGRAMMING",
        }
    }
}

/// Options for the `program` command, per programming path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgrammingOptions {
    JLink {
        chip_erase_mode: Option<ChipEraseMode>,
        reset: Option<ResetKind>,
        verify: Option<VerifyMode>,
    },
    McuBoot {
        mcu_end_state: Option<McuEndState>,
        /// Delay in seconds before uploading to the network core.
        net_core_upload_delay: Option<u32>,
    },
    NordicDfu {
        mcu_end_state: Option<McuEndState>,
    },
}

impl ProgrammingOptions {
    /// Sandbox arguments, e.g. `--options chip_erase_mode=ERASE_ALL,verify=VERIFY_READ`.
    ///
    /// Empty if no option is set.
    pub fn to_args(&self) -> Vec<String> {
        let pairs: Vec<String> = match self {
            Self::JLink {
                chip_erase_mode,
                reset,
                verify,
            } => [
                chip_erase_mode.map(|m| format!("chip_erase_mode={}", m.as_str())),
                reset.map(|r| format!("reset={}", r.as_str())),
                verify.map(|v| format!("verify={}", v.as_str())),
            ]
            .into_iter()
            .flatten()
            .collect(),
            Self::McuBoot {
                mcu_end_state,
                net_core_upload_delay,
            } => [
                mcu_end_state.map(|s| format!("mcu_end_state={}", s.as_str())),
                net_core_upload_delay.map(|d| format!("net_core_upload_delay={d}")),
            ]
            .into_iter()
            .flatten()
            .collect(),
            Self::NordicDfu { mcu_end_state } => mcu_end_state
                .map(|s| format!("mcu_end_state={}", s.as_str()))
                .into_iter()
                .collect(),
        };

        if pairs.is_empty() {
            Vec::new()
        } else {
            vec!["--options".to_string(), pairs.join(",")]
        }
    }
}

/// File format of an in-memory firmware image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareKind {
    Hex,
    Zip,
}

impl FirmwareKind {
    /// Extension of the staged file.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Hex => "hex",
            Self::Zip => "zip",
        }
    }
}

/// Firmware to program: an existing file or an in-memory image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Firmware {
    /// Path passed to the sandbox unchanged.
    Path(PathBuf),
    /// Image staged to a temporary file before the descriptor is built.
    Buffer { bytes: Bytes, kind: FirmwareKind },
}

impl Firmware {
    /// In-memory firmware image.
    pub fn buffer(bytes: impl Into<Bytes>, kind: FirmwareKind) -> Self {
        Self::Buffer {
            bytes: bytes.into(),
            kind,
        }
    }
}

impl From<PathBuf> for Firmware {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}
