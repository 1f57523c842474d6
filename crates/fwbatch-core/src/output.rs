//! Typed task-end payloads, one variant per command.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A device command that can be queued in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Erase,
    Program,
    Reset,
    Recover,
    ReadFirmware,
    CoreInfo,
    FwInfo,
    DeviceInfo,
    ProtectionStatus,
}

impl OperationKind {
    /// Sandbox command name.
    pub fn command(&self) -> &'static str {
        match self {
            Self::Erase => "erase",
            Self::Program => "program",
            Self::Reset => "reset",
            Self::Recover => "recover",
            Self::ReadFirmware => "fw-read",
            Self::CoreInfo => "core-info",
            Self::FwInfo => "fw-info",
            Self::DeviceInfo => "device-info",
            Self::ProtectionStatus => "protection-get",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}

/// Result of one successfully completed operation.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutput {
    Erase,
    Program,
    Reset,
    Recover,
    /// Raw bytes read from the device.
    FirmwareRead(Vec<u8>),
    CoreInfo(DeviceCoreInfo),
    FwInfo(FwInfo),
    DeviceInfo(DeviceInfo),
    ProtectionStatus(ProtectionStatus),
}

impl OperationOutput {
    /// The command that produced this output.
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Erase => OperationKind::Erase,
            Self::Program => OperationKind::Program,
            Self::Reset => OperationKind::Reset,
            Self::Recover => OperationKind::Recover,
            Self::FirmwareRead(_) => OperationKind::ReadFirmware,
            Self::CoreInfo(_) => OperationKind::CoreInfo,
            Self::FwInfo(_) => OperationKind::FwInfo,
            Self::DeviceInfo(_) => OperationKind::DeviceInfo,
            Self::ProtectionStatus(_) => OperationKind::ProtectionStatus,
        }
    }

    /// Firmware bytes, if this is a firmware read.
    pub fn as_firmware(&self) -> Option<&[u8]> {
        match self {
            Self::FirmwareRead(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Memory layout of a core, from `core-info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceCoreInfo {
    pub code_address: Option<u64>,
    pub code_page_size: Option<u64>,
    pub code_size: Option<u64>,
    pub uicr_address: Option<u64>,
    pub info_page_size: Option<u64>,
    pub code_ram_present: Option<bool>,
    pub code_ram_address: Option<u64>,
    pub data_ram_address: Option<u64>,
    pub ram_size: Option<u64>,
    pub qspi_present: Option<bool>,
    pub xip_address: Option<u64>,
    pub xip_size: Option<u64>,
    pub pin_reset_pin: Option<u32>,
}

/// Firmware images found on a core, from `fw-info`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FwInfo {
    pub image_info_list: Vec<ImageInfo>,
    pub operation_id: Option<String>,
}

/// One firmware image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageInfo {
    pub image_type: Option<String>,
    pub image_location: Option<ImageLocation>,
    /// Version as reported; the shape differs per image type.
    pub version: Option<Value>,
}

/// Address range of a firmware image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageLocation {
    pub address: u64,
    pub size: u64,
}

/// Hardware and probe details, from `device-info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceInfo {
    pub hw_info: Option<HwInfo>,
    pub jlink: Option<JlinkInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HwInfo {
    pub rom_size: Option<u64>,
    pub ram_size: Option<u64>,
    pub rom_page_size: Option<u64>,
    pub device_family: Option<String>,
    pub device_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JlinkInfo {
    pub device_version: Option<String>,
    pub jlink_ob_firmware_version: Option<String>,
    pub serial_number: Option<String>,
    pub board_version: Option<String>,
}

/// Readback protection of a core, from `protection-get`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectionStatus {
    pub protection_status: ProtectionLevel,
    #[serde(default)]
    pub serial_number: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtectionLevel {
    #[serde(rename = "NRFDL_PROTECTION_STATUS_NONE")]
    None,
    #[serde(rename = "NRFDL_PROTECTION_STATUS_REGION0")]
    Region0,
    #[serde(rename = "NRFDL_PROTECTION_STATUS_REGION0_REGION1")]
    Region0Region1,
    #[serde(rename = "NRFDL_PROTECTION_STATUS_SECURE_REGIONS")]
    SecureRegions,
    #[serde(rename = "NRFDL_PROTECTION_STATUS_ALL")]
    All,
    #[serde(other)]
    Unknown,
}

/// Wire payload of a successful `fw-read`: the image, base64-encoded.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct FirmwareBuffer {
    pub buffer: String,
}
