//! # fwbatch-core
//!
//! Batch orchestration of device operations (erase, program, read firmware,
//! info queries, reset, recover) through an out-of-process device sandbox.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   fwbatch-core (host)                    │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │     Batch       │────▶│  Vec<PendingOperation>   │   │
//! │  │  - erase()      │     │  descriptor future +     │   │
//! │  │  - program()    │     │  typed callbacks         │   │
//! │  │  - collect()    │     └──────────────────────────┘   │
//! │  │  - run()        │                │ staged firmware   │
//! │  └─────────────────┘                ▼                   │
//! │           │              ┌──────────────────────────┐   │
//! │           │              │  StagedFile (temp dir)   │   │
//! │           ▼              └──────────────────────────┘   │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │   Dispatcher    │◀────│  ordered event channel   │   │
//! │  │ current / last  │     │  begin → progress → end  │   │
//! │  │ completed index │     └──────────────────────────┘   │
//! │  └─────────────────┘                ▲                   │
//! │                                     │                   │
//! └─────────────────────────────────────┼───────────────────┘
//!                                       │
//! ┌─────────────────────────────────────┴────────────────────┐
//! │              DeviceSandbox (external worker)             │
//! │        generate_descriptor() / execute_batch()           │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use fwbatch_core::{Batch, Callbacks, Device, DeviceCore, Firmware, FirmwareKind};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(sandbox: std::sync::Arc<dyn fwbatch_core::DeviceSandbox>, image: Vec<u8>) -> fwbatch_core::Result<()> {
//! let device = Device::new(1, "000683000123");
//!
//! let outputs = Batch::new(sandbox)
//!     .erase(DeviceCore::Application, None)
//!     .program(
//!         Firmware::buffer(image, FirmwareKind::Hex),
//!         DeviceCore::Application,
//!         None,
//!         None,
//!         Some(Callbacks::new().on_progress(|p, _| println!("{}%", p.progress_percentage))),
//!     )
//!     .read_firmware(DeviceCore::Application, None)
//!     .run(&device, CancellationToken::new())
//!     .await?;
//!
//! let readback = outputs[2].as_firmware();
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Single Round Trip**: All operations ship to the sandbox as one batch
//! - **Ordered Dispatch**: Events are correlated to operations by enqueue order
//! - **Typed Results**: One [`OperationOutput`] variant per command
//! - **Grouped Results**: [`Batch::collect`] fires once a run of operations ended
//! - **Firmware Staging**: In-memory images are staged and always cleaned up
//! - **Cancellation**: In-flight operations are notified when a run is cancelled

mod batch;
mod callbacks;
mod config;
mod descriptor;
mod device;
mod error;
mod executor;
mod output;
mod sandbox;
mod staging;

pub use batch::Batch;
pub use callbacks::{Callbacks, PAYLOAD_DECODE_ERROR};
pub use config::{BatchConfig, BatchConfigBuilder, DEFAULT_STAGING_ATTEMPTS};
pub use descriptor::generate_arguments;
pub use device::{
    ChipEraseMode, Device, DeviceCore, DeviceTraits, Firmware, FirmwareKind, McuEndState,
    ProgrammingOptions, ResetKind, VerifyMode,
};
pub use error::{BatchError, Result, SandboxError, TaskFailure};
pub use executor::OperationState;
pub use output::{
    DeviceCoreInfo, DeviceInfo, FwInfo, HwInfo, ImageInfo, ImageLocation, JlinkInfo,
    OperationKind, OperationOutput, ProtectionLevel, ProtectionStatus,
};
pub use sandbox::DeviceSandbox;
pub use staging::StagedFile;

pub use fwbatch_protocol::{
    EventSender, OperationDescriptor, Progress, SandboxEvent, TaskBegin, TaskEnd, TaskError,
    TaskInfo, TaskResult,
};
