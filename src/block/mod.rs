//! 后端抽象
//!
//! 提供缓存与存储介质之间的唯一边界。
//! block/device.rs 定义统一的 [`BlockBackend`] 接口，以及两种介质的底层接口：
//! 可按字节定位读写的 Host（[`HostIo`]）和只能整块传输的 Device（[`BlockTransfer`]）
//!
//! block/memory.rs 提供内存中的 Host 文件和块设备，用于测试和无文件系统环境
//! block/file.rs（需要 `std`）提供基于真实文件和字符设备的实现

mod device;
mod memory;
#[cfg(feature = "std")]
mod file;

pub use device::{
    BackendKind, BlockBackend, BlockTransfer, DeviceBackend, HostBackend, HostIo,
    TransferDirection, TransferRequest,
};
pub use memory::{MemHost, RamDisk, SharedStorage};
#[cfg(feature = "std")]
pub use file::{open_backend, CharDevice, HostFile, OpenFlags};
