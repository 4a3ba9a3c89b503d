//! blkcache: 按描述符划分的写回块缓存
//!
//! 为文件或块设备提供一层带容量上限的 LRU 写回缓存：
//! - 每个打开的描述符有独立的缓存，块按块号存放在 AVL 树中
//! - 读写请求被切分成块对齐的片段，缺失时从后端整块载入
//! - 写入只标记脏块，写回发生在驱逐、flush 和 close 时
//! - 后端分为可定位读写的 Host 文件和只能整块传输的 Device
//!
//! # 示例
//!
//! ```rust,ignore
//! use blkcache::{BackendKind, CacheConfig, CacheEngine, OpenFlags};
//!
//! fn main() -> blkcache::Result<()> {
//!     let engine = CacheEngine::new(CacheConfig::default())?;
//!     let fd = engine.open_path("data.bin", OpenFlags::READ_WRITE | OpenFlags::CREATE, BackendKind::Host)?;
//!
//!     engine.write(fd, b"hello", 4000)?;
//!
//!     let mut buf = [0u8; 5];
//!     engine.read(fd, &mut buf, 4000)?;
//!
//!     engine.close(fd)?;
//!     Ok(())
//! }
//! ```
//!
//! # 模块结构
//!
//! - [`error`] - 错误类型定义
//! - [`consts`] - 常量定义
//! - [`config`] - 缓存配置
//! - [`block`] - 后端抽象（Host 文件、Device）
//! - [`cache`] - 块索引、LRU 和文件上下文
//! - [`registry`] - 描述符表
//! - [`handler`] - open / read / write / close 入口
//!
//! # Features
//!
//! - `std`（默认开启）：基于文件的后端、`from_env` 配置、`std::error::Error`。
//!   关闭后只依赖 `alloc`。

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

// ===== 核心模块 =====

/// 错误处理
pub mod error;

/// 常量定义
pub mod consts;

/// 缓存配置
pub mod config;

/// 后端抽象
pub mod block;

/// 块缓存
pub mod cache;

/// 描述符表
pub mod registry;

/// 缓存 I/O 入口
pub mod handler;

// ===== 公共导出 =====

// 错误处理
pub use error::{Error, ErrorKind, Result};

// 配置
pub use config::CacheConfig;

// 后端
pub use block::{
    BackendKind, BlockBackend, BlockTransfer, DeviceBackend, HostBackend, HostIo, MemHost, RamDisk,
    SharedStorage, TransferRequest,
};
#[cfg(feature = "std")]
pub use block::{open_backend, CharDevice, HostFile, OpenFlags};

// 缓存
pub use cache::{CacheStats, FileContext};

// 描述符
pub use registry::Fd;

// 入口
pub use handler::CacheEngine;
