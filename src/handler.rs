//! 缓存 I/O 入口
//!
//! [`CacheEngine`] 提供 open / read / write / close，以及 flush 和统计查询。
//!
//! # 锁顺序
//!
//! 描述符表用读写锁保护，每个文件上下文有自己的互斥锁。查找只在持有表读锁时
//! 复制上下文的 `Arc`，随后释放表锁再锁上下文；close 在持有上下文锁时获取表写锁。
//! 因此锁顺序总是“上下文 → 表”，不会反向。
//!
//! # 示例
//!
//! ```rust,ignore
//! use blkcache::{CacheEngine, CacheConfig, HostBackend, MemHost};
//!
//! let engine = CacheEngine::new(CacheConfig::default())?;
//! let fd = engine.open(Box::new(HostBackend::new(MemHost::new())))?;
//!
//! engine.write(fd, b"hello", 100)?;
//! let mut buf = [0u8; 5];
//! engine.read(fd, &mut buf, 100)?;
//!
//! // 写回全部脏块并释放上下文
//! engine.close(fd)?;
//! ```

use crate::block::BlockBackend;
use crate::cache::{CacheStats, FileContext};
use crate::config::CacheConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::registry::{ContextRef, DescriptorRegistry, Fd};
use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::{Mutex, RwLock};

const NOT_OPEN: Error = Error::new(ErrorKind::NotFound, "Descriptor not open");

/// 块缓存引擎
///
/// 持有描述符表。表在第一次 open 时创建，在最后一个描述符 close 后销毁。
pub struct CacheEngine {
    config: CacheConfig,
    table: RwLock<Option<DescriptorRegistry>>,
    next_fd: AtomicU32,
}

impl CacheEngine {
    /// 创建引擎
    ///
    /// 配置无效时返回 `InvalidInput`。
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            table: RwLock::new(None),
            next_fd: AtomicU32::new(0),
        })
    }

    /// 当前配置
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// 用已打开的后端创建文件上下文并登记
    ///
    /// 后端声明的传输单位与配置的块大小不同时返回 `InvalidInput`。
    pub fn open(&self, backend: Box<dyn BlockBackend>) -> Result<Fd> {
        let kind = backend.kind();
        if let Some(unit) = backend.block_size() {
            if unit != self.config.block_size {
                log::error!(
                    "[CACHE] {:?} backend transfers {} bytes, cache block size is {}",
                    kind,
                    unit,
                    self.config.block_size
                );
                return Err(Error::new(ErrorKind::InvalidInput, "Backend block size does not match cache"));
            }
        }

        let fd = self.next_fd.fetch_add(1, Ordering::Relaxed);
        let context = Arc::new(Mutex::new(FileContext::new(fd, backend, &self.config)));

        let mut table = self.table.write();
        let registry = table.get_or_insert_with(|| DescriptorRegistry::new(self.config.fd_buckets));
        registry.insert(fd, context)?;

        log::info!("[CACHE] open fd={} ({:?}), open descriptors={}", fd, kind, registry.len());
        Ok(fd)
    }

    /// 按路径打开后端并登记
    ///
    /// 打开失败返回 `BackendUnavailable`，不会创建上下文。
    #[cfg(feature = "std")]
    pub fn open_path(
        &self,
        path: impl AsRef<std::path::Path>,
        flags: crate::block::OpenFlags,
        kind: crate::block::BackendKind,
    ) -> Result<Fd> {
        let backend = crate::block::open_backend(path, flags, kind, self.config.block_size)?;
        self.open(backend)
    }

    fn context(&self, fd: Fd) -> Result<ContextRef> {
        self.table
            .read()
            .as_ref()
            .and_then(|registry| registry.find(fd))
            .ok_or(NOT_OPEN)
    }

    /// 从 `offset` 读取 `buf.len()` 字节
    pub fn read(&self, fd: Fd, buf: &mut [u8], offset: u64) -> Result<usize> {
        let context = self.context(fd)?;
        let mut context = context.lock();
        context.read(buf, offset)
    }

    /// 将 `buf` 写到 `offset`
    ///
    /// 返回接受的字节数；驱逐时的写回在部分片段写入之后失败时会小于 `buf.len()`。
    pub fn write(&self, fd: Fd, buf: &[u8], offset: u64) -> Result<usize> {
        let context = self.context(fd)?;
        let mut context = context.lock();
        context.write(buf, offset)
    }

    /// 写回描述符的全部脏块，不关闭
    ///
    /// # 返回
    ///
    /// 写回的块数
    pub fn flush(&self, fd: Fd) -> Result<usize> {
        let context = self.context(fd)?;
        let mut context = context.lock();
        context.flush()
    }

    /// 关闭描述符
    ///
    /// 先写回全部脏块。写回失败时描述符保持打开并返回错误，脏数据不会丢失；
    /// 成功后从表中移除上下文，释放索引和 LRU，最后关闭后端。
    /// 描述符不存在时返回 `NotFound`。
    pub fn close(&self, fd: Fd) -> Result<()> {
        let context = self.context(fd).map_err(|err| {
            log::warn!("[CACHE] close of fd={} ignored: not open", fd);
            err
        })?;
        let mut context = context.lock();
        if context.is_closed() {
            return Err(NOT_OPEN);
        }

        let written = context.flush()?;

        {
            let mut table = self.table.write();
            let Some(registry) = table.as_mut() else {
                return Err(NOT_OPEN);
            };
            if registry.remove(fd).is_none() {
                return Err(NOT_OPEN);
            }
            if registry.is_empty() {
                *table = None;
                log::debug!("[REGISTRY] last descriptor closed, registry destroyed");
            }
        }

        let freed = context.teardown();
        context.close_backend()?;
        log::info!("[CACHE] close fd={}: {} blocks written back, {} blocks freed", fd, written, freed);
        Ok(())
    }

    /// 关闭全部描述符
    ///
    /// 逐个关闭，返回遇到的第一个错误；失败的描述符保持打开。
    pub fn shutdown(&self) -> Result<()> {
        let fds = match self.table.read().as_ref() {
            Some(registry) => registry.descriptors(),
            None => return Ok(()),
        };

        let mut first_err = None;
        for fd in fds {
            if let Err(err) = self.close(fd) {
                log::error!("[CACHE] shutdown: close of fd={} failed: {}", fd, err);
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// 获取描述符的统计信息
    pub fn stats(&self, fd: Fd) -> Result<CacheStats> {
        self.inspect(fd, |context| context.stats())
    }

    /// 描述符当前驻留的块数
    pub fn resident_blocks(&self, fd: Fd) -> Result<usize> {
        self.inspect(fd, |context| context.resident_blocks())
    }

    /// 在持有上下文锁的情况下只读访问上下文
    pub fn inspect<R>(&self, fd: Fd, f: impl FnOnce(&FileContext) -> R) -> Result<R> {
        let context = self.context(fd)?;
        let context = context.lock();
        Ok(f(&context))
    }

    /// 打开的描述符数量
    pub fn open_descriptors(&self) -> usize {
        self.table.read().as_ref().map_or(0, |registry| registry.len())
    }

    /// 描述符表是否存在
    pub fn is_registry_live(&self) -> bool {
        self.table.read().is_some()
    }
}

impl Default for CacheEngine {
    fn default() -> Self {
        Self {
            config: CacheConfig::default(),
            table: RwLock::new(None),
            next_fd: AtomicU32::new(0),
        }
    }
}

impl core::fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("config", &self.config)
            .field("open_descriptors", &self.open_descriptors())
            .finish()
    }
}
