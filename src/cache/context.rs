//! 文件上下文
//!
//! 每个打开的描述符一个上下文，持有后端、块索引和 LRU 跟踪器。
//! 读写请求在这里被切分成块对齐的片段，逐段命中或缺失处理。
//!
//! # 缺失处理
//!
//! 1. 分配新块，从后端读取整块（整块覆盖的写入跳过这一步）
//! 2. 驻留块数达到容量时驱逐：写回全部脏块，再删除 LRU 尾部的块
//! 3. 插入 LRU 头部和块索引
//!
//! 读取失败时新块被直接丢弃，已驻留的块不受影响。

use super::buffer::CacheBlock;
use super::index::BlockIndex;
use super::lru::RecencyTracker;
use crate::block::{BackendKind, BlockBackend};
use crate::config::CacheConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::registry::Fd;
use alloc::boxed::Box;
use alloc::vec::Vec;

/// 缓存统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// 总访问次数（按块计）
    pub total_accesses: u64,
    /// 缓存命中次数
    pub hits: u64,
    /// 缓存未命中次数
    pub misses: u64,
    /// 脏块写回次数
    pub writebacks: u64,
    /// 驱逐次数
    pub evictions: u64,
    /// 当前脏块数量
    pub dirty_blocks: usize,
}

impl CacheStats {
    /// 计算命中率
    pub fn hit_rate(&self) -> f64 {
        if self.total_accesses == 0 {
            0.0
        } else {
            self.hits as f64 / self.total_accesses as f64
        }
    }
}

/// 块对齐的请求片段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment {
    block_no: u64,
    /// 块内偏移
    in_block: usize,
    len: usize,
    /// 调用者缓冲区内偏移
    buf_pos: usize,
}

/// 把 `[offset, offset + count)` 切成不跨块的片段
struct Segments {
    offset: u64,
    done: usize,
    count: usize,
    block_size: usize,
}

impl Segments {
    fn new(offset: u64, count: usize, block_size: usize) -> Self {
        Self {
            offset,
            done: 0,
            count,
            block_size,
        }
    }
}

impl Iterator for Segments {
    type Item = Segment;

    fn next(&mut self) -> Option<Segment> {
        if self.done >= self.count {
            return None;
        }
        let pos = self.offset + self.done as u64;
        let bs = self.block_size as u64;
        let in_block = (pos % bs) as usize;
        let len = (self.block_size - in_block).min(self.count - self.done);
        let seg = Segment {
            block_no: pos / bs,
            in_block,
            len,
            buf_pos: self.done,
        };
        self.done += len;
        Some(seg)
    }
}

/// 缺失块的内容来源
enum Fill {
    /// 从后端读取整块
    Fetch,
    /// 整块即将被覆盖，不读取
    Zeroed,
    /// 已经准备好的整块内容
    Staged(CacheBlock),
}

fn invariant_violation(block_no: u64) -> Error {
    log::error!("[CACHE] index and recency tracker disagree on block {}", block_no);
    Error::new(ErrorKind::InvalidState, "Block index and recency tracker out of sync")
}

/// 文件上下文
pub struct FileContext {
    fd: Fd,
    backend: Box<dyn BlockBackend>,
    index: BlockIndex,
    recency: RecencyTracker,
    block_size: usize,
    capacity: usize,
    stats: CacheStats,
    closed: bool,
}

impl FileContext {
    /// 创建上下文
    ///
    /// 后端类型在这里固定，之后不再改变。
    pub fn new(fd: Fd, backend: Box<dyn BlockBackend>, config: &CacheConfig) -> Self {
        Self {
            fd,
            backend,
            index: BlockIndex::new(),
            recency: RecencyTracker::new(config.lru_buckets),
            block_size: config.block_size,
            capacity: config.max_blocks,
            stats: CacheStats::default(),
            closed: false,
        }
    }

    /// 描述符
    pub fn fd(&self) -> Fd {
        self.fd
    }

    /// 后端类型
    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// 当前驻留块数
    pub fn resident_blocks(&self) -> usize {
        self.recency.len()
    }

    /// 当前脏块数
    pub fn dirty_blocks(&self) -> usize {
        self.index.dirty_count()
    }

    /// 升序的驻留块号
    pub fn resident_keys(&self) -> Vec<u64> {
        self.index.keys()
    }

    /// 从最近到最久使用的块号
    pub fn recency_keys(&self) -> Vec<u64> {
        self.recency.keys()
    }

    /// 获取统计信息
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.dirty_blocks = self.index.dirty_count();
        stats
    }

    /// 检查索引与 LRU 是否一一对应，索引本身是否有序且平衡
    pub fn is_consistent(&self) -> bool {
        if self.index.len() != self.recency.len() || !self.index.is_valid() {
            return false;
        }
        let mut tracked = self.recency.keys();
        tracked.sort_unstable();
        tracked == self.index.keys()
    }

    /// 是否已经 teardown
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::new(ErrorKind::NotFound, "Descriptor closed"));
        }
        Ok(())
    }

    fn check_range(&self, offset: u64, count: usize) -> Result<()> {
        self.check_open()?;
        if offset.checked_add(count as u64).is_none() {
            return Err(Error::new(ErrorKind::InvalidInput, "Request range overflows"));
        }
        Ok(())
    }

    /// 从 `offset` 读取 `buf.len()` 字节
    ///
    /// # 返回
    ///
    /// 复制的字节数，总是等于 `buf.len()`
    pub fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.check_range(offset, buf.len())?;
        let mut copied = 0;
        for seg in Segments::new(offset, buf.len(), self.block_size) {
            let block = self.load(seg.block_no, Fill::Fetch)?;
            buf[seg.buf_pos..seg.buf_pos + seg.len]
                .copy_from_slice(&block.data[seg.in_block..seg.in_block + seg.len]);
            copied += seg.len;
        }
        Ok(copied)
    }

    /// 将 `buf` 写到 `offset`
    ///
    /// 写入只修改缓存中的块并标记为脏，写回发生在驱逐、flush 或 close 时。
    ///
    /// 只覆盖部分块的片段（最多首尾两个）在修改任何块之前先准备好整块内容：
    /// 已驻留的复制一份，缺失的从后端读取。读取失败时返回错误，缓存不变。
    ///
    /// # 返回
    ///
    /// 接受的字节数。已有片段写入缓存之后，驱逐时的写回或分配失败会让写入提前结束，
    /// 此时返回已接受的字节数；第一个片段就失败时返回错误。
    pub fn write(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        self.check_range(offset, buf.len())?;
        let fd = self.fd;
        let block_size = self.block_size;

        let mut staged = Vec::new();
        for seg in Segments::new(offset, buf.len(), block_size).filter(|seg| seg.len < block_size) {
            staged.push(self.stage(seg.block_no)?);
        }

        let mut written = 0;
        for seg in Segments::new(offset, buf.len(), block_size) {
            let fill = if seg.len == block_size {
                Fill::Zeroed
            } else {
                staged
                    .iter()
                    .position(|block| block.block_no == seg.block_no)
                    .map_or(Fill::Fetch, |pos| Fill::Staged(staged.swap_remove(pos)))
            };
            let block = match self.load(seg.block_no, fill) {
                Ok(block) => block,
                Err(err) if written > 0 => {
                    log::warn!("[CACHE] fd={} write stopped after {} bytes: {}", fd, written, err);
                    return Ok(written);
                }
                Err(err) => return Err(err),
            };
            block.data[seg.in_block..seg.in_block + seg.len]
                .copy_from_slice(&buf[seg.buf_pos..seg.buf_pos + seg.len]);
            block.mark_dirty();
            written += seg.len;
        }
        Ok(written)
    }

    /// 准备部分写入片段所在块的完整内容，不修改缓存
    fn stage(&mut self, block_no: u64) -> Result<CacheBlock> {
        let mut block = CacheBlock::alloc(block_no, self.block_size)?;
        match self.index.get(block_no) {
            Some(resident) => block.data.copy_from_slice(&resident.data),
            None => self.fetch_into(&mut block)?,
        }
        Ok(block)
    }

    fn fetch_into(&mut self, block: &mut CacheBlock) -> Result<()> {
        let block_no = block.block_no;
        let offset = block.offset();
        self.backend.fetch_block(offset, &mut block.data).map_err(|err| {
            log::error!("[CACHE] fd={} fetch of block {} failed: {}", self.fd, block_no, err);
            err
        })
    }

    /// 取得块号对应的缓存块，缺失时按 `fill` 载入
    fn load(&mut self, block_no: u64, fill: Fill) -> Result<&mut CacheBlock> {
        self.stats.total_accesses += 1;

        if self.index.contains(block_no) {
            self.stats.hits += 1;
            if !self.recency.touch(block_no) {
                return Err(invariant_violation(block_no));
            }
            log::trace!("[CACHE] fd={} block {} HIT", self.fd, block_no);
            return self.index.get_mut(block_no).ok_or_else(|| invariant_violation(block_no));
        }

        self.stats.misses += 1;
        log::debug!(
            "[CACHE] fd={} block {} MISS, resident={}/{}",
            self.fd,
            block_no,
            self.recency.len(),
            self.capacity
        );

        let block = match fill {
            Fill::Fetch => {
                let mut block = CacheBlock::alloc(block_no, self.block_size)?;
                self.fetch_into(&mut block)?;
                block
            }
            Fill::Zeroed => CacheBlock::alloc(block_no, self.block_size)?,
            Fill::Staged(block) => block,
        };
        self.install(block)
    }

    /// 腾出位置后把新块插入 LRU 头部和块索引
    ///
    /// LRU 条目在驱逐之前预留，预留失败时不驱逐任何块。
    fn install(&mut self, block: CacheBlock) -> Result<&mut CacheBlock> {
        let block_no = block.block_no;
        self.recency.reserve(block_no)?;
        self.evict_to_fit()?;

        self.recency.insert_at_head(block_no)?;
        if !self.index.insert(block) {
            self.recency.remove(block_no);
            return Err(invariant_violation(block_no));
        }
        self.index.get_mut(block_no).ok_or_else(|| invariant_violation(block_no))
    }

    /// 驱逐直到可以再插入一块
    ///
    /// 每一轮先写回全部脏块，再删除 LRU 尾部的块。写回失败时不驱逐任何块。
    fn evict_to_fit(&mut self) -> Result<()> {
        while self.recency.len() >= self.capacity {
            self.flush()?;

            let Some(victim) = self.recency.evict_tail() else {
                log::error!("[CACHE] fd={} nothing to evict at capacity {}", self.fd, self.capacity);
                return Err(Error::new(ErrorKind::InvalidState, "Recency tracker empty while at capacity"));
            };
            match self.index.remove(victim) {
                Some(block) => {
                    debug_assert!(!block.is_dirty());
                    self.stats.evictions += 1;
                    log::debug!("[CACHE] fd={} evicted block {} (offset {:#x})", self.fd, victim, block.offset());
                }
                None => return Err(invariant_violation(victim)),
            }
        }
        Ok(())
    }

    /// 按块号升序写回全部脏块
    ///
    /// 写回成功的块被标记为干净；遇到第一个失败即停止并返回错误，
    /// 失败的块保持为脏。
    ///
    /// # 返回
    ///
    /// 写回的块数
    pub fn flush(&mut self) -> Result<usize> {
        self.check_open()?;
        let fd = self.fd;
        let backend = &mut self.backend;
        let stats = &mut self.stats;
        let mut written = 0;

        self.index.try_for_each_mut(|block| {
            if !block.is_dirty() {
                return Ok(());
            }
            let offset = block.offset();
            backend.store_block(offset, &block.data).map_err(|err| {
                log::error!("[CACHE] fd={} write-back of block {} failed: {}", fd, block.block_no, err);
                err
            })?;
            block.mark_clean();
            stats.writebacks += 1;
            written += 1;
            log::debug!("[CACHE] fd={} wrote back block {} (offset {:#x})", fd, block.block_no, offset);
            Ok(())
        })?;

        Ok(written)
    }

    /// 释放 LRU 跟踪器和块索引
    ///
    /// 不写回脏块，调用者应先 [`flush`](Self::flush)。之后的读写返回 `NotFound`。
    ///
    /// # 返回
    ///
    /// 释放的块数
    pub fn teardown(&mut self) -> usize {
        self.closed = true;
        self.recency.clear();
        self.index.clear()
    }

    /// 关闭后端
    pub fn close_backend(&mut self) -> Result<()> {
        self.backend.close()
    }
}

impl core::fmt::Debug for FileContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FileContext")
            .field("fd", &self.fd)
            .field("kind", &self.kind())
            .field("block_size", &self.block_size)
            .field("capacity", &self.capacity)
            .field("index", &self.index)
            .field("recency", &self.recency)
            .field("stats", &self.stats)
            .finish()
    }
}
