//! 缓存块结构
//!
//! 一块数据、块对齐的偏移和状态标志。

use crate::error::{Error, ErrorKind, Result};
use alloc::vec::Vec;
use bitflags::bitflags;

bitflags! {
    /// 缓存块标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BlockFlags: u8 {
        /// 数据已修改（脏）
        const DIRTY = 0x01;
    }
}

/// 缓存块
///
/// 缓冲区长度恒为块大小，`offset == block_no * block_size`。
/// 脏块的缓冲区是权威内容，释放前必须写回后端。
pub struct CacheBlock {
    /// 块号
    pub block_no: u64,

    /// 块数据
    pub data: Vec<u8>,

    /// 块状态标志
    pub flags: BlockFlags,
}

impl core::fmt::Debug for CacheBlock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CacheBlock")
            .field("block_no", &self.block_no)
            .field("data_len", &self.data.len())
            .field("flags", &self.flags)
            .finish()
    }
}

impl CacheBlock {
    /// 分配一个全 0 的缓存块
    ///
    /// 分配失败返回 `NoMemory`，不会 panic。
    pub fn alloc(block_no: u64, block_size: usize) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(block_size).map_err(|_| {
            log::error!("[CACHE] failed to allocate {} bytes for block {}", block_size, block_no);
            Error::new(ErrorKind::NoMemory, "Failed to allocate block buffer")
        })?;
        data.resize(block_size, 0);
        Ok(Self {
            block_no,
            data,
            flags: BlockFlags::empty(),
        })
    }

    /// 后端中的字节偏移
    pub fn offset(&self) -> u64 {
        self.block_no * self.data.len() as u64
    }

    /// 标记为脏（已修改）
    pub fn mark_dirty(&mut self) {
        self.flags.insert(BlockFlags::DIRTY);
    }

    /// 标记为干净（已写回后端）
    pub fn mark_clean(&mut self) {
        self.flags.remove(BlockFlags::DIRTY);
    }

    /// 检查是否是脏块
    pub fn is_dirty(&self) -> bool {
        self.flags.contains(BlockFlags::DIRTY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_creation() {
        let block = CacheBlock::alloc(3, 512).unwrap();
        assert_eq!(block.block_no, 3);
        assert_eq!(block.data.len(), 512);
        assert_eq!(block.offset(), 1536);
        assert_eq!(block.flags, BlockFlags::empty());
        assert!(block.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_dirty_flag() {
        let mut block = CacheBlock::alloc(0, 64).unwrap();

        assert!(!block.is_dirty());

        block.mark_dirty();
        assert!(block.is_dirty());
        assert!(block.flags.contains(BlockFlags::DIRTY));

        block.mark_clean();
        assert!(!block.is_dirty());
    }

    #[test]
    fn test_offset_follows_block_size() {
        assert_eq!(CacheBlock::alloc(0, 64).unwrap().offset(), 0);
        assert_eq!(CacheBlock::alloc(5, 64).unwrap().offset(), 320);
        assert_eq!(CacheBlock::alloc(5, 4096).unwrap().offset(), 20480);
    }
}
