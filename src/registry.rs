//! 描述符表
//!
//! 描述符到文件上下文的哈希表，按 `fd % 桶数` 分桶，每个桶是一条链。
//! 表本身不加锁，由 [`CacheEngine`](crate::handler::CacheEngine) 用读写锁保护：
//! 插入和删除持有写锁，查找持有读锁。
//!
//! 每个上下文有自己的互斥锁，查找只复制 `Arc`，释放表锁之后再锁上下文。

use crate::cache::FileContext;
use crate::error::{Error, ErrorKind, Result};
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

/// 描述符
pub type Fd = u32;

/// 共享的文件上下文句柄
pub type ContextRef = Arc<Mutex<FileContext>>;

struct Slot {
    fd: Fd,
    context: ContextRef,
}

/// 描述符表
pub struct DescriptorRegistry {
    buckets: Vec<Vec<Slot>>,
    len: usize,
}

impl DescriptorRegistry {
    /// 创建描述符表
    ///
    /// # 参数
    ///
    /// * `buckets` - 桶数（至少为 1）
    pub fn new(buckets: usize) -> Self {
        let mut table = Vec::with_capacity(buckets.max(1));
        table.resize_with(buckets.max(1), Vec::new);
        log::debug!("[REGISTRY] created with {} buckets", table.len());
        Self { buckets: table, len: 0 }
    }

    fn bucket_of(&self, fd: Fd) -> usize {
        fd as usize % self.buckets.len()
    }

    /// 登记描述符
    ///
    /// 描述符已存在时返回 `AlreadyExists`。
    pub fn insert(&mut self, fd: Fd, context: ContextRef) -> Result<()> {
        let bucket = self.bucket_of(fd);
        if self.buckets[bucket].iter().any(|slot| slot.fd == fd) {
            return Err(Error::new(ErrorKind::AlreadyExists, "Descriptor already registered"));
        }
        self.buckets[bucket].push(Slot { fd, context });
        self.len += 1;
        log::debug!("[REGISTRY] insert fd={} into bucket {}, open={}", fd, bucket, self.len);
        Ok(())
    }

    /// 查找描述符对应的上下文
    pub fn find(&self, fd: Fd) -> Option<ContextRef> {
        self.buckets[self.bucket_of(fd)]
            .iter()
            .find(|slot| slot.fd == fd)
            .map(|slot| slot.context.clone())
    }

    /// 移除描述符并返回其上下文
    pub fn remove(&mut self, fd: Fd) -> Option<ContextRef> {
        let bucket = self.bucket_of(fd);
        let chain = &mut self.buckets[bucket];
        let pos = chain.iter().position(|slot| slot.fd == fd)?;
        let slot = chain.remove(pos);
        self.len -= 1;
        log::debug!("[REGISTRY] remove fd={} from bucket {}, open={}", fd, bucket, self.len);
        Some(slot.context)
    }

    /// 是否包含描述符
    pub fn contains(&self, fd: Fd) -> bool {
        self.buckets[self.bucket_of(fd)].iter().any(|slot| slot.fd == fd)
    }

    /// 全部描述符（升序）
    pub fn descriptors(&self) -> Vec<Fd> {
        let mut fds: Vec<Fd> = self
            .buckets
            .iter()
            .flat_map(|chain| chain.iter().map(|slot| slot.fd))
            .collect();
        fds.sort_unstable();
        fds
    }

    /// 已登记的描述符数量
    pub fn len(&self) -> usize {
        self.len
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 桶数
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

impl core::fmt::Debug for DescriptorRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DescriptorRegistry")
            .field("buckets", &self.buckets.len())
            .field("descriptors", &self.descriptors())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{HostBackend, MemHost};
    use crate::config::CacheConfig;
    use alloc::boxed::Box;

    fn context(fd: Fd) -> ContextRef {
        let backend = Box::new(HostBackend::new(MemHost::new()));
        Arc::new(Mutex::new(FileContext::new(fd, backend, &CacheConfig::default())))
    }

    #[test]
    fn test_insert_find_remove() {
        let mut registry = DescriptorRegistry::new(5);
        assert!(registry.is_empty());

        // 1、6、11 落在同一个桶
        for fd in [1, 6, 11, 2] {
            registry.insert(fd, context(fd)).unwrap();
        }
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.descriptors(), [1, 2, 6, 11]);
        assert_eq!(registry.find(6).unwrap().lock().fd(), 6);

        assert_eq!(registry.remove(6).unwrap().lock().fd(), 6);
        assert!(registry.find(6).is_none());
        assert!(registry.contains(1));
        assert!(registry.contains(11));
        assert!(registry.remove(6).is_none());
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut registry = DescriptorRegistry::new(5);
        registry.insert(3, context(3)).unwrap();
        let err = registry.insert(3, context(3)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_zero_buckets_clamped() {
        let registry = DescriptorRegistry::new(0);
        assert_eq!(registry.bucket_count(), 1);
    }
}
