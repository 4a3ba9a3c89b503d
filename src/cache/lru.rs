//! LRU 访问顺序跟踪
//!
//! 双向链表（头部最近使用，尾部最久未使用）加上固定桶数的直接查找哈希。
//! 链表节点存放在一个 slab 中，用下标互相链接；哈希桶按 `key % 桶数`
//! 保存节点下标。
//!
//! 跟踪器本身没有容量上限，容量由调用者在插入前检查。
//!
//! 查找哈希的桶数由配置固定（默认 4，`key % 桶数`），尾部驱逐由调用者在写回之后
//! 显式触发，插入所需的内存可以在驱逐之前预留。`lru::LruCache` 不提供这几点，
//! 因此这里不用它。

use crate::error::{Error, ErrorKind, Result};
use alloc::vec::Vec;

type EntryId = usize;

#[derive(Debug, Clone, Copy)]
struct Entry {
    key: u64,
    prev: Option<EntryId>,
    next: Option<EntryId>,
}

/// LRU 跟踪器
pub struct RecencyTracker {
    entries: Vec<Entry>,
    free: Vec<EntryId>,
    buckets: Vec<Vec<EntryId>>,
    head: Option<EntryId>,
    tail: Option<EntryId>,
    len: usize,
}

impl RecencyTracker {
    /// 创建跟踪器
    ///
    /// # 参数
    ///
    /// * `buckets` - 直接查找哈希的桶数（至少为 1）
    pub fn new(buckets: usize) -> Self {
        let mut table = Vec::with_capacity(buckets.max(1));
        table.resize_with(buckets.max(1), Vec::new);
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            buckets: table,
            head: None,
            tail: None,
            len: 0,
        }
    }

    fn bucket_of(&self, key: u64) -> usize {
        (key % self.buckets.len() as u64) as usize
    }

    fn find(&self, key: u64) -> Option<EntryId> {
        self.buckets[self.bucket_of(key)]
            .iter()
            .copied()
            .find(|&id| self.entries[id].key == key)
    }

    fn unlink(&mut self, id: EntryId) {
        let Entry { prev, next, .. } = self.entries[id];
        match prev {
            Some(p) => self.entries[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.entries[n].prev = prev,
            None => self.tail = prev,
        }
        self.entries[id].prev = None;
        self.entries[id].next = None;
    }

    fn link_front(&mut self, id: EntryId) {
        self.entries[id].prev = None;
        self.entries[id].next = self.head;
        match self.head {
            Some(h) => self.entries[h].prev = Some(id),
            None => self.tail = Some(id),
        }
        self.head = Some(id);
    }

    fn remove_entry(&mut self, id: EntryId) -> u64 {
        self.unlink(id);
        let key = self.entries[id].key;
        let bucket = self.bucket_of(key);
        let chain = &mut self.buckets[bucket];
        if let Some(pos) = chain.iter().position(|&e| e == id) {
            chain.swap_remove(pos);
        }
        self.free.push(id);
        self.len -= 1;
        key
    }

    /// 为 `key` 预留插入所需的内存，不改变跟踪的键
    ///
    /// 预留之后，一次尾部驱逐加上对同一个键的 [`insert_at_head`](Self::insert_at_head)
    /// 都不再分配。键已存在返回 `AlreadyExists`，分配失败返回 `NoMemory`。
    pub fn reserve(&mut self, key: u64) -> Result<()> {
        if self.find(key).is_some() {
            return Err(Error::new(ErrorKind::AlreadyExists, "Key already tracked"));
        }

        let bucket = self.bucket_of(key);
        let oom = |_| Error::new(ErrorKind::NoMemory, "Failed to allocate recency entry");
        self.buckets[bucket].try_reserve(1).map_err(oom)?;
        if self.free.is_empty() {
            self.entries.try_reserve(1).map_err(oom)?;
        }
        self.free.try_reserve(1).map_err(oom)?;
        Ok(())
    }

    /// 在头部插入新键
    ///
    /// 分配失败返回 `NoMemory`，键已存在返回 `AlreadyExists`，两种情况下状态都不变。
    pub fn insert_at_head(&mut self, key: u64) -> Result<()> {
        self.reserve(key)?;

        let bucket = self.bucket_of(key);
        let entry = Entry { key, prev: None, next: None };
        let id = match self.free.pop() {
            Some(id) => {
                self.entries[id] = entry;
                id
            }
            None => {
                self.entries.push(entry);
                self.entries.len() - 1
            }
        };
        self.buckets[bucket].push(id);
        self.link_front(id);
        self.len += 1;
        log::trace!("[LRU] insert key={} at head, size={}", key, self.len);
        Ok(())
    }

    /// 标记为最近使用（移到头部）
    ///
    /// 已在头部时什么都不做。键不存在时返回 `false`。
    pub fn touch(&mut self, key: u64) -> bool {
        let Some(id) = self.find(key) else {
            return false;
        };
        if self.head != Some(id) {
            self.unlink(id);
            self.link_front(id);
            log::trace!("[LRU] touch key={}", key);
        }
        true
    }

    /// 移除并返回尾部（最久未使用）的键
    ///
    /// 调用者负责写回并从块索引中删除对应的块。为空时返回 `None`。
    pub fn evict_tail(&mut self) -> Option<u64> {
        let id = self.tail?;
        let key = self.remove_entry(id);
        log::trace!("[LRU] evict tail key={}, size={}", key, self.len);
        Some(key)
    }

    /// 显式移除键
    pub fn remove(&mut self, key: u64) -> bool {
        match self.find(key) {
            Some(id) => {
                self.remove_entry(id);
                true
            }
            None => false,
        }
    }

    /// 是否包含键
    pub fn contains(&self, key: u64) -> bool {
        self.find(key).is_some()
    }

    /// 最近使用的键
    pub fn head(&self) -> Option<u64> {
        self.head.map(|id| self.entries[id].key)
    }

    /// 最久未使用的键
    pub fn tail(&self) -> Option<u64> {
        self.tail.map(|id| self.entries[id].key)
    }

    /// 从最近到最久的全部键
    pub fn keys(&self) -> Vec<u64> {
        let mut keys = Vec::with_capacity(self.len);
        let mut cur = self.head;
        while let Some(id) = cur {
            keys.push(self.entries[id].key);
            cur = self.entries[id].next;
        }
        keys
    }

    /// 清空
    pub fn clear(&mut self) {
        self.entries.clear();
        self.free.clear();
        for chain in &mut self.buckets {
            chain.clear();
        }
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    /// 条目数
    pub fn len(&self) -> usize {
        self.len
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 哈希桶数
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

impl core::fmt::Debug for RecencyTracker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RecencyTracker")
            .field("len", &self.len)
            .field("buckets", &self.buckets.len())
            .field("mru_to_lru", &self.keys())
            .finish()
    }
}
