//! 块缓存模块
//!
//! 每个打开的描述符拥有一份独立的写回缓存：有容量上限，按 LRU 驱逐。
//!
//! # 主要组件
//!
//! - [`CacheBlock`] - 单个缓存块，包含数据和状态标志
//! - [`BlockIndex`] - 按块号排序的平衡树（AVL），拥有全部驻留块
//! - [`RecencyTracker`] - LRU 访问顺序，带直接查找哈希
//! - [`FileContext`] - 把读写请求切块，驱动命中、缺失、驱逐和写回
//! - [`CacheStats`] - 缓存统计信息
//!
//! # 不变式
//!
//! 索引与 LRU 中的块号集合始终相同，驻留块数不超过容量。
//! 脏块在被驱逐或释放前一定已经写回。
//!
//! # 驱逐
//!
//! 缓存满时先按块号升序写回**全部**脏块，再删除 LRU 尾部的一块：
//!
//! ```text
//! resident == capacity, miss on block N
//!   ├─ flush: 所有 DIRTY 块 -> backend，清除 DIRTY
//!   ├─ evict: LRU tail -> 从索引删除
//!   └─ insert: N -> LRU head + 索引
//! ```
//!
//! # 内存分配要求
//!
//! 本模块依赖 `alloc` crate。块数据分配失败时返回 `NoMemory` 而不是 abort。

mod buffer;
mod context;
mod index;
mod lru;

pub use buffer::{BlockFlags, CacheBlock};
pub use context::{CacheStats, FileContext};
pub use index::BlockIndex;
pub use lru::RecencyTracker;
