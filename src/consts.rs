//! 块缓存常量定义
//!
//! 这些值是 [`CacheConfig`](crate::config::CacheConfig) 的默认值。

//=============================================================================
// 块相关
//=============================================================================

/// 默认块大小（字节），缓存与后端传输的基本单位
pub const BLOCK_SIZE: usize = 512;

/// 设备驱动对不足一块的写入使用的填充字节
pub const DEVICE_PAD_BYTE: u8 = 0x55;

//=============================================================================
// 容量与哈希
//=============================================================================

/// 每个文件上下文最多驻留的块数
pub const MAX_CACHE_ENTRIES: usize = 5;

/// 描述符表桶数（`fd % FD_TABLE_BUCKETS`）
pub const FD_TABLE_BUCKETS: usize = 5;

/// LRU 直接查找哈希的桶数（`key % LRU_HASH_BUCKETS`）
pub const LRU_HASH_BUCKETS: usize = 4;

//=============================================================================
// 环境变量
//=============================================================================

/// 块大小环境变量
pub const ENV_BLOCK_SIZE: &str = "BLKCACHE_BLOCK_SIZE";

/// 每上下文最大块数环境变量
pub const ENV_MAX_BLOCKS: &str = "BLKCACHE_MAX_BLOCKS";

/// 描述符表桶数环境变量
pub const ENV_FD_BUCKETS: &str = "BLKCACHE_FD_BUCKETS";

/// LRU 哈希桶数环境变量
pub const ENV_LRU_BUCKETS: &str = "BLKCACHE_LRU_BUCKETS";
