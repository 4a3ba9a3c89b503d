//! 缓存配置

use crate::consts::{BLOCK_SIZE, FD_TABLE_BUCKETS, LRU_HASH_BUCKETS, MAX_CACHE_ENTRIES};
use crate::error::{Error, ErrorKind, Result};

/// 块缓存配置
///
/// 所有字段必须非零，由 [`CacheConfig::validate`] 检查。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// 块大小（字节）
    pub block_size: usize,
    /// 每个文件上下文的最大驻留块数
    pub max_blocks: usize,
    /// 描述符表桶数
    pub fd_buckets: usize,
    /// LRU 哈希桶数
    pub lru_buckets: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
            max_blocks: MAX_CACHE_ENTRIES,
            fd_buckets: FD_TABLE_BUCKETS,
            lru_buckets: LRU_HASH_BUCKETS,
        }
    }
}

impl CacheConfig {
    /// 设置块大小
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// 设置每个上下文的最大驻留块数
    pub fn with_max_blocks(mut self, max_blocks: usize) -> Self {
        self.max_blocks = max_blocks;
        self
    }

    /// 设置描述符表桶数
    pub fn with_fd_buckets(mut self, fd_buckets: usize) -> Self {
        self.fd_buckets = fd_buckets;
        self
    }

    /// 设置 LRU 哈希桶数
    pub fn with_lru_buckets(mut self, lru_buckets: usize) -> Self {
        self.lru_buckets = lru_buckets;
        self
    }

    /// 检查配置是否有效
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "Block size must be non-zero"));
        }
        if self.max_blocks == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "Cache capacity must be non-zero"));
        }
        if self.fd_buckets == 0 || self.lru_buckets == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "Bucket counts must be non-zero"));
        }
        Ok(())
    }

    /// 从环境变量读取配置
    ///
    /// 未设置的变量使用默认值；无法解析的值返回 `InvalidInput`。
    #[cfg(feature = "std")]
    pub fn from_env() -> Result<Self> {
        use crate::consts::{ENV_BLOCK_SIZE, ENV_FD_BUCKETS, ENV_LRU_BUCKETS, ENV_MAX_BLOCKS};

        let defaults = Self::default();
        let config = Self {
            block_size: env_usize(ENV_BLOCK_SIZE, defaults.block_size)?,
            max_blocks: env_usize(ENV_MAX_BLOCKS, defaults.max_blocks)?,
            fd_buckets: env_usize(ENV_FD_BUCKETS, defaults.fd_buckets)?,
            lru_buckets: env_usize(ENV_LRU_BUCKETS, defaults.lru_buckets)?,
        };
        config.validate()?;
        log::debug!("[CONFIG] loaded from environment: {:?}", config);
        Ok(config)
    }
}

#[cfg(feature = "std")]
fn env_usize(name: &str, default: usize) -> Result<usize> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse::<usize>().map_err(|_| {
            log::error!("[CONFIG] {} is not a number: {:?}", name, raw);
            Error::new(ErrorKind::InvalidInput, "Configuration variable is not a number")
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.block_size, 512);
        assert_eq!(config.max_blocks, 5);
        assert_eq!(config.fd_buckets, 5);
        assert_eq!(config.lru_buckets, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_fields_rejected() {
        let zero_block = CacheConfig::default().with_block_size(0);
        assert_eq!(zero_block.validate().unwrap_err().kind(), ErrorKind::InvalidInput);

        let zero_capacity = CacheConfig::default().with_max_blocks(0);
        assert!(zero_capacity.validate().is_err());

        let zero_buckets = CacheConfig::default().with_lru_buckets(0);
        assert!(zero_buckets.validate().is_err());
    }

    #[cfg(feature = "std")]
    #[test]
    fn test_env_usize_fallback() {
        assert_eq!(env_usize("BLKCACHE_TEST_SURELY_UNSET_VARIABLE", 64).unwrap(), 64);
    }
}
