//! 内存介质
//!
//! [`MemHost`] 模拟可按字节定位读写的文件，[`RamDisk`] 模拟只能整块传输的块设备。
//! 两者都通过 [`SharedStorage`] 暴露底层字节，便于在缓存之外检查写回结果。

use super::device::{BlockTransfer, HostIo, TransferRequest};
use crate::consts::DEVICE_PAD_BYTE;
use crate::error::{Error, ErrorKind, Result};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use spin::Mutex;

struct StorageInner {
    bytes: Mutex<Vec<u8>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

/// 共享的介质内容
///
/// 克隆得到的是同一份存储的另一个句柄。
#[derive(Clone)]
pub struct SharedStorage {
    inner: Arc<StorageInner>,
}

impl SharedStorage {
    fn new(bytes: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(StorageInner {
                bytes: Mutex::new(bytes),
                reads: AtomicUsize::new(0),
                writes: AtomicUsize::new(0),
            }),
        }
    }

    /// 当前内容长度
    pub fn len(&self) -> usize {
        self.inner.bytes.lock().len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 复制 `[offset, offset + len)` 的内容，超出末尾的部分被截断
    pub fn read(&self, offset: usize, len: usize) -> Vec<u8> {
        let bytes = self.inner.bytes.lock();
        let start = offset.min(bytes.len());
        let end = offset.saturating_add(len).min(bytes.len());
        bytes[start..end].to_vec()
    }

    /// 复制全部内容
    pub fn snapshot(&self) -> Vec<u8> {
        self.inner.bytes.lock().clone()
    }

    /// 绕过介质接口直接改写内容（不计入读写次数）
    ///
    /// 写到末尾之后会以 0 扩展。
    pub fn overwrite(&self, offset: usize, data: &[u8]) {
        let mut bytes = self.inner.bytes.lock();
        let end = offset + data.len();
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        bytes[offset..end].copy_from_slice(data);
    }

    /// 介质被读取的次数
    pub fn read_ops(&self) -> usize {
        self.inner.reads.load(Ordering::Relaxed)
    }

    /// 介质被写入的次数
    pub fn write_ops(&self) -> usize {
        self.inner.writes.load(Ordering::Relaxed)
    }

    fn count_read(&self) {
        self.inner.reads.fetch_add(1, Ordering::Relaxed);
    }

    fn count_write(&self) {
        self.inner.writes.fetch_add(1, Ordering::Relaxed);
    }
}

impl core::fmt::Debug for SharedStorage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SharedStorage")
            .field("len", &self.len())
            .field("read_ops", &self.read_ops())
            .field("write_ops", &self.write_ops())
            .finish()
    }
}

//=============================================================================
// MemHost
//=============================================================================

/// 内存中的 Host 文件
///
/// 读到末尾之后返回短读，写到末尾之后自动扩展。
#[derive(Debug, Clone)]
pub struct MemHost {
    storage: SharedStorage,
}

impl MemHost {
    /// 创建空文件
    pub fn new() -> Self {
        Self::with_contents(Vec::new())
    }

    /// 用给定内容创建文件
    pub fn with_contents(bytes: Vec<u8>) -> Self {
        Self {
            storage: SharedStorage::new(bytes),
        }
    }

    /// 共享存储句柄
    pub fn storage(&self) -> SharedStorage {
        self.storage.clone()
    }
}

impl Default for MemHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostIo for MemHost {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.storage.count_read();
        let bytes = self.storage.inner.bytes.lock();
        let start = usize::try_from(offset)
            .map_err(|_| Error::new(ErrorKind::InvalidInput, "Offset exceeds address space"))?;
        if start >= bytes.len() {
            return Ok(0);
        }
        let n = buf.len().min(bytes.len() - start);
        buf[..n].copy_from_slice(&bytes[start..start + n]);
        Ok(n)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        self.storage.count_write();
        let start = usize::try_from(offset)
            .map_err(|_| Error::new(ErrorKind::InvalidInput, "Offset exceeds address space"))?;
        self.storage.overwrite(start, buf);
        Ok(buf.len())
    }
}

//=============================================================================
// RamDisk
//=============================================================================

/// 内存中的块设备
///
/// 固定容量，只接受块对齐的定位和不超过一块的传输。
/// 不足一块的写入以 [`DEVICE_PAD_BYTE`] 填充到块边界。
#[derive(Debug)]
pub struct RamDisk {
    storage: SharedStorage,
    block_size: usize,
    position: u64,
}

impl RamDisk {
    /// 创建 `blocks` 块、每块 `block_size` 字节的设备，初始内容为 0
    pub fn new(block_size: usize, blocks: usize) -> Self {
        Self {
            storage: SharedStorage::new(alloc::vec![0u8; block_size * blocks]),
            block_size,
            position: 0,
        }
    }

    /// 块大小
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// 当前定位
    pub fn position(&self) -> u64 {
        self.position
    }

    /// 共享存储句柄
    pub fn storage(&self) -> SharedStorage {
        self.storage.clone()
    }

    fn block_range(&self, len: usize) -> Result<(usize, usize)> {
        if len > self.block_size {
            return Err(Error::new(ErrorKind::InvalidInput, "Transfer larger than one block"));
        }
        let start = usize::try_from(self.position)
            .map_err(|_| Error::new(ErrorKind::Io, "Position beyond end of device"))?;
        let end = start + self.block_size;
        if end > self.storage.len() {
            log::error!("[BACKEND] ramdisk transfer at {:#x} beyond end of device", start);
            return Err(Error::new(ErrorKind::Io, "Transfer beyond end of device"));
        }
        Ok((start, end))
    }
}

impl BlockTransfer for RamDisk {
    fn block_size(&self) -> Option<usize> {
        Some(self.block_size)
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        if offset % self.block_size as u64 != 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "Device seek must be block aligned"));
        }
        self.position = offset;
        Ok(())
    }

    fn transfer(&mut self, request: TransferRequest<'_>) -> Result<()> {
        let (start, end) = self.block_range(request.len())?;
        match request {
            TransferRequest::Read(buf) => {
                self.storage.count_read();
                let bytes = self.storage.inner.bytes.lock();
                buf.copy_from_slice(&bytes[start..start + buf.len()]);
            }
            TransferRequest::Write(buf) => {
                self.storage.count_write();
                let mut bytes = self.storage.inner.bytes.lock();
                bytes[start..start + buf.len()].copy_from_slice(buf);
                bytes[start + buf.len()..end].fill(DEVICE_PAD_BYTE);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_mem_host_short_read_and_extend() {
        let mut host = MemHost::with_contents(vec![1, 2, 3]);
        let mut buf = [0u8; 8];
        assert_eq!(host.read_at(&mut buf, 1).unwrap(), 2);
        assert_eq!(&buf[..2], &[2, 3]);
        assert_eq!(host.read_at(&mut buf, 10).unwrap(), 0);

        assert_eq!(host.write_at(&[9, 9], 5).unwrap(), 2);
        assert_eq!(host.storage().snapshot(), vec![1, 2, 3, 0, 0, 9, 9]);
        assert_eq!(host.storage().read_ops(), 2);
        assert_eq!(host.storage().write_ops(), 1);
    }

    #[test]
    fn test_ramdisk_pads_short_write() {
        let mut disk = RamDisk::new(8, 2);
        disk.seek(8).unwrap();
        disk.transfer(TransferRequest::Write(&[1, 2, 3])).unwrap();
        assert_eq!(
            disk.storage().read(8, 8),
            vec![1, 2, 3, DEVICE_PAD_BYTE, DEVICE_PAD_BYTE, DEVICE_PAD_BYTE, DEVICE_PAD_BYTE, DEVICE_PAD_BYTE]
        );

        let mut buf = [0u8; 8];
        disk.transfer(TransferRequest::Read(&mut buf)).unwrap();
        assert_eq!(buf[0], 1);
    }

    #[test]
    fn test_ramdisk_rejects_bad_requests() {
        let mut disk = RamDisk::new(8, 2);
        assert_eq!(disk.seek(3).unwrap_err().kind(), ErrorKind::InvalidInput);

        disk.seek(16).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(
            disk.transfer(TransferRequest::Read(&mut buf)).unwrap_err().kind(),
            ErrorKind::Io
        );

        disk.seek(0).unwrap();
        let mut big = [0u8; 9];
        assert_eq!(
            disk.transfer(TransferRequest::Read(&mut big)).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
    }
}
