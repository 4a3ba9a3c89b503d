//! 基于文件的后端（需要 `std`）
//!
//! [`HostFile`] 在 unix 上使用 `std::os::unix::fs::FileExt` 做定位读写，不依赖共享的文件位置；
//! 其他平台先 `seek` 再读写。
//! [`CharDevice`] 对应块设备驱动导出的字符设备：先 `seek`，再用一次
//! `read` / `write` 传输一整块。

use super::device::{BackendKind, BlockBackend, BlockTransfer, DeviceBackend, HostBackend, HostIo, TransferRequest};
use crate::error::{Error, ErrorKind, Result};
use alloc::boxed::Box;
use bitflags::bitflags;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
#[cfg(unix)]
use std::os::unix::fs::FileExt;
use std::path::Path;

bitflags! {
    /// 打开标志
    ///
    /// 对应 `open(2)` 的 `O_RDONLY` / `O_WRONLY` / `O_CREAT` / `O_TRUNC`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u8 {
        /// 可读
        const READ     = 0x01;
        /// 可写
        const WRITE    = 0x02;
        /// 不存在时创建
        const CREATE   = 0x04;
        /// 打开时截断
        const TRUNCATE = 0x08;
        /// 读写
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl OpenFlags {
    fn to_options(self) -> OpenOptions {
        let mut options = OpenOptions::new();
        options
            .read(self.contains(OpenFlags::READ))
            .write(self.contains(OpenFlags::WRITE))
            .create(self.contains(OpenFlags::CREATE))
            .truncate(self.contains(OpenFlags::TRUNCATE));
        options
    }
}

fn open_file(path: &Path, flags: OpenFlags) -> Result<File> {
    flags.to_options().open(path).map_err(|err| {
        log::error!("[BACKEND] failed to open {}: {}", path.display(), err);
        Error::new(ErrorKind::BackendUnavailable, "Failed to open backend")
    })
}

/// 按路径打开后端
///
/// `kind` 为 `Host` 时打开普通文件，为 `Device` 时打开字符设备。
/// 打开失败返回 `BackendUnavailable`。
pub fn open_backend(
    path: impl AsRef<Path>,
    flags: OpenFlags,
    kind: BackendKind,
    block_size: usize,
) -> Result<Box<dyn BlockBackend>> {
    let path = path.as_ref();
    let backend: Box<dyn BlockBackend> = match kind {
        BackendKind::Host => Box::new(HostBackend::new(HostFile::open(path, flags)?)),
        BackendKind::Device => Box::new(DeviceBackend::new(CharDevice::open(path, flags, block_size)?)),
    };
    log::info!("[BACKEND] opened {} as {:?}", path.display(), kind);
    Ok(backend)
}

/// 普通文件
#[derive(Debug)]
pub struct HostFile {
    file: File,
}

impl HostFile {
    /// 打开文件
    pub fn open(path: impl AsRef<Path>, flags: OpenFlags) -> Result<Self> {
        Ok(Self {
            file: open_file(path.as_ref(), flags)?,
        })
    }

    /// 包装已打开的文件
    pub fn from_file(file: File) -> Self {
        Self { file }
    }
}

impl HostIo for HostFile {
    #[cfg(unix)]
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        Ok(self.file.read_at(buf, offset)?)
    }

    #[cfg(not(unix))]
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(self.file.read(buf)?)
    }

    #[cfg(unix)]
    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        self.file.write_all_at(buf, offset)?;
        Ok(buf.len())
    }

    #[cfg(not(unix))]
    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn close(&mut self) -> Result<()> {
        Ok(self.file.sync_all()?)
    }
}

/// 字符设备
///
/// 驱动以固定大小的块为传输单位，每次 `read` / `write` 恰好一块。
#[derive(Debug)]
pub struct CharDevice {
    file: File,
    block_size: usize,
}

impl CharDevice {
    /// 打开设备文件
    pub fn open(path: impl AsRef<Path>, flags: OpenFlags, block_size: usize) -> Result<Self> {
        Ok(Self {
            file: open_file(path.as_ref(), flags)?,
            block_size,
        })
    }

    /// 包装已打开的设备文件
    pub fn from_file(file: File, block_size: usize) -> Self {
        Self { file, block_size }
    }
}

impl BlockTransfer for CharDevice {
    fn block_size(&self) -> Option<usize> {
        Some(self.block_size)
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    fn transfer(&mut self, request: TransferRequest<'_>) -> Result<()> {
        if request.len() != self.block_size {
            return Err(Error::new(ErrorKind::InvalidInput, "Device transfer must be one block"));
        }
        match request {
            TransferRequest::Read(buf) => self.file.read_exact(buf)?,
            TransferRequest::Write(buf) => self.file.write_all(buf)?,
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(self.file.flush()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_host_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.img");

        let mut backend = open_backend(
            &path,
            OpenFlags::READ_WRITE | OpenFlags::CREATE,
            BackendKind::Host,
            512,
        )
        .unwrap();
        assert_eq!(backend.kind(), BackendKind::Host);

        // 空文件读出全 0
        let mut buf = vec![0xAAu8; 512];
        backend.fetch_block(512, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));

        backend.store_block(512, &[0x42u8; 512]).unwrap();
        backend.fetch_block(512, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0x42));
        backend.close().unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 1024);
    }

    #[test]
    fn test_char_device_seek_and_transfer() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&[0u8; 128]).unwrap();

        let mut dev = DeviceBackend::new(CharDevice::from_file(file, 64));
        dev.store_block(64, &[7u8; 64]).unwrap();

        let mut buf = [0u8; 64];
        dev.fetch_block(64, &mut buf).unwrap();
        assert_eq!(buf, [7u8; 64]);
        dev.fetch_block(0, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 64]);
    }

    #[test]
    fn test_open_missing_is_backend_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_backend(dir.path().join("missing"), OpenFlags::READ, BackendKind::Device, 512)
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
    }
}
