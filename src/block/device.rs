//! 后端核心类型

use crate::error::{Error, ErrorKind, Result};
use alloc::boxed::Box;

/// 后端类型，在 open 时确定且不再改变
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// 可按字节定位读写的文件
    Host,
    /// 只能整块传输的块设备
    Device,
}

/// 缓存使用的统一后端接口
///
/// 缓存只以整块为单位与后端交互，`offset` 总是块大小的整数倍，
/// `buf` 的长度总是一个块。
///
/// # 示例
///
/// ```rust,ignore
/// use blkcache::{BlockBackend, BackendKind, Result};
///
/// struct MyBackend {
///     // ...
/// }
///
/// impl BlockBackend for MyBackend {
///     fn kind(&self) -> BackendKind {
///         BackendKind::Host
///     }
///
///     fn fetch_block(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
///         // 读取一整块
///         Ok(())
///     }
///
///     fn store_block(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
///         // 写入一整块
///         Ok(())
///     }
/// }
/// ```
pub trait BlockBackend: Send {
    /// 后端类型
    fn kind(&self) -> BackendKind;

    /// 从 `offset` 读取一整块到 `buf`
    fn fetch_block(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// 将 `buf` 中的一整块写到 `offset`
    fn store_block(&mut self, offset: u64, buf: &[u8]) -> Result<()>;

    /// 介质要求的传输单位（字节）
    ///
    /// 可按字节定位的介质返回 `None`。
    fn block_size(&self) -> Option<usize> {
        None
    }

    /// 关闭后端
    ///
    /// 在缓存写回全部脏块之后调用。默认实现什么都不做。
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: BlockBackend + ?Sized> BlockBackend for Box<T> {
    fn kind(&self) -> BackendKind {
        (**self).kind()
    }

    fn fetch_block(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).fetch_block(offset, buf)
    }

    fn store_block(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        (**self).store_block(offset, buf)
    }

    fn block_size(&self) -> Option<usize> {
        (**self).block_size()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

//=============================================================================
// Host：定位读写
//=============================================================================

/// 可按字节定位读写的介质（对应 `pread` / `pwrite`）
pub trait HostIo: Send {
    /// 从 `offset` 读取最多 `buf.len()` 字节
    ///
    /// # 返回
    ///
    /// 实际读取的字节数，到达文件末尾时可能小于 `buf.len()`
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// 将 `buf` 写到 `offset`
    ///
    /// # 返回
    ///
    /// 实际写入的字节数
    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize>;

    /// 关闭介质
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Host 后端适配器
///
/// 读取不足一块（文件末尾）时，剩余部分以 0 填充，
/// 与稀疏文件的读语义一致。
pub struct HostBackend<H> {
    io: H,
}

impl<H: HostIo> HostBackend<H> {
    /// 包装一个 Host 介质
    pub fn new(io: H) -> Self {
        Self { io }
    }

    /// 获取底层介质的引用
    pub fn inner(&self) -> &H {
        &self.io
    }
}

impl<H: HostIo> BlockBackend for HostBackend<H> {
    fn kind(&self) -> BackendKind {
        BackendKind::Host
    }

    fn fetch_block(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.io.read_at(&mut buf[filled..], offset + filled as u64)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled < buf.len() {
            log::trace!(
                "[BACKEND] host short read at {:#x}: {}/{} bytes, zero-filling",
                offset,
                filled,
                buf.len()
            );
            buf[filled..].fill(0);
        }
        Ok(())
    }

    fn store_block(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        let written = self.io.write_at(buf, offset)?;
        if written != buf.len() {
            log::error!(
                "[BACKEND] host short write at {:#x}: {}/{} bytes",
                offset,
                written,
                buf.len()
            );
            return Err(Error::new(ErrorKind::Io, "Short write to host backend"));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.io.close()
    }
}

//=============================================================================
// Device：定位 + 整块传输
//=============================================================================

/// 传输方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// 从设备读入
    Read,
    /// 写到设备
    Write,
}

/// 一次整块传输请求
///
/// 对应驱动中通过 ioctl 发起的扇区读写，缓冲区恰好一块。
#[derive(Debug)]
pub enum TransferRequest<'a> {
    /// 读取一块到缓冲区
    Read(&'a mut [u8]),
    /// 将缓冲区写成一块
    Write(&'a [u8]),
}

impl TransferRequest<'_> {
    /// 传输方向
    pub fn direction(&self) -> TransferDirection {
        match self {
            TransferRequest::Read(_) => TransferDirection::Read,
            TransferRequest::Write(_) => TransferDirection::Write,
        }
    }

    /// 传输长度（字节）
    pub fn len(&self) -> usize {
        match self {
            TransferRequest::Read(buf) => buf.len(),
            TransferRequest::Write(buf) => buf.len(),
        }
    }

    /// 是否为空传输
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 只能整块传输的介质
///
/// 先 `seek` 定位，再用一次 `transfer` 完成一块的读或写。
pub trait BlockTransfer: Send {
    /// 定位到字节偏移 `offset`（块对齐）
    fn seek(&mut self, offset: u64) -> Result<()>;

    /// 在当前位置传输一整块
    fn transfer(&mut self, request: TransferRequest<'_>) -> Result<()>;

    /// 固定的块大小，未知时返回 `None`
    fn block_size(&self) -> Option<usize> {
        None
    }

    /// 关闭设备
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Device 后端适配器
pub struct DeviceBackend<D> {
    dev: D,
}

impl<D: BlockTransfer> DeviceBackend<D> {
    /// 包装一个块设备
    pub fn new(dev: D) -> Self {
        Self { dev }
    }

    /// 获取底层设备的引用
    pub fn inner(&self) -> &D {
        &self.dev
    }
}

impl<D: BlockTransfer> BlockBackend for DeviceBackend<D> {
    fn kind(&self) -> BackendKind {
        BackendKind::Device
    }

    fn block_size(&self) -> Option<usize> {
        self.dev.block_size()
    }

    fn fetch_block(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.dev.seek(offset)?;
        self.dev.transfer(TransferRequest::Read(buf))
    }

    fn store_block(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.dev.seek(offset)?;
        self.dev.transfer(TransferRequest::Write(buf))
    }

    fn close(&mut self) -> Result<()> {
        self.dev.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    /// 每次最多返回 3 字节的 Host 介质
    struct TrickleHost {
        data: Vec<u8>,
    }

    impl HostIo for TrickleHost {
        fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
            let start = offset as usize;
            if start >= self.data.len() {
                return Ok(0);
            }
            let n = buf.len().min(3).min(self.data.len() - start);
            buf[..n].copy_from_slice(&self.data[start..start + n]);
            Ok(n)
        }

        fn write_at(&mut self, buf: &[u8], _offset: u64) -> Result<usize> {
            Ok(buf.len().min(3))
        }
    }

    #[test]
    fn test_host_fetch_loops_and_zero_fills() {
        let mut backend = HostBackend::new(TrickleHost { data: vec![7u8; 10] });
        let mut buf = vec![0xFFu8; 16];
        backend.fetch_block(0, &mut buf).unwrap();
        assert_eq!(&buf[..10], &[7u8; 10]);
        assert_eq!(&buf[10..], &[0u8; 6]);
        assert_eq!(backend.kind(), BackendKind::Host);
    }

    #[test]
    fn test_host_short_write_is_error() {
        let mut backend = HostBackend::new(TrickleHost { data: Vec::new() });
        let err = backend.store_block(0, &[1u8; 8]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_block_size_reported_by_device_only() {
        let host = HostBackend::new(TrickleHost { data: Vec::new() });
        assert_eq!(host.block_size(), None);

        let device: Box<dyn BlockBackend> = Box::new(DeviceBackend::new(crate::block::RamDisk::new(64, 4)));
        assert_eq!(device.block_size(), Some(64));
        assert_eq!(device.kind(), BackendKind::Device);
    }

    #[test]
    fn test_transfer_request_direction() {
        let mut buf = [0u8; 4];
        assert_eq!(TransferRequest::Read(&mut buf).direction(), TransferDirection::Read);
        let req = TransferRequest::Write(&buf);
        assert_eq!(req.direction(), TransferDirection::Write);
        assert_eq!(req.len(), 4);
        assert!(!req.is_empty());
    }
}
