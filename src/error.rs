//! 错误类型定义
//!
//! 提供块缓存操作的错误类型。

use core::fmt;

/// 块缓存操作错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: &'static str,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// 内存分配失败（块缓冲区或节点）
    NoMemory,
    /// 后端打开失败（文件或设备不可用）
    BackendUnavailable,
    /// 后端 I/O 错误（定位读写或块传输失败）
    Io,
    /// 描述符或键不存在
    NotFound,
    /// 无效参数
    InvalidInput,
    /// 已存在
    AlreadyExists,
    /// 内部不变量被破坏（索引与 LRU 不一致）
    InvalidState,
}

impl Error {
    /// 创建新错误
    pub const fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self { kind, message }
    }

    /// 获取错误类型
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 获取错误消息
    pub const fn message(&self) -> &'static str {
        self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[cfg(feature = "std")]
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as IoKind;
        match err.kind() {
            IoKind::OutOfMemory => Error::new(ErrorKind::NoMemory, "Backend ran out of memory"),
            IoKind::UnexpectedEof => Error::new(ErrorKind::Io, "Unexpected end of backend"),
            IoKind::WriteZero => Error::new(ErrorKind::Io, "Backend accepted zero bytes"),
            _ => Error::new(ErrorKind::Io, "Backend I/O error"),
        }
    }
}

/// Result 类型别名
pub type Result<T> = core::result::Result<T, Error>;
