//! I/O 抽象层.
//!
//! 提供统一的字节流读取接口, 支持文件与内存两种后端.
//! `IoContext` 在后端之上做带缓冲的顺序读取, seek 时丢弃缓冲.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use qin_core::{QinError, QinResult};

/// 内部缓冲区大小
const BUFFER_SIZE: usize = 32 * 1024;

/// I/O 后端 trait
///
/// 实现此 trait 即可作为 `IoContext` 的数据源.
pub trait IoBackend: Send {
    /// 读取数据到缓冲区, 返回实际读取的字节数 (0 表示 EOF)
    fn read(&mut self, buf: &mut [u8]) -> QinResult<usize>;

    /// 定位到指定位置, 返回新的绝对位置
    fn seek(&mut self, pos: SeekFrom) -> QinResult<u64>;

    /// 当前绝对位置
    fn position(&mut self) -> QinResult<u64>;

    /// 数据总大小, None 表示未知
    fn size(&mut self) -> Option<u64>;

    /// 是否支持 seek
    fn is_seekable(&self) -> bool;
}

/// 带缓冲的 I/O 上下文
///
/// 包装一个 `IoBackend`, 提供便捷的读取方法.
pub struct IoContext {
    inner: Box<dyn IoBackend>,
    buffer: Vec<u8>,
    /// 缓冲区内有效数据长度
    buf_len: usize,
    /// 缓冲区内已消费位置
    buf_pos: usize,
}

impl IoContext {
    /// 用给定后端创建 I/O 上下文
    pub fn new(backend: Box<dyn IoBackend>) -> Self {
        Self {
            inner: backend,
            buffer: vec![0u8; BUFFER_SIZE],
            buf_len: 0,
            buf_pos: 0,
        }
    }

    /// 打开本地文件用于读取
    pub fn open_read(path: impl AsRef<Path>) -> QinResult<Self> {
        let backend = FileBackend::open(path)?;
        Ok(Self::new(Box::new(backend)))
    }

    /// 从内存数据创建 I/O 上下文
    pub fn from_data(data: Vec<u8>) -> Self {
        Self::new(Box::new(MemoryBackend::from_data(data)))
    }

    /// 填充内部缓冲区
    fn fill_buffer(&mut self) -> QinResult<usize> {
        self.buf_pos = 0;
        self.buf_len = self.inner.read(&mut self.buffer)?;
        Ok(self.buf_len)
    }

    /// 读取精确数量的字节, 数据不足时返回 `QinError::Eof`
    pub fn read_exact(&mut self, buf: &mut [u8]) -> QinResult<()> {
        let mut filled = 0;
        while filled < buf.len() {
            if self.buf_pos >= self.buf_len {
                if self.fill_buffer()? == 0 {
                    return Err(QinError::Eof);
                }
            }
            let available = self.buf_len - self.buf_pos;
            let want = (buf.len() - filled).min(available);
            buf[filled..filled + want]
                .copy_from_slice(&self.buffer[self.buf_pos..self.buf_pos + want]);
            self.buf_pos += want;
            filled += want;
        }
        Ok(())
    }

    /// 尽量读取数据, 返回实际读取的字节数 (0 表示 EOF)
    pub fn read_partial(&mut self, buf: &mut [u8]) -> QinResult<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            if self.buf_pos >= self.buf_len {
                if self.fill_buffer()? == 0 {
                    break;
                }
            }
            let available = self.buf_len - self.buf_pos;
            let want = (buf.len() - filled).min(available);
            buf[filled..filled + want]
                .copy_from_slice(&self.buffer[self.buf_pos..self.buf_pos + want]);
            self.buf_pos += want;
            filled += want;
        }
        Ok(filled)
    }

    /// 读取指定数量的字节并返回
    pub fn read_bytes(&mut self, len: usize) -> QinResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// 读取单个字节
    pub fn read_u8(&mut self) -> QinResult<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    /// 定位到指定位置, 丢弃缓冲数据
    pub fn seek(&mut self, pos: SeekFrom) -> QinResult<u64> {
        // SeekFrom::Current 须补偿缓冲区内未消费的数据
        let adjusted = match pos {
            SeekFrom::Current(delta) => {
                let buffered = (self.buf_len - self.buf_pos) as i64;
                SeekFrom::Current(delta - buffered)
            }
            other => other,
        };
        self.buf_len = 0;
        self.buf_pos = 0;
        self.inner.seek(adjusted)
    }

    /// 当前读取位置 (逻辑位置, 已计入缓冲)
    pub fn position(&mut self) -> QinResult<u64> {
        let raw = self.inner.position()?;
        Ok(raw - (self.buf_len - self.buf_pos) as u64)
    }

    /// 数据总大小, None 表示未知
    pub fn size(&mut self) -> Option<u64> {
        self.inner.size()
    }

    /// 是否支持 seek
    pub fn is_seekable(&self) -> bool {
        self.inner.is_seekable()
    }
}

/// 文件后端
pub struct FileBackend {
    file: File,
}

impl FileBackend {
    /// 打开文件用于读取
    pub fn open(path: impl AsRef<Path>) -> QinResult<Self> {
        let file = File::open(path.as_ref()).map_err(QinError::Io)?;
        Ok(Self { file })
    }
}

impl IoBackend for FileBackend {
    fn read(&mut self, buf: &mut [u8]) -> QinResult<usize> {
        self.file.read(buf).map_err(QinError::Io)
    }

    fn seek(&mut self, pos: SeekFrom) -> QinResult<u64> {
        self.file.seek(pos).map_err(QinError::Io)
    }

    fn position(&mut self) -> QinResult<u64> {
        self.file.stream_position().map_err(QinError::Io)
    }

    fn size(&mut self) -> Option<u64> {
        self.file.metadata().ok().map(|m| m.len())
    }

    fn is_seekable(&self) -> bool {
        true
    }
}

/// 内存后端
pub struct MemoryBackend {
    data: Vec<u8>,
    pos: usize,
}

impl MemoryBackend {
    /// 从已有数据创建内存后端
    pub fn from_data(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }
}

impl IoBackend for MemoryBackend {
    fn read(&mut self, buf: &mut [u8]) -> QinResult<usize> {
        let available = self.data.len().saturating_sub(self.pos);
        let want = buf.len().min(available);
        buf[..want].copy_from_slice(&self.data[self.pos..self.pos + want]);
        self.pos += want;
        Ok(want)
    }

    fn seek(&mut self, pos: SeekFrom) -> QinResult<u64> {
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(delta) => self.data.len() as i64 + delta,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
        };
        if new_pos < 0 {
            return Err(QinError::InvalidData("seek 到负位置".to_string()));
        }
        self.pos = new_pos as usize;
        Ok(self.pos as u64)
    }

    fn position(&mut self) -> QinResult<u64> {
        Ok(self.pos as u64)
    }

    fn size(&mut self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn is_seekable(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_内存后端读取() {
        let mut io = IoContext::from_data(vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(io.read_u8().unwrap(), 1);
        assert_eq!(io.read_bytes(4).unwrap(), vec![2, 3, 4, 5]);
        assert_eq!(io.position().unwrap(), 5);
        assert_eq!(io.size(), Some(8));
    }

    #[test]
    fn test_读取超出末尾返回eof() {
        let mut io = IoContext::from_data(vec![1, 2]);
        let mut buf = [0u8; 4];
        assert!(matches!(io.read_exact(&mut buf), Err(QinError::Eof)));
    }

    #[test]
    fn test_seek补偿缓冲区() {
        let data: Vec<u8> = (0..100).collect();
        let mut io = IoContext::from_data(data);
        let mut buf = [0u8; 10];
        io.read_exact(&mut buf).unwrap();
        // 缓冲区已一次性读入全部 100 字节, Current seek 须按逻辑位置计算
        io.seek(SeekFrom::Current(5)).unwrap();
        assert_eq!(io.read_u8().unwrap(), 15);
    }

    #[test]
    fn test_文件后端() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"hello qin").unwrap();
        tmp.flush().unwrap();
        let mut io = IoContext::open_read(tmp.path()).unwrap();
        assert_eq!(io.size(), Some(9));
        let buf = io.read_bytes(5).unwrap();
        assert_eq!(&buf, b"hello");
        io.seek(SeekFrom::Start(6)).unwrap();
        assert_eq!(io.read_bytes(3).unwrap(), b"qin");
    }
}
