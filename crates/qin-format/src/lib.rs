//! # qin-format
//!
//! Qin 多媒体框架容器格式库, 提供解封装框架与 I/O 抽象.

pub mod demuxer;
pub mod demuxers;
pub mod format_id;
pub mod io;
pub mod probe;
pub mod registry;
pub mod stream;

// 重导出常用类型
pub use demuxer::{Demuxer, SeekFlags};
pub use format_id::FormatId;
pub use io::IoContext;
pub use probe::ProbeResult;
pub use registry::FormatRegistry;
pub use stream::Stream;

/// 注册所有内置容器格式
pub fn register_all(registry: &mut FormatRegistry) {
    demuxers::register_all_demuxers(registry);
}
