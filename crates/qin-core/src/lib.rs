//! # qin-core
//!
//! Qin 音频框架核心库, 提供基础类型定义、错误处理和工具函数.
//!
//! 本 crate 为整个 Qin 框架提供底层基础设施.

pub mod channel_layout;
pub mod error;
pub mod media_type;
pub mod rational;
pub mod sample_format;
pub mod timestamp;

// 重导出常用类型
pub use channel_layout::ChannelLayout;
pub use error::{QinError, QinResult};
pub use media_type::MediaType;
pub use rational::Rational;
pub use sample_format::SampleFormat;
