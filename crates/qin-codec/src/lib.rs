//! # qin-codec
//!
//! Qin 音频框架编解码库, 提供解码器框架与 Packet/Frame 抽象.
//!
//! 本 crate 定义了解码器注册与解码流程的核心抽象.
//!
//! ## 支持的解码器
//!
//! - **Vorbis**: 完整的 Vorbis I 解码链路 (头包解析, codebook/floor/residue,
//!   IMDCT 与重叠相加)
//!
//! ## 使用示例
//!
//! ```rust
//! use qin_codec::{CodecRegistry, CodecId};
//!
//! let mut reg = CodecRegistry::new();
//! qin_codec::register_all(&mut reg);
//!
//! let decoder = reg.create_decoder(CodecId::Vorbis).unwrap();
//! assert_eq!(decoder.name(), "vorbis");
//! ```

pub mod codec_id;
pub mod codec_parameters;
pub mod decoder;
pub mod decoders;
pub mod frame;
pub mod packet;
pub mod registry;

// 重导出常用类型
pub use codec_id::CodecId;
pub use codec_parameters::{AudioCodecParams, CodecParameters, CodecParamsType};
pub use decoder::Decoder;
pub use frame::{AudioFrame, Frame};
pub use packet::Packet;
pub use registry::CodecRegistry;

/// 注册所有内置解码器
pub fn register_all(registry: &mut CodecRegistry) {
    decoders::register_all_decoders(registry);
}
