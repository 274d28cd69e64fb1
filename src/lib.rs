//! # Qin
//!
//! 纯 Rust 实现的 Ogg/Vorbis 音频解码框架.
//!
//! 本 crate 是门面 (facade), 重导出各子 crate 的常用类型并提供
//! 默认注册表. 典型用法:
//!
//! ```rust,no_run
//! use qin::{default_codec_registry, default_format_registry, IoContext};
//!
//! let formats = default_format_registry();
//! let codecs = default_codec_registry();
//!
//! let mut io = IoContext::open_read("music.ogg")?;
//! let mut demuxer = formats.open_input(&mut io, Some("music.ogg"))?;
//! let stream = &demuxer.streams()[0];
//! let mut decoder = codecs.create_decoder(stream.codec_id)?;
//! decoder.open(&stream.codec_parameters())?;
//!
//! while let Ok(packet) = demuxer.read_packet(&mut io) {
//!     decoder.send_packet(&packet)?;
//!     while let Ok(frame) = decoder.receive_frame() {
//!         // 处理解码出的音频帧
//!         let _ = frame;
//!     }
//! }
//! # Ok::<(), qin::QinError>(())
//! ```

pub use qin_core::{
    ChannelLayout, MediaType, QinError, QinResult, Rational, SampleFormat, timestamp,
};

pub use qin_codec::{
    AudioFrame, CodecId, CodecParameters, CodecRegistry, Decoder, Frame, Packet,
};

pub use qin_format::{
    Demuxer, FormatId, FormatRegistry, IoContext, ProbeResult, SeekFlags, Stream,
};

/// 框架版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 创建并填充默认的编解码器注册表
pub fn default_codec_registry() -> CodecRegistry {
    let mut registry = CodecRegistry::new();
    qin_codec::register_all(&mut registry);
    registry
}

/// 创建并填充默认的容器格式注册表
pub fn default_format_registry() -> FormatRegistry {
    let mut registry = FormatRegistry::new();
    qin_format::register_all(&mut registry);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_版本号() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_默认注册表() {
        let codecs = default_codec_registry();
        assert!(codecs.create_decoder(CodecId::Vorbis).is_ok());
        let formats = default_format_registry();
        assert!(formats.create_demuxer(FormatId::Ogg).is_ok());
    }
}
