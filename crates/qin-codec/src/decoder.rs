//! 解码器 trait 定义.
//!
//! 所有解码器实现必须实现 `Decoder` trait.

use qin_core::QinResult;

use crate::codec_id::CodecId;
use crate::codec_parameters::CodecParameters;
use crate::frame::Frame;
use crate::packet::Packet;

/// 解码器 trait
///
/// 定义了解码器的统一接口.
///
/// 解码流程:
/// 1. 调用 `send_packet()` 送入压缩数据
/// 2. 调用 `receive_frame()` 取出解码后的帧
/// 3. 重复以上步骤直到所有数据处理完毕
/// 4. 送入冲刷包 (`Packet::flush_marker()`) 以获取解码器中缓存的帧
pub trait Decoder: Send {
    /// 获取解码器标识
    fn codec_id(&self) -> CodecId;

    /// 获取解码器名称
    fn name(&self) -> &str;

    /// 使用参数配置解码器
    ///
    /// 对携带 extra_data 的编码 (如 Vorbis 的 identification 头包),
    /// 此方法会先行解析这些数据. 默认实现为空操作.
    fn open(&mut self, _params: &CodecParameters) -> QinResult<()> {
        Ok(())
    }

    /// 送入一个压缩数据包进行解码
    ///
    /// # 参数
    /// - `packet`: 压缩数据包. `is_flush` 置位的包表示输入结束;
    ///   零长度数据包按正常码流内容处理.
    ///
    /// # 返回
    /// - `Ok(())`: 数据包已接受
    /// - `Err(QinError::NeedMoreData)`: 解码器内部缓冲区已满, 需要先取出帧
    fn send_packet(&mut self, packet: &Packet) -> QinResult<()>;

    /// 从解码器取出一帧解码数据
    ///
    /// # 返回
    /// - `Ok(frame)`: 成功取出一帧
    /// - `Err(QinError::NeedMoreData)`: 需要送入更多数据包
    /// - `Err(QinError::Eof)`: 所有帧已取出
    fn receive_frame(&mut self) -> QinResult<Frame>;

    /// 刷新解码器, 清空内部状态
    ///
    /// 用于 seek 后重置解码器状态.
    fn flush(&mut self);
}
