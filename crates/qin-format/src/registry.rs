//! 容器格式注册表.
//!
//! 管理解封装器工厂与格式探测器, 提供按格式创建与自动探测入口.

use std::collections::HashMap;
use std::io::SeekFrom;

use qin_core::{QinError, QinResult};

use crate::demuxer::Demuxer;
use crate::format_id::FormatId;
use crate::io::IoContext;
use crate::probe::{FormatProbe, ProbeResult};

/// 解封装器工厂函数
pub type DemuxerFactory = fn() -> Box<dyn Demuxer>;

/// 探测时读取的头部数据大小
const PROBE_SIZE: usize = 8192;

/// 容器格式注册表
#[derive(Default)]
pub struct FormatRegistry {
    demuxers: HashMap<FormatId, DemuxerFactory>,
    probes: Vec<Box<dyn FormatProbe + Send>>,
}

impl FormatRegistry {
    /// 创建空的注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册解封装器工厂
    pub fn register_demuxer(&mut self, format_id: FormatId, factory: DemuxerFactory) {
        log::debug!("注册解封装器: {}", format_id);
        self.demuxers.insert(format_id, factory);
    }

    /// 注册格式探测器
    pub fn register_probe(&mut self, probe: Box<dyn FormatProbe + Send>) {
        self.probes.push(probe);
    }

    /// 按格式创建解封装器实例
    pub fn create_demuxer(&self, format_id: FormatId) -> QinResult<Box<dyn Demuxer>> {
        self.demuxers
            .get(&format_id)
            .map(|factory| factory())
            .ok_or_else(|| QinError::FormatNotFound(format_id.name().to_string()))
    }

    /// 已注册的格式列表
    pub fn demuxer_formats(&self) -> Vec<FormatId> {
        self.demuxers.keys().copied().collect()
    }

    /// 对头部数据运行所有探测器, 返回得分最高的结果
    pub fn probe(&self, data: &[u8], filename: Option<&str>) -> Option<ProbeResult> {
        self.probes
            .iter()
            .filter_map(|p| {
                p.probe(data, filename).map(|score| ProbeResult {
                    format_id: p.format_id(),
                    score,
                })
            })
            .max_by_key(|r| r.score)
    }

    /// 从 I/O 上下文探测格式
    ///
    /// 读取头部数据进行探测, 完成后将读取位置恢复到开头.
    pub fn probe_input(
        &self,
        io: &mut IoContext,
        filename: Option<&str>,
    ) -> QinResult<ProbeResult> {
        let mut header = vec![0u8; PROBE_SIZE];
        let filled = io.read_partial(&mut header)?;
        header.truncate(filled);
        io.seek(SeekFrom::Start(0))?;
        self.probe(&header, filename)
            .ok_or_else(|| QinError::Format("无法识别的容器格式".to_string()))
    }

    /// 探测并打开输入
    ///
    /// 自动识别格式, 创建对应解封装器并完成 `open()`.
    pub fn open_input(
        &self,
        io: &mut IoContext,
        filename: Option<&str>,
    ) -> QinResult<Box<dyn Demuxer>> {
        let result = self.probe_input(io, filename)?;
        log::info!("探测到格式: {} (分数 {})", result.format_id, result.score);
        let mut demuxer = self.create_demuxer(result.format_id)?;
        demuxer.open(io)?;
        Ok(demuxer)
    }
}
