//! 时间戳常量.

/// 表示"未定义"的时间戳值
pub const NOPTS_VALUE: i64 = i64::MIN;
