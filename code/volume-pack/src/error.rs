// ===============================================================================
// 错误类型定义
// ===============================================================================

/// 纹理构建错误类型
/// 规划/编码阶段的错误在任何设备调用之前返回
#[derive(Debug, thiserror::Error)]
pub enum ComputeError {
    #[error("Failed to determine texture parameters: {0}")]
    UnresolvableFormat(String),

    #[error("Volume has a zero-sized dimension")]
    EmptyVolume,

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Packed texture {width}x{height} exceeds device limit {limit}")]
    ExceedsDeviceLimit { width: u32, height: u32, limit: u32 },

    #[error("Gradient worker for slices [{depth_start}, {depth_end}] failed: {reason}")]
    WorkerFailed {
        depth_start: u32,
        depth_end: u32,
        reason: String,
    },

    #[error("Gradient worker task panicked: {0}")]
    WorkerPanicked(String),

    #[error("Gradient workers did not finish within {0:?}")]
    WorkerTimeout(std::time::Duration),

    #[error("Texture upload failed: {0}")]
    Upload(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(#[from] TypeError),
}

/// 类型错误
/// 纹素分量类型与缓冲区内容不一致
#[derive(Debug, thiserror::Error)]
pub enum TypeError {
    #[error("Type mismatch")]
    Mismatch,
}
