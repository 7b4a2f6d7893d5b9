//! 并行梯度/光照纹理生成
//!
//! 体数据沿深度切成相互重叠一片的 slab，每个 slab 交给一个独立 worker 做中心差分，
//! 全部返回后再合并幅值范围并按标量纹理的平铺几何重排。

mod coordinator;
mod worker;

pub use coordinator::{GradientCoordinator, GradientTexel, GradientVolume, LightingTexture};
pub use worker::{CpuGradientWorker, GradientRequest, GradientResult, GradientWorker, compute_slab};

use std::time::Duration;

/// 梯度计算的可调参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradientConfig {
    /// worker 数量上限，同时也决定 slab 的数量
    pub max_workers: usize,
    /// 等待全部 worker 的最长时间；None 表示一直等。
    ///
    /// 超时或首个错误时只会取消等待中的异步任务；`CpuGradientWorker` 已交给
    /// `spawn_blocking` 的计算无法中断，会在后台跑完后被丢弃。
    pub timeout: Option<Duration>,
}

impl Default for GradientConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// 一个 worker 负责的深度范围 [depth_start, depth_end]（闭区间）
///
/// 尾部多带一片，与下一个 slab 的首片重叠。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GradientSlab {
    pub depth_start: u32,
    pub depth_end: u32,
}

impl GradientSlab {
    /// 拷贝给 worker 的数据窗口：slab 两侧各加一片 halo（体边界处截断），
    /// 保证 slab 内每一片的差分输入与整体计算时完全相同
    pub fn window(&self, depth: u32) -> (u32, u32) {
        (
            self.depth_start.saturating_sub(1),
            (self.depth_end + 1).min(depth.saturating_sub(1)),
        )
    }

    /// 本 slab 负责写回的最后一片；重叠片归下一个 slab 所有
    pub fn owned_end(&self, depth: u32) -> u32 {
        if self.depth_end + 1 >= depth || self.depth_end == self.depth_start {
            self.depth_end
        } else {
            self.depth_end - 1
        }
    }

    pub fn num_slices(&self) -> u32 {
        self.depth_end - self.depth_start + 1
    }
}

/// 把 [0, depth-1] 切成步长 `ceil(depth / max_workers)` 的 slab
pub fn partition_slabs(depth: u32, max_workers: usize) -> Vec<GradientSlab> {
    if depth <= 1 {
        return vec![GradientSlab {
            depth_start: 0,
            depth_end: 0,
        }];
    }
    let workers = max_workers.clamp(1, depth as usize) as u32;
    let stride = depth.div_ceil(workers);
    let mut slabs = Vec::with_capacity(workers as usize);
    let mut start = 0;
    while start < depth - 1 {
        slabs.push(GradientSlab {
            depth_start: start,
            depth_end: (start + stride).min(depth - 1),
        });
        start += stride;
    }
    slabs
}
