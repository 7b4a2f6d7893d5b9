use async_trait::async_trait;
use glam::Vec3;

use super::GradientSlab;
use crate::error::ComputeError;

/// 发给 worker 的请求，数据是独立拷贝，所有权随请求转移
#[derive(Debug, Clone)]
pub struct GradientRequest {
    pub width: u32,
    pub height: u32,
    /// 整个体的深度，用于识别体边界
    pub depth: u32,
    pub spacing: Vec3,
    /// 覆盖 [window_start, window_end] 的标量，window 见 `GradientSlab::window`
    pub scalar_data: Vec<f32>,
    pub window_start: u32,
    pub depth_start: u32,
    pub depth_end: u32,
}

impl GradientRequest {
    pub fn slab(&self) -> GradientSlab {
        GradientSlab {
            depth_start: self.depth_start,
            depth_end: self.depth_end,
        }
    }
}

/// worker 的返回值，覆盖 [depth_start, depth_end] 的每个体素
#[derive(Debug, Clone, PartialEq)]
pub struct GradientResult {
    /// 每体素 3 字节，方向 [-1,1] 映射到 [0,255]
    pub gradients: Vec<u8>,
    /// 未归一化的梯度幅值
    pub magnitudes: Vec<f32>,
    pub min_magnitude: f32,
    pub max_magnitude: f32,
    pub depth_start: u32,
    pub depth_end: u32,
}

impl GradientResult {
    pub fn slab(&self) -> GradientSlab {
        GradientSlab {
            depth_start: self.depth_start,
            depth_end: self.depth_end,
        }
    }
}

/// 隔离执行的梯度 worker：一个请求对应恰好一个响应
#[async_trait]
pub trait GradientWorker: Send + Sync + 'static {
    async fn compute(&self, request: GradientRequest) -> Result<GradientResult, ComputeError>;
}

/// 在 tokio 阻塞线程池上运行 `compute_slab`
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuGradientWorker;

#[async_trait]
impl GradientWorker for CpuGradientWorker {
    async fn compute(&self, request: GradientRequest) -> Result<GradientResult, ComputeError> {
        let (depth_start, depth_end) = (request.depth_start, request.depth_end);
        tokio::task::spawn_blocking(move || compute_slab(&request))
            .await
            .map_err(|e| ComputeError::WorkerFailed {
                depth_start,
                depth_end,
                reason: e.to_string(),
            })?
    }
}

/// 沿一个轴的差分：内部用中心差分，体边界退化为单侧差分，轴长为 1 时为 0
#[inline]
fn axis_difference(coord: u32, len: u32, sample: impl Fn(u32) -> f32) -> f32 {
    let lo = coord.saturating_sub(1);
    let hi = (coord + 1).min(len - 1);
    if hi == lo {
        return 0.0;
    }
    (sample(hi) - sample(lo)) / (hi - lo) as f32
}

/// 计算一个 slab 内每个体素的梯度方向与幅值
pub fn compute_slab(request: &GradientRequest) -> Result<GradientResult, ComputeError> {
    let GradientRequest {
        width,
        height,
        depth,
        spacing,
        ref scalar_data,
        window_start,
        depth_start,
        depth_end,
    } = *request;

    let (expected_start, window_end) = request.slab().window(depth);
    if window_start != expected_start || depth_start > depth_end || depth_end >= depth {
        return Err(ComputeError::WorkerFailed {
            depth_start,
            depth_end,
            reason: format!("window starting at {window_start} does not cover the slab"),
        });
    }
    let slice = width as usize * height as usize;
    let window_len = (window_end - window_start + 1) as usize * slice;
    if scalar_data.len() != window_len {
        return Err(ComputeError::ShapeMismatch {
            expected: vec![width as usize, height as usize, (window_end - window_start + 1) as usize],
            actual: vec![scalar_data.len()],
        });
    }

    let at = |x: u32, y: u32, z: u32| {
        scalar_data[(z - window_start) as usize * slice + y as usize * width as usize + x as usize]
    };

    let voxels = (depth_end - depth_start + 1) as usize * slice;
    let mut gradients = Vec::with_capacity(voxels * 3);
    let mut magnitudes = Vec::with_capacity(voxels);
    let mut min_magnitude = f32::INFINITY;
    let mut max_magnitude = f32::NEG_INFINITY;

    for z in depth_start..=depth_end {
        for y in 0..height {
            for x in 0..width {
                let difference = Vec3::new(
                    axis_difference(x, width, |i| at(i, y, z)),
                    axis_difference(y, height, |j| at(x, j, z)),
                    axis_difference(z, depth, |k| at(x, y, k)),
                );
                let gradient = difference / spacing;
                let magnitude = gradient.length();
                let direction = if magnitude > 0.0 {
                    gradient / magnitude
                } else {
                    Vec3::ZERO
                };
                for c in direction.to_array() {
                    gradients.push((127.5 + 127.5 * c).floor().clamp(0.0, 255.0) as u8);
                }
                magnitudes.push(magnitude);
                min_magnitude = min_magnitude.min(magnitude);
                max_magnitude = max_magnitude.max(magnitude);
            }
        }
    }

    Ok(GradientResult {
        gradients,
        magnitudes,
        min_magnitude,
        max_magnitude,
        depth_start,
        depth_end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(width: u32, height: u32, depth: u32, spacing: Vec3, data: &[f32], slab: GradientSlab) -> GradientRequest {
        let (start, end) = slab.window(depth);
        let slice = (width * height) as usize;
        GradientRequest {
            width,
            height,
            depth,
            spacing,
            scalar_data: data[start as usize * slice..(end as usize + 1) * slice].to_vec(),
            window_start: start,
            depth_start: slab.depth_start,
            depth_end: slab.depth_end,
        }
    }

    #[test]
    fn ramp_along_x_with_spacing() {
        // v = 4x，x 方向间距 2 -> 梯度 (2, 0, 0)
        let (w, h, d) = (5, 3, 3);
        let data: Vec<f32> = (0..w * h * d).map(|i| 4.0 * (i % w) as f32).collect();
        let slab = GradientSlab {
            depth_start: 0,
            depth_end: d - 1,
        };
        let result = compute_slab(&request(w, h, d, Vec3::new(2.0, 1.0, 1.0), &data, slab)).unwrap();

        assert_eq!(result.magnitudes.len(), (w * h * d) as usize);
        assert!(result.magnitudes.iter().all(|&m| (m - 2.0).abs() < 1e-6));
        assert_eq!(&result.gradients[0..3], &[255, 127, 127]);
        assert_eq!((result.min_magnitude, result.max_magnitude), (2.0, 2.0));
    }

    #[test]
    fn flat_field_has_zero_gradient() {
        let data = vec![3.0f32; 2 * 2 * 2];
        let slab = GradientSlab {
            depth_start: 0,
            depth_end: 1,
        };
        let result = compute_slab(&request(2, 2, 2, Vec3::ONE, &data, slab)).unwrap();
        assert!(result.magnitudes.iter().all(|&m| m == 0.0));
        assert!(result.gradients.iter().all(|&b| b == 127));
    }

    #[test]
    fn z_edges_use_one_sided_differences() {
        // v = z^2，中间片用中心差分 (4 - 0) / 2 = 2，边界片单侧差分
        let data: Vec<f32> = [0.0f32, 1.0, 4.0].to_vec();
        let slab = GradientSlab {
            depth_start: 0,
            depth_end: 2,
        };
        let result = compute_slab(&request(1, 1, 3, Vec3::ONE, &data, slab)).unwrap();
        assert_eq!(result.magnitudes, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn wrong_window_is_rejected() {
        let data = vec![0.0f32; 8];
        let mut req = request(2, 2, 2, Vec3::ONE, &data, GradientSlab { depth_start: 0, depth_end: 1 });
        req.scalar_data.pop();
        assert!(matches!(compute_slab(&req), Err(ComputeError::ShapeMismatch { .. })));
        req.window_start = 1;
        assert!(matches!(compute_slab(&req), Err(ComputeError::WorkerFailed { .. })));
    }
}
