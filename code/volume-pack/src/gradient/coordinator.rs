use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use tokio::task::JoinSet;

use super::worker::{CpuGradientWorker, GradientRequest, GradientResult, GradientWorker};
use super::{GradientConfig, GradientSlab, partition_slabs};
use crate::error::ComputeError;
use crate::packing::{PackingLayout, TextureExtent, VolumeInfo, VolumeTexture};
use crate::sink::TextureSink;
use crate::texel::{Scalar, TexelBuffer, TexelFormat};
use crate::volume::Volume;

/// 光照纹理的一个纹素：rgb 为方向，a 为归一化幅值
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Pod, Zeroable)]
pub struct GradientTexel {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

/// 合并、重排后的梯度纹理数据
#[derive(Debug, Clone, PartialEq)]
pub struct GradientVolume {
    pub extent: TextureExtent,
    pub texels: Vec<GradientTexel>,
    pub min_magnitude: f32,
    pub max_magnitude: f32,
}

impl GradientVolume {
    pub fn into_buffer(self) -> TexelBuffer {
        TexelBuffer::U8(bytemuck::cast_slice(&self.texels).to_vec())
    }
}

/// 已上传的光照纹理
pub struct LightingTexture<H> {
    pub texture: H,
    pub min_magnitude: f32,
    pub max_magnitude: f32,
}

/// 把体数据分发给 worker 池并汇总梯度
///
/// 只有全部 worker 返回、合并与重排都完成后才算成功；任何一个 worker 失败或超时，
/// 整个梯度构建作废，不产生部分光照的纹理。
pub struct GradientCoordinator<W: GradientWorker = CpuGradientWorker> {
    worker: Arc<W>,
    config: GradientConfig,
}

impl GradientCoordinator<CpuGradientWorker> {
    pub fn new(config: GradientConfig) -> Self {
        Self::with_worker(CpuGradientWorker, config)
    }
}

impl<W: GradientWorker> GradientCoordinator<W> {
    pub fn with_worker(worker: W, config: GradientConfig) -> Self {
        Self {
            worker: Arc::new(worker),
            config,
        }
    }

    pub fn config(&self) -> &GradientConfig {
        &self.config
    }

    /// 计算梯度并按标量纹理的布局重排
    ///
    /// `info`/`layout` 来自同一体数据的标量纹理构建，平铺几何直接复用，不重新规划。
    pub async fn compute<T: Scalar>(
        &self,
        volume: &Volume<'_, T>,
        info: &VolumeInfo,
        layout: &PackingLayout,
    ) -> Result<GradientVolume, ComputeError> {
        let desc = volume.descriptor();
        if (info.width, info.height, info.depth) != (desc.width, desc.height, desc.depth) {
            return Err(ComputeError::ShapeMismatch {
                expected: vec![info.width as usize, info.height as usize, info.depth as usize],
                actual: vec![desc.width as usize, desc.height as usize, desc.depth as usize],
            });
        }

        check_geometry(info, layout)?;
        let results = self.dispatch(volume).await?;

        // min/max 归约与完成顺序无关
        let (min_magnitude, max_magnitude) = results.iter().fold(
            (f32::INFINITY, f32::NEG_INFINITY),
            |(lo, hi), r| (lo.min(r.min_magnitude), hi.max(r.max_magnitude)),
        );

        let extent = layout.extent(desc);
        let mut texels = vec![GradientTexel::zeroed(); extent.texels()];
        for result in &results {
            repack(&mut texels, result, info, layout, max_magnitude);
        }

        log::debug!(
            "gradients merged from {} slab(s), magnitude range [{min_magnitude}, {max_magnitude}]",
            results.len()
        );
        Ok(GradientVolume {
            extent,
            texels,
            min_magnitude,
            max_magnitude,
        })
    }

    /// 计算并上传光照纹理，格式固定为 RGBA8
    pub async fn upload<T: Scalar, S: TextureSink, H>(
        &self,
        volume: &Volume<'_, T>,
        scalar: &VolumeTexture<H>,
        sink: &mut S,
    ) -> Result<LightingTexture<S::Texture>, ComputeError> {
        let gradients = self.compute(volume, &scalar.info, &scalar.layout).await?;
        let (min_magnitude, max_magnitude) = (gradients.min_magnitude, gradients.max_magnitude);
        let extent = gradients.extent;
        let buffer = gradients.into_buffer();
        let texture = if scalar.layout.native_3d {
            sink.upload_3d(
                extent.width,
                extent.height,
                extent.depth,
                TexelFormat::Rgba8Unorm,
                buffer,
            )?
        } else {
            sink.upload_2d(extent.width, extent.height, TexelFormat::Rgba8Unorm, buffer)?
        };
        Ok(LightingTexture {
            texture,
            min_magnitude,
            max_magnitude,
        })
    }

    /// 每个 slab 一个任务，等待全部完成（join barrier）
    async fn dispatch<T: Scalar>(
        &self,
        volume: &Volume<'_, T>,
    ) -> Result<Vec<GradientResult>, ComputeError> {
        let desc = volume.descriptor();
        let slabs = partition_slabs(desc.depth, self.config.max_workers);
        let mut tasks = JoinSet::new();

        for slab in &slabs {
            let (window_start, window_end) = slab.window(desc.depth);
            let request = GradientRequest {
                width: desc.width,
                height: desc.height,
                depth: desc.depth,
                spacing: desc.spacing,
                scalar_data: volume
                    .slices(window_start, window_end)
                    .iter()
                    .map(|v| v.to_f32())
                    .collect(),
                window_start,
                depth_start: slab.depth_start,
                depth_end: slab.depth_end,
            };
            log::debug!(
                "dispatching slab [{}, {}] with window [{window_start}, {window_end}]",
                slab.depth_start,
                slab.depth_end
            );
            let worker = Arc::clone(&self.worker);
            let slab = *slab;
            tasks.spawn(async move { (slab, worker.compute(request).await) });
        }

        let join_all = async {
            let mut results = Vec::with_capacity(slabs.len());
            while let Some(joined) = tasks.join_next().await {
                let (slab, result) =
                    joined.map_err(|e| ComputeError::WorkerPanicked(e.to_string()))?;
                let result = result?;
                validate(&result, slab, desc.slice_len())?;
                results.push(result);
            }
            Ok::<_, ComputeError>(results)
        };

        let outcome = match self.config.timeout {
            Some(limit) => tokio::time::timeout(limit, join_all)
                .await
                .unwrap_or(Err(ComputeError::WorkerTimeout(limit))),
            None => join_all.await,
        };
        if let Err(err) = &outcome {
            log::warn!("gradient build aborted: {err}");
        }
        outcome
    }
}

/// 结果必须对应派发出去的那个 slab，重排按它的绝对深度写入
fn validate(
    result: &GradientResult,
    slab: GradientSlab,
    slice_len: usize,
) -> Result<(), ComputeError> {
    if result.slab() != slab {
        return Err(ComputeError::WorkerFailed {
            depth_start: slab.depth_start,
            depth_end: slab.depth_end,
            reason: format!(
                "result labelled [{}, {}]",
                result.depth_start, result.depth_end
            ),
        });
    }
    let voxels = result.slab().num_slices() as usize * slice_len;
    if result.magnitudes.len() != voxels || result.gradients.len() != voxels * 3 {
        return Err(ComputeError::WorkerFailed {
            depth_start: result.depth_start,
            depth_end: result.depth_end,
            reason: format!(
                "expected {voxels} voxels, got {} magnitudes and {} gradient bytes",
                result.magnitudes.len(),
                result.gradients.len()
            ),
        });
    }
    Ok(())
}

/// `info` 给出瓦片位置，`layout` 给出缓冲区大小和行距，两者必须来自同一次打包
fn check_geometry(info: &VolumeInfo, layout: &PackingLayout) -> Result<(), ComputeError> {
    let from_info = [
        info.xreps,
        info.yreps,
        info.xstride,
        info.ystride,
        info.width.div_ceil(info.xstride.max(1)),
        info.height.div_ceil(info.ystride.max(1)),
    ];
    let from_layout = [
        layout.xreps,
        layout.yreps,
        layout.xstride,
        layout.ystride,
        layout.tile_width,
        layout.tile_height,
    ];
    if from_info != from_layout {
        return Err(ComputeError::ShapeMismatch {
            expected: from_layout.iter().map(|&v| v as usize).collect(),
            actual: from_info.iter().map(|&v| v as usize).collect(),
        });
    }
    Ok(())
}

/// 把一个 slab 负责的切片写到输出纹理；重叠片只由其所属 slab 写入
fn repack(
    texels: &mut [GradientTexel],
    result: &GradientResult,
    info: &VolumeInfo,
    layout: &PackingLayout,
    max_magnitude: f32,
) {
    let (width, height) = (info.width as usize, info.height as usize);
    let alpha = |magnitude: f32| {
        if max_magnitude > 0.0 {
            (255.0 * (magnitude / max_magnitude).sqrt()) as u8
        } else {
            0
        }
    };
    let texel_at = |voxel: usize| GradientTexel {
        r: result.gradients[voxel * 3],
        g: result.gradients[voxel * 3 + 1],
        b: result.gradients[voxel * 3 + 2],
        a: alpha(result.magnitudes[voxel]),
    };

    let owned_end = result.slab().owned_end(info.depth);
    for z in result.depth_start..=owned_end {
        let slice_base = (z - result.depth_start) as usize * width * height;
        if layout.native_3d {
            let out_base = z as usize * width * height;
            for voxel in 0..width * height {
                texels[out_base + voxel] = texel_at(slice_base + voxel);
            }
            continue;
        }

        let (ox, oy) = info.tile_origin(z);
        for (ty, y) in (0..height).step_by(info.ystride as usize).enumerate() {
            let row = (oy as usize + ty) * layout.target_width as usize + ox as usize;
            for (tx, x) in (0..width).step_by(info.xstride as usize).enumerate() {
                texels[row + tx] = texel_at(slice_base + y * width + x);
            }
        }
    }
}
