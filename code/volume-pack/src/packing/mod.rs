mod build;
mod encode;

pub use build::{ImageTexture, VolumeTexture, VolumeTextureBuilder, upload_image_2d};
pub use encode::{PackedVolume, VolumeDataEncoder, VolumeInfo, decode_float, decode_rgb};

use crate::error::ComputeError;
use crate::texel::{ScalarType, TexelFormat};
use crate::volume::{DeviceCapability, VolumeDescriptor};

// ===============================================================================
// 2 的幂工具
// ===============================================================================

pub fn is_power_of_two(v: u32) -> bool {
    v != 0 && v & (v - 1) == 0
}

/// 不小于 `v` 的最小 2 的幂，`v <= 1` 时为 1；超出 u32 时为 None
pub fn next_power_of_two(v: f64) -> Option<u32> {
    if v > u32::MAX as f64 {
        return None;
    }
    (v.ceil() as u32).max(1).checked_next_power_of_two()
}

// ===============================================================================
// 编码策略
// ===============================================================================

/// 归一化标量写进纹素分量的方式，每次构建只选择一次
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncodingPolicy {
    /// `(v - min) / (max - min)` 存为单个 f32 分量
    FloatNormalized,
    /// 原样拷贝无符号字节，只用于 u8 输入
    UnsignedByteDirect,
    /// 归一化值拆成 3 个字节（24 位定点），存进 RGBA 纹素，alpha 留空
    RgbEncoded,
}

impl EncodingPolicy {
    /// 由标量类型与设备能力选择策略
    pub fn select(scalar_type: ScalarType, cap: &DeviceCapability) -> Self {
        let policy = if scalar_type == ScalarType::U8 {
            EncodingPolicy::UnsignedByteDirect
        } else if cap.supports_native_3d || cap.supports_float_textures {
            EncodingPolicy::FloatNormalized
        } else {
            EncodingPolicy::RgbEncoded
        };
        log::debug!("encoding policy for {scalar_type:?} scalars: {policy:?}");
        policy
    }

    /// 设备能否采样这种编码产生的纹理
    pub fn check_capability(self, cap: &DeviceCapability) -> Result<(), ComputeError> {
        if self.is_float() && !(cap.supports_float_textures || cap.supports_native_3d) {
            return Err(ComputeError::UnresolvableFormat(format!(
                "{self:?} needs float textures, which the device does not support"
            )));
        }
        Ok(())
    }

    pub fn components_per_texel(self) -> usize {
        match self {
            EncodingPolicy::FloatNormalized | EncodingPolicy::UnsignedByteDirect => 1,
            EncodingPolicy::RgbEncoded => 4,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, EncodingPolicy::FloatNormalized)
    }

    pub fn texel_format(self) -> Result<TexelFormat, ComputeError> {
        TexelFormat::resolve(self.is_float(), self.components_per_texel())
    }
}

// ===============================================================================
// 打包布局
// ===============================================================================

/// 打包规划的可调参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackingConfig {
    /// 浮点或 4 分量编码时使用的保守尺寸上限。
    /// 这类纹理即使设备声称支持也很可能超出显存。
    pub conservative_dimension: u32,
}

impl Default for PackingConfig {
    fn default() -> Self {
        Self {
            conservative_dimension: 4096,
        }
    }
}

/// 纹理尺寸，2D 纹理 depth = 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureExtent {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl TextureExtent {
    pub fn texels(&self) -> usize {
        self.width as usize * self.height as usize * self.depth as usize
    }

    pub fn to_wgpu(&self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: self.depth,
        }
    }
}

/// 体数据到单张 2D 纹理的平铺布局
///
/// 深度切片 `d` 放在第 `d / xreps` 行、第 `d % xreps` 列的瓦片里；
/// 每个瓦片是按 `xstride`/`ystride` 下采样后的一个切片。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackingLayout {
    pub target_width: u32,
    pub target_height: u32,
    pub xstride: u32,
    pub ystride: u32,
    pub xreps: u32,
    pub yreps: u32,
    /// 下采样后一个切片占用的纹素宽高
    pub tile_width: u32,
    pub tile_height: u32,
    /// 设备原生支持 3D 纹理，无需打包
    pub native_3d: bool,
}

impl PackingLayout {
    pub fn identity(volume: &VolumeDescriptor) -> Self {
        Self {
            target_width: volume.width,
            target_height: volume.height,
            xstride: 1,
            ystride: 1,
            xreps: 1,
            yreps: volume.depth,
            tile_width: volume.width,
            tile_height: volume.height,
            native_3d: true,
        }
    }

    /// 切片 `d` 的瓦片左上角（纹素坐标）
    pub fn tile_origin(&self, d: u32) -> (u32, u32) {
        let y_rep = d / self.xreps;
        let x_rep = d - y_rep * self.xreps;
        (x_rep * self.tile_width, y_rep * self.tile_height)
    }

    pub fn extent(&self, volume: &VolumeDescriptor) -> TextureExtent {
        TextureExtent {
            width: self.target_width,
            height: self.target_height,
            depth: if self.native_3d { volume.depth } else { 1 },
        }
    }
}

/// 计算能放进一张 2D 纹理的平铺布局
///
/// 体数据放不下时在 X/Y 上做一次统一步长的下采样；下采样后仍超过设备尺寸则报错，
/// 不会做第二次下采样。
pub fn plan(
    volume: &VolumeDescriptor,
    cap: &DeviceCapability,
    policy: EncodingPolicy,
    config: &PackingConfig,
) -> Result<PackingLayout, ComputeError> {
    if volume.num_voxels() == 0 {
        return Err(ComputeError::EmptyVolume);
    }
    if cap.supports_native_3d {
        return Ok(PackingLayout::identity(volume));
    }

    let mut max_dim = cap.max_texture_dimension;
    if max_dim > config.conservative_dimension
        && (policy.is_float() || policy.components_per_texel() == 4)
    {
        max_dim = config.conservative_dimension;
    }

    let num_voxels = volume.num_voxels() as f64;
    let max_texels = max_dim as f64 * max_dim as f64;
    let stride = if num_voxels > max_texels {
        (num_voxels / max_texels).sqrt().ceil() as u32
    } else {
        1
    };
    if stride > 1 {
        log::info!(
            "volume {}x{}x{} exceeds {max_dim}^2 texels, subsampling X/Y by {stride}",
            volume.width,
            volume.height,
            volume.depth
        );
    }

    let tile_width = volume.width.div_ceil(stride);
    let tile_height = volume.height.div_ceil(stride);

    let too_large = |width: u32, height: u32| ComputeError::ExceedsDeviceLimit {
        width,
        height,
        limit: max_dim,
    };
    let target_width =
        next_power_of_two((num_voxels.sqrt() / stride as f64).max(tile_width as f64))
            .ok_or_else(|| too_large(u32::MAX, 0))?;
    // 宽度不能被步长整除时按实际瓦片宽度收紧，保证瓦片不越过右边界
    let xreps = ((target_width as u64 * stride as u64 / volume.width as u64) as u32)
        .min(target_width / tile_width)
        .max(1);
    let yreps = volume.depth.div_ceil(xreps);
    let target_height = next_power_of_two(
        (volume.height as f64 * yreps as f64 / stride as f64)
            .max(yreps as f64 * tile_height as f64),
    )
    .ok_or_else(|| too_large(target_width, u32::MAX))?;

    if target_width > max_dim || target_height > max_dim {
        return Err(too_large(target_width, target_height));
    }

    Ok(PackingLayout {
        target_width,
        target_height,
        xstride: stride,
        ystride: stride,
        xreps,
        yreps,
        tile_width,
        tile_height,
        native_3d: false,
    })
}
