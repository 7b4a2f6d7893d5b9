use glam::Vec3;

use crate::error::ComputeError;
use crate::texel::{Scalar, ScalarType};

// ===============================================================================
// 输入描述：体数据与设备能力，构建期间只读
// ===============================================================================

/// 体数据描述
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeDescriptor {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    /// 各轴物理间距，用于缩放有限差分
    pub spacing: Vec3,
    pub scalar_type: ScalarType,
}

impl VolumeDescriptor {
    pub fn num_voxels(&self) -> usize {
        self.width as usize * self.height as usize * self.depth as usize
    }

    /// 单个深度切片的体素数
    pub fn slice_len(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// 对调用方缓冲区的只读借用，规划器和编码器不会拷贝它
#[derive(Debug, Clone, Copy)]
pub struct Volume<'a, T: Scalar> {
    descriptor: VolumeDescriptor,
    data: &'a [T],
}

impl<'a, T: Scalar> Volume<'a, T> {
    pub fn new(
        width: u32,
        height: u32,
        depth: u32,
        spacing: Vec3,
        data: &'a [T],
    ) -> Result<Self, ComputeError> {
        if width == 0 || height == 0 || depth == 0 {
            return Err(ComputeError::EmptyVolume);
        }
        let descriptor = VolumeDescriptor {
            width,
            height,
            depth,
            spacing,
            scalar_type: T::SCALAR_TYPE,
        };
        if data.len() != descriptor.num_voxels() {
            return Err(ComputeError::ShapeMismatch {
                expected: vec![width as usize, height as usize, depth as usize],
                actual: vec![data.len()],
            });
        }
        Ok(Self { descriptor, data })
    }

    pub fn descriptor(&self) -> &VolumeDescriptor {
        &self.descriptor
    }

    pub fn data(&self) -> &'a [T] {
        self.data
    }

    /// 深度范围 [start, end]（闭区间）的体素
    pub fn slices(&self, start: u32, end: u32) -> &'a [T] {
        let slice = self.descriptor.slice_len();
        &self.data[start as usize * slice..(end as usize + 1) * slice]
    }

    /// 全体素 min/max，只遍历一次
    pub fn scalar_range(&self) -> (f32, f32) {
        self.data.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
            let v = v.to_f32();
            (lo.min(v), hi.max(v))
        })
    }
}

/// 设备能力，由外部设备查询提供
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapability {
    pub max_texture_dimension: u32,
    pub supports_native_3d: bool,
    pub supports_float_textures: bool,
    pub requires_power_of_two: bool,
}

impl DeviceCapability {
    /// 最保守的设备：只有 2D 纹理、没有浮点纹理、要求 2 的幂
    pub fn minimal(max_texture_dimension: u32) -> Self {
        Self {
            max_texture_dimension,
            supports_native_3d: false,
            supports_float_textures: false,
            requires_power_of_two: true,
        }
    }

    /// 从 wgpu 适配器读取能力
    pub fn from_adapter(adapter: &wgpu::Adapter) -> Self {
        let limits = adapter.limits();
        let downlevel = adapter.get_downlevel_capabilities();
        let r32 = adapter.get_texture_format_features(wgpu::TextureFormat::R32Float);
        Self {
            max_texture_dimension: limits.max_texture_dimension_2d,
            supports_native_3d: limits.max_texture_dimension_3d > 1,
            supports_float_textures: r32
                .flags
                .contains(wgpu::TextureFormatFeatureFlags::FILTERABLE),
            requires_power_of_two: !downlevel
                .flags
                .contains(wgpu::DownlevelFlags::NON_POWER_OF_TWO_MIPMAPPED_TEXTURES),
        }
    }
}
