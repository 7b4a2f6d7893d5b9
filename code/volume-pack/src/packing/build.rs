use super::{EncodingPolicy, PackedVolume, PackingConfig, PackingLayout, VolumeDataEncoder, VolumeInfo, plan};
use crate::error::ComputeError;
use crate::resample::resample_to_power_of_two;
use crate::sink::TextureSink;
use crate::texel::{Scalar, TexelComponent, TexelFormat};
use crate::volume::{DeviceCapability, Volume};

/// 已上传的体纹理，保留反推打包几何所需的信息
pub struct VolumeTexture<H> {
    pub texture: H,
    pub info: VolumeInfo,
    pub layout: PackingLayout,
}

/// 已上传的 2D 图像纹理，尺寸为重采样后的尺寸
pub struct ImageTexture<H> {
    pub texture: H,
    pub width: u32,
    pub height: u32,
    pub format: TexelFormat,
}

/// Builder for packing a scalar volume into a device texture
/// 选择策略 -> 规划布局 -> 编码 -> 上传
pub struct VolumeTextureBuilder {
    capability: DeviceCapability,
    config: PackingConfig,
    policy: Option<EncodingPolicy>,
}

impl VolumeTextureBuilder {
    pub fn new(capability: DeviceCapability) -> Self {
        Self {
            capability,
            config: PackingConfig::default(),
            policy: None,
        }
    }

    pub fn with_config(mut self, config: PackingConfig) -> Self {
        self.config = config;
        self
    }

    /// 跳过自动选择，强制使用给定策略
    pub fn with_policy(mut self, policy: EncodingPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn capability(&self) -> &DeviceCapability {
        &self.capability
    }

    /// 只在 CPU 侧完成打包，不触碰设备
    pub fn build<T: Scalar>(&self, volume: &Volume<'_, T>) -> Result<PackedVolume, ComputeError> {
        let desc = volume.descriptor();
        let policy = match self.policy {
            Some(policy) => {
                policy.check_capability(&self.capability)?;
                policy
            }
            None => EncodingPolicy::select(desc.scalar_type, &self.capability),
        };
        let layout = plan(desc, &self.capability, policy, &self.config)?;
        VolumeDataEncoder::encode(volume, &layout, policy)
    }

    /// 打包并上传；规划或编码失败时不会调用 sink
    pub fn upload<T: Scalar, S: TextureSink>(
        &self,
        volume: &Volume<'_, T>,
        sink: &mut S,
    ) -> Result<VolumeTexture<S::Texture>, ComputeError> {
        let PackedVolume {
            info,
            layout,
            format,
            extent,
            buffer,
            ..
        } = self.build(volume)?;

        let texture = if layout.native_3d {
            sink.upload_3d(extent.width, extent.height, extent.depth, format, buffer)?
        } else {
            sink.upload_2d(extent.width, extent.height, format, buffer)?
        };
        log::info!(
            "volume texture ready: {}x{}x{} -> {}x{}x{} ({} per row, stride {})",
            info.width,
            info.height,
            info.depth,
            extent.width,
            extent.height,
            extent.depth,
            info.xreps,
            info.xstride
        );
        Ok(VolumeTexture {
            texture,
            info,
            layout,
        })
    }
}

/// 普通 2D 图像：按需缩放到 2 的幂后直接上传
pub fn upload_image_2d<T: TexelComponent, S: TextureSink>(
    sink: &mut S,
    capability: &DeviceCapability,
    buffer: &[T],
    width: u32,
    height: u32,
    components: usize,
) -> Result<ImageTexture<S::Texture>, ComputeError> {
    let format = TexelFormat::resolve(T::FLOAT, components)?;
    let scaled = resample_to_power_of_two(buffer, width, height, components, capability)?;
    let (width, height) = (scaled.width, scaled.height);
    let texture = sink.upload_2d(width, height, format, T::wrap(scaled.buffer.into_owned()))?;
    Ok(ImageTexture {
        texture,
        width,
        height,
        format,
    })
}
