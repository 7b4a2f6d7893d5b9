//! 设备纹理上传端
//!
//! 上传接口按值接收缓冲区：一旦交出，本模块不再持有也不再修改它。

use std::sync::Arc;

use crate::error::ComputeError;
use crate::packing::TextureExtent;
use crate::texel::{TexelBuffer, TexelFormat};

pub trait TextureSink {
    type Texture;

    fn upload_2d(
        &mut self,
        width: u32,
        height: u32,
        format: TexelFormat,
        data: TexelBuffer,
    ) -> Result<Self::Texture, ComputeError>;

    fn upload_3d(
        &mut self,
        width: u32,
        height: u32,
        depth: u32,
        format: TexelFormat,
        data: TexelBuffer,
    ) -> Result<Self::Texture, ComputeError>;
}

/// 上传前的形状与类型检查，失败时不会触碰设备
pub fn check_upload(
    extent: &TextureExtent,
    format: TexelFormat,
    data: &TexelBuffer,
) -> Result<(), ComputeError> {
    data.check_format(format)?;
    let expected = extent.texels() * format.components();
    if data.len() != expected {
        return Err(ComputeError::ShapeMismatch {
            expected: vec![
                extent.width as usize,
                extent.height as usize,
                extent.depth as usize,
                format.components(),
            ],
            actual: vec![data.len()],
        });
    }
    Ok(())
}

/// wgpu 实现：每次上传创建一张新纹理并通过队列写入
#[derive(Clone)]
pub struct WgpuTextureSink {
    /// wgpu 设备句柄
    pub device: Arc<wgpu::Device>,
    /// wgpu 队列句柄，用于写入纹理数据
    pub queue: Arc<wgpu::Queue>,
}

impl WgpuTextureSink {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self { device, queue }
    }

    fn upload(
        &self,
        extent: TextureExtent,
        dimension: wgpu::TextureDimension,
        format: TexelFormat,
        data: TexelBuffer,
    ) -> Result<wgpu::Texture, ComputeError> {
        check_upload(&extent, format, &data)?;

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let size = extent.to_wgpu();
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("volume_pack_texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension,
            format: format.to_wgpu(),
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data.as_bytes(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(extent.width * format.bytes_per_texel()),
                rows_per_image: Some(extent.height),
            },
            size,
        );

        // 按压栈的逆序弹出
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        if let Some(err) = out_of_memory.or(validation) {
            log::warn!("texture upload failed: {err}");
            return Err(ComputeError::Upload(err.to_string()));
        }
        log::debug!(
            "uploaded {}x{}x{} {:?} texture",
            extent.width,
            extent.height,
            extent.depth,
            format
        );
        Ok(texture)
    }
}

impl TextureSink for WgpuTextureSink {
    type Texture = wgpu::Texture;

    fn upload_2d(
        &mut self,
        width: u32,
        height: u32,
        format: TexelFormat,
        data: TexelBuffer,
    ) -> Result<Self::Texture, ComputeError> {
        let extent = TextureExtent {
            width,
            height,
            depth: 1,
        };
        self.upload(extent, wgpu::TextureDimension::D2, format, data)
    }

    fn upload_3d(
        &mut self,
        width: u32,
        height: u32,
        depth: u32,
        format: TexelFormat,
        data: TexelBuffer,
    ) -> Result<Self::Texture, ComputeError> {
        let extent = TextureExtent {
            width,
            height,
            depth,
        };
        self.upload(extent, wgpu::TextureDimension::D3, format, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_check_rejects_short_buffer() {
        let extent = TextureExtent {
            width: 4,
            height: 4,
            depth: 1,
        };
        let data = TexelBuffer::U8(vec![0; 16 * 4 - 1]);
        assert!(matches!(
            check_upload(&extent, TexelFormat::Rgba8Unorm, &data),
            Err(ComputeError::ShapeMismatch { .. })
        ));
        let data = TexelBuffer::U8(vec![0; 16]);
        assert!(matches!(
            check_upload(&extent, TexelFormat::R32Float, &data),
            Err(ComputeError::TypeMismatch(_))
        ));
        assert!(check_upload(&extent, TexelFormat::R8Unorm, &data).is_ok());
    }
}
