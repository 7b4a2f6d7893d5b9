use super::{EncodingPolicy, PackingLayout, TextureExtent};
use crate::error::ComputeError;
use crate::texel::{Scalar, ScalarType, TexelBuffer, TexelFormat};
use crate::volume::Volume;

/// 打包结果的描述，之后的梯度重排需要用它反推平铺几何
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeInfo {
    pub min: f32,
    pub max: f32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub xreps: u32,
    pub yreps: u32,
    pub xstride: u32,
    pub ystride: u32,
    /// 标量是否经过 RGB 拆分编码
    pub encoded_scalars: bool,
}

impl VolumeInfo {
    /// 切片 `d` 的瓦片左上角（纹素坐标），与编码时的拷贝顺序一致
    pub fn tile_origin(&self, d: u32) -> (u32, u32) {
        let y_rep = d / self.xreps;
        let x_rep = d - y_rep * self.xreps;
        (
            x_rep * self.width.div_ceil(self.xstride),
            y_rep * self.height.div_ceil(self.ystride),
        )
    }
}

/// 编码完成的体纹理，等待交给 TextureSink
#[derive(Debug, Clone, PartialEq)]
pub struct PackedVolume {
    pub info: VolumeInfo,
    pub layout: PackingLayout,
    pub policy: EncodingPolicy,
    pub format: TexelFormat,
    pub extent: TextureExtent,
    pub buffer: TexelBuffer,
}

/// `FloatNormalized` 的逆变换
pub fn decode_float(encoded: f32, info: &VolumeInfo) -> f32 {
    encoded * (info.max - info.min) + info.min
}

/// `RgbEncoded` 的逆变换，得到归一化值
pub fn decode_rgb(r: u8, g: u8, b: u8) -> f64 {
    r as f64 / 255.0 + g as f64 / (255.0 * 255.0) + b as f64 / (255.0 * 255.0 * 255.0)
}

pub struct VolumeDataEncoder;

impl VolumeDataEncoder {
    /// 按布局把体数据写进一个新分配的缓冲区
    ///
    /// 缓冲区长度恰好是 `target_width * target_height * components`（原生 3D 时再乘深度），
    /// 未被切片覆盖的纹素保持为零。
    pub fn encode<T: Scalar>(
        volume: &Volume<'_, T>,
        layout: &PackingLayout,
        policy: EncodingPolicy,
    ) -> Result<PackedVolume, ComputeError> {
        let desc = volume.descriptor();
        if policy == EncodingPolicy::UnsignedByteDirect && desc.scalar_type != ScalarType::U8 {
            return Err(ComputeError::UnresolvableFormat(format!(
                "direct byte encoding of {:?} scalars",
                desc.scalar_type
            )));
        }
        let format = policy.texel_format()?;

        let (mut min, mut max) = volume.scalar_range();
        if min == max {
            max = min + 1.0;
        }
        if policy == EncodingPolicy::UnsignedByteDirect {
            min = 0.0;
            max = 255.0;
        }

        let info = VolumeInfo {
            min,
            max,
            width: desc.width,
            height: desc.height,
            depth: desc.depth,
            xreps: layout.xreps,
            yreps: layout.yreps,
            xstride: layout.xstride,
            ystride: layout.ystride,
            encoded_scalars: policy == EncodingPolicy::RgbEncoded,
        };
        let extent = layout.extent(desc);
        let mut buffer = TexelBuffer::zeroed(format, extent.texels());
        let data = volume.data();

        if layout.native_3d {
            for (texel, value) in data.iter().enumerate() {
                write_texel(&mut buffer, policy, texel, value.to_f32(), min, max);
            }
        } else {
            let (width, height) = (desc.width as usize, desc.height as usize);
            for d in 0..desc.depth {
                let (ox, oy) = layout.tile_origin(d);
                let slice = volume.slices(d, d);
                for (ty, in_y) in (0..height).step_by(layout.ystride as usize).enumerate() {
                    let row = (oy as usize + ty) * layout.target_width as usize + ox as usize;
                    for (tx, in_x) in (0..width).step_by(layout.xstride as usize).enumerate() {
                        let value = slice[in_y * width + in_x].to_f32();
                        write_texel(&mut buffer, policy, row + tx, value, min, max);
                    }
                }
            }
        }

        log::debug!(
            "encoded {}x{}x{} volume into {}x{}x{} {:?} texture",
            desc.width,
            desc.height,
            desc.depth,
            extent.width,
            extent.height,
            extent.depth,
            format
        );
        Ok(PackedVolume {
            info,
            layout: *layout,
            policy,
            format,
            extent,
            buffer,
        })
    }
}

fn write_texel(
    buffer: &mut TexelBuffer,
    policy: EncodingPolicy,
    texel: usize,
    value: f32,
    min: f32,
    max: f32,
) {
    match (buffer, policy) {
        (TexelBuffer::F32(out), _) => out[texel] = (value - min) / (max - min),
        (TexelBuffer::U8(out), EncodingPolicy::RgbEncoded) => {
            let base = texel * 4;
            let mut f = (value as f64 - min as f64) / (max as f64 - min as f64);
            for c in 0..3 {
                let byte = (f * 255.0).floor().clamp(0.0, 255.0);
                out[base + c] = byte as u8;
                f = f * 255.0 - byte;
            }
        }
        (TexelBuffer::U8(out), _) => out[texel] = value as u8,
    }
}
