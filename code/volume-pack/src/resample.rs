//! 双线性重采样
//!
//! 把 2D 缓冲区缩放到 2 的幂尺寸。新尺寸通过返回值显式给出，输入不会被改写。

use std::borrow::Cow;

use crate::error::ComputeError;
use crate::packing::{is_power_of_two, next_power_of_two};
use crate::texel::TexelComponent;
use crate::volume::DeviceCapability;

/// 重采样结果；不需要缩放时借用原缓冲区
#[derive(Debug, Clone, PartialEq)]
pub struct Resampled<'a, T: TexelComponent> {
    pub buffer: Cow<'a, [T]>,
    pub width: u32,
    pub height: u32,
}

/// 多个面（例如部分填充的立方体贴图）一起重采样，`None` 原样透传
#[derive(Debug, Clone, PartialEq)]
pub struct ResampledTiles<'a, T: TexelComponent> {
    pub tiles: Vec<Option<Cow<'a, [T]>>>,
    pub width: u32,
    pub height: u32,
}

/// 逐分量双线性插值
///
/// 每个输出纹素映射回源坐标 `idx = dst * src / target`，高位采样下标钳制到
/// `src - 1`，因此不会越界读取。
pub fn resample<T: TexelComponent>(
    buffer: &[T],
    src_width: u32,
    src_height: u32,
    components: usize,
    target_width: u32,
    target_height: u32,
) -> Result<Vec<T>, ComputeError> {
    if src_width == 0 || src_height == 0 || target_width == 0 || target_height == 0 {
        return Err(ComputeError::EmptyVolume);
    }
    let (sw, sh) = (src_width as usize, src_height as usize);
    let (tw, th) = (target_width as usize, target_height as usize);
    if buffer.len() != sw * sh * components {
        return Err(ComputeError::ShapeMismatch {
            expected: vec![sw, sh, components],
            actual: vec![buffer.len()],
        });
    }

    let mut out = vec![T::zeroed(); tw * th * components];
    let j_factor = sh as f64 / th as f64;
    let i_factor = sw as f64 / tw as f64;

    for j in 0..th {
        let jidx = j as f64 * j_factor;
        let jlow = jidx.floor() as usize;
        let jhi = (jidx.ceil() as usize).min(sh - 1);
        let jmix = jidx - jlow as f64;
        let jmix1 = 1.0 - jmix;
        let (row_lo, row_hi) = (jlow * sw * components, jhi * sw * components);
        let out_row = j * tw * components;

        for i in 0..tw {
            let iidx = i as f64 * i_factor;
            let ilow = iidx.floor() as usize;
            let ihi = (iidx.ceil() as usize).min(sw - 1);
            let imix = iidx - ilow as f64;
            let (col_lo, col_hi) = (ilow * components, ihi * components);

            for c in 0..components {
                let sample = |offset: usize| buffer[offset + c].to_f32() as f64;
                let v = sample(row_lo + col_lo) * jmix1 * (1.0 - imix)
                    + sample(row_lo + col_hi) * jmix1 * imix
                    + sample(row_hi + col_lo) * jmix * (1.0 - imix)
                    + sample(row_hi + col_hi) * jmix * imix;
                out[out_row + i * components + c] = T::from_f32(v as f32);
            }
        }
    }
    Ok(out)
}

/// 计算目标尺寸；设备支持非 2 的幂或已经是 2 的幂时返回 None
fn power_of_two_target(
    width: u32,
    height: u32,
    cap: &DeviceCapability,
) -> Result<Option<(u32, u32)>, ComputeError> {
    if width == 0 || height == 0 {
        return Err(ComputeError::EmptyVolume);
    }
    if !cap.requires_power_of_two || (is_power_of_two(width) && is_power_of_two(height)) {
        return Ok(None);
    }
    match (
        next_power_of_two(width as f64),
        next_power_of_two(height as f64),
    ) {
        (Some(w), Some(h)) => Ok(Some((w, h))),
        (w, h) => Err(ComputeError::ExceedsDeviceLimit {
            width: w.unwrap_or(u32::MAX),
            height: h.unwrap_or(u32::MAX),
            limit: cap.max_texture_dimension,
        }),
    }
}

pub fn resample_to_power_of_two<'a, T: TexelComponent>(
    buffer: &'a [T],
    width: u32,
    height: u32,
    components: usize,
    cap: &DeviceCapability,
) -> Result<Resampled<'a, T>, ComputeError> {
    let Some((target_width, target_height)) = power_of_two_target(width, height, cap)? else {
        return Ok(Resampled {
            buffer: Cow::Borrowed(buffer),
            width,
            height,
        });
    };
    log::debug!("resampling {width}x{height} image to {target_width}x{target_height}");
    let scaled = resample(buffer, width, height, components, target_width, target_height)?;
    Ok(Resampled {
        buffer: Cow::Owned(scaled),
        width: target_width,
        height: target_height,
    })
}

pub fn resample_tiles<'a, T: TexelComponent>(
    tiles: &[Option<&'a [T]>],
    width: u32,
    height: u32,
    components: usize,
    cap: &DeviceCapability,
) -> Result<ResampledTiles<'a, T>, ComputeError> {
    let Some((target_width, target_height)) = power_of_two_target(width, height, cap)? else {
        return Ok(ResampledTiles {
            tiles: tiles.iter().map(|t| t.map(Cow::Borrowed)).collect(),
            width,
            height,
        });
    };
    let tiles = tiles
        .iter()
        .map(|tile| {
            tile.map(|data| {
                resample(data, width, height, components, target_width, target_height)
                    .map(Cow::Owned)
            })
            .transpose()
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ResampledTiles {
        tiles,
        width: target_width,
        height: target_height,
    })
}
