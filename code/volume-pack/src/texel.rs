use bytemuck::{Pod, Zeroable};

use crate::error::{ComputeError, TypeError};

// ============================================================================
// 1. 源体数据标量类型
// ============================================================================

/// 体数据中单个体素的标量类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
}

/// 体数据元素：可被只读引用、按值拷贝进 worker 切片的原始类型
pub trait Scalar: Pod + Zeroable + Send + Sync + 'static {
    const SCALAR_TYPE: ScalarType;

    fn to_f32(self) -> f32;
}

macro_rules! impl_scalar {
    ($ty:ty, $tag:ident) => {
        impl Scalar for $ty {
            const SCALAR_TYPE: ScalarType = ScalarType::$tag;
            #[inline]
            fn to_f32(self) -> f32 {
                self as f32
            }
        }
    };
}

impl_scalar!(u8, U8);
impl_scalar!(i8, I8);
impl_scalar!(u16, U16);
impl_scalar!(i16, I16);
impl_scalar!(u32, U32);
impl_scalar!(i32, I32);
impl_scalar!(f32, F32);

// ============================================================================
// 2. 纹素分量：上传到设备的缓冲区元素类型
// ============================================================================

/// 纹素分量类型，目前只有 f32 与 u8 两种
pub trait TexelComponent: Pod + Zeroable + Send + Sync + 'static {
    const FLOAT: bool;

    fn to_f32(self) -> f32;
    /// 写回分量；u8 按整型数组的语义截断
    fn from_f32(v: f32) -> Self;
    fn wrap(buffer: Vec<Self>) -> TexelBuffer;
    fn view(buffer: &TexelBuffer) -> Result<&[Self], TypeError>;
}

macro_rules! impl_texel_component {
    ($ty:ty, $variant:ident, $float:expr, |$v:ident| $from:expr) => {
        impl TexelComponent for $ty {
            const FLOAT: bool = $float;
            #[inline]
            fn to_f32(self) -> f32 {
                self as f32
            }
            #[inline]
            fn from_f32($v: f32) -> Self {
                $from
            }
            fn wrap(buffer: Vec<Self>) -> TexelBuffer {
                TexelBuffer::$variant(buffer)
            }
            fn view(buffer: &TexelBuffer) -> Result<&[Self], TypeError> {
                match buffer {
                    TexelBuffer::$variant(data) => Ok(data),
                    _ => Err(TypeError::Mismatch),
                }
            }
        }
    };
}

impl_texel_component!(f32, F32, true, |v| v);
impl_texel_component!(u8, U8, false, |v| v as u8);

// ============================================================================
// 3. 纹理格式
// ============================================================================

/// 本模块会产生的纹理格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TexelFormat {
    R32Float,
    R8Unorm,
    Rgba8Unorm,
}

impl TexelFormat {
    /// 由分量类型与分量数推导格式；设备不支持的组合视为无法确定纹理参数
    pub fn resolve(float: bool, components: usize) -> Result<Self, ComputeError> {
        match (float, components) {
            (true, 1) => Ok(TexelFormat::R32Float),
            (false, 1) => Ok(TexelFormat::R8Unorm),
            (false, 4) => Ok(TexelFormat::Rgba8Unorm),
            (float, n) => Err(ComputeError::UnresolvableFormat(format!(
                "{n} {} component(s) per texel",
                if float { "float" } else { "unsigned byte" }
            ))),
        }
    }

    pub fn components(self) -> usize {
        match self {
            TexelFormat::R32Float | TexelFormat::R8Unorm => 1,
            TexelFormat::Rgba8Unorm => 4,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, TexelFormat::R32Float)
    }

    pub fn bytes_per_texel(self) -> u32 {
        match self {
            TexelFormat::R32Float => 4,
            TexelFormat::R8Unorm => 1,
            TexelFormat::Rgba8Unorm => 4,
        }
    }

    pub fn to_wgpu(self) -> wgpu::TextureFormat {
        match self {
            TexelFormat::R32Float => wgpu::TextureFormat::R32Float,
            TexelFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
            TexelFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        }
    }
}

// ============================================================================
// 4. 纹素缓冲区
// ============================================================================

/// 打包完成、等待上传的扁平缓冲区
/// 交给 TextureSink 时按值移交所有权，之后不再被修改
#[derive(Debug, Clone, PartialEq)]
pub enum TexelBuffer {
    F32(Vec<f32>),
    U8(Vec<u8>),
}

impl TexelBuffer {
    /// 按格式分配全零缓冲区，长度 = texels * components
    pub fn zeroed(format: TexelFormat, texels: usize) -> Self {
        let len = texels * format.components();
        if format.is_float() {
            TexelBuffer::F32(vec![0.0; len])
        } else {
            TexelBuffer::U8(vec![0; len])
        }
    }

    /// 分量个数（不是字节数）
    pub fn len(&self) -> usize {
        match self {
            TexelBuffer::F32(data) => data.len(),
            TexelBuffer::U8(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_float(&self) -> bool {
        matches!(self, TexelBuffer::F32(_))
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            TexelBuffer::F32(data) => bytemuck::cast_slice(data),
            TexelBuffer::U8(data) => data,
        }
    }

    pub fn as_f32(&self) -> Result<&[f32], TypeError> {
        f32::view(self)
    }

    pub fn as_u8(&self) -> Result<&[u8], TypeError> {
        u8::view(self)
    }

    /// 检查缓冲区能否以给定格式上传
    pub fn check_format(&self, format: TexelFormat) -> Result<(), TypeError> {
        if self.is_float() == format.is_float() {
            Ok(())
        } else {
            Err(TypeError::Mismatch)
        }
    }
}
