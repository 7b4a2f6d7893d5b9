mod error;
pub mod gradient;
pub mod packing;
pub mod resample;
pub mod sink;
pub mod texel;
pub mod volume;

pub use error::{ComputeError, TypeError};
pub use gradient::{GradientConfig, GradientCoordinator, GradientTexel, GradientVolume};
pub use packing::{
    EncodingPolicy, PackedVolume, PackingConfig, PackingLayout, TextureExtent, VolumeDataEncoder,
    VolumeInfo, VolumeTexture, VolumeTextureBuilder,
};
pub use sink::{TextureSink, WgpuTextureSink};
pub use texel::{Scalar, ScalarType, TexelBuffer, TexelFormat};
pub use volume::{DeviceCapability, Volume, VolumeDescriptor};
