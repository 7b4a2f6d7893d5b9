use std::time::Duration;

use async_trait::async_trait;
use glam::Vec3;
use volume_pack::gradient::{
    GradientRequest, GradientResult, GradientSlab, GradientWorker, compute_slab, partition_slabs,
};
use volume_pack::{
    ComputeError, DeviceCapability, EncodingPolicy, GradientConfig, GradientCoordinator,
    GradientTexel, GradientVolume, PackedVolume, PackingLayout, Scalar, TexelBuffer, TexelFormat,
    TextureSink, Volume, VolumeDataEncoder, VolumeTextureBuilder,
};

// ===============================================================================
// 测试工具
// ===============================================================================

#[derive(Default)]
struct CountingSink {
    uploads: Vec<(u32, u32, u32, TexelFormat)>,
}

impl TextureSink for CountingSink {
    type Texture = usize;

    fn upload_2d(
        &mut self,
        width: u32,
        height: u32,
        format: TexelFormat,
        data: TexelBuffer,
    ) -> Result<usize, ComputeError> {
        assert_eq!(data.len(), (width * height) as usize * format.components());
        self.uploads.push((width, height, 1, format));
        Ok(self.uploads.len() - 1)
    }

    fn upload_3d(
        &mut self,
        width: u32,
        height: u32,
        depth: u32,
        format: TexelFormat,
        data: TexelBuffer,
    ) -> Result<usize, ComputeError> {
        assert_eq!(data.len(), (width * height * depth) as usize * format.components());
        self.uploads.push((width, height, depth, format));
        Ok(self.uploads.len() - 1)
    }
}

/// 非线性标量场，让各方向的差分都不相同
fn field(w: u32, h: u32, d: u32) -> Vec<f32> {
    (0..w * h * d)
        .map(|i| {
            let (x, y, z) = (i % w, (i / w) % h, i / (w * h));
            (x * x) as f32 * 0.5 + (y * z) as f32 - (z * z * z) as f32 * 0.25
        })
        .collect()
}

fn request(data: &[f32], w: u32, h: u32, d: u32, spacing: Vec3, slab: GradientSlab) -> GradientRequest {
    let (start, end) = slab.window(d);
    let slice = (w * h) as usize;
    GradientRequest {
        width: w,
        height: h,
        depth: d,
        spacing,
        scalar_data: data[start as usize * slice..(end as usize + 1) * slice].to_vec(),
        window_start: start,
        depth_start: slab.depth_start,
        depth_end: slab.depth_end,
    }
}

/// 单个 slab 覆盖整个体的结果
fn whole_volume(data: &[f32], w: u32, h: u32, d: u32, spacing: Vec3) -> GradientResult {
    let slab = GradientSlab {
        depth_start: 0,
        depth_end: d - 1,
    };
    compute_slab(&request(data, w, h, d, spacing, slab)).expect("Failed to compute gradients")
}

fn expected_texel(reference: &GradientResult, voxel: usize) -> GradientTexel {
    GradientTexel {
        r: reference.gradients[voxel * 3],
        g: reference.gradients[voxel * 3 + 1],
        b: reference.gradients[voxel * 3 + 2],
        a: (255.0 * (reference.magnitudes[voxel] / reference.max_magnitude).sqrt()) as u8,
    }
}

async fn lighting<T: Scalar>(
    volume: &Volume<'_, T>,
    packed: &PackedVolume,
    max_workers: usize,
) -> GradientVolume {
    GradientCoordinator::new(GradientConfig {
        max_workers,
        ..GradientConfig::default()
    })
    .compute(volume, &packed.info, &packed.layout)
    .await
    .expect("Failed to build lighting")
}

fn native_capability() -> DeviceCapability {
    DeviceCapability {
        max_texture_dimension: 256,
        supports_native_3d: true,
        supports_float_textures: true,
        requires_power_of_two: false,
    }
}

// ===============================================================================
// 分区与合并
// ===============================================================================

#[tokio::test]
async fn worker_count_does_not_change_the_lighting() {
    let _ = env_logger::builder().is_test(true).try_init();

    // 4x4x3，值为 0..47
    let data: Vec<f32> = (0..48).map(|v| v as f32).collect();
    let volume = Volume::new(4, 4, 3, Vec3::ONE, &data).unwrap();

    for cap in [DeviceCapability::minimal(256), native_capability()] {
        let packed = VolumeTextureBuilder::new(cap)
            .build(&volume)
            .unwrap();
        let single = lighting(&volume, &packed, 1).await;
        // 2 个 worker 时步长为 2，只切出 [0,2]；3 个 worker 切出 [0,1] 和 [1,2]
        for workers in [2, 3, 8] {
            assert_eq!(lighting(&volume, &packed, workers).await, single, "{workers} workers");
        }

        // v = x + 4y + 16z，梯度处处为 (1, 4, 16)
        let expected = 273f32.sqrt();
        assert!((single.max_magnitude - expected).abs() < 1e-5);
        assert_eq!(single.min_magnitude, single.max_magnitude);
        assert_eq!(single.texels.iter().filter(|t| t.a == 255).count(), 48);
    }
}

#[test]
fn shared_slice_is_computed_identically() {
    let (w, h, d) = (5, 4, 6);
    let data = field(w, h, d);
    let spacing = Vec3::new(0.5, 1.0, 2.0);
    let slabs = partition_slabs(d, 3);
    assert_eq!(slabs.len(), 3);

    let reference = whole_volume(&data, w, h, d, spacing);
    let slice = (w * h) as usize;
    for pair in slabs.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let ra = compute_slab(&request(&data, w, h, d, spacing, a)).unwrap();
        let rb = compute_slab(&request(&data, w, h, d, spacing, b)).unwrap();
        let shared = b.depth_start as usize;
        let tail = (a.num_slices() as usize - 1) * slice;

        assert_eq!(&ra.gradients[tail * 3..], &rb.gradients[..slice * 3]);
        assert_eq!(&ra.magnitudes[tail..], &rb.magnitudes[..slice]);
        assert_eq!(&rb.magnitudes[..slice], &reference.magnitudes[shared * slice..(shared + 1) * slice]);
    }
}

#[tokio::test]
async fn merged_range_matches_whole_volume() {
    let (w, h, d) = (6, 5, 11);
    let data = field(w, h, d);
    let volume = Volume::new(w, h, d, Vec3::ONE, &data).unwrap();
    let packed = VolumeTextureBuilder::new(DeviceCapability::minimal(512))
        .build(&volume)
        .unwrap();
    let reference = whole_volume(&data, w, h, d, Vec3::ONE);

    for workers in 1..=6 {
        let merged = lighting(&volume, &packed, workers).await;
        assert_eq!(merged.max_magnitude, reference.max_magnitude, "{workers} workers");
        assert_eq!(merged.min_magnitude, reference.min_magnitude, "{workers} workers");
    }
}

// ===============================================================================
// 重排
// ===============================================================================

#[tokio::test]
async fn texels_follow_the_scalar_tiles() {
    let (w, h, d) = (7, 3, 9);
    let data = field(w, h, d);
    let volume = Volume::new(w, h, d, Vec3::ONE, &data).unwrap();
    let packed = VolumeTextureBuilder::new(DeviceCapability::minimal(256))
        .build(&volume)
        .unwrap();
    let gradients = lighting(&volume, &packed, 4).await;
    let reference = whole_volume(&data, w, h, d, Vec3::ONE);

    assert_eq!(gradients.extent, packed.extent);
    let tw = packed.layout.target_width;
    for z in 0..d {
        let (ox, oy) = packed.info.tile_origin(z);
        for y in 0..h {
            for x in 0..w {
                let texel = ((oy + y) * tw + ox + x) as usize;
                let voxel = (z * w * h + y * w + x) as usize;
                assert_eq!(gradients.texels[texel], expected_texel(&reference, voxel), "({x},{y},{z})");
            }
        }
    }
}

#[tokio::test]
async fn subsampled_tiles_take_every_stride_voxel() {
    let data: Vec<u8> = (0..4 * 4 * 8).map(|v| ((v * 7) % 251) as u8).collect();
    let volume = Volume::new(4, 4, 8, Vec3::ONE, &data).unwrap();
    let layout = PackingLayout {
        target_width: 8,
        target_height: 4,
        xstride: 2,
        ystride: 2,
        xreps: 4,
        yreps: 2,
        tile_width: 2,
        tile_height: 2,
        native_3d: false,
    };
    let packed =
        VolumeDataEncoder::encode(&volume, &layout, EncodingPolicy::UnsignedByteDirect).unwrap();
    let gradients = lighting(&volume, &packed, 3).await;
    assert_eq!(gradients.texels.len(), 32);

    let floats: Vec<f32> = data.iter().map(|&v| v as f32).collect();
    let reference = whole_volume(&floats, 4, 4, 8, Vec3::ONE);
    // 切片 5 的瓦片在 (2, 2)
    for (ty, y) in [0u32, 2].into_iter().enumerate() {
        for (tx, x) in [0u32, 2].into_iter().enumerate() {
            let texel = (2 + ty) * 8 + 2 + tx;
            let voxel = (5 * 16 + y * 4 + x) as usize;
            assert_eq!(gradients.texels[texel], expected_texel(&reference, voxel));
        }
    }
}

#[tokio::test]
async fn lighting_upload_matches_scalar_texture() {
    let data = field(8, 6, 5);
    let volume = Volume::new(8, 6, 5, Vec3::ONE, &data).unwrap();
    let mut sink = CountingSink::default();

    let scalar = VolumeTextureBuilder::new(DeviceCapability::minimal(256))
        .upload(&volume, &mut sink)
        .unwrap();
    let lit = GradientCoordinator::new(GradientConfig::default())
        .upload(&volume, &scalar, &mut sink)
        .await
        .unwrap();

    assert_eq!(lit.texture, 1);
    let (sw, sh, ..) = sink.uploads[scalar.texture];
    assert_eq!(sink.uploads[lit.texture], (sw, sh, 1, TexelFormat::Rgba8Unorm));
    assert!(lit.max_magnitude >= lit.min_magnitude);

    let native = VolumeTextureBuilder::new(native_capability())
        .upload(&volume, &mut sink)
        .unwrap();
    let lit = GradientCoordinator::new(GradientConfig::default())
        .upload(&volume, &native, &mut sink)
        .await
        .unwrap();
    assert_eq!(sink.uploads[lit.texture], (8, 6, 5, TexelFormat::Rgba8Unorm));
}

// ===============================================================================
// worker 失败
// ===============================================================================

struct FailingWorker;

#[async_trait]
impl GradientWorker for FailingWorker {
    async fn compute(&self, request: GradientRequest) -> Result<GradientResult, ComputeError> {
        if request.depth_start > 0 {
            return Err(ComputeError::WorkerFailed {
                depth_start: request.depth_start,
                depth_end: request.depth_end,
                reason: "out of memory".to_string(),
            });
        }
        compute_slab(&request)
    }
}

struct PanickingWorker;

#[async_trait]
impl GradientWorker for PanickingWorker {
    async fn compute(&self, request: GradientRequest) -> Result<GradientResult, ComputeError> {
        if request.depth_end + 1 == request.depth {
            panic!("worker crashed on slab starting at {}", request.depth_start);
        }
        compute_slab(&request)
    }
}

struct HangingWorker;

#[async_trait]
impl GradientWorker for HangingWorker {
    async fn compute(&self, request: GradientRequest) -> Result<GradientResult, ComputeError> {
        if request.depth_start > 0 {
            std::future::pending::<()>().await;
        }
        compute_slab(&request)
    }
}

/// 返回正确数据但标错深度范围的 worker
enum Mislabel {
    /// 整体平移到体外
    PastTheEnd,
    /// 冒充从 0 开始的 slab
    ClaimFirstSlab,
}

struct MislabelingWorker(Mislabel);

#[async_trait]
impl GradientWorker for MislabelingWorker {
    async fn compute(&self, request: GradientRequest) -> Result<GradientResult, ComputeError> {
        let mut result = compute_slab(&request)?;
        if request.depth_start > 0 {
            match self.0 {
                Mislabel::PastTheEnd => {
                    result.depth_start += request.depth;
                    result.depth_end += request.depth;
                }
                Mislabel::ClaimFirstSlab => {
                    result.depth_end -= result.depth_start;
                    result.depth_start = 0;
                }
            }
        }
        Ok(result)
    }
}

/// 单个 worker 出错时整个构建失败，且光照纹理不会被上传
async fn upload_with<W: GradientWorker>(worker: W, timeout: Option<Duration>) -> ComputeError {
    let data = field(4, 4, 6);
    let volume = Volume::new(4, 4, 6, Vec3::ONE, &data).unwrap();
    let mut sink = CountingSink::default();
    let scalar = VolumeTextureBuilder::new(DeviceCapability::minimal(256))
        .upload(&volume, &mut sink)
        .unwrap();

    let coordinator = GradientCoordinator::with_worker(
        worker,
        GradientConfig {
            max_workers: 3,
            timeout,
        },
    );
    let err = coordinator
        .upload(&volume, &scalar, &mut sink)
        .await
        .err()
        .expect("gradient build should fail");
    assert_eq!(sink.uploads.len(), 1);
    err
}

#[tokio::test]
async fn failed_worker_aborts_the_build() {
    let err = upload_with(FailingWorker, None).await;
    assert!(matches!(err, ComputeError::WorkerFailed { depth_start, .. } if depth_start > 0));
}

#[tokio::test]
async fn panicked_worker_aborts_the_build() {
    let err = upload_with(PanickingWorker, None).await;
    assert!(matches!(err, ComputeError::WorkerPanicked(_)));
}

#[tokio::test]
async fn hanging_worker_times_out() {
    let err = upload_with(HangingWorker, Some(Duration::from_millis(50))).await;
    assert!(matches!(err, ComputeError::WorkerTimeout(limit) if limit == Duration::from_millis(50)));
}

#[tokio::test]
async fn mismatched_volume_info_is_rejected() {
    let data = field(4, 4, 6);
    let volume = Volume::new(4, 4, 6, Vec3::ONE, &data).unwrap();
    let packed = VolumeTextureBuilder::new(DeviceCapability::minimal(256))
        .build(&volume)
        .unwrap();
    let other = Volume::new(4, 4, 3, Vec3::ONE, &data[..48]).unwrap();
    let err = GradientCoordinator::new(GradientConfig::default())
        .compute(&other, &packed.info, &packed.layout)
        .await
        .err()
        .expect("shapes differ");
    assert!(matches!(err, ComputeError::ShapeMismatch { .. }));
}

#[tokio::test]
async fn mislabelled_results_abort_the_build() {
    for mislabel in [Mislabel::PastTheEnd, Mislabel::ClaimFirstSlab] {
        let err = upload_with(MislabelingWorker(mislabel), None).await;
        // 报告的是派发出去的 slab，而不是 worker 声称的范围
        assert!(
            matches!(err, ComputeError::WorkerFailed { depth_start, depth_end, .. }
                if depth_start > 0 && depth_end < 6),
            "{err}"
        );
    }
}

#[tokio::test]
async fn info_and_layout_must_come_from_one_build() {
    let data = field(40, 40, 20);
    let volume = Volume::new(40, 40, 20, Vec3::ONE, &data).unwrap();
    let cap = DeviceCapability {
        supports_float_textures: true,
        ..DeviceCapability::minimal(4096)
    };
    let subsampled = VolumeTextureBuilder::new(cap)
        .with_config(volume_pack::PackingConfig {
            conservative_dimension: 128,
        })
        .build(&volume)
        .unwrap();
    let full = VolumeTextureBuilder::new(cap).build(&volume).unwrap();
    assert_eq!((subsampled.info.xstride, full.info.xstride), (2, 1));

    let coordinator = GradientCoordinator::new(GradientConfig::default());
    let err = coordinator
        .compute(&volume, &subsampled.info, &full.layout)
        .await
        .err()
        .expect("strides differ");
    assert!(matches!(err, ComputeError::ShapeMismatch { .. }));

    let lit = coordinator
        .compute(&volume, &subsampled.info, &subsampled.layout)
        .await
        .expect("Failed to build lighting");
    assert_eq!(lit.extent, subsampled.extent);
}
