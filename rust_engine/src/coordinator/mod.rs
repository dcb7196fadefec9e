//! 投影协调器
//!
//! 主线程状态机：`Idle → PreparingRayField → JobRunning → Finalizing → Idle`。
//! 负责输出缓冲的分配与复用、策略选择、每帧轮询任务完成，
//! 以及完成后把纹理发布到材质并通知监听者。
//!
//! 同一个协调器同时只允许一次投影，重复调用 `project` 会被拒绝。

mod remap;

pub use crate::config::ProjectionStrategy;
pub use remap::{direct_texture_remap, two_corner_uv_remap};

use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::Mat4;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::body::{ColliderGeometrySnapshot, LayerMask, Raycaster, TriangleCollider};
use crate::config::{
    get_config, CompositeMode, ProjectorConfig, RayFieldMode, SamplingGeometry, UvRect,
};
use crate::geometry::{ImplicitRayField, MeshRayField, Ray, RayFieldSource};
use crate::material::MaterialSlots;
use crate::projection::{
    BudgetedCompositor, CompositeInput, CompositeProgress, CompositeStats, JobHandle, PassInput,
    PassOutput, ProjectionJob, ResultCompositor,
};
use crate::texture::{DecalImage, OutputBuffer, TextureHandle};
use crate::{DecalError, Result};

/// 协调器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionState {
    Idle,
    PreparingRayField,
    JobRunning,
    /// 主线程按帧预算合成中
    Finalizing,
}

/// 投影事件
#[derive(Debug, Clone)]
pub enum ProjectionEvent {
    /// 投影完成，纹理已应用到材质
    Ready {
        texture: TextureHandle,
        /// 实际接收纹理的材质槽（没有材质时为 `None`）
        material_index: Option<usize>,
        stats: CompositeStats,
    },
    /// 投影失败或被取消，材质保留之前的纹理
    Failed { reason: String },
}

/// 事件监听回调
pub type ProjectionListener = Box<dyn FnMut(&ProjectionEvent) + Send>;

/// 投影目标
struct Target {
    collider: Arc<TriangleCollider>,
    raycaster: Arc<dyn Raycaster>,
}

/// 射线场缓存键，任一项变化都需要重新生成
#[derive(Debug, Clone, Copy, PartialEq)]
struct RayFieldKey {
    mode: RayFieldMode,
    width: u32,
    height: u32,
    geometry: SamplingGeometry,
    surface_to_world: Mat4,
}

/// 一次投影开始时固定下来的参数
struct PassContext {
    started: Instant,
    decal: Arc<DecalImage>,
    snapshot: Arc<ColliderGeometrySnapshot>,
    raycaster: Arc<dyn Raycaster>,
    output_size: (u32, u32),
    clear_color: [u8; 4],
    collider_filter: LayerMask,
    composite_mode: CompositeMode,
    frame_budget: Duration,
    material_name: String,
    debug_log: bool,
}

enum PassStage {
    RayField {
        key: RayFieldKey,
        job: JobHandle<Vec<Ray>>,
    },
    Running(JobHandle<PassOutput>),
    Compositing {
        output: OutputBuffer,
        input: CompositeInput,
        compositor: BudgetedCompositor,
    },
}

struct ActivePass {
    ctx: PassContext,
    stage: PassStage,
}

enum Polled<T> {
    Ready(Result<T>),
    Pending(JobHandle<T>),
}

fn poll_job<T>(mut job: JobHandle<T>, block: bool) -> Polled<T> {
    if block {
        return Polled::Ready(job.wait());
    }
    match job.take() {
        Some(result) => Polled::Ready(result),
        None => Polled::Pending(job),
    }
}

enum PassProgress {
    InFlight(ActivePass),
    Finished(Result<CompositeStats>),
}

/// 投影协调器
pub struct ProjectionCoordinator {
    config: ProjectorConfig,
    pool: ThreadPool,
    decal: Option<Arc<DecalImage>>,
    target: Option<Target>,
    surface_to_world: Mat4,
    materials: MaterialSlots,
    listeners: Vec<ProjectionListener>,
    ray_cache: Option<(RayFieldKey, Arc<Vec<Ray>>)>,
    /// 上一次投影的输出缓冲，尺寸相同时清除后复用
    output: Option<OutputBuffer>,
    live_texture: Option<TextureHandle>,
    pass: Option<ActivePass>,
}

impl ProjectionCoordinator {
    /// 使用全局默认配置创建
    pub fn new() -> Result<Self> {
        Self::with_config(get_config())
    }

    pub fn with_config(config: ProjectorConfig) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|i| format!("decal-worker-{}", i))
            .build()
            .map_err(|e| DecalError::ThreadPool(e.to_string()))?;

        log::info!(
            "[投影] 协调器初始化: 输出 {}x{}, 策略 {:?}, 工作线程 {}",
            config.output_width,
            config.output_height,
            config.strategy,
            pool.current_num_threads()
        );

        Ok(Self {
            config,
            pool,
            decal: None,
            target: None,
            surface_to_world: Mat4::IDENTITY,
            materials: MaterialSlots::default(),
            listeners: Vec::new(),
            ray_cache: None,
            output: None,
            live_texture: None,
            pass: None,
        })
    }

    // ========== 状态 ==========

    pub fn state(&self) -> ProjectionState {
        match &self.pass {
            None => ProjectionState::Idle,
            Some(pass) => match pass.stage {
                PassStage::RayField { .. } => ProjectionState::PreparingRayField,
                PassStage::Running(_) => ProjectionState::JobRunning,
                PassStage::Compositing { .. } => ProjectionState::Finalizing,
            },
        }
    }

    pub fn is_idle(&self) -> bool {
        self.pass.is_none()
    }

    pub fn config(&self) -> &ProjectorConfig {
        &self.config
    }

    // ========== 输入 ==========

    /// 设置贴花（对进行中的投影无影响）
    pub fn set_decal(&mut self, decal: Arc<DecalImage>) {
        self.decal = Some(decal);
    }

    pub fn clear_decal(&mut self) {
        self.decal = None;
    }

    /// 设置目标碰撞体，射线只检测它本身
    pub fn set_target(&mut self, collider: Arc<TriangleCollider>) {
        let raycaster: Arc<dyn Raycaster> = collider.clone();
        self.target = Some(Target { collider, raycaster });
    }

    /// 设置目标碰撞体，射线在完整场景中检测（可能被其他几何体遮挡）
    pub fn set_target_in_scene(
        &mut self,
        collider: Arc<TriangleCollider>,
        scene: Arc<dyn Raycaster>,
    ) {
        self.target = Some(Target {
            collider,
            raycaster: scene,
        });
    }

    pub fn clear_target(&mut self) {
        self.target = None;
    }

    pub fn set_geometry(&mut self, geometry: SamplingGeometry) {
        self.config.geometry = geometry;
    }

    pub fn set_strategy(&mut self, strategy: ProjectionStrategy) {
        self.config.strategy = strategy;
    }

    pub fn set_ray_field_mode(&mut self, mode: RayFieldMode) {
        self.config.ray_field_mode = mode;
    }

    pub fn set_composite_mode(&mut self, mode: CompositeMode) {
        self.config.composite_mode = mode;
    }

    pub fn set_layer_mask(&mut self, mask: u32) {
        self.config.layer_mask = mask;
    }

    /// 纹理直接重映射的目标 UV 矩形
    pub fn set_remap_uv_bounds(&mut self, bounds: UvRect) {
        self.config.remap_uv_bounds = bounds;
    }

    /// 采样圆柱的局部到世界变换（身体骨骼变化时更新）
    pub fn set_surface_transform(&mut self, surface_to_world: Mat4) {
        self.surface_to_world = surface_to_world;
    }

    /// 输出纹理尺寸（下一次投影生效）
    pub fn set_output_size(&mut self, width: u32, height: u32) {
        self.config.output_width = width;
        self.config.output_height = height;
    }

    pub fn set_materials(&mut self, materials: MaterialSlots) {
        self.materials = materials;
    }

    pub fn materials(&self) -> &MaterialSlots {
        &self.materials
    }

    /// 当前发布的纹理
    pub fn live_texture(&self) -> Option<&TextureHandle> {
        self.live_texture.as_ref()
    }

    /// 最近一次生成的射线场（调试可视化）
    pub fn diagnostic_rays(&self) -> Option<Arc<Vec<Ray>>> {
        self.ray_cache.as_ref().map(|(_, rays)| rays.clone())
    }

    /// 注册事件监听
    pub fn subscribe(&mut self, listener: ProjectionListener) {
        self.listeners.push(listener);
    }

    // ========== 投影 ==========

    /// 开始一次投影
    ///
    /// 逐像素策略立即返回，之后每帧调用 `check_for_completion`；
    /// 两种重映射策略同步完成并在返回前发出事件。
    pub fn project(&mut self) -> Result<()> {
        if self.pass.is_some() {
            log::warn!("[投影] 已有投影进行中（{:?}），拒绝新的请求", self.state());
            return Err(DecalError::ConcurrentProjectionRequest);
        }

        let ctx = match self.prepare_context() {
            Ok(ctx) => ctx,
            Err(e) => {
                log::warn!("[投影] 跳过本次投影: {}", e);
                return Err(e);
            }
        };

        if ctx.debug_log {
            log::debug!(
                "[投影] 开始: 策略 {:?}, 贴花 {}x{}, 输出 {}x{}",
                self.config.strategy,
                ctx.decal.width,
                ctx.decal.height,
                ctx.output_size.0,
                ctx.output_size.1
            );
        }

        match self.config.strategy {
            ProjectionStrategy::PerPixelJobifiedRaycast => {
                self.start_ray_field(ctx);
                Ok(())
            }
            ProjectionStrategy::TwoCornerUvRemap | ProjectionStrategy::DirectTextureRemap => {
                self.run_remap(ctx)
            }
        }
    }

    /// 每帧调用，非阻塞推进当前投影
    pub fn check_for_completion(&mut self) -> ProjectionState {
        if let Some(pass) = self.pass.take() {
            match self.advance(pass, false) {
                PassProgress::InFlight(pass) => self.pass = Some(pass),
                PassProgress::Finished(_) => {}
            }
        }
        self.state()
    }

    /// 阻塞直到当前投影结束，没有进行中的投影时返回 `Ok(None)`
    pub fn wait_for_completion(&mut self) -> Result<Option<CompositeStats>> {
        let Some(mut pass) = self.pass.take() else {
            return Ok(None);
        };
        loop {
            match self.advance(pass, true) {
                PassProgress::InFlight(next) => pass = next,
                PassProgress::Finished(result) => return result.map(Some),
            }
        }
    }

    /// 放弃当前投影，返回是否有投影被取消
    pub fn cancel(&mut self) -> bool {
        let Some(pass) = self.pass.take() else {
            return false;
        };
        match &pass.stage {
            PassStage::RayField { job, .. } => job.cancel(),
            PassStage::Running(job) => job.cancel(),
            PassStage::Compositing { .. } => {}
        }
        drop(pass);
        log::info!("[投影] 已取消");
        self.emit(ProjectionEvent::Failed {
            reason: DecalError::Cancelled.to_string(),
        });
        true
    }

    fn prepare_context(&self) -> Result<PassContext> {
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| DecalError::GeometryUnavailable("no target collider".to_string()))?;
        let decal = self.decal.clone().ok_or(DecalError::DecalUnavailable)?;
        if decal.is_empty() {
            return Err(DecalError::DecalUnavailable);
        }
        self.config.geometry.validate()?;
        self.config.remap_uv_bounds.validate()?;
        if self.config.output_width == 0 || self.config.output_height == 0 {
            return Err(DecalError::InvalidGeometry(format!(
                "output size {}x{} is empty",
                self.config.output_width, self.config.output_height
            )));
        }

        Ok(PassContext {
            started: Instant::now(),
            decal,
            snapshot: Arc::new(target.collider.snapshot()),
            raycaster: target.raycaster.clone(),
            output_size: (self.config.output_width, self.config.output_height),
            clear_color: self.config.clear_color,
            collider_filter: LayerMask(self.config.layer_mask),
            composite_mode: self.config.composite_mode,
            frame_budget: self.config.frame_budget(),
            material_name: self.config.material_name.clone(),
            debug_log: self.config.debug_log,
        })
    }

    fn ray_field_source(&self) -> Arc<dyn RayFieldSource> {
        match self.config.ray_field_mode {
            RayFieldMode::Implicit => Arc::new(ImplicitRayField),
            RayFieldMode::ExplicitMesh => {
                Arc::new(MeshRayField::from_geometry(&self.config.geometry))
            }
        }
    }

    fn ray_field_key(&self, decal: &DecalImage) -> RayFieldKey {
        RayFieldKey {
            mode: self.config.ray_field_mode,
            width: decal.width,
            height: decal.height,
            geometry: self.config.geometry,
            surface_to_world: self.surface_to_world,
        }
    }

    /// 射线场：命中缓存时直接启动任务链，否则在线程池中生成
    fn start_ray_field(&mut self, ctx: PassContext) {
        let key = self.ray_field_key(&ctx.decal);
        if let Some((cached_key, rays)) = &self.ray_cache {
            if *cached_key == key {
                let rays = rays.clone();
                let stage = self.launch_job(&ctx, rays);
                self.pass = Some(ActivePass { ctx, stage });
                return;
            }
        }

        let source = self.ray_field_source();
        let geometry = key.geometry;
        let job = JobHandle::spawn(&self.pool, move |_| {
            source.generate(key.width, key.height, &geometry, key.surface_to_world)
        });
        self.pass = Some(ActivePass {
            ctx,
            stage: PassStage::RayField { key, job },
        });
    }

    /// 取出可复用的输出缓冲（尺寸相同时清除，否则重新分配）
    fn acquire_output(
        &mut self,
        (width, height): (u32, u32),
        clear_color: [u8; 4],
    ) -> OutputBuffer {
        match self.output.take() {
            Some(mut buffer) if buffer.matches(width, height) => {
                buffer.clear(clear_color);
                buffer
            }
            _ => OutputBuffer::new(width, height, clear_color),
        }
    }

    fn launch_job(&mut self, ctx: &PassContext, rays: Arc<Vec<Ray>>) -> PassStage {
        let output = self.acquire_output(ctx.output_size, ctx.clear_color);
        let job = ProjectionJob::spawn(
            &self.pool,
            PassInput {
                rays,
                decal: ctx.decal.clone(),
                snapshot: ctx.snapshot.clone(),
                raycaster: ctx.raycaster.clone(),
                collider_filter: ctx.collider_filter,
                output,
                composite_mode: ctx.composite_mode,
                debug_log: ctx.debug_log,
            },
        );
        PassStage::Running(job)
    }

    fn advance(&mut self, pass: ActivePass, block: bool) -> PassProgress {
        let ActivePass { ctx, stage } = pass;
        match stage {
            PassStage::RayField { key, job } => match poll_job(job, block) {
                Polled::Pending(job) => PassProgress::InFlight(ActivePass {
                    ctx,
                    stage: PassStage::RayField { key, job },
                }),
                Polled::Ready(Ok(rays)) => {
                    let rays = Arc::new(rays);
                    self.ray_cache = Some((key, rays.clone()));
                    let stage = self.launch_job(&ctx, rays);
                    PassProgress::InFlight(ActivePass { ctx, stage })
                }
                Polled::Ready(Err(e)) => self.fail(&ctx, e),
            },
            PassStage::Running(job) => match poll_job(job, block) {
                Polled::Pending(job) => PassProgress::InFlight(ActivePass {
                    ctx,
                    stage: PassStage::Running(job),
                }),
                Polled::Ready(Ok(PassOutput {
                    output,
                    stats: Some(stats),
                    ..
                })) => self.finalize(ctx, output, stats),
                Polled::Ready(Ok(PassOutput {
                    output,
                    deferred: Some(input),
                    ..
                })) => self.composite_step(ctx, output, input, BudgetedCompositor::new(), block),
                Polled::Ready(Ok(_)) => self.fail(
                    &ctx,
                    DecalError::Composite("projection job returned no result".to_string()),
                ),
                Polled::Ready(Err(e)) => self.fail(&ctx, e),
            },
            PassStage::Compositing {
                output,
                input,
                compositor,
            } => self.composite_step(ctx, output, input, compositor, block),
        }
    }

    /// 主线程合成一帧的预算
    fn composite_step(
        &mut self,
        ctx: PassContext,
        output: OutputBuffer,
        input: CompositeInput,
        mut compositor: BudgetedCompositor,
        block: bool,
    ) -> PassProgress {
        let budget = if block { None } else { Some(ctx.frame_budget) };
        match compositor.step(&input, &output, budget) {
            Ok(CompositeProgress::Done(stats)) => self.finalize(ctx, output, stats),
            Ok(CompositeProgress::Pending { processed, total }) => {
                if ctx.debug_log {
                    log::debug!("[投影] 主线程合成 {}/{}", processed, total);
                }
                PassProgress::InFlight(ActivePass {
                    ctx,
                    stage: PassStage::Compositing {
                        output,
                        input,
                        compositor,
                    },
                })
            }
            Err(e) => self.fail(&ctx, e),
        }
    }

    /// 同步重映射策略
    fn run_remap(&mut self, ctx: PassContext) -> Result<()> {
        let output = self.acquire_output(ctx.output_size, ctx.clear_color);
        let result = match self.config.strategy {
            ProjectionStrategy::TwoCornerUvRemap => self
                .ray_field_source()
                .corner_rays(
                    ctx.decal.width,
                    ctx.decal.height,
                    &self.config.geometry,
                    self.surface_to_world,
                )
                .and_then(|corners| {
                    two_corner_uv_remap(
                        &ctx.decal,
                        corners,
                        ctx.raycaster.as_ref(),
                        &ctx.snapshot,
                        ctx.collider_filter,
                        &output,
                    )
                }),
            _ => Ok(direct_texture_remap(&ctx.decal, self.config.remap_uv_bounds, &output)),
        };

        let progress = match result {
            Ok(stats) => self.finalize(ctx, output, stats),
            Err(e) => self.fail(&ctx, e),
        };
        match progress {
            PassProgress::Finished(result) => result.map(|_| ()),
            PassProgress::InFlight(_) => Ok(()),
        }
    }

    /// 上传纹理、生成 mip、应用到材质并通知
    fn finalize(
        &mut self,
        ctx: PassContext,
        output: OutputBuffer,
        stats: CompositeStats,
    ) -> PassProgress {
        // 材质槽持有的旧句柄先取下，没有外部引用时可原地复用纹理内存
        drop(self.materials.take_decal(&ctx.material_name));
        let mut handle = self.live_texture.take().unwrap_or_default();
        {
            let texture = Arc::make_mut(&mut handle);
            texture.upload(&output);
            texture.generate_mipmaps();
        }
        let material_index = self.materials.apply_decal(&ctx.material_name, handle.clone());
        self.live_texture = Some(handle.clone());
        self.output = Some(output);

        log::info!(
            "[投影] 完成: 写入 {}, 跳过 {}, 未命中 {}, 非目标 {}, 越界 {}, 材质槽 {:?}, 耗时 {:?}",
            stats.written,
            stats.skipped,
            stats.missed,
            stats.mismatched,
            stats.out_of_bounds,
            material_index,
            ctx.started.elapsed()
        );

        self.emit(ProjectionEvent::Ready {
            texture: handle,
            material_index,
            stats,
        });
        PassProgress::Finished(Ok(stats))
    }

    /// 放弃本次输出，回到 Idle
    fn fail(&mut self, ctx: &PassContext, error: DecalError) -> PassProgress {
        match &error {
            DecalError::Cancelled => log::info!("[投影] 已取消"),
            DecalError::GeometryUnavailable(_) | DecalError::InvalidSubdivisionRequest { .. } => {
                log::warn!("[投影] 跳过本次投影: {}", error)
            }
            _ => log::error!("[投影] 失败（{:?} 后）: {}", ctx.started.elapsed(), error),
        }
        self.emit(ProjectionEvent::Failed {
            reason: error.to_string(),
        });
        PassProgress::Finished(Err(error))
    }

    fn emit(&mut self, event: ProjectionEvent) {
        for listener in self.listeners.iter_mut() {
            listener(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::ColliderId;
    use crate::material::Material;
    use crate::projection::{premultiply_rgba, RaycastQuery, RaycastResult};
    use glam::{Vec2, Vec3};
    use std::sync::Mutex;

    /// 半径 0.5 的圆柱面，顶点错开半个分段
    fn cylinder_collider(segments: u32) -> Arc<TriangleCollider> {
        let offset = std::f32::consts::TAU / segments as f32 * 0.5;
        let mut positions = Vec::new();
        let mut uvs = Vec::new();
        let mut indices = Vec::new();
        for i in 0..=segments {
            let u = i as f32 / segments as f32;
            let angle = u * std::f32::consts::TAU + offset;
            for (v, y) in [(0.0, -2.0), (1.0, 2.0)] {
                positions.push(Vec3::new(0.5 * angle.sin(), y, 0.5 * angle.cos()));
                uvs.push(Vec2::new(u, v));
            }
        }
        for i in 0..segments {
            let b = i * 2;
            indices.extend_from_slice(&[b, b + 2, b + 1, b + 1, b + 2, b + 3]);
        }
        Arc::new(TriangleCollider::new(ColliderId::next(), 0, positions, uvs, indices).unwrap())
    }

    /// 每条射线都命中目标的第 0 个三角形
    struct AlwaysHit {
        id: ColliderId,
    }

    impl Raycaster for AlwaysHit {
        fn raycast(&self, query: &RaycastQuery) -> RaycastResult {
            if query.is_skipped() {
                return RaycastResult::MISS;
            }
            RaycastResult::hit(self.id, 0, Vec3::new(1.0, 0.0, 0.0), 1.0)
        }
    }

    fn config() -> ProjectorConfig {
        ProjectorConfig {
            output_width: 32,
            output_height: 32,
            worker_threads: 2,
            ..ProjectorConfig::default()
        }
    }

    fn coordinator(decal: DecalImage) -> ProjectionCoordinator {
        let mut coordinator = ProjectionCoordinator::with_config(config()).unwrap();
        coordinator.set_target(cylinder_collider(32));
        coordinator.set_decal(Arc::new(decal));
        coordinator
    }

    fn record_events(coordinator: &mut ProjectionCoordinator) -> Arc<Mutex<Vec<ProjectionEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        coordinator.subscribe(Box::new(move |event: &ProjectionEvent| {
            sink.lock().unwrap().push(event.clone())
        }));
        events
    }

    fn live_bytes(coordinator: &ProjectionCoordinator) -> Vec<u8> {
        coordinator.live_texture().unwrap().data.clone()
    }

    #[test]
    fn test_concurrent_project_is_rejected() {
        let mut coordinator = coordinator(DecalImage::solid(16, 8, [255, 0, 0, 255]));
        coordinator.project().unwrap();
        assert_eq!(coordinator.state(), ProjectionState::PreparingRayField);

        assert!(matches!(
            coordinator.project(),
            Err(DecalError::ConcurrentProjectionRequest)
        ));
        assert_eq!(coordinator.state(), ProjectionState::PreparingRayField);

        let stats = coordinator.wait_for_completion().unwrap().unwrap();
        assert_eq!(stats.written, 16 * 8);
        assert_eq!(coordinator.state(), ProjectionState::Idle);

        // 射线场已缓存，直接进入任务链
        coordinator.project().unwrap();
        assert_eq!(coordinator.state(), ProjectionState::JobRunning);
        assert!(coordinator.wait_for_completion().unwrap().is_some());
    }

    #[test]
    fn test_polling_reaches_idle() {
        let mut coordinator = coordinator(DecalImage::solid(16, 8, [0, 255, 0, 255]));
        let events = record_events(&mut coordinator);
        coordinator.project().unwrap();

        let mut frames = 0;
        while coordinator.check_for_completion() != ProjectionState::Idle {
            frames += 1;
            assert!(frames < 10_000, "projection never completed");
            std::thread::sleep(Duration::from_millis(1));
        }

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            ProjectionEvent::Ready { stats, texture, .. } => {
                assert_eq!(stats.written, 128);
                assert_eq!((texture.width, texture.height), (32, 32));
                assert_eq!(texture.mip_count(), 6);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_transparent_decal_leaves_texture_clear() {
        let mut coordinator = coordinator(DecalImage::solid(16, 8, [255, 255, 255, 0]));
        coordinator.project().unwrap();
        let stats = coordinator.wait_for_completion().unwrap().unwrap();
        assert_eq!(stats.skipped, 128);
        assert_eq!(stats.written, 0);
        assert!(live_bytes(&coordinator).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_opaque_decal_writes_premultiplied_color() {
        let color = [200, 100, 50, 128];
        let collider = cylinder_collider(8);
        let mut coordinator = ProjectionCoordinator::with_config(config()).unwrap();
        let scene = Arc::new(AlwaysHit { id: collider.id() });
        coordinator.set_target_in_scene(collider.clone(), scene);
        coordinator.set_decal(Arc::new(DecalImage::solid(8, 8, color)));
        coordinator.project().unwrap();
        let stats = coordinator.wait_for_completion().unwrap().unwrap();
        assert_eq!(stats.written, 64);

        let expected = premultiply_rgba(color);
        let bytes = live_bytes(&coordinator);
        let mut addressed = 0;
        for pixel in bytes.chunks(4) {
            if pixel == expected {
                addressed += 1;
            } else {
                assert_eq!(pixel, [0, 0, 0, 0]);
            }
        }
        assert!(addressed > 0);
    }

    #[test]
    fn test_collider_mismatch_leaves_texture_clear() {
        let collider = cylinder_collider(8);
        let mut coordinator = ProjectionCoordinator::with_config(config()).unwrap();
        coordinator.set_target_in_scene(collider, Arc::new(AlwaysHit { id: ColliderId(u32::MAX) }));
        coordinator.set_decal(Arc::new(DecalImage::solid(8, 8, [255, 0, 0, 255])));
        coordinator.project().unwrap();
        let stats = coordinator.wait_for_completion().unwrap().unwrap();
        assert_eq!(stats.mismatched, 64);
        assert!(live_bytes(&coordinator).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_missing_inputs_skip_projection() {
        let mut coordinator = ProjectionCoordinator::with_config(config()).unwrap();
        coordinator.set_decal(Arc::new(DecalImage::solid(4, 4, [1, 1, 1, 255])));
        assert!(matches!(
            coordinator.project(),
            Err(DecalError::GeometryUnavailable(_))
        ));

        coordinator.set_target(cylinder_collider(8));
        coordinator.clear_decal();
        assert!(matches!(coordinator.project(), Err(DecalError::DecalUnavailable)));

        coordinator.set_decal(Arc::new(DecalImage::solid(4, 4, [1, 1, 1, 255])));
        coordinator.set_geometry(SamplingGeometry {
            wrap_angle_degrees: 400.0,
            ..SamplingGeometry::default()
        });
        assert!(matches!(coordinator.project(), Err(DecalError::InvalidGeometry(_))));
        assert_eq!(coordinator.state(), ProjectionState::Idle);
        assert!(coordinator.live_texture().is_none());
    }

    #[test]
    fn test_cancel_returns_to_idle() {
        let mut coordinator = coordinator(DecalImage::solid(16, 8, [0, 0, 255, 255]));
        let events = record_events(&mut coordinator);
        coordinator.project().unwrap();
        assert!(coordinator.cancel());
        assert_eq!(coordinator.state(), ProjectionState::Idle);
        assert!(!coordinator.cancel());
        assert!(coordinator.live_texture().is_none());

        let events = events.lock().unwrap();
        assert!(matches!(&events[..], [ProjectionEvent::Failed { .. }]));
    }

    #[test]
    fn test_output_buffer_and_texture_reuse() {
        let mut coordinator = coordinator(DecalImage::solid(16, 8, [255, 0, 0, 255]));
        coordinator.project().unwrap();
        coordinator.wait_for_completion().unwrap();
        let first = Arc::as_ptr(coordinator.live_texture().unwrap());
        assert_eq!(coordinator.output.as_ref().map(|b| b.dimensions()), Some((32, 32)));

        // 同尺寸：缓冲清除后复用，上一帧的像素不残留
        coordinator.set_decal(Arc::new(DecalImage::solid(16, 8, [255, 0, 0, 0])));
        coordinator.project().unwrap();
        coordinator.wait_for_completion().unwrap();
        assert!(live_bytes(&coordinator).iter().all(|&b| b == 0));
        assert_eq!(Arc::as_ptr(coordinator.live_texture().unwrap()), first);

        // 尺寸变化：重新分配
        coordinator.set_output_size(8, 4);
        coordinator.project().unwrap();
        coordinator.wait_for_completion().unwrap();
        assert_eq!(coordinator.output.as_ref().map(|b| b.dimensions()), Some((8, 4)));
        assert_eq!(coordinator.live_texture().unwrap().byte_count(), 8 * 4 * 4);
    }

    #[test]
    fn test_frame_budgeted_matches_parallel() {
        let decal = DecalImage::solid(16, 8, [10, 200, 30, 255]);

        let mut parallel = coordinator(decal.clone());
        parallel.project().unwrap();
        let parallel_stats = parallel.wait_for_completion().unwrap().unwrap();

        let mut budgeted = coordinator(decal);
        budgeted.set_composite_mode(CompositeMode::FrameBudgeted);
        budgeted.project().unwrap();
        let mut frames = 0;
        while budgeted.check_for_completion() != ProjectionState::Idle {
            frames += 1;
            assert!(frames < 10_000, "projection never completed");
            std::thread::sleep(Duration::from_millis(1));
        }

        assert_eq!(live_bytes(&parallel), live_bytes(&budgeted));
        assert_eq!(parallel_stats.written, 128);
    }

    #[test]
    fn test_explicit_mesh_mode() {
        let collider = cylinder_collider(8);
        let mut coordinator = ProjectionCoordinator::with_config(config()).unwrap();
        let scene = Arc::new(AlwaysHit { id: collider.id() });
        coordinator.set_target_in_scene(collider.clone(), scene);
        coordinator.set_ray_field_mode(RayFieldMode::ExplicitMesh);
        let events = record_events(&mut coordinator);

        // 16 个基准细分，宽度 32 可以整除
        coordinator.set_decal(Arc::new(DecalImage::solid(32, 4, [5, 5, 5, 255])));
        coordinator.project().unwrap();
        assert_eq!(coordinator.wait_for_completion().unwrap().unwrap().written, 128);
        assert_eq!(coordinator.diagnostic_rays().map(|r| r.len()), Some(128));

        // 宽度 10 不能整除
        coordinator.set_decal(Arc::new(DecalImage::solid(10, 4, [5, 5, 5, 255])));
        coordinator.project().unwrap();
        assert!(matches!(
            coordinator.wait_for_completion(),
            Err(DecalError::InvalidSubdivisionRequest { requested: 10, base: 16 })
        ));
        assert_eq!(coordinator.state(), ProjectionState::Idle);

        let events = events.lock().unwrap();
        assert!(matches!(events[0], ProjectionEvent::Ready { .. }));
        assert!(matches!(events[1], ProjectionEvent::Failed { .. }));
    }

    #[test]
    fn test_ready_texture_applied_to_material() {
        let mut coordinator = coordinator(DecalImage::solid(16, 8, [9, 9, 9, 255]));
        coordinator.set_materials(MaterialSlots::new(vec![
            Material::new("Skin"),
            Material::new("Decal"),
            Material::new("Hair"),
        ]));
        let events = record_events(&mut coordinator);
        coordinator.project().unwrap();
        coordinator.wait_for_completion().unwrap();

        let events = events.lock().unwrap();
        match &events[0] {
            ProjectionEvent::Ready { material_index, .. } => assert_eq!(*material_index, Some(1)),
            other => panic!("unexpected event {:?}", other),
        }
        let applied = coordinator.materials().get(1).unwrap().decal_texture.clone().unwrap();
        assert!(Arc::ptr_eq(&applied, coordinator.live_texture().unwrap()));
    }

    #[test]
    fn test_direct_remap_strategy_is_synchronous() {
        let mut coordinator = coordinator(DecalImage::solid(4, 4, [50, 60, 70, 255]));
        coordinator.set_strategy(ProjectionStrategy::DirectTextureRemap);
        coordinator.set_output_size(4, 4);
        coordinator.project().unwrap();
        assert_eq!(coordinator.state(), ProjectionState::Idle);
        assert!(live_bytes(&coordinator).chunks(4).all(|p| p == [50, 60, 70, 255]));
    }

    #[test]
    fn test_non_finite_remap_bounds_are_rejected() {
        let mut coordinator = coordinator(DecalImage::solid(4, 4, [50, 60, 70, 255]));
        coordinator.set_strategy(ProjectionStrategy::DirectTextureRemap);
        coordinator.set_remap_uv_bounds(UvRect {
            min: Vec2::new(0.0, f32::NEG_INFINITY),
            max: Vec2::ONE,
        });
        let events = record_events(&mut coordinator);
        assert!(matches!(coordinator.project(), Err(DecalError::InvalidGeometry(_))));
        assert_eq!(coordinator.state(), ProjectionState::Idle);
        assert!(coordinator.live_texture().is_none());
        assert!(events.lock().unwrap().is_empty());

        // 超大但有限的矩形照常裁剪到输出范围
        coordinator.set_output_size(4, 4);
        coordinator.set_remap_uv_bounds(UvRect {
            min: Vec2::new(-1.0e30, 0.0),
            max: Vec2::new(1.0e30, 1.0),
        });
        coordinator.project().unwrap();
        assert!(live_bytes(&coordinator).chunks(4).all(|p| p == [50, 60, 70, 255]));
    }

    #[test]
    fn test_two_corner_strategy() {
        let mut coordinator = coordinator(DecalImage::solid(8, 8, [50, 60, 70, 255]));
        coordinator.set_strategy(ProjectionStrategy::TwoCornerUvRemap);
        coordinator.set_geometry(SamplingGeometry {
            wrap_angle_degrees: 90.0,
            ..SamplingGeometry::default()
        });
        let events = record_events(&mut coordinator);
        coordinator.project().unwrap();
        assert_eq!(coordinator.state(), ProjectionState::Idle);

        let events = events.lock().unwrap();
        match &events[0] {
            ProjectionEvent::Ready { stats, .. } => assert!(stats.written > 0),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_surface_transform_invalidates_ray_cache() {
        let mut coordinator = coordinator(DecalImage::solid(16, 8, [1, 2, 3, 255]));
        coordinator.project().unwrap();
        coordinator.wait_for_completion().unwrap();
        let first = coordinator.diagnostic_rays().unwrap();

        coordinator.set_surface_transform(Mat4::from_translation(Vec3::new(0.0, 0.1, 0.0)));
        coordinator.project().unwrap();
        assert_eq!(coordinator.state(), ProjectionState::PreparingRayField);
        coordinator.wait_for_completion().unwrap();
        let second = coordinator.diagnostic_rays().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!((second[0].origin.y - first[0].origin.y - 0.1).abs() < 1e-5);
    }
}
