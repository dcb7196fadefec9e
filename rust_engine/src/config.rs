//! 投影配置
//!
//! 所有参数扁平化，直接在代码中修改默认值即可。
//! 协调器在构造时读取一次全局默认值，投影过程中不再访问全局状态。

use glam::Vec2;
use once_cell::sync::Lazy;
use std::sync::RwLock;

use crate::{DecalError, Result};

/// 投影策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProjectionStrategy {
    /// 逐像素射线检测（三阶段并行任务链）
    #[default]
    PerPixelJobifiedRaycast,
    /// 两角 UV 重映射（只发射 2 条射线，要求采样区域 UV 连续）
    TwoCornerUvRemap,
    /// 纹理到纹理直接重映射（已知 UV 矩形区域，无射线检测）
    DirectTextureRemap,
}

/// 射线场来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RayFieldMode {
    /// 闭式圆柱坐标直接计算（并行）
    #[default]
    Implicit,
    /// 从显式圆柱网格顶点采样（旧路径）
    ExplicitMesh,
}

/// 结果合成方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompositeMode {
    /// 任务链第三阶段在工作线程上并行合成
    #[default]
    Parallel,
    /// 任务链只做前两个阶段，主线程按帧时间预算分块合成
    FrameBudgeted,
}

/// UV 矩形（归一化坐标）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UvRect {
    pub min: Vec2,
    pub max: Vec2,
}

impl Default for UvRect {
    fn default() -> Self {
        Self {
            min: Vec2::ZERO,
            max: Vec2::ONE,
        }
    }
}

impl UvRect {
    /// 四个分量都必须是有限值；`min` 大于 `max` 的轴按镜像处理
    pub fn validate(&self) -> Result<()> {
        if !(self.min.is_finite() && self.max.is_finite()) {
            return Err(DecalError::InvalidGeometry(format!(
                "uv bounds must be finite, got {:?}..{:?}",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

/// 采样圆柱几何参数
///
/// 圆柱轴为局部 Y 轴，环绕角以局部 +Z（前方）为中心。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingGeometry {
    /// 圆柱半径
    pub radius: f32,
    /// 沿轴向的长度
    pub length: f32,
    /// 环绕角（度），取值范围 (0, 360]
    pub wrap_angle_degrees: f32,
    /// 径向细分数（显式网格的四边形数量，也是网格采样路径的基准细分数）
    pub radial_subdivisions: u32,
    /// 轴向细分数
    pub lengthwise_subdivisions: u32,
}

impl Default for SamplingGeometry {
    fn default() -> Self {
        Self {
            radius: 1.0,
            length: 2.0,
            wrap_angle_degrees: 360.0,
            radial_subdivisions: 16,
            lengthwise_subdivisions: 1,
        }
    }
}

impl SamplingGeometry {
    /// 检查参数是否在合法范围内
    pub fn validate(&self) -> Result<()> {
        if !(self.radius > 0.0) {
            return Err(DecalError::InvalidGeometry(format!(
                "radius must be positive, got {}",
                self.radius
            )));
        }
        if !(self.length > 0.0) {
            return Err(DecalError::InvalidGeometry(format!(
                "length must be positive, got {}",
                self.length
            )));
        }
        if !(self.wrap_angle_degrees > 0.0 && self.wrap_angle_degrees <= 360.0) {
            return Err(DecalError::InvalidGeometry(format!(
                "wrap angle must be in (0, 360], got {}",
                self.wrap_angle_degrees
            )));
        }
        if self.radial_subdivisions == 0 || self.lengthwise_subdivisions == 0 {
            return Err(DecalError::InvalidGeometry(
                "subdivision counts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// 环绕角（弧度）
    pub fn wrap_angle_radians(&self) -> f32 {
        self.wrap_angle_degrees.to_radians()
    }
}

/// 投影器配置（扁平化，不嵌套）
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectorConfig {
    // ========== 输出纹理 ==========
    /// 输出纹理宽度，默认 1024（可调整为身体贴图图集分辨率）
    pub output_width: u32,
    /// 输出纹理高度，默认 1024
    pub output_height: u32,
    /// 每次投影前填充的清除色（RGBA8）
    pub clear_color: [u8; 4],

    // ========== 采样几何 ==========
    pub geometry: SamplingGeometry,

    // ========== 流程选择 ==========
    pub strategy: ProjectionStrategy,
    pub ray_field_mode: RayFieldMode,
    pub composite_mode: CompositeMode,

    // ========== 射线检测 ==========
    /// 碰撞层掩码，默认全部层
    pub layer_mask: u32,

    // ========== 材质 ==========
    /// 接收投影纹理的材质名称，找不到时回退到最后一个材质
    pub material_name: String,

    // ========== 帧预算 ==========
    /// 显示刷新率（Hz），用于推导每帧合成时间预算
    pub display_refresh_hz: f32,
    /// 每帧可用于主线程合成的刷新间隔比例
    pub frame_budget_ratio: f32,

    // ========== 工作线程 ==========
    /// 工作线程数，0 表示由 rayon 自动决定
    pub worker_threads: usize,

    // ========== 直接重映射 ==========
    /// DirectTextureRemap 策略的目标 UV 区域
    pub remap_uv_bounds: UvRect,

    // ========== 调试 ==========
    /// 是否输出逐阶段调试日志，默认 false
    pub debug_log: bool,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            output_width: 1024,
            output_height: 1024,
            clear_color: [0, 0, 0, 0],

            geometry: SamplingGeometry::default(),

            strategy: ProjectionStrategy::default(),
            ray_field_mode: RayFieldMode::default(),
            composite_mode: CompositeMode::default(),

            layer_mask: u32::MAX,

            material_name: "Decal".to_string(),

            // 60Hz 显示器，每帧留一半时间给其他工作
            display_refresh_hz: 60.0,
            frame_budget_ratio: 0.5,

            worker_threads: 0,

            remap_uv_bounds: UvRect::default(),

            debug_log: false,
        }
    }
}

impl ProjectorConfig {
    /// 主线程合成每帧可用的时间预算
    pub fn frame_budget(&self) -> std::time::Duration {
        let hz = if self.display_refresh_hz > 0.0 {
            self.display_refresh_hz
        } else {
            60.0
        };
        let ratio = self.frame_budget_ratio.clamp(0.01, 1.0);
        std::time::Duration::from_secs_f32(ratio / hz)
    }
}

/// 全局默认配置
static PROJECTOR_CONFIG: Lazy<RwLock<ProjectorConfig>> =
    Lazy::new(|| RwLock::new(ProjectorConfig::default()));

/// 获取当前默认配置（只读副本）
pub fn get_config() -> ProjectorConfig {
    match PROJECTOR_CONFIG.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// 设置默认配置（只影响之后创建的协调器）
pub fn set_config(config: ProjectorConfig) {
    match PROJECTOR_CONFIG.write() {
        Ok(mut guard) => *guard = config,
        Err(poisoned) => *poisoned.into_inner() = config,
    }
}

/// 重置为默认配置
pub fn reset_config() {
    set_config(ProjectorConfig::default());
}
