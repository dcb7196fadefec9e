//! Skin Decal - 运行时蒙皮身体贴花投影引擎
//!
//! 将任意贴花图片投影到蒙皮身体网格表面，生成可直接作为材质使用的输出纹理：
//! - 隐式圆柱射线场生成（逐纹素一条射线）
//! - 三阶段并行任务链（构建查询 → 批量射线检测 → 结果合成）
//! - 重心坐标 UV 解析与 Alpha 预乘
//! - 按帧轮询的异步完成与帧时间预算合成
//! - 蒙皮身体碰撞体烘焙

pub mod body;
pub mod config;
pub mod coordinator;
pub mod geometry;
pub mod material;
pub mod projection;
pub mod texture;

pub use body::{
    BodyMesh, ColliderGeometrySnapshot, ColliderId, CollisionScene, Raycaster, TriangleCollider,
};
pub use config::{ProjectionStrategy, ProjectorConfig, SamplingGeometry};
pub use coordinator::{ProjectionCoordinator, ProjectionEvent, ProjectionState};
pub use geometry::{
    build_explicit_mesh, compute_implicit_ray_field, CylinderMesh, Ray, RayFieldSource,
};
pub use projection::{CompositeStats, JobHandle, RaycastQuery, RaycastResult};
pub use texture::{DecalImage, OutputBuffer, Texture, TextureHandle};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Texture error: {0}")]
    Texture(String),

    #[error("Geometry unavailable: {0}")]
    GeometryUnavailable(String),

    #[error("Radial sample count {requested} is not a multiple of base subdivision count {base}")]
    InvalidSubdivisionRequest { requested: u32, base: u32 },

    #[error("Invalid sampling geometry: {0}")]
    InvalidGeometry(String),

    #[error("No decal image set")]
    DecalUnavailable,

    #[error("A projection pass is already in flight")]
    ConcurrentProjectionRequest,

    #[error("Composite error: {0}")]
    Composite(String),

    #[error("Projection pass cancelled")]
    Cancelled,

    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    #[error("Worker panicked: {0}")]
    WorkerPanicked(String),
}

pub type Result<T> = std::result::Result<T, DecalError>;
