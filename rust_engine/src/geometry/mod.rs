//! 射线场生成
//!
//! 围绕身体部位的部分圆柱面作为采样面，每个输出纹素对应一条指向圆柱轴的射线。
//! 射线场按 `row * width + col` 平铺存储。

mod cylinder;
mod ray_field;

pub use cylinder::{build_explicit_mesh, extract_mesh_rays, CylinderMesh};
pub use ray_field::{chunk_size, compute_implicit_ray_field, ImplicitCylinder};

use glam::{Mat4, Vec3};
use std::sync::Arc;

use crate::config::SamplingGeometry;
use crate::{DecalError, Result};

/// 采样射线
///
/// 方向始终从圆柱面指向圆柱轴（向内采样）。
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, direction }
    }

    /// 射线上距离 t 处的点
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

/// 射线场来源
///
/// 隐式计算与网格采样两种实现可互换，由配置选择。
pub trait RayFieldSource: Send + Sync {
    /// 生成 `width * height` 条射线
    fn generate(
        &self,
        width: u32,
        height: u32,
        geometry: &SamplingGeometry,
        surface_to_world: Mat4,
    ) -> Result<Vec<Ray>>;

    /// 左下角 (0, 0) 与右上角 (width-1, height-1) 两条射线
    fn corner_rays(
        &self,
        width: u32,
        height: u32,
        geometry: &SamplingGeometry,
        surface_to_world: Mat4,
    ) -> Result<[Ray; 2]> {
        let rays = self.generate(width, height, geometry, surface_to_world)?;
        match (rays.first(), rays.last()) {
            (Some(first), Some(last)) => Ok([*first, *last]),
            _ => Err(DecalError::GeometryUnavailable("empty ray field".to_string())),
        }
    }
}

/// 闭式隐式圆柱射线场（推荐路径）
#[derive(Clone, Copy, Debug, Default)]
pub struct ImplicitRayField;

impl RayFieldSource for ImplicitRayField {
    fn generate(
        &self,
        width: u32,
        height: u32,
        geometry: &SamplingGeometry,
        surface_to_world: Mat4,
    ) -> Result<Vec<Ray>> {
        geometry.validate()?;
        Ok(compute_implicit_ray_field(
            width,
            height,
            geometry.radius,
            geometry.wrap_angle_degrees,
            geometry.length,
            surface_to_world,
        ))
    }

    fn corner_rays(
        &self,
        width: u32,
        height: u32,
        geometry: &SamplingGeometry,
        surface_to_world: Mat4,
    ) -> Result<[Ray; 2]> {
        geometry.validate()?;
        if width == 0 || height == 0 {
            return Err(DecalError::GeometryUnavailable("empty ray field".to_string()));
        }
        let cylinder = ImplicitCylinder::new(
            width,
            height,
            geometry.radius,
            geometry.wrap_angle_degrees,
            geometry.length,
            surface_to_world,
        );
        Ok([cylinder.ray_at(0, 0), cylinder.ray_at(width - 1, height - 1)])
    }
}

/// 从显式圆柱网格顶点采样的射线场（旧路径）
#[derive(Clone, Debug, Default)]
pub struct MeshRayField {
    mesh: Option<Arc<CylinderMesh>>,
}

impl MeshRayField {
    pub fn new(mesh: Option<Arc<CylinderMesh>>) -> Self {
        Self { mesh }
    }

    /// 按几何参数构建网格
    pub fn from_geometry(geometry: &SamplingGeometry) -> Self {
        let mesh = build_explicit_mesh(
            geometry.radius,
            geometry.length,
            geometry.wrap_angle_degrees,
            geometry.radial_subdivisions,
        );
        Self::new(Some(Arc::new(mesh)))
    }

    /// 用于可视化的网格
    pub fn mesh(&self) -> Option<&CylinderMesh> {
        self.mesh.as_deref()
    }
}

impl RayFieldSource for MeshRayField {
    fn generate(
        &self,
        width: u32,
        height: u32,
        _geometry: &SamplingGeometry,
        surface_to_world: Mat4,
    ) -> Result<Vec<Ray>> {
        extract_mesh_rays(self.mesh.as_deref(), width, height, surface_to_world)
    }
}
