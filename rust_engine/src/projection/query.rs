//! 射线查询与结果

use glam::Vec3;

use crate::body::{ColliderId, LayerMask};
use crate::geometry::Ray;

/// 射线检测查询
///
/// `max_distance == 0` 是跳过标记（贴花纹素完全透明），
/// 保留在定长缓冲区中以维持各缓冲区下标一一对应。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RaycastQuery {
    pub origin: Vec3,
    pub direction: Vec3,
    pub max_distance: f32,
    pub collider_filter: LayerMask,
}

impl Default for RaycastQuery {
    fn default() -> Self {
        Self::skipped(LayerMask::ALL)
    }
}

impl RaycastQuery {
    /// 有效查询（距离无限）
    pub fn active(ray: &Ray, collider_filter: LayerMask) -> Self {
        Self {
            origin: ray.origin,
            direction: ray.direction,
            max_distance: f32::INFINITY,
            collider_filter,
        }
    }

    /// 跳过标记
    pub fn skipped(collider_filter: LayerMask) -> Self {
        Self {
            origin: Vec3::ZERO,
            direction: Vec3::ZERO,
            max_distance: 0.0,
            collider_filter,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.max_distance <= 0.0
    }
}

/// 射线检测结果，与查询同下标
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RaycastResult {
    pub hit: bool,
    pub collider_id: ColliderId,
    pub triangle_index: u32,
    /// 命中三角形的重心坐标，对应三角形的三个顶点
    pub barycentric: Vec3,
    pub distance: f32,
}

impl Default for RaycastResult {
    fn default() -> Self {
        Self::MISS
    }
}

impl RaycastResult {
    pub const MISS: Self = Self {
        hit: false,
        collider_id: ColliderId::NONE,
        triangle_index: 0,
        barycentric: Vec3::ZERO,
        distance: 0.0,
    };

    pub fn hit(
        collider_id: ColliderId,
        triangle_index: u32,
        barycentric: Vec3,
        distance: f32,
    ) -> Self {
        Self {
            hit: true,
            collider_id,
            triangle_index,
            barycentric,
            distance,
        }
    }
}
