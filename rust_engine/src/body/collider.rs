//! 三角形碰撞体与碰撞场景
//!
//! 碰撞几何使用 Rapier3D 的三角网格形状，命中的三角形由 `FeatureId::Face` 给出，
//! 重心坐标由命中点与三角形顶点求出。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use glam::{Vec2, Vec3};
use rapier3d::geometry::InteractionTestMode;
use rapier3d::parry::query::{Ray, RayCast, RayIntersection};
use rapier3d::parry::shape::FeatureId;
use rapier3d::prelude::*;

use super::{ColliderId, LayerMask};
use crate::projection::{RaycastQuery, RaycastResult};
use crate::{DecalError, Result};

/// 单次检测的最远距离（无限远的查询被截断到这里）
const MAX_RAY_DISTANCE: f32 = 1.0e7;

/// 射线检测接口
///
/// 工作线程并发调用，实现必须只读。
pub trait Raycaster: Send + Sync {
    fn raycast(&self, query: &RaycastQuery) -> RaycastResult;
}

/// 目标碰撞体的 UV 与索引快照
///
/// 每次投影开始前复制一次，工作线程只读访问。
#[derive(Clone, Debug, Default)]
pub struct ColliderGeometrySnapshot {
    pub collider_id: ColliderId,
    pub uv_coords: Vec<Vec2>,
    pub triangle_indices: Vec<u32>,
}

impl ColliderGeometrySnapshot {
    pub fn triangle_count(&self) -> usize {
        self.triangle_indices.len() / 3
    }

    /// 用重心坐标插值三角形的 UV
    ///
    /// 三角形或顶点下标越界时返回 `None`。
    pub fn interpolate_uv(&self, triangle_index: u32, barycentric: Vec3) -> Option<Vec2> {
        let base = triangle_index as usize * 3;
        let tri = self.triangle_indices.get(base..base + 3)?;
        let uv0 = *self.uv_coords.get(tri[0] as usize)?;
        let uv1 = *self.uv_coords.get(tri[1] as usize)?;
        let uv2 = *self.uv_coords.get(tri[2] as usize)?;
        Some(uv0 * barycentric.x + uv1 * barycentric.y + uv2 * barycentric.z)
    }
}

/// 三角形网格碰撞体
#[derive(Clone)]
pub struct TriangleCollider {
    id: ColliderId,
    layer: u8,
    positions: Vec<Vec3>,
    uvs: Vec<Vec2>,
    indices: Vec<u32>,
    shape: SharedShape,
    groups: InteractionGroups,
}

impl fmt::Debug for TriangleCollider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriangleCollider")
            .field("id", &self.id)
            .field("layer", &self.layer)
            .field("vertices", &self.positions.len())
            .field("triangles", &self.triangle_count())
            .finish()
    }
}

impl TriangleCollider {
    /// 创建碰撞体
    ///
    /// UV 可以为空（遮挡物），否则数量必须与顶点一致。
    pub fn new(
        id: ColliderId,
        layer: u8,
        positions: Vec<Vec3>,
        uvs: Vec<Vec2>,
        indices: Vec<u32>,
    ) -> Result<Self> {
        if indices.is_empty() || indices.len() % 3 != 0 {
            return Err(DecalError::InvalidGeometry(format!(
                "index count {} is not a non-zero multiple of 3",
                indices.len()
            )));
        }
        if !uvs.is_empty() && uvs.len() != positions.len() {
            return Err(DecalError::InvalidGeometry(format!(
                "uv count {} does not match vertex count {}",
                uvs.len(),
                positions.len()
            )));
        }
        if let Some(&bad) = indices.iter().find(|&&i| i as usize >= positions.len()) {
            return Err(DecalError::InvalidGeometry(format!(
                "vertex index {} out of range ({} vertices)",
                bad,
                positions.len()
            )));
        }

        let vertices = positions.iter().map(|&p| vec3_to_rapier(p)).collect();
        let triangles = indices.chunks_exact(3).map(|t| [t[0], t[1], t[2]]).collect();
        let shape = SharedShape::trimesh(vertices, triangles)
            .map_err(|e| DecalError::InvalidGeometry(format!("trimesh build failed: {:?}", e)))?;

        Ok(Self {
            id,
            layer,
            positions,
            uvs,
            indices,
            shape,
            groups: layer_groups(layer),
        })
    }

    pub fn id(&self) -> ColliderId {
        self.id
    }

    pub fn layer(&self) -> u8 {
        self.layer
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn uvs(&self) -> &[Vec2] {
        &self.uvs
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// 碰撞层对应的 Rapier 碰撞组
    pub fn collision_groups(&self) -> InteractionGroups {
        self.groups
    }

    /// 过滤掩码是否包含本碰撞体所在的层
    pub fn accepts(&self, filter: LayerMask) -> bool {
        accepts(self.groups, filter)
    }

    /// 复制 UV 与索引快照
    pub fn snapshot(&self) -> ColliderGeometrySnapshot {
        ColliderGeometrySnapshot {
            collider_id: self.id,
            uv_coords: self.uvs.clone(),
            triangle_indices: self.indices.clone(),
        }
    }

    /// 创建放入 Rapier 碰撞体集合的碰撞体
    ///
    /// `user_data` 保存碰撞体标识。
    pub fn build_rapier_collider(&self) -> Collider {
        ColliderBuilder::new(self.shape.clone())
            .collision_groups(self.groups)
            .user_data(self.id.0 as u128)
            .build()
    }

    /// 最近命中（忽略层过滤）
    ///
    /// 返回 (距离, 三角形下标, 重心坐标)。
    pub fn cast(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
    ) -> Option<(f32, u32, Vec3)> {
        let ray = Ray::new(vec3_to_rapier(origin), vec3_to_rapier(direction));
        let hit = self
            .shape
            .cast_local_ray_and_get_normal(&ray, max_distance.min(MAX_RAY_DISTANCE), false)?;
        self.resolve_hit(origin, direction, hit)
    }

    /// 命中特征转换为三角形下标与重心坐标
    ///
    /// 背面命中的特征编号偏移了三角形数量，取模还原。
    fn resolve_hit(
        &self,
        origin: Vec3,
        direction: Vec3,
        hit: RayIntersection,
    ) -> Option<(f32, u32, Vec3)> {
        let count = self.triangle_count() as u32;
        let triangle = match hit.feature {
            FeatureId::Face(face) if count > 0 => face % count,
            _ => return None,
        };
        let [v0, v1, v2] = self.triangle(triangle)?;
        let point = origin + direction * hit.time_of_impact;
        Some((hit.time_of_impact, triangle, barycentric(point, v0, v1, v2)))
    }

    fn triangle(&self, triangle_index: u32) -> Option<[Vec3; 3]> {
        let base = triangle_index as usize * 3;
        let tri = self.indices.get(base..base + 3)?;
        Some([
            *self.positions.get(tri[0] as usize)?,
            *self.positions.get(tri[1] as usize)?,
            *self.positions.get(tri[2] as usize)?,
        ])
    }
}

impl Raycaster for TriangleCollider {
    fn raycast(&self, query: &RaycastQuery) -> RaycastResult {
        if query.is_skipped() || !self.accepts(query.collider_filter) {
            return RaycastResult::MISS;
        }
        match self.cast(query.origin, query.direction, query.max_distance) {
            Some((t, tri, bary)) => RaycastResult::hit(self.id, tri, bary, t),
            None => RaycastResult::MISS,
        }
    }
}

/// 碰撞场景：目标碰撞体加上可能遮挡射线的其他几何体
///
/// 几何体保存在 Rapier 的 `ColliderSet` 中，以 `ColliderHandle` 区分。
pub struct CollisionScene {
    collider_set: ColliderSet,
    rigid_body_set: RigidBodySet,
    island_manager: IslandManager,
    /// 碰撞体标识 → (Rapier 句柄, 碰撞体)
    entries: HashMap<ColliderId, (ColliderHandle, Arc<TriangleCollider>)>,
}

impl Default for CollisionScene {
    fn default() -> Self {
        Self {
            collider_set: ColliderSet::new(),
            rigid_body_set: RigidBodySet::new(),
            island_manager: IslandManager::new(),
            entries: HashMap::new(),
        }
    }
}

impl CollisionScene {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加碰撞体（同 ID 的旧碰撞体被替换），返回 Rapier 句柄
    pub fn insert(&mut self, collider: Arc<TriangleCollider>) -> ColliderHandle {
        self.remove(collider.id());
        let handle = self.collider_set.insert(collider.build_rapier_collider());
        self.entries.insert(collider.id(), (handle, collider));
        handle
    }

    pub fn remove(&mut self, id: ColliderId) -> Option<Arc<TriangleCollider>> {
        let (handle, collider) = self.entries.remove(&id)?;
        self.collider_set.remove(
            handle,
            &mut self.island_manager,
            &mut self.rigid_body_set,
            false,
        );
        Some(collider)
    }

    pub fn get(&self, id: ColliderId) -> Option<&Arc<TriangleCollider>> {
        self.entries.get(&id).map(|(_, collider)| collider)
    }

    /// 碰撞体在 Rapier 集合中的句柄
    pub fn handle(&self, id: ColliderId) -> Option<ColliderHandle> {
        self.entries.get(&id).map(|(handle, _)| *handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Raycaster for CollisionScene {
    fn raycast(&self, query: &RaycastQuery) -> RaycastResult {
        if query.is_skipped() {
            return RaycastResult::MISS;
        }
        let ray = Ray::new(vec3_to_rapier(query.origin), vec3_to_rapier(query.direction));
        let mut best = RaycastResult::MISS;
        let mut limit = query.max_distance.min(MAX_RAY_DISTANCE);
        for (_, collider) in self.collider_set.iter() {
            if !accepts(collider.collision_groups(), query.collider_filter) {
                continue;
            }
            let Some(hit) = collider
                .shape()
                .cast_ray_and_get_normal(collider.position(), &ray, limit, false)
            else {
                continue;
            };
            let id = ColliderId(collider.user_data as u32);
            let Some((_, triangle)) = self.entries.get(&id) else {
                continue;
            };
            if let Some((t, tri, bary)) = triangle.resolve_hit(query.origin, query.direction, hit) {
                limit = t;
                best = RaycastResult::hit(id, tri, bary, t);
            }
        }
        best
    }
}

/// 碰撞层转换为碰撞组：所属组为该层，过滤组为全部
fn layer_groups(layer: u8) -> InteractionGroups {
    InteractionGroups::new(
        Group::from_bits_truncate(LayerMask::layer(layer).0),
        Group::ALL,
        InteractionTestMode::default(),
    )
}

fn accepts(groups: InteractionGroups, filter: LayerMask) -> bool {
    groups
        .memberships
        .intersects(Group::from_bits_truncate(filter.0))
}

/// 将 glam Vec3 转换为 Rapier Vector
fn vec3_to_rapier(v: Vec3) -> Vector {
    Vector::new(v.x, v.y, v.z)
}

/// 点在三角形平面上的重心坐标 (w0, w1, w2)
fn barycentric(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    let v0 = b - a;
    let v1 = c - a;
    let v2 = p - a;
    let d00 = v0.dot(v0);
    let d01 = v0.dot(v1);
    let d11 = v1.dot(v1);
    let d20 = v2.dot(v0);
    let d21 = v2.dot(v1);
    let denom = d00 * d11 - d01 * d01;
    if denom.abs() <= f32::EPSILON {
        return Vec3::X;
    }
    let v = (d11 * d20 - d01 * d21) / denom;
    let w = (d00 * d21 - d01 * d20) / denom;
    Vec3::new(1.0 - v - w, v, w)
}
