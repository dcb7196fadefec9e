//! 蒙皮身体与碰撞体
//!
//! 身体网格按骨骼矩阵蒙皮后烘焙为三角形碰撞体，投影射线对其进行检测。

mod collider;
mod skinning;

pub use collider::{ColliderGeometrySnapshot, CollisionScene, Raycaster, TriangleCollider};
pub use skinning::{skin_vertices, SkinnedPose};

use glam::{Mat4, Vec2, Vec3};

use crate::Result;

/// 碰撞体标识
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ColliderId(pub u32);

impl ColliderId {
    /// 无效标识（未命中）
    pub const NONE: Self = Self(0);

    /// 分配新的唯一标识
    pub fn next() -> Self {
        use std::sync::atomic::{AtomicU32, Ordering};
        static COUNTER: AtomicU32 = AtomicU32::new(1);
        Self(COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

/// 碰撞层掩码
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LayerMask(pub u32);

impl LayerMask {
    pub const ALL: Self = Self(u32::MAX);
    pub const NONE: Self = Self(0);

    /// 只包含单个层
    pub fn layer(layer: u8) -> Self {
        Self(1u32.checked_shl(layer as u32).unwrap_or(0))
    }

    pub fn contains(&self, layer: u8) -> bool {
        self.0 & Self::layer(layer).0 != 0
    }
}

impl Default for LayerMask {
    fn default() -> Self {
        Self::ALL
    }
}

/// 静止姿态顶点
#[derive(Clone, Debug)]
pub struct BodyVertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
}

/// 顶点骨骼权重
#[derive(Clone, Debug)]
pub enum BoneWeights {
    One { bone: i32 },
    Two { bones: [i32; 2], weight: f32 },
    Four { bones: [i32; 4], weights: [f32; 4] },
}

impl Default for BoneWeights {
    fn default() -> Self {
        BoneWeights::One { bone: 0 }
    }
}

/// 蒙皮身体网格
#[derive(Clone, Debug, Default)]
pub struct BodyMesh {
    pub name: String,
    pub vertices: Vec<BodyVertex>,
    pub weights: Vec<BoneWeights>,
    pub indices: Vec<u32>,
}

impl BodyMesh {
    /// 获取顶点数量
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// 获取三角形数量
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// 按骨骼矩阵蒙皮
    pub fn skin(&self, bone_matrices: &[Mat4]) -> SkinnedPose {
        skin_vertices(&self.vertices, &self.weights, bone_matrices)
    }

    /// 蒙皮并烘焙为碰撞体
    pub fn bake_collider(
        &self,
        id: ColliderId,
        layer: u8,
        bone_matrices: &[Mat4],
    ) -> Result<TriangleCollider> {
        let pose = self.skin(bone_matrices);
        let uvs = self.vertices.iter().map(|v| v.uv).collect();
        TriangleCollider::new(id, layer, pose.positions, uvs, self.indices.clone())
    }
}
