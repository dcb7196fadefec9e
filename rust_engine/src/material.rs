//! 材质槽
//!
//! 投影完成后的纹理按名称应用到材质槽，找不到同名材质时回退到最后一个。

use crate::texture::TextureHandle;

/// 材质
#[derive(Clone, Debug, Default)]
pub struct Material {
    pub name: String,
    /// 基础颜色贴图
    pub base_texture: Option<TextureHandle>,
    /// 投影贴花贴图
    pub decal_texture: Option<TextureHandle>,
}

impl Material {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// 身体网格的材质列表
#[derive(Clone, Debug, Default)]
pub struct MaterialSlots {
    materials: Vec<Material>,
}

impl MaterialSlots {
    pub fn new(materials: Vec<Material>) -> Self {
        Self { materials }
    }

    /// 获取材质数量
    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    pub fn push(&mut self, material: Material) {
        self.materials.push(material);
    }

    pub fn get(&self, index: usize) -> Option<&Material> {
        self.materials.get(index)
    }

    /// 获取所有材质名称列表
    pub fn names(&self) -> Vec<String> {
        self.materials.iter().map(|m| m.name.clone()).collect()
    }

    /// 查找目标槽：名称完全匹配，否则最后一个材质
    pub fn resolve(&self, name: &str) -> Option<usize> {
        self.materials
            .iter()
            .position(|m| m.name == name)
            .or_else(|| self.materials.len().checked_sub(1))
    }

    /// 应用贴花纹理，返回实际使用的槽位
    pub fn apply_decal(&mut self, name: &str, texture: TextureHandle) -> Option<usize> {
        let index = self.resolve(name)?;
        self.materials[index].decal_texture = Some(texture);
        Some(index)
    }

    /// 取下目标槽当前的贴花纹理
    pub fn take_decal(&mut self, name: &str) -> Option<TextureHandle> {
        let index = self.resolve(name)?;
        self.materials[index].decal_texture.take()
    }
}
