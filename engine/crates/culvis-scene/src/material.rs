use std::{collections::HashMap, sync::Arc};

use ash::vk;

use crate::{
    error::{SceneError, SceneResult},
    pass::{MeshPassType, PerPassData},
};

/// 某个 pass 使用的 pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShaderPass {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

/// effect template：一个 pass 没有 shader 表示使用该 template 的物体不参与这个 pass
#[derive(Debug)]
pub struct EffectTemplate {
    pub name: String,
    pub pass_shaders: PerPassData<Option<ShaderPass>>,
}

/// 具体的材质实例：template + 每个 pass 的材质 descriptor set（set 2）
#[derive(Debug)]
pub struct MaterialInstance {
    pub name: String,
    pub template: Arc<EffectTemplate>,
    pub pass_sets: PerPassData<vk::DescriptorSet>,
}

/// 注册到场景中的材质
#[derive(Clone, Debug)]
pub struct Material {
    pub original: Arc<MaterialInstance>,
}

impl Material {
    #[inline]
    pub fn pass_shader(&self, pass: MeshPassType) -> Option<ShaderPass> {
        self.original.template.pass_shaders[pass]
    }

    #[inline]
    pub fn pass_set(&self, pass: MeshPassType) -> vk::DescriptorSet {
        self.original.pass_sets[pass]
    }
}

/// 名字到 template / material 的注册表，在注册物体之前构建材质
#[derive(Default)]
pub struct MaterialLibrary {
    templates: HashMap<String, Arc<EffectTemplate>>,
    materials: HashMap<String, Arc<MaterialInstance>>,
}

// new & init
impl MaterialLibrary {
    pub fn new() -> Self {
        Self::default()
    }
}

// tools
impl MaterialLibrary {
    pub fn add_template(
        &mut self,
        name: impl Into<String>,
        pass_shaders: PerPassData<Option<ShaderPass>>,
    ) -> SceneResult<Arc<EffectTemplate>> {
        let name = name.into();
        if self.templates.contains_key(&name) {
            return Err(SceneError::DuplicateTemplate(name));
        }
        let template = Arc::new(EffectTemplate {
            name: name.clone(),
            pass_shaders,
        });
        self.templates.insert(name, template.clone());
        Ok(template)
    }

    /// 基于已注册的 template 构建材质；同名材质会被替换
    pub fn build_material(
        &mut self,
        name: impl Into<String>,
        template_name: &str,
        pass_sets: PerPassData<vk::DescriptorSet>,
    ) -> SceneResult<Arc<MaterialInstance>> {
        let template = self.template(template_name)?;
        let name = name.into();
        let material = Arc::new(MaterialInstance {
            name: name.clone(),
            template,
            pass_sets,
        });
        if self.materials.insert(name.clone(), material.clone()).is_some() {
            log::warn!("material `{}` replaced", name);
        }
        Ok(material)
    }
}

// getter
impl MaterialLibrary {
    pub fn template(&self, name: &str) -> SceneResult<Arc<EffectTemplate>> {
        self.templates.get(name).cloned().ok_or_else(|| {
            log::error!("effect template `{}` not found", name);
            SceneError::MissingTemplate(name.to_string())
        })
    }

    pub fn material(&self, name: &str) -> SceneResult<Arc<MaterialInstance>> {
        self.materials.get(name).cloned().ok_or_else(|| {
            log::error!("material `{}` not found", name);
            SceneError::MissingMaterial(name.to_string())
        })
    }
}
