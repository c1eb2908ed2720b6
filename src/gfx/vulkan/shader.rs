//! Vulkan 着色器程序
//!
//! GLSL 在创建时由 naga 编译为 SPIR-V；也接受预编译的 SPIR-V。
//! uniform 块保存在程序里，绘制时整体作为 push constant 推送。

use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;

use ash::vk;
use naga::ShaderStage;

use super::context::VkContext;
use crate::gfx::glsl;
use crate::renderer::handle::{HandleKind, Tracked};
use crate::renderer::shader::{Shader, ShaderCode, ShaderSource, UniformBlock, UniformValue};

/// 编译好的着色器模块
pub struct VkProgram {
    ctx: Rc<VkContext>,
    pub id: u64,
    pub vertex: vk::ShaderModule,
    pub fragment: vk::ShaderModule,
    pub needs_texture: bool,
    pub uniforms: Cell<UniformBlock>,
    tracked: Option<Tracked>,
}

impl Drop for VkProgram {
    fn drop(&mut self) {
        self.ctx.remove_program_pipelines(self.id);
        let (vertex, fragment) = (self.vertex, self.fragment);
        let tracked = self.tracked.take();
        self.ctx.retire(move |device| {
            unsafe {
                device.destroy_shader_module(vertex, None);
                device.destroy_shader_module(fragment, None);
            }
            drop(tracked);
        });
    }
}

fn spirv_for(source: &ShaderSource) -> Result<(Vec<u32>, Vec<u32>), String> {
    match &source.code {
        ShaderCode::Glsl { vertex, fragment } => Ok((
            glsl::to_spirv(ShaderStage::Vertex, vertex)?,
            glsl::to_spirv(ShaderStage::Fragment, fragment)?,
        )),
        ShaderCode::SpirV { vertex, fragment } => Ok((glsl::spirv_words(vertex)?, glsl::spirv_words(fragment)?)),
        other => Err(format!("{} shaders are not supported by the Vulkan backend", other.kind())),
    }
}

fn create_module(ctx: &VkContext, words: &[u32]) -> Result<vk::ShaderModule, String> {
    let info = vk::ShaderModuleCreateInfo::builder().code(words);
    unsafe { ctx.device.create_shader_module(&info, None) }.map_err(|e| format!("vkCreateShaderModule failed: {}", e))
}

fn compile(ctx: &Rc<VkContext>, source: &ShaderSource) -> Result<VkProgram, String> {
    let (vertex_words, fragment_words) = spirv_for(source)?;
    let vertex = create_module(ctx, &vertex_words)?;
    let fragment = match create_module(ctx, &fragment_words) {
        Ok(module) => module,
        Err(e) => {
            unsafe { ctx.device.destroy_shader_module(vertex, None) };
            return Err(e);
        }
    };
    Ok(VkProgram {
        ctx: ctx.clone(),
        id: ctx.next_program_id(),
        vertex,
        fragment,
        needs_texture: source.needs_texture,
        uniforms: Cell::new(UniformBlock::default()),
        tracked: Some(Tracked::new(&ctx.ledger, HandleKind::Shader)),
    })
}

/// Vulkan 着色器
pub struct VulkanShader {
    ctx: Rc<VkContext>,
    name: String,
    program: Option<Rc<VkProgram>>,
    log: Option<String>,
}

impl VulkanShader {
    /// 编译着色器，失败时返回无效的着色器并记录日志
    pub fn new(ctx: &Rc<VkContext>, source: &ShaderSource) -> Self {
        let (program, log) = match compile(ctx, source) {
            Ok(program) => {
                tracing::debug!(name = source.name.as_str(), id = program.id, "Vulkan shader compiled");
                (Some(Rc::new(program)), None)
            }
            Err(log) => (None, Some(log)),
        };
        Self {
            ctx: ctx.clone(),
            name: source.name.clone(),
            program,
            log,
        }
    }

    fn is_bound(&self) -> bool {
        let bound = self.ctx.bindings.borrow().program.upgrade();
        match (&self.program, bound) {
            (Some(mine), Some(bound)) => Rc::ptr_eq(mine, &bound),
            _ => false,
        }
    }
}

impl Shader for VulkanShader {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_valid(&self) -> bool {
        self.program.is_some()
    }

    fn bind(&mut self) {
        let mut bindings = self.ctx.bindings.borrow_mut();
        bindings.program = self.program.as_ref().map(Rc::downgrade).unwrap_or_default();
    }

    fn unbind(&mut self) {
        if self.is_bound() {
            self.ctx.bindings.borrow_mut().program = Default::default();
        }
    }

    fn set_uniform(&mut self, name: &str, value: UniformValue) {
        if let Some(program) = &self.program {
            let mut block = program.uniforms.get();
            if block.set(name, value) {
                program.uniforms.set(block);
            }
        }
    }

    fn dispose(&mut self) {
        self.unbind();
        if self.program.take().is_some() {
            tracing::debug!("Vulkan shader '{}' disposed", self.name);
        }
    }

    fn compile_log(&self) -> Option<&str> {
        self.log.as_deref()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_foreign_code_rejected() {
        let source = ShaderSource::hlsl("default", "float4 PSMain() : SV_TARGET { return 1; }");
        let err = spirv_for(&source).unwrap_err();
        assert!(err.contains("HLSL"));
    }

    #[test]
    fn test_bad_spirv_rejected() {
        let source = ShaderSource::spirv("broken", vec![1, 2, 3], vec![]);
        assert!(spirv_for(&source).is_err());
    }
}
