//! OpenGL 着色器程序
//!
//! 先用 naga 解析得到可读的日志，再交给 wgpu 创建着色器模块。

use std::any::Any;
use std::borrow::Cow;
use std::cell::Cell;
use std::rc::Rc;

use naga::ShaderStage;

use super::context::{scoped, GlContext};
use crate::gfx::glsl;
use crate::renderer::handle::{HandleKind, Tracked};
use crate::renderer::shader::{Shader, ShaderCode, ShaderSource, UniformBlock, UniformValue};

/// 编译好的顶点 / 片段模块
pub struct GlProgram {
    ctx: Rc<GlContext>,
    pub id: u64,
    pub vertex: wgpu::ShaderModule,
    pub fragment: wgpu::ShaderModule,
    pub needs_texture: bool,
    pub uniforms: Cell<UniformBlock>,
    _tracked: Tracked,
}

impl Drop for GlProgram {
    fn drop(&mut self) {
        self.ctx.remove_program_pipelines(self.id);
    }
}

fn create_module(ctx: &GlContext, stage: ShaderStage, source: &str) -> Result<wgpu::ShaderModule, String> {
    glsl::parse(stage, source)?;
    scoped(&ctx.device, || {
        ctx.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("chart_render shader"),
            source: wgpu::ShaderSource::Glsl {
                shader: Cow::Borrowed(source),
                stage,
                defines: Default::default(),
            },
        })
    })
    .map_err(|e| format!("{:?} shader rejected by wgpu: {}", stage, e))
}

fn compile(ctx: &Rc<GlContext>, source: &ShaderSource) -> Result<GlProgram, String> {
    let ShaderCode::Glsl { vertex, fragment } = &source.code else {
        return Err(format!("{} shaders are not supported by the OpenGL backend", source.code.kind()));
    };
    Ok(GlProgram {
        ctx: ctx.clone(),
        id: ctx.next_program_id(),
        vertex: create_module(ctx, ShaderStage::Vertex, vertex)?,
        fragment: create_module(ctx, ShaderStage::Fragment, fragment)?,
        needs_texture: source.needs_texture,
        uniforms: Cell::new(UniformBlock::default()),
        _tracked: Tracked::new(&ctx.ledger, HandleKind::Shader),
    })
}

/// OpenGL 着色器
pub struct OpenGlShader {
    ctx: Rc<GlContext>,
    name: String,
    program: Option<Rc<GlProgram>>,
    log: Option<String>,
}

impl OpenGlShader {
    pub fn new(ctx: &Rc<GlContext>, source: &ShaderSource) -> Self {
        let (program, log) = match compile(ctx, source) {
            Ok(program) => (Some(Rc::new(program)), None),
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
        matches!((&self.program, bound), (Some(mine), Some(bound)) if Rc::ptr_eq(mine, &bound))
    }
}

impl Shader for OpenGlShader {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_valid(&self) -> bool {
        self.program.is_some()
    }

    fn bind(&mut self) {
        self.ctx.bindings.borrow_mut().program = self.program.as_ref().map(Rc::downgrade).unwrap_or_default();
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
        self.program = None;
    }

    fn compile_log(&self) -> Option<&str> {
        self.log.as_deref()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
