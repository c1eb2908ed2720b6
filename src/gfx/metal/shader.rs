//! Metal 着色器程序
//!
//! MSL 源码在创建时编译成库，失败时保存编译器输出。

use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;

use metal::{CompileOptions, Function};

use super::context::MtlContext;
use crate::renderer::handle::{HandleKind, Tracked};
use crate::renderer::shader::{Shader, ShaderCode, ShaderSource, UniformBlock, UniformValue};

/// 编译好的顶点 / 片段函数
pub struct MtlProgram {
    ctx: Rc<MtlContext>,
    pub id: u64,
    pub vertex: Function,
    pub fragment: Function,
    pub needs_texture: bool,
    pub uniforms: Cell<UniformBlock>,
    _tracked: Tracked,
}

impl Drop for MtlProgram {
    fn drop(&mut self) {
        self.ctx.remove_program_pipelines(self.id);
    }
}

fn compile(ctx: &Rc<MtlContext>, source: &ShaderSource) -> Result<MtlProgram, String> {
    let ShaderCode::Msl { source: code, vertex_entry, fragment_entry } = &source.code else {
        return Err(format!("{} shaders are not supported by the Metal backend", source.code.kind()));
    };
    let library = ctx
        .device
        .new_library_with_source(code, &CompileOptions::new())
        .map_err(|e| format!("MSL compilation failed: {}", e))?;
    let vertex = library
        .get_function(vertex_entry, None)
        .map_err(|e| format!("vertex entry '{}' not found: {}", vertex_entry, e))?;
    let fragment = library
        .get_function(fragment_entry, None)
        .map_err(|e| format!("fragment entry '{}' not found: {}", fragment_entry, e))?;
    Ok(MtlProgram {
        ctx: ctx.clone(),
        id: ctx.next_program_id(),
        vertex,
        fragment,
        needs_texture: source.needs_texture,
        uniforms: Cell::new(UniformBlock::default()),
        _tracked: Tracked::new(&ctx.ledger, HandleKind::Shader),
    })
}

/// Metal 着色器
pub struct MetalShader {
    ctx: Rc<MtlContext>,
    name: String,
    program: Option<Rc<MtlProgram>>,
    log: Option<String>,
}

impl MetalShader {
    pub fn new(ctx: &Rc<MtlContext>, source: &ShaderSource) -> Self {
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

impl Shader for MetalShader {
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
