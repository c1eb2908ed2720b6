//! DX12 着色器程序
//!
//! HLSL 用 FXC（`D3DCompile`）编译为 vs_5_0 / ps_5_0 字节码。

use std::any::Any;
use std::cell::Cell;
use std::ffi::CString;
use std::rc::Rc;

use windows::core::PCSTR;
use windows::Win32::Graphics::Direct3D::Fxc::*;
use windows::Win32::Graphics::Direct3D::ID3DBlob;
use windows::Win32::Graphics::Direct3D12::D3D12_SHADER_BYTECODE;

use super::context::DxContext;
use crate::renderer::handle::{HandleKind, Tracked};
use crate::renderer::shader::{Shader, ShaderCode, ShaderSource, UniformBlock, UniformValue};

/// Blob 内容作为文本（编译器错误输出）
pub fn blob_text(blob: &ID3DBlob) -> String {
    unsafe {
        let bytes = std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize());
        String::from_utf8_lossy(bytes).trim_end_matches('\0').trim().to_string()
    }
}

fn compile_stage(source: &str, entry: &str, target: &str) -> Result<ID3DBlob, String> {
    let entry_c = CString::new(entry).map_err(|_| format!("invalid entry point name '{}'", entry))?;
    let target_c = CString::new(target).map_err(|_| format!("invalid target '{}'", target))?;
    let mut code = None;
    let mut errors = None;
    let result = unsafe {
        D3DCompile(
            source.as_ptr() as _,
            source.len(),
            None,
            None,
            None,
            PCSTR(entry_c.as_ptr() as *const u8),
            PCSTR(target_c.as_ptr() as *const u8),
            0,
            0,
            &mut code,
            Some(&mut errors),
        )
    };
    match (result, code) {
        (Ok(()), Some(code)) => Ok(code),
        (result, _) => {
            let detail = errors.as_ref().map(blob_text).unwrap_or_default();
            Err(format!("{} ({}) failed: {:?} {}", entry, target, result.err(), detail))
        }
    }
}

/// 编译好的顶点 / 像素字节码
pub struct DxProgram {
    ctx: Rc<DxContext>,
    pub id: u64,
    vertex: ID3DBlob,
    pixel: ID3DBlob,
    pub needs_texture: bool,
    pub uniforms: Cell<UniformBlock>,
    _tracked: Tracked,
}

impl DxProgram {
    pub fn vertex_bytecode(&self) -> D3D12_SHADER_BYTECODE {
        bytecode(&self.vertex)
    }

    pub fn pixel_bytecode(&self) -> D3D12_SHADER_BYTECODE {
        bytecode(&self.pixel)
    }
}

fn bytecode(blob: &ID3DBlob) -> D3D12_SHADER_BYTECODE {
    unsafe {
        D3D12_SHADER_BYTECODE {
            pShaderBytecode: blob.GetBufferPointer(),
            BytecodeLength: blob.GetBufferSize(),
        }
    }
}

impl Drop for DxProgram {
    fn drop(&mut self) {
        self.ctx.remove_program_pipelines(self.id);
    }
}

fn compile(ctx: &Rc<DxContext>, source: &ShaderSource) -> Result<DxProgram, String> {
    let ShaderCode::Hlsl { source: code, vertex_entry, fragment_entry } = &source.code else {
        return Err(format!("{} shaders are not supported by the DX12 backend", source.code.kind()));
    };
    Ok(DxProgram {
        ctx: ctx.clone(),
        id: ctx.next_program_id(),
        vertex: compile_stage(code, vertex_entry, "vs_5_0")?,
        pixel: compile_stage(code, fragment_entry, "ps_5_0")?,
        needs_texture: source.needs_texture,
        uniforms: Cell::new(UniformBlock::default()),
        _tracked: Tracked::new(&ctx.ledger, HandleKind::Shader),
    })
}

/// DX12 着色器
pub struct Dx12Shader {
    ctx: Rc<DxContext>,
    name: String,
    program: Option<Rc<DxProgram>>,
    log: Option<String>,
}

impl Dx12Shader {
    pub fn new(ctx: &Rc<DxContext>, source: &ShaderSource) -> Self {
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

impl Shader for Dx12Shader {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_error_reported() {
        let err = compile_stage("float4 VSMain() : SV_POSITION { return undefined; }", "VSMain", "vs_5_0").unwrap_err();
        assert!(err.contains("VSMain"));
    }
}
