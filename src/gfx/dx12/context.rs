//! DirectX 12 上下文
//!
//! # 初始化流程
//!
//! 1. 启用调试层（仅 Debug 构建）
//! 2. 创建 D3D12 设备（默认适配器，特性级别 11.0）
//! 3. 创建直接命令队列、Fence 和等待事件
//! 4. 创建根签名：b0 上 20 个 32 位常量，t0 SRV 表，s0 采样器表
//! 5. 创建 SRV / 采样器两个着色器可见堆
//! 6. 创建一次性上传用的命令分配器和命令列表
//!
//! COM 对象自带引用计数，但 GPU 不持有引用：帧内被绘制引用的资源要克隆进
//! `FrameRecording::keep_alive`，等帧的 Fence 完成后才放手。

use std::cell::{Cell, RefCell};
use std::mem::ManuallyDrop;
use std::rc::{Rc, Weak};

use tracing::{debug, info, warn};
use windows::core::{s, Interface, PCSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::System::Threading::{CreateEventA, WaitForSingleObject, INFINITE};

use super::descriptor::{DescriptorHeap, SlotAllocator, SHADER_VISIBLE_SLOTS};
use super::shader::DxProgram;
use super::texture::DxImage;
use crate::core::config::RenderConfig;
use crate::core::error::{ChartRenderError, GraphicsError, Result};
use crate::renderer::backend::{BlendFactor, BlendMode, DrawMode, TopologyClass};
use crate::renderer::buffer::{BufferDescriptor, VertexSemantic};
use crate::renderer::handle::{HandleKind, HandleLedger, Tracked};
use crate::renderer::pipeline::{LayoutKey, PipelineCache, PipelineKey, TopologyKey};
use crate::renderer::shader::UniformBlock;
use crate::renderer::state::DrawState;
use crate::renderer::sync::{FenceManager, FenceValue};

/// 离屏颜色目标格式
pub const TARGET_FORMAT: DXGI_FORMAT = DXGI_FORMAT_R8G8B8A8_UNORM;

/// 根参数下标
pub const ROOT_CONSTANTS: u32 = 0;
pub const ROOT_SRV_TABLE: u32 = 1;
pub const ROOT_SAMPLER_TABLE: u32 = 2;

/// 当前绑定，弱引用
#[derive(Default)]
pub struct Bindings {
    pub program: Weak<DxProgram>,
    pub texture: Weak<DxImage>,
}

/// 帧内正在录制的命令列表
pub struct FrameRecording {
    pub list: ID3D12GraphicsCommandList,
    pub rtv: D3D12_CPU_DESCRIPTOR_HANDLE,
    /// 本帧引用过的资源，帧完成后释放
    pub keep_alive: Vec<ID3D12Resource>,
}

struct OneShot {
    allocator: ID3D12CommandAllocator,
    list: ID3D12GraphicsCommandList,
}

/// 借用 COM 指针放进描述结构，不增加引用计数
///
/// # Safety
///
/// 返回值的生命周期不能超过 `resource`。
pub unsafe fn borrowed<T: Interface>(resource: &T) -> ManuallyDrop<Option<T>> {
    std::mem::transmute_copy(resource)
}

/// 资源状态转换屏障
pub fn transition(
    resource: &ID3D12Resource,
    before: D3D12_RESOURCE_STATES,
    after: D3D12_RESOURCE_STATES,
) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                pResource: unsafe { borrowed(resource) },
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                StateBefore: before,
                StateAfter: after,
            }),
        },
    }
}

/// 在指定堆上创建提交资源
pub fn committed_resource(
    device: &ID3D12Device,
    heap: D3D12_HEAP_TYPE,
    desc: &D3D12_RESOURCE_DESC,
    state: D3D12_RESOURCE_STATES,
) -> Result<ID3D12Resource> {
    let heap_props = D3D12_HEAP_PROPERTIES {
        Type: heap,
        ..Default::default()
    };
    let mut resource: Option<ID3D12Resource> = None;
    unsafe { device.CreateCommittedResource(&heap_props, D3D12_HEAP_FLAG_NONE, desc, state, None, &mut resource) }
        .map_err(|e| GraphicsError::ResourceCreation(format!("CreateCommittedResource failed: {:?}", e)))?;
    resource.ok_or_else(|| GraphicsError::ResourceCreation("CreateCommittedResource returned null".to_string()).into())
}

/// 线性缓冲区描述
pub fn buffer_desc(size: u64) -> D3D12_RESOURCE_DESC {
    D3D12_RESOURCE_DESC {
        Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
        Width: size.max(1),
        Height: 1,
        DepthOrArraySize: 1,
        MipLevels: 1,
        SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
        Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
        ..Default::default()
    }
}

/// DX12 共享上下文
pub struct DxContext {
    pub device: ID3D12Device,
    pub queue: ID3D12CommandQueue,
    fence: ID3D12Fence,
    event: HANDLE,
    pub renderer_info: String,
    pub ledger: HandleLedger,
    pub root_signature: ID3D12RootSignature,
    pub srv_heap: DescriptorHeap,
    pub sampler_heap: DescriptorHeap,
    slots: RefCell<SlotAllocator>,
    pending_slots: RefCell<Vec<u32>>,
    upload: OneShot,
    pub state: RefCell<DrawState>,
    pub bindings: RefCell<Bindings>,
    pub frame: RefCell<Option<FrameRecording>>,
    pipelines: RefCell<PipelineCache<ID3D12PipelineState>>,
    pub fences: FenceManager,
    next_program_id: Cell<u64>,
    _tracked: Vec<Tracked>,
}

impl DxContext {
    /// 创建上下文
    ///
    /// # 参数
    ///
    /// * `config` - 初始帧尺寸、清屏颜色和调试层开关
    /// * `ledger` - 设备的句柄账本
    pub fn new(config: &RenderConfig, ledger: HandleLedger) -> Result<Self> {
        info!("Initializing DirectX 12 context");
        unsafe {
            // 1. 调试层
            if cfg!(debug_assertions) && config.validation {
                let mut debug: Option<ID3D12Debug> = None;
                match D3D12GetDebugInterface(&mut debug) {
                    Ok(()) => {
                        if let Some(debug) = debug {
                            debug.EnableDebugLayer();
                            debug!("DX12 debug layer enabled");
                        }
                    }
                    Err(e) => warn!("Failed to enable DX12 debug layer: {:?}", e),
                }
            }

            // 2. 设备
            let mut device: Option<ID3D12Device> = None;
            D3D12CreateDevice(None, D3D_FEATURE_LEVEL_11_0, &mut device)
                .map_err(|e| GraphicsError::DeviceCreation(format!("D3D12CreateDevice failed: {:?}", e)))?;
            let device = device.ok_or_else(|| GraphicsError::DeviceCreation("D3D12CreateDevice returned null".to_string()))?;
            let adapter_luid = device.GetAdapterLuid();
            info!(luid_low = adapter_luid.LowPart, luid_high = adapter_luid.HighPart, "Using device");

            // 3. 队列和同步对象
            let queue_desc = D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
                ..Default::default()
            };
            let queue: ID3D12CommandQueue = device
                .CreateCommandQueue(&queue_desc)
                .map_err(|e| GraphicsError::DeviceCreation(format!("CreateCommandQueue failed: {:?}", e)))?;
            let fence: ID3D12Fence = device
                .CreateFence(0, D3D12_FENCE_FLAG_NONE)
                .map_err(|e| GraphicsError::DeviceCreation(format!("CreateFence failed: {:?}", e)))?;
            let event = CreateEventA(None, false, false, None)
                .map_err(|e| GraphicsError::DeviceCreation(format!("CreateEvent failed: {:?}", e)))?;

            // 4-5. 根签名和描述符堆
            let root_signature = create_root_signature(&device)?;
            let srv_heap = DescriptorHeap::new(&device, D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV, SHADER_VISIBLE_SLOTS, true)?;
            let sampler_heap = DescriptorHeap::new(&device, D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER, SHADER_VISIBLE_SLOTS, true)?;

            // 6. 上传命令
            let allocator: ID3D12CommandAllocator = device
                .CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT)
                .map_err(|e| GraphicsError::DeviceCreation(format!("CreateCommandAllocator failed: {:?}", e)))?;
            let list: ID3D12GraphicsCommandList = device
                .CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &allocator, None)
                .map_err(|e| GraphicsError::DeviceCreation(format!("CreateCommandList failed: {:?}", e)))?;
            list.Close()
                .map_err(|e| GraphicsError::DeviceCreation(format!("Close failed: {:?}", e)))?;

            let renderer_info = format!(
                "Direct3D 12 (adapter LUID {:08x}:{:08x})",
                adapter_luid.HighPart, adapter_luid.LowPart
            );
            let tracked = vec![
                Tracked::new(&ledger, HandleKind::Device),
                Tracked::new(&ledger, HandleKind::Queue),
                Tracked::new(&ledger, HandleKind::Fence),
                Tracked::new(&ledger, HandleKind::DescriptorHeap),
                Tracked::new(&ledger, HandleKind::DescriptorHeap),
                Tracked::new(&ledger, HandleKind::CommandPool),
            ];

            Ok(Self {
                device,
                queue,
                fence,
                event,
                renderer_info,
                ledger,
                root_signature,
                srv_heap,
                sampler_heap,
                slots: RefCell::new(SlotAllocator::new(SHADER_VISIBLE_SLOTS)),
                pending_slots: RefCell::new(Vec::new()),
                upload: OneShot { allocator, list },
                state: RefCell::new(DrawState::new(config.width, config.height, config.clear_color)),
                bindings: RefCell::new(Bindings::default()),
                frame: RefCell::new(None),
                pipelines: RefCell::new(PipelineCache::new()),
                fences: FenceManager::new(),
                next_program_id: Cell::new(1),
                _tracked: tracked,
            })
        }
    }

    pub fn next_program_id(&self) -> u64 {
        let id = self.next_program_id.get();
        self.next_program_id.set(id + 1);
        id
    }

    /// 执行命令列表并阻塞到完成
    pub fn execute_and_wait(&self, list: &ID3D12GraphicsCommandList) -> Result<()> {
        unsafe {
            let lists = [Some(list.cast::<ID3D12CommandList>().map_err(|e| {
                GraphicsError::CommandExecution(format!("command list cast failed: {:?}", e))
            })?)];
            self.queue.ExecuteCommandLists(&lists);
        }
        let value = self.fences.next_value();
        self.wait_for(value)
    }

    fn wait_for(&self, value: FenceValue) -> Result<()> {
        unsafe {
            self.queue
                .Signal(&self.fence, value.value())
                .map_err(|e| GraphicsError::CommandExecution(format!("Signal failed: {:?}", e)))?;
            if self.fence.GetCompletedValue() < value.value() {
                self.fence
                    .SetEventOnCompletion(value.value(), self.event)
                    .map_err(|e| GraphicsError::CommandExecution(format!("SetEventOnCompletion failed: {:?}", e)))?;
                WaitForSingleObject(self.event, INFINITE);
            }
        }
        self.fences.update_completed_value(value);
        Ok(())
    }

    /// 录制并同步执行一段上传命令
    pub fn submit_once(&self, record: impl FnOnce(&ID3D12GraphicsCommandList)) -> Result<()> {
        let OneShot { allocator, list } = &self.upload;
        unsafe {
            allocator
                .Reset()
                .map_err(|e| GraphicsError::CommandExecution(format!("allocator Reset failed: {:?}", e)))?;
            list.Reset(allocator, None)
                .map_err(|e| GraphicsError::CommandExecution(format!("list Reset failed: {:?}", e)))?;
            record(list);
            list.Close()
                .map_err(|e| GraphicsError::CommandExecution(format!("list Close failed: {:?}", e)))?;
        }
        self.execute_and_wait(list)
    }

    /// 等待队列空闲
    pub fn wait_idle(&self) {
        let value = self.fences.next_value();
        if let Err(e) = self.wait_for(value) {
            warn!("DX12 wait_idle failed: {}", e);
        }
    }

    pub fn allocate_slot(&self) -> Result<u32> {
        self.slots
            .borrow_mut()
            .allocate()
            .ok_or_else(|| GraphicsError::ResourceCreation(format!("all {} texture slots in use", SHADER_VISIBLE_SLOTS)).into())
    }

    /// 帧内释放的槽位要等帧完成后才能复用
    pub fn release_slot(&self, slot: u32) {
        if self.state.borrow().in_frame {
            self.pending_slots.borrow_mut().push(slot);
        } else {
            self.slots.borrow_mut().release(slot);
        }
    }

    /// 帧完成后回收
    pub fn collect_retired(&self) {
        let mut slots = self.slots.borrow_mut();
        for slot in self.pending_slots.borrow_mut().drain(..) {
            slots.release(slot);
        }
    }

    /// 取得（必要时创建）管线；DX12 只按拓扑大类区分
    pub fn pipeline(
        &self,
        program: &DxProgram,
        layout: &BufferDescriptor,
        mode: DrawMode,
        blend: BlendMode,
    ) -> Result<ID3D12PipelineState> {
        let class = mode.topology_class();
        let key = PipelineKey {
            shader_id: program.id,
            layout: LayoutKey::from(layout),
            topology: TopologyKey::Class(class),
            blend,
        };
        let mut cache = self.pipelines.borrow_mut();
        let pipeline = cache.get_or_try_insert(key, |_| {
            let pipeline = self.build_pipeline(program, layout, class, blend)?;
            debug!(shader = program.id, ?class, ?blend, "Created DX12 pipeline");
            Ok::<_, ChartRenderError>(pipeline)
        })?;
        Ok(pipeline.clone())
    }

    fn build_pipeline(
        &self,
        program: &DxProgram,
        layout: &BufferDescriptor,
        class: TopologyClass,
        blend: BlendMode,
    ) -> Result<ID3D12PipelineState> {
        let elements: Vec<D3D12_INPUT_ELEMENT_DESC> = layout
            .attributes
            .iter()
            .map(|attr| D3D12_INPUT_ELEMENT_DESC {
                SemanticName: semantic_name(attr.semantic),
                SemanticIndex: 0,
                Format: vertex_format(attr.components),
                InputSlot: 0,
                AlignedByteOffset: attr.byte_offset(),
                InputSlotClass: D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            })
            .collect();

        let mut desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
            pRootSignature: unsafe { borrowed(&self.root_signature) },
            VS: program.vertex_bytecode(),
            PS: program.pixel_bytecode(),
            BlendState: D3D12_BLEND_DESC {
                AlphaToCoverageEnable: false.into(),
                IndependentBlendEnable: false.into(),
                RenderTarget: [render_target_blend(blend); 8],
            },
            SampleMask: u32::MAX,
            RasterizerState: D3D12_RASTERIZER_DESC {
                FillMode: D3D12_FILL_MODE_SOLID,
                CullMode: D3D12_CULL_MODE_NONE,
                DepthClipEnable: true.into(),
                ..Default::default()
            },
            DepthStencilState: D3D12_DEPTH_STENCIL_DESC::default(),
            InputLayout: D3D12_INPUT_LAYOUT_DESC {
                pInputElementDescs: elements.as_ptr(),
                NumElements: elements.len() as u32,
            },
            PrimitiveTopologyType: topology_type(class),
            NumRenderTargets: 1,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            ..Default::default()
        };
        desc.RTVFormats[0] = TARGET_FORMAT;

        unsafe { self.device.CreateGraphicsPipelineState(&desc) }
            .map_err(|e| GraphicsError::ResourceCreation(format!("CreateGraphicsPipelineState failed: {:?}", e)).into())
    }

    /// 着色器释放时移除它的全部管线
    pub fn remove_program_pipelines(&self, program_id: u64) {
        if let Ok(mut cache) = self.pipelines.try_borrow_mut() {
            cache.remove_shader(program_id);
        }
    }

    pub fn clear_pipelines(&self) {
        let removed = self.pipelines.borrow_mut().clear();
        if !removed.is_empty() {
            debug!("Dropped {} cached DX12 pipelines", removed.len());
        }
    }
}

impl Drop for DxContext {
    fn drop(&mut self) {
        self.wait_idle();
        unsafe {
            let _ = CloseHandle(self.event);
        }
    }
}

/// 根签名：b0 常量、t0 SRV 表、s0 采样器表
fn create_root_signature(device: &ID3D12Device) -> Result<ID3D12RootSignature> {
    let srv_range = D3D12_DESCRIPTOR_RANGE {
        RangeType: D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
        NumDescriptors: 1,
        BaseShaderRegister: 0,
        RegisterSpace: 0,
        OffsetInDescriptorsFromTableStart: 0,
    };
    let sampler_range = D3D12_DESCRIPTOR_RANGE {
        RangeType: D3D12_DESCRIPTOR_RANGE_TYPE_SAMPLER,
        ..srv_range
    };
    let parameters = [
        D3D12_ROOT_PARAMETER {
            ParameterType: D3D12_ROOT_PARAMETER_TYPE_32BIT_CONSTANTS,
            Anonymous: D3D12_ROOT_PARAMETER_0 {
                Constants: D3D12_ROOT_CONSTANTS {
                    ShaderRegister: 0,
                    RegisterSpace: 0,
                    Num32BitValues: (UniformBlock::SIZE / 4) as u32,
                },
            },
            ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
        },
        D3D12_ROOT_PARAMETER {
            ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
            Anonymous: D3D12_ROOT_PARAMETER_0 {
                DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                    NumDescriptorRanges: 1,
                    pDescriptorRanges: &srv_range,
                },
            },
            ShaderVisibility: D3D12_SHADER_VISIBILITY_PIXEL,
        },
        D3D12_ROOT_PARAMETER {
            ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
            Anonymous: D3D12_ROOT_PARAMETER_0 {
                DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                    NumDescriptorRanges: 1,
                    pDescriptorRanges: &sampler_range,
                },
            },
            ShaderVisibility: D3D12_SHADER_VISIBILITY_PIXEL,
        },
    ];
    let desc = D3D12_ROOT_SIGNATURE_DESC {
        NumParameters: parameters.len() as u32,
        pParameters: parameters.as_ptr(),
        NumStaticSamplers: 0,
        pStaticSamplers: std::ptr::null(),
        Flags: D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT,
    };
    unsafe {
        let mut signature = None;
        let mut error = None;
        if let Err(e) = D3D12SerializeRootSignature(&desc, D3D_ROOT_SIGNATURE_VERSION_1, &mut signature, Some(&mut error)) {
            let detail = error.as_ref().map(super::shader::blob_text).unwrap_or_default();
            return Err(GraphicsError::DeviceCreation(format!("Failed to serialize root signature: {:?} {}", e, detail)).into());
        }
        let signature = signature
            .ok_or_else(|| GraphicsError::DeviceCreation("root signature blob missing".to_string()))?;
        let bytes = std::slice::from_raw_parts(signature.GetBufferPointer() as *const u8, signature.GetBufferSize());
        device
            .CreateRootSignature(0, bytes)
            .map_err(|e| GraphicsError::DeviceCreation(format!("Failed to create root signature: {:?}", e)).into())
    }
}

fn semantic_name(semantic: VertexSemantic) -> PCSTR {
    match semantic {
        VertexSemantic::Position => s!("POSITION"),
        VertexSemantic::Color => s!("COLOR"),
        VertexSemantic::TexCoord => s!("TEXCOORD"),
    }
}

pub fn vertex_format(components: u32) -> DXGI_FORMAT {
    match components {
        1 => DXGI_FORMAT_R32_FLOAT,
        2 => DXGI_FORMAT_R32G32_FLOAT,
        3 => DXGI_FORMAT_R32G32B32_FLOAT,
        _ => DXGI_FORMAT_R32G32B32A32_FLOAT,
    }
}

pub fn topology_type(class: TopologyClass) -> D3D12_PRIMITIVE_TOPOLOGY_TYPE {
    match class {
        TopologyClass::Point => D3D12_PRIMITIVE_TOPOLOGY_TYPE_POINT,
        TopologyClass::Line => D3D12_PRIMITIVE_TOPOLOGY_TYPE_LINE,
        TopologyClass::Triangle => D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
    }
}

pub fn primitive_topology(mode: DrawMode) -> D3D_PRIMITIVE_TOPOLOGY {
    match mode {
        DrawMode::Points => D3D_PRIMITIVE_TOPOLOGY_POINTLIST,
        DrawMode::Lines => D3D_PRIMITIVE_TOPOLOGY_LINELIST,
        DrawMode::LineStrip => D3D_PRIMITIVE_TOPOLOGY_LINESTRIP,
        DrawMode::Triangles => D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
        DrawMode::TriangleStrip => D3D_PRIMITIVE_TOPOLOGY_TRIANGLESTRIP,
    }
}

fn blend_factor(factor: BlendFactor) -> D3D12_BLEND {
    match factor {
        BlendFactor::Zero => D3D12_BLEND_ZERO,
        BlendFactor::One => D3D12_BLEND_ONE,
        BlendFactor::SrcAlpha => D3D12_BLEND_SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => D3D12_BLEND_INV_SRC_ALPHA,
        BlendFactor::DstColor => D3D12_BLEND_DEST_COLOR,
        BlendFactor::DstAlpha => D3D12_BLEND_DEST_ALPHA,
    }
}

pub fn render_target_blend(mode: BlendMode) -> D3D12_RENDER_TARGET_BLEND_DESC {
    let write_all = D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8;
    match mode.factors() {
        Some(f) => D3D12_RENDER_TARGET_BLEND_DESC {
            BlendEnable: true.into(),
            LogicOpEnable: false.into(),
            SrcBlend: blend_factor(f.src_color),
            DestBlend: blend_factor(f.dst_color),
            BlendOp: D3D12_BLEND_OP_ADD,
            SrcBlendAlpha: blend_factor(f.src_alpha),
            DestBlendAlpha: blend_factor(f.dst_alpha),
            BlendOpAlpha: D3D12_BLEND_OP_ADD,
            LogicOp: D3D12_LOGIC_OP_NOOP,
            RenderTargetWriteMask: write_all,
        },
        None => D3D12_RENDER_TARGET_BLEND_DESC {
            BlendEnable: false.into(),
            LogicOpEnable: false.into(),
            SrcBlend: D3D12_BLEND_ONE,
            DestBlend: D3D12_BLEND_ZERO,
            BlendOp: D3D12_BLEND_OP_ADD,
            SrcBlendAlpha: D3D12_BLEND_ONE,
            DestBlendAlpha: D3D12_BLEND_ZERO,
            BlendOpAlpha: D3D12_BLEND_OP_ADD,
            LogicOp: D3D12_LOGIC_OP_NOOP,
            RenderTargetWriteMask: write_all,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blend_desc() {
        let alpha = render_target_blend(BlendMode::Alpha);
        assert!(alpha.BlendEnable.as_bool());
        assert_eq!(alpha.SrcBlend, D3D12_BLEND_SRC_ALPHA);
        assert_eq!(alpha.DestBlend, D3D12_BLEND_INV_SRC_ALPHA);
        assert!(!render_target_blend(BlendMode::None).BlendEnable.as_bool());
    }

    #[test]
    fn test_topology_tables() {
        assert_eq!(topology_type(DrawMode::LineStrip.topology_class()), D3D12_PRIMITIVE_TOPOLOGY_TYPE_LINE);
        assert_eq!(primitive_topology(DrawMode::TriangleStrip), D3D_PRIMITIVE_TOPOLOGY_TRIANGLESTRIP);
        assert_eq!(vertex_format(2), DXGI_FORMAT_R32G32_FLOAT);
    }
}
