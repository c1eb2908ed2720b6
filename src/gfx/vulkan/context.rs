//! Vulkan 上下文
//!
//! 设备、资源工厂和所有资源共享的原生状态：实例、逻辑设备、队列、
//! 共享的渲染通道 / 管线布局 / 描述符池、管线缓存、绘制状态和退役队列。
//!
//! # 初始化流程
//!
//! 1. 取得已探测的 loader，创建实例（可选验证层）
//! 2. 选择物理设备和图形队列族
//! 3. 创建逻辑设备和队列（支持时启用 `wideLines`）
//! 4. 创建共享对象：渲染通道、描述符布局、管线布局、描述符池、上传命令池
//!
//! 上下文由 `Rc` 共享，最后一个持有者释放时销毁逻辑设备和实例。

use std::cell::{Cell, RefCell};
use std::ffi::CStr;
use std::rc::Weak;

use ash::vk;
use tracing::{debug, info, warn};

use super::loader;
use super::pipeline;
use super::shader::VkProgram;
use super::texture::VkImage;
use crate::core::config::RenderConfig;
use crate::core::error::{ChartRenderError, GraphicsError, Result};
use crate::renderer::backend::{BlendMode, DrawMode};
use crate::renderer::buffer::BufferDescriptor;
use crate::renderer::handle::{HandleKind, HandleLedger, Tracked};
use crate::renderer::pipeline::{LayoutKey, PipelineCache, PipelineKey, TopologyKey};
use crate::renderer::shader::UniformBlock;
use crate::renderer::state::DrawState;
use crate::renderer::sync::{FenceManager, FenceValue, RetireQueue};

/// 离屏颜色目标格式
pub const TARGET_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// 描述符池能容纳的纹理数
const MAX_TEXTURE_SETS: u32 = 512;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// 退役的原生对象，拿到设备后销毁
pub type Retired = Box<dyn FnOnce(&ash::Device)>;

pub fn device_error(op: &'static str) -> impl Fn(vk::Result) -> ChartRenderError {
    move |e| GraphicsError::DeviceCreation(format!("{} failed: {}", op, e)).into()
}

pub fn resource_error(op: &'static str) -> impl Fn(vk::Result) -> ChartRenderError {
    move |e| GraphicsError::ResourceCreation(format!("{} failed: {}", op, e)).into()
}

pub fn command_error(op: &'static str) -> impl Fn(vk::Result) -> ChartRenderError {
    move |e| GraphicsError::CommandExecution(format!("{} failed: {}", op, e)).into()
}

/// 录制状态和当前绑定
///
/// 程序和纹理只保存弱引用：资源释放后绑定自动失效，后续绘制被跳过。
#[derive(Default)]
pub struct Bindings {
    /// 帧内正在录制的命令缓冲区
    pub cmd: Option<vk::CommandBuffer>,
    pub program: Weak<VkProgram>,
    pub texture: Weak<VkImage>,
}

/// 常驻映射的主机可见缓冲区
pub struct HostBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    mapped: *mut u8,
    pub size: usize,
}

impl HostBuffer {
    fn empty() -> Self {
        Self {
            buffer: vk::Buffer::null(),
            memory: vk::DeviceMemory::null(),
            mapped: std::ptr::null_mut(),
            size: 0,
        }
    }

    /// 写入映射内存
    pub fn write(&self, offset: usize, bytes: &[u8]) {
        let len = bytes.len().min(self.size.saturating_sub(offset));
        if len == 0 || self.mapped.is_null() {
            return;
        }
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.mapped.add(offset), len) };
    }

    /// 映射内存的只读视图
    pub fn bytes(&self) -> &[u8] {
        if self.mapped.is_null() {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.mapped, self.size) }
    }

    /// 空句柄也可以安全销毁；释放内存时隐式取消映射
    pub fn destroy(self, device: &ash::Device) {
        unsafe {
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
    }
}

/// 缓存的管线
pub struct VkPipeline {
    pub raw: vk::Pipeline,
    _tracked: Tracked,
}

impl VkPipeline {
    pub fn destroy(self, device: &ash::Device) {
        unsafe { device.destroy_pipeline(self.raw, None) };
    }
}

/// 与帧尺寸无关的共享对象
#[derive(Default)]
struct SharedObjects {
    render_pass: vk::RenderPass,
    descriptor_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    descriptor_pool: vk::DescriptorPool,
    upload_pool: vk::CommandPool,
}

impl SharedObjects {
    fn create(device: &ash::Device, queue_family: u32) -> Result<Self> {
        let mut objects = SharedObjects::default();
        match objects.fill(device, queue_family) {
            Ok(()) => Ok(objects),
            Err(e) => {
                objects.destroy(device);
                Err(e)
            }
        }
    }

    fn fill(&mut self, device: &ash::Device, queue_family: u32) -> Result<()> {
        // 渲染通道：开始时清除，结束后留在 TRANSFER_SRC 供回读复制
        let attachments = [vk::AttachmentDescription::builder()
            .format(TARGET_FORMAT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .build()];
        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let subpasses = [vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .build()];
        let dependencies = [
            vk::SubpassDependency {
                src_subpass: vk::SUBPASS_EXTERNAL,
                dst_subpass: 0,
                src_stage_mask: vk::PipelineStageFlags::TRANSFER,
                dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                src_access_mask: vk::AccessFlags::TRANSFER_READ,
                dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::COLOR_ATTACHMENT_READ,
                dependency_flags: vk::DependencyFlags::empty(),
            },
            vk::SubpassDependency {
                src_subpass: 0,
                dst_subpass: vk::SUBPASS_EXTERNAL,
                src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                dst_stage_mask: vk::PipelineStageFlags::TRANSFER,
                src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                dst_access_mask: vk::AccessFlags::TRANSFER_READ,
                dependency_flags: vk::DependencyFlags::empty(),
            },
        ];
        let render_pass_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        self.render_pass = unsafe { device.create_render_pass(&render_pass_info, None) }
            .map_err(device_error("vkCreateRenderPass"))?;

        // set 0：binding 0 纹理，binding 1 采样器
        let bindings = [
            vk::DescriptorSetLayoutBinding::builder()
                .binding(0)
                .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(1)
                .descriptor_type(vk::DescriptorType::SAMPLER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                .build(),
        ];
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        self.descriptor_layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }
            .map_err(device_error("vkCreateDescriptorSetLayout"))?;

        // uniform 块整体作为 push constant
        let push_ranges = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: UniformBlock::SIZE as u32,
        }];
        let set_layouts = [self.descriptor_layout];
        let pipeline_layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_ranges);
        self.pipeline_layout = unsafe { device.create_pipeline_layout(&pipeline_layout_info, None) }
            .map_err(device_error("vkCreatePipelineLayout"))?;

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLED_IMAGE,
                descriptor_count: MAX_TEXTURE_SETS,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLER,
                descriptor_count: MAX_TEXTURE_SETS,
            },
        ];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(MAX_TEXTURE_SETS)
            .pool_sizes(&pool_sizes);
        self.descriptor_pool = unsafe { device.create_descriptor_pool(&pool_info, None) }
            .map_err(device_error("vkCreateDescriptorPool"))?;

        let command_pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        self.upload_pool = unsafe { device.create_command_pool(&command_pool_info, None) }
            .map_err(device_error("vkCreateCommandPool"))?;
        Ok(())
    }

    fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_command_pool(self.upload_pool, None);
            device.destroy_descriptor_pool(self.descriptor_pool, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            device.destroy_descriptor_set_layout(self.descriptor_layout, None);
            device.destroy_render_pass(self.render_pass, None);
        }
    }
}

/// Vulkan 共享上下文
pub struct VkContext {
    _entry: ash::Entry,
    pub instance: ash::Instance,
    pub physical: vk::PhysicalDevice,
    pub device: ash::Device,
    pub queue: vk::Queue,
    pub queue_family: u32,
    memory: vk::PhysicalDeviceMemoryProperties,
    pub renderer_info: String,
    pub max_texture_size: u32,
    pub max_line_width: f32,
    pub ledger: HandleLedger,
    shared: SharedObjects,
    pub state: RefCell<DrawState>,
    pub bindings: RefCell<Bindings>,
    pipelines: RefCell<PipelineCache<VkPipeline>>,
    pub fences: FenceManager,
    retired: RefCell<RetireQueue<Retired>>,
    next_program_id: Cell<u64>,
    _tracked: Vec<Tracked>,
}

impl VkContext {
    /// 创建上下文
    ///
    /// # 参数
    ///
    /// * `config` - 初始帧尺寸、清屏颜色和验证层开关
    /// * `ledger` - 设备的句柄账本
    pub fn new(config: &RenderConfig, ledger: HandleLedger) -> Result<Self> {
        info!("Initializing Vulkan context");

        // 1. 实例
        let entry = loader::entry()?;
        let layers = if config.validation { validation_layers(&entry) } else { Vec::new() };
        let instance = loader::create_instance(&entry, &layers).map_err(GraphicsError::DeviceCreation)?;
        debug!("Vulkan instance created ({} layers)", layers.len());

        // 2-3. 物理设备、逻辑设备和队列
        let created = unsafe { create_logical_device(&instance) };
        let (physical, queue_family, device, wide_lines) = match created {
            Ok(v) => v,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };

        // 4. 共享对象
        let shared = match SharedObjects::create(&device, queue_family) {
            Ok(shared) => shared,
            Err(e) => {
                unsafe {
                    device.destroy_device(None);
                    instance.destroy_instance(None);
                }
                return Err(e);
            }
        };

        let queue = unsafe { device.get_device_queue(queue_family, 0) };
        let properties = unsafe { instance.get_physical_device_properties(physical) };
        let memory = unsafe { instance.get_physical_device_memory_properties(physical) };
        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy().into_owned();
        let renderer_info = format!(
            "{} (Vulkan {}.{}.{})",
            device_name,
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        let max_line_width = if wide_lines { properties.limits.line_width_range[1].max(1.0) } else { 1.0 };
        info!(
            device_name = device_name.as_str(),
            device_type = ?properties.device_type,
            queue_family,
            max_line_width,
            "Using device"
        );

        let mut state = DrawState::new(config.width, config.height, config.clear_color);
        state.max_line_width = max_line_width;

        let tracked = vec![
            Tracked::new(&ledger, HandleKind::Device),
            Tracked::new(&ledger, HandleKind::Queue),
            Tracked::new(&ledger, HandleKind::CommandPool),
            Tracked::new(&ledger, HandleKind::DescriptorHeap),
        ];

        Ok(Self {
            _entry: entry,
            instance,
            physical,
            device,
            queue,
            queue_family,
            memory,
            renderer_info,
            max_texture_size: properties.limits.max_image_dimension2_d,
            max_line_width,
            ledger,
            shared,
            state: RefCell::new(state),
            bindings: RefCell::new(Bindings::default()),
            pipelines: RefCell::new(PipelineCache::new()),
            fences: FenceManager::new(),
            retired: RefCell::new(RetireQueue::new()),
            next_program_id: Cell::new(1),
            _tracked: tracked,
        })
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.shared.render_pass
    }

    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.shared.pipeline_layout
    }

    pub fn descriptor_layout(&self) -> vk::DescriptorSetLayout {
        self.shared.descriptor_layout
    }

    pub fn descriptor_pool(&self) -> vk::DescriptorPool {
        self.shared.descriptor_pool
    }

    pub fn next_program_id(&self) -> u64 {
        let id = self.next_program_id.get();
        self.next_program_id.set(id + 1);
        id
    }

    pub fn find_memory_type(&self, type_bits: u32, flags: vk::MemoryPropertyFlags) -> Result<u32> {
        (0..self.memory.memory_type_count)
            .find(|&i| {
                type_bits & (1 << i) != 0 && self.memory.memory_types[i as usize].property_flags.contains(flags)
            })
            .ok_or_else(|| GraphicsError::ResourceCreation(format!("no memory type with {:?}", flags)).into())
    }

    /// 分配常驻映射的主机可见缓冲区
    pub fn create_host_buffer(&self, size: usize, usage: vk::BufferUsageFlags) -> Result<HostBuffer> {
        let mut host = HostBuffer::empty();
        match self.fill_host_buffer(&mut host, size.max(4), usage) {
            Ok(()) => Ok(host),
            Err(e) => {
                host.destroy(&self.device);
                Err(e)
            }
        }
    }

    fn fill_host_buffer(&self, host: &mut HostBuffer, size: usize, usage: vk::BufferUsageFlags) -> Result<()> {
        let info = vk::BufferCreateInfo::builder()
            .size(size as u64)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        unsafe {
            host.buffer = self.device.create_buffer(&info, None).map_err(resource_error("vkCreateBuffer"))?;
            let requirements = self.device.get_buffer_memory_requirements(host.buffer);
            let memory_type = self.find_memory_type(
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )?;
            let alloc = vk::MemoryAllocateInfo::builder()
                .allocation_size(requirements.size)
                .memory_type_index(memory_type);
            host.memory = self.device.allocate_memory(&alloc, None).map_err(resource_error("vkAllocateMemory"))?;
            self.device
                .bind_buffer_memory(host.buffer, host.memory, 0)
                .map_err(resource_error("vkBindBufferMemory"))?;
            let mapped = self
                .device
                .map_memory(host.memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                .map_err(resource_error("vkMapMemory"))?;
            host.mapped = mapped as *mut u8;
        }
        host.size = size;
        Ok(())
    }

    /// 分配设备本地的 2D 图像
    pub fn create_image(
        &self,
        width: u32,
        height: u32,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Result<(vk::Image, vk::DeviceMemory)> {
        let info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D { width, height, depth: 1 })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        unsafe {
            let image = self.device.create_image(&info, None).map_err(resource_error("vkCreateImage"))?;
            let requirements = self.device.get_image_memory_requirements(image);
            let memory = self
                .find_memory_type(requirements.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)
                .and_then(|memory_type| {
                    let alloc = vk::MemoryAllocateInfo::builder()
                        .allocation_size(requirements.size)
                        .memory_type_index(memory_type);
                    self.device.allocate_memory(&alloc, None).map_err(resource_error("vkAllocateMemory"))
                });
            let memory = match memory {
                Ok(memory) => memory,
                Err(e) => {
                    self.device.destroy_image(image, None);
                    return Err(e);
                }
            };
            if let Err(e) = self.device.bind_image_memory(image, memory, 0) {
                self.device.destroy_image(image, None);
                self.device.free_memory(memory, None);
                return Err(resource_error("vkBindImageMemory")(e));
            }
            Ok((image, memory))
        }
    }

    pub fn create_view(&self, image: vk::Image, format: vk::Format) -> Result<vk::ImageView> {
        let info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(color_range());
        unsafe { self.device.create_image_view(&info, None) }.map_err(resource_error("vkCreateImageView"))
    }

    /// 格式是否支持线性过滤采样
    pub fn supports_linear_filter(&self, format: vk::Format) -> bool {
        let props = unsafe { self.instance.get_physical_device_format_properties(self.physical, format) };
        props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
    }

    /// 录制并立即提交一次性命令，阻塞到队列空闲
    ///
    /// 用于纹理上传。提交发生在当前帧的命令缓冲区之前，
    /// 所以帧内已经引用的图像不能在这里修改（由重命名保证）。
    pub fn submit_once(&self, record: impl FnOnce(&ash::Device, vk::CommandBuffer)) -> Result<()> {
        let alloc = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.shared.upload_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        unsafe {
            let cmds = self
                .device
                .allocate_command_buffers(&alloc)
                .map_err(command_error("vkAllocateCommandBuffers"))?;
            let result = self.record_and_wait(cmds[0], record);
            self.device.free_command_buffers(self.shared.upload_pool, &cmds);
            result
        }
    }

    unsafe fn record_and_wait(
        &self,
        cmd: vk::CommandBuffer,
        record: impl FnOnce(&ash::Device, vk::CommandBuffer),
    ) -> Result<()> {
        let begin = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        self.device
            .begin_command_buffer(cmd, &begin)
            .map_err(command_error("vkBeginCommandBuffer"))?;
        record(&self.device, cmd);
        self.device.end_command_buffer(cmd).map_err(command_error("vkEndCommandBuffer"))?;
        let cmds = [cmd];
        let submit = [vk::SubmitInfo::builder().command_buffers(&cmds).build()];
        self.device
            .queue_submit(self.queue, &submit, vk::Fence::null())
            .map_err(command_error("vkQueueSubmit"))?;
        self.device.queue_wait_idle(self.queue).map_err(command_error("vkQueueWaitIdle"))
    }

    /// 退役原生对象
    ///
    /// 帧内退役的对象可能被已录制的命令引用，等本帧 Fence 完成后销毁；
    /// 帧外 GPU 已空闲（同步模型），立即销毁。
    pub fn retire(&self, destroy: impl FnOnce(&ash::Device) + 'static) {
        let in_frame = self.state.try_borrow().map(|s| s.in_frame).unwrap_or(true);
        if in_frame {
            let until = self.fences.current_value().next();
            self.retired.borrow_mut().retire(until, Box::new(destroy));
        } else {
            destroy(&self.device);
        }
    }

    /// 销毁在 `completed` 之前退役的对象
    pub fn collect_retired(&self, completed: FenceValue) {
        let ready = self.retired.borrow_mut().collect(completed);
        if !ready.is_empty() {
            debug!("Releasing {} retired Vulkan objects", ready.len());
        }
        for destroy in ready {
            destroy(&self.device);
        }
    }

    /// 等待空闲后销毁全部退役对象
    pub fn drain_retired(&self) {
        self.wait_idle();
        let all = self.retired.borrow_mut().drain_all();
        for destroy in all {
            destroy(&self.device);
        }
    }

    pub fn wait_idle(&self) {
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            warn!("vkDeviceWaitIdle failed: {}", e);
        }
    }

    /// 取得（必要时创建）管线
    pub fn pipeline(
        &self,
        program: &VkProgram,
        layout: &BufferDescriptor,
        mode: DrawMode,
        blend: BlendMode,
    ) -> Result<vk::Pipeline> {
        let key = PipelineKey {
            shader_id: program.id,
            layout: LayoutKey::from(layout),
            topology: TopologyKey::Mode(mode),
            blend,
        };
        let mut cache = self.pipelines.borrow_mut();
        let entry = cache.get_or_try_insert(key, |_| {
            let raw = pipeline::build(self, program, layout, mode, blend)?;
            debug!(shader = program.id, ?mode, ?blend, "Created Vulkan pipeline");
            Ok::<_, ChartRenderError>(VkPipeline {
                raw,
                _tracked: Tracked::new(&self.ledger, HandleKind::Pipeline),
            })
        })?;
        Ok(entry.raw)
    }

    /// 着色器释放时移除它的全部管线
    pub fn remove_program_pipelines(&self, program_id: u64) {
        let removed = self.pipelines.borrow_mut().remove_shader(program_id);
        for pipeline in removed {
            self.retire(move |device| pipeline.destroy(device));
        }
    }

    /// 等待空闲后销毁全部缓存的管线
    pub fn clear_pipelines(&self) {
        self.wait_idle();
        let removed = self.pipelines.borrow_mut().clear();
        if !removed.is_empty() {
            debug!("Destroying {} cached Vulkan pipelines", removed.len());
        }
        for pipeline in removed {
            self.retire(move |device| pipeline.destroy(device));
        }
    }
}

impl Drop for VkContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
        }
        for destroy in self.retired.get_mut().drain_all() {
            destroy(&self.device);
        }
        for pipeline in self.pipelines.get_mut().clear() {
            pipeline.destroy(&self.device);
        }
        self.shared.destroy(&self.device);
        unsafe {
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
        debug!("Vulkan context destroyed");
    }
}

/// 单层单 mip 的颜色子资源范围
pub fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn validation_layers(entry: &ash::Entry) -> Vec<&'static CStr> {
    let available = unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
    let found = available
        .iter()
        .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER);
    if found {
        vec![VALIDATION_LAYER]
    } else {
        warn!("Validation requested but {:?} is not installed", VALIDATION_LAYER);
        Vec::new()
    }
}

unsafe fn create_logical_device(instance: &ash::Instance) -> Result<(vk::PhysicalDevice, u32, ash::Device, bool)> {
    let (physical, queue_family) = loader::pick_physical_device(instance).map_err(GraphicsError::DeviceCreation)?;

    let supported = instance.get_physical_device_features(physical);
    let wide_lines = supported.wide_lines == vk::TRUE;
    let features = vk::PhysicalDeviceFeatures::builder().wide_lines(wide_lines);

    // MoltenVK 要求启用 portability 子集
    let portability = c"VK_KHR_portability_subset";
    let extensions: Vec<*const std::os::raw::c_char> = instance
        .enumerate_device_extension_properties(physical)
        .unwrap_or_default()
        .iter()
        .filter(|ext| CStr::from_ptr(ext.extension_name.as_ptr()) == portability)
        .map(|_| portability.as_ptr())
        .collect();

    let priorities = [1.0f32];
    let queue_infos = [vk::DeviceQueueCreateInfo::builder()
        .queue_family_index(queue_family)
        .queue_priorities(&priorities)
        .build()];
    let info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extensions)
        .enabled_features(&features);
    let device = instance
        .create_device(physical, &info, None)
        .map_err(device_error("vkCreateDevice"))?;
    debug!("Vulkan logical device created");
    Ok((physical, queue_family, device, wide_lines))
}
