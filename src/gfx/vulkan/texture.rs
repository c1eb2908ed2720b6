//! Vulkan 纹理
//!
//! 每个纹理拥有图像、视图、采样器和一个描述符集。上传通过暂存缓冲区
//! 和一次性命令完成；本帧已被绘制引用的图像换新再上传。

use std::cell::Cell;
use std::rc::Rc;

use ash::vk;

use super::context::{color_range, resource_error, VkContext};
use crate::core::error::{GraphicsError, Result};
use crate::renderer::handle::{HandleKind, Tracked};
use crate::renderer::texture::{prepare_pixels, Texture, TextureDescriptor, TextureFilter, TextureFormat, TextureWrap};
use crate::{engine_error, engine_warn};

pub fn vk_format(format: TextureFormat) -> vk::Format {
    match format.storage_format() {
        TextureFormat::R8 => vk::Format::R8_UNORM,
        TextureFormat::RG8 => vk::Format::R8G8_UNORM,
        TextureFormat::R16F => vk::Format::R16_SFLOAT,
        TextureFormat::RGBA16F => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::RGBA32F => vk::Format::R32G32B32A32_SFLOAT,
        TextureFormat::RGB8 | TextureFormat::RGBA8 => vk::Format::R8G8B8A8_UNORM,
    }
}

fn filter(filter: TextureFilter) -> vk::Filter {
    match filter {
        TextureFilter::Nearest => vk::Filter::NEAREST,
        TextureFilter::Linear => vk::Filter::LINEAR,
    }
}

fn address_mode(wrap: TextureWrap) -> vk::SamplerAddressMode {
    match wrap {
        TextureWrap::Repeat => vk::SamplerAddressMode::REPEAT,
        TextureWrap::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        TextureWrap::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
    }
}

/// 一张 GPU 图像及其采样对象
pub struct VkImage {
    ctx: Rc<VkContext>,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    sampler: vk::Sampler,
    pub set: vk::DescriptorSet,
    pub width: u32,
    pub height: u32,
    pub last_used: Cell<u64>,
    tracked: Option<Tracked>,
}

impl VkImage {
    fn new(ctx: &Rc<VkContext>, descriptor: &TextureDescriptor, width: u32, height: u32) -> Result<Self> {
        let format = vk_format(descriptor.format);
        let (image, memory) = ctx.create_image(
            width,
            height,
            format,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
        )?;
        // 先构造出对象，后续失败时由 Drop 清理已创建的部分
        let mut created = Self {
            ctx: ctx.clone(),
            image,
            memory,
            view: vk::ImageView::null(),
            sampler: vk::Sampler::null(),
            set: vk::DescriptorSet::null(),
            width,
            height,
            last_used: Cell::new(0),
            tracked: Some(Tracked::new(&ctx.ledger, HandleKind::Texture)),
        };
        created.view = ctx.create_view(image, format)?;

        let linear = ctx.supports_linear_filter(format);
        let pick = |f: TextureFilter| if linear { filter(f) } else { vk::Filter::NEAREST };
        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(pick(descriptor.mag_filter))
            .min_filter(pick(descriptor.min_filter))
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(address_mode(descriptor.wrap_s))
            .address_mode_v(address_mode(descriptor.wrap_t))
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .max_lod(0.0);
        created.sampler = unsafe { ctx.device.create_sampler(&sampler_info, None) }
            .map_err(resource_error("vkCreateSampler"))?;

        let layouts = [ctx.descriptor_layout()];
        let alloc = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(ctx.descriptor_pool())
            .set_layouts(&layouts);
        created.set = unsafe { ctx.device.allocate_descriptor_sets(&alloc) }
            .map_err(resource_error("vkAllocateDescriptorSets"))?[0];

        let image_infos = [vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: created.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];
        let sampler_infos = [vk::DescriptorImageInfo {
            sampler: created.sampler,
            image_view: vk::ImageView::null(),
            image_layout: vk::ImageLayout::UNDEFINED,
        }];
        let writes = [
            vk::WriteDescriptorSet::builder()
                .dst_set(created.set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                .image_info(&image_infos)
                .build(),
            vk::WriteDescriptorSet::builder()
                .dst_set(created.set)
                .dst_binding(1)
                .descriptor_type(vk::DescriptorType::SAMPLER)
                .image_info(&sampler_infos)
                .build(),
        ];
        unsafe { ctx.device.update_descriptor_sets(&writes, &[]) };
        Ok(created)
    }

    /// 经暂存缓冲区写入整张图像，结束时处于 SHADER_READ_ONLY
    fn write(&self, bytes: &[u8]) -> Result<()> {
        let staging = self.ctx.create_host_buffer(bytes.len(), vk::BufferUsageFlags::TRANSFER_SRC)?;
        staging.write(0, bytes);
        let (image, width, height, buffer) = (self.image, self.width, self.height, staging.buffer);
        let result = self.ctx.submit_once(|device, cmd| unsafe {
            let to_transfer = vk::ImageMemoryBarrier::builder()
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(color_range())
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .build();
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer],
            );

            let region = vk::BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D::default(),
                image_extent: vk::Extent3D { width, height, depth: 1 },
            };
            device.cmd_copy_buffer_to_image(cmd, buffer, image, vk::ImageLayout::TRANSFER_DST_OPTIMAL, &[region]);

            let to_shader = vk::ImageMemoryBarrier::builder()
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(color_range())
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ)
                .build();
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_shader],
            );
        });
        // submit_once 已等待队列空闲
        staging.destroy(&self.ctx.device);
        result
    }
}

impl Drop for VkImage {
    fn drop(&mut self) {
        let pool = self.ctx.descriptor_pool();
        let (image, memory, view, sampler, set) = (self.image, self.memory, self.view, self.sampler, self.set);
        let tracked = self.tracked.take();
        self.ctx.retire(move |device| {
            unsafe {
                if set != vk::DescriptorSet::null() {
                    let _ = device.free_descriptor_sets(pool, &[set]);
                }
                device.destroy_sampler(sampler, None);
                device.destroy_image_view(view, None);
                device.destroy_image(image, None);
                device.free_memory(memory, None);
            }
            drop(tracked);
        });
    }
}

/// Vulkan 纹理
pub struct VulkanTexture {
    ctx: Rc<VkContext>,
    descriptor: TextureDescriptor,
    image: Option<Rc<VkImage>>,
    disposed: bool,
}

impl VulkanTexture {
    /// 创建纹理并用零填充，保证未上传前采样结果确定
    pub fn new(ctx: &Rc<VkContext>, descriptor: &TextureDescriptor) -> Result<Self> {
        if descriptor.width == 0 || descriptor.height == 0 || descriptor.width.max(descriptor.height) > ctx.max_texture_size {
            return Err(GraphicsError::ResourceCreation(format!(
                "texture size {}x{} outside 1..={}",
                descriptor.width, descriptor.height, ctx.max_texture_size
            ))
            .into());
        }
        let image = VkImage::new(ctx, descriptor, descriptor.width, descriptor.height)?;
        let zeros = vec![0u8; descriptor.format.storage_format().bytes_per_pixel() * (image.width * image.height) as usize];
        image.write(&zeros)?;
        Ok(Self {
            ctx: ctx.clone(),
            descriptor: descriptor.clone(),
            image: Some(Rc::new(image)),
            disposed: false,
        })
    }

    fn is_bound(&self) -> bool {
        let bound = self.ctx.bindings.borrow().texture.upgrade();
        match (&self.image, bound) {
            (Some(mine), Some(bound)) => Rc::ptr_eq(mine, &bound),
            _ => false,
        }
    }

    fn replace_image(&mut self, width: u32, height: u32) -> Result<()> {
        let was_bound = self.is_bound();
        let image = Rc::new(VkImage::new(&self.ctx, &self.descriptor, width, height)?);
        if was_bound {
            self.ctx.bindings.borrow_mut().texture = Rc::downgrade(&image);
        }
        // 旧图像随 Rc 释放进入退役队列
        self.image = Some(image);
        Ok(())
    }
}

impl Texture for VulkanTexture {
    fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    fn upload(&mut self, width: u32, height: u32, bytes: &[u8]) {
        if self.disposed {
            engine_warn!("Upload to a disposed Vulkan texture ignored");
            return;
        }
        let Some(pixels) = prepare_pixels(self.descriptor.format, width, height, bytes) else {
            engine_warn!(width, height, len = bytes.len(), "Texture upload rejected: size mismatch");
            return;
        };
        let resized = self.image.as_ref().map_or(true, |img| img.width != width || img.height != height);
        let in_use = self.image.as_ref().is_some_and(|img| {
            self.ctx.state.borrow().used_this_frame(img.last_used.get())
        });
        if resized || in_use {
            if let Err(e) = self.replace_image(width, height) {
                engine_error!("Texture reallocation failed: {}", e);
                return;
            }
        }
        self.descriptor.width = width;
        self.descriptor.height = height;
        if let Some(image) = &self.image {
            if let Err(e) = image.write(&pixels) {
                engine_error!("Texture upload failed: {}", e);
            }
        }
    }

    fn bind(&mut self, unit: u32) {
        if unit != 0 {
            engine_warn!(unit, "Only texture unit 0 is supported");
            return;
        }
        if let Some(image) = &self.image {
            self.ctx.bindings.borrow_mut().texture = Rc::downgrade(image);
        }
    }

    fn unbind(&mut self) {
        if self.is_bound() {
            self.ctx.bindings.borrow_mut().texture = Default::default();
        }
    }

    fn dispose(&mut self) {
        if !self.disposed {
            self.unbind();
            self.disposed = true;
            self.image = None;
        }
    }

    fn is_initialized(&self) -> bool {
        !self.disposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formats() {
        assert_eq!(vk_format(TextureFormat::R8), vk::Format::R8_UNORM);
        assert_eq!(vk_format(TextureFormat::RGB8), vk::Format::R8G8B8A8_UNORM);
        assert_eq!(vk_format(TextureFormat::RGBA32F), vk::Format::R32G32B32A32_SFLOAT);
    }

    #[test]
    fn test_sampler_modes() {
        assert_eq!(filter(TextureFilter::Nearest), vk::Filter::NEAREST);
        assert_eq!(address_mode(TextureWrap::MirroredRepeat), vk::SamplerAddressMode::MIRRORED_REPEAT);
    }
}
