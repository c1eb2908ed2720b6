//! OpenGL 纹理

use std::cell::Cell;
use std::rc::Rc;

use super::context::GlContext;
use crate::core::error::{GraphicsError, Result};
use crate::engine_warn;
use crate::renderer::handle::{HandleKind, Tracked};
use crate::renderer::texture::{prepare_pixels, Texture, TextureDescriptor, TextureFilter, TextureFormat, TextureWrap};

/// wgpu 纹理格式；RGBA32F 在 GL 上不可过滤，不支持
pub fn wgpu_format(format: TextureFormat) -> Option<wgpu::TextureFormat> {
    match format.storage_format() {
        TextureFormat::R8 => Some(wgpu::TextureFormat::R8Unorm),
        TextureFormat::RG8 => Some(wgpu::TextureFormat::Rg8Unorm),
        TextureFormat::RGB8 | TextureFormat::RGBA8 => Some(wgpu::TextureFormat::Rgba8Unorm),
        TextureFormat::R16F => Some(wgpu::TextureFormat::R16Float),
        TextureFormat::RGBA16F => Some(wgpu::TextureFormat::Rgba16Float),
        TextureFormat::RGBA32F => None,
    }
}

fn filter_mode(filter: TextureFilter) -> wgpu::FilterMode {
    match filter {
        TextureFilter::Nearest => wgpu::FilterMode::Nearest,
        TextureFilter::Linear => wgpu::FilterMode::Linear,
    }
}

fn address_mode(wrap: TextureWrap) -> wgpu::AddressMode {
    match wrap {
        TextureWrap::Repeat => wgpu::AddressMode::Repeat,
        TextureWrap::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        TextureWrap::MirroredRepeat => wgpu::AddressMode::MirrorRepeat,
    }
}

/// 一张 GPU 纹理和它的绑定组
pub struct GlImage {
    texture: wgpu::Texture,
    pub bind_group: Rc<wgpu::BindGroup>,
    width: u32,
    height: u32,
    pub last_used: Cell<u64>,
    _tracked: Tracked,
}

impl GlImage {
    fn new(ctx: &GlContext, descriptor: &TextureDescriptor, format: wgpu::TextureFormat, width: u32, height: u32) -> Self {
        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("chart_render texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = ctx.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("chart_render sampler"),
            address_mode_u: address_mode(descriptor.wrap_s),
            address_mode_v: address_mode(descriptor.wrap_t),
            mag_filter: filter_mode(descriptor.mag_filter),
            min_filter: filter_mode(descriptor.min_filter),
            ..Default::default()
        });
        let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("texture bind group"),
            layout: &ctx.texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
            ],
        });
        Self {
            texture,
            bind_group: Rc::new(bind_group),
            width,
            height,
            last_used: Cell::new(0),
            _tracked: Tracked::new(&ctx.ledger, HandleKind::Texture),
        }
    }

    fn write(&self, queue: &wgpu::Queue, bytes_per_pixel: usize, pixels: &[u8]) {
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(self.width * bytes_per_pixel as u32),
                rows_per_image: Some(self.height),
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
    }
}

/// OpenGL 纹理
pub struct OpenGlTexture {
    ctx: Rc<GlContext>,
    descriptor: TextureDescriptor,
    format: wgpu::TextureFormat,
    image: Option<Rc<GlImage>>,
}

impl OpenGlTexture {
    pub fn new(ctx: &Rc<GlContext>, descriptor: &TextureDescriptor) -> Result<Self> {
        let format = wgpu_format(descriptor.format).ok_or_else(|| {
            GraphicsError::ResourceCreation(format!("{:?} textures are not supported on OpenGL", descriptor.format))
        })?;
        if descriptor.width == 0 || descriptor.height == 0 || descriptor.width.max(descriptor.height) > ctx.max_texture_size {
            return Err(GraphicsError::ResourceCreation(format!(
                "texture size {}x{} outside 1..={}",
                descriptor.width, descriptor.height, ctx.max_texture_size
            ))
            .into());
        }
        let image = GlImage::new(ctx, descriptor, format, descriptor.width, descriptor.height);
        Ok(Self {
            ctx: ctx.clone(),
            descriptor: descriptor.clone(),
            format,
            image: Some(Rc::new(image)),
        })
    }

    fn is_bound(&self) -> bool {
        let bound = self.ctx.bindings.borrow().texture.upgrade();
        matches!((&self.image, bound), (Some(mine), Some(bound)) if Rc::ptr_eq(mine, &bound))
    }
}

impl Texture for OpenGlTexture {
    fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    fn upload(&mut self, width: u32, height: u32, bytes: &[u8]) {
        let Some(current) = &self.image else {
            engine_warn!("Upload to a disposed OpenGL texture ignored");
            return;
        };
        let Some(pixels) = prepare_pixels(self.descriptor.format, width, height, bytes) else {
            engine_warn!(width, height, len = bytes.len(), "Texture upload rejected: size mismatch");
            return;
        };
        let resized = current.width != width || current.height != height;
        let in_use = self.ctx.state.borrow().used_this_frame(current.last_used.get());
        if resized || in_use {
            let was_bound = self.is_bound();
            let image = Rc::new(GlImage::new(&self.ctx, &self.descriptor, self.format, width, height));
            if was_bound {
                self.ctx.bindings.borrow_mut().texture = Rc::downgrade(&image);
            }
            self.image = Some(image);
        }
        self.descriptor.width = width;
        self.descriptor.height = height;
        if let Some(image) = &self.image {
            image.write(&self.ctx.queue, self.descriptor.format.storage_format().bytes_per_pixel(), &pixels);
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
        self.unbind();
        self.image = None;
    }

    fn is_initialized(&self) -> bool {
        self.image.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_mapping() {
        assert_eq!(wgpu_format(TextureFormat::R8), Some(wgpu::TextureFormat::R8Unorm));
        assert_eq!(wgpu_format(TextureFormat::RGB8), Some(wgpu::TextureFormat::Rgba8Unorm));
        assert_eq!(wgpu_format(TextureFormat::RGBA32F), None);
    }

    #[test]
    fn test_sampler_modes() {
        assert_eq!(address_mode(TextureWrap::MirroredRepeat), wgpu::AddressMode::MirrorRepeat);
        assert_eq!(filter_mode(TextureFilter::Linear), wgpu::FilterMode::Linear);
    }
}
