//! Metal 纹理

use std::cell::Cell;
use std::rc::Rc;

use metal::{
    MTLPixelFormat, MTLRegion, MTLSamplerAddressMode, MTLSamplerMinMagFilter, MTLStorageMode, MTLTextureUsage,
    SamplerDescriptor, SamplerState, TextureDescriptor as MtlTextureDescriptor,
};

use super::context::{MtlContext, MAX_TEXTURE_SIZE};
use crate::core::error::{GraphicsError, Result};
use crate::engine_warn;
use crate::renderer::handle::{HandleKind, Tracked};
use crate::renderer::texture::{prepare_pixels, Texture, TextureDescriptor, TextureFilter, TextureFormat, TextureWrap};

pub fn pixel_format(format: TextureFormat) -> MTLPixelFormat {
    match format.storage_format() {
        TextureFormat::R8 => MTLPixelFormat::R8Unorm,
        TextureFormat::RG8 => MTLPixelFormat::RG8Unorm,
        TextureFormat::RGB8 | TextureFormat::RGBA8 => MTLPixelFormat::RGBA8Unorm,
        TextureFormat::R16F => MTLPixelFormat::R16Float,
        TextureFormat::RGBA16F => MTLPixelFormat::RGBA16Float,
        TextureFormat::RGBA32F => MTLPixelFormat::RGBA32Float,
    }
}

fn filter(filter: TextureFilter) -> MTLSamplerMinMagFilter {
    match filter {
        TextureFilter::Nearest => MTLSamplerMinMagFilter::Nearest,
        TextureFilter::Linear => MTLSamplerMinMagFilter::Linear,
    }
}

fn address_mode(wrap: TextureWrap) -> MTLSamplerAddressMode {
    match wrap {
        TextureWrap::Repeat => MTLSamplerAddressMode::Repeat,
        TextureWrap::ClampToEdge => MTLSamplerAddressMode::ClampToEdge,
        TextureWrap::MirroredRepeat => MTLSamplerAddressMode::MirrorRepeat,
    }
}

/// 一张 GPU 纹理和它的采样器
pub struct MtlImage {
    pub texture: metal::Texture,
    pub sampler: SamplerState,
    width: u32,
    height: u32,
    pub last_used: Cell<u64>,
    _tracked: Tracked,
}

impl MtlImage {
    fn new(ctx: &MtlContext, descriptor: &TextureDescriptor, width: u32, height: u32) -> Self {
        let texture_desc = MtlTextureDescriptor::new();
        texture_desc.set_pixel_format(pixel_format(descriptor.format));
        texture_desc.set_width(width as u64);
        texture_desc.set_height(height as u64);
        texture_desc.set_usage(MTLTextureUsage::ShaderRead);
        texture_desc.set_storage_mode(MTLStorageMode::Managed);
        let texture = ctx.device.new_texture(&texture_desc);

        let sampler_desc = SamplerDescriptor::new();
        sampler_desc.set_min_filter(filter(descriptor.min_filter));
        sampler_desc.set_mag_filter(filter(descriptor.mag_filter));
        sampler_desc.set_address_mode_s(address_mode(descriptor.wrap_s));
        sampler_desc.set_address_mode_t(address_mode(descriptor.wrap_t));
        let sampler = ctx.device.new_sampler(&sampler_desc);

        Self {
            texture,
            sampler,
            width,
            height,
            last_used: Cell::new(0),
            _tracked: Tracked::new(&ctx.ledger, HandleKind::Texture),
        }
    }

    fn write(&self, bytes_per_pixel: usize, pixels: &[u8]) {
        let region = MTLRegion::new_2d(0, 0, self.width as u64, self.height as u64);
        self.texture.replace_region(
            region,
            0,
            pixels.as_ptr() as *const _,
            (self.width as usize * bytes_per_pixel) as u64,
        );
    }
}

/// Metal 纹理
pub struct MetalTexture {
    ctx: Rc<MtlContext>,
    descriptor: TextureDescriptor,
    image: Option<Rc<MtlImage>>,
}

impl MetalTexture {
    pub fn new(ctx: &Rc<MtlContext>, descriptor: &TextureDescriptor) -> Result<Self> {
        if descriptor.width == 0 || descriptor.height == 0 || descriptor.width.max(descriptor.height) > MAX_TEXTURE_SIZE {
            return Err(GraphicsError::ResourceCreation(format!(
                "texture size {}x{} outside 1..={}",
                descriptor.width, descriptor.height, MAX_TEXTURE_SIZE
            ))
            .into());
        }
        let image = MtlImage::new(ctx, descriptor, descriptor.width, descriptor.height);
        // 新纹理内容未定义，先清零
        let bpp = descriptor.format.storage_format().bytes_per_pixel();
        image.write(bpp, &vec![0u8; descriptor.width as usize * descriptor.height as usize * bpp]);
        Ok(Self {
            ctx: ctx.clone(),
            descriptor: descriptor.clone(),
            image: Some(Rc::new(image)),
        })
    }

    fn is_bound(&self) -> bool {
        let bound = self.ctx.bindings.borrow().texture.upgrade();
        matches!((&self.image, bound), (Some(mine), Some(bound)) if Rc::ptr_eq(mine, &bound))
    }
}

impl Texture for MetalTexture {
    fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    fn upload(&mut self, width: u32, height: u32, bytes: &[u8]) {
        let Some(current) = &self.image else {
            engine_warn!("Upload to a disposed Metal texture ignored");
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
            let image = Rc::new(MtlImage::new(&self.ctx, &self.descriptor, width, height));
            if was_bound {
                self.ctx.bindings.borrow_mut().texture = Rc::downgrade(&image);
            }
            self.image = Some(image);
        }
        self.descriptor.width = width;
        self.descriptor.height = height;
        if let Some(image) = &self.image {
            image.write(self.descriptor.format.storage_format().bytes_per_pixel(), &pixels);
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
    fn test_pixel_formats() {
        assert!(matches!(pixel_format(TextureFormat::R8), MTLPixelFormat::R8Unorm));
        assert!(matches!(pixel_format(TextureFormat::RGB8), MTLPixelFormat::RGBA8Unorm));
        assert!(matches!(address_mode(TextureWrap::MirroredRepeat), MTLSamplerAddressMode::MirrorRepeat));
    }
}
