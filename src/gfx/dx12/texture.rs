//! DX12 纹理
//!
//! DEFAULT 堆上的纹理，经 UPLOAD 堆中转后用一次性命令列表复制；
//! SRV 和采样器写进共享槽位。

use std::cell::Cell;
use std::rc::Rc;

use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use super::context::{borrowed, buffer_desc, committed_resource, transition, DxContext};
use crate::core::error::{GraphicsError, Result};
use crate::renderer::handle::{HandleKind, Tracked};
use crate::renderer::readback::align_up;
use crate::renderer::texture::{prepare_pixels, Texture, TextureDescriptor, TextureFilter, TextureFormat, TextureWrap};
use crate::{engine_error, engine_warn};

pub fn dxgi_format(format: TextureFormat) -> DXGI_FORMAT {
    match format.storage_format() {
        TextureFormat::R8 => DXGI_FORMAT_R8_UNORM,
        TextureFormat::RG8 => DXGI_FORMAT_R8G8_UNORM,
        TextureFormat::RGB8 | TextureFormat::RGBA8 => DXGI_FORMAT_R8G8B8A8_UNORM,
        TextureFormat::R16F => DXGI_FORMAT_R16_FLOAT,
        TextureFormat::RGBA16F => DXGI_FORMAT_R16G16B16A16_FLOAT,
        TextureFormat::RGBA32F => DXGI_FORMAT_R32G32B32A32_FLOAT,
    }
}

fn filter(min: TextureFilter, mag: TextureFilter) -> D3D12_FILTER {
    match (min, mag) {
        (TextureFilter::Nearest, TextureFilter::Nearest) => D3D12_FILTER_MIN_MAG_MIP_POINT,
        (TextureFilter::Nearest, TextureFilter::Linear) => D3D12_FILTER_MIN_POINT_MAG_LINEAR_MIP_POINT,
        (TextureFilter::Linear, TextureFilter::Nearest) => D3D12_FILTER_MIN_LINEAR_MAG_MIP_POINT,
        (TextureFilter::Linear, TextureFilter::Linear) => D3D12_FILTER_MIN_MAG_LINEAR_MIP_POINT,
    }
}

fn address_mode(wrap: TextureWrap) -> D3D12_TEXTURE_ADDRESS_MODE {
    match wrap {
        TextureWrap::Repeat => D3D12_TEXTURE_ADDRESS_MODE_WRAP,
        TextureWrap::ClampToEdge => D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
        TextureWrap::MirroredRepeat => D3D12_TEXTURE_ADDRESS_MODE_MIRROR,
    }
}

/// 一张 GPU 纹理和它的描述符槽位
pub struct DxImage {
    ctx: Rc<DxContext>,
    pub resource: ID3D12Resource,
    pub slot: u32,
    width: u32,
    height: u32,
    pub last_used: Cell<u64>,
    _tracked: Tracked,
}

impl DxImage {
    fn new(ctx: &Rc<DxContext>, descriptor: &TextureDescriptor, width: u32, height: u32) -> Result<Self> {
        let desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            Width: width as u64,
            Height: height,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: dxgi_format(descriptor.format),
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
            Flags: D3D12_RESOURCE_FLAG_NONE,
            ..Default::default()
        };
        let resource = committed_resource(&ctx.device, D3D12_HEAP_TYPE_DEFAULT, &desc, D3D12_RESOURCE_STATE_COPY_DEST)?;
        let slot = ctx.allocate_slot()?;

        let sampler = D3D12_SAMPLER_DESC {
            Filter: filter(descriptor.min_filter, descriptor.mag_filter),
            AddressU: address_mode(descriptor.wrap_s),
            AddressV: address_mode(descriptor.wrap_t),
            AddressW: D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
            MaxAnisotropy: 1,
            ComparisonFunc: D3D12_COMPARISON_FUNC_NEVER,
            MaxLOD: f32::MAX,
            ..Default::default()
        };
        unsafe {
            ctx.device.CreateShaderResourceView(&resource, None, ctx.srv_heap.cpu_handle(slot));
            ctx.device.CreateSampler(&sampler, ctx.sampler_heap.cpu_handle(slot));
        }

        Ok(Self {
            ctx: ctx.clone(),
            resource,
            slot,
            width,
            height,
            last_used: Cell::new(0),
            _tracked: Tracked::new(&ctx.ledger, HandleKind::Texture),
        })
    }

    /// 经 UPLOAD 堆复制像素，`first` 表示资源仍处于 COPY_DEST 状态
    fn write(&self, bytes_per_pixel: usize, pixels: &[u8], first: bool) -> Result<()> {
        let row_bytes = self.width as usize * bytes_per_pixel;
        let row_pitch = align_up(row_bytes, D3D12_TEXTURE_DATA_PITCH_ALIGNMENT as usize);
        let staging = committed_resource(
            &self.ctx.device,
            D3D12_HEAP_TYPE_UPLOAD,
            &buffer_desc((row_pitch * self.height as usize) as u64),
            D3D12_RESOURCE_STATE_GENERIC_READ,
        )?;
        unsafe {
            let mut mapped = std::ptr::null_mut();
            staging
                .Map(0, None, Some(&mut mapped))
                .map_err(|e| GraphicsError::ResourceCreation(format!("staging Map failed: {:?}", e)))?;
            let dst = mapped as *mut u8;
            for (row, src) in pixels.chunks_exact(row_bytes).take(self.height as usize).enumerate() {
                std::ptr::copy_nonoverlapping(src.as_ptr(), dst.add(row * row_pitch), row_bytes);
            }
            staging.Unmap(0, None);
        }

        let format = unsafe { self.resource.GetDesc() }.Format;
        self.ctx.submit_once(|list| unsafe {
            if !first {
                list.ResourceBarrier(&[transition(
                    &self.resource,
                    D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE,
                    D3D12_RESOURCE_STATE_COPY_DEST,
                )]);
            }
            let dst = D3D12_TEXTURE_COPY_LOCATION {
                pResource: borrowed(&self.resource),
                Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
                Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 { SubresourceIndex: 0 },
            };
            let src = D3D12_TEXTURE_COPY_LOCATION {
                pResource: borrowed(&staging),
                Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
                Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                    PlacedFootprint: D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
                        Offset: 0,
                        Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
                            Format: format,
                            Width: self.width,
                            Height: self.height,
                            Depth: 1,
                            RowPitch: row_pitch as u32,
                        },
                    },
                },
            };
            list.CopyTextureRegion(&dst, 0, 0, 0, &src, None);
            list.ResourceBarrier(&[transition(
                &self.resource,
                D3D12_RESOURCE_STATE_COPY_DEST,
                D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE,
            )]);
        })
    }
}

impl Drop for DxImage {
    fn drop(&mut self) {
        self.ctx.release_slot(self.slot);
    }
}

/// DX12 纹理
pub struct Dx12Texture {
    ctx: Rc<DxContext>,
    descriptor: TextureDescriptor,
    image: Option<Rc<DxImage>>,
}

impl Dx12Texture {
    pub fn new(ctx: &Rc<DxContext>, descriptor: &TextureDescriptor) -> Result<Self> {
        let max = D3D12_REQ_TEXTURE2D_U_OR_V_DIMENSION;
        if descriptor.width == 0 || descriptor.height == 0 || descriptor.width.max(descriptor.height) > max {
            return Err(GraphicsError::ResourceCreation(format!(
                "texture size {}x{} outside 1..={}",
                descriptor.width, descriptor.height, max
            ))
            .into());
        }
        let image = DxImage::new(ctx, descriptor, descriptor.width, descriptor.height)?;
        // 初始内容清零，同时把资源转到可采样状态
        let bpp = descriptor.format.storage_format().bytes_per_pixel();
        image.write(bpp, &vec![0u8; descriptor.width as usize * descriptor.height as usize * bpp], true)?;
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

impl Texture for Dx12Texture {
    fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    fn upload(&mut self, width: u32, height: u32, bytes: &[u8]) {
        let Some(current) = &self.image else {
            engine_warn!("Upload to a disposed DX12 texture ignored");
            return;
        };
        let Some(pixels) = prepare_pixels(self.descriptor.format, width, height, bytes) else {
            engine_warn!(width, height, len = bytes.len(), "Texture upload rejected: size mismatch");
            return;
        };
        let bpp = self.descriptor.format.storage_format().bytes_per_pixel();
        let resized = current.width != width || current.height != height;
        let in_use = self.ctx.state.borrow().used_this_frame(current.last_used.get());
        let result = if resized || in_use {
            DxImage::new(&self.ctx, &self.descriptor, width, height).and_then(|image| {
                image.write(bpp, &pixels, true)?;
                let image = Rc::new(image);
                if self.is_bound() {
                    self.ctx.bindings.borrow_mut().texture = Rc::downgrade(&image);
                }
                self.image = Some(image);
                Ok(())
            })
        } else {
            current.write(bpp, &pixels, false)
        };
        match result {
            Ok(()) => {
                self.descriptor.width = width;
                self.descriptor.height = height;
            }
            Err(e) => engine_error!("DX12 texture upload failed: {}", e),
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
    fn test_texture_tables() {
        assert_eq!(dxgi_format(TextureFormat::RGB8), DXGI_FORMAT_R8G8B8A8_UNORM);
        assert_eq!(filter(TextureFilter::Nearest, TextureFilter::Nearest), D3D12_FILTER_MIN_MAG_MIP_POINT);
        assert_eq!(address_mode(TextureWrap::Repeat), D3D12_TEXTURE_ADDRESS_MODE_WRAP);
    }
}
