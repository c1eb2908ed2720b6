//! 真实后端上的端到端测试
//!
//! 只在注册表报告可用、且设备能初始化的后端上运行；没有 GPU 时直接返回。

use chart_render::core::RenderConfig;
use chart_render::renderer::shader::orthographic;
use chart_render::renderer::{
    channels_within, grow_capacity, pack_color, Backend, BackendRegistry, BlendMode, BufferDescriptor, DrawMode,
    FrameState, RenderDevice, ResourceManager, ShaderSource,
};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;
const CLEAR: [f32; 4] = [0.1, 0.1, 0.12, 1.0];

fn test_config(backend: Backend) -> RenderConfig {
    RenderConfig {
        backend,
        width: WIDTH,
        height: HEIGHT,
        clear_color: CLEAR,
        ..RenderConfig::default()
    }
}

/// 对每个可用后端创建并初始化设备和资源管理器
fn for_each_backend(mut check: impl FnMut(&mut dyn RenderDevice, &mut ResourceManager)) {
    let registry = BackendRegistry::with_default_providers();
    for backend in registry.available_backends() {
        let mut device = match registry.create_device(backend, &test_config(backend)) {
            Ok(device) => device,
            Err(e) => {
                eprintln!("skipping {}: {}", backend.name(), e);
                continue;
            }
        };
        if let Err(e) = device.initialize() {
            eprintln!("skipping {}: {}", backend.name(), e);
            continue;
        }
        let mut manager = registry
            .create_resource_manager(backend)
            .expect("manager for a registered backend");
        manager.initialize(device.as_ref()).expect("manager initialize");
        check(device.as_mut(), &mut manager);
        manager.dispose();
        device.dispose();
    }
}

fn read_pixels(device: &mut dyn RenderDevice) -> Vec<u32> {
    let (width, height) = device.frame_size();
    let mut pixels = vec![0u32; (width * height) as usize];
    device.read_frame_pixels(&mut pixels).expect("readback");
    pixels
}

#[test]
fn test_clear_color_readback() {
    for_each_backend(|device, _| {
        device.begin_frame().unwrap();
        device.end_frame().unwrap();
        let pixels = read_pixels(device);
        let expected = pack_color(CLEAR);
        for index in [0, pixels.len() / 2, pixels.len() - 1] {
            assert!(
                channels_within(pixels[index], expected, 1),
                "{:?}: pixel {} is {:08x}, expected {:08x}",
                device.backend_type(),
                index,
                pixels[index],
                expected
            );
        }
    });
}

#[test]
fn test_readback_requires_completed_frame() {
    for_each_backend(|device, _| {
        let mut pixels = vec![0u32; (WIDTH * HEIGHT) as usize];
        assert!(device.read_frame_pixels(&mut pixels).is_err());
    });
}

#[test]
fn test_begin_frame_twice_is_rejected() {
    for_each_backend(|device, _| {
        device.begin_frame().unwrap();
        assert!(device.begin_frame().is_err());
        assert_eq!(device.frame_state(), FrameState::InFrame);
        device.end_frame().unwrap();
        assert_eq!(device.frame_stats().frames, 1);
    });
}

#[test]
fn test_end_frame_without_begin_is_noop() {
    for_each_backend(|device, _| {
        device.end_frame().unwrap();
        assert_eq!(device.frame_state(), FrameState::Initialized);
        assert_eq!(device.frame_stats().frames, 0);
        let mut pixels = vec![0u32; (WIDTH * HEIGHT) as usize];
        assert!(device.read_frame_pixels(&mut pixels).is_err());
    });
}

#[test]
fn test_setters_before_initialize_are_ignored() {
    let registry = BackendRegistry::with_default_providers();
    for backend in registry.available_backends() {
        let Ok(mut device) = registry.create_device(backend, &test_config(backend)) else {
            continue;
        };
        let size = device.frame_size();
        device.set_viewport(0, 0, 8, 8);
        device.set_scissor_enabled(true);
        device.set_scissor(0, 0, 4, 4);
        device.set_blend_mode(BlendMode::Additive);
        device.set_line_width(3.0);
        device.set_line_smoothing(true);
        device.set_depth_test_enabled(true);
        device.clear_screen(1.0, 0.0, 0.0, 1.0);
        assert_eq!(device.frame_state(), FrameState::Uninitialized, "{:?}", backend);
        assert_eq!(device.frame_size(), size);
        device.dispose();
    }
}

#[test]
fn test_buffer_grows_past_capacity() {
    for_each_backend(|device, manager| {
        let buffer = manager
            .get_or_create_buffer("growing", &BufferDescriptor::position_only_2d(4))
            .unwrap();
        let initial = buffer.borrow().capacity();
        let data: Vec<f32> = (0..initial * 4).map(|i| i as f32).collect();
        buffer.borrow_mut().upload(&data, 0, data.len());
        assert_eq!(
            buffer.borrow().capacity(),
            data.len() + data.len() / 2,
            "{:?}",
            device.backend_type()
        );
        assert_eq!(buffer.borrow().capacity(), grow_capacity(data.len()));

        // 容量足够时不再增长
        buffer.borrow_mut().upload(&data, 0, initial);
        assert_eq!(buffer.borrow().capacity(), grow_capacity(data.len()));
    });
}

#[test]
fn test_triangle_covers_center() {
    for_each_backend(|device, manager| {
        let (w, h) = (WIDTH as f32, HEIGHT as f32);
        let red = [1.0, 0.0, 0.0, 1.0];
        let mut vertices = Vec::new();
        for (x, y) in [(0.0, 0.0), (w * 2.0, 0.0), (0.0, h * 2.0)] {
            vertices.extend_from_slice(&[x, y, red[0], red[1], red[2], red[3]]);
        }

        device.begin_frame().unwrap();
        let shader = manager.get_shader("default").expect("default shader");
        assert!(shader.borrow().is_valid(), "{:?}", shader.borrow().compile_log());
        shader.borrow_mut().bind();
        shader
            .borrow_mut()
            .set_uniform_matrix4("uProjection", &orthographic(w, h), false);
        let buffer = manager
            .get_or_create_buffer("triangle", &BufferDescriptor::position_color_2d(vertices.len()))
            .unwrap();
        buffer.borrow_mut().upload(&vertices, 0, vertices.len());
        buffer.borrow_mut().draw(DrawMode::Triangles);
        device.end_frame().unwrap();

        let stats = device.frame_stats();
        assert_eq!(stats.draw_calls, 1);
        assert_eq!(stats.skipped_draws, 0);
        let pixels = read_pixels(device);
        let center = pixels[(HEIGHT / 2 * WIDTH + WIDTH / 2) as usize];
        assert!(
            channels_within(center, pack_color(red), 2),
            "{:?}: center is {:08x}",
            device.backend_type(),
            center
        );
    });
}

#[test]
fn test_draw_without_valid_shader_is_skipped() {
    for_each_backend(|device, manager| {
        let broken = manager
            .create_shader("broken", &ShaderSource::glsl("broken", "not a shader", "still not a shader"))
            .unwrap();
        assert!(!broken.borrow().is_valid());
        assert!(broken.borrow().compile_log().is_some());

        device.begin_frame().unwrap();
        broken.borrow_mut().bind();
        let buffer = manager
            .get_or_create_buffer("points", &BufferDescriptor::position_color_2d(12))
            .unwrap();
        buffer.borrow_mut().upload(&[1.0; 12], 0, 12);
        buffer.borrow_mut().draw(DrawMode::Points);
        device.end_frame().unwrap();

        let stats = device.frame_stats();
        assert_eq!(stats.draw_calls, 0);
        assert_eq!(stats.skipped_draws, 1);
    });
}

#[test]
fn test_viewport_outside_frame_resizes_target() {
    for_each_backend(|device, _| {
        device.set_viewport(0, 0, 32, 16);
        assert_eq!(device.frame_size(), (32, 16));
        device.begin_frame().unwrap();
        device.end_frame().unwrap();
        let pixels = read_pixels(device);
        assert_eq!(pixels.len(), 32 * 16);
        assert!(channels_within(pixels[0], pack_color(CLEAR), 1));
    });
}

#[test]
fn test_text_width_of_empty_string() {
    for_each_backend(|_, manager| {
        if let Some(text) = manager.text_renderer() {
            assert_eq!(text.text_width(""), 0.0);
            assert!(text.text_width("123.45") > 0.0);
        }
    });
}

#[test]
fn test_dispose_releases_all_handles() {
    let registry = BackendRegistry::with_default_providers();
    for backend in registry.available_backends() {
        let Ok(mut device) = registry.create_device(backend, &test_config(backend)) else {
            continue;
        };
        if device.initialize().is_err() {
            continue;
        }
        let ledger = device.ledger();
        let mut manager = registry.create_resource_manager(backend).unwrap();
        manager.initialize(device.as_ref()).unwrap();
        manager
            .get_or_create_buffer("lines", &BufferDescriptor::position_only_2d(64))
            .unwrap();
        manager
            .create_named_texture("atlas", &chart_render::renderer::TextureDescriptor::font_atlas(64, 64))
            .unwrap();
        device.begin_frame().unwrap();
        device.end_frame().unwrap();
        assert!(ledger.live_count() > 0);

        manager.dispose();
        device.dispose();
        device.dispose();
        assert_eq!(device.frame_state(), FrameState::Disposed);
        assert!(device.initialize().is_err());
        assert_eq!(ledger.live_count(), 0, "{:?} leaked handles", backend);
        assert_eq!(ledger.double_releases(), 0);
        assert_eq!(ledger.created(), ledger.released());
    }
}
