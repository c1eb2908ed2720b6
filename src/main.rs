//! ChartRender 演示程序
//!
//! 用选定的后端离屏绘制一张小型 K 线图（网格、蜡烛、均线、标签），
//! 读回像素并导出为 PNG。
//!
//! # 使用方法
//!
//! ```bash
//! # 使用配置文件
//! cargo run
//!
//! # 指定后端和输出（命令行覆盖）
//! cargo run -- --vulkan --output chart.png
//! ```

use anyhow::{bail, Context};
use tracing::{info, warn};

use chart_render::core::log;
use chart_render::core::Config;
use chart_render::gfx::native;
use chart_render::renderer::shader::orthographic;
use chart_render::renderer::texture::argb_to_rgba_bytes;
use chart_render::renderer::{
    BackendRegistry, BufferDescriptor, DrawMode, RenderDevice, ResourceManager, TextSettings,
};

/// 一根蜡烛
#[derive(Debug, Clone, Copy)]
struct Candle {
    open: f32,
    high: f32,
    low: f32,
    close: f32,
}

/// 确定性的样例行情
fn sample_candles(count: usize) -> Vec<Candle> {
    let mut price = 100.0f32;
    (0..count)
        .map(|i| {
            let t = i as f32;
            let open = price;
            let close = open + (t * 0.7).sin() * 2.5 + (t * 0.23).cos() * 1.2;
            let high = open.max(close) + 0.8 + (t * 1.3).sin().abs() * 1.5;
            let low = open.min(close) - 0.8 - (t * 0.9).cos().abs() * 1.5;
            price = close;
            Candle { open, high, low, close }
        })
        .collect()
}

/// 价格到像素的映射
struct PriceAxis {
    min: f32,
    max: f32,
    top: f32,
    bottom: f32,
}

impl PriceAxis {
    fn fit(candles: &[Candle], top: f32, bottom: f32) -> Self {
        let min = candles.iter().map(|c| c.low).fold(f32::MAX, f32::min);
        let max = candles.iter().map(|c| c.high).fold(f32::MIN, f32::max);
        Self { min, max, top, bottom }
    }

    fn y(&self, price: f32) -> f32 {
        let span = (self.max - self.min).max(f32::EPSILON);
        self.bottom - (price - self.min) / span * (self.bottom - self.top)
    }
}

fn push_vertex(out: &mut Vec<f32>, x: f32, y: f32, color: [f32; 4]) {
    out.extend_from_slice(&[x, y, color[0], color[1], color[2], color[3]]);
}

fn push_line(out: &mut Vec<f32>, from: (f32, f32), to: (f32, f32), color: [f32; 4]) {
    push_vertex(out, from.0, from.1, color);
    push_vertex(out, to.0, to.1, color);
}

fn push_rect(out: &mut Vec<f32>, x0: f32, y0: f32, x1: f32, y1: f32, color: [f32; 4]) {
    for (x, y) in [(x0, y0), (x1, y0), (x1, y1), (x0, y0), (x1, y1), (x0, y1)] {
        push_vertex(out, x, y, color);
    }
}

const GRID_COLOR: [f32; 4] = [0.25, 0.25, 0.3, 1.0];
const UP_COLOR: [f32; 4] = [0.2, 0.75, 0.4, 1.0];
const DOWN_COLOR: [f32; 4] = [0.85, 0.3, 0.3, 1.0];
const AVERAGE_COLOR: [f32; 4] = [0.95, 0.8, 0.3, 1.0];
const LABEL_COLOR: [f32; 4] = [0.85, 0.85, 0.9, 1.0];

const GRID: Layer<'static> = Layer {
    buffer: "grid",
    shader: "default",
    mode: DrawMode::Lines,
    color: None,
};
const WICKS: Layer<'static> = Layer {
    buffer: "wicks",
    shader: "default",
    mode: DrawMode::Lines,
    color: None,
};
const BODIES: Layer<'static> = Layer {
    buffer: "bodies",
    shader: "default",
    mode: DrawMode::Triangles,
    color: None,
};
const AVERAGE: Layer<'static> = Layer {
    buffer: "average",
    shader: "simple",
    mode: DrawMode::LineStrip,
    color: Some(AVERAGE_COLOR),
};

/// 一个图层：缓冲区名、着色器和图元类型
struct Layer<'a> {
    buffer: &'a str,
    shader: &'a str,
    mode: DrawMode,
    /// `"simple"` 着色器的统一颜色
    color: Option<[f32; 4]>,
}

/// 上传顶点并用图层的着色器绘制
fn draw_layer(
    manager: &mut ResourceManager,
    layer: &Layer<'_>,
    projection: &[f32; 16],
    vertices: &[f32],
) -> anyhow::Result<()> {
    let Some(shader) = manager.get_shader(layer.shader) else {
        bail!("shader '{}' is not registered", layer.shader);
    };
    let descriptor = match layer.color {
        Some(_) => BufferDescriptor::position_only_2d(vertices.len()),
        None => BufferDescriptor::position_color_2d(vertices.len()),
    };
    let buffer = manager.get_or_create_buffer(layer.buffer, &descriptor)?;
    let mut shader = shader.borrow_mut();
    shader.bind();
    shader.set_uniform_matrix4("uProjection", projection, false);
    if let Some([r, g, b, a]) = layer.color {
        shader.set_uniform_vec4("uColor", r, g, b, a);
    }
    let mut buffer = buffer.borrow_mut();
    buffer.upload(vertices, 0, vertices.len());
    buffer.draw(layer.mode);
    shader.unbind();
    Ok(())
}

/// 绘制一帧 K 线图
fn render_chart(device: &mut dyn RenderDevice, manager: &mut ResourceManager) -> anyhow::Result<()> {
    let (width, height) = device.frame_size();
    let (w, h) = (width as f32, height as f32);
    let projection = orthographic(w, h);
    let candles = sample_candles(48);
    let axis = PriceAxis::fit(&candles, h * 0.1, h * 0.9);
    let left = w * 0.08;
    let right = w * 0.88;
    let step = (right - left) / candles.len() as f32;

    device.begin_frame()?;
    manager.process_pending_operations();

    // 1. 网格
    let mut grid = Vec::new();
    for i in 0..=6 {
        let y = h * 0.1 + (h * 0.8) * i as f32 / 6.0;
        push_line(&mut grid, (left, y), (right, y), GRID_COLOR);
    }
    for i in 0..=8 {
        let x = left + (right - left) * i as f32 / 8.0;
        push_line(&mut grid, (x, h * 0.1), (x, h * 0.9), GRID_COLOR);
    }
    draw_layer(manager, &GRID, &projection, &grid)?;

    // 2. 蜡烛：影线 + 实体
    let mut wicks = Vec::new();
    let mut bodies = Vec::new();
    for (i, candle) in candles.iter().enumerate() {
        let color = if candle.close >= candle.open { UP_COLOR } else { DOWN_COLOR };
        let center = left + step * (i as f32 + 0.5);
        push_line(&mut wicks, (center, axis.y(candle.high)), (center, axis.y(candle.low)), color);
        let (top, bottom) = (axis.y(candle.open.max(candle.close)), axis.y(candle.open.min(candle.close)));
        push_rect(&mut bodies, center - step * 0.35, top, center + step * 0.35, bottom.max(top + 1.0), color);
    }
    draw_layer(manager, &WICKS, &projection, &wicks)?;
    draw_layer(manager, &BODIES, &projection, &bodies)?;

    // 3. 五日均线
    let average: Vec<f32> = candles
        .windows(5)
        .enumerate()
        .flat_map(|(i, window)| {
            let mean = window.iter().map(|c| c.close).sum::<f32>() / window.len() as f32;
            [left + step * (i as f32 + 4.5), axis.y(mean)]
        })
        .collect();
    device.set_line_width(2.0);
    draw_layer(manager, &AVERAGE, &projection, &average)?;
    device.set_line_width(1.0);

    // 4. 价格标签
    match manager.text_renderer() {
        Some(text) => {
            if text.begin_batch(width, height) {
                let ascent = text.ascent();
                for i in 0..=6 {
                    let y = h * 0.1 + (h * 0.8) * i as f32 / 6.0;
                    let price = axis.max - (axis.max - axis.min) * i as f32 / 6.0;
                    text.draw_text(&format!("{:.2}", price), right + 6.0, y + ascent * 0.5, LABEL_COLOR);
                }
                text.draw_text_centered("chart_render demo", w * 0.5, h * 0.06, LABEL_COLOR);
                text.end_batch();
            }
        }
        None => warn!("No font available, labels skipped"),
    }

    device.end_frame()?;
    Ok(())
}

/// 读回最近一帧并写成 PNG
fn export_png(device: &mut dyn RenderDevice, path: &str) -> anyhow::Result<()> {
    let (width, height) = device.frame_size();
    let mut pixels = vec![0u32; width as usize * height as usize];
    device.read_frame_pixels(&mut pixels)?;
    let image = image::RgbaImage::from_raw(width, height, argb_to_rgba_bytes(&pixels))
        .context("pixel buffer does not match the frame size")?;
    image.save(path).with_context(|| format!("failed to write {}", path))?;
    info!(path, width, height, "Frame exported");
    Ok(())
}

/// 应用程序入口点
///
/// # 流程
///
/// 1. 加载配置文件（config.toml）并应用命令行参数
/// 2. 初始化日志系统
/// 3. 列出已注册 / 可用的后端
/// 4. 创建设备和资源管理器
/// 5. 绘制、读回、导出
/// 6. 释放资源
fn main() -> anyhow::Result<()> {
    // 1. 配置
    let mut config = Config::from_file_or_default("config.toml");
    config.apply_args(std::env::args());
    config.validate().context("invalid configuration")?;

    // 2. 日志
    let log_file = config.logging.file_output.then_some(config.logging.log_file.as_str());
    log::init_logger(config.logging.level, config.logging.file_output, log_file)?;
    info!(version = env!("CARGO_PKG_VERSION"), "ChartRender starting");
    native::set_bundle_dir(config.native.bundle_dir.as_deref());

    // 3. 后端
    let registry = BackendRegistry::with_default_providers();
    for backend in registry.registered_backends() {
        match registry.unavailable_reason(backend) {
            None => info!(backend = backend.name(), "Backend available"),
            Some(reason) => info!(backend = backend.name(), %reason, "Backend unavailable"),
        }
    }

    // 4. 设备和资源管理器
    let render_config = config.render_config();
    let mut device = registry
        .create_device(render_config.backend, &render_config)
        .context("no usable graphics backend")?;
    device.initialize()?;
    info!(backend = ?device.backend_type(), renderer = %device.renderer_info(), "Device ready");

    let mut manager = registry.create_resource_manager(device.backend_type())?;
    manager.set_text_settings(TextSettings::from(&config.text));
    manager.initialize(device.as_ref())?;

    // 5. 绘制并导出
    let result = render_chart(device.as_mut(), &mut manager).and_then(|()| export_png(device.as_mut(), &config.export.output));
    let stats = device.frame_stats();
    info!(
        frames = stats.frames,
        draws = stats.draw_calls,
        skipped = stats.skipped_draws,
        "Frame statistics"
    );

    // 6. 释放
    manager.dispose();
    device.dispose();
    let ledger = device.ledger();
    if ledger.live_count() != 0 {
        warn!(live = ledger.live_count(), "Native handles still live after dispose");
    }
    native::cleanup_extracted_libraries();
    result
}
