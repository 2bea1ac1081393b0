//! Picture and table outputs for a laid-out tree.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use image::{Rgb, RgbImage};
use log::debug;
use rustc_hash::FxHashMap;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::layout::LayoutExtent;
use crate::records::Metric;
use crate::tree::{MultiNode, MultiTree};

pub type Rgb8 = (u8, u8, u8);

#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Blank border around the drawing.
    pub margin: f64,
    /// Room reserved right of the last column for labels.
    pub label_width: f64,
    pub font_size: f64,
    pub node_width: f64,
    /// Nodes with a top feature ranked at or above this are highlighted.
    pub threshold: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        RenderOptions {
            margin: 20.0,
            label_width: 160.0,
            font_size: 11.0,
            node_width: 12.0,
            threshold: 10,
        }
    }
}

/// SHA-256 based colour for a cohort id, brightened so no colour is too dark.
pub fn cohort_color(cohort_id: &str) -> Rgb8 {
    let digest = Sha256::digest(cohort_id.as_bytes());
    let mut rgb = [
        digest[24] as f32 / 255.0,
        digest[8] as f32 / 255.0,
        digest[16] as f32 / 255.0,
    ];
    let sum: f32 = rgb.iter().sum();
    if sum > 0.0 {
        rgb.iter_mut().for_each(|c| *c /= sum);
    }
    let max_component = rgb.iter().cloned().fold(0.0f32, f32::max);
    let f = if max_component > 0.0 {
        1.5f32.min(1.0 / max_component)
    } else {
        1.0
    };
    let scale = |c: f32| (255.0 * (c * f).min(1.0)).round() as u8;
    (scale(rgb[0]), scale(rgb[1]), scale(rgb[2]))
}

fn parse_color(text: &str) -> Option<Rgb8> {
    if let Some(hex) = text.strip_prefix('#') {
        if hex.len() != 6 {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
        return Some((channel(0)?, channel(2)?, channel(4)?));
    }
    let parts: Vec<u8> = text
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();
    match parts[..] {
        [r, g, b] => Some((r, g, b)),
        _ => None,
    }
}

/// Reads `cohort<TAB>#rrggbb` (or `r,g,b`) lines.
pub fn load_cohort_colors(path: &Path) -> Result<FxHashMap<String, Rgb8>> {
    let reader = BufReader::new(File::open(path)?);
    let mut colors = FxHashMap::default();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() >= 2 {
            let rgb = parse_color(parts[1].trim()).unwrap_or((128, 128, 128));
            colors.insert(parts[0].to_string(), rgb);
        }
    }
    Ok(colors)
}

/// One colour per cohort, in display order.
pub fn palette(cohort_ids: &[String], custom: Option<&FxHashMap<String, Rgb8>>) -> Vec<Rgb8> {
    cohort_ids
        .iter()
        .map(|id| {
            custom
                .and_then(|colors| colors.get(id).copied())
                .unwrap_or_else(|| cohort_color(id))
        })
        .collect()
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Translation from layout coordinates to picture coordinates.
struct Canvas {
    dx: f64,
    dy: f64,
    width: f64,
    height: f64,
}

impl Canvas {
    fn new(extent: &LayoutExtent, options: &RenderOptions) -> Self {
        Canvas {
            dx: options.margin - extent.min_x,
            dy: options.margin - extent.min_y,
            width: extent.width() + 2.0 * options.margin + options.label_width,
            height: extent.height() + 2.0 * options.margin,
        }
    }
}

fn visible(tree: &MultiTree) -> Vec<&MultiNode> {
    tree.visible_nodes()
        .into_iter()
        .filter_map(|id| tree.get(id))
        .collect()
}

fn highlighted(node: &MultiNode, threshold: u32) -> bool {
    node.top_feature_count_above(threshold) >= 0
}

/// Draws connectors, cohort blocks and labels as SVG.
pub fn render_svg(
    tree: &MultiTree,
    extent: &LayoutExtent,
    colors: &[Rgb8],
    options: &RenderOptions,
) -> String {
    let canvas = Canvas::new(extent, options);
    let nodes = visible(tree);
    let mut svg = String::new();

    svg.push_str(&format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<svg xmlns="http://www.w3.org/2000/svg" width="{:.0}" height="{:.0}" viewBox="0 0 {:.0} {:.0}">
<style>
  .taxon {{ font-family: 'DejaVu Sans', Arial, sans-serif; font-size: {}px; }}
  .top {{ font-weight: bold; }}
</style>
<rect width="100%" height="100%" fill="white"/>
<g transform="translate({:.2},{:.2})">
"#,
        canvas.width, canvas.height, canvas.width, canvas.height, options.font_size, canvas.dx, canvas.dy
    ));

    // Connectors first so blocks sit on top.
    for node in &nodes {
        for (i, block) in node.blocks.iter().enumerate() {
            if let Some(conn) = &block.connector {
                let (r, g, b) = colors.get(i).copied().unwrap_or((128, 128, 128));
                let _ = writeln!(
                    svg,
                    r#"<path d="{}" fill="none" stroke="rgb({},{},{})" stroke-opacity="0.35" stroke-width="{:.2}"/>"#,
                    conn.svg_path(),
                    r,
                    g,
                    b,
                    conn.width.max(1.0)
                );
            }
        }
    }

    for node in &nodes {
        for (i, block) in node.blocks.iter().enumerate() {
            let (r, g, b) = colors.get(i).copied().unwrap_or((128, 128, 128));
            let _ = writeln!(
                svg,
                r#"<rect x="{:.2}" y="{:.2}" width="{:.2}" height="{:.2}" fill="rgb({},{},{})"/>"#,
                node.x,
                node.y + block.y,
                options.node_width,
                block.height,
                r,
                g,
                b
            );
        }
        let class = if highlighted(node, options.threshold) {
            "taxon top"
        } else {
            "taxon"
        };
        let _ = writeln!(
            svg,
            r#"<text x="{:.2}" y="{:.2}" class="{}">{}</text>"#,
            node.x + options.node_width + 4.0,
            node.y + options.font_size / 3.0,
            class,
            escape_xml(node.name())
        );
    }

    svg.push_str("</g>\n</svg>\n");
    debug!("SVG: {} nodes, {} bytes", nodes.len(), svg.len());
    svg
}

fn lighten((r, g, b): Rgb8, amount: f64) -> Rgb8 {
    let mix = |c: u8| (c as f64 + (255.0 - c as f64) * amount).round() as u8;
    (mix(r), mix(g), mix(b))
}

fn fill_rect(img: &mut RgbImage, x0: f64, y0: f64, x1: f64, y1: f64, (r, g, b): Rgb8) {
    let (w, h) = (img.width() as i64, img.height() as i64);
    let xa = (x0.floor() as i64).clamp(0, w);
    let xb = (x1.ceil() as i64).clamp(0, w);
    let ya = (y0.floor() as i64).clamp(0, h);
    let yb = (y1.ceil() as i64).clamp(0, h);
    for y in ya..yb {
        for x in xa..xb {
            img.put_pixel(x as u32, y as u32, Rgb([r, g, b]));
        }
    }
}

/// Rasterizes the same drawing as [`render_svg`], without labels.
pub fn render_png(
    tree: &MultiTree,
    extent: &LayoutExtent,
    colors: &[Rgb8],
    options: &RenderOptions,
) -> RgbImage {
    let canvas = Canvas::new(extent, options);
    let width = canvas.width.ceil().max(1.0) as u32;
    let height = canvas.height.ceil().max(1.0) as u32;
    let mut img = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    let nodes = visible(tree);

    for node in &nodes {
        for (i, block) in node.blocks.iter().enumerate() {
            let conn = match &block.connector {
                Some(conn) => conn,
                None => continue,
            };
            let color = lighten(colors.get(i).copied().unwrap_or((128, 128, 128)), 0.65);
            let half = conn.width.max(1.0) / 2.0;
            let steps = ((conn.target.0 - conn.source.0).abs().ceil() as usize).max(1) * 2;
            for step in 0..=steps {
                let (x, y) = conn.point_at(step as f64 / steps as f64);
                let (x, y) = (x + canvas.dx, y + canvas.dy);
                fill_rect(&mut img, x, y - half, x + 1.0, y + half, color);
            }
        }
    }

    for node in &nodes {
        let x = node.x + canvas.dx;
        let y = node.y + canvas.dy;
        if highlighted(node, options.threshold) {
            fill_rect(
                &mut img,
                x - 2.0,
                y + node.stack_top() - 2.0,
                x + options.node_width + 2.0,
                y + node.stack_bottom() + 2.0,
                (0, 0, 0),
            );
        }
        for (i, block) in node.blocks.iter().enumerate() {
            let color = colors.get(i).copied().unwrap_or((128, 128, 128));
            fill_rect(
                &mut img,
                x,
                y + block.y,
                x + options.node_width,
                y + block.y + block.height,
                color,
            );
        }
    }
    img
}

/// Visible nodes with their geometry, top-feature index and per-cohort means.
pub fn nodes_tsv(tree: &MultiTree, threshold: u32) -> String {
    let mut content = String::from("name\tlevel\tdepth\tx\ty\ttop.feature.index");
    for cohort_id in tree.cohort_ids() {
        let _ = write!(content, "\t{}.abundance.mean", cohort_id);
    }
    content.push('\n');
    for node in visible(tree) {
        let _ = write!(
            content,
            "{}\t{}\t{}\t{:.2}\t{:.2}\t{}",
            node.name(),
            node.level(),
            node.depth(),
            node.x,
            node.y,
            node.top_feature_count_above(threshold)
        );
        for cohort in node.cohorts() {
            let _ = write!(content, "\t{}", cohort.abundance.mean);
        }
        content.push('\n');
    }
    content
}

/// Binned `metric` distribution of every visible node, one row per bin.
pub fn distributions_tsv(tree: &MultiTree, metric: Metric) -> Result<String> {
    let mut content = String::from("name\tbin");
    for cohort_id in tree.cohort_ids() {
        let _ = write!(content, "\t{}", cohort_id);
    }
    content.push('\n');
    for node in visible(tree) {
        for bin in node.distribution(metric)? {
            let _ = write!(content, "{}\t{}", node.name(), bin.label);
            for value in &bin.values {
                let _ = write!(content, "\t{}", value);
            }
            content.push('\n');
        }
    }
    Ok(content)
}
