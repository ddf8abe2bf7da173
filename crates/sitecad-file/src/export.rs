//! 总图导出
//!
//! 单页 PDF：标题栏、地图视口（用地、等高线、道路、建筑、场地范围）、
//! 指北针、比例尺和图例。所有图形都是矢量路径。

use crate::artifact::{Encoded, Encoder, FeatureReport, OutputArtifact};
use crate::error::ExportError;
use crate::manifest::ExportFormat;
use crate::pdf::{num, pdf_string, PdfDocument};
use crate::site::SiteDocument;
use serde::{Deserialize, Serialize};
use sitecad_core::error::GeometryError;
use sitecad_core::feature::{FeatureGeometry, Footprint};
use sitecad_core::layer::SiteLayer;
use sitecad_core::math::Point2;
use sitecad_core::properties::{Color, LineWeight};
use std::fmt::Write;
use tracing::debug;

/// 每毫米的 PDF 点数
pub const PT_PER_MM: f64 = 72.0 / 25.4;

/// 纸张大小
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaperSize {
    A4,
    A3,
    A2,
    A1,
    A0,
    Letter,
    Legal,
    Tabloid,
    Custom { width: f64, height: f64 },
}

impl PaperSize {
    /// 获取纸张尺寸（毫米，纵向）
    pub fn dimensions_mm(&self) -> (f64, f64) {
        match self {
            PaperSize::A4 => (210.0, 297.0),
            PaperSize::A3 => (297.0, 420.0),
            PaperSize::A2 => (420.0, 594.0),
            PaperSize::A1 => (594.0, 841.0),
            PaperSize::A0 => (841.0, 1189.0),
            PaperSize::Letter => (215.9, 279.4),
            PaperSize::Legal => (215.9, 355.6),
            PaperSize::Tabloid => (279.4, 431.8),
            PaperSize::Custom { width, height } => (*width, *height),
        }
    }
}

/// 纸张方向
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Portrait,
    Landscape,
}

/// 页面设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageSetup {
    /// 纸张大小
    pub paper_size: PaperSize,
    /// 纸张方向
    pub orientation: Orientation,
    /// 边距（毫米）：上、右、下、左
    pub margins: (f64, f64, f64, f64),
}

impl Default for PageSetup {
    fn default() -> Self {
        Self {
            paper_size: PaperSize::A3,
            orientation: Orientation::Landscape,
            margins: (10.0, 10.0, 10.0, 10.0),
        }
    }
}

impl PageSetup {
    /// 按方向调整后的纸张尺寸（毫米）
    pub fn page_size_mm(&self) -> (f64, f64) {
        let (paper_w, paper_h) = self.paper_size.dimensions_mm();
        match self.orientation {
            Orientation::Portrait => (paper_w, paper_h),
            Orientation::Landscape => (paper_h, paper_w),
        }
    }

    /// 获取可打印区域尺寸（毫米）
    pub fn printable_size(&self) -> (f64, f64) {
        let (w, h) = self.page_size_mm();
        let (top, right, bottom, left) = self.margins;
        (w - left - right, h - top - bottom)
    }

    pub fn page_size_pt(&self) -> (f64, f64) {
        let (w, h) = self.page_size_mm();
        (w * PT_PER_MM, h * PT_PER_MM)
    }
}

/// 页面矩形（PDF 点，原点在左下）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    pub fn top(&self) -> f64 {
        self.y + self.h
    }

    pub fn right(&self) -> f64 {
        self.x + self.w
    }
}

/// 图纸版面
#[derive(Debug, Clone, Copy)]
pub struct SheetLayout {
    pub page: (f64, f64),
    pub title: Rect,
    pub viewport: Rect,
    pub legend: Option<Rect>,
}

const TITLE_HEIGHT: f64 = 56.0;
const GAP: f64 = 10.0;
const LEGEND_WIDTH: f64 = 160.0;

impl SheetLayout {
    pub fn new(setup: &PageSetup, show_legend: bool) -> Self {
        let page = setup.page_size_pt();
        let (top, right, bottom, left) = setup.margins;
        let x = left * PT_PER_MM;
        let y = bottom * PT_PER_MM;
        let w = page.0 - (left + right) * PT_PER_MM;
        let h = page.1 - (top + bottom) * PT_PER_MM;

        let title = Rect {
            x,
            y: y + h - TITLE_HEIGHT,
            w,
            h: TITLE_HEIGHT,
        };
        let body_h = h - TITLE_HEIGHT - GAP;
        let legend_w = if show_legend { LEGEND_WIDTH.min(w * 0.3) } else { 0.0 };
        let viewport = Rect {
            x,
            y,
            w: if show_legend { w - legend_w - GAP } else { w },
            h: body_h,
        };
        let legend = show_legend.then(|| Rect {
            x: x + w - legend_w,
            y,
            w: legend_w,
            h: body_h,
        });
        Self {
            page,
            title,
            viewport,
            legend,
        }
    }
}

/// 局部米 → 页面点：场地范围圆内切于视口
#[derive(Debug, Clone, Copy)]
pub struct MapTransform {
    pub center: (f64, f64),
    /// 每米的点数
    pub scale: f64,
}

impl MapTransform {
    pub fn fit(viewport: &Rect, radius_m: f64) -> Self {
        Self {
            center: viewport.center(),
            scale: viewport.w.min(viewport.h) / (2.0 * radius_m),
        }
    }

    pub fn apply(&self, p: &Point2) -> (f64, f64) {
        (self.center.0 + p.x * self.scale, self.center.1 + p.y * self.scale)
    }

    pub fn meters_per_point(&self) -> f64 {
        1.0 / self.scale
    }

    /// 图纸比例 1:N
    pub fn ratio(&self) -> f64 {
        (self.meters_per_point() * 1000.0 / (1.0 / PT_PER_MM)).round()
    }
}

/// 不超过 `value` 的最大 1/2/5 × 10^k
pub fn nice_distance(value: f64) -> f64 {
    if !(value > 0.0) || !value.is_finite() {
        return 0.0;
    }
    let magnitude = 10f64.powf(value.log10().floor());
    let leading = value / magnitude;
    let step = if leading >= 5.0 {
        5.0
    } else if leading >= 2.0 {
        2.0
    } else {
        1.0
    };
    step * magnitude
}

// ---------------------------------------------------------------------------
// 内容流
// ---------------------------------------------------------------------------

/// 内容流构建器
struct Canvas {
    ops: String,
}

impl Canvas {
    fn new() -> Self {
        Self { ops: String::new() }
    }

    fn op(&mut self, op: &str) -> std::fmt::Result {
        writeln!(self.ops, "{}", op)
    }

    fn fill_color(&mut self, c: Color) -> std::fmt::Result {
        let [r, g, b] = c.to_unit_rgb();
        writeln!(self.ops, "{:.3} {:.3} {:.3} rg", r, g, b)
    }

    fn stroke_color(&mut self, c: Color) -> std::fmt::Result {
        let [r, g, b] = c.to_unit_rgb();
        writeln!(self.ops, "{:.3} {:.3} {:.3} RG", r, g, b)
    }

    fn line_width(&mut self, w: f64) -> std::fmt::Result {
        writeln!(self.ops, "{} w", num(w))
    }

    fn path(&mut self, points: &[(f64, f64)], close: bool) -> std::fmt::Result {
        for (i, (x, y)) in points.iter().enumerate() {
            let op = if i == 0 { "m" } else { "l" };
            writeln!(self.ops, "{} {} {}", num(*x), num(*y), op)?;
        }
        if close {
            self.op("h")?;
        }
        Ok(())
    }

    fn rect(&mut self, r: &Rect) -> std::fmt::Result {
        writeln!(self.ops, "{} {} {} {} re", num(r.x), num(r.y), num(r.w), num(r.h))
    }

    fn circle(&mut self, cx: f64, cy: f64, r: f64) -> std::fmt::Result {
        let k = 0.552_284_749_8 * r;
        writeln!(self.ops, "{} {} m", num(cx + r), num(cy))?;
        let arcs = [
            [(cx + r, cy + k), (cx + k, cy + r), (cx, cy + r)],
            [(cx - k, cy + r), (cx - r, cy + k), (cx - r, cy)],
            [(cx - r, cy - k), (cx - k, cy - r), (cx, cy - r)],
            [(cx + k, cy - r), (cx + r, cy - k), (cx + r, cy)],
        ];
        for [a, b, c] in arcs {
            writeln!(
                self.ops,
                "{} {} {} {} {} {} c",
                num(a.0),
                num(a.1),
                num(b.0),
                num(b.1),
                num(c.0),
                num(c.1)
            )?;
        }
        Ok(())
    }

    fn text(&mut self, font: &str, size: f64, x: f64, y: f64, s: &str) -> std::fmt::Result {
        writeln!(
            self.ops,
            "BT /{} {} Tf {} {} Td {} Tj ET",
            font,
            num(size),
            num(x),
            num(y),
            pdf_string(s)
        )
    }
}

/// 总图绘制
struct PlanSheet<'a> {
    site: &'a SiteDocument,
    layout: SheetLayout,
    map: MapTransform,
    canvas: Canvas,
    report: FeatureReport,
}

impl<'a> PlanSheet<'a> {
    fn new(site: &'a SiteDocument) -> Self {
        let opts = site.options();
        let layout = SheetLayout::new(&opts.page, opts.show_legend);
        let map = MapTransform::fit(&layout.viewport, site.manifest.radius_m);
        Self {
            site,
            layout,
            map,
            canvas: Canvas::new(),
            report: FeatureReport::new(ExportFormat::Plan),
        }
    }

    fn project(&self, points: &[Point2]) -> Vec<(f64, f64)> {
        points.iter().map(|p| self.map.apply(p)).collect()
    }

    fn draw(&mut self) -> Result<(), ExportError> {
        self.draw_title()?;
        self.draw_map()?;
        let opts = self.site.options();
        if opts.show_north_arrow {
            self.draw_north_arrow()?;
        }
        if opts.show_scale_bar {
            self.draw_scale_bar()?;
        }
        if opts.show_legend {
            self.draw_legend()?;
        }
        Ok(())
    }

    fn draw_title(&mut self) -> std::fmt::Result {
        let m = &self.site.manifest;
        let t = self.layout.title;
        let subtitle = format!(
            "Center {:.5}, {:.5} | Radius {} m | {}",
            m.center_lat,
            m.center_lng,
            m.radius_m,
            m.generated_at.format("%Y-%m-%d")
        );
        self.canvas.fill_color(Color::BLACK)?;
        self.canvas.text("F2", 20.0, t.x, t.y + 28.0, &m.site_name)?;
        self.canvas.text("F1", 10.0, t.x, t.y + 10.0, &subtitle)?;
        self.canvas.stroke_color(Color::BLACK)?;
        self.canvas.line_width(0.8)?;
        self.canvas.path(&[(t.x, t.y), (t.right(), t.y)], false)?;
        self.canvas.op("S")
    }

    fn draw_map(&mut self) -> Result<(), ExportError> {
        let vp = self.layout.viewport;
        self.canvas.op("q")?;
        self.canvas.rect(&vp)?;
        self.canvas.op("W n")?;

        self.draw_landuse()?;
        self.draw_contours()?;
        self.draw_roads()?;
        self.draw_buildings()?;

        let (cx, cy) = self.map.apply(&Point2::origin());
        let r = self.site.manifest.radius_m * self.map.scale;
        self.canvas.stroke_color(Color::BOUNDARY)?;
        self.canvas.line_width(LineWeight::BOLD.to_points() * 2.0)?;
        self.canvas.op("[6 3] 0 d")?;
        self.canvas.circle(cx, cy, r)?;
        self.canvas.op("S")?;
        self.canvas.op("[] 0 d")?;
        self.canvas.op("Q")?;

        self.canvas.stroke_color(Color::BLACK)?;
        self.canvas.line_width(0.5)?;
        self.canvas.rect(&vp)?;
        self.canvas.op("S")?;
        Ok(())
    }

    fn draw_landuse(&mut self) -> Result<(), ExportError> {
        let site = self.site;
        self.canvas.fill_color(Color::LANDUSE)?;
        for feature in &site.features.landuse {
            let ring = match &feature.geometry {
                FeatureGeometry::Polygon(_) => Footprint::from_ring(&site.local_points(feature)),
                other => Err(GeometryError::UnsupportedGeometry {
                    expected: "Polygon",
                    found: other.type_name(),
                }),
            };
            match ring {
                Ok(ring) => {
                    let pts = self.project(ring.vertices());
                    self.canvas.path(&pts, true)?;
                    self.canvas.op("f")?;
                    self.report.ok(&feature.id);
                }
                Err(e) => self.report.skip(SiteLayer::Landuse, &feature.id, e),
            }
        }
        Ok(())
    }

    fn draw_contours(&mut self) -> std::fmt::Result {
        let site = self.site;
        self.canvas.stroke_color(Color::CONTOUR)?;
        for line in &site.contours {
            let width = if site.is_index_contour(line) {
                LineWeight::NORMAL.to_points()
            } else {
                LineWeight::THIN.to_points()
            };
            self.canvas.line_width(width)?;
            for polyline in site.contour_local(line) {
                if polyline.len() < 2 {
                    continue;
                }
                let pts = self.project(&polyline);
                self.canvas.path(&pts, false)?;
                self.canvas.op("S")?;
            }
        }
        Ok(())
    }

    fn draw_roads(&mut self) -> std::fmt::Result {
        let site = self.site;
        self.canvas.stroke_color(Color::ROAD)?;
        self.canvas.line_width(LineWeight::BOLD.to_points() * 2.0)?;
        self.canvas.op("1 J 1 j")?;
        for feature in &site.features.roads {
            match &feature.geometry {
                FeatureGeometry::LineString(_) | FeatureGeometry::Polygon(_) => {
                    let pts = self.project(&site.local_points(feature));
                    self.canvas.path(&pts, false)?;
                    self.canvas.op("S")?;
                    self.report.ok(&feature.id);
                }
                FeatureGeometry::Point(_) => {
                    let e = GeometryError::UnsupportedGeometry {
                        expected: "LineString",
                        found: "Point",
                    };
                    self.report.skip(SiteLayer::Roads, &feature.id, e);
                }
            }
        }
        self.canvas.op("0 J 0 j")
    }

    fn draw_buildings(&mut self) -> std::fmt::Result {
        let site = self.site;
        self.canvas.fill_color(Color::BUILDING)?;
        self.canvas.stroke_color(Color::GRAY)?;
        self.canvas.line_width(LineWeight::NORMAL.to_points())?;
        for feature in &site.features.buildings {
            match site.building(feature) {
                Ok(b) => {
                    let pts = self.project(b.footprint.vertices());
                    self.canvas.path(&pts, true)?;
                    self.canvas.op("B")?;
                    self.report.ok(&feature.id);
                }
                Err(e) => self.report.skip(SiteLayer::Buildings, &feature.id, e),
            }
        }
        Ok(())
    }

    fn draw_north_arrow(&mut self) -> std::fmt::Result {
        let vp = self.layout.viewport;
        let (x, y) = (vp.right() - 30.0, vp.top() - 48.0);
        let tip = (x, y + 24.0);
        let left = (x - 9.0, y - 12.0);
        let notch = (x, y - 4.0);
        let right = (x + 9.0, y - 12.0);

        self.canvas.fill_color(Color::BLACK)?;
        self.canvas.path(&[tip, left, notch], true)?;
        self.canvas.op("f")?;
        self.canvas.stroke_color(Color::BLACK)?;
        self.canvas.line_width(0.8)?;
        self.canvas.path(&[tip, left, notch, right], true)?;
        self.canvas.op("S")?;
        self.canvas.text("F2", 12.0, x - 4.3, tip.1 + 5.0, "N")
    }

    fn draw_scale_bar(&mut self) -> std::fmt::Result {
        let vp = self.layout.viewport;
        let unit = self.site.units();
        let units_per_point = unit.from_meters(self.map.meters_per_point());
        let length = nice_distance(vp.w / 4.0 * units_per_point);
        if length <= 0.0 {
            return Ok(());
        }
        let bar = length / units_per_point;
        let (x, y) = (vp.x + 20.0, vp.y + 20.0);
        let segment = bar / 4.0;

        self.canvas.stroke_color(Color::BLACK)?;
        self.canvas.line_width(0.5)?;
        for i in 0..4 {
            let fill = if i % 2 == 0 { Color::BLACK } else { Color::WHITE };
            self.canvas.fill_color(fill)?;
            self.canvas.rect(&Rect {
                x: x + segment * i as f64,
                y,
                w: segment,
                h: 5.0,
            })?;
            self.canvas.op("B")?;
        }
        self.canvas.fill_color(Color::BLACK)?;
        self.canvas.text("F1", 8.0, x - 2.0, y + 9.0, "0")?;
        let label = format!("{} {}", length, unit.symbol());
        self.canvas.text("F1", 8.0, x + bar - 8.0, y + 9.0, &label)
    }

    fn draw_legend(&mut self) -> std::fmt::Result {
        let Some(area) = self.layout.legend else {
            return Ok(());
        };
        let (x, mut y) = (area.x + 8.0, area.top() - 20.0);

        self.canvas.fill_color(Color::BLACK)?;
        self.canvas.text("F2", 12.0, x, y, "Legend")?;
        y -= 22.0;

        let entries: [(SiteLayer, &str, bool); 5] = [
            (SiteLayer::Buildings, "Buildings", true),
            (SiteLayer::Roads, "Roads", false),
            (SiteLayer::Landuse, "Land use", true),
            (SiteLayer::Contours, "Contours", false),
            (SiteLayer::Boundary, "Area of interest", false),
        ];
        for (layer, label, filled) in entries {
            let style = layer.layer();
            if filled {
                self.canvas.fill_color(style.color)?;
                self.canvas.stroke_color(Color::GRAY)?;
                self.canvas.line_width(0.5)?;
                self.canvas.rect(&Rect { x, y: y - 2.0, w: 18.0, h: 10.0 })?;
                self.canvas.op("B")?;
            } else {
                self.canvas.stroke_color(style.color)?;
                self.canvas.line_width(style.line_weight.to_points() * 2.0)?;
                self.canvas.path(&[(x, y + 3.0), (x + 18.0, y + 3.0)], false)?;
                self.canvas.op("S")?;
            }
            self.canvas.fill_color(Color::BLACK)?;
            self.canvas.text("F1", 9.0, x + 26.0, y, label)?;
            y -= 18.0;
        }

        y -= 10.0;
        let opts = self.site.options();
        let notes = [
            format!("Scale 1:{}", self.map.ratio()),
            format!("Units: {}", self.site.units()),
            format!("Contour interval: {} m", opts.contour_interval_m),
        ];
        for note in notes {
            self.canvas.text("F1", 8.0, x, y, &note)?;
            y -= 12.0;
        }
        Ok(())
    }
}

/// PDF 导出器
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfExporter;

impl Encoder for PdfExporter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Plan
    }

    fn encode(&self, site: &SiteDocument) -> Result<Encoded, ExportError> {
        self.export(site)
    }
}

impl PdfExporter {
    pub fn export(&self, site: &SiteDocument) -> Result<Encoded, ExportError> {
        let mut sheet = PlanSheet::new(site);
        sheet.draw()?;
        let (page_w, page_h) = sheet.layout.page;
        let content = sheet.canvas.ops;
        let features = sheet.report.finish();

        let mut doc = PdfDocument::new();
        let regular = doc.add("<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>");
        let bold = doc.add("<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Bold /Encoding /WinAnsiEncoding >>");
        let pages = doc.reserve();
        let contents = doc.add_stream("", content.as_bytes(), site.options().compress_pdf_streams)?;
        let page = doc.add(format!(
            "<< /Type /Page /Parent {} /MediaBox [0 0 {} {}] /Resources << /Font << /F1 {} /F2 {} >> >> /Contents {} >>",
            pages,
            num(page_w),
            num(page_h),
            regular,
            bold,
            contents
        ));
        doc.set(pages, format!("<< /Type /Pages /Kids [{}] /Count 1 >>", page));
        let catalog = doc.add(format!("<< /Type /Catalog /Pages {} >>", pages));
        let info = doc.add(format!(
            "<< /Title {} /Producer {} /Creator (sitecad) /CreationDate {} >>",
            pdf_string(&site.manifest.site_name),
            pdf_string(&site.metadata.producer),
            pdf_string(&site.metadata.generated_at.format("D:%Y%m%d%H%M%SZ").to_string())
        ));
        let bytes = doc.finish(catalog, Some(info))?;

        debug!(
            content = content.len(),
            bytes = bytes.len(),
            "PDF written"
        );
        Ok(Encoded::single(
            OutputArtifact::new(ExportFormat::Plan.path(), bytes),
            features,
        ))
    }
}
