use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::mpsc;

use egui::epaint;
use egui::{Color32, ColorImage, Pos2, Rect, Rounding, Shape, Stroke, TextureHandle, TextureOptions, Vec2};

use crate::grid::{CellCoord, GridState, OwnershipRecord};
use crate::selection::SelectionController;
use crate::theme::{GridPalette, ThemeMode};

/// Base cell size is capped here; zoom can push the on-screen size higher.
const MAX_BASE_CELL_PX: f32 = 20.0;
/// Base cell size never drops below this, whatever the container size.
const MIN_BASE_CELL_PX: f32 = 4.0;
/// Grid lines are only drawn above this on-screen cell size.
const GRID_LINE_MIN_CELL_PX: f32 = 20.0;
/// Below this on-screen cell size, per-cell selection outlines are noise.
const OUTLINE_MIN_CELL_PX: f32 = 6.0;
/// Above this on-screen cell size, owned-region images get rounded corners.
const ROUNDED_CLIP_MIN_CELL_PX: f32 = 12.0;

/// Base cell size in pixels for a container, before zoom:
/// `floor(min(cw/gw, ch/gh, 20))`, clamped to a minimum of 4. Recomputed
/// whenever the container resizes.
pub fn base_cell_px(container: Vec2, grid_w: u32, grid_h: u32) -> f32 {
    let fit = (container.x / grid_w as f32)
        .min(container.y / grid_h as f32)
        .min(MAX_BASE_CELL_PX);
    fit.floor().max(MIN_BASE_CELL_PX)
}

// ============================================================================
// VIEW TRANSFORM + COORDINATE MAPPER
// ============================================================================

/// Pan offset (pixels) and zoom scalar. Purely a rendering concern — grid
/// semantics never depend on it, and it is never persisted.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewTransform {
    pub zoom: f32,
    /// Screen offset of grid cell (0,0)'s top-left corner from the canvas
    /// origin (the canvas rect's min corner).
    pub pan_offset: Vec2,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self { zoom: 1.0, pan_offset: Vec2::ZERO }
    }
}

impl ViewTransform {
    /// Centre the grid in a container. Called once the container dimensions
    /// and base cell size are first known, and again on explicit reset.
    pub fn centered(container: Vec2, base: f32, grid_w: u32, grid_h: u32) -> Self {
        let grid_px = Vec2::new(grid_w as f32 * base, grid_h as f32 * base);
        Self {
            zoom: 1.0,
            pan_offset: (container - grid_px) * 0.5,
        }
    }

    /// On-screen cell size for a given base cell size.
    pub fn cell_px(&self, base: f32) -> f32 {
        base * self.zoom
    }

    /// Map a pointer position (client/screen space) to a grid cell, or
    /// `None` when the pointer is outside the grid. Pure; mouse and touch
    /// both normalise to a position first.
    pub fn screen_to_cell(
        &self,
        pos: Pos2,
        canvas_rect: Rect,
        base: f32,
        grid_w: u32,
        grid_h: u32,
    ) -> Option<CellCoord> {
        let cell = self.cell_px(base);
        let local = pos - canvas_rect.min - self.pan_offset;
        if local.x < 0.0 || local.y < 0.0 {
            return None;
        }
        let x = (local.x / cell).floor();
        let y = (local.y / cell).floor();
        if x < grid_w as f32 && y < grid_h as f32 {
            Some(CellCoord::new(x as u32, y as u32))
        } else {
            None
        }
    }

    /// Screen rectangle of one cell.
    pub fn cell_rect(&self, c: CellCoord, canvas_rect: Rect, base: f32) -> Rect {
        let cell = self.cell_px(base);
        let min = canvas_rect.min
            + self.pan_offset
            + Vec2::new(c.x as f32 * cell, c.y as f32 * cell);
        Rect::from_min_size(min, Vec2::splat(cell))
    }

    /// Screen rectangle of a whole region.
    pub fn region_rect(&self, r: &crate::grid::Region, canvas_rect: Rect, base: f32) -> Rect {
        let cell = self.cell_px(base);
        let min = canvas_rect.min
            + self.pan_offset
            + Vec2::new(r.start_x as f32 * cell, r.start_y as f32 * cell);
        Rect::from_min_size(min, Vec2::new(r.width() as f32 * cell, r.height() as f32 * cell))
    }

    /// Inclusive-exclusive cell index range intersecting the viewport.
    /// Bounds redraw cost by what is visible, independent of grid size.
    pub fn visible_cells(
        &self,
        canvas_rect: Rect,
        base: f32,
        grid_w: u32,
        grid_h: u32,
    ) -> (u32, u32, u32, u32) {
        let cell = self.cell_px(base);
        let x0 = ((-self.pan_offset.x) / cell).floor().max(0.0) as u32;
        let y0 = ((-self.pan_offset.y) / cell).floor().max(0.0) as u32;
        let x1 = (((canvas_rect.width() - self.pan_offset.x) / cell).ceil().max(0.0) as u32)
            .min(grid_w);
        let y1 = (((canvas_rect.height() - self.pan_offset.y) / cell).ceil().max(0.0) as u32)
            .min(grid_h);
        (x0.min(x1), y0.min(y1), x1, y1)
    }

    /// Zoom by `factor`, keeping the grid point under `anchor` fixed on
    /// screen.
    pub fn zoom_around(&mut self, factor: f32, anchor: Pos2, canvas_rect: Rect) {
        let old_zoom = self.zoom;
        self.zoom = (self.zoom * factor).clamp(0.1, 50.0);
        let actual = self.zoom / old_zoom;
        // A grid point g sits at screen = origin + pan + g·cell. Holding the
        // anchor's screen position fixed across the zoom change gives:
        let a = anchor - canvas_rect.min;
        self.pan_offset = a - (a - self.pan_offset) * actual;
    }
}

// ============================================================================
// IMAGE CACHE — at-most-once fetch per distinct URL
// ============================================================================

enum ImageState {
    /// Fetch in flight (or queued) on the worker runtime.
    Loading,
    Ready(TextureHandle),
    /// Fetch or decode failed; the placeholder fill stays. No auto-retry.
    Failed,
}

/// Process-wide cache of owned-region ad images keyed by URL. Each distinct
/// URL is fetched at most once; completions arrive over a channel and are
/// drained on the UI thread each frame.
pub struct ImageCache {
    entries: HashMap<String, ImageState>,
    sender: mpsc::Sender<(String, Result<ColorImage, String>)>,
    receiver: mpsc::Receiver<(String, Result<ColorImage, String>)>,
    http: reqwest::Client,
    /// Bumped whenever an entry changes state — part of the renderer's
    /// rebuild signature.
    generation: u64,
}

impl ImageCache {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            entries: HashMap::new(),
            sender,
            receiver,
            http: reqwest::Client::new(),
            generation: 0,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn texture(&self, url: &str) -> Option<&TextureHandle> {
        match self.entries.get(url) {
            Some(ImageState::Ready(tex)) => Some(tex),
            _ => None,
        }
    }

    /// Start fetching `url` unless it is already loading, loaded or failed.
    pub fn request(&mut self, handle: &tokio::runtime::Handle, url: &str) {
        if self.entries.contains_key(url) {
            return;
        }
        self.entries.insert(url.to_string(), ImageState::Loading);
        self.generation += 1;

        let sender = self.sender.clone();
        let http = self.http.clone();
        let url = url.to_string();
        handle.spawn(async move {
            let result = fetch_and_decode(&http, &url).await;
            let _ = sender.send((url, result));
        });
    }

    #[cfg(test)]
    fn insert_ready(&mut self, url: &str, tex: TextureHandle) {
        self.entries.insert(url.to_string(), ImageState::Ready(tex));
        self.generation += 1;
    }

    /// Drain completed fetches into textures. Returns `true` when anything
    /// changed (the caller then requests a repaint).
    pub fn poll(&mut self, ctx: &egui::Context) -> bool {
        let mut changed = false;
        while let Ok((url, result)) = self.receiver.try_recv() {
            let state = match result {
                Ok(color_image) => {
                    let tex = ctx.load_texture(
                        format!("ad:{}", url),
                        color_image,
                        TextureOptions::default(),
                    );
                    ImageState::Ready(tex)
                }
                Err(e) => {
                    log_warn!("Ad image fetch failed for {}: {}", url, e);
                    ImageState::Failed
                }
            };
            self.entries.insert(url, state);
            self.generation += 1;
            changed = true;
        }
        changed
    }
}

async fn fetch_and_decode(http: &reqwest::Client, url: &str) -> Result<ColorImage, String> {
    let resp = http.get(url).send().await.map_err(|e| e.to_string())?;
    if !resp.status().is_success() {
        return Err(format!("HTTP {}", resp.status()));
    }
    let bytes = resp.bytes().await.map_err(|e| e.to_string())?;
    let img = image::load_from_memory(&bytes)
        .map_err(|e| e.to_string())?
        .into_rgba8();
    let (w, h) = img.dimensions();
    Ok(ColorImage::from_rgba_unmultiplied(
        [w as usize, h as usize],
        img.as_raw(),
    ))
}

// ============================================================================
// GRID CANVAS — input handling + batched renderer
// ============================================================================

/// What the canvas reports back to the app after a frame.
#[derive(Default)]
pub struct CanvasResponse {
    /// An owned cell was clicked — the covering record, for the info panel.
    pub inspect_record: Option<OwnershipRecord>,
}

/// Everything the renderer reads. The rebuild signature is derived from this
/// (plus the image-cache generation): identical inputs → the cached batch is
/// re-issued without any rebuild work.
struct DrawInput<'a> {
    canvas_rect: Rect,
    base: f32,
    view: ViewTransform,
    grid: &'a GridState,
    palette: GridPalette,
    theme: ThemeMode,
}

impl DrawInput<'_> {
    fn signature(&self, image_generation: u64) -> u64 {
        let mut h = DefaultHasher::new();
        self.canvas_rect.min.x.to_bits().hash(&mut h);
        self.canvas_rect.min.y.to_bits().hash(&mut h);
        self.canvas_rect.max.x.to_bits().hash(&mut h);
        self.canvas_rect.max.y.to_bits().hash(&mut h);
        self.base.to_bits().hash(&mut h);
        self.view.zoom.to_bits().hash(&mut h);
        self.view.pan_offset.x.to_bits().hash(&mut h);
        self.view.pan_offset.y.to_bits().hash(&mut h);
        (self.grid.width, self.grid.height).hash(&mut h);
        self.grid.records().len().hash(&mut h);
        self.grid.hovered.hash(&mut h);
        (self.theme == ThemeMode::Dark).hash(&mut h);
        // Order-independent selection digest: XOR of per-cell hashes, so the
        // HashSet's iteration order cannot produce spurious rebuilds.
        let sel_digest = self
            .grid
            .selected
            .iter()
            .fold(0u64, |acc, c| {
                let mut ch = DefaultHasher::new();
                c.hash(&mut ch);
                acc ^ ch.finish()
            });
        sel_digest.hash(&mut h);
        self.grid.selected.len().hash(&mut h);
        image_generation.hash(&mut h);
        h.finish()
    }
}

pub struct GridCanvas {
    pub view: ViewTransform,
    view_initialized: bool,
    /// Container size the base cell size was last computed for.
    last_container: Vec2,
    base: f32,

    images: ImageCache,
    /// Two-finger gesture active last frame (for pinch begin/end edges).
    pinch_was_active: bool,

    last_signature: Option<u64>,
    cached_shapes: Vec<Shape>,
    /// Number of actual batch rebuilds since launch (shown in the debug
    /// footer; also what the suppression tests count).
    rebuild_count: u64,
}

impl GridCanvas {
    pub fn new() -> Self {
        Self {
            view: ViewTransform::default(),
            view_initialized: false,
            last_container: Vec2::ZERO,
            base: MIN_BASE_CELL_PX,
            images: ImageCache::new(),
            pinch_was_active: false,
            last_signature: None,
            cached_shapes: Vec::new(),
            rebuild_count: 0,
        }
    }

    pub fn rebuild_count(&self) -> u64 {
        self.rebuild_count
    }

    pub fn reset_view(&mut self) {
        self.view_initialized = false;
        self.last_signature = None;
    }

    /// Drain finished image fetches; repaint if anything became ready.
    pub fn poll_images(&mut self, ctx: &egui::Context) {
        if self.images.poll(ctx) {
            ctx.request_repaint();
        }
    }

    /// Handle input and draw one frame. `runtime` is the worker runtime used
    /// for image fetches.
    pub fn show(
        &mut self,
        ui: &mut egui::Ui,
        grid: &mut GridState,
        controller: &mut SelectionController,
        palette: &GridPalette,
        theme: ThemeMode,
        runtime: &tokio::runtime::Handle,
    ) -> CanvasResponse {
        let mut out = CanvasResponse::default();
        let available = ui.available_size();
        let sense = egui::Sense::click_and_drag().union(egui::Sense::hover());
        let (response, painter) = ui.allocate_painter(available, sense);
        let canvas_rect = response.rect;

        // Base cell size follows the container; a resize recomputes it and
        // re-centres an uninitialised view.
        if (canvas_rect.size() - self.last_container).length() > 0.5 {
            self.last_container = canvas_rect.size();
            self.base = base_cell_px(canvas_rect.size(), grid.width, grid.height);
        }
        if !self.view_initialized && canvas_rect.width() > 0.0 {
            self.view = ViewTransform::centered(canvas_rect.size(), self.base, grid.width, grid.height);
            self.view_initialized = true;
        }

        self.handle_input(ui, &response, canvas_rect, grid, controller, &mut out);

        let input = DrawInput {
            canvas_rect,
            base: self.base,
            view: self.view,
            grid,
            palette: *palette,
            theme,
        };
        self.rebuild_if_changed(&input, Some(runtime));
        painter.extend(self.cached_shapes.clone());

        out
    }

    // ---- input ------------------------------------------------------------

    fn handle_input(
        &mut self,
        ui: &mut egui::Ui,
        response: &egui::Response,
        canvas_rect: Rect,
        grid: &mut GridState,
        controller: &mut SelectionController,
        out: &mut CanvasResponse,
    ) {
        let pointer = response.hover_pos();
        // Frame-start view copy: gesture handling below may mutate the live
        // view, but all of this frame's hit-testing uses one transform.
        let (view, base) = (self.view, self.base);
        let (grid_w, grid_h) = (grid.width, grid.height);
        let cell_at = move |pos: Pos2| view.screen_to_cell(pos, canvas_rect, base, grid_w, grid_h);

        // Two-finger pinch: zoom anchored at the gesture centre, selection
        // suppressed for the whole gesture.
        let multi_touch = ui.input(|i| i.multi_touch());
        if let Some(touch) = multi_touch {
            if !self.pinch_was_active {
                controller.on_pinch_begin();
                self.pinch_was_active = true;
            }
            if (touch.zoom_delta - 1.0).abs() > 1e-4 {
                self.view.zoom_around(touch.zoom_delta, touch.start_pos, canvas_rect);
            }
        } else if self.pinch_was_active {
            controller.on_pinch_end();
            self.pinch_was_active = false;
        }

        // Scroll-wheel zoom, anchored under the pointer.
        if response.hovered() {
            let scroll = ui.input(|i| i.scroll_delta.y);
            if scroll != 0.0
                && let Some(pos) = pointer
            {
                let factor = 1.0 + scroll * 0.005;
                self.view.zoom_around(factor, pos, canvas_rect);
            }
        }

        // Middle-drag pans; the primary button is reserved for selection.
        if response.dragged() && ui.input(|i| i.pointer.middle_down()) {
            self.view.pan_offset += response.drag_delta();
        }

        // Hover feedback (visual only).
        grid.hovered = pointer.and_then(cell_at);

        // Selection gestures, mouse or single touch.
        let primary_down = ui.input(|i| i.pointer.primary_down());
        let extend = ui.input(|i| i.modifiers.shift || i.modifiers.command);
        if response.drag_started() && primary_down {
            if let Some(cell) = pointer.and_then(cell_at) {
                if grid.is_owned(cell) {
                    // Pressing an owned cell never starts a drag; a click on
                    // it opens the record inspector instead.
                    if let Some(rec) = grid.record_at(cell) {
                        out.inspect_record = Some(rec.clone());
                    }
                } else {
                    controller.on_press(grid, cell, extend);
                }
            }
        } else if response.dragged() && primary_down {
            if let Some(cell) = pointer.and_then(cell_at) {
                controller.on_move(grid, cell);
            }
        } else if response.drag_released() {
            controller.on_release();
        }
        if !response.hovered() && controller.is_dragging() {
            controller.on_pointer_leave();
        }

        // Plain click on an owned cell (no drag) → inspect.
        if response.clicked()
            && let Some(cell) = pointer.and_then(cell_at)
            && let Some(rec) = grid.record_at(cell)
        {
            out.inspect_record = Some(rec.clone());
        }
    }

    // ---- rendering ---------------------------------------------------------

    /// Rebuild the shape batch if and only if the inputs changed since the
    /// last frame. Returns `true` when a rebuild actually happened.
    fn rebuild_if_changed(&mut self, input: &DrawInput, runtime: Option<&tokio::runtime::Handle>) -> bool {
        let signature = input.signature(self.images.generation());
        if self.last_signature == Some(signature) {
            return false;
        }
        self.last_signature = Some(signature);
        self.rebuild_count += 1;

        let (shapes, missing) = build_shapes(input, &self.images);
        self.cached_shapes = shapes;
        if let Some(handle) = runtime {
            for url in missing {
                self.images.request(handle, &url);
            }
        }
        true
    }

    #[cfg(test)]
    fn rebuild_for_test(&mut self, input: &DrawInput) -> bool {
        self.rebuild_if_changed(input, None)
    }
}

/// Build the full shape batch for one frame. Pure with respect to the cache:
/// URLs that still need fetching are returned, not requested.
fn build_shapes(input: &DrawInput, images: &ImageCache) -> (Vec<Shape>, Vec<String>) {
    let DrawInput { canvas_rect, base, view, grid, palette, .. } = input;
    let cell = view.cell_px(*base);
    let mut shapes = Vec::new();
    let mut missing = Vec::new();

    shapes.push(Shape::rect_filled(*canvas_rect, Rounding::ZERO, palette.background));

    let (x0, y0, x1, y1) = view.visible_cells(*canvas_rect, *base, grid.width, grid.height);
    if x0 >= x1 || y0 >= y1 {
        return (shapes, missing);
    }

    // Available cells are the overwhelming majority: one fill for the whole
    // visible grid area, with every other colour group layered on top. This
    // keeps the batch at one shape per colour group instead of one per cell.
    let visible_region = crate::grid::Region {
        start_x: x0,
        start_y: y0,
        end_x: x1 - 1,
        end_y: y1 - 1,
    };
    shapes.push(Shape::rect_filled(
        view.region_rect(&visible_region, *canvas_rect, *base),
        Rounding::ZERO,
        palette.available,
    ));

    // Selected cells, one batched mesh.
    let mut selected_mesh = egui::Mesh::default();
    for c in &grid.selected {
        if c.x >= x0 && c.x < x1 && c.y >= y0 && c.y < y1 {
            selected_mesh.add_colored_rect(view.cell_rect(*c, *canvas_rect, *base), palette.selected);
        }
    }
    if !selected_mesh.is_empty() {
        shapes.push(Shape::mesh(selected_mesh));
    }

    // Hovered cell fill (skipped when it is already selected — the selection
    // colour stays put and only the outline differs).
    if let Some(hov) = grid.hovered
        && !grid.selected.contains(&hov)
        && !grid.is_owned(hov)
        && hov.x >= x0 && hov.x < x1 && hov.y >= y0 && hov.y < y1
    {
        shapes.push(Shape::rect_filled(
            view.cell_rect(hov, *canvas_rect, *base),
            Rounding::ZERO,
            palette.hovered,
        ));
    }

    // Owned regions: image per record, placeholder fill while loading,
    // rounded corners + border once cells are big enough to read.
    let rounding = if cell >= ROUNDED_CLIP_MIN_CELL_PX {
        Rounding::same((cell * 0.15).min(6.0))
    } else {
        Rounding::ZERO
    };
    for rec in grid.records() {
        if !rec.region.overlaps(&visible_region) {
            continue;
        }
        let rect = view.region_rect(&rec.region, *canvas_rect, *base);
        match images.texture(&rec.image_url) {
            Some(tex) => {
                // Textured RectShape instead of Shape::image: the painter has
                // no per-shape clip, this is what clips the ad image to the
                // rounded corners.
                let mut image = epaint::RectShape::new(rect, rounding, Color32::WHITE, Stroke::NONE);
                image.fill_texture_id = tex.id();
                image.uv = Rect::from_min_max(Pos2::new(0.0, 0.0), Pos2::new(1.0, 1.0));
                shapes.push(Shape::Rect(image));
            }
            None => {
                shapes.push(Shape::rect_filled(rect, rounding, palette.sold_placeholder));
                missing.push(rec.image_url.clone());
            }
        }
        shapes.push(Shape::rect_stroke(
            rect,
            rounding,
            Stroke::new(1.0, palette.region_border),
        ));
    }

    // Grid lines only above the zoom threshold — an optimisation for the
    // zoomed-out view, not a correctness requirement.
    if cell > GRID_LINE_MIN_CELL_PX {
        let area = view.region_rect(&visible_region, *canvas_rect, *base);
        let stroke = Stroke::new(1.0, palette.grid_line);
        for gx in x0..=x1 {
            let x = canvas_rect.min.x + view.pan_offset.x + gx as f32 * cell;
            shapes.push(Shape::line_segment(
                [Pos2::new(x, area.min.y), Pos2::new(x, area.max.y)],
                stroke,
            ));
        }
        for gy in y0..=y1 {
            let y = canvas_rect.min.y + view.pan_offset.y + gy as f32 * cell;
            shapes.push(Shape::line_segment(
                [Pos2::new(area.min.x, y), Pos2::new(area.max.x, y)],
                stroke,
            ));
        }
    }

    // Second pass: inset outline on every selected cell, skipped when cells
    // are too small for the outline to be legible.
    if cell >= OUTLINE_MIN_CELL_PX {
        let stroke = Stroke::new(1.0, palette.accent);
        for c in &grid.selected {
            if c.x >= x0 && c.x < x1 && c.y >= y0 && c.y < y1 {
                let rect = view.cell_rect(*c, *canvas_rect, *base).shrink(1.0);
                shapes.push(Shape::rect_stroke(rect, Rounding::ZERO, stroke));
            }
        }

        // Hover outline, skipped if the hovered cell is already selected.
        if let Some(hov) = grid.hovered
            && !grid.selected.contains(&hov)
        {
            let rect = view.cell_rect(hov, *canvas_rect, *base).shrink(1.0);
            shapes.push(Shape::rect_stroke(rect, Rounding::ZERO, Stroke::new(1.5, palette.accent)));
        }
    }

    (shapes, missing)
}

// ============================================================================
// TESTS
// ============================================================================
