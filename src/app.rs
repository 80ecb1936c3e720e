use std::sync::Arc;
use std::sync::mpsc;

use eframe::egui;
use egui::{Color32, RichText, TextureHandle, TextureOptions};

use crate::canvas::GridCanvas;
use crate::config::AppConfig;
use crate::grid::{GridState, OwnershipRecord};
use crate::mint::{MintEvent, MintOutcome, MintPipeline, MintRequest, MintStep};
use crate::selection::SelectionController;
use crate::services::chain::RpcChainClient;
use crate::services::records::{RestRecordStore, spawn_insert_watcher};
use crate::services::storage::GatewayStorageClient;
use crate::services::{
    ChainClient, GridStats, LAMPORTS_PER_UNIT, RecordStore, ServiceError, StorageClient,
};
use crate::theme::{GridPalette, ThemeMode};

/// Seconds the success panel stays up before the dialog closes itself.
const SUCCESS_CLOSE_SECS: f64 = 2.5;

// ============================================================================
// MINT DIALOG STATE
// ============================================================================

struct PickedImage {
    bytes: Vec<u8>,
    content_type: String,
    preview: TextureHandle,
    dimensions: (u32, u32),
}

/// One Mint Session's UI state. Created when the dialog opens, destroyed on
/// close or shortly after success.
#[derive(Default)]
struct MintDialog {
    open: bool,
    image: Option<PickedImage>,
    link: String,
    /// Step cursor while the pipeline runs.
    step: Option<MintStep>,
    error: Option<String>,
    success: Option<MintOutcome>,
    /// `ui.input(|i| i.time)` when success arrived, for the auto-close.
    success_at: Option<f64>,
    /// Storage-network cost estimate for the picked image, in base units.
    estimate: Option<u64>,
    estimate_rx: Option<mpsc::Receiver<Result<u64, ServiceError>>>,
}

impl MintDialog {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// APPLICATION
// ============================================================================

pub struct MintFEApp {
    config: AppConfig,
    palette: GridPalette,

    grid: GridState,
    canvas: GridCanvas,
    controller: SelectionController,

    // Worker runtime: every network call runs here, results come back over
    // mpsc channels polled each frame.
    runtime: tokio::runtime::Runtime,
    storage: Arc<GatewayStorageClient>,
    records: Arc<RestRecordStore>,
    chain: Option<Arc<RpcChainClient>>,
    wallet_rx: mpsc::Receiver<Result<RpcChainClient, ServiceError>>,
    balance: Option<u64>,
    balance_rx: Option<mpsc::Receiver<Result<u64, ServiceError>>>,

    records_rx: Option<mpsc::Receiver<Result<Vec<OwnershipRecord>, ServiceError>>>,
    insert_rx: mpsc::Receiver<OwnershipRecord>,
    stats: Option<GridStats>,
    stats_rx: Option<mpsc::Receiver<Result<GridStats, ServiceError>>>,

    mint_dialog: MintDialog,
    mint_rx: Option<mpsc::Receiver<MintEvent>>,
    /// At most one mint session in flight — the mint action is disabled
    /// while this is set.
    mint_in_flight: bool,

    /// Record shown in the inspection window (clicked owned cell).
    inspect: Option<OwnershipRecord>,
    status_line: String,
}

impl MintFEApp {
    pub fn new(_cc: &eframe::CreationContext<'_>) -> Self {
        let config = AppConfig::load();
        let palette = GridPalette::for_mode(config.theme_mode);
        let grid = GridState::new(config.grid_width, config.grid_height);

        let runtime = tokio::runtime::Runtime::new().expect("failed to start worker runtime");
        let storage = Arc::new(GatewayStorageClient::new(&config.storage_url));
        let records = Arc::new(RestRecordStore::new(
            &config.records_url,
            &config.records_api_key,
        ));

        // Wallet connect, initial record mirror and stats all start
        // immediately; each reports back over its own channel.
        let (wallet_tx, wallet_rx) = mpsc::channel();
        {
            let (rpc, wallet) = (config.rpc_url.clone(), config.wallet_url.clone());
            runtime.spawn(async move {
                let _ = wallet_tx.send(RpcChainClient::connect(&rpc, &wallet).await);
            });
        }

        let insert_rx = spawn_insert_watcher(
            runtime.handle(),
            records.clone() as Arc<dyn RecordStore>,
            config.records_poll_secs,
        );

        let mut app = Self {
            config,
            palette,
            grid,
            canvas: GridCanvas::new(),
            controller: SelectionController::new(),
            runtime,
            storage,
            records,
            chain: None,
            wallet_rx,
            balance: None,
            balance_rx: None,
            records_rx: None,
            insert_rx,
            stats: None,
            stats_rx: None,
            mint_dialog: MintDialog::default(),
            mint_rx: None,
            mint_in_flight: false,
            inspect: None,
            status_line: "Connecting…".to_string(),
        };
        app.reload_records();
        app.refresh_stats();
        app
    }

    // ---- background requests ----------------------------------------------

    fn reload_records(&mut self) {
        let (tx, rx) = mpsc::channel();
        let records = self.records.clone();
        self.runtime.spawn(async move {
            let _ = tx.send(records.all().await);
        });
        self.records_rx = Some(rx);
    }

    fn refresh_stats(&mut self) {
        let (tx, rx) = mpsc::channel();
        let records = self.records.clone();
        self.runtime.spawn(async move {
            let _ = tx.send(records.stats().await);
        });
        self.stats_rx = Some(rx);
    }

    fn refresh_balance(&mut self) {
        let Some(chain) = &self.chain else { return };
        let Some(address) = chain.address() else { return };
        let (tx, rx) = mpsc::channel();
        let chain = chain.clone();
        self.runtime.spawn(async move {
            let _ = tx.send(chain.get_balance(&address).await);
        });
        self.balance_rx = Some(rx);
    }

    fn spawn_estimate(&mut self, byte_size: u64) {
        let (tx, rx) = mpsc::channel();
        let storage = self.storage.clone();
        self.runtime.spawn(async move {
            let _ = tx.send(storage.estimate_cost(byte_size).await);
        });
        self.mint_dialog.estimate = None;
        self.mint_dialog.estimate_rx = Some(rx);
    }

    /// Kick off the mint pipeline for the current selection and dialog
    /// state. The pipeline owns clones of the service handles; progress and
    /// the terminal event arrive over `mint_rx`.
    fn spawn_mint(&mut self) {
        let Some(region) = self.grid.selection_region() else { return };
        let Some(image) = &self.mint_dialog.image else { return };
        let Some(chain) = self.chain.clone() else { return };

        let request = MintRequest {
            region,
            image_bytes: image.bytes.clone(),
            image_content_type: image.content_type.clone(),
            external_link: if self.mint_dialog.link.trim().is_empty() {
                None
            } else {
                Some(self.mint_dialog.link.trim().to_string())
            },
        };

        log_info!(
            "Mint started: region ({},{})-({},{}), {} bytes",
            region.start_x,
            region.start_y,
            region.end_x,
            region.end_y,
            request.image_bytes.len()
        );

        let (tx, rx) = mpsc::channel();
        let storage = self.storage.clone();
        let records = self.records.clone();
        let config = self.config.clone();
        self.runtime.spawn(async move {
            let pipeline = MintPipeline {
                storage: &*storage,
                chain: &*chain,
                records: &*records,
                config: &config,
            };
            let terminal = match pipeline.run(request, &tx).await {
                Ok(outcome) => MintEvent::Success(outcome),
                Err(e) => MintEvent::Failed(e.to_string()),
            };
            let _ = tx.send(terminal);
        });

        self.mint_rx = Some(rx);
        self.mint_in_flight = true;
        self.mint_dialog.error = None;
        self.mint_dialog.step = Some(MintStep::Uploading);
    }

    fn pick_image(&mut self, ctx: &egui::Context) {
        let Some(path) = rfd::FileDialog::new()
            .add_filter("Images", &["png", "jpg", "jpeg", "webp", "bmp"])
            .pick_file()
        else {
            return;
        };

        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) => {
                self.mint_dialog.error = Some(format!("Cannot read {}: {}", path.display(), e));
                return;
            }
        };
        let decoded = match image::load_from_memory(&bytes) {
            Ok(img) => img.into_rgba8(),
            Err(e) => {
                self.mint_dialog.error = Some(format!("Not a decodable image: {}", e));
                return;
            }
        };
        let (w, h) = decoded.dimensions();
        let preview = ctx.load_texture(
            "mint_preview",
            egui::ColorImage::from_rgba_unmultiplied([w as usize, h as usize], decoded.as_raw()),
            TextureOptions::default(),
        );

        let content_type = match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("jpg") | Some("jpeg") => "image/jpeg",
            Some("webp") => "image/webp",
            Some("bmp") => "image/bmp",
            _ => "image/png",
        };

        let byte_size = bytes.len() as u64;
        self.mint_dialog.image = Some(PickedImage {
            bytes,
            content_type: content_type.to_string(),
            preview,
            dimensions: (w, h),
        });
        self.mint_dialog.error = None;
        self.spawn_estimate(byte_size);
    }

    // ---- channel polling ---------------------------------------------------

    fn poll_channels(&mut self, ctx: &egui::Context) {
        while let Ok(result) = self.wallet_rx.try_recv() {
            match result {
                Ok(client) => {
                    let address = client.address().unwrap_or_default();
                    log_info!("Wallet connected: {}", address);
                    self.status_line = format!("Wallet {}", shorten(&address));
                    self.chain = Some(Arc::new(client));
                    self.refresh_balance();
                }
                Err(e) => {
                    log_warn!("Wallet bridge not reachable: {}", e);
                    self.status_line = "No wallet connected".to_string();
                }
            }
        }

        if let Some(rx) = &self.balance_rx {
            let mut done = false;
            while let Ok(result) = rx.try_recv() {
                done = true;
                match result {
                    Ok(lamports) => self.balance = Some(lamports),
                    Err(e) => log_warn!("Balance query failed: {}", e),
                }
            }
            if done {
                self.balance_rx = None;
            }
        }

        if let Some(rx) = &self.records_rx {
            let mut done = false;
            while let Ok(result) = rx.try_recv() {
                done = true;
                match result {
                    Ok(records) => {
                        let n = records.len();
                        self.grid.reconcile(records);
                        self.status_line = format!("{} regions mirrored", n);
                    }
                    Err(e) => {
                        log_warn!("Record reload failed: {}", e);
                        self.status_line = format!("Record reload failed: {}", e);
                    }
                }
            }
            if done {
                self.records_rx = None;
            }
        }

        // Realtime inserts from the watcher merge straight into the mirror;
        // `add_record` drops duplicates by id.
        let mut inserted = false;
        while let Ok(record) = self.insert_rx.try_recv() {
            self.grid.add_record(record);
            inserted = true;
        }
        if inserted {
            self.refresh_stats();
            ctx.request_repaint();
        }

        if let Some(rx) = &self.stats_rx {
            let mut done = false;
            while let Ok(result) = rx.try_recv() {
                done = true;
                if let Ok(stats) = result {
                    self.stats = Some(stats);
                }
            }
            if done {
                self.stats_rx = None;
            }
        }

        if let Some(rx) = &self.mint_dialog.estimate_rx {
            let mut done = false;
            while let Ok(result) = rx.try_recv() {
                done = true;
                if let Ok(cost) = result {
                    self.mint_dialog.estimate = Some(cost);
                }
            }
            if done {
                self.mint_dialog.estimate_rx = None;
            }
        }

        if let Some(rx) = &self.mint_rx {
            let mut terminal = false;
            let mut events = Vec::new();
            while let Ok(event) = rx.try_recv() {
                events.push(event);
            }
            for event in events {
                match event {
                    MintEvent::Step(step) => self.mint_dialog.step = Some(step),
                    MintEvent::Success(outcome) => {
                        terminal = true;
                        log_info!(
                            "Mint succeeded: asset {}, tx {}",
                            outcome.asset_address,
                            outcome.record.tx_signature
                        );
                        // Mirror the new record locally (optimistic if the
                        // store write failed) and clear the selection.
                        self.grid.add_record(outcome.record.clone());
                        self.grid.clear_selection();
                        self.mint_dialog.step = None;
                        self.mint_dialog.success = Some(outcome);
                        self.mint_dialog.success_at = Some(ctx.input(|i| i.time));
                        self.refresh_stats();
                        self.refresh_balance();
                    }
                    MintEvent::Failed(reason) => {
                        terminal = true;
                        log_err!("Mint failed: {}", reason);
                        self.mint_dialog.step = None;
                        self.mint_dialog.error = Some(reason);
                    }
                }
            }
            if terminal {
                self.mint_rx = None;
                self.mint_in_flight = false;
            } else if self.mint_in_flight {
                // Keep frames coming while the pipeline runs off-thread.
                ctx.request_repaint_after(std::time::Duration::from_millis(100));
            }
        }
    }

    // ---- panels ------------------------------------------------------------

    fn top_bar(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading("MintFE");
                ui.separator();

                match (&self.chain, self.balance) {
                    (Some(chain), balance) => {
                        let address = chain.address().unwrap_or_default();
                        ui.label(format!("Wallet {}", shorten(&address)));
                        if let Some(lamports) = balance {
                            ui.label(format!(
                                "{:.4} ◎",
                                lamports as f64 / LAMPORTS_PER_UNIT as f64
                            ));
                        }
                    }
                    (None, _) => {
                        ui.colored_label(Color32::GRAY, "No wallet");
                    }
                }
                ui.separator();

                if let Some(stats) = self.stats {
                    let total = self.config.grid_width as u64 * self.config.grid_height as u64;
                    ui.label(format!(
                        "{} sold / {} cells · {} owners",
                        stats.total_cells, total, stats.unique_owners
                    ));
                    ui.separator();
                }

                let selected = self.grid.selected.len();
                if selected > 0 {
                    ui.label(format!(
                        "{} cells · {:.3} ◎",
                        selected,
                        self.config.mint_cost(selected as u64)
                    ));
                    if ui.button("Clear").clicked() {
                        self.grid.clear_selection();
                    }
                }

                let can_mint = selected > 0 && self.chain.is_some() && !self.mint_in_flight;
                if ui
                    .add_enabled(can_mint, egui::Button::new("Mint…"))
                    .clicked()
                {
                    self.mint_dialog.reset();
                    self.mint_dialog.open = true;
                }

                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    let next_mode = match self.config.theme_mode {
                        ThemeMode::Light => ThemeMode::Dark,
                        ThemeMode::Dark => ThemeMode::Light,
                    };
                    if ui.button(next_mode.label()).clicked() {
                        self.config.theme_mode = next_mode;
                        self.palette = GridPalette::for_mode(next_mode);
                        self.config.save();
                    }
                    if ui.button("Reset view").clicked() {
                        self.canvas.reset_view();
                    }
                    if ui.button("Reload").clicked() {
                        self.reload_records();
                        self.refresh_stats();
                    }
                });
            });
        });
    }

    fn status_bar(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label(&self.status_line);
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    ui.label(format!("zoom {:.1}×", self.canvas.view.zoom));
                    ui.label(format!("rebuilds {}", self.canvas.rebuild_count()));
                });
            });
        });
    }

    fn mint_dialog_window(&mut self, ctx: &egui::Context) {
        if !self.mint_dialog.open {
            return;
        }

        // Auto-close shortly after success; the session ends either way.
        if let Some(at) = self.mint_dialog.success_at
            && ctx.input(|i| i.time) - at > SUCCESS_CLOSE_SECS
        {
            self.mint_dialog.reset();
            return;
        }

        let mut open = true;
        let mut do_pick = false;
        let mut do_mint = false;

        egui::Window::new("Mint region")
            .open(&mut open)
            .collapsible(false)
            .resizable(false)
            .show(ctx, |ui| {
                if let Some(outcome) = &self.mint_dialog.success {
                    ui.colored_label(Color32::from_rgb(46, 160, 67), "Mint successful");
                    ui.label(format!("Asset {}", outcome.asset_address));
                    ui.label(format!("Tx {}", shorten(&outcome.record.tx_signature)));
                    if !outcome.persisted {
                        ui.colored_label(
                            Color32::GOLD,
                            "Record sync pending — the asset is on chain",
                        );
                    }
                    return;
                }

                if let Some(region) = self.grid.selection_region() {
                    ui.label(format!(
                        "Region ({},{}) to ({},{}) — {} cells, {:.3} ◎ + fees",
                        region.start_x,
                        region.start_y,
                        region.end_x,
                        region.end_y,
                        self.grid.selected.len(),
                        self.grid.selected.len() as f64 * self.config.price_per_cell,
                    ));
                }
                ui.separator();

                match &self.mint_dialog.image {
                    Some(img) => {
                        let (w, h) = img.dimensions;
                        let scale = (160.0 / w.max(h) as f32).min(1.0);
                        ui.image((
                            img.preview.id(),
                            egui::Vec2::new(w as f32 * scale, h as f32 * scale),
                        ));
                        ui.horizontal(|ui| {
                            ui.label(format!("{}×{} px · {} KiB", w, h, img.bytes.len() / 1024));
                            if let Some(cost) = self.mint_dialog.estimate {
                                ui.label(format!("· storage ≈ {} units", cost));
                            }
                        });
                    }
                    None => {
                        ui.label(RichText::new("No image selected").italics());
                    }
                }
                if ui.button("Choose image…").clicked() {
                    do_pick = true;
                }

                ui.horizontal(|ui| {
                    ui.label("Link:");
                    ui.text_edit_singleline(&mut self.mint_dialog.link);
                });

                if let Some(step) = self.mint_dialog.step {
                    ui.horizontal(|ui| {
                        ui.spinner();
                        ui.label(step.label());
                    });
                }
                if let Some(error) = &self.mint_dialog.error {
                    ui.colored_label(Color32::from_rgb(218, 54, 51), error);
                }

                let ready = self.mint_dialog.image.is_some() && !self.mint_in_flight;
                if ui.add_enabled(ready, egui::Button::new("Mint")).clicked() {
                    do_mint = true;
                }
            });

        if do_pick {
            self.pick_image(ctx);
        }
        if do_mint {
            self.spawn_mint();
        }
        if !open {
            // Closing mid-flight does not cancel the pipeline (no abort is
            // wired through); its terminal event still gets applied.
            self.mint_dialog.reset();
        }
    }

    fn inspect_window(&mut self, ctx: &egui::Context) {
        let Some(record) = self.inspect.clone() else { return };
        let mut open = true;
        egui::Window::new("Region details")
            .open(&mut open)
            .collapsible(false)
            .resizable(false)
            .show(ctx, |ui| {
                ui.label(format!(
                    "({},{}) to ({},{}) — {} cells",
                    record.region.start_x,
                    record.region.start_y,
                    record.region.end_x,
                    record.region.end_y,
                    record.region.cell_count()
                ));
                ui.label(format!("Owner {}", shorten(&record.owner)));
                ui.label(format!("Minted {}", record.created_at.format("%Y-%m-%d %H:%M UTC")));
                ui.label(format!("Tx {}", shorten(&record.tx_signature)));
                if let Some(link) = &record.external_link {
                    ui.hyperlink(link);
                }
            });
        if !open {
            self.inspect = None;
        }
    }
}

impl eframe::App for MintFEApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_channels(ctx);
        self.canvas.poll_images(ctx);

        ctx.set_visuals(match self.config.theme_mode {
            ThemeMode::Light => egui::Visuals::light(),
            ThemeMode::Dark => egui::Visuals::dark(),
        });

        self.top_bar(ctx);
        self.status_bar(ctx);

        egui::CentralPanel::default()
            .frame(egui::Frame::none().fill(self.palette.background))
            .show(ctx, |ui| {
                let response = self.canvas.show(
                    ui,
                    &mut self.grid,
                    &mut self.controller,
                    &self.palette,
                    self.config.theme_mode,
                    self.runtime.handle(),
                );
                if let Some(record) = response.inspect_record {
                    self.inspect = Some(record);
                }
            });

        self.mint_dialog_window(ctx);
        self.inspect_window(ctx);
    }
}

/// `8fGk…Q9yB` — wallet addresses and signatures are too long for the UI.
fn shorten(s: &str) -> String {
    if s.len() <= 12 {
        s.to_string()
    } else {
        format!("{}…{}", &s[..4], &s[s.len() - 4..])
    }
}
