use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::theme::ThemeMode;

/// Application configuration, persisted as JSON in the OS data directory
/// (`mintfe.json` next to the session log).
///
/// Grid dimensions and pricing are deliberately configuration, not
/// constants: deployments of the marketplace differ on both, so nothing in
/// the codebase may hard-code them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Grid width in cells.
    pub grid_width: u32,
    /// Grid height in cells.
    pub grid_height: u32,
    /// Price per cell in the chain's native unit (e.g. SOL).
    pub price_per_cell: f64,
    /// Fixed fee buffer (native units) added on top of the region price when
    /// checking the wallet balance — covers the mint transaction fee.
    pub fee_buffer: f64,

    /// Storage network gateway base URL.
    pub storage_url: String,
    /// Chain RPC endpoint.
    pub rpc_url: String,
    /// Local wallet bridge (holds the keys, signs and submits mints).
    pub wallet_url: String,
    /// Record store REST base URL.
    pub records_url: String,
    /// Record store API key (sent as a bearer token).
    pub records_api_key: String,

    /// Collection symbol stamped on every minted region asset.
    pub asset_symbol: String,
    /// Royalty in basis points applied to minted assets.
    pub royalty_basis_points: u16,

    /// Seconds between realtime record-store polls.
    pub records_poll_secs: u64,

    pub theme_mode: ThemeMode,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            grid_width: 100,
            grid_height: 100,
            price_per_cell: 0.01,
            fee_buffer: 0.01,
            storage_url: "https://node.permastore.example".to_string(),
            rpc_url: "https://api.devnet.solana.com".to_string(),
            wallet_url: "http://127.0.0.1:8123".to_string(),
            records_url: "https://records.gridmarket.example/rest/v1".to_string(),
            records_api_key: String::new(),
            asset_symbol: "GRID".to_string(),
            royalty_basis_points: 500,
            records_poll_secs: 5,
            theme_mode: ThemeMode::Light,
        }
    }
}

impl AppConfig {
    pub(crate) fn config_path() -> Option<PathBuf> {
        Some(crate::logger::app_data_dir().join("mintfe.json"))
    }

    /// Load the config file, falling back to defaults for a missing or
    /// unreadable file. Unknown keys are ignored; missing keys default.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else { return Self::default() };
        let Ok(content) = std::fs::read_to_string(&path) else { return Self::default() };
        match serde_json::from_str(&content) {
            Ok(cfg) => cfg,
            Err(e) => {
                log_warn!("Config file {} unparseable ({}), using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    /// Persist the config. I/O errors are logged, never fatal.
    pub fn save(&self) {
        let Some(path) = Self::config_path() else { return };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    log_warn!("Failed to write config {}: {}", path.display(), e);
                }
            }
            Err(e) => log_warn!("Failed to serialize config: {}", e),
        }
    }

    /// Total cost (native units) of minting `cell_count` cells, including
    /// the fixed fee buffer. This is the number validated against the wallet
    /// balance before any network call.
    pub fn mint_cost(&self, cell_count: u64) -> f64 {
        cell_count as f64 * self.price_per_cell + self.fee_buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_canonical() {
        let cfg = AppConfig::default();
        assert_eq!((cfg.grid_width, cfg.grid_height), (100, 100));
        assert_eq!(cfg.price_per_cell, 0.01);
    }

    #[test]
    fn mint_cost_includes_fee_buffer() {
        let cfg = AppConfig::default();
        let cost = cfg.mint_cost(4);
        assert!((cost - 0.05).abs() < 1e-9); // 4 × 0.01 + 0.01
    }

    #[test]
    fn partial_config_fills_defaults() {
        let cfg: AppConfig = serde_json::from_str(r#"{"grid_width": 1000}"#).unwrap();
        assert_eq!(cfg.grid_width, 1000);
        assert_eq!(cfg.grid_height, 100);
    }
}
