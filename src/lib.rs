mod export_commands;

pub mod bundle;
pub mod config;
pub mod error;
pub mod export;
pub mod kmodel;
pub mod naming;

use config::AppConfig;
use export::ExportRequest;

use bundle::DetectionThreshold;
use std::sync::{Arc, Mutex};
use tauri::State;
use tracing_subscriber::EnvFilter;

pub struct AppState {
    config: Arc<Mutex<AppConfig>>, // 画面の前回値・変換設定
    is_exporting: Arc<Mutex<bool>>, // 変換中フラグ
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
            is_exporting: Arc::new(Mutex::new(false)),
        }
    }
}

/// ログ出力の初期化（RUST_LOG未設定時はinfo）
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .ok();
}

// Tauri commands
#[tauri::command]
fn load_settings(state: State<AppState>) -> Result<AppConfig, String> {
    let config = state.config.lock().map_err(|e| e.to_string())?;
    Ok(config.clone())
}

#[tauri::command]
fn save_settings(request: ExportRequest, state: State<AppState>) -> Result<String, String> {
    let mut config = state.config.lock().map_err(|e| e.to_string())?;
    config.update_from_request(&request);
    config
        .save_default()
        .map_err(|e| format!("設定の保存に失敗: {}", e))?;

    Ok("設定を保存しました".to_string())
}

#[tauri::command]
fn threshold_label(percent: u32) -> Result<String, String> {
    DetectionThreshold::from_percent(percent)
        .map(|t| t.label())
        .map_err(|e| e.to_string())
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    init_tracing();

    let app_state = AppState::new(AppConfig::load_or_default());

    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .plugin(tauri_plugin_dialog::init())
        .manage(app_state)
        .invoke_handler(tauri::generate_handler![
            load_settings,
            save_settings,
            threshold_label,
            // 変換関連のコマンド
            export_commands::preview_icon,
            export_commands::list_detectors,
            export_commands::export_bundle,
            export_commands::reveal_bundle,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
