//! インストールパッケージ変換のTauriコマンド

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tauri::State;
use tracing::{error, warn};

use crate::bundle::icon_preview_data_url;
use crate::error::PackError;
use crate::export::{run_export, ExportProgress, ExportReport, ExportRequest, SUPPORTED_DETECTORS};
use crate::kmodel::KmodelOptions;
use crate::AppState;

/// 変換中フラグを処理終了時に必ず下ろす
struct ExportGuard(Arc<Mutex<bool>>);

impl ExportGuard {
    fn acquire(flag: &Arc<Mutex<bool>>) -> Result<Self, String> {
        let mut busy = flag.lock().map_err(|e| e.to_string())?;
        if *busy {
            return Err(PackError::ExportInProgress.to_string());
        }
        *busy = true;
        Ok(Self(flag.clone()))
    }
}

impl Drop for ExportGuard {
    fn drop(&mut self) {
        if let Ok(mut busy) = self.0.lock() {
            *busy = false;
        }
    }
}

/// アイコンのプレビュー（60x60 PNGのdata URL）
#[tauri::command]
pub fn preview_icon(path: String) -> Result<String, String> {
    icon_preview_data_url(&PathBuf::from(&path))
        .map_err(|e| format!("アイコンの読み込みエラー: {:#}", e))
}

/// 選択可能な検出モデル一覧
#[tauri::command]
pub fn list_detectors() -> Vec<String> {
    SUPPORTED_DETECTORS.iter().map(|d| d.to_string()).collect()
}

/// インストールパッケージ変換コマンド（非同期）
///
/// 変換処理はブロッキングスレッドで実行し、Channelで進捗を通知する
#[tauri::command]
pub async fn export_bundle(
    request: ExportRequest,
    state: State<'_, AppState>,
    on_progress: tauri::ipc::Channel<ExportProgress>,
) -> Result<ExportReport, String> {
    let guard = ExportGuard::acquire(&state.is_exporting)?;

    // 入力値は変換前に保存しておく
    let config = {
        let mut config = state.config.lock().map_err(|e| e.to_string())?;
        config.update_from_request(&request);
        if let Err(e) = config.save_default() {
            warn!("[export_bundle] 設定の保存に失敗しました: {}", e);
        }
        config.clone()
    };

    let result = tokio::task::spawn_blocking(move || {
        let _guard = guard;
        let options = KmodelOptions::load_or_default(&config.export.kmodel_conf)?;
        let compiler = config.external_compiler();

        run_export(&request, &config.export, &options, &compiler, |progress| {
            on_progress.send(progress).ok();
        })
    })
    .await
    .map_err(|e| format!("変換スレッドエラー: {}", e))?;

    result.map_err(|e| {
        error!("[export_bundle] 変換に失敗しました: {:#}", e);
        format!("{:#}", e)
    })
}

/// 完成したパッケージをファイルマネージャーで表示
#[tauri::command]
pub fn reveal_bundle(path: String) -> Result<(), String> {
    tauri_plugin_opener::reveal_item_in_dir(PathBuf::from(&path))
        .map_err(|e| format!("フォルダを開けませんでした: {}", e))
}
