//! モデルパッケージ → インストールパッケージ の変換処理
//!
//! モデルパッケージ（zip）の構成:
//! - model/best.onnx       - 学習済み検出モデル
//! - dataset/data.yaml     - クラス名定義
//! - dataset/images/...    - キャリブレーションに使う画像
//!
//! インストールパッケージ（`<アプリID>.<md5先頭4文字>.zip`）の構成:
//! - conf.json / desc.json
//! - <アプリID>.kmodel
//! - icon.png
//! - app.<アプリID>        - 空のマーカーファイル

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::bundle::{
    extract_zip, load_class_names, write_bundle_icon, write_pretty_json, zip_with_md5,
    ConfDocument, DescDocument, DetectionThreshold,
};
use crate::config::ExportSettings;
use crate::error::PackError;
use crate::kmodel::{check_model_format, CalibrationSet, CompileJob, KmodelCompiler, KmodelOptions};
use crate::naming::{self, LocalizedText};

pub const DEFAULT_DETECTOR: &str = "yolov8n";

/// 選択可能な検出モデル
pub const SUPPORTED_DETECTORS: &[&str] = &[DEFAULT_DETECTOR];

/// モデルパッケージ内のONNXモデル
pub const PACKAGE_MODEL_PATH: &str = "model/best.onnx";
/// モデルパッケージ内のデータセット定義
pub const PACKAGE_DATA_YAML: &str = "dataset/data.yaml";

/// 画面から受け取る変換リクエスト
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub model_package: Option<PathBuf>,
    pub icon: Option<PathBuf>,
    pub names: LocalizedText,
    pub titles: LocalizedText,
    /// 検出閾値のスライダー値（0〜100）
    pub threshold_percent: u8,
    pub detector: String,
}

impl ExportRequest {
    /// 変換前の入力チェック（モデルパッケージとアイコンのパスを返す）
    pub fn validate(&self) -> Result<(&Path, &Path)> {
        let package = self
            .model_package
            .as_ref()
            .ok_or(PackError::MissingInput("モデルパッケージ"))?;
        if !package.is_file() {
            return Err(PackError::NotFound(package.clone()).into());
        }

        let icon = self.icon.as_ref().ok_or(PackError::MissingInput("アイコン"))?;
        if !icon.is_file() {
            return Err(PackError::NotFound(icon.clone()).into());
        }

        self.names.validate("アプリ名")?;
        naming::application_id(&self.names.en)?;
        DetectionThreshold::from_percent(self.threshold_percent as u32)?;

        if !SUPPORTED_DETECTORS.contains(&self.detector.as_str()) {
            return Err(PackError::UnsupportedDetector(self.detector.clone()).into());
        }
        Ok((package.as_path(), icon.as_path()))
    }
}

/// 変換の段階
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStage {
    Preparing,
    Extracting,
    WritingManifest,
    Calibrating,
    Compiling,
    Packaging,
    Finished,
}

/// 進捗通知のペイロード
#[derive(Debug, Clone, Serialize)]
pub struct ExportProgress {
    pub stage: ExportStage,
    pub message: String,
}

/// 変換結果
#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub application_id: String,
    pub class_names: Vec<String>,
    pub bundle_path: PathBuf,
    /// 完了時刻（ISO8601形式）
    pub finished_at: String,
}

/// 変換処理を実行
///
/// ブロッキング処理なのでUIからはワーカースレッドで呼び出すこと。
pub fn run_export(
    request: &ExportRequest,
    settings: &ExportSettings,
    options: &KmodelOptions,
    compiler: &dyn KmodelCompiler,
    mut progress: impl FnMut(ExportProgress),
) -> Result<ExportReport> {
    let mut notify = |stage: ExportStage, message: String| {
        info!("[export] {:?}: {}", stage, message);
        progress(ExportProgress { stage, message });
    };

    notify(ExportStage::Preparing, "入力内容を確認しています...".to_string());
    let (package, icon) = request.validate()?;
    let application_id = naming::application_id(&request.names.en)?;
    let threshold = DetectionThreshold::from_percent(request.threshold_percent as u32)?;

    let work_dir = settings.work_dir();
    let output_dir = settings.output_dir();
    check_staging_layout(&work_dir, &output_dir, &settings.dist_dir())?;
    reset_dir(&work_dir)?;
    reset_dir(&output_dir)?;

    // 展開
    notify(ExportStage::Extracting, format!("モデルパッケージを展開しています: {}", package.display()));
    extract_zip(package, &work_dir)?;
    let model_path = work_dir.join(PACKAGE_MODEL_PATH);
    check_model_format(&model_path)?;
    let class_names = load_class_names(&work_dir.join(PACKAGE_DATA_YAML))?;

    // 設定ファイル
    notify(
        ExportStage::WritingManifest,
        format!("{} ({}クラス) の設定ファイルを作成しています", application_id, class_names.len()),
    );
    let conf = ConfDocument::build(&application_id, &class_names, threshold);
    write_pretty_json(&output_dir.join("conf.json"), &conf)?;
    let desc = DescDocument::build(&request.names, &request.titles);
    write_pretty_json(&output_dir.join("desc.json"), &desc)?;
    write_bundle_icon(icon, &output_dir.join("icon.png"))?;

    let marker = output_dir.join(naming::marker_filename(&application_id));
    File::create(&marker).context(format!("Failed to create marker file: {:?}", marker))?;

    // キャリブレーション
    let calibration_dir = settings.calibration_dir();
    let size = options.calibration_size();
    notify(
        ExportStage::Calibrating,
        format!("キャリブレーション画像を読み込んでいます: {}", calibration_dir.display()),
    );
    let calibration = CalibrationSet::from_dir(&calibration_dir, size)?;

    // コンパイル
    let kmodel_path = output_dir.join(conf.model_filename());
    notify(
        ExportStage::Compiling,
        format!("kmodelに変換しています ({}枚のキャリブレーション画像)", calibration.samples),
    );
    compiler.compile(&CompileJob {
        model: &model_path,
        kmodel: &kmodel_path,
        options,
        calibration: &calibration,
    })?;

    // zip化
    notify(ExportStage::Packaging, "インストールパッケージを作成しています".to_string());
    let bundle_path = zip_with_md5(&output_dir, &settings.dist_dir(), &application_id)?;

    notify(ExportStage::Finished, format!("変換完了: {}", bundle_path.display()));

    Ok(ExportReport {
        application_id,
        class_names,
        bundle_path,
        finished_at: chrono::Local::now().to_rfc3339(),
    })
}

/// 展開先・作業フォルダ・出力先の位置関係を確認する
///
/// - 展開先と作業フォルダは同一でも入れ子でもいけない（展開物がzipに入る）
/// - 出力先は展開先・作業フォルダの中に置けない（毎回削除される）
fn check_staging_layout(work_dir: &Path, output_dir: &Path, dist_dir: &Path) -> Result<()> {
    let canonical = |dir: &Path| -> Result<PathBuf> {
        fs::create_dir_all(dir).context(format!("Failed to create directory: {:?}", dir))?;
        fs::canonicalize(dir).context(format!("Failed to resolve {:?}", dir))
    };
    let work = canonical(work_dir)?;
    let output = canonical(output_dir)?;
    let dist = canonical(dist_dir)?;

    if work.starts_with(&output) || output.starts_with(&work) {
        return Err(PackError::UnsafeWorkDir(output_dir.to_path_buf()).into());
    }
    if dist.starts_with(&work) || dist.starts_with(&output) {
        return Err(PackError::UnsafeWorkDir(dist_dir.to_path_buf()).into());
    }
    Ok(())
}

/// 前回の変換で作られたファイルか
fn is_staging_entry(name: &str) -> bool {
    const KNOWN: &[&str] = &["conf.json", "desc.json", "icon.png", "model", "dataset", ".kmodel"];
    KNOWN.contains(&name) || name.starts_with("app.") || name.ends_with(".kmodel")
}

/// 作業フォルダを空にして作り直す
///
/// カレントディレクトリやその親、変換と無関係なファイルだけのフォルダは対象外。
fn reset_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        let target = fs::canonicalize(dir)?;
        let cwd = fs::canonicalize(env::current_dir()?)?;
        if cwd.starts_with(&target) {
            return Err(PackError::UnsafeWorkDir(dir.to_path_buf()).into());
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(dir).context(format!("Failed to read {:?}", dir))? {
            entries.push(entry?.file_name().to_string_lossy().to_string());
        }
        if !entries.is_empty() && !entries.iter().any(|name| is_staging_entry(name)) {
            warn!("[export] 変換に無関係なフォルダは削除しません: {:?} ({:?})", dir, entries);
            return Err(PackError::UnsafeWorkDir(dir.to_path_buf()).into());
        }

        fs::remove_dir_all(dir).context(format!("Failed to clean {:?}", dir))?;
    }
    fs::create_dir_all(dir).context(format!("Failed to create directory: {:?}", dir))?;
    Ok(())
}
