//! アプリケーション設定管理モジュール
//!
//! 画面の入力値や変換に使うパスをTOML形式 (app_conf.toml) で保存・読み込みします。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::export::{ExportRequest, DEFAULT_DETECTOR};
use crate::kmodel::ExternalCompiler;
use crate::naming::LocalizedText;

/// 画面の共通入力値（前回値）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommSettings {
    /// アイコン画像のパス
    pub icon_file: String,
    #[serde(rename = "app_name_zh_CN")]
    pub app_name_zh_cn: String,
    #[serde(rename = "app_name_zh_TW")]
    pub app_name_zh_tw: String,
    #[serde(rename = "app_name_EN")]
    pub app_name_en: String,
    #[serde(rename = "title_name_zh_CN")]
    pub title_name_zh_cn: String,
    #[serde(rename = "title_name_zh_TW")]
    pub title_name_zh_tw: String,
    #[serde(rename = "title_name_EN")]
    pub title_name_en: String,
}

impl Default for CommSettings {
    fn default() -> Self {
        Self {
            icon_file: String::new(),
            app_name_zh_cn: String::new(),
            app_name_zh_tw: String::new(),
            app_name_en: String::new(),
            title_name_zh_cn: "细胞识别".to_string(),
            title_name_zh_tw: "細胞識別".to_string(),
            title_name_en: "Cell Recognition".to_string(),
        }
    }
}

impl CommSettings {
    pub fn app_names(&self) -> LocalizedText {
        LocalizedText::new(&self.app_name_en, &self.app_name_zh_cn, &self.app_name_zh_tw)
    }

    pub fn titles(&self) -> LocalizedText {
        LocalizedText::new(&self.title_name_en, &self.title_name_zh_cn, &self.title_name_zh_tw)
    }
}

/// 変換処理の設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// 検出閾値（0〜100）
    pub threshold_percent: u8,
    /// 検出モデルの種類
    pub detector: String,
    /// 最後に使用したモデルパッケージ
    pub last_model_package: Option<String>,
    /// モデルパッケージの展開先
    pub work_dir: String,
    /// インストールパッケージの中身を作る作業フォルダ
    pub output_dir: String,
    /// 完成したzipの出力先
    pub dist_dir: String,
    /// 展開先から見たキャリブレーション画像フォルダ
    pub calibration_dir: String,
    /// kmodel変換設定ファイル
    pub kmodel_conf: String,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            threshold_percent: 30,
            detector: DEFAULT_DETECTOR.to_string(),
            last_model_package: None,
            work_dir: "model_input".to_string(),
            output_dir: "model_output".to_string(),
            dist_dir: ".".to_string(),
            calibration_dir: "dataset/images".to_string(),
            kmodel_conf: "kmodel_conf.toml".to_string(),
        }
    }
}

impl ExportSettings {
    pub fn work_dir(&self) -> PathBuf {
        PathBuf::from(&self.work_dir)
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.output_dir)
    }

    pub fn dist_dir(&self) -> PathBuf {
        PathBuf::from(&self.dist_dir)
    }

    pub fn calibration_dir(&self) -> PathBuf {
        self.work_dir().join(&self.calibration_dir)
    }

    /// コンパイラに渡す中間ファイルの置き場
    pub fn scratch_dir(&self) -> PathBuf {
        self.work_dir().join(".kmodel")
    }
}

/// 外部コンパイラの起動設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerSettings {
    /// 実行ファイル
    pub program: String,
    /// 引数テンプレート（{model} {kmodel} {options} {calib} を置換）
    pub args: Vec<String>,
    /// コンパイラのプラグインディレクトリ
    pub plugin_path: Option<String>,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            program: "nncase-compile".to_string(),
            args: vec![
                "--model".to_string(),
                "{model}".to_string(),
                "--output".to_string(),
                "{kmodel}".to_string(),
                "--options".to_string(),
                "{options}".to_string(),
                "--calib".to_string(),
                "{calib}".to_string(),
            ],
            plugin_path: None,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub comm: CommSettings,
    pub export: ExportSettings,
    pub compiler: CompilerSettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("app_conf.toml")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// 指定パスから読み込む、存在しない・壊れている場合はデフォルト設定を返す
    pub fn load_or_default_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if path.exists() {
            match Self::load(path) {
                Ok(config) => {
                    info!("設定ファイルを読み込みました: {}", path.display());
                    config
                }
                Err(e) => {
                    warn!(
                        "設定ファイルの読み込みに失敗しました ({}): {}。デフォルト設定を使用します",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            }
        } else {
            info!("設定ファイルが存在しません。デフォルト設定を使用します");
            Self::default()
        }
    }

    /// デフォルトパスから設定を読み込む
    pub fn load_or_default() -> Self {
        Self::load_or_default_from(Self::default_path())
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// デフォルトパスに設定を保存する
    pub fn save_default(&self) -> anyhow::Result<()> {
        let path = Self::default_path();
        self.save(&path)?;
        info!("設定ファイルを保存しました: {}", path.display());
        Ok(())
    }

    /// 画面の入力値を反映
    pub fn update_from_request(&mut self, request: &ExportRequest) {
        if let Some(icon) = &request.icon {
            self.comm.icon_file = icon.to_string_lossy().to_string();
        }
        self.comm.app_name_en = request.names.en.clone();
        self.comm.app_name_zh_cn = request.names.zh_cn.clone();
        self.comm.app_name_zh_tw = request.names.zh_tw.clone();
        self.comm.title_name_en = request.titles.en.clone();
        self.comm.title_name_zh_cn = request.titles.zh_cn.clone();
        self.comm.title_name_zh_tw = request.titles.zh_tw.clone();
        self.export.threshold_percent = request.threshold_percent;
        self.export.detector = request.detector.clone();
        if let Some(package) = &request.model_package {
            self.export.last_model_package = Some(package.to_string_lossy().to_string());
        }
    }

    /// 設定に従って外部コンパイラを用意
    pub fn external_compiler(&self) -> ExternalCompiler {
        ExternalCompiler::new(
            &self.compiler.program,
            self.compiler.args.clone(),
            self.export.scratch_dir(),
        )
        .with_plugin_path(self.compiler.plugin_path.as_ref().map(PathBuf::from))
    }

    /// 保存済みの値から変換リクエストを組み立てる
    pub fn to_request(&self) -> ExportRequest {
        ExportRequest {
            model_package: self.export.last_model_package.as_ref().map(PathBuf::from),
            icon: (!self.comm.icon_file.is_empty()).then(|| PathBuf::from(&self.comm.icon_file)),
            names: self.comm.app_names(),
            titles: self.comm.titles(),
            threshold_percent: self.export.threshold_percent,
            detector: self.export.detector.clone(),
        }
    }
}
