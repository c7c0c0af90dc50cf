//! kmodelコンパイラのオプション (kmodel_conf.toml)
//!
//! 外部コンパイラのオプション構造体をそのまま写したものです。
//! キーが欠けていてもデフォルト値で補完されます。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// コンパイルオプション
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// ターゲットデバイス
    pub target: String,
    pub dump_ir: bool,
    pub dump_asm: bool,
    pub dump_dir: String,
    pub input_file: String,
    /// 前処理をkmodelに埋め込むか
    pub preprocess: bool,
    pub input_type: String,
    /// 入力形状 `[N, C, H, W]`
    pub input_shape: Vec<usize>,
    pub input_range: [f32; 2],
    pub input_layout: String,
    #[serde(rename = "swapRB")]
    pub swap_rb: bool,
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
    pub letterbox_value: f32,
    pub output_layout: String,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            target: "k230".to_string(),
            dump_ir: false,
            dump_asm: false,
            dump_dir: "tmp".to_string(),
            input_file: String::new(),
            preprocess: true,
            input_type: "uint8".to_string(),
            input_shape: vec![1, 3, 320, 320],
            input_range: [0.0, 1.0],
            input_layout: "NCHW".to_string(),
            swap_rb: false,
            mean: vec![0.0, 0.0, 0.0],
            std: vec![1.0, 1.0, 1.0],
            letterbox_value: 0.0,
            output_layout: "NCHW".to_string(),
        }
    }
}

/// 学習後量子化 (PTQ) オプション
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PtqOptions {
    pub calibrate_method: String,
    pub finetune_weights_method: String,
    pub quant_type: String,
    pub w_quant_type: String,
    pub dump_quant_error: bool,
    pub dump_quant_error_symmetric_for_signed: bool,
    pub quant_scheme: String,
    pub quant_scheme_strict_mode: bool,
    pub export_quant_scheme: bool,
    pub export_weight_range_by_channel: bool,
}

impl Default for PtqOptions {
    fn default() -> Self {
        Self {
            calibrate_method: "NoClip".to_string(),
            finetune_weights_method: "NoFineTuneWeights".to_string(),
            quant_type: "uint8".to_string(),
            w_quant_type: "uint8".to_string(),
            dump_quant_error: false,
            dump_quant_error_symmetric_for_signed: false,
            quant_scheme: String::new(),
            quant_scheme_strict_mode: false,
            export_quant_scheme: false,
            export_weight_range_by_channel: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KmodelOptions {
    pub compile_options: CompileOptions,
    pub ptq_options: PtqOptions,
}

/// コンパイラに渡すPTQオプション（サンプル数を付加）
#[derive(Debug, Clone, Serialize)]
pub struct PtqInvocation<'a> {
    #[serde(flatten)]
    pub options: &'a PtqOptions,
    pub samples_count: usize,
}

/// コンパイラに渡すオプション一式
#[derive(Debug, Clone, Serialize)]
pub struct CompilerInvocation<'a> {
    pub compile_options: &'a CompileOptions,
    pub ptq_options: PtqInvocation<'a>,
}

impl KmodelOptions {
    /// デフォルトのパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("kmodel_conf.toml")
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .context(format!("Failed to read {:?}", path.as_ref()))?;
        let options: KmodelOptions = toml::from_str(&content)
            .context(format!("Failed to parse {:?}", path.as_ref()))?;
        Ok(options)
    }

    /// ファイルがなければデフォルト値を使う（パース失敗はエラー）
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let options = Self::load(path)?;
            info!("[kmodel_options] 変換設定を読み込みました: {}", path.display());
            Ok(options)
        } else {
            warn!(
                "[kmodel_options] {} が存在しません。デフォルトの変換設定を使用します",
                path.display()
            );
            Ok(Self::default())
        }
    }

    /// キャリブレーション画像の一辺（input_shape の最後の次元）
    pub fn calibration_size(&self) -> u32 {
        self.compile_options
            .input_shape
            .last()
            .and_then(|size| u32::try_from(*size).ok())
            .filter(|size| *size > 0)
            .unwrap_or(320)
    }

    pub fn invocation(&self, samples_count: usize) -> CompilerInvocation<'_> {
        CompilerInvocation {
            compile_options: &self.compile_options,
            ptq_options: PtqInvocation {
                options: &self.ptq_options,
                samples_count,
            },
        }
    }
}
