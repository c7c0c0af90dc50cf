//! パッケージ変換で発生するドメインエラー

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PackError {
    /// 英語名から有効なアプリIDを作れない（英数字を含まない）
    #[error("英語のアプリ名に英数字が含まれていません: {0:?}")]
    EmptyApplicationName(String),

    #[error("{field} ({lang}) が未入力です")]
    MissingLocalizedText { field: String, lang: &'static str },

    #[error("検出閾値は0〜100で指定してください: {0}")]
    InvalidThreshold(u32),

    #[error("未対応の検出モデルです: {0}")]
    UnsupportedDetector(String),

    #[error("未対応のモデル形式です (ONNXのみ対応): {}", .0.display())]
    UnsupportedModel(PathBuf),

    #[error("ファイルが見つかりません: {}", .0.display())]
    NotFound(PathBuf),

    #[error("キャリブレーション画像がありません: {}", .0.display())]
    NoCalibrationImages(PathBuf),

    #[error("モデルコンパイラが異常終了しました (終了コード: {code:?})")]
    CompilerFailed { code: Option<i32> },

    #[error("コンパイラがkmodelを出力しませんでした: {}", .0.display())]
    MissingKmodel(PathBuf),

    #[error("{0}が指定されていません")]
    MissingInput(&'static str),

    #[error("作業フォルダとして使用できないパスです: {}", .0.display())]
    UnsafeWorkDir(PathBuf),

    #[error("変換処理が既に実行中です")]
    ExportInProgress,
}
