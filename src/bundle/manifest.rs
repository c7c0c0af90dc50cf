//! インストールパッケージの設定ファイル (conf.json / desc.json)
//!
//! デバイス側のスキーマは固定です。フィールドの並び順もそのまま出力されます。
//!
//! conf.json:
//! - application       - アプリID
//! - defconfig         - 検出閾値・NMS閾値
//! - infer_isp         - 入力画像の形式とサイズ
//! - fps_limit         - 推論FPS上限
//! - model_info        - kmodelファイル名
//! - model_attach      - 言語別のクラス名（同じリストを3言語に複製）
//!
//! desc.json:
//! - application_name / application_title - `[en, zh-CN, zh-TW]`
//! - stream / version

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::PackError;
use crate::naming::{self, LocalizedText};

pub const DEFAULT_NMS_THRESHOLD: f64 = 0.6;
pub const DEFAULT_FPS_LIMIT: u32 = 15;
pub const DETECTOR_MODEL_NAME: &str = "object-detection-detector";
pub const DESC_VERSION: &str = "0.1";

/// 検出閾値（UIのスライダー値 0〜100 を保持）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionThreshold(u8);

impl DetectionThreshold {
    pub const DEFAULT_PERCENT: u8 = 30;

    pub fn from_percent(percent: u32) -> Result<Self> {
        if percent > 100 {
            return Err(PackError::InvalidThreshold(percent).into());
        }
        Ok(Self(percent as u8))
    }

    pub fn percent(&self) -> u8 {
        self.0
    }

    /// 0.00〜1.00 の値
    pub fn value(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// 画面表示用（小数2桁）
    pub fn label(&self) -> String {
        format!("{:.2}", self.value())
    }
}

impl Default for DetectionThreshold {
    fn default() -> Self {
        Self(Self::DEFAULT_PERCENT)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfDocument {
    pub conf: AppConf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConf {
    pub application: String,
    pub defconfig: DefConfig,
    pub infer_isp: InferIsp,
    pub fps_limit: u32,
    pub model_info: Vec<ModelInfo>,
    pub model_attach: ModelAttach,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefConfig {
    pub det_thres: f64,
    pub nms_thres: f64,
}

/// カメラ入力の形式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferIsp {
    pub format: String,
    pub channel: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for InferIsp {
    fn default() -> Self {
        Self {
            format: "BG3P".to_string(),
            channel: 3,
            width: 864,
            height: 486,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelAttach {
    pub classes: LocalizedClasses,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalizedClasses {
    pub en: Vec<String>,
    #[serde(rename = "zh-CN")]
    pub zh_cn: Vec<String>,
    #[serde(rename = "zh-TW")]
    pub zh_tw: Vec<String>,
}

impl ConfDocument {
    pub fn build(application_id: &str, class_names: &[String], threshold: DetectionThreshold) -> Self {
        Self {
            conf: AppConf {
                application: application_id.to_string(),
                defconfig: DefConfig {
                    det_thres: threshold.value(),
                    nms_thres: DEFAULT_NMS_THRESHOLD,
                },
                infer_isp: InferIsp::default(),
                fps_limit: DEFAULT_FPS_LIMIT,
                model_info: vec![ModelInfo {
                    name: DETECTOR_MODEL_NAME.to_string(),
                    filename: naming::model_filename(application_id),
                }],
                model_attach: ModelAttach {
                    classes: LocalizedClasses {
                        en: class_names.to_vec(),
                        zh_cn: class_names.to_vec(),
                        zh_tw: class_names.to_vec(),
                    },
                },
            },
        }
    }

    /// model_info に記載されたkmodelファイル名
    pub fn model_filename(&self) -> &str {
        self.conf
            .model_info
            .first()
            .map(|info| info.filename.as_str())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescDocument {
    pub desc: AppDesc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppDesc {
    pub application_name: [String; 3],
    pub application_title: [String; 3],
    pub stream: bool,
    pub version: String,
}

impl DescDocument {
    pub fn build(names: &LocalizedText, titles: &LocalizedText) -> Self {
        Self {
            desc: AppDesc {
                application_name: names.to_array(),
                application_title: titles.to_array(),
                stream: true,
                version: DESC_VERSION.to_string(),
            },
        }
    }
}

/// インデント4、非ASCII文字はエスケープせずにJSONを書き出す
pub fn write_pretty_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).context(format!("Failed to create {:?}", path))?;
    let mut writer = BufWriter::new(file);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut writer, formatter);
    value
        .serialize(&mut serializer)
        .context(format!("Failed to serialize {:?}", path))?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn classes() -> Vec<String> {
        vec!["red".to_string(), "白细胞".to_string()]
    }

    #[test]
    fn test_threshold_from_percent() {
        let t = DetectionThreshold::from_percent(30).unwrap();
        assert_eq!(t.value(), 0.3);
        assert_eq!(t.label(), "0.30");
        assert_eq!(DetectionThreshold::from_percent(100).unwrap().label(), "1.00");
        assert_eq!(DetectionThreshold::default().percent(), 30);
        assert!(DetectionThreshold::from_percent(101).is_err());
    }

    #[test]
    fn test_conf_document_schema() {
        let threshold = DetectionThreshold::from_percent(45).unwrap();
        let doc = ConfDocument::build("dfrobot_cell", &classes(), threshold);
        let value = serde_json::to_value(&doc).unwrap();

        assert_eq!(
            value,
            json!({
                "conf": {
                    "application": "dfrobot_cell",
                    "defconfig": {"det_thres": 0.45, "nms_thres": 0.6},
                    "infer_isp": {"format": "BG3P", "channel": 3, "width": 864, "height": 486},
                    "fps_limit": 15,
                    "model_info": [{"name": "object-detection-detector", "filename": "dfrobot_cell.kmodel"}],
                    "model_attach": {"classes": {
                        "en": ["red", "白细胞"],
                        "zh-CN": ["red", "白细胞"],
                        "zh-TW": ["red", "白细胞"]
                    }}
                }
            })
        );
        assert_eq!(doc.model_filename(), "dfrobot_cell.kmodel");
    }

    #[test]
    fn test_desc_document_schema() {
        let names = LocalizedText::new("Cell", "细胞", "細胞");
        let titles = LocalizedText::new("Cell Recognition", "细胞识别", "細胞識別");
        let value = serde_json::to_value(DescDocument::build(&names, &titles)).unwrap();

        assert_eq!(
            value,
            json!({
                "desc": {
                    "application_name": ["Cell", "细胞", "細胞"],
                    "application_title": ["Cell Recognition", "细胞识别", "細胞識別"],
                    "stream": true,
                    "version": "0.1"
                }
            })
        );
    }

    #[test]
    fn test_write_pretty_json_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf.json");
        let doc = ConfDocument::build("dfrobot_cell", &classes(), DetectionThreshold::default());
        write_pretty_json(&path, &doc).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("{\n    \"conf\": {\n        \"application\": \"dfrobot_cell\""));
        // 非ASCIIはそのまま
        assert!(text.contains("白细胞"));
        assert!(!text.contains("\\u"));
        // フィールド順
        let app = text.find("\"application\"").unwrap();
        let attach = text.find("\"model_attach\"").unwrap();
        assert!(app < attach);
        assert!(text.contains("\"det_thres\": 0.3,"));
    }
}
