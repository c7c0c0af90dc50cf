//! アプリIDとローカライズ名の生成
//!
//! ユーザーが入力した英語名からデバイス上のアプリIDを作ります。
//! - 小文字化
//! - `[a-z0-9]` 以外の連続は `_` 1文字に置換
//! - 先頭・末尾の `_` は除去
//!
//! アプリIDには `dfrobot_` が前置され、kmodelファイル名とマーカーファイル名にも使われます。

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::PackError;

/// デバイス側が要求するアプリIDの接頭辞
pub const APPLICATION_PREFIX: &str = "dfrobot_";

/// 名前をファイル名・識別子に使える形へ正規化
pub fn clean_name(name: &str) -> String {
    let mut cleaned = String::with_capacity(name.len());

    for c in name.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            cleaned.push(c);
        } else if !cleaned.ends_with('_') {
            cleaned.push('_');
        }
    }

    cleaned.trim_matches('_').to_string()
}

/// 英語名からアプリIDを生成
pub fn application_id(english_name: &str) -> Result<String> {
    let cleaned = clean_name(english_name);
    if cleaned.is_empty() {
        return Err(PackError::EmptyApplicationName(english_name.to_string()).into());
    }
    Ok(format!("{}{}", APPLICATION_PREFIX, cleaned))
}

/// バンドル内のkmodelファイル名
pub fn model_filename(application_id: &str) -> String {
    format!("{}.kmodel", application_id)
}

/// バンドル内の空のマーカーファイル名
pub fn marker_filename(application_id: &str) -> String {
    format!("app.{}", application_id)
}

/// 英語・簡体字・繁体字の3言語テキスト
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalizedText {
    pub en: String,
    pub zh_cn: String,
    pub zh_tw: String,
}

impl LocalizedText {
    pub fn new(en: impl Into<String>, zh_cn: impl Into<String>, zh_tw: impl Into<String>) -> Self {
        Self {
            en: en.into(),
            zh_cn: zh_cn.into(),
            zh_tw: zh_tw.into(),
        }
    }

    /// desc.json の並び順 `[en, zh-CN, zh-TW]` で返す
    pub fn to_array(&self) -> [String; 3] {
        [self.en.clone(), self.zh_cn.clone(), self.zh_tw.clone()]
    }

    /// 空欄の言語があればエラー
    pub fn validate(&self, field: &str) -> Result<()> {
        let entries = [("en", &self.en), ("zh-CN", &self.zh_cn), ("zh-TW", &self.zh_tw)];
        for (lang, text) in entries {
            if text.trim().is_empty() {
                return Err(PackError::MissingLocalizedText {
                    field: field.to_string(),
                    lang,
                }
                .into());
            }
        }
        Ok(())
    }
}
