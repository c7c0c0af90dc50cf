//! アプリアイコンの生成

use anyhow::{Context, Result};
use base64::Engine;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::Path;

/// デバイスのランチャーで使われるアイコンサイズ（正方形）
pub const ICON_SIZE: u32 = 60;

/// 60x60 にリサイズしたアイコンを読み込む（縦横比は保持しない）
pub fn load_bundle_icon(source: &Path) -> Result<DynamicImage> {
    let img = image::open(source).context(format!("Failed to open icon: {:?}", source))?;
    Ok(img.resize_exact(ICON_SIZE, ICON_SIZE, FilterType::Triangle))
}

/// アイコンをPNGで書き出す
pub fn write_bundle_icon(source: &Path, dest: &Path) -> Result<()> {
    let icon = load_bundle_icon(source)?;
    icon.save_with_format(dest, ImageFormat::Png)
        .context(format!("Failed to save icon: {:?}", dest))?;
    Ok(())
}

/// プレビュー表示用のdata URLを返す
pub fn icon_preview_data_url(source: &Path) -> Result<String> {
    let icon = load_bundle_icon(source)?;

    // PNG形式でメモリ上にエンコード
    let mut png_data = Vec::new();
    icon.write_to(&mut Cursor::new(&mut png_data), ImageFormat::Png)
        .context("Failed to encode icon preview")?;

    let encoded = base64::engine::general_purpose::STANDARD.encode(&png_data);
    Ok(format!("data:image/png;base64,{}", encoded))
}
