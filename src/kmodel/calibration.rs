//! 量子化用キャリブレーションデータの作成
//!
//! データセットの画像を以下の手順でテンソル化します。
//! 1. RGBに変換
//! 2. 黒で上下左右を埋めて正方形にする（余りの1ピクセルは下・右側）
//! 3. `size x size` にリサイズ（バイリニア）
//! 4. HWC → CHW に並べ替え
//!
//! 全画像をまとめた `[N, 1, 3, size, size]` の uint8 テンソルをコンパイラに渡します。

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, RgbImage};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::PackError;

pub const CHANNELS: usize = 3;

/// キャリブレーションテンソル
#[derive(Debug, Clone)]
pub struct CalibrationSet {
    /// リサイズ後の一辺
    pub size: u32,
    /// 画像枚数
    pub samples: usize,
    /// `[samples, 1, 3, size, size]` の連続データ
    pub data: Vec<u8>,
}

impl CalibrationSet {
    /// ディレクトリ内の画像（サブディレクトリ含む）をすべて読み込む
    pub fn from_dir(dir: &Path, size: u32) -> Result<Self> {
        let paths = collect_image_paths(dir)?;
        if paths.is_empty() {
            return Err(PackError::NoCalibrationImages(dir.to_path_buf()).into());
        }

        info!(
            "[calibration] {}枚の画像からキャリブレーションデータを作成します ({}x{})",
            paths.len(),
            size,
            size
        );

        let per_sample = sample_len(size);
        let mut data = Vec::with_capacity(per_sample * paths.len());

        for (i, path) in paths.iter().enumerate() {
            let img = image::open(path).context(format!("Failed to open image: {:?}", path))?;
            data.extend(prepare_image(&img, size));

            if (i + 1) % 50 == 0 {
                debug!("[calibration] {}/{} 枚処理", i + 1, paths.len());
            }
        }

        Ok(Self {
            size,
            samples: paths.len(),
            data,
        })
    }

    pub fn shape(&self) -> [usize; 5] {
        let size = self.size as usize;
        [self.samples, 1, CHANNELS, size, size]
    }

    /// NumPy .npy (v1.0) 形式で書き出す
    pub fn write_npy(&self, path: &Path) -> Result<()> {
        let file = File::create(path).context(format!("Failed to create {:?}", path))?;
        let mut writer = BufWriter::new(file);

        let header = npy_header(&self.shape());
        writer.write_all(b"\x93NUMPY")?;
        writer.write_all(&[1, 0])?;
        writer.write_all(&(header.len() as u16).to_le_bytes())?;
        writer.write_all(header.as_bytes())?;
        writer.write_all(&self.data)?;
        writer.flush()?;

        Ok(())
    }
}

fn sample_len(size: u32) -> usize {
    CHANNELS * size as usize * size as usize
}

/// .npy のヘッダ辞書（全体長が64の倍数になるよう空白で埋め、改行で終える）
fn npy_header(shape: &[usize]) -> String {
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    let shape_str = if dims.len() == 1 {
        format!("({},)", dims[0])
    } else {
        format!("({})", dims.join(", "))
    };
    let mut header = format!(
        "{{'descr': '|u1', 'fortran_order': False, 'shape': {}, }}",
        shape_str
    );

    // magic(6) + version(2) + header_len(2) + header + '\n'
    let unpadded = 10 + header.len() + 1;
    let padding = (64 - unpadded % 64) % 64;
    header.push_str(&" ".repeat(padding));
    header.push('\n');
    header
}

/// 画像ファイル一覧（拡張子で判定、デコーダのない形式は除外、パス順）
pub fn collect_image_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(PackError::NotFound(dir.to_path_buf()).into());
    }

    let mut paths = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.context(format!("Failed to walk {:?}", dir))?;
        let readable = ImageFormat::from_path(entry.path())
            .map(|format| format.reading_enabled())
            .unwrap_or(false);
        if entry.file_type().is_file() && readable {
            paths.push(entry.into_path());
        }
    }
    Ok(paths)
}

/// 正方形に黒パディング
pub fn pad_to_square(img: &RgbImage) -> RgbImage {
    let (width, height) = img.dimensions();
    let side = width.max(height);
    if width == height {
        return img.clone();
    }

    let pad_left = (side - width) / 2;
    let pad_top = (side - height) / 2;

    let mut canvas = RgbImage::new(side, side);
    imageops::replace(&mut canvas, img, pad_left as i64, pad_top as i64);
    canvas
}

/// 1枚分のCHWデータ（長さ 3 * size * size）
pub fn prepare_image(img: &DynamicImage, size: u32) -> Vec<u8> {
    let rgb = img.to_rgb8();
    let square = pad_to_square(&rgb);
    let resized = if square.width() == size {
        square
    } else {
        imageops::resize(&square, size, size, FilterType::Triangle)
    };

    let plane = size as usize * size as usize;
    let mut chw = vec![0u8; CHANNELS * plane];
    for (x, y, pixel) in resized.enumerate_pixels() {
        let offset = y as usize * size as usize + x as usize;
        for channel in 0..CHANNELS {
            chw[channel * plane + offset] = pixel[channel];
        }
    }
    chw
}
