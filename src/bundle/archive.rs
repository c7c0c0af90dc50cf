//! モデルパッケージの展開とインストールパッケージのzip化
//!
//! インストールパッケージのファイル名にはzip全体のMD5の先頭4文字が入ります。
//! 例: `dfrobot_cell_recognition.3f9a.zip`
//!
//! 同じ内容から同じzipが生成されるよう、エントリはファイル名順に追加し、
//! 更新日時とパーミッションは固定値にしています。

use anyhow::{Context, Result};
use md5::{Digest, Md5};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// ファイル名に埋め込むMD5の桁数
pub const CHECKSUM_PREFIX_LEN: usize = 4;

/// zipを展開する
///
/// 出力先ディレクトリの外を指すエントリ（絶対パスや `..`）はスキップする。
pub fn extract_zip(zip_path: &Path, output_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)
        .context(format!("Failed to create directory: {:?}", output_dir))?;

    let file = File::open(zip_path).context(format!("Failed to open zip: {:?}", zip_path))?;
    let mut archive =
        ZipArchive::new(file).context(format!("Invalid zip archive: {:?}", zip_path))?;

    let mut extracted = 0usize;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;

        let relative = match entry.enclosed_name() {
            Some(path) => path,
            None => {
                warn!("[extract_zip] 不正なパスのエントリをスキップ: {}", entry.name());
                continue;
            }
        };
        let out_path = output_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out_file =
            File::create(&out_path).context(format!("Failed to create file: {:?}", out_path))?;
        io::copy(&mut entry, &mut out_file)
            .context(format!("Failed to extract {}", entry.name()))?;
        extracted += 1;
    }

    info!(
        "[extract_zip] {}ファイルを展開しました: {:?} -> {:?}",
        extracted, zip_path, output_dir
    );
    Ok(output_dir.to_path_buf())
}

/// ディレクトリをzip化し、MD5の先頭4文字をファイル名に付けて返す
///
/// 1. `<zip_dir>/<base_name>.zip` に書き出し
/// 2. zip全体のMD5を計算
/// 3. `<zip_dir>/<base_name>.<md5先頭4文字>.zip` にリネーム（既存ファイルは上書き）
pub fn zip_with_md5(source_dir: &Path, zip_dir: &Path, base_name: &str) -> Result<PathBuf> {
    fs::create_dir_all(zip_dir).context(format!("Failed to create directory: {:?}", zip_dir))?;

    let temp_zip_path = zip_dir.join(format!("{}.zip", base_name));
    let added = write_zip(source_dir, &temp_zip_path)?;

    let digest = md5_hex(&temp_zip_path)?;
    let final_zip_path = zip_dir.join(format!(
        "{}.{}.zip",
        base_name,
        &digest[..CHECKSUM_PREFIX_LEN]
    ));
    fs::rename(&temp_zip_path, &final_zip_path).context(format!(
        "Failed to rename {:?} to {:?}",
        temp_zip_path, final_zip_path
    ))?;

    info!(
        "[zip_with_md5] パッケージ作成完了: {:?} ({}ファイル, md5={})",
        final_zip_path, added, digest
    );
    Ok(final_zip_path)
}

/// source_dir 以下の全ファイルを相対パスでzipに格納する
fn write_zip(source_dir: &Path, zip_path: &Path) -> Result<usize> {
    let file = File::create(zip_path).context(format!("Failed to create zip: {:?}", zip_path))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644);

    // 書き出し中のzip自身が対象ディレクトリ内にある場合は除外
    let zip_abs = fs::canonicalize(zip_path).ok();

    let mut added = 0usize;
    for entry in WalkDir::new(source_dir).sort_by_file_name() {
        let entry = entry.context(format!("Failed to walk {:?}", source_dir))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if zip_abs.is_some() && fs::canonicalize(entry.path()).ok() == zip_abs {
            continue;
        }

        let name = archive_name(source_dir, entry.path())?;
        debug!("[zip_with_md5] 追加: {}", name);

        zip.start_file(name.as_str(), options)
            .context(format!("Failed to add {} to zip", name))?;
        let mut src = File::open(entry.path())
            .context(format!("Failed to open {:?}", entry.path()))?;
        io::copy(&mut src, &mut zip)?;
        added += 1;
    }

    zip.finish().context("Failed to finalize zip archive")?;
    Ok(added)
}

/// zip内のエントリ名（`/` 区切りの相対パス）
fn archive_name(source_dir: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(source_dir)
        .context(format!("{:?} is not under {:?}", path, source_dir))?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    Ok(parts.join("/"))
}

/// ファイルのMD5（小文字16進）を4KiBずつ読みながら計算
pub fn md5_hex(path: &Path) -> Result<String> {
    let mut file = File::open(path).context(format!("Failed to open {:?}", path))?;
    let mut hasher = Md5::new();
    let mut buffer = [0u8; 4096];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn populate(dir: &Path) {
        fs::create_dir_all(dir.join("nested/deeper")).unwrap();
        fs::write(dir.join("conf.json"), "{}").unwrap();
        fs::write(dir.join("nested/a.txt"), "alpha").unwrap();
        fs::write(dir.join("nested/deeper/b.bin"), [0u8, 1, 2, 3]).unwrap();
        File::create(dir.join("app.dfrobot_x")).unwrap();
    }

    fn entry_names(zip_path: &Path) -> Vec<String> {
        let mut archive = ZipArchive::new(File::open(zip_path).unwrap()).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn test_zip_with_md5_name_and_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("model_output");
        let dist = tmp.path().join("dist");
        populate(&source);

        let zip_path = zip_with_md5(&source, &dist, "dfrobot_x").unwrap();

        let file_name = zip_path.file_name().unwrap().to_str().unwrap().to_string();
        let digest = md5_hex(&zip_path).unwrap();
        assert_eq!(file_name, format!("dfrobot_x.{}.zip", &digest[..4]));
        assert!(!dist.join("dfrobot_x.zip").exists());

        let names = entry_names(&zip_path);
        assert_eq!(
            names,
            vec!["app.dfrobot_x", "conf.json", "nested/a.txt", "nested/deeper/b.bin"]
        );
    }

    #[test]
    fn test_zip_with_md5_is_deterministic() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("out");
        populate(&source);

        let first = zip_with_md5(&source, &tmp.path().join("d1"), "app").unwrap();
        let second = zip_with_md5(&source, &tmp.path().join("d2"), "app").unwrap();
        assert_eq!(first.file_name(), second.file_name());
        assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
    }

    #[test]
    fn test_zip_with_md5_content_changes_digest() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("out");
        populate(&source);
        let first = zip_with_md5(&source, &tmp.path().join("d1"), "app").unwrap();

        fs::write(source.join("conf.json"), "{\"changed\": true}").unwrap();
        let second = zip_with_md5(&source, &tmp.path().join("d2"), "app").unwrap();

        assert_ne!(md5_hex(&first).unwrap(), md5_hex(&second).unwrap());
    }

    #[test]
    fn test_zip_inside_source_is_not_self_included() {
        let tmp = tempfile::tempdir().unwrap();
        populate(tmp.path());

        let zip_path = zip_with_md5(tmp.path(), tmp.path(), "self").unwrap();
        let names = entry_names(&zip_path);
        assert!(!names.iter().any(|n| n.ends_with(".zip")));
    }

    #[test]
    fn test_md5_hex_known_value() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("abc.txt");
        fs::write(&path, "abc").unwrap();
        assert_eq!(md5_hex(&path).unwrap(), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_extract_zip_roundtrip_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let package = tmp.path().join("package.zip");
        {
            let mut zip = ZipWriter::new(File::create(&package).unwrap());
            let options = SimpleFileOptions::default();
            zip.add_directory("model/", options).unwrap();
            zip.start_file("model/best.onnx", options).unwrap();
            zip.write_all(b"onnx").unwrap();
            zip.start_file("dataset/data.yaml", options).unwrap();
            zip.write_all(b"names: [a]").unwrap();
            zip.start_file("../escape.txt", options).unwrap();
            zip.write_all(b"nope").unwrap();
            zip.finish().unwrap();
        }

        let out = tmp.path().join("model_input");
        extract_zip(&package, &out).unwrap();

        assert_eq!(fs::read(out.join("model/best.onnx")).unwrap(), b"onnx");
        assert_eq!(fs::read_to_string(out.join("dataset/data.yaml")).unwrap(), "names: [a]");
        assert!(!tmp.path().join("escape.txt").exists());
    }

    #[test]
    fn test_extract_zip_rejects_non_zip() {
        let tmp = tempfile::tempdir().unwrap();
        let bogus = tmp.path().join("bogus.zip");
        fs::write(&bogus, "not a zip").unwrap();
        assert!(extract_zip(&bogus, &tmp.path().join("out")).is_err());
    }
}
