//! GUIを使わずにインストールパッケージを作成するコマンドラインツール
//!
//! 指定しなかった項目は app_conf.toml の値を使います。

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use kmodel_packager_lib::config::AppConfig;
use kmodel_packager_lib::export::run_export;
use kmodel_packager_lib::init_tracing;
use kmodel_packager_lib::kmodel::KmodelOptions;

#[derive(Debug, Parser)]
#[command(name = "pack_bundle", about = "ONNXモデルパッケージをインストールパッケージに変換")]
struct Cli {
    /// モデルパッケージ (*.zip)
    #[arg(long)]
    model: Option<PathBuf>,

    /// アイコン画像
    #[arg(long)]
    icon: Option<PathBuf>,

    /// アプリ名 (English)
    #[arg(long)]
    name_en: Option<String>,

    /// アプリ名 (简体中文)
    #[arg(long)]
    name_zh_cn: Option<String>,

    /// アプリ名 (繁體中文)
    #[arg(long)]
    name_zh_tw: Option<String>,

    #[arg(long)]
    title_en: Option<String>,

    #[arg(long)]
    title_zh_cn: Option<String>,

    #[arg(long)]
    title_zh_tw: Option<String>,

    /// 検出閾値 (0〜100)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    threshold: Option<u8>,

    /// 検出モデル
    #[arg(long)]
    detector: Option<String>,

    /// 設定ファイル
    #[arg(long, default_value = "app_conf.toml")]
    config: PathBuf,

    /// 完成したzipの出力先
    #[arg(long)]
    dist_dir: Option<PathBuf>,

    /// 入力値を設定ファイルに保存する
    #[arg(long)]
    save: bool,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = AppConfig::load_or_default_from(&cli.config);
    let mut request = config.to_request();

    if let Some(model) = cli.model {
        request.model_package = Some(model);
    }
    if let Some(icon) = cli.icon {
        request.icon = Some(icon);
    }
    let overrides = [
        (cli.name_en, &mut request.names.en),
        (cli.name_zh_cn, &mut request.names.zh_cn),
        (cli.name_zh_tw, &mut request.names.zh_tw),
        (cli.title_en, &mut request.titles.en),
        (cli.title_zh_cn, &mut request.titles.zh_cn),
        (cli.title_zh_tw, &mut request.titles.zh_tw),
    ];
    for (value, field) in overrides {
        if let Some(value) = value {
            *field = value;
        }
    }
    if let Some(threshold) = cli.threshold {
        request.threshold_percent = threshold;
    }
    if let Some(detector) = cli.detector {
        request.detector = detector;
    }
    if let Some(dist_dir) = cli.dist_dir {
        config.export.dist_dir = dist_dir.to_string_lossy().to_string();
    }

    if cli.save {
        config.update_from_request(&request);
        config
            .save(&cli.config)
            .context(format!("Failed to save {:?}", cli.config))?;
    }

    let options = KmodelOptions::load_or_default(&config.export.kmodel_conf)?;
    let compiler = config.external_compiler();

    // 進捗はrun_export側でログ出力される
    let report = run_export(&request, &config.export, &options, &compiler, |_| {})?;

    println!("\n✓ 変換完了!");
    println!("  アプリID: {}", report.application_id);
    println!("  クラス: {}", report.class_names.join(", "));
    println!("  出力先: {}", report.bundle_path.display());

    Ok(())
}
