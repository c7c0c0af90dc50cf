//! kmodelコンパイラの呼び出し
//!
//! 量子化とコンパイルは外部エンジンに任せます。このモジュールは入力を揃えて
//! エンジンを起動し、出力されたkmodelを確認するだけです。
//!
//! 外部コマンドへの引数テンプレートでは以下のプレースホルダが置換されます。
//! - `{model}`   - 入力ONNXモデル
//! - `{kmodel}`  - 出力kmodelファイル
//! - `{options}` - オプションJSON（compile_options / ptq_options）
//! - `{calib}`   - キャリブレーションテンソル (.npy)

use anyhow::{Context, Result};
use std::env;
use std::ffi::OsString;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{info, warn};

use crate::bundle::write_pretty_json;
use crate::error::PackError;
use crate::kmodel::calibration::CalibrationSet;
use crate::kmodel::options::KmodelOptions;

/// 1回分のコンパイル入力
#[derive(Debug, Clone, Copy)]
pub struct CompileJob<'a> {
    pub model: &'a Path,
    pub kmodel: &'a Path,
    pub options: &'a KmodelOptions,
    pub calibration: &'a CalibrationSet,
}

/// ONNXモデルを量子化してkmodelを出力するエンジン
pub trait KmodelCompiler: Send + Sync {
    fn compile(&self, job: &CompileJob<'_>) -> Result<()>;
}

/// 入力モデルがONNXか確認
pub fn check_model_format(model: &Path) -> Result<()> {
    let is_onnx = model
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("onnx"))
        .unwrap_or(false);
    if !is_onnx {
        return Err(PackError::UnsupportedModel(model.to_path_buf()).into());
    }
    if !model.is_file() {
        return Err(PackError::NotFound(model.to_path_buf()).into());
    }
    Ok(())
}

/// 外部プロセスとしてコンパイラを起動する実装
#[derive(Debug, Clone)]
pub struct ExternalCompiler {
    pub program: String,
    pub args: Vec<String>,
    /// プラグインの場所（NNCASE_PLUGIN_PATH と PATH に追加）
    pub plugin_path: Option<PathBuf>,
    /// calib.npy / options.json の置き場
    pub scratch_dir: PathBuf,
}

impl ExternalCompiler {
    pub fn new(program: impl Into<String>, args: Vec<String>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            plugin_path: None,
            scratch_dir: scratch_dir.into(),
        }
    }

    pub fn with_plugin_path(mut self, plugin_path: Option<PathBuf>) -> Self {
        self.plugin_path = plugin_path;
        self
    }

    /// 引数テンプレートのプレースホルダを置換
    pub fn expand_args(&self, model: &Path, kmodel: &Path, options: &Path, calib: &Path) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{model}", &model.to_string_lossy())
                    .replace("{kmodel}", &kmodel.to_string_lossy())
                    .replace("{options}", &options.to_string_lossy())
                    .replace("{calib}", &calib.to_string_lossy())
            })
            .collect()
    }

    fn apply_plugin_env(&self, command: &mut Command) -> Result<()> {
        let Some(plugin_path) = &self.plugin_path else {
            return Ok(());
        };

        command.env("NNCASE_PLUGIN_PATH", plugin_path);

        let mut paths = vec![plugin_path.clone()];
        if let Some(existing) = env::var_os("PATH") {
            paths.extend(env::split_paths(&existing));
        }
        let joined: OsString = env::join_paths(paths).context("Failed to build PATH")?;
        command.env("PATH", joined);
        Ok(())
    }
}

impl KmodelCompiler for ExternalCompiler {
    fn compile(&self, job: &CompileJob<'_>) -> Result<()> {
        check_model_format(job.model)?;

        fs::create_dir_all(&self.scratch_dir)
            .context(format!("Failed to create directory: {:?}", self.scratch_dir))?;

        let calib_path = self.scratch_dir.join("calib.npy");
        job.calibration.write_npy(&calib_path)?;

        let options_path = self.scratch_dir.join("options.json");
        write_pretty_json(&options_path, &job.options.invocation(job.calibration.samples))?;

        if job.kmodel.exists() {
            fs::remove_file(job.kmodel)
                .context(format!("Failed to remove old kmodel: {:?}", job.kmodel))?;
        }

        let args = self.expand_args(job.model, job.kmodel, &options_path, &calib_path);
        info!("[compiler] 起動: {} {}", self.program, args.join(" "));

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        self.apply_plugin_env(&mut command)?;

        let mut child = command
            .spawn()
            .context(format!("Failed to start compiler: {}", self.program))?;

        // stderrは別スレッドで読み、パイプ詰まりを防ぐ
        let stderr = child.stderr.take();
        let stderr_thread = std::thread::spawn(move || {
            if let Some(stderr) = stderr {
                for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
                    warn!("[compiler] {}", line);
                }
            }
        });

        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines().map_while(|l| l.ok()) {
                info!("[compiler] {}", line);
            }
        }

        let status = child.wait().context("Failed to wait for compiler")?;
        stderr_thread.join().ok();

        if !status.success() {
            return Err(PackError::CompilerFailed { code: status.code() }.into());
        }
        if !job.kmodel.is_file() {
            return Err(PackError::MissingKmodel(job.kmodel.to_path_buf()).into());
        }

        let size = fs::metadata(job.kmodel)?.len();
        info!("[compiler] kmodelを出力しました: {:?} ({} bytes)", job.kmodel, size);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calibration() -> CalibrationSet {
        CalibrationSet {
            size: 2,
            samples: 2,
            data: vec![0; 24],
        }
    }

    #[test]
    fn test_check_model_format() {
        let dir = tempfile::tempdir().unwrap();
        let onnx = dir.path().join("best.ONNX");
        fs::write(&onnx, b"x").unwrap();
        assert!(check_model_format(&onnx).is_ok());

        let pt = dir.path().join("best.pt");
        fs::write(&pt, b"x").unwrap();
        let err = check_model_format(&pt).unwrap_err();
        assert!(matches!(err.downcast_ref::<PackError>(), Some(PackError::UnsupportedModel(_))));

        let missing = dir.path().join("missing.onnx");
        let err = check_model_format(&missing).unwrap_err();
        assert!(matches!(err.downcast_ref::<PackError>(), Some(PackError::NotFound(_))));
    }

    #[test]
    fn test_expand_args() {
        let compiler = ExternalCompiler::new(
            "nncase-compile",
            vec!["--model={model}".into(), "{kmodel}".into(), "-o".into(), "{options}:{calib}".into()],
            "scratch",
        );
        let args = compiler.expand_args(
            Path::new("m.onnx"),
            Path::new("out.kmodel"),
            Path::new("o.json"),
            Path::new("c.npy"),
        );
        assert_eq!(args, vec!["--model=m.onnx", "out.kmodel", "-o", "o.json:c.npy"]);
    }

    #[cfg(unix)]
    fn run_with_script(script: &str) -> (tempfile::TempDir, Result<()>) {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("best.onnx");
        fs::write(&model, b"onnx-bytes").unwrap();
        let kmodel = dir.path().join("out.kmodel");

        let compiler = ExternalCompiler::new(
            "sh",
            vec!["-c".into(), script.into()],
            dir.path().join("scratch"),
        )
        .with_plugin_path(Some(dir.path().join("plugins")));

        let options = KmodelOptions::default();
        let calibration = calibration();
        let job = CompileJob {
            model: &model,
            kmodel: &kmodel,
            options: &options,
            calibration: &calibration,
        };
        let result = compiler.compile(&job);
        (dir, result)
    }

    #[cfg(unix)]
    #[test]
    fn test_external_compiler_success() {
        let (dir, result) = run_with_script(
            "test -f {calib} && test -f {options} && test -n \"$NNCASE_PLUGIN_PATH\" && cp {model} {kmodel}",
        );
        result.unwrap();
        assert_eq!(fs::read(dir.path().join("out.kmodel")).unwrap(), b"onnx-bytes");

        let options: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(dir.path().join("scratch/options.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(options["ptq_options"]["samples_count"], 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_external_compiler_failure_code() {
        let (_dir, result) = run_with_script("echo broken >&2; exit 3");
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PackError>(),
            Some(PackError::CompilerFailed { code: Some(3) })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_external_compiler_missing_output() {
        let (_dir, result) = run_with_script("true");
        let err = result.unwrap_err();
        assert!(matches!(err.downcast_ref::<PackError>(), Some(PackError::MissingKmodel(_))));
    }
}
