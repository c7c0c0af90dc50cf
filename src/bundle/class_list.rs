//! データセット定義 (data.yaml) からクラス名を読み込む

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_yaml::Value;
use std::fs;
use std::path::Path;
use tracing::warn;

/// data.yaml のうち使用する項目のみ
#[derive(Debug, Deserialize)]
struct DatasetDefinition {
    #[serde(default)]
    names: Option<Value>,
    #[serde(default)]
    nc: Option<usize>,
}

/// data.yaml を読み込んでクラス名一覧を返す
///
/// `names` はインデックス→名前のマップ、またはリストのどちらでも受け付ける。
/// マップの場合はインデックス順に並べ替える。
pub fn load_class_names(data_yaml: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(data_yaml)
        .context(format!("Failed to read dataset definition: {:?}", data_yaml))?;
    parse_class_names(&content).context(format!("Failed to parse {:?}", data_yaml))
}

/// YAML文字列からクラス名一覧を取り出す
pub fn parse_class_names(content: &str) -> Result<Vec<String>> {
    let definition: DatasetDefinition = serde_yaml::from_str(content)?;

    let names = match definition.names {
        None | Some(Value::Null) => {
            warn!("[class_list] data.yaml に names がありません。クラス一覧は空になります");
            Vec::new()
        }
        Some(Value::Sequence(items)) => items
            .iter()
            .map(scalar_to_string)
            .collect::<Result<Vec<_>>>()?,
        Some(Value::Mapping(map)) => {
            let mut indexed = Vec::with_capacity(map.len());
            for (key, value) in &map {
                let index = match key {
                    Value::Number(n) => n.as_i64(),
                    Value::String(s) => s.trim().parse::<i64>().ok(),
                    _ => None,
                }
                .ok_or_else(|| anyhow::anyhow!("names のキーが整数ではありません: {:?}", key))?;
                indexed.push((index, scalar_to_string(value)?));
            }
            indexed.sort_by_key(|(index, _)| *index);
            indexed.into_iter().map(|(_, name)| name).collect()
        }
        Some(other) => anyhow::bail!("names の形式が不正です: {:?}", other),
    };

    if let Some(nc) = definition.nc {
        if nc != names.len() {
            warn!(
                "[class_list] nc ({}) とクラス名の数 ({}) が一致しません",
                nc,
                names.len()
            );
        }
    }

    Ok(names)
}

fn scalar_to_string(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => anyhow::bail!("クラス名が文字列ではありません: {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_as_mapping_sorted_by_index() {
        let yaml = "path: ../datasets\nnames:\n  2: cat\n  0: person\n  1: bicycle\n";
        let names = parse_class_names(yaml).unwrap();
        assert_eq!(names, vec!["person", "bicycle", "cat"]);
    }

    #[test]
    fn test_names_as_list() {
        let yaml = "nc: 2\nnames: ['red blood cell', 'white blood cell']\n";
        let names = parse_class_names(yaml).unwrap();
        assert_eq!(names, vec!["red blood cell", "white blood cell"]);
    }

    #[test]
    fn test_missing_names_is_empty() {
        let names = parse_class_names("train: images/train\n").unwrap();
        assert!(names.is_empty());
    }

    #[test]
    fn test_non_ascii_names_preserved() {
        let yaml = "names:\n  0: 红细胞\n  1: 白细胞\n";
        let names = parse_class_names(yaml).unwrap();
        assert_eq!(names, vec!["红细胞", "白细胞"]);
    }

    #[test]
    fn test_invalid_yaml_is_error() {
        assert!(parse_class_names("names: [unclosed").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.yaml");
        std::fs::write(&path, "names:\n  0: a\n  1: b\n").unwrap();
        assert_eq!(load_class_names(&path).unwrap(), vec!["a", "b"]);
        assert!(load_class_names(&dir.path().join("missing.yaml")).is_err());
    }
}
