use crate::errors::ConfigError;
use crate::model::{Case, GraderSpec, Pack};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;

pub const PACK_FILE: &str = "pack.yaml";
pub const CASES_FILE: &str = "cases.yaml";

#[derive(Debug, Default, Deserialize)]
struct PackFile {
    id: Option<String>,
    name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    system_prompt: String,
    grader: Option<GraderSpec>,
}

#[derive(Debug, Default, Deserialize)]
struct CaseEntry {
    #[serde(default)]
    id: Value,
    prompt: Option<String>,
    instruction: Option<String>,
    carrier_text: Option<String>,
    #[serde(default)]
    expected: Value,
    #[serde(default)]
    expected_watermark: Value,
    #[serde(default)]
    expected_message: Value,
    metadata: Option<Map<String, Value>>,
    #[serde(default)]
    task_family: Value,
    #[serde(default)]
    scheme: Value,
}

/// Load `<packs_dir>/<name>/pack.yaml` and its `cases.yaml`.
pub fn load_pack(name: &str, packs_dir: &Path) -> Result<Pack, ConfigError> {
    let pack_path = packs_dir.join(name);

    let pack_yaml = pack_path.join(PACK_FILE);
    if !pack_yaml.exists() {
        return Err(ConfigError(format!(
            "pack config not found: {}",
            pack_yaml.display()
        )));
    }
    let cases_yaml = pack_path.join(CASES_FILE);
    if !cases_yaml.exists() {
        return Err(ConfigError(format!(
            "cases file not found: {}",
            cases_yaml.display()
        )));
    }

    let pack: Option<PackFile> = read_yaml(&pack_yaml)?;
    let pack = pack.unwrap_or_default();
    let entries: Value = read_yaml(&cases_yaml)?;

    let mut cases = Vec::new();
    if let Value::Array(items) = entries {
        for (idx, item) in items.into_iter().enumerate() {
            let entry: CaseEntry = serde_json::from_value(item).map_err(|e| {
                ConfigError(format!(
                    "invalid case #{} in {}: {}",
                    idx,
                    cases_yaml.display(),
                    e
                ))
            })?;
            cases.push(normalize_case(entry));
        }
    }

    tracing::debug!(event = "config.pack_loaded", pack = %name, cases = cases.len());

    Ok(Pack {
        id: pack.id.unwrap_or_else(|| name.to_string()),
        name: pack.name.unwrap_or_else(|| name.to_string()),
        description: pack.description,
        system_prompt: pack.system_prompt,
        grader: pack.grader,
        cases,
    })
}

/// Sorted names of the subdirectories of `packs_dir` that hold a `pack.yaml`.
pub fn list_packs(packs_dir: &Path) -> Result<Vec<String>, ConfigError> {
    if !packs_dir.is_dir() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(packs_dir).map_err(|e| {
        ConfigError(format!("failed to read {}: {}", packs_dir.display(), e))
    })?;

    let mut names = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() && path.join(PACK_FILE).exists() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("failed to read {}: {}", path.display(), e)))?;
    serde_yaml::from_str(&raw)
        .map_err(|e| ConfigError(format!("failed to parse YAML {}: {}", path.display(), e)))
}

fn normalize_case(entry: CaseEntry) -> Case {
    let prompt = match (entry.instruction.as_deref(), entry.carrier_text.as_deref()) {
        (Some(i), Some(c)) if !i.is_empty() && !c.is_empty() => format!("{}\n\n{}", i, c),
        _ => entry.prompt.unwrap_or_default(),
    };

    let expected = [
        entry.expected,
        entry.expected_watermark,
        entry.expected_message,
    ]
    .into_iter()
    .find_map(non_empty_text);

    let scheme = non_empty_text(entry.scheme.clone());
    let mut metadata = entry.metadata.unwrap_or_default();
    if is_truthy(&entry.task_family) {
        metadata.insert("task_family".into(), entry.task_family);
    }
    if is_truthy(&entry.scheme) {
        metadata.insert("scheme".into(), entry.scheme);
    }

    Case {
        id: non_empty_text(entry.id).unwrap_or_default(),
        prompt,
        expected,
        scheme,
        metadata,
    }
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Number(_) => true,
    }
}

/// Scalars as text; strings verbatim, other values in JSON form.
fn non_empty_text(v: Value) -> Option<String> {
    if !is_truthy(&v) {
        return None;
    }
    match v {
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}
