use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::live_view::{QueryEditor, SortSpec, VisualConfig};

pub const PRESET_PARAM: &str = "preset";
const DEFAULT_LINK_BASE: &str = "bpfq://local/";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Preset {
    pub name: String,
    pub query: String,
    #[serde(default)]
    pub visual: VisualConfig,
}

impl Preset {
    #[must_use]
    pub fn new(name: impl Into<String>, query: impl Into<String>, visual: VisualConfig) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            visual,
        }
    }
}

#[derive(Debug, Error)]
pub enum PresetError {
    #[error("unknown preset `{0}`")]
    Unknown(String),
    #[error("preset `{name}` is defined more than once in {path}")]
    Duplicate { name: String, path: PathBuf },
    #[error("failed to read presets file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse presets file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PresetsDocument {
    #[serde(default)]
    presets: Vec<Preset>,
}

/// Presets by unique name.
#[derive(Debug, Clone, Default)]
pub struct PresetCatalog {
    presets: BTreeMap<String, Preset>,
}

impl PresetCatalog {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        for preset in builtin_presets() {
            catalog.upsert(preset);
        }
        catalog
    }

    /// Built-ins overlaid with the user's presets file, if one exists.
    pub fn load_with_overrides(path: &Path) -> Result<Self, PresetError> {
        let mut catalog = Self::builtin();
        for preset in load_presets_file(path)? {
            catalog.upsert(preset);
        }
        Ok(catalog)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Preset> {
        self.presets.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.presets.contains_key(name)
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.presets.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.presets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    pub fn upsert(&mut self, preset: Preset) {
        self.presets.insert(preset.name.clone(), preset);
    }
}

/// Reads `[[presets]]` entries. A name used twice in the same file is an
/// error rather than a silent overwrite.
pub fn load_presets_file(path: &Path) -> Result<Vec<Preset>, PresetError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let raw = fs::read_to_string(path).map_err(|source| PresetError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }

    let doc: PresetsDocument = toml::from_str(&raw).map_err(|source| PresetError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let mut seen = std::collections::BTreeSet::new();
    for preset in &doc.presets {
        if !seen.insert(preset.name.as_str()) {
            return Err(PresetError::Duplicate {
                name: preset.name.clone(),
                path: path.to_path_buf(),
            });
        }
    }
    Ok(doc.presets)
}

fn builtin_presets() -> Vec<Preset> {
    vec![
        Preset::new(
            "kprobe",
            "select\n    str(args.path -> dentry -> d_name.name) as filename\nfrom\n    kprobe.vfs_open;",
            VisualConfig {
                columns: vec!["id".to_string(), "filename".to_string()],
                group_by: vec!["filename".to_string()],
                ..VisualConfig::placeholder_default()
            },
        ),
        Preset::new(
            "tracepoint",
            "select\n    comm,\n    str(args.filename) as filename\nfrom\n    tracepoint.syscalls.sys_enter_openat;",
            VisualConfig {
                columns: vec!["id".to_string(), "comm".to_string(), "filename".to_string()],
                sort: vec![SortSpec {
                    column: "id".to_string(),
                    descending: true,
                }],
                ..VisualConfig::placeholder_default()
            },
        ),
        Preset::new(
            "syscalls",
            "select\n    comm,\n    probe\nfrom\n    tracepoint.raw_syscalls.sys_enter;",
            VisualConfig {
                group_by: vec!["comm".to_string()],
                split_by: vec!["probe".to_string()],
                ..VisualConfig::placeholder_default()
            },
        ),
    ]
}

/// Addressable state a preset can be recovered from and written back to.
pub trait LinkState {
    fn preset_param(&self) -> Option<String>;
    fn set_preset_param(&mut self, name: &str);
}

/// Shareable link carrying the active preset as `?preset=<name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeepLink {
    url: Url,
}

impl DeepLink {
    pub fn parse(raw: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            url: Url::parse(raw)?,
        })
    }

    #[must_use]
    pub fn for_preset(name: &str) -> Self {
        let mut link = Self::default();
        link.set_preset_param(name);
        link
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl Default for DeepLink {
    fn default() -> Self {
        Self {
            url: Url::parse(DEFAULT_LINK_BASE).expect("default link base is a valid URL"),
        }
    }
}

impl fmt::Display for DeepLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

impl LinkState for DeepLink {
    fn preset_param(&self) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == PRESET_PARAM)
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
    }

    fn set_preset_param(&mut self, name: &str) {
        let retained: Vec<(String, String)> = self
            .url
            .query_pairs()
            .filter(|(key, _)| key != PRESET_PARAM)
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        let mut pairs = self.url.query_pairs_mut();
        pairs.clear();
        for (key, value) in &retained {
            pairs.append_pair(key, value);
        }
        pairs.append_pair(PRESET_PARAM, name);
    }
}

#[derive(Debug)]
pub struct PresetController {
    catalog: PresetCatalog,
    active: Option<String>,
    pending_visual: Option<VisualConfig>,
}

impl PresetController {
    #[must_use]
    pub fn new(catalog: PresetCatalog) -> Self {
        Self {
            catalog,
            active: None,
            pending_visual: None,
        }
    }

    #[must_use]
    pub fn catalog(&self) -> &PresetCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    #[must_use]
    pub fn has_pending_visual(&self) -> bool {
        self.pending_visual.is_some()
    }

    /// Puts the preset's query into the editor, records it in the link and
    /// arms its visual configuration for the next successful result batch.
    /// The caller is responsible for the resulting content-change submission.
    pub fn apply_preset<E, L>(
        &mut self,
        name: &str,
        editor: &mut E,
        link: &mut L,
    ) -> Result<&Preset, PresetError>
    where
        E: QueryEditor + ?Sized,
        L: LinkState + ?Sized,
    {
        let preset = self
            .catalog
            .get(name)
            .ok_or_else(|| PresetError::Unknown(name.to_string()))?;

        editor.set_value(&preset.query);
        link.set_preset_param(&preset.name);
        self.active = Some(preset.name.clone());
        self.pending_visual = Some(preset.visual.clone());
        info!(preset = %preset.name, "preset applied");
        Ok(preset)
    }

    /// The recognized preset named by the link, if any.
    #[must_use]
    pub fn preset_from_link<L: LinkState + ?Sized>(&self, link: &L) -> Option<String> {
        link.preset_param()
            .filter(|name| self.catalog.contains(name))
    }

    /// Hands out the armed visual configuration exactly once.
    pub fn take_pending_visual(&mut self) -> Option<VisualConfig> {
        self.pending_visual.take()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use tempfile::TempDir;

    use super::{
        load_presets_file, DeepLink, LinkState, PresetCatalog, PresetController, PresetError,
    };
    use crate::live_view::testing::FakeEditor;

    fn temp_presets_path(temp_dir: &TempDir) -> PathBuf {
        temp_dir.path().join("presets.toml")
    }

    #[test]
    fn builtin_catalog_has_unique_named_presets() {
        let catalog = PresetCatalog::builtin();
        assert_eq!(catalog.names(), vec!["kprobe", "syscalls", "tracepoint"]);
        let kprobe = catalog.get("kprobe").expect("kprobe preset");
        assert!(kprobe.query.contains("kprobe.vfs_open"));
        assert_eq!(kprobe.visual.group_by, vec!["filename".to_string()]);
    }

    #[test]
    fn missing_presets_file_loads_nothing() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let presets =
            load_presets_file(&temp_presets_path(&temp_dir)).expect("missing file is fine");
        assert!(presets.is_empty());
    }

    #[test]
    fn presets_file_overrides_and_extends_builtins() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_presets_path(&temp_dir);
        fs::write(
            &path,
            r#"
[[presets]]
name = "kprobe"
query = "select comm from kprobe.do_nanosleep;"

[[presets]]
name = "opens"
query = "select comm from tracepoint.syscalls.sys_enter_open;"

[presets.visual]
group_by = ["comm"]

[[presets.visual.filter]]
column = "comm"
op = "=="
value = "bash"
"#,
        )
        .expect("failed to write presets file");

        let catalog = PresetCatalog::load_with_overrides(&path).expect("presets should load");
        assert_eq!(catalog.len(), 4);
        assert_eq!(
            catalog.get("kprobe").map(|preset| preset.query.as_str()),
            Some("select comm from kprobe.do_nanosleep;")
        );
        let opens = catalog.get("opens").expect("custom preset");
        assert_eq!(opens.visual.group_by, vec!["comm".to_string()]);
        assert_eq!(opens.visual.filter[0].value, serde_json::json!("bash"));
    }

    #[test]
    fn duplicate_names_in_one_file_are_rejected() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_presets_path(&temp_dir);
        fs::write(
            &path,
            "[[presets]]\nname = \"dup\"\nquery = \"a\"\n\n[[presets]]\nname = \"dup\"\nquery = \"b\"\n",
        )
        .expect("failed to write presets file");

        let err = load_presets_file(&path).expect_err("duplicates must fail");
        assert!(matches!(err, PresetError::Duplicate { ref name, .. } if name == "dup"));
    }

    #[test]
    fn deep_link_round_trips_preset_and_keeps_other_params() {
        let mut link = DeepLink::parse("http://localhost:3030/?theme=dark&preset=old")
            .expect("valid link");
        assert_eq!(link.preset_param().as_deref(), Some("old"));

        link.set_preset_param("kprobe");
        assert_eq!(link.preset_param().as_deref(), Some("kprobe"));
        assert!(link.as_str().contains("theme=dark"));
        assert!(!link.as_str().contains("preset=old"));

        assert_eq!(DeepLink::default().preset_param(), None);
        assert_eq!(
            DeepLink::for_preset("syscalls").to_string(),
            "bpfq://local/?preset=syscalls"
        );
    }

    #[test]
    fn applying_preset_sets_editor_link_and_arms_visual_once() {
        let mut controller = PresetController::new(PresetCatalog::builtin());
        let mut editor = FakeEditor::with_text("select 1");
        let mut link = DeepLink::default();

        let query = controller
            .apply_preset("kprobe", &mut editor, &mut link)
            .expect("kprobe exists")
            .query
            .clone();

        assert_eq!(editor.text, query);
        assert_eq!(link.preset_param().as_deref(), Some("kprobe"));
        assert_eq!(controller.active(), Some("kprobe"));
        assert!(controller.take_pending_visual().is_some());
        assert!(controller.take_pending_visual().is_none());
    }

    #[test]
    fn unknown_preset_changes_nothing() {
        let mut controller = PresetController::new(PresetCatalog::builtin());
        let mut editor = FakeEditor::with_text("select 1");
        let mut link = DeepLink::default();

        let err = controller
            .apply_preset("nope", &mut editor, &mut link)
            .expect_err("unknown preset");
        assert!(matches!(err, PresetError::Unknown(ref name) if name == "nope"));
        assert_eq!(editor.text, "select 1");
        assert!(link.preset_param().is_none());
        assert!(!controller.has_pending_visual());
    }

    #[test]
    fn only_recognized_link_presets_are_auto_applied() {
        let controller = PresetController::new(PresetCatalog::builtin());
        assert_eq!(
            controller.preset_from_link(&DeepLink::for_preset("tracepoint")),
            Some("tracepoint".to_string())
        );
        assert_eq!(
            controller.preset_from_link(&DeepLink::for_preset("bogus")),
            None
        );
    }
}
