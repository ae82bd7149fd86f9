use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;

use crate::alias::Replacement;
use crate::outliers::OutlierMode;
use crate::region::Region;
use crate::schema::{ReferenceSchemas, RegionSchemaOverrides, RegionSchemas, TableSchema};

/// Application configuration loaded from TOML config file.
/// All fields have defaults, so the config file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Base directory for relative source paths (defaults to the working directory).
    pub data_dir: Option<PathBuf>,
    /// Aggregation store path (overrides the XDG default).
    pub store_path: Option<PathBuf>,
    /// Where analysis outputs (tag heat JSON, wiki text) are written.
    pub output_dir: Option<PathBuf>,
    pub sources: SourcesConfig,
    pub analysis: AnalysisConfig,
    /// Curated alias table: source spelling → canonical name.
    pub aliases: BTreeMap<String, String>,
    /// Substring rewrites applied while cleaning names.
    pub replacements: Vec<Replacement>,
    pub schemas: SchemaConfig,
    /// Gender sheet label → bucket. Merged over the built-in labels.
    pub gender_labels: BTreeMap<String, GenderBucket>,
    pub wiki: WikiConfig,
}

/// Workbook locations. Relative paths are resolved against `data_dir`.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub cn: RegionSources,
    pub jp: RegionSources,
    /// Name translation table (native name ↔ canonical name ↔ first appearance).
    pub names: PathBuf,
    /// Music info table (original title ↔ translated title ↔ associated characters).
    pub music_info: PathBuf,
    /// Character keyword table.
    pub tags: PathBuf,
    /// Per-session gender breakdown workbook.
    pub gender: Option<PathBuf>,
    /// Region the gender sheets belong to.
    pub gender_region: Region,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            cn: RegionSources::for_region(Region::Cn),
            jp: RegionSources::for_region(Region::Jp),
            names: PathBuf::from("names.csv"),
            music_info: PathBuf::from("music_info.csv"),
            tags: PathBuf::from("character_tags.csv"),
            gender: Some(PathBuf::from("gender")),
            gender_region: Region::Jp,
        }
    }
}

impl SourcesConfig {
    pub fn region(&self, region: Region) -> &RegionSources {
        match region {
            Region::Cn => &self.cn,
            Region::Jp => &self.jp,
        }
    }
}

/// The four vote workbooks of one region.
#[derive(Debug, Clone, Deserialize)]
pub struct RegionSources {
    pub characters_raw: PathBuf,
    pub characters_grouped: PathBuf,
    pub music_raw: PathBuf,
    pub music_grouped: PathBuf,
}

impl RegionSources {
    pub fn for_region(region: Region) -> Self {
        let code = region.code();
        Self {
            characters_raw: PathBuf::from(format!("{code}/characters")),
            characters_grouped: PathBuf::from(format!("{code}/characters_grouped")),
            music_raw: PathBuf::from(format!("{code}/music")),
            music_grouped: PathBuf::from(format!("{code}/music_grouped")),
        }
    }
}

/// Thresholds for the analysis passes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Characters ranked at or above this boundary are excluded from tag heat.
    pub rank_boundary: i64,
    /// |z| beyond which a character or its songs count as extreme.
    pub outlier_threshold: f64,
    pub outlier_mode: OutlierMode,
    /// Cross-region ratio deviation flag threshold.
    pub ratio_threshold: f64,
    /// Minimum first-appearance work code for grouped analysis.
    pub work_floor: f64,
    /// Minimum |CN − JP| heat difference worth reporting.
    pub tag_difference_threshold: f64,
    pub top_n: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            rank_boundary: 10,
            outlier_threshold: 2.5,
            outlier_mode: OutlierMode::StrictXor,
            ratio_threshold: 0.5,
            work_floor: 6.0,
            tag_difference_threshold: 0.01,
            top_n: 30,
        }
    }
}

/// Header schema overrides, merged field-by-field over the built-ins.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub cn: RegionSchemaOverrides,
    pub jp: RegionSchemaOverrides,
    pub reference: ReferenceSchemaOverrides,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ReferenceSchemaOverrides {
    pub names: Option<TableSchema>,
    pub music_info: Option<TableSchema>,
    pub tags: Option<TableSchema>,
    pub gender: Option<TableSchema>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenderBucket {
    M,
    F,
    O,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WikiConfig {
    pub base_url: String,
    /// Page suffixes fetched per character; texts are concatenated.
    pub suffixes: Vec<String>,
    /// Cache directory (defaults to the XDG cache dir).
    pub cache_dir: Option<PathBuf>,
    pub timeout_secs: u64,
    pub retries: u32,
    /// Initial backoff between retries; doubles on each attempt.
    pub backoff_ms: u64,
    /// Names never fetched.
    pub skip: Vec<String>,
    pub user_agent: String,
    /// When set, keep only the infobox row with this header (e.g. "萌点")
    /// instead of the whole page text.
    pub infobox_label: Option<String>,
}

impl Default for WikiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://thbwiki.cc/".to_string(),
            suffixes: vec!["/二次设定".to_string(), "/".to_string()],
            cache_dir: None,
            timeout_secs: 10,
            retries: 3,
            backoff_ms: 500,
            skip: vec!["蕾拉·普莉兹姆利巴".to_string()],
            user_agent: format!("{}/{}", crate::APP_NAME, env!("CARGO_PKG_VERSION")),
            infobox_label: None,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/thvote/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => {
                log::debug!("No config directory, using defaults");
                Self::default()
            }
        }
    }

    /// Load from an explicit path, with the same fallback rules as [`load`](Self::load).
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            log::debug!("No config file at {}, using defaults", path.display());
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<AppConfig>(&contents) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                Self::default()
            }
        }
    }

    /// Resolve a source path against `data_dir`.
    pub fn source_path(&self, path: &Path) -> PathBuf {
        match &self.data_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Store path: config > XDG default.
    pub fn store_path(&self) -> PathBuf {
        self.store_path.clone().unwrap_or_else(default_store_path)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Built-in region schemas with config overrides applied.
    pub fn region_schemas(&self, region: Region) -> RegionSchemas {
        let overrides = match region {
            Region::Cn => &self.schemas.cn,
            Region::Jp => &self.schemas.jp,
        };
        RegionSchemas::for_region(region).with_overrides(overrides)
    }

    pub fn reference_schemas(&self) -> ReferenceSchemas {
        let base = ReferenceSchemas::default();
        let o = &self.schemas.reference;
        let pick = |b: &TableSchema, o: &Option<TableSchema>| match o {
            Some(o) => b.merged(o),
            None => b.clone(),
        };
        ReferenceSchemas {
            names: pick(&base.names, &o.names),
            music_info: pick(&base.music_info, &o.music_info),
            tags: pick(&base.tags, &o.tags),
            gender: pick(&base.gender, &o.gender),
        }
    }

    /// Gender labels: built-ins, then config entries on top.
    pub fn gender_labels(&self) -> BTreeMap<String, GenderBucket> {
        let mut labels = BTreeMap::from([
            ("男性".to_string(), GenderBucket::M),
            ("女性".to_string(), GenderBucket::F),
            ("其他".to_string(), GenderBucket::O),
            ("male".to_string(), GenderBucket::M),
            ("female".to_string(), GenderBucket::F),
            ("other".to_string(), GenderBucket::O),
        ]);
        labels.extend(self.gender_labels.iter().map(|(k, v)| (k.trim().to_string(), *v)));
        labels
    }

    /// Wiki cache directory: config > XDG cache dir.
    pub fn wiki_cache_dir(&self) -> PathBuf {
        if let Some(dir) = &self.wiki.cache_dir {
            return dir.clone();
        }
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.cache_dir().join("wiki"))
            .unwrap_or_else(|| PathBuf::from(".wiki_cache"))
    }

    /// Get the config file path.
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default store path using XDG data directory.
pub fn default_store_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("touhou_vote.json")
    } else {
        PathBuf::from("touhou_vote.json")
    }
}
