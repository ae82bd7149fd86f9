//! Orchestration: open configured workbooks and run the library passes.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};

use crate::alias::AliasResolver;
use crate::config::AppConfig;
use crate::grouping::{self, GroupingReport};
use crate::loader::{self, RegionData, RegionSchemaSet, RegionWorkbooks};
use crate::region::{Region, SessionKey};
use crate::store::{AggregationStore, StoreInputs};
use crate::workbook::Workbook;

fn open(config: &AppConfig, path: &Path) -> Result<Workbook> {
    let full = config.source_path(path);
    Workbook::open(&full).with_context(|| format!("Failed to open workbook {}", full.display()))
}

/// Open an optional workbook, logging instead of failing when it is absent.
fn open_optional(config: &AppConfig, path: &Path, what: &str) -> Option<Workbook> {
    match open(config, path) {
        Ok(wb) => Some(wb),
        Err(e) => {
            log::warn!("{what}: {e:#}; continuing without it");
            None
        }
    }
}

/// Alias resolver from the config alias table plus the name translation table.
/// A missing or malformed name table leaves only the curated aliases.
pub fn build_resolver(config: &AppConfig) -> AliasResolver {
    let schemas = config.reference_schemas();
    let table = open_optional(config, &config.sources.names, "name table");
    let sheet = table.as_ref().and_then(|wb| wb.first_sheet().ok());
    if let Some(sheet) = sheet {
        match AliasResolver::from_name_table(sheet, &schemas, &config.aliases, &config.replacements) {
            Ok(resolver) => return resolver,
            Err(e) => log::warn!("name table: {e}; using curated aliases only"),
        }
    }
    AliasResolver::new(&config.aliases, &BTreeMap::new(), &config.replacements)
}

/// Load one region's grouped data.
pub fn load_region(config: &AppConfig, region: Region, resolver: &AliasResolver) -> Result<RegionData> {
    let sources = config.sources.region(region);
    let books = RegionWorkbooks {
        characters_raw: open(config, &sources.characters_raw)?,
        characters_grouped: open(config, &sources.characters_grouped)?,
        music_raw: open_optional(config, &sources.music_raw, &format!("{region} raw music")),
        music_grouped: open_optional(config, &sources.music_grouped, &format!("{region} grouped music")),
    };
    let schemas = config.region_schemas(region);
    let set = RegionSchemaSet {
        characters_raw: &schemas.characters_raw,
        characters_grouped: &schemas.characters_grouped,
        music_raw: &schemas.music_raw,
        music_grouped: &schemas.music_grouped,
    };
    loader::load_region(region, &books, &set, resolver).with_context(|| format!("Failed to load {region} sessions"))
}

/// Load every configured source and fold it into a fresh store.
pub fn build_store(config: &AppConfig, resolver: &AliasResolver) -> Result<AggregationStore> {
    let mut regions = Vec::with_capacity(Region::ALL.len());
    for region in Region::ALL {
        regions.push(load_region(config, region, resolver)?);
    }

    let refs = config.reference_schemas();

    let keywords: BTreeMap<String, BTreeSet<String>> = open_optional(config, &config.sources.tags, "tag table")
        .and_then(|wb| {
            let sheet = wb.first_sheet().ok()?;
            match loader::keywords::load_keywords(sheet, &refs.tags, resolver) {
                Ok(k) => Some(k),
                Err(e) => {
                    log::warn!("tag table: {e}; continuing without keywords");
                    None
                }
            }
        })
        .unwrap_or_default();

    let gender = config
        .sources
        .gender
        .as_ref()
        .and_then(|path| open_optional(config, path, "gender workbook"))
        .map(|wb| {
            loader::gender::load_gender(&wb, &refs.gender, &config.gender_labels(), config.sources.gender_region)
        })
        .unwrap_or_default();

    Ok(AggregationStore::build(StoreInputs {
        regions: &regions,
        keywords: &keywords,
        gender,
        gender_region: config.sources.gender_region,
    }))
}

/// Regenerate both regions' grouped workbooks from the raw tables.
pub fn group_workbooks(config: &AppConfig) -> Result<Vec<(String, GroupingReport)>> {
    let refs = config.reference_schemas();
    let names_wb = open(config, &config.sources.names)?;
    let names = names_wb.first_sheet().context("Name table is empty")?;
    let music_info_wb = open_optional(config, &config.sources.music_info, "music info table");

    let mut reports = Vec::new();
    for region in Region::ALL {
        let sources = config.sources.region(region);
        let schemas = config.region_schemas(region);

        let raw = open(config, &sources.characters_raw)?;
        let (grouped, report) = grouping::group_characters(
            &raw,
            &schemas.characters_raw,
            names,
            &refs.names,
            region,
            config.analysis.work_floor,
        )
        .with_context(|| format!("Failed to group {region} characters"))?;
        let out = config.source_path(&sources.characters_grouped);
        grouped.write(&out).with_context(|| format!("Failed to write {}", out.display()))?;
        reports.push((format!("{region} characters"), report));

        let Some(info) = music_info_wb.as_ref().and_then(|wb| wb.first_sheet().ok()) else {
            continue;
        };
        let Some(raw) = open_optional(config, &sources.music_raw, &format!("{region} raw music")) else {
            continue;
        };
        let (grouped, report) =
            grouping::group_songs(&raw, &schemas.music_raw, info, &refs.music_info, region)
                .with_context(|| format!("Failed to group {region} music"))?;
        let out = config.source_path(&sources.music_grouped);
        grouped.write(&out).with_context(|| format!("Failed to write {}", out.display()))?;
        reports.push((format!("{region} music"), report));
    }
    Ok(reports)
}

/// Cleaned names to collect wiki text for: the characters of `session`, or
/// every character whose first-appearance work is at or above the floor.
pub fn wiki_names(
    store: &AggregationStore,
    resolver: &AliasResolver,
    session: Option<SessionKey>,
    floor: f64,
) -> Vec<String> {
    let names: Vec<&String> = match session {
        Some(key) => store.session(&key).map(|s| s.chars.iter().collect()).unwrap_or_default(),
        None => store
            .characters
            .iter()
            .filter(|(_, c)| {
                c.first_appear
                    .as_deref()
                    .and_then(|w| w.parse::<f64>().ok())
                    .is_some_and(|w| w >= floor)
            })
            .map(|(name, _)| name)
            .collect(),
    };
    let mut seen = BTreeSet::new();
    names
        .into_iter()
        .map(|n| resolver.clean(n))
        .filter(|n| !n.is_empty() && seen.insert(n.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn fixture() -> (tempfile::TempDir, AppConfig) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(
            &root.join("names.csv"),
            "日文名,译名,首次出现作品\nチルノ,琪露诺,6\n博麗霊夢,博丽灵梦,1\n射命丸文,射命丸文,9.5\n",
        );
        write(&root.join("cn/characters/1.csv"), "译名,票数\n琪露诺,30\n博丽灵梦,50\n射命丸文,20\n");
        write(&root.join("jp/characters/3.csv"), "日文名,票数\nチルノ,60\n博麗霊夢,100\n射命丸文,40\n");
        write(&root.join("character_tags.csv"), "译名,keywords\n琪露诺,笨蛋|冰\n射命丸文,记者、冰\n");
        write(&root.join("gender/3.csv"), "性别,票数\n男性,150\n女性,50\n");

        let config = AppConfig {
            data_dir: Some(root.to_path_buf()),
            ..Default::default()
        };
        (dir, config)
    }

    #[test]
    fn test_group_then_build() {
        let (_dir, config) = fixture();
        let reports = group_workbooks(&config).unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|(_, r)| r.kept == 2 && r.dropped == 1));

        let resolver = build_resolver(&config);
        let store = build_store(&config, &resolver).unwrap();

        let cirno = &store.characters["琪露诺"];
        assert_eq!(cirno.sessions.len(), 2);
        assert_eq!(cirno.jp_name.as_deref(), Some("チルノ"));
        assert_eq!(cirno.keywords.len(), 2);
        // Totals come from the raw tables, including the ungrouped 博丽灵梦
        assert_eq!(store.total_votes(&SessionKey::new(Region::Cn, 1)), Some(100));
        assert_eq!(store.total_votes(&SessionKey::new(Region::Jp, 3)), Some(200));
        assert!(!store.characters.contains_key("博丽灵梦"));
        assert_eq!(store.gender[&SessionKey::new(Region::Jp, 3)].m, Some(150));
        assert!(store.meta.missing_gender.is_empty());

        let heat = crate::tags::compute_relative_heat(&store, 0);
        let cn = &heat[&Region::Cn][&1];
        assert_eq!(cn.len(), 1);
        assert_eq!(cn[0].0, "冰");
        assert!((cn[0].1 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_missing_region_fails() {
        let (dir, config) = fixture();
        fs::remove_dir_all(dir.path().join("jp")).unwrap();
        let resolver = build_resolver(&config);
        assert!(build_store(&config, &resolver).is_err());
    }

    #[test]
    fn test_wiki_names_filters_by_floor() {
        let (_dir, config) = fixture();
        group_workbooks(&config).unwrap();
        let resolver = build_resolver(&config);
        let store = build_store(&config, &resolver).unwrap();
        let names = wiki_names(&store, &resolver, None, 7.0);
        assert_eq!(names, vec!["射命丸文"]);
        let session = wiki_names(&store, &resolver, Some(SessionKey::new(Region::Jp, 3)), 0.0);
        assert_eq!(session.len(), 2);
    }
}
