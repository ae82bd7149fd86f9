use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::region::Region;
use crate::schema::{NAME, NATIVE_NAME, ReferenceSchemas};
use crate::workbook::Sheet;

// Full- or half-width brackets and whatever they enclose: "小恶魔（东方Project）"
static BRACKETED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[（(][^）)]*[）)]").unwrap());

static NON_WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\W+").unwrap());

/// Subtitle separators: everything from the first one onward is dropped.
const TILDES: &[char] = &['~', '～', '〜'];

/// Substring rewrite applied while cleaning (e.g. "天为" → "帝").
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Replacement {
    pub from: String,
    pub to: String,
}

/// Immutable canonical-name registry shared by every pass.
///
/// Built once from the curated alias table and the name translation table;
/// after construction nothing mutates it.
#[derive(Debug, Clone, Default)]
pub struct AliasResolver {
    replacements: Vec<Replacement>,
    /// Cleaned source name → canonical name (chains already collapsed).
    aliases: HashMap<String, String>,
    /// Cleaned native (Japanese) name → canonical name.
    native: HashMap<String, String>,
    /// Every canonical name either table can produce.
    canonical: HashSet<String>,
}

impl AliasResolver {
    pub fn new(
        aliases: &BTreeMap<String, String>,
        native: &BTreeMap<String, String>,
        replacements: &[Replacement],
    ) -> Self {
        let mut resolver = AliasResolver {
            replacements: replacements
                .iter()
                .filter(|r| !r.from.is_empty() && !r.to.contains(&r.from))
                .cloned()
                .collect(),
            ..Default::default()
        };

        let cleaned: HashMap<String, String> = aliases
            .iter()
            .map(|(from, to)| (resolver.clean(from), to.trim().to_string()))
            .filter(|(from, to)| !from.is_empty() && !to.is_empty() && from != to)
            .collect();

        // Collapse chains (a → b → c becomes a → c) so one lookup suffices.
        for from in cleaned.keys() {
            let mut target = &cleaned[from];
            let mut seen = HashSet::from([from.as_str()]);
            while let Some(next) = cleaned.get(target) {
                if !seen.insert(target.as_str()) {
                    log::warn!("Alias cycle through '{from}', stopping at '{target}'");
                    break;
                }
                target = next;
            }
            resolver.aliases.insert(from.clone(), target.clone());
        }

        for (jp, cn) in native {
            let key = resolver.clean(jp);
            let cn = cn.trim();
            if key.is_empty() || cn.is_empty() {
                continue;
            }
            let canonical = resolver.aliases.get(cn).cloned().unwrap_or_else(|| cn.to_string());
            resolver.native.insert(key, canonical);
        }

        resolver.canonical = resolver
            .aliases
            .values()
            .chain(resolver.native.values())
            .cloned()
            .collect();

        resolver
    }

    /// Build from the name translation table (native ↔ canonical).
    pub fn from_name_table(
        sheet: &Sheet,
        schemas: &ReferenceSchemas,
        aliases: &BTreeMap<String, String>,
        replacements: &[Replacement],
    ) -> Result<Self, crate::schema::SchemaError> {
        let resolved = schemas.names.resolve(sheet)?;
        let mut native = BTreeMap::new();
        for row in &sheet.rows {
            if let (Some(jp), Some(cn)) = (resolved.text(row, NATIVE_NAME), resolved.text(row, NAME)) {
                native.insert(jp.to_string(), cn.to_string());
            }
        }
        log::info!(
            "Alias resolver: {} curated aliases, {} native names",
            aliases.len(),
            native.len()
        );
        Ok(Self::new(aliases, &native, replacements))
    }

    /// Strip bracketed annotations and tilde subtitles, apply substring
    /// rewrites, trim. Repeated until the name stops changing, so a rewrite
    /// whose output feeds an earlier rule still yields a stable name.
    pub fn clean(&self, raw: &str) -> String {
        let mut name = self.clean_once(raw);
        for _ in 0..=self.replacements.len() {
            let next = self.clean_once(&name);
            if next == name {
                return name;
            }
            name = next;
        }
        log::warn!("Replacement rules do not settle on '{raw}'; check for cycles");
        name
    }

    fn clean_once(&self, raw: &str) -> String {
        let mut name = BRACKETED_RE.replace_all(raw, "").into_owned();
        if let Some(pos) = name.find(TILDES) {
            name.truncate(pos);
        }
        for r in &self.replacements {
            name = name.replace(&r.from, &r.to);
        }
        name.trim().to_string()
    }

    /// Map a name in `region`'s convention to its canonical form.
    /// Unmapped names come back cleaned but otherwise unchanged.
    pub fn resolve(&self, raw: &str, region: Region) -> String {
        let trimmed = raw.trim();
        if self.canonical.contains(trimmed) {
            return trimmed.to_string();
        }

        let cleaned = self.clean(trimmed);
        if let Some(target) = self.aliases.get(&cleaned) {
            return target.clone();
        }
        if region.uses_native_names() {
            if let Some(target) = self.native.get(&cleaned) {
                return target.clone();
            }
        }
        cleaned
    }

    /// Whether `raw` maps onto a known canonical name.
    pub fn is_known(&self, raw: &str, region: Region) -> bool {
        self.canonical.contains(&self.resolve(raw, region))
    }
}

/// Stable id: lowercase canonical name with non-word characters removed.
pub fn character_id(canonical: &str) -> String {
    NON_WORD_RE.replace_all(canonical, "").to_lowercase()
}
