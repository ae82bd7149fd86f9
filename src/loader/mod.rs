//! Session Loader: region workbooks → schema-agnostic session records.
//!
//! Raw tables supply only the per-session denominators; grouped tables
//! supply the entity records. A sheet that cannot be used is logged and
//! skipped; the rest of the region still loads.

pub mod gender;
pub mod keywords;

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::alias::AliasResolver;
use crate::region::{Region, SessionKey};
use crate::schema::{
    ASSOCIATIONS, FIRST_APPEAR, NAME, NATIVE_NAME, RANK, SchemaError, TableSchema, VOTES,
};
use crate::store::models::EntityStats;
use crate::workbook::{Sheet, Workbook, WorkbookError};

static SESSION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*(\d+)").unwrap());
static ANNOTATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[（(]([^）)]+)[）)]").unwrap());

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("sheet name '{0}' does not start with a session number")]
    MalformedSessionName(String),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Workbook(#[from] WorkbookError),
    #[error("no usable {0} sessions")]
    NoSessions(Region),
}

pub type Result<T> = std::result::Result<T, LoadError>;

/// Session number from a sheet name: its leading digits.
pub fn parse_session_number(sheet_name: &str) -> Result<u32> {
    SESSION_RE
        .captures(sheet_name)
        .and_then(|c| c[1].parse().ok())
        .filter(|n| *n > 0)
        .ok_or_else(|| LoadError::MalformedSessionName(sheet_name.to_string()))
}

/// Extra works named in a sheet's parenthetical annotation: "12(东方虹龙洞、东方刚欲异闻)".
pub fn parse_extra_works(sheet_name: &str) -> Vec<String> {
    ANNOTATION_RE
        .captures(sheet_name)
        .map(|c| {
            c[1].split('、')
                .map(str::trim)
                .filter(|w| !w.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Split a pipe-delimited association field. Blank means no associations.
pub fn split_associations(field: Option<&str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in field.unwrap_or("").split('|').map(str::trim) {
        if !name.is_empty() && !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
    }
    out
}

/// One session after loading. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedSession {
    pub key: SessionKey,
    pub total_votes: Option<i64>,
    pub total_song_votes: Option<i64>,
    pub extra_works: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CharacterRecord {
    pub session: SessionKey,
    /// Canonical name.
    pub name: String,
    pub jp_name: Option<String>,
    pub first_appear: Option<String>,
    pub stats: EntityStats,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SongRecord {
    pub session: SessionKey,
    pub title: String,
    pub original_title: Option<String>,
    pub associations: Vec<String>,
    pub stats: EntityStats,
}

/// Everything one region contributes to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionData {
    pub region: Region,
    pub sessions: Vec<LoadedSession>,
    pub characters: Vec<CharacterRecord>,
    pub songs: Vec<SongRecord>,
}

/// A region's opened workbooks. Music tables are optional.
pub struct RegionWorkbooks {
    pub characters_raw: Workbook,
    pub characters_grouped: Workbook,
    pub music_raw: Option<Workbook>,
    pub music_grouped: Option<Workbook>,
}

/// Schemas for a region's four tables.
pub struct RegionSchemaSet<'a> {
    pub characters_raw: &'a TableSchema,
    pub characters_grouped: &'a TableSchema,
    pub music_raw: &'a TableSchema,
    pub music_grouped: &'a TableSchema,
}

/// Load one region. Fails only if no grouped character sheet is usable.
pub fn load_region(
    region: Region,
    books: &RegionWorkbooks,
    schemas: &RegionSchemaSet<'_>,
    resolver: &AliasResolver,
) -> Result<RegionData> {
    let char_totals = raw_totals(region, &books.characters_raw, schemas.characters_raw);
    let song_totals = match &books.music_raw {
        Some(wb) => raw_totals(region, wb, schemas.music_raw),
        None => BTreeMap::new(),
    };

    let mut sessions = Vec::new();
    let mut characters = Vec::new();

    for sheet in &books.characters_grouped.sheets {
        let number = match parse_session_number(&sheet.name) {
            Ok(n) => n,
            Err(e) => {
                log::warn!("{region} characters: {e}; skipping sheet");
                continue;
            }
        };
        let key = SessionKey::new(region, number);
        if sessions.iter().any(|s: &LoadedSession| s.key == key) {
            log::warn!("{region} characters: duplicate session {key} in sheet '{}'; skipping", sheet.name);
            continue;
        }

        let records = match load_character_sheet(region, key, sheet, schemas.characters_grouped, resolver) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("{region} characters: {e}; skipping sheet");
                continue;
            }
        };

        let total_votes = char_totals.get(&number).copied();
        if total_votes.is_none() {
            log::warn!("{region} session {key}: no raw character sheet; total votes unknown");
        }

        sessions.push(LoadedSession {
            key,
            total_votes,
            total_song_votes: song_totals.get(&number).copied(),
            extra_works: parse_extra_works(&sheet.name),
        });
        characters.extend(records);
    }

    if sessions.is_empty() {
        return Err(LoadError::NoSessions(region));
    }

    let mut songs = Vec::new();
    if let Some(wb) = &books.music_grouped {
        for sheet in &wb.sheets {
            let number = match parse_session_number(&sheet.name) {
                Ok(n) => n,
                Err(e) => {
                    log::warn!("{region} music: {e}; skipping sheet");
                    continue;
                }
            };
            let key = SessionKey::new(region, number);
            match load_song_sheet(region, key, sheet, schemas.music_grouped) {
                Ok(records) => songs.extend(records),
                Err(e) => log::warn!("{region} music: {e}; skipping sheet"),
            }
            if !sessions.iter().any(|s| s.key == key) {
                log::warn!("{region} music session {key} has no character session; songs kept without totals");
                sessions.push(LoadedSession {
                    key,
                    total_votes: None,
                    total_song_votes: song_totals.get(&number).copied(),
                    extra_works: Vec::new(),
                });
            }
        }
    }

    sessions.sort_by_key(|s| s.key);
    log::info!(
        "Loaded {region}: {} sessions, {} character rows, {} song rows",
        sessions.len(),
        characters.len(),
        songs.len()
    );

    Ok(RegionData { region, sessions, characters, songs })
}

/// Session number → summed votes of the raw table.
fn raw_totals(region: Region, wb: &Workbook, schema: &TableSchema) -> BTreeMap<u32, i64> {
    let mut totals = BTreeMap::new();
    for sheet in &wb.sheets {
        let number = match parse_session_number(&sheet.name) {
            Ok(n) => n,
            Err(e) => {
                log::warn!("{region} raw table {}: {e}; skipping sheet", wb.name);
                continue;
            }
        };
        let resolved = match schema.resolve(sheet) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("{region} raw table {}: {e}; skipping sheet", wb.name);
                continue;
            }
        };
        let total: i64 = sheet.rows.iter().filter_map(|row| resolved.int(row, VOTES)).sum();
        totals.insert(number, total);
    }
    totals
}

fn load_character_sheet(
    region: Region,
    key: SessionKey,
    sheet: &Sheet,
    schema: &TableSchema,
    resolver: &AliasResolver,
) -> Result<Vec<CharacterRecord>> {
    let resolved = schema.resolve(sheet)?;
    let has_name = resolved.has(NAME);
    let mut out = Vec::with_capacity(sheet.rows.len());
    let mut unresolved = Vec::new();

    for row in &sheet.rows {
        let jp_name = resolved.text(row, NATIVE_NAME).map(str::to_string);
        // With a canonical-name column, a blank cell skips the row; without
        // one, the native name is resolved through the translation table.
        let source = if has_name { resolved.text(row, NAME) } else { jp_name.as_deref() };
        let Some(source) = source else { continue };
        if !has_name && !resolver.is_known(source, region) {
            unresolved.push(source.to_string());
        }
        let name = resolver.resolve(source, region);
        if name.is_empty() {
            continue;
        }

        out.push(CharacterRecord {
            session: key,
            name,
            jp_name,
            first_appear: resolved.code(row, FIRST_APPEAR),
            stats: EntityStats {
                r: resolved.int(row, RANK),
                v: resolved.int(row, VOTES),
                extra: resolved.extras(row),
            },
        });
    }
    if !unresolved.is_empty() {
        log::warn!(
            "{region} {key}: {} native names missing from the name table: {}",
            unresolved.len(),
            unresolved.join(", ")
        );
    }
    Ok(out)
}

fn load_song_sheet(
    region: Region,
    key: SessionKey,
    sheet: &Sheet,
    schema: &TableSchema,
) -> Result<Vec<SongRecord>> {
    let resolved = schema.resolve(sheet)?;
    let mut out = Vec::with_capacity(sheet.rows.len());

    for row in &sheet.rows {
        let original_title = resolved.text(row, NATIVE_NAME).map(str::to_string);
        let title = match resolved.text(row, NAME).or(original_title.as_deref()) {
            Some(t) => t.to_string(),
            None => continue,
        };
        if original_title.is_none() && region.uses_native_names() {
            log::debug!("{region} {key}: song '{title}' has no original title");
        }
        out.push(SongRecord {
            session: key,
            title,
            original_title,
            associations: split_associations(resolved.text(row, ASSOCIATIONS)),
            stats: EntityStats {
                r: resolved.int(row, RANK),
                v: resolved.int(row, VOTES),
                extra: resolved.extras(row),
            },
        });
    }
    Ok(out)
}
