//! Header schemas: which spreadsheet columns feed which logical fields.
//!
//! Each source table gets a [`TableSchema`]: a list of logical fields, each
//! with the header variants it may appear under. A schema is resolved once
//! per sheet into a [`ResolvedSchema`] (field → column index); everything
//! downstream reads rows through logical field names only.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::region::Region;
use crate::workbook::{clean_code, parse_float, parse_int, Sheet};

// Logical fields with a fixed meaning in the record model.
pub const NAME: &str = "name";
pub const NATIVE_NAME: &str = "native_name";
pub const RANK: &str = "rank";
pub const VOTES: &str = "votes";
pub const FIRST_APPEAR: &str = "first_appear";
pub const ASSOCIATIONS: &str = "associations";
pub const KEYWORDS: &str = "keywords";
pub const GENDER: &str = "gender";

const CORE_FIELDS: &[&str] = &[
    NAME,
    NATIVE_NAME,
    RANK,
    VOTES,
    FIRST_APPEAR,
    ASSOCIATIONS,
    KEYWORDS,
    GENDER,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Int,
    Float,
    #[default]
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Logical field name (one of the core fields, or an extra stat key).
    pub field: String,
    /// Accepted header spellings, tried in order.
    pub headers: Vec<String>,
    #[serde(default)]
    pub kind: ValueKind,
    #[serde(default)]
    pub required: bool,
    /// Which of several identically-named columns to use (0 = first).
    #[serde(default)]
    pub occurrence: usize,
}

impl ColumnSpec {
    fn new(field: &str, headers: &[&str], kind: ValueKind) -> Self {
        Self {
            field: field.to_string(),
            headers: headers.iter().map(|h| h.to_string()).collect(),
            kind,
            required: false,
            occurrence: 0,
        }
    }

    fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn nth(mut self, occurrence: usize) -> Self {
        self.occurrence = occurrence;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnSpec>,
}

#[derive(Error, Debug, PartialEq)]
pub enum SchemaError {
    #[error("sheet '{sheet}' is missing column for '{field}' (tried {headers:?})")]
    MissingColumn {
        sheet: String,
        field: String,
        headers: Vec<String>,
    },
}

impl TableSchema {
    /// Resolve this schema against a sheet's (already trimmed) headers.
    /// Absent optional columns are simply absent; an absent required
    /// column is an error for the whole sheet.
    pub fn resolve(&self, sheet: &Sheet) -> Result<ResolvedSchema, SchemaError> {
        let mut columns = BTreeMap::new();
        let mut kinds = BTreeMap::new();

        for spec in &self.columns {
            let found = spec
                .headers
                .iter()
                .find_map(|h| sheet.column(h.trim(), spec.occurrence));
            match found {
                Some(idx) => {
                    columns.insert(spec.field.clone(), idx);
                    kinds.insert(spec.field.clone(), spec.kind);
                }
                None if spec.required => {
                    return Err(SchemaError::MissingColumn {
                        sheet: sheet.name.clone(),
                        field: spec.field.clone(),
                        headers: spec.headers.clone(),
                    });
                }
                None => {}
            }
        }

        Ok(ResolvedSchema { columns, kinds })
    }

    /// Preferred header for a field (its first spelling), used when writing.
    pub fn header_for(&self, field: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.field == field)
            .and_then(|c| c.headers.first())
            .map(String::as_str)
    }

    /// Replace or add columns from an override schema, matched by field.
    pub fn merged(&self, overrides: &TableSchema) -> TableSchema {
        let mut columns = self.columns.clone();
        for spec in &overrides.columns {
            match columns.iter_mut().find(|c| c.field == spec.field) {
                Some(existing) => *existing = spec.clone(),
                None => columns.push(spec.clone()),
            }
        }
        TableSchema { columns }
    }
}

/// A schema bound to one sheet's column positions.
#[derive(Debug, Clone, Default)]
pub struct ResolvedSchema {
    columns: BTreeMap<String, usize>,
    kinds: BTreeMap<String, ValueKind>,
}

impl ResolvedSchema {
    pub fn has(&self, field: &str) -> bool {
        self.columns.contains_key(field)
    }

    pub fn text<'a>(&self, row: &'a [String], field: &str) -> Option<&'a str> {
        let col = *self.columns.get(field)?;
        row.get(col).map(|c| c.trim()).filter(|c| !c.is_empty())
    }

    pub fn int(&self, row: &[String], field: &str) -> Option<i64> {
        parse_int(self.text(row, field))
    }

    pub fn float(&self, row: &[String], field: &str) -> Option<f64> {
        parse_float(self.text(row, field))
    }

    pub fn code(&self, row: &[String], field: &str) -> Option<String> {
        clean_code(self.text(row, field))
    }

    /// Every non-core field present in this sheet, converted per its kind.
    /// Values are kept as-is; blank or unparseable cells are left out.
    pub fn extras(&self, row: &[String]) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        for (field, kind) in &self.kinds {
            if CORE_FIELDS.contains(&field.as_str()) {
                continue;
            }
            let value = match kind {
                ValueKind::Int => self.int(row, field).map(Value::from),
                ValueKind::Float => self.float(row, field).map(Value::from),
                ValueKind::Text => self.text(row, field).map(Value::from),
            };
            if let Some(v) = value {
                out.insert(field.clone(), v);
            }
        }
        out
    }
}

/// Built-in schemas for one region's four vote tables.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionSchemas {
    pub characters_raw: TableSchema,
    pub characters_grouped: TableSchema,
    pub music_raw: TableSchema,
    pub music_grouped: TableSchema,
}

/// Optional per-table overrides from the config file.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct RegionSchemaOverrides {
    pub characters_raw: Option<TableSchema>,
    pub characters_grouped: Option<TableSchema>,
    pub music_raw: Option<TableSchema>,
    pub music_grouped: Option<TableSchema>,
}

impl RegionSchemas {
    pub fn for_region(region: Region) -> Self {
        match region {
            Region::Cn => cn_schemas(),
            Region::Jp => jp_schemas(),
        }
    }

    pub fn with_overrides(&self, overrides: &RegionSchemaOverrides) -> Self {
        let pick = |base: &TableSchema, o: &Option<TableSchema>| match o {
            Some(o) => base.merged(o),
            None => base.clone(),
        };
        Self {
            characters_raw: pick(&self.characters_raw, &overrides.characters_raw),
            characters_grouped: pick(&self.characters_grouped, &overrides.characters_grouped),
            music_raw: pick(&self.music_raw, &overrides.music_raw),
            music_grouped: pick(&self.music_grouped, &overrides.music_grouped),
        }
    }
}

/// Schemas for the reference tables shared by both regions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceSchemas {
    /// Name translation table: native name, canonical name, first appearance.
    pub names: TableSchema,
    /// Music info table: original title, translated title, associations.
    pub music_info: TableSchema,
    /// Keyword table: canonical name, keyword list.
    pub tags: TableSchema,
    /// Gender breakdown sheets.
    pub gender: TableSchema,
}

impl Default for ReferenceSchemas {
    fn default() -> Self {
        use ValueKind::*;
        Self {
            names: TableSchema {
                columns: vec![
                    ColumnSpec::new(NAME, &["译名", "name"], Text).required(),
                    ColumnSpec::new(NATIVE_NAME, &["日文名", "native_name"], Text),
                    ColumnSpec::new(FIRST_APPEAR, &["首次出现作品", "first_appear"], Text),
                ],
            },
            music_info: TableSchema {
                columns: vec![
                    ColumnSpec::new(NATIVE_NAME, &["曲目", "original_title"], Text),
                    ColumnSpec::new(NAME, &["译名", "title"], Text),
                    ColumnSpec::new(ASSOCIATIONS, &["所属角色", "characters"], Text).required(),
                ],
            },
            tags: TableSchema {
                columns: vec![
                    ColumnSpec::new(NAME, &["译名", "name"], Text).required(),
                    ColumnSpec::new(KEYWORDS, &["keywords", "萌点", "关键词"], Text).required(),
                ],
            },
            gender: TableSchema {
                columns: vec![
                    ColumnSpec::new(GENDER, &["性别", "gender"], Text).required(),
                    ColumnSpec::new(VOTES, &["票数", "votes"], Int).required(),
                ],
            },
        }
    }
}

fn cn_schemas() -> RegionSchemas {
    use ValueKind::*;
    RegionSchemas {
        characters_raw: TableSchema {
            columns: vec![
                ColumnSpec::new(NAME, &["译名", "name"], Text),
                ColumnSpec::new(VOTES, &["票数", "votes"], Int).required(),
            ],
        },
        characters_grouped: TableSchema {
            columns: vec![
                ColumnSpec::new(NAME, &["译名", "name"], Text).required(),
                ColumnSpec::new(RANK, &["名次", "rank"], Int),
                ColumnSpec::new(VOTES, &["票数", "votes"], Int).required(),
                ColumnSpec::new(FIRST_APPEAR, &["首次出现作品", "first_appear"], Text),
                ColumnSpec::new("bnum", &["本命数"], Int),
                ColumnSpec::new("brate", &["本命率"], Float),
                ColumnSpec::new("bw", &["本命加权"], Float),
                ColumnSpec::new("v_pct", &["票数占比"], Float),
                ColumnSpec::new("b_pct", &["本命占比"], Float),
                ColumnSpec::new("male_pct", &["男性比例"], Float),
                ColumnSpec::new("female_pct", &["女性比例"], Float),
            ],
        },
        music_raw: TableSchema {
            columns: vec![
                ColumnSpec::new(NAME, &["译名", "title"], Text),
                ColumnSpec::new(VOTES, &["票数", "得票数", "votes"], Int).required(),
            ],
        },
        music_grouped: TableSchema {
            columns: vec![
                ColumnSpec::new(NAME, &["译名", "title"], Text).required(),
                ColumnSpec::new(RANK, &["名次", "排名", "rank"], Int),
                ColumnSpec::new(VOTES, &["票数", "得票数", "votes"], Int).required(),
                ColumnSpec::new(ASSOCIATIONS, &["所属角色", "characters"], Text),
                ColumnSpec::new("bnum", &["本命数"], Int),
                ColumnSpec::new("brate", &["本命率"], Float),
                ColumnSpec::new("bw", &["本命加权"], Float),
                ColumnSpec::new("v_pct", &["票数占比"], Float),
                ColumnSpec::new("b_pct", &["本命占比"], Float),
                ColumnSpec::new("male", &["男性"], Int),
                ColumnSpec::new("male_pct", &["男性比"], Float),
                ColumnSpec::new("male_total_pct", &["占总数"], Float),
                ColumnSpec::new("female", &["女性"], Int),
                ColumnSpec::new("female_pct", &["女性比"], Float),
                ColumnSpec::new("female_total_pct", &["占总数"], Float).nth(1),
                ColumnSpec::new("bias_orig", &["偏原作"], Int),
                ColumnSpec::new("bias_2nd", &["偏二次"], Int),
                ColumnSpec::new("no_bias", &["无偏爱"], Int),
                ColumnSpec::new("no_interest", &["都没兴趣"], Int),
            ],
        },
    }
}

fn jp_schemas() -> RegionSchemas {
    use ValueKind::*;
    RegionSchemas {
        characters_raw: TableSchema {
            columns: vec![
                ColumnSpec::new(NAME, &["译名", "name"], Text),
                ColumnSpec::new(NATIVE_NAME, &["日文名", "native_name"], Text),
                ColumnSpec::new(VOTES, &["票数", "votes"], Int).required(),
            ],
        },
        characters_grouped: TableSchema {
            columns: vec![
                ColumnSpec::new(NAME, &["译名", "name"], Text),
                ColumnSpec::new(NATIVE_NAME, &["日文名", "native_name"], Text),
                ColumnSpec::new(RANK, &["名次", "rank"], Int),
                ColumnSpec::new(VOTES, &["票数", "votes"], Int).required(),
                ColumnSpec::new(FIRST_APPEAR, &["首次出现作品", "first_appear"], Text),
                ColumnSpec::new("prev_r", &["上回名次"], Int),
                ColumnSpec::new("prev2_r", &["上上回名次"], Int),
                ColumnSpec::new("bnum", &["本名票数"], Int),
                ColumnSpec::new("comments", &["评论数"], Int),
                ColumnSpec::new("support", &["应援作品数"], Int),
            ],
        },
        music_raw: TableSchema {
            columns: vec![
                ColumnSpec::new(NAME, &["译名", "title"], Text),
                ColumnSpec::new(NATIVE_NAME, &["曲目", "original_title"], Text),
                ColumnSpec::new(VOTES, &["得票数", "票数", "votes"], Int).required(),
            ],
        },
        music_grouped: TableSchema {
            columns: vec![
                ColumnSpec::new(NAME, &["译名", "title"], Text),
                ColumnSpec::new(NATIVE_NAME, &["曲目", "original_title"], Text),
                ColumnSpec::new(RANK, &["排名", "名次", "rank"], Int),
                ColumnSpec::new(VOTES, &["得票数", "票数", "votes"], Int).required(),
                ColumnSpec::new(ASSOCIATIONS, &["所属角色", "characters"], Text),
                ColumnSpec::new("prev_r", &["上回名次"], Int),
                ColumnSpec::new("prev2_r", &["上上回名次"], Int),
                ColumnSpec::new("main_v", &["本名票数"], Int),
                ColumnSpec::new("comments", &["评论数"], Int),
            ],
        },
    }
}
