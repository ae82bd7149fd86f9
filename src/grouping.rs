//! Builds the grouped workbooks from the raw per-session tables by joining
//! against the reference tables.

use std::collections::HashMap;

use crate::region::Region;
use crate::schema::{ASSOCIATIONS, FIRST_APPEAR, NAME, NATIVE_NAME, SchemaError, TableSchema};
use crate::workbook::{Sheet, Workbook, parse_float};

/// Counts from one grouping run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct GroupingReport {
    pub sheets: usize,
    pub kept: usize,
    pub dropped: usize,
    pub skipped_sheets: usize,
}

/// Join field used to match raw rows to reference rows.
fn join_field(region: Region) -> &'static str {
    if region.uses_native_names() { NATIVE_NAME } else { NAME }
}

/// Keep characters whose first-appearance work is at least `floor`,
/// appending the work column (and the canonical name when absent).
pub fn group_characters(
    raw: &Workbook,
    raw_schema: &TableSchema,
    names: &Sheet,
    names_schema: &TableSchema,
    region: Region,
    floor: f64,
) -> Result<(Workbook, GroupingReport), SchemaError> {
    let resolved = names_schema.resolve(names)?;
    let key = join_field(region);

    let mut lookup: HashMap<String, (String, String)> = HashMap::new();
    for row in &names.rows {
        let (Some(k), Some(name), Some(work)) = (
            resolved.text(row, key),
            resolved.text(row, NAME),
            resolved.code(row, FIRST_APPEAR),
        ) else {
            continue;
        };
        if parse_float(Some(&work)).is_some_and(|w| w >= floor) {
            lookup.entry(k.to_string()).or_insert((name.to_string(), work));
        }
    }
    log::info!("{region}: {} characters at or above work {floor}", lookup.len());

    let work_header = names_schema.header_for(FIRST_APPEAR).unwrap_or("first_appear");
    let name_header = names_schema.header_for(NAME).unwrap_or("name");
    join_workbook(raw, raw_schema, key, region, |sheet, has_name| {
        let mut headers = sheet.headers.clone();
        if !has_name {
            headers.push(name_header.to_string());
        }
        headers.push(work_header.to_string());
        headers
    }, |k, has_name| {
        let (name, work) = lookup.get(k)?;
        let mut extra = Vec::new();
        if !has_name {
            extra.push(name.clone());
        }
        extra.push(work.clone());
        Some(extra)
    })
}

/// Keep songs that have at least one associated character, appending the
/// association column.
pub fn group_songs(
    raw: &Workbook,
    raw_schema: &TableSchema,
    music_info: &Sheet,
    info_schema: &TableSchema,
    region: Region,
) -> Result<(Workbook, GroupingReport), SchemaError> {
    let resolved = info_schema.resolve(music_info)?;
    let key = join_field(region);

    let mut lookup: HashMap<String, String> = HashMap::new();
    for row in &music_info.rows {
        let (Some(k), Some(assoc)) = (resolved.text(row, key), resolved.text(row, ASSOCIATIONS)) else {
            continue;
        };
        lookup.entry(k.to_string()).or_insert_with(|| assoc.to_string());
    }

    let assoc_header = info_schema.header_for(ASSOCIATIONS).unwrap_or("associations");
    join_workbook(raw, raw_schema, key, region, |sheet, _| {
        let mut headers = sheet.headers.clone();
        headers.push(assoc_header.to_string());
        headers
    }, |k, _| lookup.get(k).map(|a| vec![a.clone()]))
}

/// Shared left-join-then-drop loop. `headers` builds the output header row;
/// `extra` returns appended cells for a join key, or None to drop the row.
fn join_workbook(
    raw: &Workbook,
    raw_schema: &TableSchema,
    key: &str,
    region: Region,
    headers: impl Fn(&Sheet, bool) -> Vec<String>,
    extra: impl Fn(&str, bool) -> Option<Vec<String>>,
) -> Result<(Workbook, GroupingReport), SchemaError> {
    let mut out = Workbook { name: format!("{}_grouped", raw.name), sheets: Vec::new() };
    let mut report = GroupingReport::default();

    for sheet in &raw.sheets {
        let resolved = match raw_schema.resolve(sheet) {
            Ok(r) if r.has(key) => r,
            Ok(_) => {
                log::warn!("{region} '{}' sheet '{}': no '{key}' column to join on; skipping", raw.name, sheet.name);
                report.skipped_sheets += 1;
                continue;
            }
            Err(e) => {
                log::warn!("{region} '{}': {e}; skipping", raw.name);
                report.skipped_sheets += 1;
                continue;
            }
        };
        let has_name = resolved.has(NAME);

        let mut grouped = Sheet::new(sheet.name.clone(), headers(sheet, has_name));
        let width = sheet.headers.len();
        for row in &sheet.rows {
            let appended = resolved.text(row, key).and_then(|k| extra(k, has_name));
            match appended {
                Some(cells) => {
                    let mut r = row.clone();
                    r.resize(width, String::new());
                    r.extend(cells);
                    grouped.rows.push(r);
                    report.kept += 1;
                }
                None => report.dropped += 1,
            }
        }
        out.sheets.push(grouped);
        report.sheets += 1;
    }

    Ok((out, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::tests::sheet;
    use crate::schema::{ReferenceSchemas, RegionSchemas};

    fn names() -> Sheet {
        sheet(
            "names",
            &["日文名", "译名", "首次出现作品"],
            &[
                &["博麗霊夢", "博丽灵梦", "1"],
                &["チルノ", "琪露诺", "6.0"],
                &["射命丸文", "射命丸文", "9.5"],
                &["謎", "谜", ""],
            ],
        )
    }

    #[test]
    fn test_group_characters_jp_filters_by_floor() {
        let raw = Workbook {
            name: "jp".into(),
            sheets: vec![sheet(
                "20",
                &["名次", "日文名", "票数"],
                &[&["1", "博麗霊夢", "900"], &["2", "チルノ", "500"], &["3", "射命丸文", "400"], &["4", "謎", "1"]],
            )],
        };
        let schemas = RegionSchemas::for_region(Region::Jp);
        let refs = ReferenceSchemas::default();
        let (wb, report) =
            group_characters(&raw, &schemas.characters_raw, &names(), &refs.names, Region::Jp, 6.0).unwrap();

        assert_eq!(report.kept, 2);
        assert_eq!(report.dropped, 2);
        let s = &wb.sheets[0];
        assert_eq!(s.name, "20");
        assert_eq!(s.headers, vec!["名次", "日文名", "票数", "译名", "首次出现作品"]);
        assert_eq!(s.rows[0], vec!["2", "チルノ", "500", "琪露诺", "6"]);
        assert_eq!(s.rows[1][4], "9.5");
    }

    #[test]
    fn test_group_characters_cn_joins_on_name() {
        let raw = Workbook {
            name: "cn".into(),
            sheets: vec![sheet("11", &["译名", "票数"], &[&["琪露诺", "50"], &["博丽灵梦", "80"]])],
        };
        let schemas = RegionSchemas::for_region(Region::Cn);
        let (wb, _) = group_characters(
            &raw,
            &schemas.characters_raw,
            &names(),
            &ReferenceSchemas::default().names,
            Region::Cn,
            6.0,
        )
        .unwrap();
        assert_eq!(wb.sheets[0].headers, vec!["译名", "票数", "首次出现作品"]);
        assert_eq!(wb.sheets[0].rows, vec![vec!["琪露诺", "50", "6"]]);
    }

    #[test]
    fn test_group_songs_drops_unassociated() {
        let info = sheet(
            "info",
            &["曲目", "译名", "所属角色"],
            &[&["少女綺想曲", "少女绮想曲", "博丽灵梦"], &["BGM", "背景音乐", ""]],
        );
        let raw = Workbook {
            name: "music".into(),
            sheets: vec![sheet("3", &["曲目", "得票数"], &[&["少女綺想曲", "100"], &["BGM", "5"], &["未知", "1"]])],
        };
        let schemas = RegionSchemas::for_region(Region::Jp);
        let (wb, report) = group_songs(
            &raw,
            &schemas.music_raw,
            &info,
            &ReferenceSchemas::default().music_info,
            Region::Jp,
        )
        .unwrap();
        assert_eq!(report.kept, 1);
        assert_eq!(wb.sheets[0].rows[0], vec!["少女綺想曲", "100", "博丽灵梦"]);
    }

    #[test]
    fn test_sheet_without_join_column_skipped() {
        let raw = Workbook {
            name: "cn".into(),
            sheets: vec![sheet("1", &["票数"], &[&["5"]])],
        };
        let (wb, report) = group_characters(
            &raw,
            &RegionSchemas::for_region(Region::Cn).characters_raw,
            &names(),
            &ReferenceSchemas::default().names,
            Region::Cn,
            6.0,
        )
        .unwrap();
        assert!(wb.sheets.is_empty());
        assert_eq!(report.skipped_sheets, 1);
    }
}
