use std::collections::{BTreeMap, BTreeSet};

use crate::alias::AliasResolver;
use crate::region::Region;
use crate::schema::{KEYWORDS, NAME, SchemaError, TableSchema};
use crate::workbook::Sheet;

const KEYWORD_DELIMITERS: &[char] = &['|', '、', '，'];

/// Split a keyword list on any of the accepted delimiters.
pub fn split_keywords(field: &str) -> BTreeSet<String> {
    field
        .split(KEYWORD_DELIMITERS)
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

/// Canonical name → keyword set, from the tag table. Names go through the
/// resolver so table spellings join onto store entries; repeated rows merge.
pub fn load_keywords(
    sheet: &Sheet,
    schema: &TableSchema,
    resolver: &AliasResolver,
) -> Result<BTreeMap<String, BTreeSet<String>>, SchemaError> {
    let resolved = schema.resolve(sheet)?;
    let mut out: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for row in &sheet.rows {
        let Some(raw) = resolved.text(row, NAME) else { continue };
        let Some(field) = resolved.text(row, KEYWORDS) else { continue };
        let keywords = split_keywords(field);
        if keywords.is_empty() {
            continue;
        }
        let name = resolver.resolve(raw, Region::Cn);
        out.entry(name).or_default().extend(keywords);
    }

    log::info!("Loaded keywords for {} characters", out.len());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::tests::sheet;
    use crate::schema::ReferenceSchemas;

    #[test]
    fn test_split_keywords_all_delimiters() {
        let set = split_keywords("贫乳|笨蛋、 冰 ，笨蛋");
        let v: Vec<&str> = set.iter().map(String::as_str).collect();
        assert_eq!(v.len(), 3);
        assert!(set.contains("贫乳") && set.contains("笨蛋") && set.contains("冰"));
    }

    #[test]
    fn test_load_keywords_merges_and_resolves() {
        let aliases = BTreeMap::from([("⑨".to_string(), "琪露诺".to_string())]);
        let resolver = AliasResolver::new(&aliases, &BTreeMap::new(), &[]);
        let s = sheet(
            "tags",
            &["译名", "keywords"],
            &[&["琪露诺", "冰|笨蛋"], &["⑨", "妖精"], &["空白", ""], &["", "孤儿"]],
        );
        let out = load_keywords(&s, &ReferenceSchemas::default().tags, &resolver).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out["琪露诺"].len(), 3);
    }
}
