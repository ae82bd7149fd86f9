use std::collections::BTreeMap;

use crate::config::GenderBucket;
use crate::region::{Region, SessionKey};
use crate::schema::{GENDER, TableSchema, VOTES};
use crate::store::models::GenderSplit;
use crate::workbook::Workbook;

use super::parse_session_number;

/// Per-session voter gender totals. Each sheet is one session of `region`;
/// rows are labelled with a gender and carry a vote count.
pub fn load_gender(
    wb: &Workbook,
    schema: &TableSchema,
    labels: &BTreeMap<String, GenderBucket>,
    region: Region,
) -> BTreeMap<SessionKey, GenderSplit> {
    let mut out = BTreeMap::new();

    for sheet in &wb.sheets {
        let number = match parse_session_number(&sheet.name) {
            Ok(n) => n,
            Err(e) => {
                log::warn!("gender: {e}; skipping sheet");
                continue;
            }
        };
        let resolved = match schema.resolve(sheet) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("gender: {e}; skipping sheet");
                continue;
            }
        };

        let (mut m, mut f, mut o) = (0i64, 0i64, 0i64);
        for row in &sheet.rows {
            let Some(label) = resolved.text(row, GENDER) else { continue };
            let Some(votes) = resolved.int(row, VOTES) else { continue };
            match labels.get(label) {
                Some(GenderBucket::M) => m += votes,
                Some(GenderBucket::F) => f += votes,
                Some(GenderBucket::O) => o += votes,
                None => log::warn!("gender sheet '{}': unknown label '{label}'", sheet.name),
            }
        }

        let positive = |v: i64| (v > 0).then_some(v);
        out.insert(
            SessionKey::new(region, number),
            GenderSplit { m: positive(m), f: positive(f), o: positive(o) },
        );
    }
    out
}
