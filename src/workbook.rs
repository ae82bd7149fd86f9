//! Spreadsheet exports: a workbook is a directory holding one CSV file per
//! sheet (`<sheet name>.csv`), or a single CSV file for one-sheet tables.

use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum WorkbookError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },
    #[error("Workbook not found: {0}")]
    NotFound(String),
    #[error("Workbook {0} has no sheets")]
    Empty(String),
}

pub type Result<T> = std::result::Result<T, WorkbookError>;

/// One sheet: trimmed headers plus raw cell text.
#[derive(Debug, Clone, Default)]
pub struct Sheet {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    pub fn new(name: impl Into<String>, headers: Vec<String>) -> Self {
        Self {
            name: name.into(),
            headers: headers.iter().map(|h| h.trim().to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Position of the `nth` column whose trimmed header equals `header`.
    pub fn column(&self, header: &str, nth: usize) -> Option<usize> {
        self.headers
            .iter()
            .enumerate()
            .filter(|(_, h)| h.as_str() == header)
            .map(|(i, _)| i)
            .nth(nth)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Workbook {
    pub name: String,
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    /// Open a workbook directory, or a single CSV file as a one-sheet workbook.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(WorkbookError::NotFound(path.display().to_string()));
        }
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        if path.is_file() {
            let sheet = read_sheet(path)?;
            return Ok(Self { name, sheets: vec![sheet] });
        }

        let mut files: Vec<PathBuf> = WalkDir::new(path)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("csv"))
            })
            .collect();
        files.sort();

        let mut sheets = Vec::with_capacity(files.len());
        for file in &files {
            sheets.push(read_sheet(file)?);
        }
        sheets.sort_by(|a, b| sheet_order(&a.name).cmp(&sheet_order(&b.name)));

        log::debug!("Opened workbook {} ({} sheets)", path.display(), sheets.len());
        Ok(Self { name, sheets })
    }

    /// First sheet, for single-table reference workbooks.
    pub fn first_sheet(&self) -> Result<&Sheet> {
        self.sheets
            .first()
            .ok_or_else(|| WorkbookError::Empty(self.name.clone()))
    }

    /// Write every sheet as `<dir>/<sheet name>.csv`.
    pub fn write(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        for sheet in &self.sheets {
            let path = dir.join(format!("{}.csv", sheet.name));
            let csv_err = |source| WorkbookError::Csv {
                path: path.display().to_string(),
                source,
            };
            let mut writer = csv::Writer::from_path(&path).map_err(csv_err)?;
            writer.write_record(&sheet.headers).map_err(csv_err)?;
            for row in &sheet.rows {
                writer.write_record(row).map_err(csv_err)?;
            }
            writer.flush()?;
        }
        Ok(())
    }
}

fn read_sheet(path: &Path) -> Result<Sheet> {
    let csv_err = |source| WorkbookError::Csv {
        path: path.display().to_string(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(csv_err)?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(|h| h.to_string())
        .collect();
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut sheet = Sheet::new(name, headers);

    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        sheet.rows.push(record.iter().map(|c| c.to_string()).collect());
    }
    Ok(sheet)
}

/// Sheets sort by leading session number, then name; unnumbered sheets last.
fn sheet_order(name: &str) -> (u64, String) {
    let digits: String = name.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    (digits.parse().unwrap_or(u64::MAX), name.to_string())
}

/// Parse an integer cell. Accepts spreadsheet-style floats ("500.0"),
/// truncating any fractional part.
pub fn parse_int(cell: Option<&str>) -> Option<i64> {
    let raw = cell?.trim().replace(',', "");
    if raw.is_empty() {
        return None;
    }
    if let Ok(v) = raw.parse::<i64>() {
        return Some(v);
    }
    raw.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(|f| f.trunc() as i64)
}

/// Parse a float cell; a trailing `%` divides by 100.
pub fn parse_float(cell: Option<&str>) -> Option<f64> {
    let raw = cell?.trim();
    if raw.is_empty() {
        return None;
    }
    let value = match raw.strip_suffix('%') {
        Some(pct) => pct.trim().parse::<f64>().ok()? / 100.0,
        None => raw.parse::<f64>().ok()?,
    };
    value.is_finite().then_some(value)
}

/// Normalize a code-like cell: integral floats lose their ".0".
pub fn clean_code(cell: Option<&str>) -> Option<String> {
    let raw = cell?.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse::<f64>() {
        Ok(f) if f.is_finite() && f.fract() == 0.0 && raw.contains('.') => {
            Some(format!("{}", f as i64))
        }
        _ => Some(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int(Some("500")), Some(500));
        assert_eq!(parse_int(Some(" 500.0 ")), Some(500));
        assert_eq!(parse_int(Some("1,234")), Some(1234));
        assert_eq!(parse_int(Some("")), None);
        assert_eq!(parse_int(Some("n/a")), None);
        assert_eq!(parse_int(None), None);
    }

    #[test]
    fn test_parse_float() {
        assert_eq!(parse_float(Some("0.25")), Some(0.25));
        assert_eq!(parse_float(Some("25%")), Some(0.25));
        assert_eq!(parse_float(Some("  ")), None);
        assert_eq!(parse_float(Some("NaN")), None);
    }

    #[test]
    fn test_clean_code() {
        assert_eq!(clean_code(Some("6.0")), Some("6".to_string()));
        assert_eq!(clean_code(Some("12.3")), Some("12.3".to_string()));
        assert_eq!(clean_code(Some("6")), Some("6".to_string()));
        assert_eq!(clean_code(Some("")), None);
    }

    #[test]
    fn test_open_directory_orders_by_session_number() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("10.csv"), "name,votes\nA,1\n").unwrap();
        fs::write(dir.path().join("2(extra).csv"), "name,votes\nB,2\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let wb = Workbook::open(dir.path()).unwrap();
        let names: Vec<&str> = wb.sheets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["2(extra)", "10"]);
    }

    #[test]
    fn test_headers_are_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("names.csv");
        fs::write(&file, "译名 , 票数\n琪露诺,9\n").unwrap();

        let wb = Workbook::open(&file).unwrap();
        let sheet = wb.first_sheet().unwrap();
        assert_eq!(sheet.headers, vec!["译名", "票数"]);
        assert_eq!(sheet.column("票数", 0), Some(1));
    }

    #[test]
    fn test_duplicate_headers_by_occurrence() {
        let sheet = Sheet::new("1", vec!["男性".into(), "占总数".into(), "女性".into(), "占总数".into()]);
        assert_eq!(sheet.column("占总数", 0), Some(1));
        assert_eq!(sheet.column("占总数", 1), Some(3));
        assert_eq!(sheet.column("占总数", 2), None);
    }

    #[test]
    fn test_write_then_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut sheet = Sheet::new("3", vec!["name".into(), "votes".into()]);
        sheet.rows.push(vec!["A".into(), "10".into()]);
        let wb = Workbook { name: "out".into(), sheets: vec![sheet] };
        wb.write(dir.path()).unwrap();

        let back = Workbook::open(dir.path()).unwrap();
        assert_eq!(back.sheets.len(), 1);
        assert_eq!(back.sheets[0].rows[0], vec!["A", "10"]);
    }

    #[test]
    fn test_missing_workbook() {
        let err = Workbook::open(Path::new("/nonexistent/workbook")).unwrap_err();
        assert!(matches!(err, WorkbookError::NotFound(_)));
    }
}
