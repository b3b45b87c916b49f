// Spreadsheet input (xlsx, xls, xlsb, ods via calamine)
//
// Each input file is read from its first worksheet, first row as header.
// Columns are located by header text; a missing file or column is fatal.
// Rows with unusable values are skipped and counted, never fatal.

use std::fmt;
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Reader, Sheets};
use gorodindex_recon::extract::clean_number;
use gorodindex_recon::{PopulationRecord, TaxRecord, UnemploymentTable};

pub const COL_NAME: &str = "Название";
pub const COL_OKTMO: &str = "ОКТМО";
pub const COL_NDFL: &str = "НДФЛ";
pub const COL_POPULATION: &str = "Население";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum LoadError {
    MissingFile { path: PathBuf },
    Open { path: PathBuf, message: String },
    EmptySheet { path: PathBuf },
    MissingColumn { path: PathBuf, column: String },
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingFile { path } => write!(f, "input file not found: {}", path.display()),
            Self::Open { path, message } => {
                write!(f, "cannot read {}: {}", path.display(), message)
            }
            Self::EmptySheet { path } => {
                write!(f, "{}: first sheet has no header row", path.display())
            }
            Self::MissingColumn { path, column } => {
                write!(f, "{}: required column '{}' not found", path.display(), column)
            }
        }
    }
}

impl std::error::Error for LoadError {}

// ---------------------------------------------------------------------------
// Loaded rows
// ---------------------------------------------------------------------------

/// Parsed rows of one file plus the number of data rows that were skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct Loaded<T> {
    pub rows: Vec<T>,
    pub skipped: usize,
}

impl<T> Default for Loaded<T> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            skipped: 0,
        }
    }
}

/// All three inputs, parsed.
#[derive(Debug, Clone, Default)]
pub struct InputSet {
    pub tax: Loaded<TaxRecord>,
    pub population: Loaded<PopulationRecord>,
    pub unemployment: UnemploymentTable,
    pub unemployment_skipped: usize,
}

/// Check all three paths, then parse all three files.
///
/// Nothing is parsed until every file is known to exist, so a missing
/// third file is reported without the cost of reading the first two.
pub fn load_inputs(
    tax_path: &Path,
    population_path: &Path,
    unemployment_path: &Path,
    year: u16,
) -> Result<InputSet, LoadError> {
    for path in [tax_path, population_path, unemployment_path] {
        if !path.is_file() {
            return Err(LoadError::MissingFile {
                path: path.to_path_buf(),
            });
        }
    }

    let tax = load_tax(tax_path)?;
    let population = load_population(population_path)?;
    let (unemployment, unemployment_skipped) = load_unemployment(unemployment_path, year)?;

    Ok(InputSet {
        tax,
        population,
        unemployment,
        unemployment_skipped,
    })
}

/// Tax-revenue file: `Название`, `ОКТМО`, `НДФЛ`.
pub fn load_tax(path: &Path) -> Result<Loaded<TaxRecord>, LoadError> {
    let table = Table::read(path)?;
    let name_col = table.column(COL_NAME)?;
    let code_col = table.column(COL_OKTMO)?;
    let ndfl_col = table.column(COL_NDFL)?;

    let mut out = Loaded::default();
    for row in &table.rows {
        let name = cell_text(row.get(name_col));
        let oktmo = cell_text(row.get(code_col));
        let ndfl = cell_number(row.get(ndfl_col));
        match ndfl {
            Some(n) if !name.is_empty() && !oktmo.is_empty() => out.rows.push(TaxRecord {
                name,
                oktmo,
                ndfl_total: n.round() as i64,
            }),
            _ => out.skipped += 1,
        }
    }
    Ok(out)
}

/// Population file: `Название`, `Население`. The number stays raw text for cleaning.
pub fn load_population(path: &Path) -> Result<Loaded<PopulationRecord>, LoadError> {
    let table = Table::read(path)?;
    let label_col = table.column(COL_NAME)?;
    let pop_col = table.column(COL_POPULATION)?;

    let mut out = Loaded::default();
    for row in &table.rows {
        let label = cell_text(row.get(label_col));
        let population_raw = cell_text(row.get(pop_col));
        if label.is_empty() && population_raw.is_empty() {
            out.skipped += 1;
            continue;
        }
        out.rows.push(PopulationRecord {
            label,
            population_raw,
        });
    }
    Ok(out)
}

/// Unemployment file: region in the first column (its header may be blank),
/// rate in the column headed by `year`. Row order is kept.
pub fn load_unemployment(path: &Path, year: u16) -> Result<(UnemploymentTable, usize), LoadError> {
    let table = Table::read(path)?;
    let rate_col = table.column(&year.to_string())?;

    let mut rates = UnemploymentTable::new();
    let mut skipped = 0;
    for row in &table.rows {
        let region = cell_text(row.first());
        match cell_number(row.get(rate_col)) {
            Some(rate) if !region.is_empty() => rates.insert(region, rate),
            _ => skipped += 1,
        }
    }
    Ok((rates, skipped))
}

// ---------------------------------------------------------------------------
// Sheet access
// ---------------------------------------------------------------------------

struct Table {
    path: PathBuf,
    headers: Vec<String>,
    rows: Vec<Vec<Data>>,
}

impl Table {
    fn read(path: &Path) -> Result<Self, LoadError> {
        let open_err = |message: String| LoadError::Open {
            path: path.to_path_buf(),
            message,
        };

        let mut workbook: Sheets<_> =
            open_workbook_auto(path).map_err(|e| open_err(e.to_string()))?;
        let first = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| open_err("workbook contains no sheets".to_string()))?;
        let range = workbook
            .worksheet_range(&first)
            .map_err(|e| open_err(format!("sheet '{}': {}", first, e)))?;

        let mut rows = range.rows();
        let headers: Vec<String> = match rows.next() {
            Some(header) => header.iter().map(|c| cell_text(Some(c))).collect(),
            None => {
                return Err(LoadError::EmptySheet {
                    path: path.to_path_buf(),
                })
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            headers,
            rows: rows.map(|r| r.to_vec()).collect(),
        })
    }

    fn column(&self, name: &str) -> Result<usize, LoadError> {
        self.headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| LoadError::MissingColumn {
                path: self.path.clone(),
                column: name.to_string(),
            })
    }
}

/// Cell as trimmed text. Whole floats render without decimals (`2023.0` → `2023`),
/// so numeric headers and codes compare as written.
fn cell_text(cell: Option<&Data>) -> String {
    match cell {
        None | Some(Data::Empty) => String::new(),
        Some(Data::String(s)) => s.trim().to_string(),
        Some(Data::Float(n)) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{}", *n as i64)
            } else {
                format!("{}", n)
            }
        }
        Some(Data::Int(n)) => n.to_string(),
        Some(Data::Bool(b)) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
        Some(Data::Error(e)) => format!("#{:?}", e),
        Some(Data::DateTime(dt)) => format!("{}", dt.as_f64()),
        Some(Data::DateTimeIso(s)) | Some(Data::DurationIso(s)) => s.trim().to_string(),
    }
}

/// Numeric value of a cell; text goes through the same cleaning as population figures.
fn cell_number(cell: Option<&Data>) -> Option<f64> {
    match cell {
        Some(Data::Float(n)) if n.is_finite() => Some(*n),
        Some(Data::Int(n)) => Some(*n as f64),
        Some(Data::String(s)) => clean_number(s),
        _ => None,
    }
}
