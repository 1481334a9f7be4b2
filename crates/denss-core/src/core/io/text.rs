use super::{MapFileError, scientific};
use crate::core::models::curve::ScatteringCurve;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Writes space-separated columns in `%.5e` notation under a `# header` line.
///
/// Columns may differ in length; shorter columns are padded with zeros so that every
/// row has the same number of fields.
pub fn write_columns<W: Write>(
    writer: W,
    header: &str,
    columns: &[&[f64]],
) -> Result<(), MapFileError> {
    let mut writer = writer;
    writeln!(writer, "# {header}")?;
    let rows = columns.iter().map(|c| c.len()).max().unwrap_or(0);

    let mut table = csv::WriterBuilder::new()
        .delimiter(b' ')
        .has_headers(false)
        .from_writer(writer);
    for row in 0..rows {
        let record: Vec<String> = columns
            .iter()
            .map(|column| scientific(column.get(row).copied().unwrap_or(0.0), 5, false))
            .collect();
        table.write_record(&record)?;
    }
    table.flush()?;
    Ok(())
}

pub fn write_columns_to_path<P: AsRef<Path>>(
    path: P,
    header: &str,
    columns: &[&[f64]],
) -> Result<(), MapFileError> {
    let file = File::create(path)?;
    write_columns(BufWriter::new(file), header, columns)
}

/// Reads a whitespace-separated `q I sigma` profile.
///
/// Blank lines, `#` comments and rows whose first three fields are not all numbers
/// (column titles, footers) are skipped. Extra columns are ignored.
pub fn read_profile(reader: impl BufRead) -> Result<ScatteringCurve, MapFileError> {
    let mut q = Vec::new();
    let mut intensity = Vec::new();
    let mut sigma = Vec::new();

    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let fields: Vec<f64> = trimmed
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty())
            .take(3)
            .map_while(|t| t.parse::<f64>().ok())
            .collect();
        if let [qi, ii, si] = fields[..] {
            q.push(qi);
            intensity.push(ii);
            sigma.push(si);
        }
    }

    Ok(ScatteringCurve::new(q, intensity, sigma)?)
}

pub fn read_profile_from_path<P: AsRef<Path>>(path: P) -> Result<ScatteringCurve, MapFileError> {
    let file = File::open(path)?;
    read_profile(BufReader::new(file))
}
