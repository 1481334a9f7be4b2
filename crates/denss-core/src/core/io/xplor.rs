use super::traits::MapFile;
use super::{MapFileError, scientific, scientific_signed};
use crate::core::models::density::DensityMap;
use ndarray::Array3;
use std::io::{BufRead, Write};

const TITLE_WIDTH: usize = 264;
const VALUE_WIDTH: usize = 12;
const VALUES_PER_LINE: usize = 6;
const END_MARKER: &str = "-9999";

/// XPLOR ASCII density maps.
///
/// Sections run along z; within a section x varies fastest, six values per line.
pub struct Xplor;

impl MapFile for Xplor {
    type Error = MapFileError;

    fn read_from(reader: &mut impl BufRead) -> Result<DensityMap, Self::Error> {
        let mut lines = reader.lines().enumerate().map(|(i, l)| (i + 1, l));
        let mut next_line = |what: &str| -> Result<(usize, String), MapFileError> {
            match lines.next() {
                Some((no, Ok(line))) => Ok((no, line)),
                Some((_, Err(e))) => Err(e.into()),
                None => Err(MapFileError::InvalidHeader(format!(
                    "unexpected end of file while reading {what}"
                ))),
            }
        };

        let (mut no, mut line) = next_line("title count")?;
        while line.trim().is_empty() {
            (no, line) = next_line("title count")?;
        }
        let ntitle: usize = line
            .split_whitespace()
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| parse_error(no, "expected the !NTITLE count"))?;
        for _ in 0..ntitle {
            next_line("title")?;
        }

        let (no, grid) = next_line("grid line")?;
        let dims: Vec<i64> = grid
            .split_whitespace()
            .map(|t| t.parse::<i64>())
            .collect::<Result<_, _>>()
            .map_err(|e| parse_error(no, &e.to_string()))?;
        if dims.len() != 9 || dims[0] <= 0 || dims[3] <= 0 || dims[6] <= 0 {
            return Err(parse_error(no, "expected nine integers describing the grid"));
        }
        let (nx, ny, nz) = (dims[0] as usize, dims[3] as usize, dims[6] as usize);

        let (no, cell) = next_line("cell line")?;
        let side = split_fixed(&cell)
            .first()
            .and_then(|t| t.parse::<f64>().ok())
            .ok_or_else(|| parse_error(no, "expected cell dimensions"))?;

        let (no, order) = next_line("axis order")?;
        if order.trim() != "ZYX" {
            return Err(parse_error(no, "expected ZYX section ordering"));
        }

        let mut data = Array3::zeros((nx, ny, nz));
        for k in 0..nz {
            let (mut no, mut section) = next_line("section index")?;
            while section.trim().is_empty() {
                (no, section) = next_line("section index")?;
            }
            if section.trim().parse::<i64>().is_err() {
                return Err(parse_error(no, "expected a section index"));
            }
            let mut values = Vec::with_capacity(nx * ny);
            while values.len() < nx * ny {
                let (no, line) = next_line("section values")?;
                for token in split_fixed(&line) {
                    let value = token
                        .parse::<f64>()
                        .map_err(|e| parse_error(no, &e.to_string()))?;
                    values.push(value);
                }
            }
            if values.len() != nx * ny {
                return Err(MapFileError::Truncated {
                    expected: nx * ny,
                    found: values.len(),
                });
            }
            for j in 0..ny {
                for i in 0..nx {
                    data[[i, j, k]] = values[i + j * nx];
                }
            }
        }

        Ok(DensityMap::new(data, side)?)
    }

    fn write_to(
        map: &DensityMap,
        title: &str,
        writer: &mut impl Write,
    ) -> Result<(), Self::Error> {
        let n = map.n() as i64;
        let data = map.data();
        let side = map.side();

        let titles = [format!("REMARK {}", title.trim()), "REMARK DENSS".to_string()];
        writeln!(writer)?;
        writeln!(writer, "{:>8} !NTITLE", titles.len())?;
        for line in &titles {
            writeln!(writer, "{:<width$}", line, width = TITLE_WIDTH)?;
        }
        let (lo, hi) = (-n / 2 + 1, n / 2);
        writeln!(
            writer,
            "{:>8}{:>8}{:>8}{:>8}{:>8}{:>8}{:>8}{:>8}{:>8}",
            n, lo, hi, n, lo, hi, n, lo, hi
        )?;
        let cell: String = [side, side, side, 90.0, 90.0, 90.0]
            .iter()
            .map(|&v| scientific_signed(v, 5, true))
            .collect();
        writeln!(writer, "{cell}")?;
        writeln!(writer, "ZYX")?;

        let nu = map.n();
        for k in 0..nu {
            writeln!(writer, "{:>8}", k)?;
            for j in 0..nu {
                for i in 0..nu {
                    write!(writer, "{}", scientific_signed(data[[i, j, k]], 5, true))?;
                    if (i + j * nu) % VALUES_PER_LINE == VALUES_PER_LINE - 1 {
                        writeln!(writer)?;
                    }
                }
            }
            writeln!(writer)?;
        }
        writeln!(writer, "    {END_MARKER}")?;
        let (mean, rms) = map.mean_and_rms();
        write!(
            writer,
            "  {}  {}",
            scientific(mean, 4, true),
            scientific(rms, 4, true)
        )?;
        Ok(())
    }
}

fn parse_error(line: usize, message: &str) -> MapFileError {
    MapFileError::Parse {
        line,
        message: message.to_string(),
    }
}

/// Splits a line of fixed-width numeric fields; blank lines yield nothing.
fn split_fixed(line: &str) -> Vec<&str> {
    let trimmed = line.trim_end();
    if trimmed.trim().is_empty() {
        return Vec::new();
    }
    let mut fields = Vec::new();
    let mut start = 0;
    while start < trimmed.len() {
        let end = (start + VALUE_WIDTH).min(trimmed.len());
        let field = trimmed[start..end].trim();
        if !field.is_empty() {
            fields.push(field);
        }
        start = end;
    }
    fields
}
