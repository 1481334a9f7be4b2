use crate::core::models::density::DensityMap;
use std::error::Error;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Defines the interface for reading and writing density map file formats.
///
/// Implementors handle format-specific parsing and serialization of a cubic
/// [`DensityMap`]; the provided methods add buffered file handling on top.
pub trait MapFile {
    /// The error type for I/O operations.
    type Error: Error + From<io::Error>;

    /// Reads a density map from a buffered reader.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is not a valid map of this format.
    fn read_from(reader: &mut impl BufRead) -> Result<DensityMap, Self::Error>;

    /// Writes a density map to a writer.
    ///
    /// `title` is a short free-text label stored in the file header where the format
    /// has room for one.
    fn write_to(map: &DensityMap, title: &str, writer: &mut impl Write)
    -> Result<(), Self::Error>;

    /// Reads a density map from a file on disk.
    fn read_from_path<P: AsRef<Path>>(path: P) -> Result<DensityMap, Self::Error> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Self::read_from(&mut reader)
    }

    /// Writes a density map to a file on disk, using the file name as its title.
    fn write_to_path<P: AsRef<Path>>(map: &DensityMap, path: P) -> Result<(), Self::Error> {
        let path = path.as_ref();
        let title = format!("FILENAME=\"{}\"", path.display());
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        Self::write_to(map, &title, &mut writer)?;
        writer.flush()?;
        Ok(())
    }
}
