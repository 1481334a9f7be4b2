use super::MapFileError;
use super::traits::MapFile;
use crate::core::models::density::DensityMap;
use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use ndarray::Array3;
use std::io::{BufRead, Cursor, Read, Write};

const HEADER_SIZE: usize = 1024;
const MAP_MAGIC: &[u8; 4] = b"MAP ";
const MODE_FLOAT32: i32 = 2;
const LABEL_SIZE: usize = 80;
const LABEL_COUNT: usize = 10;
const MACHINE_STAMP_LE: [u8; 4] = [0x44, 0x41, 0x00, 0x00];
const MACHINE_STAMP_BE: u8 = 0x11;

/// MRC/CCP4 density maps (mode 2, 32-bit float voxels, x fastest).
pub struct Mrc;

impl MapFile for Mrc {
    type Error = MapFileError;

    fn read_from(reader: &mut impl BufRead) -> Result<DensityMap, Self::Error> {
        let mut header = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header)?;

        if &header[208..212] != MAP_MAGIC {
            return Err(MapFileError::InvalidHeader(format!(
                "missing MAP magic at offset 208: got {:?}",
                &header[208..212]
            )));
        }
        if header[212] == MACHINE_STAMP_BE {
            read_body::<BigEndian>(&header, reader)
        } else {
            read_body::<LittleEndian>(&header, reader)
        }
    }

    fn write_to(
        map: &DensityMap,
        title: &str,
        writer: &mut impl Write,
    ) -> Result<(), Self::Error> {
        let n = map.n() as i32;
        let side = map.side() as f32;
        let start = -(n / 2) + 1;
        let (min, max) = map.min_max();
        let (mean, rms) = map.mean_and_rms();

        let mut header = Vec::with_capacity(HEADER_SIZE);
        // NC, NR, NS, MODE
        for value in [n, n, n, MODE_FLOAT32] {
            header.write_i32::<LittleEndian>(value)?;
        }
        // NCSTART, NRSTART, NSSTART, MX, MY, MZ
        for value in [start, start, start, n, n, n] {
            header.write_i32::<LittleEndian>(value)?;
        }
        // Cell lengths and angles
        for value in [side, side, side, 90.0, 90.0, 90.0] {
            header.write_f32::<LittleEndian>(value)?;
        }
        // MAPC, MAPR, MAPS
        for value in [1, 2, 3] {
            header.write_i32::<LittleEndian>(value)?;
        }
        for value in [min as f32, max as f32, mean as f32] {
            header.write_f32::<LittleEndian>(value)?;
        }
        // ISPG, NSYMBT, LSKFLG
        for value in [1, 0, 0] {
            header.write_i32::<LittleEndian>(value)?;
        }
        // Skew matrix and translation
        for value in [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0] {
            header.write_f32::<LittleEndian>(value)?;
        }
        for _ in 0..12 {
            header.write_f32::<LittleEndian>(0.0)?;
        }
        // Origin
        for _ in 0..3 {
            header.write_f32::<LittleEndian>(0.0)?;
        }
        header.extend_from_slice(MAP_MAGIC);
        header.extend_from_slice(&MACHINE_STAMP_LE);
        header.write_f32::<LittleEndian>(rms as f32)?;

        let title = title.trim();
        header.write_i32::<LittleEndian>(if title.is_empty() { 0 } else { 1 })?;
        let mut labels = [0u8; LABEL_SIZE * LABEL_COUNT];
        let bytes = title.as_bytes();
        let len = bytes.len().min(LABEL_SIZE);
        labels[..len].copy_from_slice(&bytes[..len]);
        header.extend_from_slice(&labels);
        debug_assert_eq!(header.len(), HEADER_SIZE);
        writer.write_all(&header)?;

        let data = map.data();
        let nu = map.n();
        let mut body = Vec::with_capacity(nu * nu * nu * 4);
        for k in 0..nu {
            for j in 0..nu {
                for i in 0..nu {
                    body.write_f32::<LittleEndian>(data[[i, j, k]] as f32)?;
                }
            }
        }
        writer.write_all(&body)?;
        Ok(())
    }
}

fn read_body<E: ByteOrder>(
    header: &[u8; HEADER_SIZE],
    reader: &mut impl Read,
) -> Result<DensityMap, MapFileError> {
    let mut cursor = Cursor::new(&header[..]);
    let nx = cursor.read_i32::<E>()?;
    let ny = cursor.read_i32::<E>()?;
    let nz = cursor.read_i32::<E>()?;
    let mode = cursor.read_i32::<E>()?;

    if nx <= 0 || ny <= 0 || nz <= 0 {
        return Err(MapFileError::InvalidHeader(format!(
            "non-positive grid dimensions: {nx} x {ny} x {nz}"
        )));
    }
    if mode != MODE_FLOAT32 {
        return Err(MapFileError::UnsupportedMode(mode));
    }

    cursor.set_position(40);
    let side = cursor.read_f32::<E>()? as f64;
    cursor.set_position(92);
    let extended = cursor.read_i32::<E>()?.max(0) as usize;
    if extended > 0 {
        let mut skip = vec![0u8; extended];
        reader.read_exact(&mut skip)?;
    }

    let (nx, ny, nz) = (nx as usize, ny as usize, nz as usize);
    let expected = nx * ny * nz;
    let mut raw = Vec::with_capacity(expected * 4);
    reader.take((expected * 4) as u64).read_to_end(&mut raw)?;
    if raw.len() < expected * 4 {
        return Err(MapFileError::Truncated {
            expected,
            found: raw.len() / 4,
        });
    }

    let mut values = vec![0f32; expected];
    E::read_f32_into(&raw, &mut values);
    let data = Array3::from_shape_fn((nx, ny, nz), |(i, j, k)| {
        values[i + j * nx + k * nx * ny] as f64
    });
    Ok(DensityMap::new(data, side)?)
}
