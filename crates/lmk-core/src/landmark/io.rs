//! Landmark file format.
//!
//! Binary layout, all multi-byte fields big-endian:
//!
//! | field           | type           |
//! |-----------------|----------------|
//! | version         | `[u8; 32]`     |
//! | id              | `[u8; 32]`     |
//! | planet code     | `u32`          |
//! | cols, rows      | `u32`, `u32`   |
//! | anchor col, row | `f64`, `f64`   |
//! | resolution      | `f64`          |
//! | anchor point    | `[f64; 3]`     |
//! | world to map    | `[f64; 9]`, row-major |
//! | reflectance     | `[u8; cols * rows]`   |
//! | elevation       | `[f32; cols * rows]`  |
//!
//! Every write also produces a text sidecar `<file>.txt` with the header.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use super::{Landmark, LANDMARK_ID_LEN};
use crate::datum::Planet;
use crate::error::{LmkError, Result};
use crate::math::{Mat3, Pt2, Real, Vec3};

const VERSION: &str = "#! LVS Map v3.0";
const VERSION_PREFIX: &str = "#! LVS Map";
const FIELD_LEN: usize = 32;

/// Header fields of a landmark, for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkHeader {
    pub id: String,
    pub planet: Planet,
    pub num_cols: usize,
    pub num_rows: usize,
    pub resolution: Real,
    pub anchor_pixel: [Real; 2],
    pub anchor_point: [Real; 3],
    pub world_to_map: [[Real; 3]; 3],
}

fn fixed_field(s: &str) -> [u8; FIELD_LEN] {
    let mut buf = [0u8; FIELD_LEN];
    let n = s.len().min(FIELD_LEN);
    buf[..n].copy_from_slice(&s.as_bytes()[..n]);
    buf
}

fn field_to_string(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_be_bytes(b))
}

fn read_f64<R: Read>(r: &mut R) -> Result<f64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(f64::from_be_bytes(b))
}

/// Path of the text sidecar written next to a landmark file.
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".txt");
    PathBuf::from(s)
}

impl Landmark {
    pub fn header(&self) -> LandmarkHeader {
        let m = &self.world_to_map;
        LandmarkHeader {
            id: self.id.clone(),
            planet: self.planet,
            num_cols: self.num_cols,
            num_rows: self.num_rows,
            resolution: self.resolution,
            anchor_pixel: [self.anchor_col, self.anchor_row],
            anchor_point: [self.anchor_point.x, self.anchor_point.y, self.anchor_point.z],
            world_to_map: [
                [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
                [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
                [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
            ],
        }
    }

    /// Decode a landmark from a reader.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Landmark> {
        let mut field = [0u8; FIELD_LEN];
        reader.read_exact(&mut field)?;
        let version = field_to_string(&field);
        if !version.starts_with(VERSION_PREFIX) {
            return Err(LmkError::Format(format!("unexpected version '{version}'")));
        }
        reader.read_exact(&mut field)?;
        let id = field_to_string(&field);

        let planet = Planet::from_code(read_u32(reader)?)?;
        let num_cols = read_u32(reader)? as usize;
        let num_rows = read_u32(reader)? as usize;
        let anchor_col = read_f64(reader)?;
        let anchor_row = read_f64(reader)?;
        let resolution = read_f64(reader)?;
        let anchor_point = Vec3::new(read_f64(reader)?, read_f64(reader)?, read_f64(reader)?);
        let mut rot = [0.0; 9];
        for v in rot.iter_mut() {
            *v = read_f64(reader)?;
        }
        let world_to_map = Mat3::from_row_slice(&rot);

        if num_cols.checked_mul(num_rows).is_none() {
            return Err(LmkError::Format(format!(
                "raster size {num_cols}x{num_rows} overflows"
            )));
        }
        let mut lmk = Landmark::with_frame(
            planet,
            &id,
            num_cols,
            num_rows,
            resolution,
            Pt2::new(anchor_col, anchor_row),
            anchor_point,
            world_to_map,
        )
        .map_err(|e| match e {
            LmkError::InvalidParameter(msg) => LmkError::Format(msg),
            other => other,
        })?;

        reader.read_exact(&mut lmk.srm)?;
        let mut raw = Vec::new();
        raw.try_reserve_exact(4 * lmk.ele.len())
            .map_err(|_| LmkError::AllocationFailure(4 * lmk.ele.len()))?;
        raw.resize(4 * lmk.ele.len(), 0u8);
        reader.read_exact(&mut raw)?;
        for (e, b) in lmk.ele.iter_mut().zip(raw.chunks_exact(4)) {
            *e = f32::from_be_bytes([b[0], b[1], b[2], b[3]]);
        }
        Ok(lmk)
    }

    /// Encode a landmark into a writer.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&fixed_field(VERSION))?;
        writer.write_all(&fixed_field(&self.id))?;
        for v in [
            self.planet.code(),
            self.num_cols as u32,
            self.num_rows as u32,
        ] {
            writer.write_all(&v.to_be_bytes())?;
        }
        let header = [
            self.anchor_col,
            self.anchor_row,
            self.resolution,
            self.anchor_point.x,
            self.anchor_point.y,
            self.anchor_point.z,
        ];
        for v in header {
            writer.write_all(&v.to_be_bytes())?;
        }
        for r in 0..3 {
            for c in 0..3 {
                writer.write_all(&self.world_to_map[(r, c)].to_be_bytes())?;
            }
        }
        writer.write_all(&self.srm)?;
        for e in &self.ele {
            writer.write_all(&e.to_be_bytes())?;
        }
        Ok(())
    }

    /// Text summary of the header, one `KEY values` line per field.
    pub fn sidecar_text(&self) -> String {
        let m = &self.world_to_map;
        let mut s = String::new();
        s.push_str(&format!("LMK_BODY {}\n", self.planet.code()));
        s.push_str(&format!("LMK_ID {}\n", self.id));
        s.push_str(&format!("LMK_SIZE {} {}\n", self.num_cols, self.num_rows));
        s.push_str(&format!("LMK_RESOLUTION {:.6}\n", self.resolution));
        s.push_str(&format!(
            "LMK_ANCHOR_POINT {:.6} {:.6} {:.6}\n",
            self.anchor_point.x, self.anchor_point.y, self.anchor_point.z
        ));
        s.push_str(&format!(
            "LMK_ANCHOR_PIXEL {:.6} {:.6}\n",
            self.anchor_col, self.anchor_row
        ));
        for r in 0..3 {
            s.push_str(&format!(
                "LMK_WORLD_2_MAP_ROT {:.6} {:.6} {:.6}\n",
                m[(r, 0)],
                m[(r, 1)],
                m[(r, 2)]
            ));
        }
        s
    }

    /// Load a landmark file.
    pub fn load(path: &Path) -> Result<Landmark> {
        let mut reader = BufReader::new(File::open(path)?);
        let lmk = Self::read_from(&mut reader)?;
        debug!(
            "loaded landmark '{}' {}x{} @ {} m from {}",
            lmk.id,
            lmk.num_cols,
            lmk.num_rows,
            lmk.resolution,
            path.display()
        );
        Ok(lmk)
    }

    /// Store a landmark file and its sidecar.
    ///
    /// Data goes to a temporary sibling first and is renamed into place, so
    /// an existing file at `path` is either fully replaced or untouched.
    pub fn save(&self, path: &Path) -> Result<()> {
        if self.num_cols > u32::MAX as usize || self.num_rows > u32::MAX as usize {
            return Err(LmkError::InvalidParameter(
                "landmark too large for the file format".into(),
            ));
        }
        debug_assert!(self.id.len() <= LANDMARK_ID_LEN);

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".partial");
        let tmp = PathBuf::from(tmp);
        let written = (|| -> Result<()> {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            self.write_to(&mut writer)?;
            writer.flush()?;
            Ok(())
        })();
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        fs::rename(&tmp, path)?;
        fs::write(sidecar_path(path), self.sidecar_text())?;
        debug!("wrote landmark '{}' to {}", self.id, path.display());
        Ok(())
    }
}
