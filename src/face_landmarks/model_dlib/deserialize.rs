//! Reader for dlib's `shape_predictor` serialization format.
//!
//! dlib writes integers as a control byte (bit 7 = sign, low nibble = byte
//! count) followed by little-endian magnitude bytes. Floats are a
//! (mantissa, exponent) integer pair. Column vectors and matrices carry their
//! row and column counts first; newer dlib versions store them negated.

use std::io::Read;

use nalgebra::{DVector, Vector2};

use super::{RegressionTree, ShapePredictor, SplitFeature};
use crate::error::{Error, Result};

const SERIALIZATION_VERSION: i64 = 1;

// exponent markers dlib uses for non-finite floats
const EXPONENT_INFINITY: i64 = 32000;
const EXPONENT_NEG_INFINITY: i64 = 32001;
const EXPONENT_NAN: i64 = 32002;

pub(super) struct DlibReader<R: Read> {
    reader: R,
}

impl<R: Read> DlibReader<R> {
    pub(super) fn new(reader: R) -> Self {
        Self { reader }
    }

    fn read_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.reader.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    pub(super) fn read_int(&mut self) -> Result<i64> {
        let control = self.read_byte()?;
        let negative = control & 0x80 != 0;
        let size = (control & 0x0F) as usize;
        if size > 8 {
            return Err(Error::InvalidModel(format!(
                "integer encoded with {} bytes",
                size
            )));
        }

        let mut magnitude: u64 = 0;
        for i in 0..size {
            magnitude |= (self.read_byte()? as u64) << (8 * i);
        }

        let value = magnitude as i64;
        Ok(if negative { -value } else { value })
    }

    fn read_count(&mut self) -> Result<usize> {
        let value = self.read_int()?;
        usize::try_from(value)
            .map_err(|_| Error::InvalidModel(format!("negative element count {}", value)))
    }

    pub(super) fn read_float(&mut self) -> Result<f32> {
        let mantissa = self.read_int()?;
        let exponent = self.read_int()?;

        let value = match exponent {
            EXPONENT_INFINITY => f64::INFINITY,
            EXPONENT_NEG_INFINITY => f64::NEG_INFINITY,
            EXPONENT_NAN => f64::NAN,
            _ if mantissa == 0 => 0.0,
            _ => mantissa as f64 * 2f64.powi(exponent as i32),
        };
        Ok(value as f32)
    }

    /// A `matrix<float,0,1>`.
    fn read_column_vector(&mut self) -> Result<DVector<f32>> {
        let rows = self.read_int()?.unsigned_abs() as usize;
        let cols = self.read_int()?.unsigned_abs() as usize;
        if cols != 1 && rows * cols != 0 {
            return Err(Error::InvalidModel(format!(
                "expected a column vector, got {}x{}",
                rows, cols
            )));
        }

        let mut data = Vec::with_capacity(rows);
        for _ in 0..rows * cols {
            data.push(self.read_float()?);
        }
        Ok(DVector::from_vec(data))
    }

    fn read_split(&mut self) -> Result<SplitFeature> {
        let idx1 = self.read_count()?;
        let idx2 = self.read_count()?;
        let thresh = self.read_float()?;
        Ok(SplitFeature { idx1, idx2, thresh })
    }

    fn read_tree(&mut self) -> Result<RegressionTree> {
        let num_splits = self.read_count()?;
        let mut splits = Vec::with_capacity(num_splits);
        for _ in 0..num_splits {
            splits.push(self.read_split()?);
        }

        let num_leaves = self.read_count()?;
        if num_leaves != num_splits + 1 {
            return Err(Error::InvalidModel(format!(
                "tree with {} splits has {} leaves",
                num_splits, num_leaves
            )));
        }
        let mut leaf_values = Vec::with_capacity(num_leaves);
        for _ in 0..num_leaves {
            leaf_values.push(self.read_column_vector()?);
        }

        Ok(RegressionTree {
            splits,
            leaf_values,
        })
    }

    fn read_nested<T>(&mut self, mut read: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<Vec<T>>> {
        let outer = self.read_count()?;
        let mut result = Vec::with_capacity(outer);
        for _ in 0..outer {
            let inner = self.read_count()?;
            let mut items = Vec::with_capacity(inner);
            for _ in 0..inner {
                items.push(read(self)?);
            }
            result.push(items);
        }
        Ok(result)
    }

    pub(super) fn read_shape_predictor(&mut self) -> Result<ShapePredictor> {
        let version = self.read_int()?;
        if version != SERIALIZATION_VERSION {
            return Err(Error::InvalidModel(format!(
                "unsupported shape_predictor version {}",
                version
            )));
        }

        let initial_shape = self.read_column_vector()?;
        let forests = self.read_nested(|r| r.read_tree())?;
        let anchor_idx = self.read_nested(|r| r.read_count())?;
        let deltas = self.read_nested(|r| {
            let x = r.read_float()?;
            let y = r.read_float()?;
            Ok(Vector2::new(x, y))
        })?;

        ShapePredictor::new(initial_shape, forests, anchor_idx, deltas)
    }
}
