use crate::error::{Result, StnError};
use rand::Rng;
use rayon::prelude::*;
use std::fmt::Formatter;

/// Dense row-major `f32` matrix. Batched tensors keep one sample per row.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    data: Vec<f32>,
    row: usize,
    col: usize,
}

impl Matrix {
    pub fn new(n: usize, m: usize) -> Self {
        Matrix {
            data: vec![0.0; n * m],
            row: n,
            col: m,
        }
    }

    pub fn filled(n: usize, m: usize, val: f32) -> Self {
        Matrix {
            data: vec![val; n * m],
            row: n,
            col: m,
        }
    }

    pub fn from_vec(n: usize, m: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != n * m {
            return Err(StnError::shape("matrix buffer", &[n * m], &[data.len()]));
        }
        Ok(Matrix { data, row: n, col: m })
    }

    /// Uniform init in `[-bound, bound)`, the usual `1/sqrt(fan_in)` scheme.
    pub fn uniform_init<R: Rng>(&mut self, bound: f32, rng: &mut R) {
        if bound <= 0.0 {
            self.fill_(0.0);
            return;
        }
        self.data
            .iter_mut()
            .for_each(|v| *v = rng.gen_range(-bound..bound));
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.row, self.col)
    }
    pub fn number_of_row(&self) -> usize {
        self.row
    }
    pub fn number_of_col(&self) -> usize {
        self.col
    }
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }
    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.col..(i + 1) * self.col]
    }
    pub fn row_mut(&mut self, i: usize) -> &mut [f32] {
        &mut self.data[i * self.col..(i + 1) * self.col]
    }

    /// Parallel iterator over rows, the unit of batch parallelism.
    pub fn par_rows(&self) -> impl IndexedParallelIterator<Item = &[f32]> {
        self.data.par_chunks(self.col.max(1))
    }
    pub fn par_rows_mut(&mut self) -> impl IndexedParallelIterator<Item = &mut [f32]> {
        self.data.par_chunks_mut(self.col.max(1))
    }

    pub fn at(&self, i: usize, j: usize) -> f32 {
        self.data[i * self.col + j]
    }
    pub fn set(&mut self, i: usize, j: usize, val: f32) {
        self.data[i * self.col + j] = val;
    }

    fn check_same_shape(&self, rhs: &Matrix, what: &'static str) -> Result<()> {
        if self.shape() != rhs.shape() {
            return Err(StnError::shape(
                what,
                &[self.row, self.col],
                &[rhs.row, rhs.col],
            ));
        }
        Ok(())
    }

    pub fn add(&self, rhs: &Matrix) -> Result<Matrix> {
        let mut ret = self.clone();
        ret.add_(rhs)?;
        Ok(ret)
    }

    pub fn add_(&mut self, rhs: &Matrix) -> Result<()> {
        self.check_same_shape(rhs, "add")?;
        self.data
            .par_iter_mut()
            .zip(rhs.data.par_iter())
            .for_each(|(a, b)| *a += *b);
        Ok(())
    }

    /// Broadcasts a `1 x col` row vector over every row.
    pub fn add_with_vector_(&mut self, rhs: &Matrix) -> Result<()> {
        if rhs.row != 1 || self.col != rhs.col {
            return Err(StnError::shape(
                "add_with_vector",
                &[1, self.col],
                &[rhs.row, rhs.col],
            ));
        }
        let v = rhs.row(0);
        self.par_rows_mut().for_each(|dst| {
            dst.iter_mut().zip(v).for_each(|(a, b)| *a += *b);
        });
        Ok(())
    }

    pub fn mul_with_numeric(&self, rhs: f32) -> Matrix {
        let mut ret = self.clone();
        ret.mul_with_numeric_(rhs);
        ret
    }

    pub fn mul_with_numeric_(&mut self, rhs: f32) {
        self.data.par_iter_mut().for_each(|a| *a *= rhs);
    }

    /// Matrix product, parallel over the rows of `self`.
    pub fn mul(&self, rhs: &Matrix) -> Result<Matrix> {
        if self.col != rhs.row {
            return Err(StnError::shape(
                "mul",
                &[self.col, rhs.col],
                &[rhs.row, rhs.col],
            ));
        }
        let mut ret = Matrix::new(self.row, rhs.col);
        if rhs.col == 0 {
            return Ok(ret);
        }
        ret.par_rows_mut().enumerate().for_each(|(i, dst)| {
            let lhs = self.row(i);
            for (k, &a) in lhs.iter().enumerate() {
                if a == 0.0 {
                    continue;
                }
                dst.iter_mut()
                    .zip(rhs.row(k))
                    .for_each(|(d, b)| *d += a * *b);
            }
        });
        Ok(ret)
    }

    pub fn transpose(&self) -> Matrix {
        let mut ret = Matrix::new(self.col, self.row);
        if self.row == 0 {
            return ret;
        }
        ret.par_rows_mut().enumerate().for_each(|(j, dst)| {
            for (i, d) in dst.iter_mut().enumerate() {
                *d = self.data[i * self.col + j];
            }
        });
        ret
    }

    /// Column sums as a `1 x col` matrix.
    pub fn sum_rows(&self) -> Matrix {
        let mut ret = Matrix::new(1, self.col);
        for i in 0..self.row {
            ret.data
                .iter_mut()
                .zip(self.row(i))
                .for_each(|(d, v)| *d += *v);
        }
        ret
    }

    pub fn sum(&self) -> f32 {
        self.data.iter().sum()
    }

    pub fn fill_(&mut self, val: f32) {
        self.data.par_iter_mut().for_each(|a| *a = val);
    }

    pub fn clamp_(&mut self, lo: f32, hi: f32) {
        self.data.par_iter_mut().for_each(|a| *a = (*a).clamp(lo, hi));
    }

    pub fn max_abs_diff(&self, rhs: &Matrix) -> Result<f32> {
        self.check_same_shape(rhs, "max_abs_diff")?;
        Ok(self
            .data
            .iter()
            .zip(&rhs.data)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f32::max))
    }
}

impl std::fmt::Display for Matrix {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Matrix Sized [{}, {}]", self.row, self.col)?;
        for i in 0..self.row {
            for j in 0..self.col {
                write!(f, "{:.2}", self.at(i, j))?;
                if j + 1 == self.col {
                    f.write_str("\n")?;
                } else {
                    f.write_str(" ")?;
                }
            }
        }
        Ok(())
    }
}
