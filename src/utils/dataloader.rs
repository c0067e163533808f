use crate::error::{Result, StnError};
use crate::utils::mat::Matrix;
use crate::utils::misc::random_shuffle;
use crate::utils::nn_trait::DataSet;
use rayon::prelude::*;
use std::cmp::min;

/// Iterates a dataset in shuffled mini-batches of `(images, one-hot targets)`.
pub struct DataLoader<'a, T>
where
    T: DataSet,
{
    dataset: &'a T,
    batch_size: usize,
    num_classes: usize,
    count: usize,
    order: Vec<usize>,
}

impl<'a, T> DataLoader<'a, T>
where
    T: DataSet,
{
    /// `seed == None` keeps dataset order, as used for evaluation.
    pub fn new(dataset: &'a T, batch_size: usize, num_classes: usize, seed: Option<u64>) -> Self {
        let mut order = (0..dataset.len()).collect::<Vec<_>>();
        if let Some(seed) = seed {
            random_shuffle(&mut order, seed);
        }
        Self {
            dataset,
            batch_size: batch_size.max(1),
            num_classes,
            count: 0,
            order,
        }
    }

    pub fn num_batches(&self) -> usize {
        (self.dataset.len() + self.batch_size - 1) / self.batch_size
    }

    fn fetch_batch(&self, start: usize, len: usize) -> Result<(Matrix, Matrix)> {
        let dim = self.dataset.dim();
        let mut image = Matrix::new(len, dim);
        let mut gt = Matrix::new(len, self.num_classes);
        let order = &self.order[start..start + len];
        image
            .par_rows_mut()
            .zip(gt.par_rows_mut())
            .zip(order.par_iter())
            .try_for_each(|((dst, target), &idx)| -> Result<()> {
                let (fetched_image, fetched_gt) = self.dataset.fetch_item(idx)?;
                if fetched_image.len() != dim {
                    return Err(StnError::shape("dataset item", &[dim], &[fetched_image.len()]));
                }
                let label = fetched_gt as usize;
                if label >= target.len() {
                    return Err(StnError::dataset(format!(
                        "label {} out of range for {} classes",
                        label,
                        target.len()
                    )));
                }
                dst.copy_from_slice(fetched_image);
                target[label] = 1.0;
                Ok(())
            })?;
        Ok((image, gt))
    }
}

impl<'a, T> Iterator for DataLoader<'a, T>
where
    T: DataSet,
{
    type Item = Result<(Matrix, Matrix)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.count >= self.order.len() {
            None
        } else {
            let left = self.order.len() - self.count;
            let sz = min(left, self.batch_size);
            let ret = self.fetch_batch(self.count, sz);
            self.count += sz;
            Some(ret)
        }
    }
}
