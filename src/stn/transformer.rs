use crate::context::ExecutionContext;
use crate::error::{Result, StnError};
use crate::stn::affine_grid::{affine_grid, affine_grid_backward};
use crate::stn::grid_sample::{grid_sample, grid_sample_backward};
use crate::stn::localization::Localization;
use crate::stn::regressor::AffineRegressor;
use crate::utils::mat::Matrix;
use crate::utils::nn_trait::{Layer, Param};
use crate::utils::shape::ImageShape;
use tracing::trace;

struct ForwardCache {
    input: Matrix,
    theta: Matrix,
    grid: Matrix,
}

/// Predicts theta from the image, then resamples the same image through the
/// resulting affine grid. Output geometry equals input geometry.
pub struct SpatialTransformer {
    pub localization: Localization,
    pub regressor: AffineRegressor,
    pub shape: ImageShape,
    cache: Option<ForwardCache>,
}

impl SpatialTransformer {
    pub fn new(shape: ImageShape, ctx: &mut ExecutionContext) -> Result<Self> {
        let localization = Localization::new(shape, ctx)?;
        let regressor = AffineRegressor::new(localization.features(), ctx)?;
        Ok(Self {
            localization,
            regressor,
            shape,
            cache: None,
        })
    }

    /// Theta of the most recent forward pass.
    pub fn last_theta(&self) -> Option<&Matrix> {
        self.cache.as_ref().map(|c| &c.theta)
    }
}

impl Layer for SpatialTransformer {
    fn forward(&mut self, x: Matrix) -> Result<Matrix> {
        self.shape.check("spatial transformer input", &x)?;
        let n = x.number_of_row();
        let features = self.localization.forward(x.clone())?;
        trace!(rows = n, cols = features.number_of_col(), "localization features");
        let theta = self.regressor.forward(features)?;
        let grid = affine_grid(&theta, n, self.shape)?;
        let out = grid_sample(&x, self.shape, &grid, self.shape)?;
        trace!(rows = n, cols = out.number_of_col(), "transformed batch");
        self.cache = Some(ForwardCache {
            input: x,
            theta,
            grid,
        });
        Ok(out)
    }

    fn backward(&mut self, d_out: Matrix) -> Result<Matrix> {
        let cache = self.cache.as_ref().ok_or_else(|| {
            StnError::shape("spatial transformer backward before forward", &[1], &[0])
        })?;
        let (mut d_input, d_grid) =
            grid_sample_backward(&cache.input, self.shape, &cache.grid, self.shape, &d_out)?;
        let d_theta = affine_grid_backward(&d_grid, self.shape)?;
        let d_features = self.regressor.backward(d_theta)?;
        let d_loc = self.localization.backward(d_features)?;
        d_input.add_(&d_loc)?;
        Ok(d_input)
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut params = self.localization.params_mut();
        params.extend(self.regressor.params_mut());
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 5e-3;

    #[derive(Clone, Copy, Debug)]
    enum Entry {
        Conv1Weight(usize),
        Fc1Weight(usize),
        Pixel(usize),
    }

    // Linear ramps keep bilinear sampling exactly linear in the sample
    // position, so the only kinks left come from relu and max-pool.
    fn ramp_batch(shape: ImageShape) -> Matrix {
        let mut x = Matrix::new(2, shape.len());
        for i in 0..shape.height {
            for j in 0..shape.width {
                let o = shape.offset(i, j, 0);
                x.set(0, o, 0.3 + 0.08 * j as f32 - 0.05 * i as f32);
                x.set(1, o, 0.9 - 0.04 * j as f32 + 0.06 * i as f32);
            }
        }
        x
    }

    fn slot<'a>(t: &'a mut SpatialTransformer, x: &'a mut Matrix, entry: Entry) -> &'a mut f32 {
        match entry {
            Entry::Conv1Weight(k) => &mut t.localization.conv1.weight.value.as_mut_slice()[k],
            Entry::Fc1Weight(k) => &mut t.regressor.fc1.weight.value.as_mut_slice()[k],
            Entry::Pixel(k) => &mut x.as_mut_slice()[k],
        }
    }

    fn objective(t: &mut SpatialTransformer, x: &Matrix, probe: &Matrix) -> f64 {
        t.forward(x.clone())
            .unwrap()
            .as_slice()
            .iter()
            .zip(probe.as_slice())
            .map(|(a, b)| *a as f64 * *b as f64)
            .sum()
    }

    fn numeric(t: &mut SpatialTransformer, x: &mut Matrix, probe: &Matrix, entry: Entry) -> f64 {
        let original = *slot(t, x, entry);
        *slot(t, x, entry) = original + EPS;
        let plus = objective(t, x, probe);
        *slot(t, x, entry) = original - EPS;
        let minus = objective(t, x, probe);
        *slot(t, x, entry) = original;
        (plus - minus) / (2.0 * EPS as f64)
    }

    #[test]
    fn backward_matches_finite_differences_through_the_localization_path() {
        let shape = ImageShape::new(1, 18, 18);
        let mut ctx = ExecutionContext::new(1, 21).unwrap();
        let mut t = SpatialTransformer::new(shape, &mut ctx).unwrap();
        assert_eq!(t.localization.features(), 12);

        // Small random theta weights make the chain live while every sample
        // stays well inside the image.
        t.regressor.fc2.weight.value.uniform_init(0.02, ctx.rng());
        t.regressor.fc2.bias.value =
            Matrix::from_vec(1, 6, vec![0.5, 0.0, 0.0, 0.0, 0.5, 0.0]).unwrap();

        let mut x = ramp_batch(shape);
        let mut probe = Matrix::new(2, shape.len());
        probe.uniform_init(1.0, ctx.rng());

        t.forward(x.clone()).unwrap();
        let grid = &t.cache.as_ref().unwrap().grid;
        assert!(grid.as_slice().iter().all(|g| g.abs() < 0.95));
        let d_input = t.backward(probe.clone()).unwrap();
        let conv1_grad = t.localization.conv1.weight.grad.clone();
        let fc1_grad = t.regressor.fc1.weight.grad.clone();

        // conv1 weight is (7 * 7 * 1) x 8; take the centre tap of every channel
        let mut entries: Vec<Entry> = (0..8).map(|c| Entry::Conv1Weight(24 * 8 + c)).collect();
        // fc1 weight is 12 x 32
        entries.extend([0, 37, 101, 250, 383].map(Entry::Fc1Weight));
        entries.extend([0, 40, 171, 323, 424].map(Entry::Pixel));

        let mut live_conv1 = false;
        for entry in entries {
            let analytic = match entry {
                Entry::Conv1Weight(k) => conv1_grad.as_slice()[k],
                Entry::Fc1Weight(k) => fc1_grad.as_slice()[k],
                Entry::Pixel(k) => d_input.as_slice()[k],
            } as f64;
            if matches!(entry, Entry::Conv1Weight(_)) && analytic.abs() > 1e-6 {
                live_conv1 = true;
            }
            let estimate = numeric(&mut t, &mut x, &probe, entry);
            let tol = 5e-2 * analytic.abs().max(estimate.abs()) + 2e-4;
            assert!(
                (analytic - estimate).abs() <= tol,
                "{:?}: analytic {} vs numeric {}",
                entry,
                analytic,
                estimate
            );
        }
        assert!(live_conv1, "no gradient reached the localization network");
    }
}
