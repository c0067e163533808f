use crate::error::{Result, StnError};
use crate::utils::mat::Matrix;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Fails on the first NaN or infinite entry.
pub fn check_abnormal(what: &str, x: &Matrix) -> Result<()> {
    if let Some(pos) = x.as_slice().iter().position(|v| !v.is_finite()) {
        let col = x.number_of_col().max(1);
        return Err(StnError::Numerical(format!(
            "{} has non-finite value {} at ({}, {})",
            what,
            x.as_slice()[pos],
            pos / col,
            pos % col
        )));
    }
    Ok(())
}

pub fn random_shuffle(x: &mut [usize], seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    x.shuffle(&mut rng);
}

/// Mean of an `N x 1` per-sample loss column.
pub fn mean_loss(loss: &Matrix) -> f32 {
    let (h, _) = loss.shape();
    if h == 0 {
        return 0.0;
    }
    loss.sum() / h as f32
}
