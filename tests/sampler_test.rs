use approx::assert_abs_diff_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tiny_stn::stn::affine_grid::{affine_grid, affine_grid_backward, identity_theta};
use tiny_stn::stn::grid_sample::{grid_sample, grid_sample_backward};
use tiny_stn::{ImageShape, Matrix, StnError};

fn random_image(n: usize, shape: ImageShape, seed: u64) -> Matrix {
    let mut rng = StdRng::seed_from_u64(seed);
    let data = (0..n * shape.len()).map(|_| rng.gen_range(0.0..1.0)).collect();
    Matrix::from_vec(n, shape.len(), data).unwrap()
}

fn theta(values: [f32; 6]) -> Matrix {
    Matrix::from_vec(1, 6, values.to_vec()).unwrap()
}

fn transform(image: &Matrix, shape: ImageShape, t: &Matrix, out: ImageShape) -> Matrix {
    let grid = affine_grid(t, image.number_of_row(), out).unwrap();
    grid_sample(image, shape, &grid, out).unwrap()
}

#[test]
fn identity_theta_reproduces_the_input() {
    let shape = ImageShape::new(3, 5, 7);
    let image = random_image(4, shape, 1);
    let out = transform(&image, shape, &identity_theta(4), shape);
    assert!(out.max_abs_diff(&image).unwrap() < 1e-5);
}

#[test]
fn translation_past_the_border_yields_zero() {
    let shape = ImageShape::new(1, 3, 5);
    let image = Matrix::filled(1, shape.len(), 1.0);

    // shift by two pixels: x' = x + 2 * 2 / (W - 1)
    let out = transform(&image, shape, &theta([1.0, 0.0, 1.0, 0.0, 1.0, 0.0]), shape);
    for i in 0..shape.height {
        for j in 0..shape.width {
            let v = out.at(0, shape.offset(i, j, 0));
            if j + 2 < shape.width {
                assert_abs_diff_eq!(v, 1.0, epsilon = 1e-5);
            } else {
                assert_eq!(v, 0.0, "pixel ({}, {}) should be padding", i, j);
            }
        }
    }

    let out = transform(&image, shape, &theta([1.0, 0.0, 2.5, 0.0, 1.0, 0.0]), shape);
    assert!(out.as_slice().iter().all(|v| *v == 0.0));
}

#[test]
fn diverged_theta_samples_only_padding() {
    let shape = ImageShape::new(3, 4, 4);
    let image = random_image(2, shape, 12);
    for t in [
        [1.0, 0.0, 1e20, 0.0, 1.0, 0.0],
        [1e30, 0.0, 0.0, 0.0, 1.0, 0.0],
        [1.0, 0.0, 0.0, 0.0, 1.0, -1e20],
    ] {
        let out = transform(&image, shape, &theta(t), shape);
        assert_eq!(out.shape(), image.shape());
        assert!(
            out.as_slice().iter().all(|v| v.is_finite()),
            "theta {:?} produced a non-finite sample",
            t
        );
    }
    let out = transform(&image, shape, &theta([1.0, 0.0, 1e20, 0.0, 1.0, 0.0]), shape);
    assert!(out.as_slice().iter().all(|v| *v == 0.0));
}

#[test]
fn translation_moves_content() {
    let shape = ImageShape::new(2, 4, 5);
    let image = random_image(1, shape, 2);
    // one pixel down: y' = y + 2 / (H - 1)
    let out = transform(&image, shape, &theta([1.0, 0.0, 0.0, 0.0, 1.0, 2.0 / 3.0]), shape);
    for i in 0..shape.height - 1 {
        for j in 0..shape.width {
            for c in 0..shape.channels {
                assert_abs_diff_eq!(
                    out.at(0, shape.offset(i, j, c)),
                    image.at(0, shape.offset(i + 1, j, c)),
                    epsilon = 1e-5
                );
            }
        }
    }
}

#[test]
fn output_size_may_differ_from_input() {
    let shape = ImageShape::new(1, 4, 4);
    let image = random_image(2, shape, 3);
    let out_shape = ImageShape::new(1, 2, 2);
    let out = transform(&image, shape, &identity_theta(2), out_shape);
    assert_eq!(out.shape(), (2, 4));
    // corners still land on corners
    assert_abs_diff_eq!(out.at(1, 0), image.at(1, 0), epsilon = 1e-5);
    assert_abs_diff_eq!(out.at(1, 3), image.at(1, 15), epsilon = 1e-5);
}

#[test]
fn small_theta_changes_give_small_output_changes() {
    let shape = ImageShape::new(3, 8, 8);
    let image = random_image(1, shape, 4);
    let base = [0.9, 0.1, 0.05, -0.1, 0.9, -0.05];
    let out = transform(&image, shape, &theta(base), shape);
    let delta = 1e-4;
    for k in 0..6 {
        let mut moved = base;
        moved[k] += delta;
        let out2 = transform(&image, shape, &theta(moved), shape);
        let diff = out.max_abs_diff(&out2).unwrap();
        // |d out / d theta| <= (W - 1) / 2 for values in [0, 1]
        assert!(diff <= 4.0 * delta, "theta[{}] moved output by {}", k, diff);
    }
}

fn objective(image: &Matrix, shape: ImageShape, t: &Matrix, out: ImageShape, probe: &Matrix) -> f64 {
    transform(image, shape, t, out)
        .as_slice()
        .iter()
        .zip(probe.as_slice())
        .map(|(a, b)| *a as f64 * *b as f64)
        .sum()
}

#[test]
fn theta_gradient_matches_finite_differences() {
    let shape = ImageShape::new(2, 5, 5);
    let out_shape = ImageShape::new(2, 3, 3);
    let image = random_image(1, shape, 5);
    let mut rng = StdRng::seed_from_u64(6);
    let probe_data = (0..out_shape.len()).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let probe = Matrix::from_vec(1, out_shape.len(), probe_data).unwrap();

    // every sample point sits at least 0.04 px away from a pixel boundary
    let base = [0.5, 0.05, 0.1, -0.05, 0.5, 0.03];
    let grid = affine_grid(&theta(base), 1, out_shape).unwrap();
    let (_, d_grid) = grid_sample_backward(&image, shape, &grid, out_shape, &probe).unwrap();
    let analytic = affine_grid_backward(&d_grid, out_shape).unwrap();

    let eps = 1e-2f32;
    for k in 0..6 {
        let mut plus = base;
        plus[k] += eps;
        let mut minus = base;
        minus[k] -= eps;
        let numeric = (objective(&image, shape, &theta(plus), out_shape, &probe)
            - objective(&image, shape, &theta(minus), out_shape, &probe))
            / (2.0 * eps as f64);
        let a = analytic.at(0, k) as f64;
        let tol = 1e-3 * a.abs().max(numeric.abs()) + 1e-3;
        assert!(
            (a - numeric).abs() <= tol,
            "d theta[{}]: analytic {} vs numeric {}",
            k,
            a,
            numeric
        );
    }
}

#[test]
fn image_gradient_matches_finite_differences() {
    let shape = ImageShape::new(1, 4, 4);
    let out_shape = ImageShape::new(1, 3, 3);
    let image = random_image(1, shape, 7);
    let probe = random_image(1, out_shape, 8);
    let t = theta([0.8, -0.2, 0.3, 0.2, 0.8, -0.1]);
    let grid = affine_grid(&t, 1, out_shape).unwrap();
    let (d_image, _) = grid_sample_backward(&image, shape, &grid, out_shape, &probe).unwrap();

    let eps = 1e-2f32;
    for idx in 0..shape.len() {
        let mut plus = image.clone();
        plus.as_mut_slice()[idx] += eps;
        let mut minus = image.clone();
        minus.as_mut_slice()[idx] -= eps;
        let numeric = (objective(&plus, shape, &t, out_shape, &probe)
            - objective(&minus, shape, &t, out_shape, &probe))
            / (2.0 * eps as f64);
        assert_abs_diff_eq!(d_image.at(0, idx) as f64, numeric, epsilon = 1e-3);
    }
}

#[test]
fn boundary_errors_fail_fast() {
    let shape = ImageShape::new(3, 4, 4);
    let image = random_image(2, shape, 9);
    let bad_theta = Matrix::new(2, 9);
    assert!(matches!(
        affine_grid(&bad_theta, 2, shape),
        Err(StnError::ShapeMismatch { .. })
    ));

    let grid = affine_grid(&identity_theta(2), 2, ImageShape::new(3, 2, 2)).unwrap();
    assert!(matches!(
        grid_sample(&image, shape, &grid, shape),
        Err(StnError::ShapeMismatch { .. })
    ));
    let d_out = Matrix::new(2, 5);
    assert!(grid_sample_backward(&image, shape, &grid, ImageShape::new(3, 2, 2), &d_out).is_err());
}
