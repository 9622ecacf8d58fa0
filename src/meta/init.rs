use ndarray::Array2;
use ndarray_rand::RandomExt;
use rand::Rng;
use rand_distr::{StandardNormal, Uniform};

use crate::{MlErr, Result};

/// Samples a `(fan_in, fan_out)` matrix from the Glorot uniform distribution.
pub fn glorot_uniform<R>(fan_in: usize, fan_out: usize, rng: &mut R) -> Result<Array2<f32>>
where
    R: Rng + ?Sized,
{
    let limit = (6. / (fan_in + fan_out) as f32).sqrt();
    let dist = Uniform::new_inclusive(-limit, limit)
        .map_err(|_| MlErr::InvalidConfig("glorot initialization of an empty matrix"))?;

    Ok(Array2::random_using((fan_in, fan_out), dist, rng))
}

/// Samples a `(rows, cols)` matrix with orthonormal rows, `rows <= cols`.
pub fn orthogonal<R>(rows: usize, cols: usize, rng: &mut R) -> Result<Array2<f32>>
where
    R: Rng + ?Sized,
{
    if rows > cols {
        return Err(MlErr::InvalidConfig(
            "orthogonal initialization needs at least as many columns as rows",
        ));
    }

    let mut a: Array2<f32> = Array2::random_using((rows, cols), StandardNormal, rng);

    // Gram-Schmidt over the rows.
    for i in 0..rows {
        for j in 0..i {
            let proj = a.row(i).dot(&a.row(j));
            let prev = a.row(j).to_owned();
            a.row_mut(i).scaled_add(-proj, &prev);
        }

        let norm = a.row(i).dot(&a.row(i)).sqrt();
        if norm > f32::EPSILON {
            a.row_mut(i).mapv_inplace(|v| v / norm);
        }
    }

    Ok(a)
}
