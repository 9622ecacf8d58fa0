use ndarray::{Array1, ArrayView1};

/// The scale of the logarithmic branch.
pub const P: f32 = 10.0;

/// Maps a gradient (or loss) value to two features bounded for every finite magnitude.
///
/// Values with a magnitude above `exp(-P)` become `(log(|x|) / P, sign(x))`, smaller ones
/// become `(-1, exp(P) * x)`.
pub fn preprocess(x: f32) -> (f32, f32) {
    let threshold = (-P).exp();

    if x.abs() > threshold {
        (x.abs().ln() / P, x.signum())
    } else {
        (-1., P.exp() * x)
    }
}

/// Applies `preprocess` to every element.
///
/// # Returns
/// The two feature columns.
pub fn preprocess_array(xs: ArrayView1<f32>) -> (Array1<f32>, Array1<f32>) {
    let mut first = Array1::zeros(xs.len());
    let mut second = Array1::zeros(xs.len());

    for ((&x, a), b) in xs.iter().zip(&mut first).zip(&mut second) {
        (*a, *b) = preprocess(x);
    }

    (first, second)
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn zero_maps_to_the_small_branch() {
        assert_eq!(preprocess(0.), (-1., 0.));
    }

    #[test]
    fn threshold_is_finite() {
        let threshold = (-P).exp();

        for x in [threshold, -threshold, threshold * 1.0001, f32::MIN_POSITIVE] {
            let (a, b) = preprocess(x);
            assert!(a.is_finite() && b.is_finite(), "{x} -> ({a}, {b})");
            assert!(a.abs() <= 1.001 && b.abs() <= 1.001, "{x} -> ({a}, {b})");
        }
    }

    #[test]
    fn large_values_go_logarithmic() {
        let (a, b) = preprocess(1e6);
        assert!((a - 1e6f32.ln() / 10.).abs() < 1e-6);
        assert_eq!(b, 1.);

        let (a, b) = preprocess(-1e6);
        assert!((a - 1e6f32.ln() / 10.).abs() < 1e-6);
        assert_eq!(b, -1.);
    }

    #[test]
    fn extremes_stay_finite() {
        for x in [f32::MAX, f32::MIN, 1e-30, -1e-30] {
            let (a, b) = preprocess(x);
            assert!(a.is_finite() && b.is_finite(), "{x} -> ({a}, {b})");
        }
    }

    #[test]
    fn arrays_map_element_wise() {
        let (a, b) = preprocess_array(array![0., 1., -1.].view());

        assert_eq!(a, array![-1., 0., 0.]);
        assert_eq!(b, array![0., 1., -1.]);
    }
}
