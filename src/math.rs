use itertools::izip;
use multiversion::multiversion;

#[inline]
pub(crate) fn logaddexp(a: f64, b: f64) -> f64 {
    if a == b {
        return a + 2f64.ln();
    }
    let diff = a - b;
    if diff > 0. {
        a + (-diff).exp().ln_1p()
    } else if diff < 0. {
        b + diff.exp().ln_1p()
    } else {
        // diff is NAN
        diff
    }
}

#[inline]
pub(crate) fn sigmoid(x: f64) -> f64 {
    if x >= 0. {
        1. / (1. + (-x).exp())
    } else {
        let e = x.exp();
        e / (1. + e)
    }
}

/// `ln(sigmoid(x))` without underflow for large negative `x`.
#[inline]
pub(crate) fn log_sigmoid(x: f64) -> f64 {
    if x >= 0. {
        -(-x).exp().ln_1p()
    } else {
        x - x.exp().ln_1p()
    }
}

#[inline]
pub(crate) fn logit(p: f64) -> f64 {
    (p / (1. - p)).ln()
}

#[multiversion(targets("x86_64+avx+avx2+fma", "arm+neon"))]
pub(crate) fn vector_dot(a: &[f64], b: &[f64]) -> f64 {
    assert!(a.len() == b.len());

    let head_length = a.len() - a.len() % 4;
    let (x, x_tail) = a.split_at(head_length);
    let (y, y_tail) = b.split_at(head_length);

    let mut acc = [0f64; 4];
    izip!(x.chunks_exact(4), y.chunks_exact(4)).for_each(|(x, y)| {
        for i in 0..4 {
            acc[i] += x[i] * y[i];
        }
    });

    let mut result = acc.iter().sum::<f64>();
    for (val1, val2) in x_tail.iter().zip(y_tail) {
        result += *val1 * *val2;
    }
    result
}

#[multiversion(targets("x86_64+avx+avx2+fma", "arm+neon"))]
pub(crate) fn scalar_prods2(
    positive1: &[f64],
    positive2: &[f64],
    x: &[f64],
    y: &[f64],
) -> (f64, f64) {
    let n = positive1.len();

    assert!(positive2.len() == n);
    assert!(x.len() == n);
    assert!(y.len() == n);

    izip!(positive1, positive2, x, y).fold((0., 0.), |(s1, s2), (a, b, x, y)| {
        (s1 + x * (a + b), s2 + y * (a + b))
    })
}

#[multiversion(targets("x86_64+avx+avx2+fma", "arm+neon"))]
pub(crate) fn scalar_prods3(
    positive1: &[f64],
    negative1: &[f64],
    positive2: &[f64],
    x: &[f64],
    y: &[f64],
) -> (f64, f64) {
    let n = positive1.len();

    assert!(positive2.len() == n);
    assert!(negative1.len() == n);
    assert!(x.len() == n);
    assert!(y.len() == n);

    izip!(positive1, negative1, positive2, x, y).fold(
        (0., 0.),
        |(s1, s2), (a, b, c, x, y)| (s1 + x * (a - b + c), s2 + y * (a - b + c)),
    )
}

#[multiversion(targets("x86_64+avx+avx2+fma", "arm+neon"))]
pub(crate) fn axpy(x: &[f64], y: &mut [f64], a: f64) {
    assert!(y.len() == x.len());

    izip!(x, y).for_each(|(x, y)| {
        *y += a * x;
    });
}

#[multiversion(targets("x86_64+avx+avx2+fma", "arm+neon"))]
pub(crate) fn axpy_out(x: &[f64], y: &[f64], a: f64, out: &mut [f64]) {
    let n = x.len();
    assert!(y.len() == n);
    assert!(out.len() == n);

    izip!(x, y, out).for_each(|(x, y, out)| {
        *out = a * x + y;
    });
}

#[multiversion(targets("x86_64+avx+avx2+fma", "arm+neon"))]
pub(crate) fn multiply(x: &[f64], y: &[f64], out: &mut [f64]) {
    let n = x.len();
    assert!(y.len() == n);
    assert!(out.len() == n);

    izip!(x, y, out).for_each(|(x, y, out)| {
        *out = x * y;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn check_logaddexp(x in -10f64..10f64, y in -10f64..10f64) {
            let a = (x.exp() + y.exp()).ln();
            let b = logaddexp(x, y);
            let neginf = f64::NEG_INFINITY;
            let nan = f64::NAN;
            prop_assert!((a - b).abs() < 1e-10);
            prop_assert_eq!(b, logaddexp(y, x));
            prop_assert_eq!(x, logaddexp(x, neginf));
            prop_assert_eq!(logaddexp(neginf, neginf), neginf);
            prop_assert!(logaddexp(nan, x).is_nan());
        }

        #[test]
        fn check_logit_inverts_sigmoid(x in -30f64..30f64) {
            prop_assert!((logit(sigmoid(x)) - x).abs() < 1e-6);
            prop_assert!((log_sigmoid(x) - sigmoid(x).ln()).abs() < 1e-10);
        }

        #[test]
        fn check_dot(a in prop::collection::vec(-5f64..5f64, 0..13)) {
            let naive: f64 = a.iter().map(|x| x * x).sum();
            prop_assert!((vector_dot(&a, &a) - naive).abs() < 1e-9);
        }
    }

    #[test]
    fn check_neginf() {
        assert_eq!(logaddexp(f64::NEG_INFINITY, 2.), 2.);
        assert_eq!(logaddexp(2., f64::NEG_INFINITY), 2.);
    }

    #[test]
    fn check_axpy() {
        let x = [1., 2., 3., 4., 5.];
        let mut y = [1., 1., 1., 1., 1.];
        axpy(&x, &mut y, 2.);
        assert_eq!(y, [3., 5., 7., 9., 11.]);

        let mut out = [0f64; 5];
        axpy_out(&x, &y, -1., &mut out);
        assert_eq!(out, [2., 3., 4., 5., 6.]);

        multiply(&x, &x, &mut out);
        assert_abs_diff_eq!(out[4], 25.);
    }

    #[test]
    fn check_scalar_prods() {
        let a = [1., 2., 3.];
        let b = [1., 1., 1.];
        let c = [0., 1., 0.];
        let x = [1., 0., 1.];
        let y = [0., 1., 0.];
        assert_eq!(scalar_prods2(&a, &b, &x, &y), (6., 3.));
        assert_eq!(scalar_prods3(&a, &b, &c, &x, &y), (2., 2.));
    }
}
