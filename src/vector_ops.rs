use crate::config::Number;
use wide::f32x8;

/// Squared Euclidean distance using 8-lane SIMD, with a scalar tail.
/// Callers guarantee `a.len() == b.len()`.
pub fn squared_l2_distance_simd(a: &[Number], b: &[Number]) -> Number {
    debug_assert_eq!(a.len(), b.len());

    let len = a.len().min(b.len());
    let simd_len = len - (len % 8);
    let mut acc = f32x8::splat(0.0);

    for (ca, cb) in a[..simd_len].chunks_exact(8).zip(b[..simd_len].chunks_exact(8)) {
        let va = f32x8::new([ca[0], ca[1], ca[2], ca[3], ca[4], ca[5], ca[6], ca[7]]);
        let vb = f32x8::new([cb[0], cb[1], cb[2], cb[3], cb[4], cb[5], cb[6], cb[7]]);
        let diff = va - vb;
        acc += diff * diff;
    }

    let mut sum = acc.reduce_add();
    for i in simd_len..len {
        let diff = a[i] - b[i];
        sum += diff * diff;
    }
    sum
}

/// Replace NaN and infinite components with zero. Returns how many were replaced.
pub fn sanitize_vector(vector: &mut [Number]) -> usize {
    let mut replaced = 0;
    for x in vector.iter_mut() {
        if !x.is_finite() {
            *x = 0.0;
            replaced += 1;
        }
    }
    replaced
}

pub fn is_finite_vector(vector: &[Number]) -> bool {
    vector.iter().all(|x| x.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar_distance(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
    }

    #[test]
    fn test_distance_matches_scalar() {
        let a: Vec<f32> = (0..19).map(|i| i as f32 * 0.5).collect();
        let b: Vec<f32> = (0..19).map(|i| (19 - i) as f32 * 0.25).collect();
        let simd = squared_l2_distance_simd(&a, &b);
        let scalar = scalar_distance(&a, &b);
        assert!((simd - scalar).abs() < 1e-3, "{simd} vs {scalar}");
    }

    #[test]
    fn test_distance_short_vectors() {
        assert_eq!(squared_l2_distance_simd(&[1.0, 2.0], &[4.0, 6.0]), 25.0);
        assert_eq!(squared_l2_distance_simd(&[], &[]), 0.0);
    }

    #[test]
    fn test_sanitize_vector() {
        let mut v = vec![1.0, f32::NAN, f32::INFINITY, -2.0, f32::NEG_INFINITY];
        assert_eq!(sanitize_vector(&mut v), 3);
        assert_eq!(v, vec![1.0, 0.0, 0.0, -2.0, 0.0]);
        assert!(is_finite_vector(&v));
        assert_eq!(sanitize_vector(&mut v), 0);
    }
}
