//! Test data generators for creating predictable array contents.

/// Values `0, 1, 2, ...` as `f64`, handy for coordinate maps.
pub fn create_ramp(len: usize) -> Vec<f64> {
    (0..len).map(|i| i as f64).collect()
}

/// Row-major values of a 3-D cube where each element encodes its index:
/// `t * 10_000 + y * 100 + x`.
pub fn create_indexed_cube(nt: usize, ny: usize, nx: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(nt * ny * nx);
    for t in 0..nt {
        for y in 0..ny {
            for x in 0..nx {
                data.push((t * 10_000 + y * 100 + x) as f32);
            }
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ramp() {
        assert_eq!(create_ramp(3), vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_indexed_cube() {
        let cube = create_indexed_cube(2, 3, 4);
        assert_eq!(cube.len(), 24);
        assert_eq!(cube[4 * 3 + 4 + 1], 10_101.0);
    }
}
