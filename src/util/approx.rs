/// Whether `a` and `b` differ by no more than `eps`. Used throughout the
/// test suite for tone-curve round-trips and numeric comparisons instead of
/// pulling in an approx-equality crate for a one-line predicate.
pub fn approx_eq(a: f32, b: f32, eps: f32) -> bool {
    (a - b).abs() <= eps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_tolerance() {
        assert!(approx_eq(1.0, 1.0005, 1e-3));
    }

    #[test]
    fn outside_tolerance() {
        assert!(!approx_eq(1.0, 1.1, 1e-3));
    }
}
