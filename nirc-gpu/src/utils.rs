/// PCG-based integer hash; cheap and well-distributed enough for slot
/// selection and per-thread random streams.
pub fn pcg(value: u32) -> u32 {
    let state = value.wrapping_mul(747796405).wrapping_add(2891336453);
    let word = ((state >> ((state >> 28) + 4)) ^ state).wrapping_mul(277803737);

    (word >> 22) ^ word
}

/// Returns a uniformly distributed number in `0.0 .. 1.0`, deterministic for
/// given `(seed, id)`.
pub fn random_unit(seed: u32, id: u32) -> f32 {
    let bits = pcg(pcg(seed) ^ id.wrapping_mul(0x9e3779b9));

    (bits >> 8) as f32 / (1 << 24) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_unit_is_deterministic_and_bounded() {
        for id in 0..4096 {
            let a = random_unit(1234, id);
            let b = random_unit(1234, id);

            assert_eq!(a, b);
            assert!((0.0..1.0).contains(&a));
        }

        assert_ne!(random_unit(1, 7), random_unit(2, 7));
    }
}
