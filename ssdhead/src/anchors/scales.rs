//! Per-level anchor scale derivation from a global base-size ratio range.

use crate::error::{SsdHeadError, SsdHeadResult};

/// Scale parameters for one feature level, feeding [`AnchorGenerator::ssd`].
///
/// [`AnchorGenerator::ssd`]: crate::anchors::AnchorGenerator::ssd
#[derive(Debug, Clone, PartialEq)]
pub struct LevelScales {
    /// Base anchor side length in pixels.
    pub base_size: f64,
    /// `[1.0, sqrt(max_size / min_size)]`.
    pub scales: Vec<f64>,
    /// `[1.0]` followed by `1/r, r` for each configured aspect ratio.
    pub ratios: Vec<f64>,
}

/// Derives per-level anchor scales the SSD way.
///
/// The ratio range is expressed in integer percentages of `input_size` and
/// walked in uniform steps of `floor((max - min) / (num_levels - 2))`; the
/// resulting `(min_size, max_size)` pairs cover levels `1..num_levels`. The
/// first level gets a distinct, smaller range of
/// `(input_size * min_ratio / 2, input_size * min_ratio)` to serve the
/// highest-resolution feature map. Sizes truncate toward zero at every step.
///
/// # Errors
///
/// Fails with `InvalidConfiguration` when fewer than three levels are
/// requested (the step divisor is `num_levels - 2`) or when the range is too
/// narrow to produce a positive step, and with `MismatchedLevels` when the
/// walk does not land on exactly `num_levels` entries.
pub fn derive_level_scales(
    num_levels: usize,
    input_size: usize,
    basesize_ratio_range: (f64, f64),
    anchor_ratios: &[Vec<f64>],
) -> SsdHeadResult<Vec<LevelScales>> {
    if num_levels < 3 {
        return Err(SsdHeadError::InvalidConfiguration {
            reason: format!("scale derivation requires at least 3 levels, got {num_levels}"),
        });
    }
    if anchor_ratios.len() != num_levels {
        return Err(SsdHeadError::MismatchedLevels {
            what: "anchor ratios".to_string(),
            expected: num_levels,
            actual: anchor_ratios.len(),
        });
    }

    let (min_frac, max_frac) = basesize_ratio_range;
    let min_ratio = (min_frac * 100.0) as i64;
    let max_ratio = (max_frac * 100.0) as i64;
    let step = (max_ratio - min_ratio) / (num_levels as i64 - 2);
    if step < 1 {
        return Err(SsdHeadError::InvalidConfiguration {
            reason: format!(
                "basesize_ratio_range ({min_frac}, {max_frac}) is too narrow \
                 for {num_levels} levels"
            ),
        });
    }

    let mut min_sizes = Vec::with_capacity(num_levels);
    let mut max_sizes = Vec::with_capacity(num_levels);
    let mut ratio = min_ratio;
    while ratio <= max_ratio {
        min_sizes.push(input_size as i64 * ratio / 100);
        max_sizes.push(input_size as i64 * (ratio + step) / 100);
        ratio += step;
    }
    min_sizes.insert(0, (input_size as f64 * min_frac / 2.0) as i64);
    max_sizes.insert(0, (input_size as f64 * min_frac) as i64);

    if min_sizes.len() != num_levels {
        return Err(SsdHeadError::MismatchedLevels {
            what: "derived anchor sizes".to_string(),
            expected: num_levels,
            actual: min_sizes.len(),
        });
    }

    Ok(min_sizes
        .iter()
        .zip(&max_sizes)
        .zip(anchor_ratios)
        .map(|((&min_size, &max_size), level_ratios)| {
            let mut ratios = vec![1.0];
            for &r in level_ratios {
                ratios.push(1.0 / r);
                ratios.push(r);
            }
            LevelScales {
                base_size: min_size as f64,
                scales: vec![1.0, (max_size as f64 / min_size as f64).sqrt()],
                ratios,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes(levels: &[LevelScales]) -> Vec<(f64, f64)> {
        levels
            .iter()
            .map(|l| {
                let max = l.base_size * l.scales[1] * l.scales[1];
                (l.base_size, max)
            })
            .collect()
    }

    #[test]
    fn test_three_level_reference() {
        // input 300, range (0.2, 0.9): step = 70, walk emits (60, 270) and
        // (270, 480), prepend (30, 60).
        let levels =
            derive_level_scales(3, 300, (0.2, 0.9), &[vec![2.0], vec![2.0, 3.0], vec![2.0]])
                .unwrap();

        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0].base_size, 30.0);
        assert_eq!(levels[1].base_size, 60.0);
        assert_eq!(levels[2].base_size, 270.0);

        for ((base, max), expected_max) in sizes(&levels).into_iter().zip([60.0, 270.0, 480.0]) {
            assert!(base <= expected_max);
            assert!((max - expected_max).abs() < 1e-6);
        }
    }

    #[test]
    fn test_ssd300_six_level_reference() {
        // The classic SSD300 configuration: range (0.15, 0.9) over 6 levels.
        let ratios = vec![
            vec![2.0],
            vec![2.0, 3.0],
            vec![2.0, 3.0],
            vec![2.0, 3.0],
            vec![2.0],
            vec![2.0],
        ];
        let levels = derive_level_scales(6, 300, (0.15, 0.9), &ratios).unwrap();

        let base_sizes: Vec<f64> = levels.iter().map(|l| l.base_size).collect();
        assert_eq!(base_sizes, vec![22.0, 45.0, 99.0, 153.0, 207.0, 261.0]);

        let max_sizes: Vec<f64> = sizes(&levels).iter().map(|&(_, max)| max).collect();
        for (max, expected) in max_sizes
            .into_iter()
            .zip([45.0, 99.0, 153.0, 207.0, 261.0, 315.0])
        {
            assert!((max - expected).abs() < 1e-6, "got {max}, want {expected}");
        }
    }

    #[test]
    fn test_ratio_expansion() {
        let levels =
            derive_level_scales(3, 300, (0.2, 0.9), &[vec![2.0], vec![2.0, 3.0], vec![2.0]])
                .unwrap();

        assert_eq!(levels[0].ratios, vec![1.0, 0.5, 2.0]);
        assert_eq!(
            levels[1].ratios,
            vec![1.0, 0.5, 2.0, 1.0 / 3.0, 3.0]
        );
        assert_eq!(levels[0].scales[0], 1.0);
        assert_eq!(levels[0].scales.len(), 2);
    }

    #[test]
    fn test_monotonic_across_levels() {
        for range in [(0.1, 0.9), (0.2, 0.9), (0.15, 0.85), (0.05, 0.5)] {
            for num_levels in 3..=7 {
                let ratios = vec![vec![2.0]; num_levels];
                let levels = derive_level_scales(num_levels, 512, range, &ratios).unwrap();
                let pairs = sizes(&levels);
                for (min_size, max_size) in &pairs {
                    assert!(min_size <= max_size, "{range:?}/{num_levels}: {pairs:?}");
                }
                for window in pairs.windows(2) {
                    assert!(
                        window[0].0 < window[1].0,
                        "{range:?}/{num_levels}: {pairs:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_too_few_levels_rejected() {
        let result = derive_level_scales(2, 300, (0.2, 0.9), &[vec![2.0], vec![2.0]]);
        assert!(matches!(
            result,
            Err(SsdHeadError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_degenerate_range_rejected() {
        // 100 * (0.22 - 0.2) = 2 percent spread over 5 levels: step 0.
        let result = derive_level_scales(5, 300, (0.2, 0.22), &vec![vec![2.0]; 5]);
        assert!(matches!(
            result,
            Err(SsdHeadError::InvalidConfiguration { .. })
        ));
    }
}
