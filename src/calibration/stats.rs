//! Summary statistics and the single-cut separability score.

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Midpoint cut between two pooled distributions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Split {
    pub threshold: f64,
    /// Fraction of all samples on their own side of the cut, in [0,1]
    pub separability: f64,
    /// Genuine samples are expected at or above the threshold
    pub genuine_above: bool,
}

pub fn midpoint_split(genuine: &[f64], other: &[f64]) -> Split {
    let mg = mean(genuine);
    let mo = mean(other);
    let threshold = (mg + mo) / 2.0;
    let genuine_above = mg >= mo;
    let total = genuine.len() + other.len();
    if mg == mo || total == 0 {
        return Split {
            threshold,
            separability: 0.0,
            genuine_above,
        };
    }
    let on_genuine_side = |v: f64| {
        if genuine_above {
            v >= threshold
        } else {
            v <= threshold
        }
    };
    let correct = genuine.iter().filter(|&&v| on_genuine_side(v)).count()
        + other.iter().filter(|&&v| !on_genuine_side(v)).count();
    Split {
        threshold,
        separability: (correct as f64 / total as f64).clamp(0.0, 1.0),
        genuine_above,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median(&[]), 0.0);
    }

    #[test]
    fn overlapping_distributions_score_below_one() {
        let s = midpoint_split(&[10.0, 12.0, 4.0], &[2.0, 3.0, 8.0]);
        assert!(s.genuine_above);
        assert!(s.separability > 0.5 && s.separability < 1.0);
    }

    #[test]
    fn equal_means_score_zero() {
        let s = midpoint_split(&[0.0, 0.0], &[0.0]);
        assert_eq!(s.separability, 0.0);
        assert_eq!(s.threshold, 0.0);
    }
}
