//! Fault-tolerant combination of replicate values
//!
//! Independent replicates multiply: the joint likelihood is the product of
//! per-replicate likelihoods, or the sum of their logs. Missing (NaN)
//! replicates are replaced by the mean of the present ones; only when every
//! replicate is missing does the combination fail.

use crate::config::CombineSpace;
use indexmap::IndexMap;

/// Outcome of combining one round of replicate values
#[derive(Debug, Clone, PartialEq)]
pub struct Combined {
    /// Combined score, NaN when unsuccessful
    pub value: f64,
    /// False only when every replicate was NaN
    pub successful: bool,
    /// Mean of the non-NaN values, used for substitution
    pub fallback: f64,
    /// Replicates whose NaN was replaced by `fallback`
    pub substituted: Vec<String>,
}

/// Mean of the non-NaN values (NaN if there are none)
#[must_use]
pub fn fallback_mean<'a>(values: impl IntoIterator<Item = &'a f64>) -> f64 {
    let (sum, count) = values
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Combine per-replicate values
///
/// `log_space` states the space the values are expressed in; `space` the
/// space to combine in. NaN substitution happens in the values' own space,
/// before conversion.
///
/// A NaN replicate is replaced by the mean of the present values and still
/// counts towards the combination, so `{-3.2, NaN}` in log space sums to
/// `-6.4` rather than `-3.2`. Only when every value is NaN does the
/// combination fail.
#[must_use]
pub fn combine(values: &IndexMap<String, f64>, log_space: bool, space: CombineSpace) -> Combined {
    let fallback = fallback_mean(values.values());
    let substituted: Vec<String> = values
        .iter()
        .filter(|(_, v)| v.is_nan())
        .map(|(name, _)| name.clone())
        .collect();

    if !substituted.is_empty() {
        if fallback.is_nan() {
            tracing::warn!("All {} replicates returned NaN", values.len());
            return Combined {
                value: f64::NAN,
                successful: false,
                fallback,
                substituted: Vec::new(),
            };
        }
        for name in &substituted {
            tracing::warn!(
                "Replicate {} returned NaN, substituting mean {} of the others",
                name,
                fallback
            );
        }
    }

    let present = values
        .values()
        .map(|v| if v.is_nan() { fallback } else { *v });
    let value = match (space, log_space) {
        (CombineSpace::Log, true) => present.sum(),
        (CombineSpace::Log, false) => present.map(f64::ln).sum(),
        (CombineSpace::Linear, true) => present.map(f64::exp).product(),
        (CombineSpace::Linear, false) => present.product(),
    };

    Combined {
        value,
        successful: true,
        fallback,
        substituted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, f64)]) -> IndexMap<String, f64> {
        pairs.iter().map(|(n, v)| (n.to_string(), *v)).collect()
    }

    #[test]
    fn log_values_sum() {
        let combined = combine(&values(&[("A", -1.5), ("B", -2.0)]), true, CombineSpace::Log);
        assert!(combined.successful);
        assert_eq!(combined.value, -3.5);
        assert!(combined.substituted.is_empty());
    }

    #[test]
    fn linear_values_multiply() {
        let combined = combine(&values(&[("A", 0.5), ("B", 0.25)]), false, CombineSpace::Linear);
        assert_eq!(combined.value, 0.125);
    }

    #[test]
    fn nan_replaced_by_mean() {
        let combined = combine(&values(&[("A", -3.2), ("B", f64::NAN)]), true, CombineSpace::Log);
        assert!(combined.successful);
        assert_eq!(combined.fallback, -3.2);
        assert_eq!(combined.substituted, vec!["B".to_string()]);
        assert!((combined.value - -6.4).abs() < 1e-12);
    }

    #[test]
    fn all_nan_fails() {
        let combined = combine(
            &values(&[("A", f64::NAN), ("B", f64::NAN)]),
            true,
            CombineSpace::Log,
        );
        assert!(!combined.successful);
        assert!(combined.value.is_nan());
    }

    #[test]
    fn converts_between_spaces() {
        let log = combine(&values(&[("A", 0.5_f64.ln())]), true, CombineSpace::Linear);
        assert!((log.value - 0.5).abs() < 1e-12);
        let linear = combine(&values(&[("A", 0.5)]), false, CombineSpace::Log);
        assert!((linear.value - 0.5_f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn fallback_mean_ignores_nan() {
        assert_eq!(fallback_mean(&[1.0, f64::NAN, 3.0]), 2.0);
        assert!(fallback_mean(&[f64::NAN]).is_nan());
        assert!(fallback_mean(&[]).is_nan());
    }
}
