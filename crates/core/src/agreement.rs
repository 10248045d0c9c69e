//! Inter-rater agreement per label column of an [`AnnotationMatrix`].
//!
//! Every annotator contributes at most one rating per `(item, path)` cell:
//! the first of their annotations in the bucket's canonical order. Items
//! nobody rated for a column are left out of that column's statistics.
//!
//! Chance-corrected measures (Cohen's, Fleiss' and Randolph's kappa,
//! nominal Krippendorff's alpha) need categorical codes, so they are only
//! computed for columns holding `bool` and integer values. Multi-choice
//! columns report the mean Jaccard overlap of each pair instead.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::annotation::{AnnotationValue, LabelPath};
use crate::resolution::AnnotationMatrix;
use crate::types::{ItemId, UserId};

/// Agreement of two annotators on the items both rated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairAgreement {
    pub base: UserId,
    pub target: UserId,
    pub num_overlap: usize,
    pub num_agree: usize,
    pub num_disagree: usize,
    /// Share of agreeing items, in percent.
    pub perc_agree: f64,
    pub cohen: Option<f64>,
    pub multi_overlap: Option<f64>,
}

/// Agreement statistics for one label path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelAgreement {
    pub path: LabelPath,
    pub num_items: usize,
    pub num_annotators: usize,
    pub fleiss: Option<f64>,
    pub randolph: Option<f64>,
    pub krippendorff: Option<f64>,
    pub pairs: Vec<PairAgreement>,
}

/// Agreement for every column of the matrix, in path order.
pub fn agreement(matrix: &AnnotationMatrix) -> Vec<LabelAgreement> {
    matrix
        .labels()
        .iter()
        .map(|path| label_agreement(matrix, path))
        .collect()
}

/// Agreement for one column of the matrix.
pub fn label_agreement(matrix: &AnnotationMatrix, path: &LabelPath) -> LabelAgreement {
    let rows = ratings(matrix, path);
    let users: BTreeSet<&UserId> = rows.values().flat_map(|r| r.keys().copied()).collect();

    let codes: Option<Vec<BTreeMap<&UserId, i64>>> = rows
        .values()
        .map(|row| {
            row.iter()
                .map(|(user, value)| nominal_code(value).map(|c| (*user, c)))
                .collect()
        })
        .collect();

    let (fleiss, randolph, krippendorff) = match &codes {
        Some(codes) if !codes.is_empty() => (
            fleiss_kappa(codes, KappaBaseline::Marginal),
            fleiss_kappa(codes, KappaBaseline::Uniform),
            krippendorff_nominal(codes),
        ),
        _ => (None, None, None),
    };

    let users: Vec<&UserId> = users.into_iter().collect();
    let mut pairs = Vec::new();
    for (i, base) in users.iter().enumerate() {
        for target in &users[i + 1..] {
            if let Some(pair) = pair_agreement(&rows, base, target) {
                pairs.push(pair);
            }
        }
    }

    tracing::debug!(
        path = %path,
        items = rows.len(),
        annotators = users.len(),
        pairs = pairs.len(),
        "Computed label agreement"
    );

    LabelAgreement {
        path: path.clone(),
        num_items: rows.len(),
        num_annotators: users.len(),
        fleiss,
        randolph,
        krippendorff,
        pairs,
    }
}

/// One rating per annotator for every item that has the column.
fn ratings<'m>(
    matrix: &'m AnnotationMatrix,
    path: &LabelPath,
) -> BTreeMap<&'m ItemId, BTreeMap<&'m UserId, &'m AnnotationValue>> {
    let mut rows = BTreeMap::new();
    for (item_id, cell_path, bucket) in matrix.cells() {
        if cell_path != path {
            continue;
        }
        let mut row = BTreeMap::new();
        for annotation in bucket {
            row.entry(&annotation.user_id).or_insert(&annotation.value);
        }
        rows.insert(item_id, row);
    }
    rows
}

fn nominal_code(value: &AnnotationValue) -> Option<i64> {
    match value {
        AnnotationValue::Bool(b) => Some(i64::from(*b)),
        AnnotationValue::Int(i) => Some(*i),
        _ => None,
    }
}

fn pair_agreement(
    rows: &BTreeMap<&ItemId, BTreeMap<&UserId, &AnnotationValue>>,
    base: &UserId,
    target: &UserId,
) -> Option<PairAgreement> {
    let overlap: Vec<(&AnnotationValue, &AnnotationValue)> = rows
        .values()
        .filter_map(|row| Some((*row.get(base)?, *row.get(target)?)))
        .collect();
    if overlap.is_empty() {
        return None;
    }

    let num_agree = overlap.iter().filter(|(b, t)| same_rating(b, t)).count();
    let codes: Option<Vec<(i64, i64)>> = overlap
        .iter()
        .map(|(b, t)| Some((nominal_code(b)?, nominal_code(t)?)))
        .collect();
    let sets: Option<Vec<(BTreeSet<i64>, BTreeSet<i64>)>> = overlap
        .iter()
        .map(|(b, t)| match (b, t) {
            (AnnotationValue::Multi(b), AnnotationValue::Multi(t)) => {
                Some((b.iter().copied().collect(), t.iter().copied().collect()))
            }
            _ => None,
        })
        .collect();

    Some(PairAgreement {
        base: base.clone(),
        target: target.clone(),
        num_overlap: overlap.len(),
        num_agree,
        num_disagree: overlap.len() - num_agree,
        perc_agree: num_agree as f64 / overlap.len() as f64 * 100.0,
        cohen: codes.as_deref().and_then(cohen_kappa),
        multi_overlap: sets.as_deref().map(mean_jaccard),
    })
}

fn same_rating(a: &AnnotationValue, b: &AnnotationValue) -> bool {
    match (a, b) {
        (AnnotationValue::Multi(a), AnnotationValue::Multi(b)) => {
            a.iter().collect::<BTreeSet<_>>() == b.iter().collect::<BTreeSet<_>>()
        }
        _ => a == b,
    }
}

/// Cohen's kappa for two raters. `None` when chance agreement is total.
pub fn cohen_kappa(pairs: &[(i64, i64)]) -> Option<f64> {
    if pairs.is_empty() {
        return None;
    }
    let n = pairs.len() as f64;
    let mut base: BTreeMap<i64, f64> = BTreeMap::new();
    let mut target: BTreeMap<i64, f64> = BTreeMap::new();
    let mut agree = 0.0;
    for &(b, t) in pairs {
        *base.entry(b).or_default() += 1.0;
        *target.entry(t).or_default() += 1.0;
        if b == t {
            agree += 1.0;
        }
    }

    let observed = agree / n;
    let expected: f64 = base
        .iter()
        .map(|(code, count)| count / n * target.get(code).copied().unwrap_or_default() / n)
        .sum();
    if expected >= 1.0 {
        return None;
    }
    finite((observed - expected) / (1.0 - expected))
}

/// Chance baseline of a multi-rater kappa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KappaBaseline {
    /// Fleiss: marginal category frequencies.
    Marginal,
    /// Randolph: uniform over the observed categories.
    Uniform,
}

/// Fleiss' or Randolph's kappa over items rated by any number of raters.
///
/// `None` when no item has more than one rating.
pub fn fleiss_kappa<K>(rows: &[BTreeMap<K, i64>], baseline: KappaBaseline) -> Option<f64> {
    let categories: BTreeSet<i64> = rows.iter().flat_map(|r| r.values().copied()).collect();
    if rows.is_empty() || categories.is_empty() {
        return None;
    }

    let table: Vec<BTreeMap<i64, f64>> = rows
        .iter()
        .map(|row| {
            let mut counts = BTreeMap::new();
            for code in row.values() {
                *counts.entry(*code).or_insert(0.0) += 1.0;
            }
            counts
        })
        .collect();

    let raters = rows.iter().map(BTreeMap::len).max().unwrap_or_default() as f64;
    if raters <= 1.0 {
        return None;
    }
    let total: f64 = table.iter().flat_map(|r| r.values()).sum();

    let p_mean = table
        .iter()
        .map(|row| (row.values().map(|c| c * c).sum::<f64>() - raters) / (raters * (raters - 1.0)))
        .sum::<f64>()
        / table.len() as f64;

    let p_expected = match baseline {
        KappaBaseline::Marginal => categories
            .iter()
            .map(|code| {
                let share = table.iter().filter_map(|r| r.get(code)).sum::<f64>() / total;
                share * share
            })
            .sum(),
        KappaBaseline::Uniform => 1.0 / categories.len() as f64,
    };
    if p_expected >= 1.0 {
        return Some(1.0);
    }
    finite((p_mean - p_expected) / (1.0 - p_expected))
}

/// Krippendorff's alpha with the nominal distance.
///
/// `None` when no item has two ratings to pair.
pub fn krippendorff_nominal<K>(rows: &[BTreeMap<K, i64>]) -> Option<f64> {
    let mut coincidence: BTreeMap<(i64, i64), f64> = BTreeMap::new();
    for row in rows {
        let values: Vec<i64> = row.values().copied().collect();
        if values.len() < 2 {
            continue;
        }
        let weight = 1.0 / (values.len() - 1) as f64;
        for (i, a) in values.iter().enumerate() {
            for (j, b) in values.iter().enumerate() {
                if i != j {
                    *coincidence.entry((*a, *b)).or_default() += weight;
                }
            }
        }
    }
    if coincidence.is_empty() {
        return None;
    }

    let mut marginals: BTreeMap<i64, f64> = BTreeMap::new();
    for (&(a, _), weight) in &coincidence {
        *marginals.entry(a).or_default() += weight;
    }
    let total: f64 = marginals.values().sum();

    let observed: f64 = coincidence
        .iter()
        .filter(|((a, b), _)| a != b)
        .map(|(_, weight)| weight)
        .sum();
    let expected: f64 = marginals
        .iter()
        .flat_map(|(a, na)| {
            marginals
                .iter()
                .filter(move |(b, _)| *b != a)
                .map(move |(_, nb)| na * nb)
        })
        .sum();
    if expected == 0.0 {
        return Some(1.0);
    }
    finite(1.0 - (total - 1.0) * observed / expected)
}

fn mean_jaccard(sets: &[(BTreeSet<i64>, BTreeSet<i64>)]) -> f64 {
    let sum: f64 = sets
        .iter()
        .map(|(a, b)| {
            let union = a.union(b).count();
            if union == 0 {
                1.0
            } else {
                a.intersection(b).count() as f64 / union as f64
            }
        })
        .sum();
    sum / sets.len() as f64
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::Annotation;
    use crate::resolution::MatrixOptions;
    use crate::types::new_row_id;

    fn close(actual: Option<f64>, expected: f64) {
        let actual = actual.unwrap();
        assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
    }

    fn row(codes: &[i64]) -> BTreeMap<usize, i64> {
        codes.iter().copied().enumerate().collect()
    }

    fn matrix(ratings: &[(&str, &str, AnnotationValue)]) -> AnnotationMatrix {
        let rows: Vec<Annotation> = ratings
            .iter()
            .map(|(user, item, value)| Annotation::new(new_row_id(), *user, *item, "rel", value.clone()))
            .collect();
        AnnotationMatrix::build(&rows, MatrixOptions::default())
    }

    #[test]
    fn cohen_matches_hand_computed_value() {
        close(cohen_kappa(&[(1, 1), (1, 0), (0, 0), (0, 0)]), 0.5);
        assert_eq!(cohen_kappa(&[(1, 1), (1, 1)]), None);
        assert_eq!(cohen_kappa(&[]), None);
    }

    #[test]
    fn fleiss_and_randolph_match_hand_computed_values() {
        let rows = [row(&[1, 1, 1]), row(&[0, 0, 0]), row(&[1, 1, 0])];
        close(fleiss_kappa(&rows, KappaBaseline::Marginal), 0.55);
        close(fleiss_kappa(&rows, KappaBaseline::Uniform), 5.0 / 9.0);
    }

    #[test]
    fn fleiss_needs_more_than_one_rater() {
        let rows = [row(&[1]), row(&[0])];
        assert_eq!(fleiss_kappa(&rows, KappaBaseline::Marginal), None);
        close(fleiss_kappa(&[row(&[1, 1])], KappaBaseline::Marginal), 1.0);
    }

    #[test]
    fn krippendorff_matches_hand_computed_value() {
        let rows = [row(&[1, 1, 1]), row(&[0, 0, 0]), row(&[1, 1, 0])];
        close(krippendorff_nominal(&rows), 0.6);
        close(krippendorff_nominal(&[row(&[2, 2]), row(&[2, 2])]), 1.0);
        assert_eq!(krippendorff_nominal(&[row(&[1])]), None);
    }

    #[test]
    fn label_agreement_over_matrix() {
        let m = matrix(&[
            ("a", "i1", AnnotationValue::Bool(true)),
            ("b", "i1", AnnotationValue::Bool(true)),
            ("a", "i2", AnnotationValue::Bool(true)),
            ("b", "i2", AnnotationValue::Bool(false)),
            ("a", "i3", AnnotationValue::Bool(false)),
            ("b", "i3", AnnotationValue::Bool(false)),
            ("a", "i4", AnnotationValue::Bool(false)),
            ("b", "i4", AnnotationValue::Bool(false)),
            ("c", "i4", AnnotationValue::Bool(false)),
        ]);
        let stats = agreement(&m);
        assert_eq!(stats.len(), 1);
        let rel = &stats[0];
        assert_eq!((rel.num_items, rel.num_annotators), (4, 3));
        assert!(rel.fleiss.is_some());
        assert!(rel.krippendorff.is_some());

        let ab = &rel.pairs[0];
        assert_eq!((ab.base.as_str(), ab.target.as_str()), ("a", "b"));
        assert_eq!((ab.num_overlap, ab.num_agree, ab.num_disagree), (4, 3, 1));
        close(Some(ab.perc_agree), 75.0);
        close(ab.cohen, 0.5);
        assert_eq!(ab.multi_overlap, None);
        // a/c and b/c overlap on i4 only.
        assert_eq!(rel.pairs.len(), 3);
        assert!(rel.pairs[1..].iter().all(|p| p.num_overlap == 1 && p.cohen.is_none()));
    }

    #[test]
    fn multi_columns_report_overlap_instead_of_kappa() {
        let m = matrix(&[
            ("a", "i1", AnnotationValue::Multi(vec![1, 2])),
            ("b", "i1", AnnotationValue::Multi(vec![2, 3])),
            ("a", "i2", AnnotationValue::Multi(vec![4])),
            ("b", "i2", AnnotationValue::Multi(vec![4])),
        ]);
        let rel = label_agreement(&m, &LabelPath::root("rel", 1));
        assert_eq!(rel.fleiss, None);
        assert_eq!(rel.krippendorff, None);
        let pair = &rel.pairs[0];
        assert_eq!(pair.num_agree, 1);
        assert_eq!(pair.cohen, None);
        close(pair.multi_overlap, (1.0 / 3.0 + 1.0) / 2.0);
    }
}
