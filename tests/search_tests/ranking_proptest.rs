//! Property-based tests for cosine distance and ranking order.

use pagelens::{
    ranker::{cosine_distance, rank, SimilarityError, MAX_DISSIMILAR},
    Card, FeatureVector,
};
use proptest::prelude::*;

fn vector(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-100.0f32..100.0, dim)
}

fn non_zero_vector(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    vector(dim).prop_filter("needs magnitude", |v| v.iter().any(|x| x.abs() > 1e-3))
}

fn pair() -> impl Strategy<Value = (Vec<f32>, Vec<f32>)> {
    (1usize..64).prop_flat_map(|dim| (vector(dim), vector(dim)))
}

proptest! {
    #[test]
    fn test_distance_in_range((a, b) in pair()) {
        let d = cosine_distance(&a, &b).unwrap();
        prop_assert!((0.0..=2.0).contains(&d));
    }

    #[test]
    fn test_distance_is_symmetric((a, b) in pair()) {
        let ab = cosine_distance(&a, &b).unwrap();
        let ba = cosine_distance(&b, &a).unwrap();
        prop_assert_eq!(ab, ba);
    }

    #[test]
    fn test_self_distance_is_zero(a in (1usize..64).prop_flat_map(non_zero_vector)) {
        prop_assert_eq!(cosine_distance(&a, &a).unwrap(), 0.0);
    }

    #[test]
    fn test_zero_vector_is_max_dissimilar(a in (1usize..64).prop_flat_map(vector)) {
        let zero = vec![0.0; a.len()];
        prop_assert_eq!(cosine_distance(&a, &zero).unwrap(), MAX_DISSIMILAR);
    }

    #[test]
    fn test_mismatched_lengths_always_fail(
        a in (1usize..32).prop_flat_map(vector),
        extra in 1usize..8,
    ) {
        let b = vec![1.0; a.len() + extra];
        prop_assert_eq!(
            cosine_distance(&a, &b),
            Err(SimilarityError::DimensionMismatch { left: a.len(), right: a.len() + extra })
        );
    }

    #[test]
    fn test_rank_is_sorted_and_complete(
        (query, vectors) in (1usize..16).prop_flat_map(|dim| {
            (vector(dim), prop::collection::vec(vector(dim), 0..20))
        })
    ) {
        let query = FeatureVector::new(query);
        let items: Vec<_> = vectors
            .into_iter()
            .enumerate()
            .map(|(i, v)| (Card::new(format!("{i}.png"), i.to_string()), FeatureVector::new(v)))
            .collect();
        let count = items.len();

        let ranked = rank(&query, items).unwrap();
        prop_assert_eq!(ranked.len(), count);
        for pair in ranked.windows(2) {
            prop_assert!(pair[0].distance <= pair[1].distance);
            // equal distances keep input order
            if pair[0].distance == pair[1].distance {
                let left: usize = pair[0].card.title.parse().unwrap();
                let right: usize = pair[1].card.title.parse().unwrap();
                prop_assert!(left < right);
            }
        }
    }
}
