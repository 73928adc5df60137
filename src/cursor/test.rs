use pretty_assertions::assert_eq;

use super::BatchSizing;

#[test]
fn positive_batch_size_and_limit() {
    let sizing = BatchSizing::new(Some(3), Some(5));
    assert_eq!(sizing.initial_batch_size(), Some(3));
    assert_eq!(sizing.get_more_batch_size(3), Some(2));
    assert!(!sizing.single_batch);
    assert!(!sizing.is_satisfied(4));
    assert!(sizing.is_satisfied(5));
}

#[test]
fn negative_batch_size_is_a_single_batch() {
    let sizing = BatchSizing::new(Some(-4), None);
    assert_eq!(sizing.initial_batch_size(), Some(4));
    assert!(sizing.single_batch);
    assert!(sizing.wire_single_batch);
}

#[test]
fn zero_batch_size_closes_after_first_batch() {
    let sizing = BatchSizing::new(Some(0), None);
    assert_eq!(sizing.initial_batch_size(), None);
    assert!(sizing.single_batch);
    assert!(!sizing.wire_single_batch);
}

#[test]
fn negative_limit_caps_a_single_batch() {
    let sizing = BatchSizing::new(None, Some(-2));
    assert_eq!(sizing.limit, Some(2));
    assert_eq!(sizing.initial_batch_size(), None);
    assert!(sizing.single_batch);
    assert!(sizing.wire_single_batch);
}

#[test]
fn zero_limit_means_no_limit() {
    let sizing = BatchSizing::new(None, Some(0));
    assert_eq!(sizing.limit, None);
    assert_eq!(sizing.get_more_batch_size(1_000), None);
    assert!(!sizing.is_satisfied(1_000));
}

#[test]
fn limit_without_batch_size_requests_the_remainder() {
    let sizing = BatchSizing::new(None, Some(10));
    assert_eq!(sizing.get_more_batch_size(7), Some(3));
}

#[test]
fn aggregate_batch_size_of_zero_is_sent() {
    let sizing = BatchSizing::from_batch_size(Some(0));
    assert_eq!(sizing.initial_batch_size(), Some(0));
    assert_eq!(sizing.get_more_batch_size(0), None);
    assert!(!sizing.single_batch);
}
