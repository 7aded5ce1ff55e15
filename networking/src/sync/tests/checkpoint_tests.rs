use crate::sync::CheckpointRegistry;
use containers::{Bytes32, Checkpoint, CheckpointError, Height};
use pretty_assertions::assert_eq;
use rstest::rstest;

fn registry(heights: &[u32]) -> CheckpointRegistry {
    let checkpoints = heights
        .iter()
        .map(|h| Checkpoint {
            height: Height(*h),
            hash: Bytes32([*h as u8; 32]),
        })
        .collect();
    CheckpointRegistry::new(checkpoints).unwrap()
}

#[rstest]
#[case(0, Some(100))]
#[case(50, Some(100))]
#[case(100, Some(200))]
#[case(150, Some(200))]
#[case(250, Some(300))]
#[case(300, None)]
#[case(1000, None)]
fn test_find_next_header_checkpoint(#[case] local: u32, #[case] expected: Option<u32>) {
    let registry = registry(&[100, 200, 300]);
    let next = registry.find_next_header_checkpoint(Height(local));
    assert_eq!(next.map(|c| c.height.0), expected);
    assert_eq!(registry.next_checkpoint(), next);
}

#[test]
fn test_empty_registry_never_bounds_sync() {
    let registry = CheckpointRegistry::default();
    assert!(registry.is_empty());
    assert_eq!(registry.find_next_header_checkpoint(Height(0)), None);
}

#[test]
fn test_lookup_by_height() {
    let registry = registry(&[100, 200]);
    assert_eq!(registry.at_height(Height(200)).map(|c| c.hash), Some(Bytes32([200; 32])));
    assert_eq!(registry.at_height(Height(150)), None);
}

#[test]
fn test_heights_must_increase() {
    let checkpoints = vec![
        Checkpoint {
            height: Height(200),
            hash: Bytes32([1; 32]),
        },
        Checkpoint {
            height: Height(100),
            hash: Bytes32([2; 32]),
        },
    ];
    assert_eq!(
        CheckpointRegistry::new(checkpoints).unwrap_err(),
        CheckpointError::NotIncreasing {
            previous: Height(200),
            height: Height(100),
        }
    );
}

#[test]
fn test_registry_from_config_strings() {
    let hash = "11".repeat(32);
    let registry = CheckpointRegistry::from_strings(&[format!("10:{hash}"), format!("20:{hash}")]).unwrap();
    assert_eq!(registry.all().len(), 2);
    assert!(CheckpointRegistry::from_strings(&["10"]).is_err());
}
