use listing_photos::photo_intake::{
    AccountTier, CapacityPolicy, CompressedImage, ImageError, ImageId, ImageItem, ImageOrigin,
    ImageSet, PendingImage, PreviewCodec,
};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Insert,
    Remove(usize),
    SetPrimary(usize),
    Move(usize, usize),
    SetTier(bool),
}

fn op_strategy(with_tier_changes: bool) -> BoxedStrategy<Op> {
    let base = prop_oneof![
        4 => Just(Op::Insert),
        2 => any::<usize>().prop_map(Op::Remove),
        2 => any::<usize>().prop_map(Op::SetPrimary),
        1 => (any::<usize>(), 0usize..8).prop_map(|(from, to)| Op::Move(from, to)),
    ];

    if with_tier_changes {
        prop_oneof![5 => base, 1 => any::<bool>().prop_map(Op::SetTier)].boxed()
    } else {
        base.boxed()
    }
}

fn policy_strategy() -> impl Strategy<Value = CapacityPolicy> {
    (1usize..4, 0usize..4).prop_flat_map(|(base, extra)| {
        prop_oneof![
            Just(CapacityPolicy::Tier {
                base_limit: base,
                elevated_limit: base + extra,
            }),
            Just(CapacityPolicy::LegacyCount {
                base_limit: base,
                elevated_limit: base + extra,
            }),
        ]
    })
}

fn item(id: u64) -> ImageItem {
    let mut bytes = vec![0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a];
    bytes.push(id as u8);
    let preview = PreviewCodec::DataUri.encode(&bytes).expect("preview");
    PendingImage::new(ImageId::new(id), format!("{id}.png"), ImageOrigin::Local).complete(
        CompressedImage {
            original_len: bytes.len(),
            bytes,
            mime: "image/png",
            width: 1,
            height: 1,
        },
        preview,
    )
}

fn pick(set: &ImageSet, raw: usize) -> ImageId {
    let ids = set.ids();
    if ids.is_empty() {
        ImageId::new(u64::MAX)
    } else {
        ids[raw % ids.len()]
    }
}

fn primary_is_valid(set: &ImageSet) -> bool {
    match set.primary_id() {
        Some(id) => set.get(id).is_some(),
        None => set.is_empty(),
    }
}

proptest! {
    #[test]
    fn capacity_and_primary_hold_for_any_sequence(
        policy in policy_strategy(),
        elevated in any::<bool>(),
        ops in prop::collection::vec(op_strategy(false), 0..60),
    ) {
        let tier = if elevated { AccountTier::Elevated } else { AccountTier::Base };
        let mut set = ImageSet::new(policy, tier);
        let mut next_id = 1u64;

        for op in ops {
            match op {
                Op::Insert => {
                    let before = set.len();
                    let result = set.insert(item(next_id));
                    next_id += 1;
                    match result {
                        Ok(()) => prop_assert_eq!(set.len(), before + 1),
                        Err(ImageError::CapacityExceeded { available, .. }) => {
                            prop_assert_eq!(available, 0);
                            prop_assert_eq!(set.len(), before);
                        }
                        Err(other) => prop_assert!(false, "unexpected error {:?}", other),
                    }
                }
                Op::Remove(raw) => {
                    let id = pick(&set, raw);
                    let was_primary = set.primary_id() == Some(id);
                    if set.remove(id).is_ok() && was_primary {
                        prop_assert_eq!(set.primary_id(), set.ids().first().copied());
                    }
                }
                Op::SetPrimary(raw) => {
                    let id = pick(&set, raw);
                    let order = set.ids();
                    match set.set_primary(id) {
                        Ok(()) => prop_assert_eq!(set.primary_id(), Some(id)),
                        Err(err) => prop_assert_eq!(err, ImageError::UnknownItem(id)),
                    }
                    prop_assert_eq!(set.ids(), order);
                }
                Op::Move(raw, to) => {
                    let id = pick(&set, raw);
                    let primary = set.primary_id();
                    if set.move_item(id, to).is_ok() {
                        prop_assert_eq!(set.primary_id(), primary);
                    }
                }
                Op::SetTier(_) => unreachable!(),
            }

            prop_assert!(set.len() <= set.policy().max(set.len(), set.tier()));
            prop_assert!(primary_is_valid(&set));
            prop_assert!(set.invariants_hold());
        }
    }

    #[test]
    fn inserts_never_exceed_capacity_across_tier_changes(
        policy in policy_strategy(),
        ops in prop::collection::vec(op_strategy(true), 0..60),
    ) {
        let mut set = ImageSet::new(policy, AccountTier::Base);
        let mut next_id = 1u64;

        for op in ops {
            match op {
                Op::Insert => {
                    let before = set.len();
                    if set.insert(item(next_id)).is_ok() {
                        prop_assert!(before < set.policy().max(before, set.tier()));
                        prop_assert!(set.len() <= set.policy().max(set.len(), set.tier()));
                    } else {
                        prop_assert_eq!(set.len(), before);
                    }
                    next_id += 1;
                }
                Op::Remove(raw) => {
                    let id = pick(&set, raw);
                    let _ = set.remove(id);
                }
                Op::SetPrimary(raw) => {
                    let id = pick(&set, raw);
                    let _ = set.set_primary(id);
                }
                Op::Move(raw, to) => {
                    let id = pick(&set, raw);
                    let _ = set.move_item(id, to);
                }
                Op::SetTier(elevated) => {
                    let before = set.ids();
                    set.set_tier(if elevated { AccountTier::Elevated } else { AccountTier::Base });
                    // 降级不移除任何图片
                    prop_assert_eq!(set.ids(), before);
                }
            }

            prop_assert!(primary_is_valid(&set));
        }
    }

    #[test]
    fn status_is_consistent_with_policy(
        policy in policy_strategy(),
        count in 0usize..10,
        elevated in any::<bool>(),
    ) {
        let tier = if elevated { AccountTier::Elevated } else { AccountTier::Base };
        let status = policy.status(count, tier);

        prop_assert_eq!(status.count, count);
        prop_assert_eq!(status.max, policy.max(count, tier));
        prop_assert_eq!(status.available, status.max.saturating_sub(count));
        prop_assert_eq!(status.show_upsell_hint, policy.should_show_upsell_hint(count, tier));
    }
}
