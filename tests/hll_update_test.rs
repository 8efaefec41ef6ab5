// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

use cardsketch::CurMode;
use cardsketch::ErrorKind;
use cardsketch::HllSketch;
use cardsketch::HllType;
use cardsketch::NumStdDev;
use googletest::assert_that;
use googletest::prelude::ge;
use googletest::prelude::le;
use googletest::prelude::near;

#[test]
fn test_one_item_is_exact() {
    let mut sketch = HllSketch::new(4, HllType::Hll8).unwrap();
    assert!(sketch.is_empty());
    assert_eq!(sketch.estimate(), 0.0);

    sketch.update("only");
    assert!(!sketch.is_empty());
    assert_eq!(sketch.cur_mode(), CurMode::List);
    assert_eq!(sketch.estimate(), 1.0);
}

#[test]
fn test_nine_items_reach_set_mode() {
    let mut sketch = HllSketch::new(4, HllType::Hll8).unwrap();
    for i in 0..9u64 {
        sketch.update(i);
    }
    assert_eq!(sketch.cur_mode(), CurMode::Set);
    assert_eq!(sketch.estimate(), 9.0);
}

#[test]
fn test_thirteen_items_reach_hll_mode() {
    // The SET promotes at 3K/4 = 12 coupons with K = 16.
    let mut sketch = HllSketch::new(4, HllType::Hll8).unwrap();
    for i in 0..13u64 {
        sketch.update(i);
    }
    assert_eq!(sketch.cur_mode(), CurMode::Hll);
}

#[test]
fn test_large_cardinality_accuracy() {
    let mut sketch = HllSketch::new(12, HllType::Hll8).unwrap();
    for i in 0..100_000u64 {
        sketch.update(i);
    }

    // lg_k=12 gives ~1.3% HIP relative error; allow three sigma.
    assert_that!(sketch.estimate(), near(100_000.0, 4_000.0));
    assert_that!(sketch.lower_bound(NumStdDev::Three), le(100_000.0));
    assert_that!(sketch.upper_bound(NumStdDev::Three), ge(100_000.0));
}

#[test]
fn test_duplicates_do_not_inflate() {
    let mut sketch = HllSketch::new(12, HllType::Hll8).unwrap();
    for _ in 0..10 {
        for i in 0..100u64 {
            sketch.update(i);
        }
    }
    assert_that!(sketch.estimate(), near(100.0, 10.0));
}

#[test]
fn test_all_types_agree() {
    let mut sketches = [
        HllSketch::new(11, HllType::Hll4).unwrap(),
        HllSketch::new(11, HllType::Hll6).unwrap(),
        HllSketch::new(11, HllType::Hll8).unwrap(),
    ];

    for i in 0..50_000u64 {
        for sketch in sketches.iter_mut() {
            sketch.update(i);
        }
    }

    // All three encodings hold the same registers and therefore produce
    // identical composite estimates and near-identical HIP estimates.
    let composite = sketches[0].composite_estimate();
    for sketch in &sketches {
        assert_that!(sketch.composite_estimate(), near(composite, 1e-6));
        assert_that!(sketch.estimate(), near(sketches[0].estimate(), 1e-6));
    }
}

#[test]
fn test_bounds_bracket_estimate_in_all_modes() {
    let mut sketch = HllSketch::new(12, HllType::Hll6).unwrap();
    let checkpoints = [5u64, 100, 5_000];
    let mut next = 0u64;

    for &checkpoint in &checkpoints {
        while next < checkpoint {
            sketch.update(next);
            next += 1;
        }
        let estimate = sketch.estimate();
        for num_std_dev in [NumStdDev::One, NumStdDev::Two, NumStdDev::Three] {
            assert_that!(sketch.lower_bound(num_std_dev), le(estimate));
            assert_that!(sketch.upper_bound(num_std_dev), ge(estimate));
        }
    }
}

#[test]
fn test_bounds_widen_with_std_dev() {
    let mut sketch = HllSketch::new(10, HllType::Hll8).unwrap();
    for i in 0..3_000u64 {
        sketch.update(i);
    }

    assert_that!(
        sketch.lower_bound(NumStdDev::Two),
        le(sketch.lower_bound(NumStdDev::One))
    );
    assert_that!(
        sketch.lower_bound(NumStdDev::Three),
        le(sketch.lower_bound(NumStdDev::Two))
    );
    assert_that!(
        sketch.upper_bound(NumStdDev::Two),
        ge(sketch.upper_bound(NumStdDev::One))
    );
    assert_that!(
        sketch.upper_bound(NumStdDev::Three),
        ge(sketch.upper_bound(NumStdDev::Two))
    );
}

#[test]
fn test_update_order_does_not_change_composite() {
    let items: Vec<u64> = (0..20_000).collect();

    let mut forward = HllSketch::new(10, HllType::Hll8).unwrap();
    for &i in &items {
        forward.update(i);
    }

    let mut backward = HllSketch::new(10, HllType::Hll8).unwrap();
    for &i in items.iter().rev() {
        backward.update(i);
    }

    // The composite estimate depends only on the final register state,
    // which is permutation invariant; HIP depends on arrival order.
    assert_eq!(forward.composite_estimate(), backward.composite_estimate());
}

#[test]
fn test_mixed_input_types() {
    let mut sketch = HllSketch::new(10, HllType::Hll8).unwrap();
    sketch.update(42i32);
    sketch.update("hello");
    sketch.update(100u64);
    sketch.update(true);
    sketch.update(vec![1, 2, 3]);
    sketch.update([5u8, 6, 7].as_slice());
    sketch.update_f64(2.5);

    assert_that!(sketch.estimate(), ge(7.0));
}

#[test]
fn test_invalid_lg_k_is_config_error() {
    let err = HllSketch::new(3, HllType::Hll8).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    let err = HllSketch::new(22, HllType::Hll4).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn test_reset_and_reuse() {
    let mut sketch = HllSketch::new(10, HllType::Hll4).unwrap();
    for i in 0..5_000u64 {
        sketch.update(i);
    }
    assert_eq!(sketch.cur_mode(), CurMode::Hll);

    sketch.reset();
    assert_eq!(sketch.cur_mode(), CurMode::List);
    assert!(sketch.is_empty());

    for i in 0..9u64 {
        sketch.update(i);
    }
    assert_eq!(sketch.cur_mode(), CurMode::Set);
    assert_eq!(sketch.estimate(), 9.0);
}

#[test]
fn test_copy_is_independent() {
    let mut sketch = HllSketch::new(10, HllType::Hll8).unwrap();
    for i in 0..1_000u64 {
        sketch.update(i);
    }

    let copy = sketch.copy();
    assert_eq!(copy, sketch);

    sketch.update(999_999u64);
    assert_ne!(copy, sketch);
}

#[test]
fn test_copy_as_preserves_state() {
    let mut sketch = HllSketch::new(10, HllType::Hll8).unwrap();
    for i in 0..30_000u64 {
        sketch.update(i);
    }

    let as4 = sketch.copy_as(HllType::Hll4);
    let as6 = sketch.copy_as(HllType::Hll6);
    assert_eq!(as4.target_type(), HllType::Hll4);
    assert_eq!(as6.target_type(), HllType::Hll6);
    assert_that!(as4.composite_estimate(), near(sketch.composite_estimate(), 1e-9));
    assert_that!(as6.composite_estimate(), near(sketch.composite_estimate(), 1e-9));
    assert_eq!(as4.estimate(), sketch.estimate());
    assert_eq!(as6.estimate(), sketch.estimate());
}
