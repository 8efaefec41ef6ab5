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

//! Direct (caller-owned buffer) sketches through the public API: image
//! equivalence with heap sketches, wrap semantics, and the error surface.

use cardsketch::CurMode;
use cardsketch::DirectHllSketch;
use cardsketch::ErrorKind;
use cardsketch::HllSketch;
use cardsketch::HllType;
use cardsketch::HllUnion;
use cardsketch::NumStdDev;
use googletest::assert_that;
use googletest::prelude::near;

fn direct_buffer(lg_k: u8, hll_type: HllType) -> Vec<u8> {
    vec![0u8; HllSketch::max_updatable_serialization_bytes(lg_k, hll_type).unwrap()]
}

#[test]
fn test_direct_and_heap_serialize_identically() {
    for hll_type in [HllType::Hll4, HllType::Hll6, HllType::Hll8] {
        let mut region = direct_buffer(10, hll_type);
        let mut direct = DirectHllSketch::new(10, hll_type, &mut region).unwrap();
        let mut heap = HllSketch::new(10, hll_type).unwrap();

        for i in 0..20_000u64 {
            direct.update(i).unwrap();
            heap.update(i);
        }

        assert_eq!(direct.estimate(), heap.estimate());
        assert_eq!(
            direct.to_updatable_bytes().unwrap(),
            heap.to_updatable_bytes(),
            "{hll_type:?} updatable image"
        );
        assert_eq!(
            direct.to_compact_bytes().unwrap(),
            heap.to_compact_bytes(),
            "{hll_type:?} compact image"
        );
    }
}

#[test]
fn test_direct_walks_the_same_modes() {
    let mut region = direct_buffer(4, HllType::Hll8);
    let mut sketch = DirectHllSketch::new(4, HllType::Hll8, &mut region).unwrap();

    assert_eq!(sketch.cur_mode(), CurMode::List);
    assert!(sketch.is_empty());

    sketch.update("one").unwrap();
    assert_eq!(sketch.estimate(), 1.0);

    for i in 0..9u64 {
        sketch.update(i).unwrap();
    }
    // 10 distinct items: past the 8-coupon list.
    assert_eq!(sketch.cur_mode(), CurMode::Set);
    assert_eq!(sketch.estimate(), 10.0);

    for i in 9..12u64 {
        sketch.update(i).unwrap();
    }
    assert_eq!(sketch.cur_mode(), CurMode::Hll);
}

#[test]
fn test_buffer_too_small_is_capacity_error() {
    let mut region = vec![0u8; 64];
    let err = DirectHllSketch::new(12, HllType::Hll8, &mut region).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Capacity);

    // One byte short of the documented requirement still fails.
    let needed = HllSketch::max_updatable_serialization_bytes(12, HllType::Hll8).unwrap();
    let mut region = vec![0u8; needed - 1];
    let err = DirectHllSketch::new(12, HllType::Hll8, &mut region).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Capacity);

    let mut region = vec![0u8; needed];
    assert!(DirectHllSketch::new(12, HllType::Hll8, &mut region).is_ok());
}

#[test]
fn test_read_only_wrap_estimates_without_copying() {
    let mut heap = HllSketch::new(11, HllType::Hll4).unwrap();
    for i in 0..30_000u64 {
        heap.update(i);
    }

    for image in [heap.to_compact_bytes(), heap.to_updatable_bytes()] {
        let wrap = DirectHllSketch::wrap(&image).unwrap();
        assert!(wrap.is_read_only());
        assert_eq!(wrap.lg_config_k(), 11);
        assert_eq!(wrap.target_type(), HllType::Hll4);
        assert_eq!(wrap.estimate(), heap.estimate());
        assert_eq!(
            wrap.composite_estimate(),
            heap.composite_estimate()
        );
        assert_eq!(
            wrap.lower_bound(NumStdDev::Three),
            heap.lower_bound(NumStdDev::Three)
        );
    }
}

#[test]
fn test_read_only_wrap_rejects_every_mutation() {
    let mut heap = HllSketch::new(10, HllType::Hll8).unwrap();
    heap.update(7u64);
    let image = heap.to_updatable_bytes();

    let mut wrap = DirectHllSketch::wrap(&image).unwrap();
    assert_eq!(wrap.update("x").unwrap_err().kind(), ErrorKind::Mode);
    assert_eq!(wrap.update_f64(1.5).unwrap_err().kind(), ErrorKind::Mode);
    assert_eq!(wrap.reset().unwrap_err().kind(), ErrorKind::Mode);

    // The image is untouched after the refused mutations.
    assert_eq!(wrap.estimate(), 1.0);
    assert_eq!(wrap.to_updatable_bytes().unwrap(), image);
}

#[test]
fn test_writable_wrap_continues_where_heap_left_off() {
    let mut heap = HllSketch::new(9, HllType::Hll6).unwrap();
    for i in 0..400u64 {
        heap.update(i);
    }

    let image = heap.to_updatable_bytes();
    let mut region = direct_buffer(9, HllType::Hll6);
    region[..image.len()].copy_from_slice(&image);

    let mut direct = DirectHllSketch::writable_wrap(&mut region).unwrap();
    for i in 400..2_000u64 {
        direct.update(i).unwrap();
        heap.update(i);
    }

    assert_eq!(direct.estimate(), heap.estimate());
    assert_eq!(direct.to_updatable_bytes().unwrap(), heap.to_updatable_bytes());
}

#[test]
fn test_writable_wrap_refuses_compact_images() {
    let mut heap = HllSketch::new(9, HllType::Hll8).unwrap();
    for i in 0..1_000u64 {
        heap.update(i);
    }

    let mut image = heap.to_compact_bytes();
    let needed = HllSketch::max_updatable_serialization_bytes(9, HllType::Hll8).unwrap();
    image.resize(needed, 0);
    assert_eq!(
        DirectHllSketch::writable_wrap(&mut image).unwrap_err().kind(),
        ErrorKind::Mode
    );
}

#[test]
fn test_wrap_rejects_corrupt_images() {
    let mut heap = HllSketch::new(9, HllType::Hll8).unwrap();
    heap.update(1u64);
    let good = heap.to_updatable_bytes();

    let mut bad = good.clone();
    bad[2] = 3; // family
    assert_eq!(
        DirectHllSketch::wrap(&bad).unwrap_err().kind(),
        ErrorKind::Format
    );

    assert_eq!(
        DirectHllSketch::wrap(&good[..6]).unwrap_err().kind(),
        ErrorKind::Format
    );
}

#[test]
fn test_direct_to_heap_and_back() {
    let mut region = direct_buffer(8, HllType::Hll4);
    let mut direct = DirectHllSketch::new(8, HllType::Hll4, &mut region).unwrap();
    for i in 0..10_000u64 {
        direct.update(i).unwrap();
    }

    let heap = direct.to_heap().unwrap();
    assert_eq!(heap.estimate(), direct.estimate());
    assert_eq!(heap.to_updatable_bytes(), direct.to_updatable_bytes().unwrap());

    // The lifted sketch merges like any other.
    let mut union = HllUnion::new(8).unwrap();
    union.merge(&heap);
    assert_that!(union.estimate(), near(10_000.0, 2_000.0));
}

#[test]
fn test_direct_estimate_accuracy() {
    let mut region = direct_buffer(12, HllType::Hll8);
    let mut direct = DirectHllSketch::new(12, HllType::Hll8, &mut region).unwrap();
    for i in 0..100_000u64 {
        direct.update(i).unwrap();
    }
    assert_that!(direct.estimate(), near(100_000.0, 4_000.0));
}
