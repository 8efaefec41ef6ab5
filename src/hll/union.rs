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

//! Merge engine combining sketches via register-max semantics.
//!
//! The union owns a destination sketch (the "gadget") kept in the HLL_8
//! encoding once any operand reaches HLL mode. Coupon-mode operands replay
//! their coupons into the gadget; HLL-mode operands merge register-by-
//! register, taking the max. Operands of different precision are folded
//! onto the smaller K by masking address bits, so the result carries the
//! smallest lg_config_k seen (bounded above by `lg_max_k`).
//!
//! HIP state does not survive a register merge: the gadget's KxQ registers
//! and zero count are rebuilt from the merged registers and the sketch is
//! marked out-of-order, leaving estimation to the composite estimator.

use std::hash::Hash;

use crate::common::NumStdDev;
use crate::error::Error;
use crate::hll::HllSketch;
use crate::hll::HllType;
use crate::hll::array8::Hll8Array;
use crate::hll::check_lg_config_k;
use crate::hll::mode::Mode;
use crate::hll::pack_coupon;
use crate::hll::pairs::Pairs;

/// An HLL union for combining multiple sketches.
///
/// The union accumulates every operand into an internal sketch and hands
/// out the result in any target encoding. Operands may differ in
/// `lg_config_k`, mode, and encoding.
///
/// See the [hll module level documentation](crate::hll) for more.
#[derive(Debug, Clone)]
pub struct HllUnion {
    /// Upper bound on the result precision; operands with larger
    /// lg_config_k are downsampled.
    lg_max_k: u8,
    gadget: HllSketch,
}

impl HllUnion {
    /// Create a new union.
    ///
    /// # Arguments
    ///
    /// * `lg_max_k` - Maximum log2 of the number of registers the result
    ///   may use. Must be in [4, 21]. Operands with a larger `lg_config_k`
    ///   are downsampled; operands with a smaller one shrink the result to
    ///   their precision.
    ///
    /// # Errors
    ///
    /// A [`Config`](crate::ErrorKind::Config) error if `lg_max_k` is out of
    /// range.
    pub fn new(lg_max_k: u8) -> Result<Self, Error> {
        check_lg_config_k(lg_max_k)?;
        Ok(Self {
            lg_max_k,
            gadget: HllSketch::new(lg_max_k, HllType::Hll8)?,
        })
    }

    /// Update the union directly with a value, as if it were a sketch of
    /// its own.
    pub fn update<T: Hash>(&mut self, value: T) {
        self.gadget.update(value);
    }

    /// Merge a sketch into the union.
    pub fn merge(&mut self, sketch: &HllSketch) {
        if sketch.is_empty() {
            return;
        }

        let src_lg_k = sketch.lg_config_k();
        match sketch.mode() {
            Mode::List { list, .. } => {
                self.merge_coupon_pairs(Pairs::valid_coupons(list.coupons()));
            }
            Mode::Set { set, .. } => {
                self.merge_coupon_pairs(Pairs::valid_coupons(set.table()));
            }
            array_mode => self.merge_array(array_mode, src_lg_k),
        }
    }

    /// Replay exact coupons; the gadget handles its own promotions. Coupon
    /// pairs keep all 26 address bits, so nothing is lost when the gadget
    /// is still in a coupon mode.
    fn merge_coupon_pairs(&mut self, pairs: Pairs<'_>) {
        for (addr, value) in pairs {
            self.gadget.update_coupon(pack_coupon(addr, value));
        }
    }

    fn merge_array(&mut self, src_mode: &Mode, src_lg_k: u8) {
        // Lift a coupon-mode gadget into HLL_8 at the merge precision
        // before register merging.
        if !matches!(self.gadget.mode(), Mode::Hll8(_)) {
            let lg_k = src_lg_k.min(self.lg_max_k);
            let mut arr = Hll8Array::new(lg_k);
            match self.gadget.mode() {
                Mode::List { list, .. } => {
                    for &coupon in list.coupons() {
                        arr.update(coupon);
                    }
                }
                Mode::Set { set, .. } => {
                    for coupon in set.iter_coupons() {
                        arr.update(coupon);
                    }
                }
                _ => unreachable!("gadget in HLL mode is always HLL_8"),
            }
            arr.set_hip_accum(self.gadget.estimate());
            self.gadget = HllSketch::from_mode(lg_k, Mode::Hll8(arr));
        }

        self.merge_array_into_hll8_gadget(src_mode, src_lg_k);
    }

    fn merge_array_into_hll8_gadget(&mut self, src_mode: &Mode, src_lg_k: u8) {
        let dst_lg_k = self.gadget.lg_config_k();
        let src_pairs = array_pairs(src_mode);

        if src_lg_k < dst_lg_k {
            // The operand has fewer registers: shrink the gadget by folding
            // its own registers down, then merge the operand at equal size.
            let mut shrunk = Hll8Array::new(src_lg_k);
            match self.gadget.mode() {
                Mode::Hll8(old) => shrunk.merge_pairs_downsample(old.pairs_valid()),
                _ => unreachable!("gadget in HLL mode is always HLL_8"),
            }
            shrunk.merge_pairs_same_lgk(src_pairs);
            self.gadget = HllSketch::from_mode(src_lg_k, Mode::Hll8(shrunk));
        } else {
            match self.gadget.mode_mut() {
                Mode::Hll8(dst) => {
                    if src_lg_k == dst_lg_k {
                        dst.merge_pairs_same_lgk(src_pairs);
                    } else {
                        dst.merge_pairs_downsample(src_pairs);
                    }
                }
                _ => unreachable!("gadget in HLL mode is always HLL_8"),
            }
        }
    }

    /// The union result in the requested encoding.
    pub fn get_result(&self, hll_type: HllType) -> HllSketch {
        self.gadget.copy_as(hll_type)
    }

    /// The lg_config_k the result currently carries.
    pub fn lg_config_k(&self) -> u8 {
        self.gadget.lg_config_k()
    }

    /// The maximum lg_config_k this union allows.
    pub fn lg_max_k(&self) -> u8 {
        self.lg_max_k
    }

    /// Whether nothing has been merged or updated yet.
    pub fn is_empty(&self) -> bool {
        self.gadget.is_empty()
    }

    /// Clear the union for reuse at its configured maximum precision.
    pub fn reset(&mut self) {
        // A fresh gadget at lg_max_k cannot fail once the union exists.
        self.gadget = HllSketch::from_mode(
            self.lg_max_k,
            Mode::List {
                list: Default::default(),
                hll_type: HllType::Hll8,
            },
        );
    }

    /// The current cardinality estimate of the union.
    pub fn estimate(&self) -> f64 {
        self.gadget.estimate()
    }

    /// The composite estimate of the union.
    pub fn composite_estimate(&self) -> f64 {
        self.gadget.composite_estimate()
    }

    /// Upper confidence bound of the union estimate.
    pub fn upper_bound(&self, num_std_dev: NumStdDev) -> f64 {
        self.gadget.upper_bound(num_std_dev)
    }

    /// Lower confidence bound of the union estimate.
    pub fn lower_bound(&self, num_std_dev: NumStdDev) -> f64 {
        self.gadget.lower_bound(num_std_dev)
    }
}

fn array_pairs(mode: &Mode) -> Pairs<'_> {
    match mode {
        Mode::Hll4(arr) => arr.pairs_valid(),
        Mode::Hll6(arr) => arr.pairs_valid(),
        Mode::Hll8(arr) => arr.pairs_valid(),
        Mode::List { .. } | Mode::Set { .. } => {
            unreachable!("array_pairs called with a coupon mode")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hll::CurMode;

    fn filled(lg_k: u8, hll_type: HllType, range: std::ops::Range<u64>) -> HllSketch {
        let mut sketch = HllSketch::new(lg_k, hll_type).unwrap();
        for i in range {
            sketch.update(i);
        }
        sketch
    }

    #[test]
    fn test_register_max_same_lgk() {
        let a = filled(10, HllType::Hll8, 0..5_000);
        let b = filled(10, HllType::Hll8, 2_500..7_500);

        let mut union = HllUnion::new(10).unwrap();
        union.merge(&a);
        union.merge(&b);

        let result = union.get_result(HllType::Hll8);
        let (arr_a, arr_b, arr_u) = match (a.mode(), b.mode(), result.mode()) {
            (Mode::Hll8(x), Mode::Hll8(y), Mode::Hll8(z)) => (x, y, z),
            _ => panic!("expected HLL_8 mode"),
        };
        for slot in 0..1024u32 {
            assert_eq!(
                arr_u.get(slot),
                arr_a.get(slot).max(arr_b.get(slot)),
                "register-max violated at slot {slot}"
            );
        }
    }

    #[test]
    fn test_downsample_to_smaller_operand() {
        // lg_k 12 HLL_4 merged with lg_k 10 HLL_8: the result folds down
        // to lg_k 10.
        let a = filled(12, HllType::Hll4, 0..5_000);
        let b = filled(10, HllType::Hll8, 4_000..9_000);

        let mut union = HllUnion::new(12).unwrap();
        union.merge(&a);
        assert_eq!(union.lg_config_k(), 12);
        union.merge(&b);
        assert_eq!(union.lg_config_k(), 10);

        // Register-max holds against the folded operands.
        let result = union.get_result(HllType::Hll8);
        let arr_u = match result.mode() {
            Mode::Hll8(arr) => arr,
            _ => panic!("expected HLL_8 mode"),
        };
        let arr_b = match b.mode() {
            Mode::Hll8(arr) => arr,
            _ => panic!("expected HLL_8 mode"),
        };
        for slot in 0..1024u32 {
            let mut expected = arr_b.get(slot);
            // Four lg_k=12 slots fold onto each lg_k=10 slot.
            let a4 = match a.mode() {
                Mode::Hll4(arr) => arr,
                _ => panic!("expected HLL_4 mode"),
            };
            for fold in 0..4u32 {
                expected = expected.max(a4.get(slot + (fold << 10)));
            }
            assert_eq!(arr_u.get(slot), expected, "slot {slot}");
        }
    }

    #[test]
    fn test_merge_marks_out_of_order() {
        let a = filled(10, HllType::Hll8, 0..2_000);
        let mut union = HllUnion::new(10).unwrap();
        union.merge(&a);
        let result = union.get_result(HllType::Hll8);
        assert!(result.out_of_order());
        assert_eq!(result.estimate(), result.composite_estimate());
    }

    #[test]
    fn test_coupon_operands_replay_into_gadget() {
        let a = filled(10, HllType::Hll4, 0..6); // LIST
        let b = filled(10, HllType::Hll6, 100..140); // SET

        let mut union = HllUnion::new(10).unwrap();
        union.merge(&a);
        assert_eq!(union.gadget.cur_mode(), CurMode::List);
        union.merge(&b);
        assert_eq!(union.gadget.cur_mode(), CurMode::Set);

        assert_eq!(union.estimate(), 46.0);
    }

    #[test]
    fn test_reset_allows_reuse() {
        let mut union = HllUnion::new(9).unwrap();
        union.merge(&filled(9, HllType::Hll8, 0..3_000));
        assert!(!union.is_empty());

        union.reset();
        assert!(union.is_empty());
        assert_eq!(union.lg_config_k(), 9);
        assert_eq!(union.estimate(), 0.0);
    }
}
