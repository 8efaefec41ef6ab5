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

//! HLL_8 encoding: one byte per register.
//!
//! The simplest dense representation and the one the merge engine uses as
//! its working form. Register values stay within 6 bits; the byte layout
//! buys update speed, not range.

use crate::common::NumStdDev;
use crate::error::Error;
use crate::hll::HllType;
use crate::hll::estimator::HipEstimator;
use crate::hll::get_addr26;
use crate::hll::get_value;
use crate::hll::pairs::Pairs;
use crate::hll::preamble::*;

const VAL_MASK_6: u8 = 0x3F;

/// Dense register array, one byte per slot.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Hll8Array {
    lg_config_k: u8,
    regs: Box<[u8]>,
    /// Count of registers still at zero; `num_at_cur_min` with a fixed
    /// `cur_min` of 0.
    num_zeros: u32,
    estimator: HipEstimator,
}

impl Hll8Array {
    pub fn new(lg_config_k: u8) -> Self {
        let k = 1u32 << lg_config_k;
        Self {
            lg_config_k,
            regs: vec![0u8; k as usize].into_boxed_slice(),
            num_zeros: k,
            estimator: HipEstimator::new(lg_config_k),
        }
    }

    #[inline]
    pub fn get(&self, slot: u32) -> u8 {
        self.regs[slot as usize]
    }

    pub fn update(&mut self, coupon: u32) {
        let mask = (1 << self.lg_config_k) - 1;
        let slot = get_addr26(coupon) & mask;
        let new_value = get_value(coupon) & VAL_MASK_6;

        let old_value = self.get(slot);
        if new_value > old_value {
            self.estimator.update(self.lg_config_k, old_value, new_value);
            self.regs[slot as usize] = new_value;
            if old_value == 0 {
                self.num_zeros -= 1;
            }
        }
    }

    pub fn estimate(&self) -> f64 {
        self.estimator.estimate(self.lg_config_k, 0, self.num_zeros)
    }

    pub fn composite_estimate(&self) -> f64 {
        self.estimator
            .composite_estimate(self.lg_config_k, 0, self.num_zeros)
    }

    pub fn upper_bound(&self, num_std_dev: NumStdDev) -> f64 {
        self.estimator
            .upper_bound(self.lg_config_k, 0, self.num_zeros, num_std_dev)
    }

    pub fn lower_bound(&self, num_std_dev: NumStdDev) -> f64 {
        self.estimator
            .lower_bound(self.lg_config_k, 0, self.num_zeros, num_std_dev)
    }

    pub fn is_empty(&self) -> bool {
        self.num_zeros == 1 << self.lg_config_k
    }

    pub fn num_registers(&self) -> usize {
        1 << self.lg_config_k
    }

    pub fn values(&self) -> &[u8] {
        &self.regs
    }

    pub fn estimator(&self) -> &HipEstimator {
        &self.estimator
    }

    pub fn estimator_mut(&mut self) -> &mut HipEstimator {
        &mut self.estimator
    }

    pub fn set_hip_accum(&mut self, value: f64) {
        self.estimator.set_hip_accum(value);
    }

    pub(crate) fn set_num_zeros(&mut self, num_zeros: u32) {
        self.num_zeros = num_zeros;
    }

    /// Write a register directly, bypassing the estimator. Callers must
    /// finish with [`Self::rebuild_from_registers`] or restore the
    /// estimator scalars themselves.
    pub fn set_register(&mut self, slot: usize, value: u8) {
        self.regs[slot] = value;
    }

    /// Recompute `num_zeros` and the KxQ registers from the register array
    /// and mark the estimator out-of-order. Required after bulk merges.
    pub fn rebuild_from_registers(&mut self) {
        self.num_zeros = self.regs.iter().filter(|&&v| v == 0).count() as u32;
        let regs = &self.regs;
        self.estimator.rebuild_from_registers(regs.iter().copied());
    }

    /// Register-max merge of valid (slot, value) pairs at the same lg_k.
    pub fn merge_pairs_same_lgk(&mut self, pairs: Pairs<'_>) {
        for (slot, value) in pairs {
            let slot = slot as usize;
            if value > self.regs[slot] {
                self.regs[slot] = value;
            }
        }
        self.rebuild_from_registers();
    }

    /// Register-max merge of valid pairs from a larger-lg_k source, folding
    /// each source slot onto `slot & (K - 1)`.
    pub fn merge_pairs_downsample(&mut self, pairs: Pairs<'_>) {
        let mask = (1usize << self.lg_config_k) - 1;
        for (slot, value) in pairs {
            let slot = slot as usize & mask;
            if value > self.regs[slot] {
                self.regs[slot] = value;
            }
        }
        self.rebuild_from_registers();
    }

    pub fn pairs_valid(&self) -> Pairs<'_> {
        Pairs::valid_dense8(&self.regs)
    }

    pub fn pairs_all(&self) -> Pairs<'_> {
        Pairs::all_dense8(&self.regs)
    }

    pub fn serialize(&self, compact: bool) -> Vec<u8> {
        let arr_bytes = hll8_arr_bytes(self.lg_config_k);
        let mut bytes = vec![0u8; HLL_PREAMBLE_SIZE + arr_bytes];

        write_hll_header(
            &mut bytes,
            self.lg_config_k,
            HllType::Hll8,
            compact,
            self.is_empty(),
            self.estimator.is_out_of_order(),
            0, // cur_min
            0, // lg_aux
            &self.estimator,
            self.num_zeros,
            0, // aux_count
        );
        bytes[HLL_BYTE_ARR_START..].copy_from_slice(&self.regs);
        bytes
    }

    pub fn deserialize(bytes: &[u8], pre: &Preamble) -> Result<Self, Error> {
        let k = 1usize << pre.lg_config_k;
        let mut regs = vec![0u8; k].into_boxed_slice();
        regs.copy_from_slice(&bytes[HLL_BYTE_ARR_START..HLL_BYTE_ARR_START + k]);

        let num_zeros = read_u32_le(bytes, CUR_MIN_COUNT_INT);
        if num_zeros > k as u32 {
            return Err(Error::format(format!(
                "HLL_8 image declares {num_zeros} zero registers, K is {k}"
            )));
        }

        Ok(Self {
            lg_config_k: pre.lg_config_k,
            regs,
            num_zeros,
            estimator: read_estimator(bytes, pre),
        })
    }
}

/// Restore the estimator scalars from an HLL image preamble.
pub(crate) fn read_estimator(bytes: &[u8], pre: &Preamble) -> HipEstimator {
    let mut estimator = HipEstimator::new(pre.lg_config_k);
    let hip = read_f64_le(bytes, HIP_ACCUM_DOUBLE);
    let kxq0 = read_f64_le(bytes, KXQ0_DOUBLE);
    let kxq1 = read_f64_le(bytes, KXQ1_DOUBLE);
    estimator.set_out_of_order(pre.out_of_order());
    estimator.set_hip_accum(hip);
    estimator.set_kxq0(kxq0);
    estimator.set_kxq1(kxq1);
    estimator
}

/// Write the 40-byte HLL preamble shared by the three encodings.
#[allow(clippy::too_many_arguments)]
pub(crate) fn write_hll_header(
    bytes: &mut [u8],
    lg_config_k: u8,
    hll_type: HllType,
    compact: bool,
    empty: bool,
    out_of_order: bool,
    cur_min: u8,
    lg_aux: u8,
    estimator: &HipEstimator,
    num_at_cur_min: u32,
    aux_count: u32,
) {
    let mut flags = 0u8;
    if compact {
        flags |= COMPACT_FLAG_MASK | READ_ONLY_FLAG_MASK;
    }
    if empty {
        flags |= EMPTY_FLAG_MASK;
    }
    if out_of_order {
        flags |= OUT_OF_ORDER_FLAG_MASK;
    }

    write_common_header(
        bytes,
        crate::hll::CurMode::Hll,
        hll_type,
        lg_config_k,
        lg_aux,
        flags,
        cur_min,
    );
    write_f64_le(bytes, HIP_ACCUM_DOUBLE, estimator.hip_accum());
    write_f64_le(bytes, KXQ0_DOUBLE, estimator.kxq0());
    write_f64_le(bytes, KXQ1_DOUBLE, estimator.kxq1());
    write_u32_le(bytes, CUR_MIN_COUNT_INT, num_at_cur_min);
    write_u32_le(bytes, AUX_COUNT_INT, aux_count);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hll::coupon;
    use crate::hll::pack_coupon;

    #[test]
    fn test_update_keeps_register_max() {
        let mut arr = Hll8Array::new(4);

        arr.update(pack_coupon(0, 5));
        assert_eq!(arr.get(0), 5);

        arr.update(pack_coupon(0, 3));
        assert_eq!(arr.get(0), 5);

        arr.update(pack_coupon(0, 42));
        assert_eq!(arr.get(0), 42);

        arr.update(pack_coupon(1, 63));
        assert_eq!(arr.get(1), 63);
    }

    #[test]
    fn test_slot_folding_discards_high_address_bits() {
        let mut arr = Hll8Array::new(4);
        // Address 16 folds onto slot 0 when K = 16.
        arr.update(pack_coupon(16, 7));
        assert_eq!(arr.get(0), 7);
    }

    #[test]
    fn test_hip_estimate_tracks_inserts() {
        let mut arr = Hll8Array::new(10);
        assert_eq!(arr.estimate(), 0.0);

        for i in 0..10_000u32 {
            arr.update(coupon(i));
        }

        let estimate = arr.estimate();
        assert!(estimate.is_finite());
        assert!(estimate > 1_000.0);
        assert!(estimate < 100_000.0);
    }

    #[test]
    fn test_merge_same_lgk_takes_max() {
        let mut dst = Hll8Array::new(4);
        let mut src = Hll8Array::new(4);

        dst.update(pack_coupon(0, 10));
        dst.update(pack_coupon(1, 20));
        src.update(pack_coupon(1, 15));
        src.update(pack_coupon(2, 35));

        dst.merge_pairs_same_lgk(src.pairs_valid());

        assert_eq!(dst.get(0), 10);
        assert_eq!(dst.get(1), 20);
        assert_eq!(dst.get(2), 35);
        assert!(dst.estimator().is_out_of_order());
        assert_eq!(dst.num_zeros, 13);
    }

    #[test]
    fn test_merge_downsample_folds_slots() {
        let mut dst = Hll8Array::new(4); // 16 slots
        let mut src = Hll8Array::new(5); // 32 slots

        dst.update(pack_coupon(0, 10));
        src.update(pack_coupon(0, 15));
        src.update(pack_coupon(16, 25)); // folds onto slot 0
        src.update(pack_coupon(17, 30)); // folds onto slot 1

        dst.merge_pairs_downsample(src.pairs_valid());

        assert_eq!(dst.get(0), 25);
        assert_eq!(dst.get(1), 30);
        assert!(dst.estimator().is_out_of_order());
    }

    #[test]
    fn test_rebuild_recomputes_zeros_and_kxq() {
        let mut arr = Hll8Array::new(4);
        arr.set_register(0, 3);
        arr.set_register(5, 40);
        arr.rebuild_from_registers();

        assert_eq!(arr.num_zeros, 14);
        let expected_kxq0 = 14.0 + 1.0 / 8.0;
        assert!((arr.estimator().kxq0() - expected_kxq0).abs() < 1e-12);
        assert!(arr.estimator().kxq1() > 0.0);
        assert!(arr.estimator().is_out_of_order());
    }

    #[test]
    fn test_serialize_round_trip() {
        let mut arr = Hll8Array::new(6);
        for i in 0..500u32 {
            arr.update(coupon(i));
        }

        let bytes = arr.serialize(false);
        assert_eq!(bytes.len(), HLL_PREAMBLE_SIZE + 64);

        let pre = Preamble::decode(&bytes).unwrap();
        let restored = Hll8Array::deserialize(&bytes, &pre).unwrap();
        assert_eq!(restored, arr);
        assert_eq!(restored.serialize(false), bytes);
    }
}
