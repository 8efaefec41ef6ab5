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

//! HLL_6 encoding: 6 bits per register, packed across byte boundaries.
//!
//! A register read fetches a 16-bit little-endian window at byte
//! `bit_offset / 8` and shifts by `bit_offset % 8`; a write does
//! read-modify-write on the same window so the surrounding bits of the two
//! affected bytes are preserved. The register area carries one guard byte
//! so the window of the last slot stays in bounds.

use crate::common::NumStdDev;
use crate::error::Error;
use crate::hll::HllType;
use crate::hll::estimator::HipEstimator;
use crate::hll::get_addr26;
use crate::hll::get_value;
use crate::hll::pairs::Pairs;
use crate::hll::preamble::*;

pub(crate) const VAL_MASK_6: u16 = 0x3F;

/// Read the 6-bit register at `slot` from a packed byte area.
#[inline]
pub(crate) fn get_six_bit(bytes: &[u8], slot: u32) -> u8 {
    let bit_offset = slot as usize * 6;
    let byte_idx = bit_offset >> 3;
    let shift = bit_offset & 7;
    let window = u16::from_le_bytes([bytes[byte_idx], bytes[byte_idx + 1]]);
    ((window >> shift) & VAL_MASK_6) as u8
}

/// Write the 6-bit register at `slot` into a packed byte area.
#[inline]
pub(crate) fn put_six_bit(bytes: &mut [u8], slot: u32, value: u8) {
    debug_assert!(value <= 63);
    let bit_offset = slot as usize * 6;
    let byte_idx = bit_offset >> 3;
    let shift = bit_offset & 7;
    let mut window = u16::from_le_bytes([bytes[byte_idx], bytes[byte_idx + 1]]);
    window &= !(VAL_MASK_6 << shift);
    window |= ((value as u16) & VAL_MASK_6) << shift;
    let out = window.to_le_bytes();
    bytes[byte_idx] = out[0];
    bytes[byte_idx + 1] = out[1];
}

/// Dense register array, 6 bits per slot.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Hll6Array {
    lg_config_k: u8,
    packed: Box<[u8]>,
    num_zeros: u32,
    estimator: HipEstimator,
}

impl Hll6Array {
    pub fn new(lg_config_k: u8) -> Self {
        let k = 1u32 << lg_config_k;
        Self {
            lg_config_k,
            packed: vec![0u8; hll6_arr_bytes(lg_config_k)].into_boxed_slice(),
            num_zeros: k,
            estimator: HipEstimator::new(lg_config_k),
        }
    }

    #[inline]
    pub fn get(&self, slot: u32) -> u8 {
        get_six_bit(&self.packed, slot)
    }

    /// Write a register directly, bypassing the estimator. Callers must
    /// restore the estimator scalars and zero count themselves.
    pub fn set_register(&mut self, slot: u32, value: u8) {
        put_six_bit(&mut self.packed, slot, value);
    }

    pub fn update(&mut self, coupon: u32) {
        let mask = (1 << self.lg_config_k) - 1;
        let slot = get_addr26(coupon) & mask;
        let new_value = get_value(coupon);

        let old_value = self.get(slot);
        if new_value > old_value {
            self.estimator.update(self.lg_config_k, old_value, new_value);
            put_six_bit(&mut self.packed, slot, new_value);
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

    pub fn pairs_valid(&self) -> Pairs<'_> {
        Pairs::valid_dense6(&self.packed, self.num_registers())
    }

    pub fn pairs_all(&self) -> Pairs<'_> {
        Pairs::all_dense6(&self.packed, self.num_registers())
    }

    pub fn serialize(&self, compact: bool) -> Vec<u8> {
        let arr_bytes = hll6_arr_bytes(self.lg_config_k);
        let mut bytes = vec![0u8; HLL_PREAMBLE_SIZE + arr_bytes];

        super::array8::write_hll_header(
            &mut bytes,
            self.lg_config_k,
            HllType::Hll6,
            compact,
            self.is_empty(),
            self.estimator.is_out_of_order(),
            0,
            0,
            &self.estimator,
            self.num_zeros,
            0,
        );
        bytes[HLL_BYTE_ARR_START..].copy_from_slice(&self.packed);
        bytes
    }

    pub fn deserialize(bytes: &[u8], pre: &Preamble) -> Result<Self, Error> {
        let arr_bytes = hll6_arr_bytes(pre.lg_config_k);
        let mut packed = vec![0u8; arr_bytes].into_boxed_slice();
        packed.copy_from_slice(&bytes[HLL_BYTE_ARR_START..HLL_BYTE_ARR_START + arr_bytes]);

        let k = 1u32 << pre.lg_config_k;
        let num_zeros = read_u32_le(bytes, CUR_MIN_COUNT_INT);
        if num_zeros > k {
            return Err(Error::format(format!(
                "HLL_6 image declares {num_zeros} zero registers, K is {k}"
            )));
        }

        Ok(Self {
            lg_config_k: pre.lg_config_k,
            packed,
            num_zeros,
            estimator: super::array8::read_estimator(bytes, pre),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hll::coupon;
    use crate::hll::pack_coupon;

    #[test]
    fn test_six_bit_packing() {
        let mut bytes = vec![0u8; hll6_arr_bytes(4)];

        put_six_bit(&mut bytes, 0, 0);
        put_six_bit(&mut bytes, 1, 1);
        put_six_bit(&mut bytes, 2, 31);
        put_six_bit(&mut bytes, 3, 63);

        assert_eq!(get_six_bit(&bytes, 0), 0);
        assert_eq!(get_six_bit(&bytes, 1), 1);
        assert_eq!(get_six_bit(&bytes, 2), 31);
        assert_eq!(get_six_bit(&bytes, 3), 63);

        // No cross-slot interference.
        for slot in 0..16u32 {
            put_six_bit(&mut bytes, slot, (slot % 64) as u8);
        }
        for slot in 0..16u32 {
            assert_eq!(get_six_bit(&bytes, slot), (slot % 64) as u8);
        }
    }

    #[test]
    fn test_boundary_crossing_writes() {
        let mut bytes = vec![0u8; hll6_arr_bytes(8)];

        // Slot 1 starts at bit 6 and spans bytes 0 and 1.
        put_six_bit(&mut bytes, 1, 0b111111);
        assert_eq!(get_six_bit(&bytes, 1), 63);

        put_six_bit(&mut bytes, 2, 0b101010);
        assert_eq!(get_six_bit(&bytes, 2), 42);

        // Slot 3 spans bytes 2 and 3.
        put_six_bit(&mut bytes, 3, 0b110011);
        assert_eq!(get_six_bit(&bytes, 3), 51);

        assert_eq!(get_six_bit(&bytes, 1), 63);
        assert_eq!(get_six_bit(&bytes, 2), 42);

        // Surrounding registers stay zero.
        assert_eq!(get_six_bit(&bytes, 0), 0);
        assert_eq!(get_six_bit(&bytes, 4), 0);
    }

    #[test]
    fn test_last_slot_window_in_bounds() {
        // The guard byte makes the 16-bit window of the final slot legal.
        let lg_k = 4u8;
        let k = 1u32 << lg_k;
        let mut bytes = vec![0u8; hll6_arr_bytes(lg_k)];
        put_six_bit(&mut bytes, k - 1, 47);
        assert_eq!(get_six_bit(&bytes, k - 1), 47);
    }

    #[test]
    fn test_update_keeps_register_max() {
        let mut arr = Hll6Array::new(4);

        arr.update(pack_coupon(7, 9));
        assert_eq!(arr.get(7), 9);
        arr.update(pack_coupon(7, 4));
        assert_eq!(arr.get(7), 9);
        arr.update(pack_coupon(7, 33));
        assert_eq!(arr.get(7), 33);
    }

    #[test]
    fn test_hip_estimate_tracks_inserts() {
        let mut arr = Hll6Array::new(10);
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
    fn test_serialize_round_trip() {
        let mut arr = Hll6Array::new(6);
        for i in 0..500u32 {
            arr.update(coupon(i));
        }

        let bytes = arr.serialize(false);
        assert_eq!(bytes.len(), HLL_PREAMBLE_SIZE + hll6_arr_bytes(6));

        let pre = Preamble::decode(&bytes).unwrap();
        let restored = Hll6Array::deserialize(&bytes, &pre).unwrap();
        assert_eq!(restored, arr);
        assert_eq!(restored.serialize(false), bytes);
    }
}
