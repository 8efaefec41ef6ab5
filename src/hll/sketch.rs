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

//! The heap-backed HyperLogLog sketch.
//!
//! This module owns the mode state machine: a sketch starts as a LIST,
//! becomes a SET at the ninth distinct coupon, and becomes a dense HLL
//! array when the coupon count reaches 3K/4. Promotion replaces the payload
//! variant; it never goes backward except through [`HllSketch::reset`].

use std::hash::Hash;

use crate::common::NumStdDev;
use crate::common::canonical_double;
use crate::error::Error;
use crate::hll::CurMode;
use crate::hll::HllType;
use crate::hll::array4::Hll4Array;
use crate::hll::array6::Hll6Array;
use crate::hll::array8::Hll8Array;
use crate::hll::aux::lg_aux_arr_ints;
use crate::hll::check_lg_config_k;
use crate::hll::coupon;
use crate::hll::estimator;
use crate::hll::list::CouponList;
use crate::hll::list::ListUpdate;
use crate::hll::mode::Mode;
use crate::hll::preamble::*;
use crate::hll::set::CouponSet;
use crate::hll::set::SetUpdate;

/// A HyperLogLog sketch on the heap.
///
/// See the [hll module level documentation](crate::hll) for more.
#[derive(Debug, Clone, PartialEq)]
pub struct HllSketch {
    lg_config_k: u8,
    mode: Mode,
}

impl HllSketch {
    /// Create a new HLL sketch.
    ///
    /// # Arguments
    ///
    /// * `lg_config_k` - Log2 of the number of registers (K). Must be in
    ///   [4, 21].
    ///   - lg_k=4: 16 registers, ~26% relative error
    ///   - lg_k=12: 4096 registers, ~1.6% relative error (common choice)
    ///   - lg_k=21: 2M registers, ~0.4% relative error
    /// * `hll_type` - Target HLL array encoding (Hll4, Hll6, or Hll8)
    ///
    /// # Errors
    ///
    /// A [`Config`](crate::ErrorKind::Config) error if `lg_config_k` is out
    /// of range.
    pub fn new(lg_config_k: u8, hll_type: HllType) -> Result<Self, Error> {
        check_lg_config_k(lg_config_k)?;
        Ok(Self {
            lg_config_k,
            mode: Mode::List {
                list: CouponList::default(),
                hll_type,
            },
        })
    }

    /// Construct a sketch directly from a payload variant. Used internally
    /// by union operations and heapify.
    pub(super) fn from_mode(lg_config_k: u8, mode: Mode) -> Self {
        Self { lg_config_k, mode }
    }

    pub(super) fn mode(&self) -> &Mode {
        &self.mode
    }

    pub(super) fn mode_mut(&mut self) -> &mut Mode {
        &mut self.mode
    }

    /// The configured lg_config_k.
    pub fn lg_config_k(&self) -> u8 {
        self.lg_config_k
    }

    /// The target HLL encoding this sketch promotes into.
    pub fn target_type(&self) -> HllType {
        match &self.mode {
            Mode::List { hll_type, .. } => *hll_type,
            Mode::Set { hll_type, .. } => *hll_type,
            Mode::Hll4(_) => HllType::Hll4,
            Mode::Hll6(_) => HllType::Hll6,
            Mode::Hll8(_) => HllType::Hll8,
        }
    }

    /// The current storage mode.
    pub fn cur_mode(&self) -> CurMode {
        match &self.mode {
            Mode::List { .. } => CurMode::List,
            Mode::Set { .. } => CurMode::Set,
            Mode::Hll4(_) | Mode::Hll6(_) | Mode::Hll8(_) => CurMode::Hll,
        }
    }

    /// Whether no values have been inserted.
    pub fn is_empty(&self) -> bool {
        match &self.mode {
            Mode::List { list, .. } => list.is_empty(),
            Mode::Set { set, .. } => set.is_empty(),
            Mode::Hll4(arr) => arr.is_empty(),
            Mode::Hll6(arr) => arr.is_empty(),
            Mode::Hll8(arr) => arr.is_empty(),
        }
    }

    /// Whether this sketch saw out-of-order state (a merge or a heapified
    /// out-of-order image), in which case estimates come from the
    /// composite estimator rather than HIP.
    pub fn out_of_order(&self) -> bool {
        match &self.mode {
            Mode::List { .. } | Mode::Set { .. } => false,
            Mode::Hll4(arr) => arr.estimator().is_out_of_order(),
            Mode::Hll6(arr) => arr.estimator().is_out_of_order(),
            Mode::Hll8(arr) => arr.estimator().is_out_of_order(),
        }
    }

    /// Update the sketch with a value.
    ///
    /// Accepts anything hashable: byte slices, strings, and primitive
    /// integers all feed the same 128-bit hash through their `Hash`
    /// implementations. For floating-point values use
    /// [`HllSketch::update_f64`], which canonicalizes -0.0 and NaN first.
    pub fn update<T: Hash>(&mut self, value: T) {
        self.update_coupon(coupon(value));
    }

    /// Update with a double, canonicalized so that 0.0 and -0.0 (and every
    /// NaN bit pattern) count as one distinct item.
    pub fn update_f64(&mut self, value: f64) {
        self.update(canonical_double(value));
    }

    /// Update with a raw coupon, maintaining mode transitions and
    /// estimator state.
    pub(crate) fn update_coupon(&mut self, coupon: u32) {
        match &mut self.mode {
            Mode::List { list, hll_type } => match list.update(coupon) {
                ListUpdate::Added | ListUpdate::Duplicate => {}
                ListUpdate::Full => {
                    let hll_type = *hll_type;
                    let mut set = CouponSet::default();
                    for &existing in list.coupons() {
                        set.update(existing, self.lg_config_k);
                    }
                    // The ninth distinct coupon lands in the new set; the
                    // promotion threshold (at least 12) cannot trigger yet.
                    set.update(coupon, self.lg_config_k);
                    self.mode = Mode::Set { set, hll_type };
                }
            },
            Mode::Set { set, hll_type } => {
                if set.update(coupon, self.lg_config_k) == SetUpdate::Promote {
                    let hll_type = *hll_type;
                    let coupons: Vec<u32> = set.iter_coupons().collect();
                    self.mode = coupons_to_hll(self.lg_config_k, hll_type, &coupons);
                }
            }
            Mode::Hll4(arr) => arr.update(coupon),
            Mode::Hll6(arr) => arr.update(coupon),
            Mode::Hll8(arr) => arr.update(coupon),
        }
    }

    /// The current cardinality estimate: exact in the coupon modes, HIP in
    /// HLL mode (composite when out-of-order).
    pub fn estimate(&self) -> f64 {
        match &self.mode {
            Mode::List { list, .. } => list.count() as f64,
            Mode::Set { set, .. } => set.count() as f64,
            Mode::Hll4(arr) => arr.estimate(),
            Mode::Hll6(arr) => arr.estimate(),
            Mode::Hll8(arr) => arr.estimate(),
        }
    }

    /// The composite estimate, independent of update order.
    pub fn composite_estimate(&self) -> f64 {
        match &self.mode {
            Mode::List { list, .. } => list.count() as f64,
            Mode::Set { set, .. } => set.count() as f64,
            Mode::Hll4(arr) => arr.composite_estimate(),
            Mode::Hll6(arr) => arr.composite_estimate(),
            Mode::Hll8(arr) => arr.composite_estimate(),
        }
    }

    /// Upper confidence bound at the requested number of standard
    /// deviations.
    pub fn upper_bound(&self, num_std_dev: NumStdDev) -> f64 {
        match &self.mode {
            Mode::List { list, .. } => estimator::coupon_upper_bound(list.count(), num_std_dev),
            Mode::Set { set, .. } => estimator::coupon_upper_bound(set.count(), num_std_dev),
            Mode::Hll4(arr) => arr.upper_bound(num_std_dev),
            Mode::Hll6(arr) => arr.upper_bound(num_std_dev),
            Mode::Hll8(arr) => arr.upper_bound(num_std_dev),
        }
    }

    /// Lower confidence bound at the requested number of standard
    /// deviations.
    pub fn lower_bound(&self, num_std_dev: NumStdDev) -> f64 {
        match &self.mode {
            Mode::List { list, .. } => estimator::coupon_lower_bound(list.count(), num_std_dev),
            Mode::Set { set, .. } => estimator::coupon_lower_bound(set.count(), num_std_dev),
            Mode::Hll4(arr) => arr.lower_bound(num_std_dev),
            Mode::Hll6(arr) => arr.lower_bound(num_std_dev),
            Mode::Hll8(arr) => arr.lower_bound(num_std_dev),
        }
    }

    /// Return the sketch to an empty LIST with the same configuration.
    pub fn reset(&mut self) {
        self.mode = Mode::List {
            list: CouponList::default(),
            hll_type: self.target_type(),
        };
    }

    /// A deep copy of this sketch.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// A deep copy with the requested target encoding. In HLL mode the
    /// register values and estimator scalars carry over verbatim, so the
    /// composite estimate is preserved exactly.
    pub fn copy_as(&self, hll_type: HllType) -> Self {
        if hll_type == self.target_type() {
            return self.clone();
        }
        let mode = match &self.mode {
            Mode::List { list, .. } => Mode::List {
                list: list.clone(),
                hll_type,
            },
            Mode::Set { set, .. } => Mode::Set {
                set: set.clone(),
                hll_type,
            },
            hll_mode => convert_hll_mode(hll_mode, self.lg_config_k, hll_type),
        };
        Self::from_mode(self.lg_config_k, mode)
    }

    /// Serialize into the compact, read-only form: minimal size, valid
    /// entries only.
    pub fn to_compact_bytes(&self) -> Vec<u8> {
        self.serialize(true)
    }

    /// Serialize into the updatable form: the in-memory layout that
    /// [`DirectHllSketch::writable_wrap`](crate::DirectHllSketch::writable_wrap)
    /// can re-wrap for further mutation.
    pub fn to_updatable_bytes(&self) -> Vec<u8> {
        self.serialize(false)
    }

    fn serialize(&self, compact: bool) -> Vec<u8> {
        match &self.mode {
            Mode::List { list, hll_type } => list.serialize(self.lg_config_k, *hll_type, compact),
            Mode::Set { set, hll_type } => set.serialize(self.lg_config_k, *hll_type, compact),
            Mode::Hll4(arr) => arr.serialize(compact),
            Mode::Hll6(arr) => arr.serialize(compact),
            Mode::Hll8(arr) => arr.serialize(compact),
        }
    }

    /// Size of the compact serialization of the current state.
    pub fn compact_serialization_bytes(&self) -> usize {
        match &self.mode {
            Mode::List { list, .. } => LIST_INT_ARR_START + list.count() * COUPON_SIZE_BYTES,
            Mode::Set { set, .. } => SET_INT_ARR_START + set.count() * COUPON_SIZE_BYTES,
            Mode::Hll4(arr) => {
                let aux_count = arr.aux().map_or(0, |aux| aux.count() as usize);
                HLL_PREAMBLE_SIZE
                    + hll4_arr_bytes(self.lg_config_k)
                    + aux_count * COUPON_SIZE_BYTES
            }
            Mode::Hll6(_) => HLL_PREAMBLE_SIZE + hll6_arr_bytes(self.lg_config_k),
            Mode::Hll8(_) => HLL_PREAMBLE_SIZE + hll8_arr_bytes(self.lg_config_k),
        }
    }

    /// Size of the updatable serialization of the current state.
    pub fn updatable_serialization_bytes(&self) -> usize {
        match &self.mode {
            Mode::List { .. } => LIST_INT_ARR_START + crate::hll::LIST_SIZE * COUPON_SIZE_BYTES,
            Mode::Set { set, .. } => SET_INT_ARR_START + set.table().len() * COUPON_SIZE_BYTES,
            Mode::Hll4(arr) => {
                let aux_slots = arr.aux().map_or(0, |aux| aux.entries().len());
                HLL_PREAMBLE_SIZE
                    + hll4_arr_bytes(self.lg_config_k)
                    + aux_slots * COUPON_SIZE_BYTES
            }
            Mode::Hll6(_) => HLL_PREAMBLE_SIZE + hll6_arr_bytes(self.lg_config_k),
            Mode::Hll8(_) => HLL_PREAMBLE_SIZE + hll8_arr_bytes(self.lg_config_k),
        }
    }

    /// The buffer capacity a direct sketch of this configuration needs:
    /// the maximum over the image sizes of every stage the sketch can
    /// reach. The SET stage dominates, since its table may grow to K
    /// four-byte slots while holding 3K/4 coupons.
    pub fn max_updatable_serialization_bytes(
        lg_config_k: u8,
        hll_type: HllType,
    ) -> Result<usize, Error> {
        check_lg_config_k(lg_config_k)?;
        let k = 1usize << lg_config_k;

        let list_max = LIST_INT_ARR_START + crate::hll::LIST_SIZE * COUPON_SIZE_BYTES;
        let set_max = SET_INT_ARR_START + k * COUPON_SIZE_BYTES;
        let hll_max = HLL_PREAMBLE_SIZE
            + hll_arr_bytes(lg_config_k, hll_type)
            + if hll_type == HllType::Hll4 {
                COUPON_SIZE_BYTES << lg_aux_arr_ints(lg_config_k)
            } else {
                0
            };

        Ok(list_max.max(set_max).max(hll_max))
    }

    /// Rebuild a sketch from a serialized image, compact or updatable.
    ///
    /// # Errors
    ///
    /// A [`Format`](crate::ErrorKind::Format) error when the image is
    /// corrupt: wrong family or serial version, invalid mode or type
    /// codes, or a buffer shorter than the declared image.
    pub fn heapify(bytes: &[u8]) -> Result<Self, Error> {
        let pre = Preamble::decode(bytes)?;
        let mode = match pre.cur_mode {
            CurMode::List => Mode::List {
                list: CouponList::deserialize(bytes, &pre)?,
                hll_type: pre.hll_type,
            },
            CurMode::Set => Mode::Set {
                set: CouponSet::deserialize(bytes, &pre)?,
                hll_type: pre.hll_type,
            },
            CurMode::Hll => match pre.hll_type {
                HllType::Hll4 => Mode::Hll4(Hll4Array::deserialize(bytes, &pre)?),
                HllType::Hll6 => Mode::Hll6(Hll6Array::deserialize(bytes, &pre)?),
                HllType::Hll8 => Mode::Hll8(Hll8Array::deserialize(bytes, &pre)?),
            },
        };
        Ok(Self {
            lg_config_k: pre.lg_config_k,
            mode,
        })
    }
}

/// Build a dense array from exact coupons: fresh registers, every coupon
/// replayed, and the HIP accumulator pinned to the exact coupon count so
/// the estimate stays continuous across the promotion.
pub(super) fn coupons_to_hll(lg_config_k: u8, hll_type: HllType, coupons: &[u32]) -> Mode {
    match hll_type {
        HllType::Hll4 => {
            let mut arr = Hll4Array::new(lg_config_k);
            for &coupon in coupons {
                arr.update(coupon);
            }
            arr.set_hip_accum(coupons.len() as f64);
            Mode::Hll4(arr)
        }
        HllType::Hll6 => {
            let mut arr = Hll6Array::new(lg_config_k);
            for &coupon in coupons {
                arr.update(coupon);
            }
            arr.set_hip_accum(coupons.len() as f64);
            Mode::Hll6(arr)
        }
        HllType::Hll8 => {
            let mut arr = Hll8Array::new(lg_config_k);
            for &coupon in coupons {
                arr.update(coupon);
            }
            arr.set_hip_accum(coupons.len() as f64);
            Mode::Hll8(arr)
        }
    }
}

/// Convert an HLL-mode payload to another encoding by copying register
/// values and estimator scalars verbatim.
fn convert_hll_mode(mode: &Mode, lg_config_k: u8, target: HllType) -> Mode {
    let (pairs, estimator) = match mode {
        Mode::Hll4(arr) => (arr.pairs_all(), arr.estimator().clone()),
        Mode::Hll6(arr) => (arr.pairs_all(), arr.estimator().clone()),
        Mode::Hll8(arr) => (arr.pairs_all(), arr.estimator().clone()),
        Mode::List { .. } | Mode::Set { .. } => {
            unreachable!("convert_hll_mode called with a coupon mode")
        }
    };

    match target {
        HllType::Hll4 => {
            let mut arr = Hll4Array::from_register_values(lg_config_k, pairs);
            *arr.estimator_mut() = estimator;
            Mode::Hll4(arr)
        }
        HllType::Hll6 => {
            let mut arr = Hll6Array::new(lg_config_k);
            let mut num_zeros = 0u32;
            for (slot, value) in pairs {
                if value == 0 {
                    num_zeros += 1;
                } else {
                    arr.set_register(slot, value);
                }
            }
            arr.set_num_zeros(num_zeros);
            *arr.estimator_mut() = estimator;
            Mode::Hll6(arr)
        }
        HllType::Hll8 => {
            let mut arr = Hll8Array::new(lg_config_k);
            let mut num_zeros = 0u32;
            for (slot, value) in pairs {
                if value == 0 {
                    num_zeros += 1;
                } else {
                    arr.set_register(slot as usize, value);
                }
            }
            arr.set_num_zeros(num_zeros);
            *arr.estimator_mut() = estimator;
            Mode::Hll8(arr)
        }
    }
}
