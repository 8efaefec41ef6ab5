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

//! Direct sketches operating over a caller-owned byte region.
//!
//! A direct sketch keeps no state of its own beyond the borrowed buffer:
//! the buffer holds the updatable serialization layout at all times, and
//! every update mutates it in place, including the LIST → SET → HLL
//! promotions. A sketch built directly and a heap sketch fed the same
//! update sequence produce bit-identical images.
//!
//! The buffer must be at least
//! [`HllSketch::max_updatable_serialization_bytes`] long so every stage
//! fits; the sketch never outlives the borrow. Read-only wraps accept any
//! valid image (compact or updatable) and refuse every mutation with a
//! [`Mode`](crate::ErrorKind::Mode) error.

use std::hash::Hash;

use crate::buffer::SketchBuffer;
use crate::common::NumStdDev;
use crate::common::canonical_double;
use crate::error::Error;
use crate::hll::CurMode;
use crate::hll::HllSketch;
use crate::hll::HllType;
use crate::hll::LG_LIST_SIZE;
use crate::hll::LIST_SIZE;
use crate::hll::RESIZE_DENOMINATOR;
use crate::hll::RESIZE_NUMERATOR;
use crate::hll::array4::AUX_TOKEN;
use crate::hll::array6::VAL_MASK_6;
use crate::hll::aux::AuxFind;
use crate::hll::aux::aux_entry_slot;
use crate::hll::aux::aux_entry_value;
use crate::hll::aux::find_aux_slot;
use crate::hll::aux::lg_aux_arr_ints;
use crate::hll::aux::pack_aux_entry;
use crate::hll::check_lg_config_k;
use crate::hll::coupon;
use crate::hll::estimator;
use crate::hll::get_addr26;
use crate::hll::get_value;
use crate::hll::preamble::*;
use crate::hll::set::SetFind;
use crate::hll::set::find_coupon;
use crate::hll::set_promotion_threshold;

/// A HyperLogLog sketch living entirely inside a caller-owned byte region.
///
/// See the [module level documentation](self) for the buffer contract.
#[derive(Debug)]
pub struct DirectHllSketch<'a> {
    buf: SketchBuffer<'a>,
    lg_config_k: u8,
    hll_type: HllType,
}

impl<'a> DirectHllSketch<'a> {
    /// Initialize a fresh sketch inside `region`.
    ///
    /// # Errors
    ///
    /// [`Config`](crate::ErrorKind::Config) for an out-of-range
    /// `lg_config_k`; [`Capacity`](crate::ErrorKind::Capacity) when the
    /// region is shorter than
    /// [`HllSketch::max_updatable_serialization_bytes`].
    pub fn new(
        lg_config_k: u8,
        hll_type: HllType,
        region: &'a mut [u8],
    ) -> Result<Self, Error> {
        check_lg_config_k(lg_config_k)?;
        let min_bytes = HllSketch::max_updatable_serialization_bytes(lg_config_k, hll_type)?;
        if region.len() < min_bytes {
            return Err(Error::capacity("buffer too small for a direct sketch")
                .with_context("required", min_bytes)
                .with_context("capacity", region.len()));
        }

        let mut buf = SketchBuffer::writable(region);
        buf.clear(0, min_bytes)?;

        let mut sketch = Self {
            buf,
            lg_config_k,
            hll_type,
        };
        sketch.write_list_header()?;
        Ok(sketch)
    }

    /// Re-wrap a valid updatable image for further mutation.
    ///
    /// # Errors
    ///
    /// [`Format`](crate::ErrorKind::Format) for a corrupt image,
    /// [`Mode`](crate::ErrorKind::Mode) for a compact image (compact forms
    /// are read-only; heapify them instead), and
    /// [`Capacity`](crate::ErrorKind::Capacity) when the region cannot hold
    /// the largest stage the sketch may grow into.
    pub fn writable_wrap(region: &'a mut [u8]) -> Result<Self, Error> {
        let pre = Preamble::decode(region)?;
        if pre.compact() {
            return Err(Error::read_only(
                "compact images cannot be wrapped for mutation",
            ));
        }
        let min_bytes =
            HllSketch::max_updatable_serialization_bytes(pre.lg_config_k, pre.hll_type)?;
        if region.len() < min_bytes {
            return Err(Error::capacity("buffer too small for a writable wrap")
                .with_context("required", min_bytes)
                .with_context("capacity", region.len()));
        }
        Ok(Self {
            buf: SketchBuffer::writable(region),
            lg_config_k: pre.lg_config_k,
            hll_type: pre.hll_type,
        })
    }

    /// Wrap a valid image (compact or updatable) read-only. Estimator
    /// reads work; every mutation fails.
    pub fn wrap(region: &'a [u8]) -> Result<Self, Error> {
        let pre = Preamble::decode(region)?;
        Ok(Self {
            buf: SketchBuffer::read_only(region),
            lg_config_k: pre.lg_config_k,
            hll_type: pre.hll_type,
        })
    }

    /// The configured lg_config_k.
    pub fn lg_config_k(&self) -> u8 {
        self.lg_config_k
    }

    /// The target HLL encoding.
    pub fn target_type(&self) -> HllType {
        self.hll_type
    }

    /// Whether this wrap refuses mutation.
    pub fn is_read_only(&self) -> bool {
        self.buf.is_read_only()
    }

    /// The current storage mode, read from the image header.
    pub fn cur_mode(&self) -> CurMode {
        match CurMode::from_code(extract_cur_mode(self.buf.get_u8(MODE_BYTE))) {
            Some(mode) => mode,
            // The header was validated at construction and only this
            // sketch writes it afterwards.
            None => unreachable!("corrupt mode byte in a validated image"),
        }
    }

    /// Whether no values have been inserted.
    pub fn is_empty(&self) -> bool {
        match self.cur_mode() {
            CurMode::List => self.buf.get_u8(LIST_COUNT_BYTE) == 0,
            CurMode::Set => self.buf.get_u32(SET_COUNT_INT) == 0,
            CurMode::Hll => {
                self.buf.get_u8(HLL_CUR_MIN_BYTE) == 0
                    && self.buf.get_u32(CUR_MIN_COUNT_INT) == 1 << self.lg_config_k
            }
        }
    }

    /// Whether estimates come from the composite estimator.
    pub fn out_of_order(&self) -> bool {
        self.cur_mode() == CurMode::Hll
            && self.buf.get_u8(FLAGS_BYTE) & OUT_OF_ORDER_FLAG_MASK != 0
    }

    /// Update the sketch with a value. See
    /// [`HllSketch::update`] for the hashing contract.
    ///
    /// # Errors
    ///
    /// [`Mode`](crate::ErrorKind::Mode) on a read-only wrap;
    /// [`Capacity`](crate::ErrorKind::Capacity) in the statistically
    /// unreachable case of the HLL_4 exception table outgrowing the
    /// region.
    pub fn update<T: Hash>(&mut self, value: T) -> Result<(), Error> {
        self.update_coupon(coupon(value))
    }

    /// Update with a canonicalized double; see [`HllSketch::update_f64`].
    pub fn update_f64(&mut self, value: f64) -> Result<(), Error> {
        self.update(canonical_double(value))
    }

    pub(crate) fn update_coupon(&mut self, coupon: u32) -> Result<(), Error> {
        if self.buf.is_read_only() {
            return Err(Error::read_only("update through a read-only sketch wrap"));
        }
        match self.cur_mode() {
            CurMode::List => self.list_update(coupon),
            CurMode::Set => self.set_update(coupon),
            CurMode::Hll => self.hll_update(coupon),
        }
    }

    /// The current cardinality estimate; see [`HllSketch::estimate`].
    pub fn estimate(&self) -> f64 {
        match self.cur_mode() {
            CurMode::List => self.buf.get_u8(LIST_COUNT_BYTE) as f64,
            CurMode::Set => self.buf.get_u32(SET_COUNT_INT) as f64,
            CurMode::Hll => {
                if self.out_of_order() {
                    self.hll_composite()
                } else {
                    self.buf.get_f64(HIP_ACCUM_DOUBLE)
                }
            }
        }
    }

    /// The composite estimate, independent of update order.
    pub fn composite_estimate(&self) -> f64 {
        match self.cur_mode() {
            CurMode::List => self.buf.get_u8(LIST_COUNT_BYTE) as f64,
            CurMode::Set => self.buf.get_u32(SET_COUNT_INT) as f64,
            CurMode::Hll => self.hll_composite(),
        }
    }

    /// Upper confidence bound; see [`HllSketch::upper_bound`].
    pub fn upper_bound(&self, num_std_dev: NumStdDev) -> f64 {
        match self.cur_mode() {
            CurMode::List => {
                estimator::coupon_upper_bound(self.buf.get_u8(LIST_COUNT_BYTE) as usize, num_std_dev)
            }
            CurMode::Set => {
                estimator::coupon_upper_bound(self.buf.get_u32(SET_COUNT_INT) as usize, num_std_dev)
            }
            CurMode::Hll => {
                let rel = estimator::rel_err(
                    self.lg_config_k,
                    true,
                    self.out_of_order(),
                    num_std_dev,
                );
                self.estimate() / (1.0 + rel)
            }
        }
    }

    /// Lower confidence bound; see [`HllSketch::lower_bound`].
    pub fn lower_bound(&self, num_std_dev: NumStdDev) -> f64 {
        match self.cur_mode() {
            CurMode::List => {
                estimator::coupon_lower_bound(self.buf.get_u8(LIST_COUNT_BYTE) as usize, num_std_dev)
            }
            CurMode::Set => {
                estimator::coupon_lower_bound(self.buf.get_u32(SET_COUNT_INT) as usize, num_std_dev)
            }
            CurMode::Hll => {
                let rel = estimator::rel_err(
                    self.lg_config_k,
                    false,
                    self.out_of_order(),
                    num_std_dev,
                );
                self.estimate() / (1.0 + rel)
            }
        }
    }

    /// Return the sketch to an empty LIST in place.
    pub fn reset(&mut self) -> Result<(), Error> {
        if self.buf.is_read_only() {
            return Err(Error::read_only("reset through a read-only sketch wrap"));
        }
        let min_bytes =
            HllSketch::max_updatable_serialization_bytes(self.lg_config_k, self.hll_type)?;
        self.buf.clear(0, min_bytes)?;
        self.write_list_header()
    }

    /// Lift the current image onto the heap.
    pub fn to_heap(&self) -> Result<HllSketch, Error> {
        HllSketch::heapify(self.buf.bytes())
    }

    /// Serialize into the compact, read-only form. Bit-identical to the
    /// compact serialization of the heap equivalent.
    pub fn to_compact_bytes(&self) -> Result<Vec<u8>, Error> {
        let pre = Preamble::decode(self.buf.bytes())?;
        if pre.compact() {
            // A read-only wrap over a compact image already is the form.
            let len = pre.image_bytes(self.buf.bytes())?;
            return Ok(self.buf.bytes()[..len].to_vec());
        }
        Ok(self.to_heap()?.to_compact_bytes())
    }

    /// Serialize into the updatable form: a copy of the live image prefix.
    pub fn to_updatable_bytes(&self) -> Result<Vec<u8>, Error> {
        let pre = Preamble::decode(self.buf.bytes())?;
        if pre.compact() {
            return Ok(self.to_heap()?.to_updatable_bytes());
        }
        let len = pre.image_bytes(self.buf.bytes())?;
        Ok(self.buf.bytes()[..len].to_vec())
    }

    // LIST stage

    fn write_list_header(&mut self) -> Result<(), Error> {
        let mut header = [0u8; 8];
        write_common_header(
            &mut header,
            CurMode::List,
            self.hll_type,
            self.lg_config_k,
            LG_LIST_SIZE,
            EMPTY_FLAG_MASK,
            0,
        );
        self.buf.put_bytes(0, &header)
    }

    fn clear_empty_flag(&mut self) -> Result<(), Error> {
        let flags = self.buf.get_u8(FLAGS_BYTE);
        if flags & EMPTY_FLAG_MASK != 0 {
            self.buf.put_u8(FLAGS_BYTE, flags & !EMPTY_FLAG_MASK)?;
        }
        Ok(())
    }

    fn list_update(&mut self, coupon: u32) -> Result<(), Error> {
        let count = self.buf.get_u8(LIST_COUNT_BYTE) as usize;
        for i in 0..count {
            if self.buf.get_u32(LIST_INT_ARR_START + i * COUPON_SIZE_BYTES) == coupon {
                return Ok(());
            }
        }
        if count < LIST_SIZE {
            self.buf
                .put_u32(LIST_INT_ARR_START + count * COUPON_SIZE_BYTES, coupon)?;
            self.buf.put_u8(LIST_COUNT_BYTE, (count + 1) as u8)?;
            self.clear_empty_flag()
        } else {
            self.promote_list_to_set(coupon)
        }
    }

    /// Rewrite the image as a capacity-16 SET and insert the list coupons
    /// in storage order followed by the overflowing coupon, exactly like
    /// the heap promotion.
    fn promote_list_to_set(&mut self, overflow: u32) -> Result<(), Error> {
        let mut coupons = [0u32; LIST_SIZE];
        for (i, slot) in coupons.iter_mut().enumerate() {
            *slot = self.buf.get_u32(LIST_INT_ARR_START + i * COUPON_SIZE_BYTES);
        }

        let table_bytes = (1usize << crate::hll::LG_INIT_SET_SIZE) * COUPON_SIZE_BYTES;
        self.buf.clear(0, SET_INT_ARR_START + table_bytes)?;

        let mut header = [0u8; 8];
        write_common_header(
            &mut header,
            CurMode::Set,
            self.hll_type,
            self.lg_config_k,
            crate::hll::LG_INIT_SET_SIZE,
            0,
            0,
        );
        self.buf.put_bytes(0, &header)?;

        for coupon in coupons {
            self.set_update(coupon)?;
        }
        self.set_update(overflow)
    }

    // SET stage

    fn set_update(&mut self, coupon: u32) -> Result<(), Error> {
        let lg_arr = self.buf.get_u8(LG_ARR_BYTE);
        let found = find_coupon(lg_arr, coupon, |i| {
            self.buf.get_u32(SET_INT_ARR_START + i * COUPON_SIZE_BYTES)
        });
        match found {
            SetFind::Found(_) => Ok(()),
            SetFind::Empty(idx) => {
                self.buf
                    .put_u32(SET_INT_ARR_START + idx * COUPON_SIZE_BYTES, coupon)?;
                let count = self.buf.get_u32(SET_COUNT_INT) + 1;
                self.buf.put_u32(SET_COUNT_INT, count)?;
                self.clear_empty_flag()?;

                if count as usize >= set_promotion_threshold(self.lg_config_k) {
                    return self.promote_set_to_hll();
                }
                if RESIZE_DENOMINATOR * count as usize > RESIZE_NUMERATOR * (1usize << lg_arr) {
                    self.grow_set(lg_arr)?;
                }
                Ok(())
            }
        }
    }

    fn read_set_coupons(&self, lg_arr: u8) -> Vec<u32> {
        (0..1usize << lg_arr)
            .map(|i| self.buf.get_u32(SET_INT_ARR_START + i * COUPON_SIZE_BYTES))
            .filter(|&c| c != 0)
            .collect()
    }

    /// Double the in-place table, rehashing valid coupons in table order,
    /// the same schedule as the heap table, so layouts stay identical.
    fn grow_set(&mut self, old_lg_arr: u8) -> Result<(), Error> {
        let coupons = self.read_set_coupons(old_lg_arr);

        let new_lg_arr = old_lg_arr + 1;
        self.buf.put_u8(LG_ARR_BYTE, new_lg_arr)?;
        self.buf.clear(
            SET_INT_ARR_START,
            (1usize << new_lg_arr) * COUPON_SIZE_BYTES,
        )?;

        for coupon in coupons {
            let found = find_coupon(new_lg_arr, coupon, |i| {
                self.buf.get_u32(SET_INT_ARR_START + i * COUPON_SIZE_BYTES)
            });
            match found {
                SetFind::Empty(idx) => {
                    self.buf
                        .put_u32(SET_INT_ARR_START + idx * COUPON_SIZE_BYTES, coupon)?;
                }
                SetFind::Found(_) => unreachable!("duplicate coupon while growing hash set"),
            }
        }
        Ok(())
    }

    /// Rewrite the image as a fresh HLL array and replay every coupon,
    /// then pin the HIP accumulator to the exact coupon count, exactly
    /// like the heap promotion.
    fn promote_set_to_hll(&mut self) -> Result<(), Error> {
        let lg_arr = self.buf.get_u8(LG_ARR_BYTE);
        let coupons = self.read_set_coupons(lg_arr);

        let min_bytes =
            HllSketch::max_updatable_serialization_bytes(self.lg_config_k, self.hll_type)?;
        self.buf.clear(0, min_bytes)?;

        let mut header = [0u8; 8];
        write_common_header(
            &mut header,
            CurMode::Hll,
            self.hll_type,
            self.lg_config_k,
            0,
            0,
            0,
        );
        self.buf.put_bytes(0, &header)?;

        let k = 1u32 << self.lg_config_k;
        self.buf.put_f64(KXQ0_DOUBLE, k as f64)?;
        self.buf.put_u32(CUR_MIN_COUNT_INT, k)?;

        for &coupon in &coupons {
            self.hll_update(coupon)?;
        }
        self.buf.put_f64(HIP_ACCUM_DOUBLE, coupons.len() as f64)
    }

    // HLL stage

    fn hll_composite(&self) -> f64 {
        estimator::composite_estimate(
            self.lg_config_k,
            self.buf.get_u8(HLL_CUR_MIN_BYTE),
            self.buf.get_u32(CUR_MIN_COUNT_INT),
            self.buf.get_f64(KXQ0_DOUBLE),
            self.buf.get_f64(KXQ1_DOUBLE),
        )
    }

    /// HIP/KxQ bookkeeping for a register rising from `old` to `new`,
    /// mirroring the heap estimator bit for bit.
    fn hip_kxq_update(&mut self, old: u8, new: u8) -> Result<(), Error> {
        let mut kxq0 = self.buf.get_f64(KXQ0_DOUBLE);
        let mut kxq1 = self.buf.get_f64(KXQ1_DOUBLE);

        if self.buf.get_u8(FLAGS_BYTE) & OUT_OF_ORDER_FLAG_MASK == 0 {
            let k = (1u64 << self.lg_config_k) as f64;
            let hip = self.buf.get_f64(HIP_ACCUM_DOUBLE);
            self.buf.put_f64(HIP_ACCUM_DOUBLE, hip + k / (kxq0 + kxq1))?;
        }

        if old < 32 {
            kxq0 -= estimator::inv_pow2(old);
        } else {
            kxq1 -= estimator::inv_pow2(old);
        }
        if new < 32 {
            kxq0 += estimator::inv_pow2(new);
        } else {
            kxq1 += estimator::inv_pow2(new);
        }
        self.buf.put_f64(KXQ0_DOUBLE, kxq0)?;
        self.buf.put_f64(KXQ1_DOUBLE, kxq1)
    }

    fn dec_num_at_cur_min(&mut self) -> Result<(), Error> {
        let num = self.buf.get_u32(CUR_MIN_COUNT_INT);
        self.buf.put_u32(CUR_MIN_COUNT_INT, num - 1)
    }

    fn hll_update(&mut self, coupon: u32) -> Result<(), Error> {
        let mask = (1u32 << self.lg_config_k) - 1;
        let slot = get_addr26(coupon) & mask;
        let new_value = get_value(coupon);

        match self.hll_type {
            HllType::Hll8 => {
                let offset = HLL_BYTE_ARR_START + slot as usize;
                let old_value = self.buf.get_u8(offset);
                if new_value > old_value {
                    self.hip_kxq_update(old_value, new_value)?;
                    self.buf.put_u8(offset, new_value & VAL_MASK_6 as u8)?;
                    if old_value == 0 {
                        self.dec_num_at_cur_min()?;
                    }
                }
                Ok(())
            }
            HllType::Hll6 => {
                let old_value = self.get_six_bit(slot);
                if new_value > old_value {
                    self.hip_kxq_update(old_value, new_value)?;
                    self.put_six_bit(slot, new_value)?;
                    if old_value == 0 {
                        self.dec_num_at_cur_min()?;
                    }
                }
                Ok(())
            }
            HllType::Hll4 => self.hll4_update(slot, new_value),
        }
    }

    fn get_six_bit(&self, slot: u32) -> u8 {
        let bit_offset = slot as usize * 6;
        let byte_idx = HLL_BYTE_ARR_START + (bit_offset >> 3);
        let shift = bit_offset & 7;
        ((self.buf.get_u16(byte_idx) >> shift) & VAL_MASK_6) as u8
    }

    fn put_six_bit(&mut self, slot: u32, value: u8) -> Result<(), Error> {
        let bit_offset = slot as usize * 6;
        let byte_idx = HLL_BYTE_ARR_START + (bit_offset >> 3);
        let shift = bit_offset & 7;
        let mut window = self.buf.get_u16(byte_idx);
        window &= !(VAL_MASK_6 << shift);
        window |= ((value as u16) & VAL_MASK_6) << shift;
        self.buf.put_u16(byte_idx, window)
    }

    fn get_nibble(&self, slot: u32) -> u8 {
        let byte = self.buf.get_u8(HLL_BYTE_ARR_START + (slot >> 1) as usize);
        if slot & 1 == 0 { byte & 0x0F } else { byte >> 4 }
    }

    fn put_nibble(&mut self, slot: u32, value: u8) -> Result<(), Error> {
        let offset = HLL_BYTE_ARR_START + (slot >> 1) as usize;
        let old = self.buf.get_u8(offset);
        let new = if slot & 1 == 0 {
            (old & 0xF0) | (value & 0x0F)
        } else {
            (old & 0x0F) | (value << 4)
        };
        self.buf.put_u8(offset, new)
    }

    fn hll4_update(&mut self, slot: u32, new_value: u8) -> Result<(), Error> {
        let cur_min = self.buf.get_u8(HLL_CUR_MIN_BYTE);
        if new_value <= cur_min {
            return Ok(());
        }

        let raw = self.get_nibble(slot);
        let old_value = if raw < AUX_TOKEN {
            cur_min + raw
        } else {
            match self.aux_get(slot) {
                Some(value) => value,
                None => unreachable!("aux table entry for sentinel nibble"),
            }
        };

        if new_value <= old_value {
            return Ok(());
        }

        self.hip_kxq_update(old_value, new_value)?;

        let shifted = new_value - cur_min;
        match (raw, shifted) {
            (AUX_TOKEN, s) if s >= AUX_TOKEN => self.aux_replace(slot, new_value)?,
            (AUX_TOKEN, _) => {
                unreachable!("sentinel nibble with a non-exception new value")
            }
            (_, s) if s >= AUX_TOKEN => {
                self.put_nibble(slot, AUX_TOKEN)?;
                self.aux_insert(slot, new_value)?;
            }
            _ => self.put_nibble(slot, shifted)?,
        }

        if old_value == cur_min {
            let num = self.buf.get_u32(CUR_MIN_COUNT_INT) - 1;
            self.buf.put_u32(CUR_MIN_COUNT_INT, num)?;
            while self.buf.get_u32(CUR_MIN_COUNT_INT) == 0 {
                self.rebase()?;
            }
        }
        Ok(())
    }

    /// The in-place counterpart of the heap rebase: lower every nibble,
    /// then rebuild the aux region from scratch at its initial size.
    fn rebase(&mut self) -> Result<(), Error> {
        let cur_min = self.buf.get_u8(HLL_CUR_MIN_BYTE);
        let new_cur_min = cur_min + 1;
        let k = 1u32 << self.lg_config_k;
        let mut num_at_new = 0u32;

        for slot in 0..k {
            let raw = self.get_nibble(slot);
            debug_assert_ne!(raw, 0, "no register may sit at cur_min during a rebase");
            if raw < AUX_TOKEN {
                let lowered = raw - 1;
                self.put_nibble(slot, lowered)?;
                if lowered == 0 {
                    num_at_new += 1;
                }
            }
        }

        let lg_aux = self.buf.get_u8(LG_ARR_BYTE);
        if lg_aux > 0 {
            let entries = self.read_aux_entries(lg_aux);
            self.buf.clear(
                self.aux_region_start(),
                (1usize << lg_aux) * COUPON_SIZE_BYTES,
            )?;
            self.buf.put_u8(LG_ARR_BYTE, 0)?;
            self.buf.put_u32(AUX_COUNT_INT, 0)?;

            for (slot, true_value) in entries {
                let shifted = true_value - new_cur_min;
                if shifted < AUX_TOKEN {
                    self.put_nibble(slot, shifted)?;
                } else {
                    self.aux_insert(slot, true_value)?;
                }
            }
        }

        self.buf.put_u8(HLL_CUR_MIN_BYTE, new_cur_min)?;
        self.buf.put_u32(CUR_MIN_COUNT_INT, num_at_new)
    }

    // Auxiliary exception region (HLL_4 only), living right after the
    // nibble array inside the same buffer.

    fn aux_region_start(&self) -> usize {
        HLL_BYTE_ARR_START + hll4_arr_bytes(self.lg_config_k)
    }

    fn read_aux_entries(&self, lg_aux: u8) -> Vec<(u32, u8)> {
        let base = self.aux_region_start();
        (0..1usize << lg_aux)
            .map(|i| self.buf.get_u32(base + i * COUPON_SIZE_BYTES))
            .filter(|&entry| entry != 0)
            .map(|entry| {
                (
                    aux_entry_slot(entry, self.lg_config_k),
                    aux_entry_value(entry, self.lg_config_k),
                )
            })
            .collect()
    }

    fn aux_get(&self, slot: u32) -> Option<u8> {
        let lg_aux = self.buf.get_u8(LG_ARR_BYTE);
        if lg_aux == 0 {
            return None;
        }
        let base = self.aux_region_start();
        match find_aux_slot(lg_aux, self.lg_config_k, slot, |i| {
            self.buf.get_u32(base + i * COUPON_SIZE_BYTES)
        }) {
            AuxFind::Found(idx) => Some(aux_entry_value(
                self.buf.get_u32(base + idx * COUPON_SIZE_BYTES),
                self.lg_config_k,
            )),
            AuxFind::Empty(_) => None,
        }
    }

    fn aux_insert(&mut self, slot: u32, value: u8) -> Result<(), Error> {
        let mut lg_aux = self.buf.get_u8(LG_ARR_BYTE);
        if lg_aux == 0 {
            lg_aux = lg_aux_arr_ints(self.lg_config_k);
            self.ensure_aux_capacity(lg_aux)?;
            self.buf.clear(
                self.aux_region_start(),
                (1usize << lg_aux) * COUPON_SIZE_BYTES,
            )?;
            self.buf.put_u8(LG_ARR_BYTE, lg_aux)?;
        }

        let base = self.aux_region_start();
        let found = find_aux_slot(lg_aux, self.lg_config_k, slot, |i| {
            self.buf.get_u32(base + i * COUPON_SIZE_BYTES)
        });
        match found {
            AuxFind::Empty(idx) => {
                self.buf.put_u32(
                    base + idx * COUPON_SIZE_BYTES,
                    pack_aux_entry(slot, value, self.lg_config_k),
                )?;
            }
            AuxFind::Found(_) => unreachable!("slot already present in aux region"),
        }

        let count = self.buf.get_u32(AUX_COUNT_INT) + 1;
        self.buf.put_u32(AUX_COUNT_INT, count)?;

        if 16 * count > 15 * (1u32 << lg_aux) {
            self.grow_aux(lg_aux)?;
        }
        Ok(())
    }

    fn aux_replace(&mut self, slot: u32, value: u8) -> Result<(), Error> {
        let lg_aux = self.buf.get_u8(LG_ARR_BYTE);
        let base = self.aux_region_start();
        let found = find_aux_slot(lg_aux, self.lg_config_k, slot, |i| {
            self.buf.get_u32(base + i * COUPON_SIZE_BYTES)
        });
        match found {
            AuxFind::Found(idx) => self.buf.put_u32(
                base + idx * COUPON_SIZE_BYTES,
                pack_aux_entry(slot, value, self.lg_config_k),
            ),
            AuxFind::Empty(_) => unreachable!("slot not present in aux region"),
        }
    }

    fn grow_aux(&mut self, old_lg_aux: u8) -> Result<(), Error> {
        let entries = self.read_aux_entries(old_lg_aux);

        let new_lg_aux = old_lg_aux + 1;
        self.ensure_aux_capacity(new_lg_aux)?;
        self.buf.clear(
            self.aux_region_start(),
            (1usize << new_lg_aux) * COUPON_SIZE_BYTES,
        )?;
        self.buf.put_u8(LG_ARR_BYTE, new_lg_aux)?;

        let base = self.aux_region_start();
        for (slot, value) in entries {
            let found = find_aux_slot(new_lg_aux, self.lg_config_k, slot, |i| {
                self.buf.get_u32(base + i * COUPON_SIZE_BYTES)
            });
            match found {
                AuxFind::Empty(idx) => {
                    self.buf.put_u32(
                        base + idx * COUPON_SIZE_BYTES,
                        pack_aux_entry(slot, value, self.lg_config_k),
                    )?;
                }
                AuxFind::Found(_) => unreachable!("duplicate slot while growing aux region"),
            }
        }
        Ok(())
    }

    fn ensure_aux_capacity(&self, lg_aux: u8) -> Result<(), Error> {
        let required = self.aux_region_start() + (1usize << lg_aux) * COUPON_SIZE_BYTES;
        if required > self.buf.capacity() {
            return Err(Error::capacity("aux exception region outgrew the buffer")
                .with_context("required", required)
                .with_context("capacity", self.buf.capacity()));
        }
        Ok(())
    }
}
