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

//! LIST mode: exact storage of up to 8 distinct coupons.
//!
//! Coupons append in arrival order after a linear duplicate scan. When the
//! list is full and a ninth distinct coupon arrives, the sketch promotes to
//! SET mode. The estimate is the count itself, exact.

use crate::error::Error;
use crate::hll::HllType;
use crate::hll::LG_LIST_SIZE;
use crate::hll::LIST_SIZE;
use crate::hll::preamble::*;

/// Outcome of a LIST update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ListUpdate {
    /// The coupon was appended.
    Added,
    /// The coupon was already present.
    Duplicate,
    /// The list is full and does not contain the coupon; the caller must
    /// promote to SET and insert the coupon there.
    Full,
}

/// Unsorted coupon list with a fixed 8-slot payload.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CouponList {
    coupons: [u32; LIST_SIZE],
    count: usize,
}

impl Default for CouponList {
    fn default() -> Self {
        Self {
            coupons: [0; LIST_SIZE],
            count: 0,
        }
    }
}

impl CouponList {
    pub fn update(&mut self, coupon: u32) -> ListUpdate {
        if self.coupons[..self.count].contains(&coupon) {
            return ListUpdate::Duplicate;
        }
        if self.count == LIST_SIZE {
            return ListUpdate::Full;
        }
        self.coupons[self.count] = coupon;
        self.count += 1;
        ListUpdate::Added
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Valid coupons in insertion order.
    pub fn coupons(&self) -> &[u32] {
        &self.coupons[..self.count]
    }

    /// Serialize; compact images carry only the valid coupons, updatable
    /// images the full 8-slot array.
    pub fn serialize(&self, lg_config_k: u8, hll_type: HllType, compact: bool) -> Vec<u8> {
        let slots = if compact { self.count } else { LIST_SIZE };
        let mut bytes = vec![0u8; LIST_INT_ARR_START + slots * COUPON_SIZE_BYTES];

        let mut flags = 0u8;
        if compact {
            flags |= COMPACT_FLAG_MASK | READ_ONLY_FLAG_MASK;
        }
        if self.is_empty() {
            flags |= EMPTY_FLAG_MASK;
        }

        write_common_header(
            &mut bytes,
            crate::hll::CurMode::List,
            hll_type,
            lg_config_k,
            LG_LIST_SIZE,
            flags,
            self.count as u8,
        );

        for (i, &coupon) in self.coupons[..self.count].iter().enumerate() {
            write_u32_le(&mut bytes, LIST_INT_ARR_START + i * COUPON_SIZE_BYTES, coupon);
        }

        bytes
    }

    /// Rebuild a list from a validated image. Both forms store the valid
    /// coupons contiguously from the start of the payload.
    pub fn deserialize(bytes: &[u8], pre: &Preamble) -> Result<Self, Error> {
        if !pre.compact() && pre.lg_arr != LG_LIST_SIZE {
            return Err(Error::format(format!(
                "updatable LIST image declares lg_arr {}, expected {LG_LIST_SIZE}",
                pre.lg_arr
            )));
        }
        let count = bytes[LIST_COUNT_BYTE] as usize;
        if count > LIST_SIZE {
            return Err(Error::format(format!(
                "LIST image declares {count} coupons, maximum is {LIST_SIZE}"
            )));
        }

        let mut list = CouponList::default();
        for i in 0..count {
            let coupon = read_u32_le(bytes, LIST_INT_ARR_START + i * COUPON_SIZE_BYTES);
            if coupon == 0 {
                return Err(Error::format(format!(
                    "LIST image contains an empty coupon at index {i}"
                )));
            }
            list.coupons[i] = coupon;
        }
        list.count = count;

        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hll::pack_coupon;

    #[test]
    fn test_update_dedup_and_overflow() {
        let mut list = CouponList::default();

        for i in 0..8u32 {
            assert_eq!(list.update(pack_coupon(i, 1)), ListUpdate::Added);
        }
        assert_eq!(list.count(), 8);

        // Duplicates are ignored even when full.
        assert_eq!(list.update(pack_coupon(3, 1)), ListUpdate::Duplicate);
        assert_eq!(list.count(), 8);

        // A ninth distinct coupon signals promotion.
        assert_eq!(list.update(pack_coupon(99, 2)), ListUpdate::Full);
        assert_eq!(list.count(), 8);
    }

    #[test]
    fn test_serialize_round_trip_both_forms() {
        let mut list = CouponList::default();
        for i in 0..5u32 {
            list.update(pack_coupon(i * 7 + 1, 3));
        }

        for compact in [true, false] {
            let bytes = list.serialize(10, HllType::Hll4, compact);
            let expected = LIST_INT_ARR_START + if compact { 5 * 4 } else { 32 };
            assert_eq!(bytes.len(), expected);

            let pre = Preamble::decode(&bytes).unwrap();
            assert_eq!(pre.compact(), compact);
            let restored = CouponList::deserialize(&bytes, &pre).unwrap();
            assert_eq!(restored, list);
        }
    }

    #[test]
    fn test_empty_serialization() {
        let list = CouponList::default();
        let bytes = list.serialize(4, HllType::Hll8, true);
        assert_eq!(bytes.len(), LIST_INT_ARR_START);

        let pre = Preamble::decode(&bytes).unwrap();
        assert!(pre.empty());
        let restored = CouponList::deserialize(&bytes, &pre).unwrap();
        assert!(restored.is_empty());
    }
}
