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

//! HyperLogLog sketches for cardinality estimation.
//!
//! A single logical sketch progresses through three storage modes as the
//! number of distinct inputs grows:
//!
//! - **LIST**: up to 8 distinct coupons stored exactly
//! - **SET**: an open-addressed coupon hash table, still exact
//! - **HLL**: a dense register array in one of three encodings
//!
//! Mode transitions are automatic and monotonic (LIST → SET → HLL); only
//! [`HllSketch::reset`] returns a sketch to LIST. Each promotion preserves
//! every observed value.
//!
//! # HLL encodings
//!
//! Three target encodings trade update speed for space:
//!
//! - [`HllType::Hll4`]: 4 bits per register plus a small auxiliary exception
//!   table for the rare values that exceed the 4-bit window. Smallest
//!   footprint, about K/2 bytes.
//! - [`HllType::Hll6`]: 6 bits per register packed across byte boundaries,
//!   about 3/4 · K bytes.
//! - [`HllType::Hll8`]: one byte per register. Fastest updates, K bytes.
//!
//! All three have identical error behavior for the same `lg_config_k`.
//!
//! # Heap and direct sketches
//!
//! [`HllSketch`] owns its payload on the heap. [`DirectHllSketch`] operates
//! entirely inside a caller-owned byte region in the updatable image layout,
//! mutating it in place; the two produce bit-identical serialized output for
//! the same update history.
//!
//! # Estimation
//!
//! While updates arrive in order the sketch tracks a Historic Inverse
//! Probability (HIP) accumulator, which is the default estimate in HLL mode.
//! Sketches that were merged or heapified with the out-of-order flag fall
//! back to the composite estimator (raw HyperLogLog with a small-range
//! linear-counting correction). Confidence bounds use tabulated relative
//! error quantiles per `lg_config_k`.
//!
//! # Usage
//!
//! ```rust
//! # use cardsketch::hll::{HllSketch, HllType};
//! # use cardsketch::common::NumStdDev;
//! let mut sketch = HllSketch::new(12, HllType::Hll8).unwrap();
//! sketch.update("apple");
//! let upper = sketch.upper_bound(NumStdDev::Two);
//! assert!(upper >= sketch.estimate());
//! ```
//!
//! # Union
//!
//! ```rust
//! # use cardsketch::hll::{HllSketch, HllType, HllUnion};
//! let mut left = HllSketch::new(10, HllType::Hll8).unwrap();
//! let mut right = HllSketch::new(10, HllType::Hll8).unwrap();
//! left.update("apple");
//! right.update("banana");
//!
//! let mut union = HllUnion::new(10).unwrap();
//! union.merge(&left);
//! union.merge(&right);
//!
//! let result = union.get_result(HllType::Hll8);
//! assert!(result.estimate() >= 2.0);
//! ```

use std::hash::Hash;

use crate::hash::MurmurHash3X64128;

mod array4;
mod array6;
mod array8;
mod aux;
mod direct;
mod estimator;
mod list;
mod mode;
mod pairs;
mod preamble;
mod set;
mod sketch;
mod union;

pub use self::direct::DirectHllSketch;
pub use self::sketch::HllSketch;
pub use self::union::HllUnion;

/// Target HLL encoding.
///
/// See [module level documentation](self) for more details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HllType {
    /// Uses a 4-bit field per HLL register and for large counts may require
    /// a small internal auxiliary table for storing statistical exceptions,
    /// which are rare. Smallest storage footprint at about K/2 bytes.
    Hll4,
    /// Uses a 6-bit field per HLL register, packed across byte boundaries,
    /// with a storage footprint of about 3/4 * K bytes.
    Hll6,
    /// Uses one byte per HLL register. It is generally the fastest in terms
    /// of update time but has the largest storage footprint of about K bytes.
    Hll8,
}

impl HllType {
    pub(crate) fn code(self) -> u8 {
        match self {
            HllType::Hll4 => 0,
            HllType::Hll6 => 1,
            HllType::Hll8 => 2,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(HllType::Hll4),
            1 => Some(HllType::Hll6),
            2 => Some(HllType::Hll8),
            _ => None,
        }
    }
}

/// Current storage mode of a sketch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurMode {
    /// Exact unsorted list of up to 8 coupons.
    List,
    /// Exact open-addressed coupon hash table.
    Set,
    /// Dense register array in the target encoding.
    Hll,
}

impl CurMode {
    pub(crate) fn code(self) -> u8 {
        match self {
            CurMode::List => 0,
            CurMode::Set => 1,
            CurMode::Hll => 2,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(CurMode::List),
            1 => Some(CurMode::Set),
            2 => Some(CurMode::Hll),
            _ => None,
        }
    }
}

/// Inclusive bounds of the valid `lg_config_k` range.
pub(crate) const MIN_LG_K: u8 = 4;
pub(crate) const MAX_LG_K: u8 = 21;

const KEY_BITS_26: u32 = 26;
const KEY_MASK_26: u32 = (1 << KEY_BITS_26) - 1;

/// LIST mode holds at most this many coupons.
pub(crate) const LIST_SIZE: usize = 8;
pub(crate) const LG_LIST_SIZE: u8 = 3;

/// Initial SET table capacity is 16 slots.
pub(crate) const LG_INIT_SET_SIZE: u8 = 4;

// Coupon tables resize at 3/4 = 75% load factor.
pub(crate) const RESIZE_NUMERATOR: usize = 3;
pub(crate) const RESIZE_DENOMINATOR: usize = 4;

/// Number of coupons at which a SET promotes to the dense HLL array:
/// 3K/4, expressed the way the threshold is computed everywhere.
pub(crate) fn set_promotion_threshold(lg_config_k: u8) -> usize {
    3 << (lg_config_k - 2)
}

pub(crate) fn check_lg_config_k(lg_config_k: u8) -> Result<(), crate::error::Error> {
    if (MIN_LG_K..=MAX_LG_K).contains(&lg_config_k) {
        Ok(())
    } else {
        Err(crate::error::Error::config(format!(
            "lg_config_k must be in [{MIN_LG_K}, {MAX_LG_K}], got {lg_config_k}"
        )))
    }
}

/// Extract the 26 address bits from a coupon.
///
/// The register slot is `get_addr26(coupon) & (K - 1)`; the surplus high
/// address bits are kept through the coupon modes so that promotion and
/// rehashing retain full entropy.
#[inline]
pub(crate) fn get_addr26(coupon: u32) -> u32 {
    coupon & KEY_MASK_26
}

/// Extract the value (upper 6 bits) from a coupon.
#[inline]
pub(crate) fn get_value(coupon: u32) -> u8 {
    (coupon >> KEY_BITS_26) as u8
}

/// Pack address bits and value into a coupon.
///
/// Format: [value (6 bits) << 26] | [addr (26 bits)]
#[inline]
pub(crate) fn pack_coupon(addr: u32, value: u8) -> u32 {
    ((value as u32) << KEY_BITS_26) | (addr & KEY_MASK_26)
}

/// Derive a coupon from the lower 64 bits of the item hash.
///
/// The address is the low 26 bits; the value is one plus the number of
/// leading zeros within the remaining upper 38 bits, clamped to 63. The
/// value is always at least 1, so a valid coupon is never the all-zero
/// word (even for a hash of exactly zero), which lets zero mark empty
/// slots in the coupon tables.
#[inline]
pub(crate) fn coupon_from_hash(hash: u64) -> u32 {
    let addr26 = (hash as u32) & KEY_MASK_26;
    let rest = hash >> KEY_BITS_26;
    // `rest` occupies 38 bits, so its u64 leading-zero count is >= 26.
    let lz38 = rest.leading_zeros() - KEY_BITS_26;
    let value = (lz38 + 1).min(63);
    (value << KEY_BITS_26) | addr26
}

/// Hash an item and convert it to a coupon.
pub(crate) fn coupon<H: Hash>(v: H) -> u32 {
    let mut hasher = MurmurHash3X64128::default();
    v.hash(&mut hasher);
    let (lo, _hi) = hasher.finish128();
    coupon_from_hash(lo)
}
