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

//! Uniform (index, value) traversal over every sketch representation.
//!
//! The merge engine, encoding conversion, and diagnostics all walk sketch
//! state through this one single-pass, non-mutating iterator. Coupon modes
//! yield `(addr26, value)` so the original coupon can be reconstructed
//! losslessly with `pack_coupon`; the dense arrays yield `(slot, register)`
//! with HLL_4 sentinels resolved through the aux table. The two traversals
//! are `all` (every slot, including zeros) and `valid` (nonzero only).

use crate::hll::array4::AUX_TOKEN;
use crate::hll::array4::get_nibble;
use crate::hll::array6::get_six_bit;
use crate::hll::aux::AuxMap;
use crate::hll::get_addr26;
use crate::hll::get_value;

enum Source<'a> {
    /// Coupon slots from LIST or SET storage.
    Coupons(&'a [u32]),
    /// HLL_4 nibbles with their offset and exception table.
    Dense4 {
        nibbles: &'a [u8],
        cur_min: u8,
        aux: Option<&'a AuxMap>,
    },
    /// HLL_6 packed registers.
    Dense6 { packed: &'a [u8], slots: usize },
    /// HLL_8 registers.
    Dense8(&'a [u8]),
}

impl Source<'_> {
    fn len(&self) -> usize {
        match self {
            Source::Coupons(coupons) => coupons.len(),
            Source::Dense4 { nibbles, .. } => nibbles.len() * 2,
            Source::Dense6 { slots, .. } => *slots,
            Source::Dense8(regs) => regs.len(),
        }
    }

    fn pair(&self, index: usize) -> (u32, u8) {
        match self {
            Source::Coupons(coupons) => {
                let coupon = coupons[index];
                (get_addr26(coupon), get_value(coupon))
            }
            Source::Dense4 {
                nibbles,
                cur_min,
                aux,
            } => {
                let slot = index as u32;
                let raw = get_nibble(nibbles, slot);
                let value = if raw < AUX_TOKEN {
                    cur_min + raw
                } else {
                    aux.and_then(|aux| aux.get(slot))
                        .expect("aux table entry for sentinel nibble")
                };
                (slot, value)
            }
            Source::Dense6 { packed, .. } => (index as u32, get_six_bit(packed, index as u32)),
            Source::Dense8(regs) => (index as u32, regs[index]),
        }
    }
}

/// Single-pass iterator over (index, value) pairs.
pub(crate) struct Pairs<'a> {
    source: Source<'a>,
    index: usize,
    valid_only: bool,
}

impl<'a> Pairs<'a> {
    fn new(source: Source<'a>, valid_only: bool) -> Self {
        Self {
            source,
            index: 0,
            valid_only,
        }
    }

    pub fn valid_coupons(coupons: &'a [u32]) -> Self {
        Self::new(Source::Coupons(coupons), true)
    }

    pub fn all_dense4(nibbles: &'a [u8], cur_min: u8, aux: Option<&'a AuxMap>) -> Self {
        Self::new(
            Source::Dense4 {
                nibbles,
                cur_min,
                aux,
            },
            false,
        )
    }

    pub fn valid_dense4(nibbles: &'a [u8], cur_min: u8, aux: Option<&'a AuxMap>) -> Self {
        Self::new(
            Source::Dense4 {
                nibbles,
                cur_min,
                aux,
            },
            true,
        )
    }

    pub fn all_dense6(packed: &'a [u8], slots: usize) -> Self {
        Self::new(Source::Dense6 { packed, slots }, false)
    }

    pub fn valid_dense6(packed: &'a [u8], slots: usize) -> Self {
        Self::new(Source::Dense6 { packed, slots }, true)
    }

    pub fn all_dense8(regs: &'a [u8]) -> Self {
        Self::new(Source::Dense8(regs), false)
    }

    pub fn valid_dense8(regs: &'a [u8]) -> Self {
        Self::new(Source::Dense8(regs), true)
    }
}

impl Iterator for Pairs<'_> {
    type Item = (u32, u8);

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.source.len() {
            let index = self.index;
            self.index += 1;

            // Coupon slots hold a whole packed word; zero marks empty.
            if self.valid_only {
                if let Source::Coupons(coupons) = &self.source {
                    if coupons[index] == 0 {
                        continue;
                    }
                }
            }

            let pair = self.source.pair(index);
            if self.valid_only && pair.1 == 0 {
                continue;
            }
            return Some(pair);
        }
        None
    }
}
