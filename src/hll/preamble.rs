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

//! Preamble codec for the serialized sketch image.
//!
//! Every serialized sketch starts with a fixed little-endian header whose
//! length depends on the current mode: 8 bytes for LIST and SET, 40 bytes
//! for HLL. Decoding validates family, serial version, `lg_config_k`, the
//! mode/type codes, and that the buffer covers the declared image length.
//! Both the heap serializers and the direct (in-buffer) sketches go through
//! the constants and helpers here, which is what keeps the two layouts
//! bit-identical.

use byteorder::ByteOrder;
use byteorder::LE;

use crate::error::Error;
use crate::hll::CurMode;
use crate::hll::HllType;
use crate::hll::check_lg_config_k;

/// Family ID for HLL sketches.
pub(crate) const HLL_FAMILY_ID: u8 = 7;

/// Current serialization version.
pub(crate) const SER_VER: u8 = 1;

/// Flag indicating the image may not be mutated in place.
pub(crate) const READ_ONLY_FLAG_MASK: u8 = 2;

/// Flag indicating the sketch is empty (no values inserted).
pub(crate) const EMPTY_FLAG_MASK: u8 = 4;

/// Flag indicating compact serialization (no empty slots stored).
pub(crate) const COMPACT_FLAG_MASK: u8 = 8;

/// Flag indicating out-of-order updates (HIP estimator invalid).
pub(crate) const OUT_OF_ORDER_FLAG_MASK: u8 = 16;

// Byte offsets of the common 8-byte header.
pub(crate) const PREAMBLE_INTS_BYTE: usize = 0;
pub(crate) const SER_VER_BYTE: usize = 1;
pub(crate) const FAMILY_BYTE: usize = 2;
pub(crate) const LG_K_BYTE: usize = 3;
/// LIST/SET: lg of the coupon array; HLL_4 updatable images: lg of the
/// auxiliary table; otherwise 0.
pub(crate) const LG_ARR_BYTE: usize = 4;
pub(crate) const FLAGS_BYTE: usize = 5;
/// LIST: coupon count; HLL: `cur_min`; SET: unused (0).
pub(crate) const LIST_COUNT_BYTE: usize = 6;
pub(crate) const HLL_CUR_MIN_BYTE: usize = 6;
pub(crate) const MODE_BYTE: usize = 7;

// LIST / SET payload offsets.
pub(crate) const LIST_INT_ARR_START: usize = 8;
pub(crate) const SET_COUNT_INT: usize = 8;
pub(crate) const SET_INT_ARR_START: usize = 12;

// HLL preamble continuation.
pub(crate) const HIP_ACCUM_DOUBLE: usize = 8;
pub(crate) const KXQ0_DOUBLE: usize = 16;
pub(crate) const KXQ1_DOUBLE: usize = 24;
pub(crate) const CUR_MIN_COUNT_INT: usize = 32;
pub(crate) const AUX_COUNT_INT: usize = 36;
pub(crate) const HLL_BYTE_ARR_START: usize = 40;
pub(crate) const HLL_PREAMBLE_SIZE: usize = 40;

/// Preamble sizes in 4-byte ints, one per mode.
pub(crate) const LIST_PREINTS: u8 = 2;
pub(crate) const SET_PREINTS: u8 = 3;
pub(crate) const HLL_PREINTS: u8 = 10;

pub(crate) const COUPON_SIZE_BYTES: usize = 4;

/// Encode the mode byte: current mode in the low 2 bits, target encoding in
/// bits 2-3.
#[inline]
pub(crate) fn encode_mode_byte(cur_mode: CurMode, hll_type: HllType) -> u8 {
    (cur_mode.code() & 0x3) | ((hll_type.code() & 0x3) << 2)
}

#[inline]
pub(crate) fn extract_cur_mode(mode_byte: u8) -> u8 {
    mode_byte & 0x3
}

#[inline]
pub(crate) fn extract_tgt_hll_type(mode_byte: u8) -> u8 {
    (mode_byte >> 2) & 0x3
}

pub(crate) fn preints_for_mode(cur_mode: CurMode) -> u8 {
    match cur_mode {
        CurMode::List => LIST_PREINTS,
        CurMode::Set => SET_PREINTS,
        CurMode::Hll => HLL_PREINTS,
    }
}

/// Register-array payload bytes for each encoding.
pub(crate) fn hll4_arr_bytes(lg_config_k: u8) -> usize {
    1 << (lg_config_k - 1)
}

/// 6-bit packing uses 3K/4 bytes plus one guard byte so that the 16-bit
/// window read of the last slot stays in bounds.
pub(crate) fn hll6_arr_bytes(lg_config_k: u8) -> usize {
    ((3 << lg_config_k) >> 2) + 1
}

pub(crate) fn hll8_arr_bytes(lg_config_k: u8) -> usize {
    1 << lg_config_k
}

pub(crate) fn hll_arr_bytes(lg_config_k: u8, hll_type: HllType) -> usize {
    match hll_type {
        HllType::Hll4 => hll4_arr_bytes(lg_config_k),
        HllType::Hll6 => hll6_arr_bytes(lg_config_k),
        HllType::Hll8 => hll8_arr_bytes(lg_config_k),
    }
}

#[inline]
pub(crate) fn read_u32_le(bytes: &[u8], offset: usize) -> u32 {
    LE::read_u32(&bytes[offset..offset + 4])
}

#[inline]
pub(crate) fn read_f64_le(bytes: &[u8], offset: usize) -> f64 {
    LE::read_f64(&bytes[offset..offset + 8])
}

#[inline]
pub(crate) fn write_u32_le(bytes: &mut [u8], offset: usize, value: u32) {
    LE::write_u32(&mut bytes[offset..offset + 4], value);
}

#[inline]
pub(crate) fn write_f64_le(bytes: &mut [u8], offset: usize, value: f64) {
    LE::write_f64(&mut bytes[offset..offset + 8], value);
}

/// The decoded, validated fixed header of a serialized image.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Preamble {
    pub preamble_ints: u8,
    pub lg_config_k: u8,
    pub lg_arr: u8,
    pub flags: u8,
    pub cur_mode: CurMode,
    pub hll_type: HllType,
}

impl Preamble {
    pub fn empty(&self) -> bool {
        self.flags & EMPTY_FLAG_MASK != 0
    }

    pub fn compact(&self) -> bool {
        self.flags & COMPACT_FLAG_MASK != 0
    }

    pub fn out_of_order(&self) -> bool {
        self.flags & OUT_OF_ORDER_FLAG_MASK != 0
    }

    /// Decode and validate the common header, then check that `bytes`
    /// covers the whole declared image.
    pub fn decode(bytes: &[u8]) -> Result<Preamble, Error> {
        if bytes.len() < 8 {
            return Err(Error::insufficient_data(format!(
                "sketch image shorter than the 8-byte header: {}",
                bytes.len()
            )));
        }

        let family = bytes[FAMILY_BYTE];
        if family != HLL_FAMILY_ID {
            return Err(Error::invalid_family(HLL_FAMILY_ID, family));
        }

        let ser_ver = bytes[SER_VER_BYTE];
        if ser_ver != SER_VER {
            return Err(Error::unsupported_serial_version(SER_VER, ser_ver));
        }

        let lg_config_k = bytes[LG_K_BYTE];
        check_lg_config_k(lg_config_k)
            .map_err(|e| Error::format(format!("corrupt image: {}", e.message())))?;

        let mode_byte = bytes[MODE_BYTE];
        let cur_mode = CurMode::from_code(extract_cur_mode(mode_byte))
            .ok_or_else(|| Error::format(format!("invalid mode code: {}", mode_byte & 0x3)))?;
        let hll_type = HllType::from_code(extract_tgt_hll_type(mode_byte)).ok_or_else(|| {
            Error::format(format!("invalid HLL type code: {}", (mode_byte >> 2) & 0x3))
        })?;

        let preamble_ints = bytes[PREAMBLE_INTS_BYTE];
        let expected_preints = preints_for_mode(cur_mode);
        if preamble_ints != expected_preints {
            return Err(Error::format(format!(
                "preamble ints: expected {expected_preints} for {cur_mode:?} mode, got {preamble_ints}"
            )));
        }

        let pre = Preamble {
            preamble_ints,
            lg_config_k,
            lg_arr: bytes[LG_ARR_BYTE],
            flags: bytes[FLAGS_BYTE],
            cur_mode,
            hll_type,
        };

        let declared = pre.image_bytes(bytes)?;
        if bytes.len() < declared {
            return Err(Error::insufficient_data(format!(
                "image declares {declared} bytes, buffer holds {}",
                bytes.len()
            )));
        }

        Ok(pre)
    }

    /// Total image length declared by this header, reading the count fields
    /// it refers to out of `bytes`.
    pub fn image_bytes(&self, bytes: &[u8]) -> Result<usize, Error> {
        match self.cur_mode {
            CurMode::List => {
                let count = bytes[LIST_COUNT_BYTE] as usize;
                let slots = if self.compact() {
                    count
                } else {
                    1usize << self.lg_arr
                };
                Ok(LIST_INT_ARR_START + slots * COUPON_SIZE_BYTES)
            }
            CurMode::Set => {
                if bytes.len() < SET_INT_ARR_START {
                    return Err(Error::insufficient_data("SET image header"));
                }
                let count = read_u32_le(bytes, SET_COUNT_INT) as usize;
                let slots = if self.compact() {
                    count
                } else {
                    1usize << self.lg_arr
                };
                Ok(SET_INT_ARR_START + slots * COUPON_SIZE_BYTES)
            }
            CurMode::Hll => {
                if bytes.len() < HLL_PREAMBLE_SIZE {
                    return Err(Error::insufficient_data("HLL image preamble"));
                }
                let arr = hll_arr_bytes(self.lg_config_k, self.hll_type);
                let aux = if self.hll_type == HllType::Hll4 {
                    let aux_count = read_u32_le(bytes, AUX_COUNT_INT) as usize;
                    if self.compact() {
                        aux_count * COUPON_SIZE_BYTES
                    } else if self.lg_arr > 0 {
                        (1usize << self.lg_arr) * COUPON_SIZE_BYTES
                    } else if aux_count > 0 {
                        return Err(Error::format(
                            "updatable HLL_4 image declares aux entries without a table size",
                        ));
                    } else {
                        0
                    }
                } else {
                    0
                };
                Ok(HLL_PREAMBLE_SIZE + arr + aux)
            }
        }
    }
}

/// Write the common 8-byte header into `bytes`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn write_common_header(
    bytes: &mut [u8],
    cur_mode: CurMode,
    hll_type: HllType,
    lg_config_k: u8,
    lg_arr: u8,
    flags: u8,
    byte6: u8,
) {
    bytes[PREAMBLE_INTS_BYTE] = preints_for_mode(cur_mode);
    bytes[SER_VER_BYTE] = SER_VER;
    bytes[FAMILY_BYTE] = HLL_FAMILY_ID;
    bytes[LG_K_BYTE] = lg_config_k;
    bytes[LG_ARR_BYTE] = lg_arr;
    bytes[FLAGS_BYTE] = flags;
    bytes[LIST_COUNT_BYTE] = byte6;
    bytes[MODE_BYTE] = encode_mode_byte(cur_mode, hll_type);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn list_header(flags: u8, count: u8) -> [u8; 8] {
        let mut bytes = [0u8; 8];
        write_common_header(
            &mut bytes,
            CurMode::List,
            HllType::Hll8,
            10,
            crate::hll::LG_LIST_SIZE,
            flags,
            count,
        );
        bytes
    }

    #[test]
    fn test_header_round_trip() {
        let bytes = list_header(EMPTY_FLAG_MASK | COMPACT_FLAG_MASK, 0);
        let pre = Preamble::decode(&bytes).unwrap();
        assert_eq!(pre.lg_config_k, 10);
        assert_eq!(pre.cur_mode, CurMode::List);
        assert_eq!(pre.hll_type, HllType::Hll8);
        assert!(pre.empty());
        assert!(pre.compact());
        assert!(!pre.out_of_order());
    }

    #[test]
    fn test_rejects_bad_family() {
        let mut bytes = list_header(COMPACT_FLAG_MASK, 0);
        bytes[FAMILY_BYTE] = 16;
        let err = Preamble::decode(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(err.message().contains("family"));
    }

    #[test]
    fn test_rejects_bad_version() {
        let mut bytes = list_header(COMPACT_FLAG_MASK, 0);
        bytes[SER_VER_BYTE] = 9;
        let err = Preamble::decode(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(err.message().contains("serial version"));
    }

    #[test]
    fn test_rejects_bad_lg_k() {
        let mut bytes = list_header(COMPACT_FLAG_MASK, 0);
        bytes[LG_K_BYTE] = 22;
        let err = Preamble::decode(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn test_rejects_truncated_payload() {
        // Compact LIST with 3 coupons declared but none present.
        let bytes = list_header(COMPACT_FLAG_MASK, 3);
        let err = Preamble::decode(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(err.message().contains("insufficient"));
    }

    #[test]
    fn test_rejects_mismatched_preints() {
        let mut bytes = list_header(COMPACT_FLAG_MASK, 0);
        bytes[PREAMBLE_INTS_BYTE] = HLL_PREINTS;
        let err = Preamble::decode(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(err.message().contains("preamble ints"));
    }

    #[test]
    fn test_arr_bytes() {
        assert_eq!(hll4_arr_bytes(4), 8);
        assert_eq!(hll6_arr_bytes(4), 13); // 12 + guard byte
        assert_eq!(hll8_arr_bytes(4), 16);
        assert_eq!(hll4_arr_bytes(12), 2048);
        assert_eq!(hll6_arr_bytes(12), 3073);
        assert_eq!(hll8_arr_bytes(12), 4096);
    }
}
