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

//! Cardinality estimators for the HLL register arrays.
//!
//! Two estimators are maintained side by side. The HIP (Historic Inverse
//! Probability) accumulator is updated online on every register change and
//! is the default estimate while updates arrive in order; each increment
//! depends on arrival order, so two sketches holding the same multiset
//! may disagree in it. The composite estimator derives the estimate
//! from the KxQ registers alone (the standard HyperLogLog formula with a
//! small-range linear-counting correction) and is used once a sketch is
//! out-of-order, i.e. after a merge or after heapifying an image whose
//! out-of-order flag is set. Large-range correction is unnecessary because
//! 64-bit hashes preclude register overflow.

use crate::common::NumStdDev;

/// Relative standard error of the exact coupon modes, taken at the
/// transition point rather than the asymptote.
const COUPON_RSE_FACTOR: f64 = 0.409;
pub(crate) const COUPON_RSE: f64 = COUPON_RSE_FACTOR / (1 << 13) as f64;

/// HIP estimator with KxQ registers.
///
/// This struct encapsulates all estimation-related state and logic,
/// allowing it to be composed into the three register-array encodings.
/// The KxQ sum is split into two buckets for numerical precision:
/// `kxq0` accumulates `2^-v` for register values below 32 and `kxq1` the
/// tiny inverse powers for values of 32 and above.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct HipEstimator {
    hip_accum: f64,
    kxq0: f64,
    kxq1: f64,
    /// When set, HIP updates are skipped and estimates come from the
    /// composite estimator.
    out_of_order: bool,
}

impl HipEstimator {
    /// Create an estimator for a sketch with 2^lg_config_k registers, all
    /// at zero (so `kxq0` starts at K).
    pub fn new(lg_config_k: u8) -> Self {
        Self {
            hip_accum: 0.0,
            kxq0: (1u64 << lg_config_k) as f64,
            kxq1: 0.0,
            out_of_order: false,
        }
    }

    /// Account for a register changing from `old_value` to `new_value`.
    ///
    /// Called before the register itself is rewritten. The HIP increment
    /// uses the KxQ state from before the change; the KxQ registers are
    /// then adjusted unconditionally, keeping the composite estimator
    /// valid even while out-of-order.
    pub fn update(&mut self, lg_config_k: u8, old_value: u8, new_value: u8) {
        if !self.out_of_order {
            let k = (1u64 << lg_config_k) as f64;
            self.hip_accum += k / (self.kxq0 + self.kxq1);
        }

        if old_value < 32 {
            self.kxq0 -= inv_pow2(old_value);
        } else {
            self.kxq1 -= inv_pow2(old_value);
        }
        if new_value < 32 {
            self.kxq0 += inv_pow2(new_value);
        } else {
            self.kxq1 += inv_pow2(new_value);
        }
    }

    /// Current estimate: HIP while in order, composite otherwise.
    pub fn estimate(&self, lg_config_k: u8, cur_min: u8, num_at_cur_min: u32) -> f64 {
        if self.out_of_order {
            self.composite_estimate(lg_config_k, cur_min, num_at_cur_min)
        } else {
            self.hip_accum
        }
    }

    /// The composite estimate, independent of update order.
    pub fn composite_estimate(&self, lg_config_k: u8, cur_min: u8, num_at_cur_min: u32) -> f64 {
        composite_estimate(lg_config_k, cur_min, num_at_cur_min, self.kxq0, self.kxq1)
    }

    pub fn upper_bound(
        &self,
        lg_config_k: u8,
        cur_min: u8,
        num_at_cur_min: u32,
        num_std_dev: NumStdDev,
    ) -> f64 {
        let estimate = self.estimate(lg_config_k, cur_min, num_at_cur_min);
        // The relative error is negative for upper bounds, so (1 + rse) < 1
        // and the bound exceeds the estimate.
        estimate / (1.0 + rel_err(lg_config_k, true, self.out_of_order, num_std_dev))
    }

    pub fn lower_bound(
        &self,
        lg_config_k: u8,
        cur_min: u8,
        num_at_cur_min: u32,
        num_std_dev: NumStdDev,
    ) -> f64 {
        let estimate = self.estimate(lg_config_k, cur_min, num_at_cur_min);
        estimate / (1.0 + rel_err(lg_config_k, false, self.out_of_order, num_std_dev))
    }

    pub fn hip_accum(&self) -> f64 {
        self.hip_accum
    }

    pub fn kxq0(&self) -> f64 {
        self.kxq0
    }

    pub fn kxq1(&self) -> f64 {
        self.kxq1
    }

    pub fn is_out_of_order(&self) -> bool {
        self.out_of_order
    }

    /// Mark the estimator out-of-order (after a merge, or when heapifying
    /// an image with the flag set). The HIP accumulator is invalidated.
    pub fn set_out_of_order(&mut self, ooo: bool) {
        self.out_of_order = ooo;
        if ooo {
            self.hip_accum = 0.0;
        }
    }

    pub fn set_hip_accum(&mut self, value: f64) {
        self.hip_accum = value;
    }

    pub fn set_kxq0(&mut self, value: f64) {
        self.kxq0 = value;
    }

    pub fn set_kxq1(&mut self, value: f64) {
        self.kxq1 = value;
    }

    /// Recompute the KxQ registers from a full register scan and mark the
    /// estimator out-of-order. Used after bulk merges.
    pub fn rebuild_from_registers(&mut self, values: impl Iterator<Item = u8>) {
        let mut kxq0 = 0.0;
        let mut kxq1 = 0.0;
        for value in values {
            if value < 32 {
                kxq0 += inv_pow2(value);
            } else {
                kxq1 += inv_pow2(value);
            }
        }
        self.kxq0 = kxq0;
        self.kxq1 = kxq1;
        self.set_out_of_order(true);
    }
}

/// Compute 1 / 2^value.
#[inline]
pub(crate) fn inv_pow2(value: u8) -> f64 {
    if value <= 63 {
        1.0 / (1u64 << value) as f64
    } else {
        f64::exp2(-(value as f64))
    }
}

fn alpha(lg_config_k: u8) -> f64 {
    let k = (1u64 << lg_config_k) as f64;
    match lg_config_k {
        4 => 0.673,
        5 => 0.697,
        6 => 0.709,
        _ => 0.7213 / (1.0 + 1.079 / k),
    }
}

/// The standard HyperLogLog estimator with small-range correction:
/// `alpha(K) * K^2 / (kxq0 + kxq1)`, switching to linear counting
/// `K * ln(K / numZeros)` when the raw estimate is below 2.5K and zero
/// registers remain. In HLL_4 the zero-register count is only meaningful
/// while `cur_min` is 0; once `cur_min` has risen every register has been
/// hit and no correction applies.
pub(crate) fn composite_estimate(
    lg_config_k: u8,
    cur_min: u8,
    num_at_cur_min: u32,
    kxq0: f64,
    kxq1: f64,
) -> f64 {
    let k = (1u64 << lg_config_k) as f64;
    let raw = alpha(lg_config_k) * k * k / (kxq0 + kxq1);

    let num_zeros = if cur_min == 0 { num_at_cur_min } else { 0 };
    if raw < 2.5 * k && num_zeros > 0 {
        return k * (k / num_zeros as f64).ln();
    }
    raw
}

/// Upper bound of the exact coupon-mode estimate.
pub(crate) fn coupon_upper_bound(count: usize, num_std_dev: NumStdDev) -> f64 {
    let rse = -(num_std_dev.as_u8() as f64) * COUPON_RSE;
    count as f64 / (1.0 + rse)
}

/// Lower bound of the exact coupon-mode estimate.
pub(crate) fn coupon_lower_bound(count: usize, num_std_dev: NumStdDev) -> f64 {
    let rse = (num_std_dev.as_u8() as f64) * COUPON_RSE;
    count as f64 / (1.0 + rse)
}

/// Relative error of the HLL estimate for the requested bound.
///
/// For lg_config_k above 12 the analytical formula applies, with the RSE
/// factor sqrt(ln 2) for the HIP estimator and sqrt(3 ln 2 - 1) for the
/// composite (out-of-order) estimator. At and below 12 the empirically
/// measured quantile tables are used.
pub(crate) fn rel_err(lg_config_k: u8, upper_bound: bool, ooo: bool, num_std_dev: NumStdDev) -> f64 {
    if lg_config_k > 12 {
        let rse_factor = if ooo { 1.03896 } else { 0.8325546 };
        let k = (1u64 << lg_config_k) as f64;
        let sign = if upper_bound { -1.0 } else { 1.0 };
        return sign * (num_std_dev.as_u8() as f64) * rse_factor / k.sqrt();
    }

    // Tables are indexed by ((lg_k - 4) * 3) + (num_std_dev - 1).
    let idx = ((lg_config_k as usize) - 4) * 3 + ((num_std_dev.as_u8() as usize) - 1);
    match (ooo, upper_bound) {
        (false, false) => HIP_LB[idx],
        (false, true) => HIP_UB[idx],
        (true, false) => NON_HIP_LB[idx],
        (true, true) => NON_HIP_UB[idx],
    }
}

// Empirically measured relative-error quantiles, lg_k 4-12 by std dev 1-3.

/// HIP (in-order) lower-bound errors: Q(.84134), Q(.97725), Q(.99865).
const HIP_LB: [f64; 27] = [
    0.207316195,
    0.502865572,
    0.882303765, //4
    0.146981579,
    0.335426881,
    0.557052, //5
    0.104026721,
    0.227683872,
    0.365888317, //6
    0.073614601,
    0.156781585,
    0.245740374, //7
    0.05205248,
    0.108783763,
    0.168030442, //8
    0.036770852,
    0.075727545,
    0.11593785, //9
    0.025990219,
    0.053145536,
    0.080772263, //10
    0.018373987,
    0.037266176,
    0.056271814, //11
    0.012936253,
    0.02613829,
    0.039387631, //12
];

/// HIP (in-order) upper-bound errors: Q(.15866), Q(.02275), Q(.00135).
const HIP_UB: [f64; 27] = [
    -0.207805347,
    -0.355574279,
    -0.475535095, //4
    -0.146988328,
    -0.262390832,
    -0.360864026, //5
    -0.103877775,
    -0.191503663,
    -0.269311582, //6
    -0.073452978,
    -0.138513438,
    -0.198487447, //7
    -0.051982806,
    -0.099703123,
    -0.144128618, //8
    -0.036768609,
    -0.07138158,
    -0.104430324, //9
    -0.025991325,
    -0.050854296,
    -0.0748143, //10
    -0.01834533,
    -0.036121138,
    -0.05327616, //11
    -0.012920332,
    -0.025572893,
    -0.037896952, //12
];

/// Non-HIP (out-of-order) lower-bound errors: Q(.84134), Q(.97725), Q(.99865).
const NON_HIP_LB: [f64; 27] = [
    0.254409839,
    0.682266712,
    1.304022158, //4
    0.181817353,
    0.443389054,
    0.778776219, //5
    0.129432281,
    0.295782195,
    0.49252279, //6
    0.091640655,
    0.201175925,
    0.323664385, //7
    0.064858051,
    0.138523393,
    0.218805328, //8
    0.045851855,
    0.095925072,
    0.148635751, //9
    0.032454144,
    0.067009668,
    0.102660669, //10
    0.022921382,
    0.046868565,
    0.071307398, //11
    0.016155679,
    0.032825719,
    0.049677541, //12
];

/// Non-HIP (out-of-order) upper-bound errors: Q(.15866), Q(.02275), Q(.00135).
const NON_HIP_UB: [f64; 27] = [
    -0.256980172,
    -0.411905944,
    -0.52651057, //4
    -0.182332109,
    -0.310275547,
    -0.412660505, //5
    -0.129314228,
    -0.230142294,
    -0.315636197, //6
    -0.091584836,
    -0.16834013,
    -0.236346847, //7
    -0.06487411,
    -0.122045231,
    -0.174112107, //8
    -0.04591465,
    -0.08784505,
    -0.126917615, //9
    -0.032433119,
    -0.062897613,
    -0.091862929, //10
    -0.022960633,
    -0.044875401,
    -0.065736049, //11
    -0.016186662,
    -0.031827816,
    -0.046973459, //12
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimator_initialization() {
        let est = HipEstimator::new(10);
        assert_eq!(est.hip_accum(), 0.0);
        assert_eq!(est.kxq0(), 1024.0);
        assert_eq!(est.kxq1(), 0.0);
        assert!(!est.is_out_of_order());
    }

    #[test]
    fn test_update_moves_hip_and_kxq() {
        let mut est = HipEstimator::new(8);

        est.update(8, 0, 10);
        // First increment is exactly K / K = 1.
        assert!((est.hip_accum() - 1.0).abs() < 1e-12);
        assert!(est.kxq0() < 256.0);
        assert_eq!(est.kxq1(), 0.0);
    }

    #[test]
    fn test_kxq_bucket_split() {
        let mut est = HipEstimator::new(8);

        est.update(8, 0, 10);
        let kxq0_low = est.kxq0();

        // Crossing the 32 boundary moves mass between the buckets.
        est.update(8, 10, 50);
        assert!(est.kxq0() < kxq0_low);
        assert!(est.kxq1() > 0.0);
        assert!(est.kxq1() < 1e-10);
    }

    #[test]
    fn test_out_of_order_switches_to_composite() {
        let mut est = HipEstimator::new(10);

        est.update(10, 0, 5);
        assert!(est.hip_accum() > 0.0);

        est.set_out_of_order(true);
        assert!(est.is_out_of_order());
        assert_eq!(est.hip_accum(), 0.0);

        // Updates while out-of-order keep KxQ current but leave HIP alone.
        let kxq0_before = est.kxq0();
        est.update(10, 5, 9);
        assert_eq!(est.hip_accum(), 0.0);
        assert_ne!(est.kxq0(), kxq0_before);
        assert_eq!(
            est.estimate(10, 0, 1023),
            est.composite_estimate(10, 0, 1023)
        );
    }

    #[test]
    fn test_composite_empty_is_zero() {
        // All K registers at zero: linear counting over K zeros gives 0.
        let k = 1u64 << 10;
        let est = composite_estimate(10, 0, k as u32, k as f64, 0.0);
        assert_eq!(est, 0.0);
    }

    #[test]
    fn test_composite_small_range_uses_linear_counting() {
        // One register hit at value 1: kxq0 = (k - 1) + 1/2.
        let k = 1u64 << 10;
        let kxq0 = (k - 1) as f64 + 0.5;
        let est = composite_estimate(10, 0, (k - 1) as u32, kxq0, 0.0);
        let expected = k as f64 * (k as f64 / (k - 1) as f64).ln();
        assert!((est - expected).abs() < 1e-9);
        // Close to 1 for a single hit.
        assert!((est - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_composite_no_zeros_skips_correction() {
        // Every register at 1: kxq = k/2, raw = alpha * 2k, below 2.5k, but
        // no zero registers remain so the raw estimate stands.
        let k = (1u64 << 10) as f64;
        let est = composite_estimate(10, 1, 1024, k / 2.0, 0.0);
        let raw = alpha(10) * k * k / (k / 2.0);
        assert_eq!(est, raw);
    }

    #[test]
    fn test_rel_err_signs_and_widening() {
        for &ooo in &[false, true] {
            for lg_k in [4u8, 8, 12, 16, 21] {
                let ub1 = rel_err(lg_k, true, ooo, NumStdDev::One);
                let ub2 = rel_err(lg_k, true, ooo, NumStdDev::Two);
                let lb1 = rel_err(lg_k, false, ooo, NumStdDev::One);
                let lb2 = rel_err(lg_k, false, ooo, NumStdDev::Two);
                assert!(ub1 < 0.0 && ub2 < ub1, "lg_k={lg_k} ooo={ooo}");
                assert!(lb1 > 0.0 && lb2 > lb1, "lg_k={lg_k} ooo={ooo}");
            }
        }
    }

    #[test]
    fn test_coupon_bounds_bracket_count() {
        for count in [0usize, 1, 9, 500] {
            let lb = coupon_lower_bound(count, NumStdDev::Three);
            let ub = coupon_upper_bound(count, NumStdDev::Three);
            assert!(lb <= count as f64);
            assert!(count as f64 <= ub);
        }
    }

    #[test]
    fn test_rebuild_from_registers() {
        let mut est = HipEstimator::new(4);
        let regs = [0u8, 1, 2, 40, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        est.rebuild_from_registers(regs.iter().copied());

        let expected_kxq0 = 13.0 + 0.5 + 0.25;
        assert!((est.kxq0() - expected_kxq0).abs() < 1e-12);
        assert!((est.kxq1() - inv_pow2(40)).abs() < 1e-20);
        assert!(est.is_out_of_order());
    }
}
