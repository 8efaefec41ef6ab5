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

//! The tagged payload variant behind a sketch.
//!
//! Promotion replaces the variant wholesale; nothing mutates through a
//! representation pointer. The coupon modes remember the target encoding
//! the sketch was configured with so promotion knows which array to build.

use crate::hll::HllType;
use crate::hll::array4::Hll4Array;
use crate::hll::array6::Hll6Array;
use crate::hll::array8::Hll8Array;
use crate::hll::list::CouponList;
use crate::hll::set::CouponSet;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Mode {
    List {
        list: CouponList,
        hll_type: HllType,
    },
    Set {
        set: CouponSet,
        hll_type: HllType,
    },
    Hll4(Hll4Array),
    Hll6(Hll6Array),
    Hll8(Hll8Array),
}
