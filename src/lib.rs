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

//! # cardsketch
//!
//! Probabilistic cardinality estimation built on the HyperLogLog family of
//! sketches. A sketch answers "approximately how many distinct items have
//! been inserted?" in sub-linear space, and two sketches can be merged to
//! estimate the cardinality of their set union.
//!
//! The primary entry points are [`HllSketch`] for building estimates on the
//! heap, [`DirectHllSketch`] for sketches that live entirely inside a
//! caller-owned byte buffer, and [`HllUnion`] for merging.
//!
//! ```rust
//! # use cardsketch::{HllSketch, HllType, NumStdDev};
//! let mut sketch = HllSketch::new(12, HllType::Hll8).unwrap();
//! for i in 0..10_000u64 {
//!     sketch.update(i);
//! }
//! let estimate = sketch.estimate();
//! assert!(sketch.lower_bound(NumStdDev::Two) <= estimate);
//! assert!(estimate <= sketch.upper_bound(NumStdDev::Two));
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]

pub mod common;
pub mod error;
pub mod hll;

pub(crate) mod buffer;
pub(crate) mod hash;

pub use self::common::NumStdDev;
pub use self::error::Error;
pub use self::error::ErrorKind;
pub use self::hll::CurMode;
pub use self::hll::DirectHllSketch;
pub use self::hll::HllSketch;
pub use self::hll::HllType;
pub use self::hll::HllUnion;
