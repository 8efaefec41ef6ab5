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

//! Byte-buffer interface backing direct (off-heap) sketch images.
//!
//! Provides indexed little-endian reads and writes over a caller-owned byte
//! region. Two backings exist: a shared borrow for read-only wraps and an
//! exclusive borrow for updatable images. Every mutating accessor fails with
//! a [`Mode`](crate::ErrorKind::Mode) error on the read-only backing; reads
//! work on both. Offsets are validated against capacity at sketch
//! construction, so the accessors index directly.

use byteorder::ByteOrder;
use byteorder::LE;

use crate::error::Error;

/// A caller-owned byte region viewed through little-endian accessors.
#[derive(Debug)]
pub(crate) struct SketchBuffer<'a> {
    backing: Backing<'a>,
}

#[derive(Debug)]
enum Backing<'a> {
    ReadOnly(&'a [u8]),
    Writable(&'a mut [u8]),
}

impl<'a> SketchBuffer<'a> {
    /// Wrap a region read-only.
    pub fn read_only(region: &'a [u8]) -> Self {
        Self {
            backing: Backing::ReadOnly(region),
        }
    }

    /// Wrap a region for in-place mutation.
    pub fn writable(region: &'a mut [u8]) -> Self {
        Self {
            backing: Backing::Writable(region),
        }
    }

    pub fn capacity(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self.backing, Backing::ReadOnly(_))
    }

    /// Shared view of the whole region.
    pub fn bytes(&self) -> &[u8] {
        match &self.backing {
            Backing::ReadOnly(region) => region,
            Backing::Writable(region) => region,
        }
    }

    fn bytes_mut(&mut self) -> Result<&mut [u8], Error> {
        match &mut self.backing {
            Backing::ReadOnly(_) => Err(Error::read_only("write to read-only sketch buffer")),
            Backing::Writable(region) => Ok(region),
        }
    }

    pub fn get_u8(&self, offset: usize) -> u8 {
        self.bytes()[offset]
    }

    pub fn get_u16(&self, offset: usize) -> u16 {
        LE::read_u16(&self.bytes()[offset..offset + 2])
    }

    pub fn get_u32(&self, offset: usize) -> u32 {
        LE::read_u32(&self.bytes()[offset..offset + 4])
    }

    pub fn get_f64(&self, offset: usize) -> f64 {
        LE::read_f64(&self.bytes()[offset..offset + 8])
    }

    pub fn put_u8(&mut self, offset: usize, value: u8) -> Result<(), Error> {
        self.bytes_mut()?[offset] = value;
        Ok(())
    }

    pub fn put_u16(&mut self, offset: usize, value: u16) -> Result<(), Error> {
        LE::write_u16(&mut self.bytes_mut()?[offset..offset + 2], value);
        Ok(())
    }

    pub fn put_u32(&mut self, offset: usize, value: u32) -> Result<(), Error> {
        LE::write_u32(&mut self.bytes_mut()?[offset..offset + 4], value);
        Ok(())
    }

    pub fn put_f64(&mut self, offset: usize, value: f64) -> Result<(), Error> {
        LE::write_f64(&mut self.bytes_mut()?[offset..offset + 8], value);
        Ok(())
    }

    /// Zero `len` bytes starting at `offset`.
    pub fn clear(&mut self, offset: usize, len: usize) -> Result<(), Error> {
        self.bytes_mut()?[offset..offset + len].fill(0);
        Ok(())
    }

    /// Bulk copy into the region.
    pub fn put_bytes(&mut self, offset: usize, src: &[u8]) -> Result<(), Error> {
        self.bytes_mut()?[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }
}
