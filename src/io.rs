//! The I/O boundary the core consumes.
//!
//! File I/O, archive iteration, and command-line handling are external
//! collaborators. This module defines the narrow traits the core calls
//! into; a host binds them to real files, archives, and argv.
//!
//! `BlobReader` is a cheaply-`Copy`, lifetime-bound handle to bytes, read
//! at an offset.

use crate::pod::{from_bytes, slice_from_bytes, Pod};
use core::mem;

/// A cheaply-clonable view over the bytes of one input file.
pub trait BlobReader<'data>: 'data + Clone + Copy {
    fn len(self) -> core::result::Result<usize, ()>;

    fn read_bytes_at(self, offset: usize, size: usize) -> core::result::Result<&'data [u8], ()>;

    fn read_bytes(
        self,
        offset: &mut usize,
        size: usize,
    ) -> core::result::Result<&'data [u8], ()> {
        let bytes = self.read_bytes_at(*offset, size)?;
        *offset = offset.wrapping_add(size);
        Ok(bytes)
    }

    fn read<T: Pod>(self, offset: &mut usize) -> core::result::Result<&'data T, ()> {
        let size = mem::size_of::<T>();
        let bytes = self.read_bytes(offset, size)?;
        let (t, _) = from_bytes(bytes)?;
        Ok(t)
    }

    fn read_at<T: Pod>(self, mut offset: usize) -> core::result::Result<&'data T, ()> {
        self.read(&mut offset)
    }

    fn read_slice<T: Pod>(
        self,
        offset: &mut usize,
        count: usize,
    ) -> core::result::Result<&'data [T], ()> {
        let size = count.checked_mul(mem::size_of::<T>()).ok_or(())?;
        let bytes = self.read_bytes(offset, size)?;
        let (t, _) = slice_from_bytes(bytes, count)?;
        Ok(t)
    }

    fn read_slice_at<T: Pod>(
        self,
        mut offset: usize,
        count: usize,
    ) -> core::result::Result<&'data [T], ()> {
        self.read_slice(&mut offset, count)
    }
}

impl<'data> BlobReader<'data> for &'data [u8] {
    fn len(self) -> core::result::Result<usize, ()> {
        Ok(<[u8]>::len(self))
    }

    fn read_bytes_at(self, offset: usize, size: usize) -> core::result::Result<&'data [u8], ()> {
        self.get(offset..).ok_or(())?.get(..size).ok_or(())
    }
}

/// The output sink the final link pass (C13) writes into: bytes at an
/// offset, with no assumption about whether writes are sequential.
pub trait BlobWriter {
    /// Reserve room for `size` total bytes; called once up front, after
    /// sizing is complete and before any `write_at` call.
    fn reserve(&mut self, size: usize) -> core::result::Result<(), ()>;

    fn write_at(&mut self, offset: usize, data: &[u8]) -> core::result::Result<(), ()>;
}

/// An in-memory `BlobWriter`, used by tests and by hosts that buffer the
/// whole output image before a single `pwrite`.
#[derive(Debug, Default)]
pub struct VecWriter {
    pub data: Vec<u8>,
}

impl BlobWriter for VecWriter {
    fn reserve(&mut self, size: usize) -> core::result::Result<(), ()> {
        if self.data.len() < size {
            self.data.resize(size, 0);
        }
        Ok(())
    }

    fn write_at(&mut self, offset: usize, data: &[u8]) -> core::result::Result<(), ()> {
        let end = offset.checked_add(data.len()).ok_or(())?;
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[offset..end].copy_from_slice(data);
        Ok(())
    }
}

/// One member of an archive, as handed to the core by the (out-of-scope)
/// `ar` iterator.
pub struct ArchiveMember<'data> {
    pub name: String,
    pub data: &'data [u8],
}

/// The archive-member iterator the core consumes.
pub trait ArchiveMembers<'data> {
    fn next_member(&mut self) -> core::result::Result<Option<ArchiveMember<'data>>, crate::error::Error>;
}

impl<'data> ArchiveMembers<'data> for core::slice::Iter<'data, ArchiveMember<'data>> {
    fn next_member(
        &mut self,
    ) -> core::result::Result<Option<ArchiveMember<'data>>, crate::error::Error> {
        Ok(self.next().map(|m| ArchiveMember {
            name: m.name.clone(),
            data: m.data,
        }))
    }
}
