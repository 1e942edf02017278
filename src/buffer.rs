//! Kernel buffer handles: dma-buf planes, buffers and fixed-size pools.
//!
//! A [`Plane`] owns one dma-buf file descriptor and maps it for CPU access
//! on first use. A [`FrameBuffer`] is the indivisible unit the pipeline
//! moves between the free queues, the kernel and the per-frame ledger; its
//! `index` is its slot in the owning [`BufferPool`] and the only identity
//! the kernel and the IPA share.

use std::ptr::NonNull;

use rustix::fd::{AsFd, BorrowedFd, OwnedFd};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use smallvec::SmallVec;

use crate::error::{Error, Result};

/// An owned mapping of a single dma-buf file descriptor.
///
/// The CPU mapping is acquired lazily on the first [`mem`](Self::mem) call
/// and released when the plane is dropped.
#[derive(Debug)]
pub struct Plane {
    fd: OwnedFd,
    len: usize,
    map: Option<PlaneMapping>,
}

#[derive(Debug)]
struct PlaneMapping {
    ptr: NonNull<u8>,
    len: usize,
}

impl Drop for PlaneMapping {
    fn drop(&mut self) {
        // SAFETY: ptr/len come from a successful mmap of the same length.
        unsafe {
            let _ = munmap(self.ptr.as_ptr().cast(), self.len);
        }
    }
}

impl Plane {
    /// Bind a dma-buf fd to a new plane.
    ///
    /// `len` is the size of the buffer behind the fd and must be non-zero.
    pub fn new(fd: OwnedFd, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(Error::InvalidPlane("zero-length dma-buf".into()));
        }

        Ok(Self { fd, len, map: None })
    }

    /// Get a borrowed reference to the dma-buf fd.
    #[inline]
    pub fn fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    /// Length of the buffer in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check whether the plane has zero length. Always false for a
    /// successfully constructed plane.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Check whether the CPU mapping has been acquired.
    #[inline]
    pub fn is_mapped(&self) -> bool {
        self.map.is_some()
    }

    /// Get the plane contents, mapping the fd on first access.
    pub fn mem(&mut self) -> Result<&mut [u8]> {
        if self.map.is_none() {
            let ptr = unsafe {
                mmap(
                    std::ptr::null_mut(),
                    self.len,
                    ProtFlags::READ | ProtFlags::WRITE,
                    MapFlags::SHARED,
                    &self.fd,
                    0,
                )?
            };

            let ptr = NonNull::new(ptr.cast::<u8>())
                .ok_or_else(|| Error::InvalidPlane("mmap returned null".into()))?;

            self.map = Some(PlaneMapping { ptr, len: self.len });
        }

        let map = self.map.as_ref().unwrap();
        // SAFETY: the mapping is valid for len bytes and exclusively borrowed
        // through &mut self.
        Ok(unsafe { std::slice::from_raw_parts_mut(map.ptr.as_ptr(), map.len) })
    }
}

/// A kernel buffer: a pool slot index plus its memory planes.
#[derive(Debug)]
pub struct FrameBuffer {
    index: u32,
    planes: SmallVec<[Plane; 3]>,
}

impl FrameBuffer {
    /// Create a buffer for the given pool slot, with no planes bound yet.
    pub fn new(index: u32) -> Self {
        Self {
            index,
            planes: SmallVec::new(),
        }
    }

    /// The buffer's slot in its owning pool.
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The memory planes bound to this buffer.
    #[inline]
    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    /// Mutable access to the memory planes.
    #[inline]
    pub fn planes_mut(&mut self) -> &mut [Plane] {
        &mut self.planes
    }

    /// Bind a plane to this buffer. Planes keep their binding order.
    pub fn push_plane(&mut self, plane: Plane) {
        self.planes.push(plane);
    }
}

/// A fixed-count registry of kernel buffers.
///
/// The pool only tracks indices and fds; the backing memory is allocated by
/// the video device when it exports or imports the pool's buffers. During
/// streaming each buffer is in exactly one place: a free queue, the kernel,
/// or bound to an in-flight frame.
#[derive(Debug, Default)]
pub struct BufferPool {
    buffers: Vec<FrameBuffer>,
}

impl BufferPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate the pool with `count` buffers, indices `0..count`.
    ///
    /// Any previous contents are dropped.
    pub fn create(&mut self, count: u32) {
        self.buffers = (0..count).map(FrameBuffer::new).collect();
    }

    /// Drop all buffers, unmapping any mapped planes.
    pub fn destroy(&mut self) {
        self.buffers.clear();
    }

    /// Number of buffers in the pool.
    pub fn count(&self) -> u32 {
        self.buffers.len() as u32
    }

    /// Check whether the pool holds no buffers.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Get a buffer by slot index.
    pub fn get(&self, index: u32) -> Option<&FrameBuffer> {
        self.buffers.get(index as usize)
    }

    /// Get a mutable buffer by slot index.
    pub fn get_mut(&mut self, index: u32) -> Option<&mut FrameBuffer> {
        self.buffers.get_mut(index as usize)
    }

    /// Iterate over the buffers in slot order.
    pub fn buffers(&self) -> impl Iterator<Item = &FrameBuffer> {
        self.buffers.iter()
    }

    /// Iterate mutably over the buffers in slot order.
    pub fn buffers_mut(&mut self) -> impl Iterator<Item = &mut FrameBuffer> {
        self.buffers.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // memfd stands in for a dma-buf fd; real dma-bufs need a device driver
    // but the mapping path is identical.
    fn memfd_plane(len: usize) -> Plane {
        let fd = rustix::fs::memfd_create("plane", rustix::fs::MemfdFlags::CLOEXEC).unwrap();
        rustix::fs::ftruncate(&fd, len as u64).unwrap();
        Plane::new(fd, len).unwrap()
    }

    #[test]
    fn test_plane_rejects_zero_length() {
        let fd = rustix::fs::memfd_create("empty", rustix::fs::MemfdFlags::CLOEXEC).unwrap();
        assert!(matches!(Plane::new(fd, 0), Err(Error::InvalidPlane(_))));
    }

    #[test]
    fn test_plane_lazy_mapping() {
        let mut plane = memfd_plane(4096);
        assert!(!plane.is_mapped());
        assert_eq!(plane.len(), 4096);

        plane.mem().unwrap()[..5].copy_from_slice(b"hello");
        assert!(plane.is_mapped());
        assert_eq!(&plane.mem().unwrap()[..5], b"hello");
    }

    #[test]
    fn test_buffer_planes_keep_order() {
        let mut buffer = FrameBuffer::new(2);
        buffer.push_plane(memfd_plane(1024));
        buffer.push_plane(memfd_plane(512));

        assert_eq!(buffer.index(), 2);
        assert_eq!(buffer.planes().len(), 2);
        assert_eq!(buffer.planes()[0].len(), 1024);
        assert_eq!(buffer.planes()[1].len(), 512);
    }

    #[test]
    fn test_pool_create_destroy() {
        let mut pool = BufferPool::new();
        assert!(pool.is_empty());

        pool.create(5);
        assert_eq!(pool.count(), 5);
        assert_eq!(pool.get(4).unwrap().index(), 4);
        assert!(pool.get(5).is_none());

        pool.destroy();
        assert!(pool.is_empty());
    }
}
