// "Tifflin" Kernel - UHCI USB driver
// - By John Hodge (Mutabah / thePowersGang)
//
// Modules/usb_uhci/mem_pool.rs
//! Pool of hardware-accessible memory, allocated in 32 byte units
//!
//! Descriptors (TDs and QHs) take one unit each, data bounce buffers take as many contiguous units as they need.
use ::core::ptr::NonNull;
use crate::platform::{Platform,DmaPages,PAGE_SIZE};
use alloc::vec::Vec;

/// Allocation granularity (also the alignment of every allocation)
pub const UNIT_SIZE: usize = 0x20;
// 0x1000/0x20 = 0x80 = 128 units per page
const UNITS_PER_PAGE: usize = PAGE_SIZE / UNIT_SIZE;

#[derive(Debug,Copy,Clone,PartialEq,Eq)]
pub enum PoolError
{
	/// No block has room, and the pool is at its block limit
	Exhausted,
	/// The platform refused to provide more DMA memory
	Platform(&'static str),
	/// The platform provided memory that a 32-bit controller cannot reach
	AddressTooHigh,
}

struct Block
{
	pages: DmaPages,
	/// Allocation bitmap, one bit per unit
	used: Vec<u32>,
	n_units: usize,
	n_free: usize,
}

/// A growable set of DMA blocks
pub struct MemPool
{
	blocks: Vec<Block>,
	block_pages: usize,
	max_blocks: usize,
}

/// An allocation from the pool, must be passed back to `MemPool::release`
pub struct PoolHandle
{
	block: u16,
	unit: u32,
	count: u32,
	cpu: NonNull<u8>,
	bus: u32,
}
// SAFE: The handle uniquely owns the units it refers to
unsafe impl Send for PoolHandle {}
impl ::core::fmt::Debug for PoolHandle
{
	fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
		write!(f, "PoolHandle({}:{}+{} @{:#x})", self.block, self.unit, self.count, self.bus)
	}
}
impl ::core::ops::Drop for PoolHandle
{
	fn drop(&mut self) {
		log_error!("BUG: {:?} dropped, should be released back to the pool", self);
	}
}
impl PoolHandle
{
	/// Size of the allocation in bytes (a multiple of the unit size)
	pub fn len(&self) -> usize {
		self.count as usize * UNIT_SIZE
	}
	/// Bus address, as written into descriptors
	pub fn bus_addr(&self) -> u32 {
		self.bus
	}
	pub fn cpu_ptr(&self) -> *mut u8 {
		self.cpu.as_ptr()
	}

	/// Copy data into the start of the allocation
	pub fn fill(&mut self, ofs: usize, data: &[u8]) {
		assert!(ofs + data.len() <= self.len(), "{:?} fill {}+{} out of range", self, ofs, data.len());
		// SAFE: Range checked, and the handle is uniquely owned
		unsafe {
			::core::ptr::copy_nonoverlapping(data.as_ptr(), self.cpu.as_ptr().add(ofs), data.len());
		}
		::core::sync::atomic::fence(::core::sync::atomic::Ordering::Release);
	}
	/// Copy data out of the allocation (call only once the hardware has finished writing it)
	pub fn read(&self, ofs: usize, dst: &mut [u8]) {
		assert!(ofs + dst.len() <= self.len(), "{:?} read {}+{} out of range", self, ofs, dst.len());
		::core::sync::atomic::fence(::core::sync::atomic::Ordering::Acquire);
		// SAFE: Range checked, and the handle is owned
		unsafe {
			::core::ptr::copy_nonoverlapping(self.cpu.as_ptr().add(ofs), dst.as_mut_ptr(), dst.len());
		}
	}
}

impl MemPool
{
	/// Create an empty pool, blocks are mapped on first use
	pub fn new(block_pages: usize, max_blocks: usize) -> MemPool {
		MemPool {
			blocks: Vec::new(),
			block_pages: ::core::cmp::min(::core::cmp::max(block_pages, 1), 512),
			max_blocks: max_blocks,
		}
	}

	/// Allocate at least `size` bytes (zero is rounded up to one unit)
	pub fn alloc(&mut self, io: &dyn Platform, size: usize) -> Result<PoolHandle, PoolError> {
		let n_units = ::core::cmp::max(1, (size + UNIT_SIZE - 1) / UNIT_SIZE);
		if n_units > 512 * UNITS_PER_PAGE {
			return Err(PoolError::Exhausted);
		}
		for (idx, b) in self.blocks.iter_mut().enumerate()
		{
			if b.n_free < n_units {
				continue ;
			}
			if let Some(unit) = find_and_set(&mut b.used, b.n_units, n_units) {
				b.n_free -= n_units;
				return Ok(Self::make_handle(idx, b, unit, n_units));
			}
		}

		// No space, grow the pool
		if self.blocks.len() >= self.max_blocks {
			log_debug!("MemPool::alloc({}): Exhausted ({} blocks)", size, self.blocks.len());
			return Err(PoolError::Exhausted);
		}
		let n_pages = ::core::cmp::max(self.block_pages, (n_units + UNITS_PER_PAGE - 1) / UNITS_PER_PAGE);
		let pages = io.alloc_dma(n_pages, "usb_uhci pool").map_err(PoolError::Platform)?;
		if pages.bus + pages.len() as u64 > (1 << 32) {
			log_warning!("MemPool: {:?} is above 4GiB, unusable", pages);
			// SAFE: Never handed to the controller
			unsafe { io.release_dma(pages) };
			return Err(PoolError::AddressTooHigh);
		}
		// SAFE: Freshly allocated, and owned
		unsafe { ::core::ptr::write_bytes(pages.cpu.as_ptr(), 0, pages.len()) };
		log_debug!("MemPool: New block #{} {:?}", self.blocks.len(), pages);
		let n_total = pages.count * UNITS_PER_PAGE;
		let mut b = Block {
			pages,
			used: vec![0; (n_total + 31) / 32],
			n_units: n_total,
			n_free: n_total,
			};
		let unit = match find_and_set(&mut b.used, b.n_units, n_units)
			{
			Some(v) => v,
			None => panic!("Fresh block of {} units can't fit {}", n_total, n_units),
			};
		b.n_free -= n_units;
		let idx = self.blocks.len();
		let rv = Self::make_handle(idx, &b, unit, n_units);
		self.blocks.push(b);
		Ok(rv)
	}

	fn make_handle(idx: usize, b: &Block, unit: usize, n_units: usize) -> PoolHandle {
		let ofs = unit * UNIT_SIZE;
		PoolHandle {
			block: idx as u16,
			unit: unit as u32,
			count: n_units as u32,
			// SAFE: In-bounds offset into a valid allocation
			cpu: unsafe { NonNull::new_unchecked(b.pages.cpu.as_ptr().add(ofs)) },
			bus: (b.pages.bus + ofs as u64) as u32,
		}
	}

	/// Return an allocation to the pool
	///
	/// The caller must ensure the hardware can no longer access it (see the reclaim queue)
	pub fn release(&mut self, handle: PoolHandle) {
		log_trace!("MemPool::release({:?})", handle);
		let b = match self.blocks.get_mut(handle.block as usize)
			{
			Some(b) => b,
			None => panic!("BUG: {:?} is not from this pool", handle),
			};
		if !clear_bits(&mut b.used, handle.unit as usize, handle.count as usize) {
			panic!("BUG: {:?} released twice", handle);
		}
		b.n_free += handle.count as usize;
		::core::mem::forget(handle);    // The drop impl emits an error, so suppress that
	}

	/// Number of free units across all blocks
	pub fn free_units(&self) -> usize {
		self.blocks.iter().map(|b| b.n_free).sum()
	}
	/// Number of units that are currently allocated
	pub fn used_units(&self) -> usize {
		self.blocks.iter().map(|b| b.n_units - b.n_free).sum()
	}
	pub fn block_count(&self) -> usize {
		self.blocks.len()
	}

	/// Return every block to the platform
	///
	/// UNSAFE: The controller must be halted, and no handles may be used afterwards
	pub unsafe fn release_blocks(&mut self, io: &dyn Platform) {
		let used = self.used_units();
		if used != 0 {
			log_error!("MemPool: Releasing with {} units still allocated", used);
		}
		for b in self.blocks.drain(..)
		{
			io.release_dma(b.pages);
		}
	}
}

/// Find a run of `n` clear bits within the first `limit` bits, and set them
fn find_and_set(data: &mut [u32], limit: usize, n: usize) -> Option<usize> {
	let mut ofs = 0;
	'outer: while ofs + n <= limit {
		for i in 0 .. n {
			let idx = ofs + i;
			if data[idx / 32] & (1 << (idx%32)) != 0 {
				ofs = idx + 1;
				continue 'outer;
			}
		}
		// Found a run
		for idx in ofs .. ofs + n {
			data[idx / 32] |= 1 << (idx%32);
		}
		return Some(ofs);
	}
	None
}
/// Clear a run of bits, returns `false` (and changes nothing) if any were already clear
fn clear_bits(data: &mut [u32], ofs: usize, n: usize) -> bool {
	for idx in ofs .. ofs + n {
		if data[idx / 32] & (1 << (idx%32)) == 0 {
			return false;
		}
	}
	for idx in ofs .. ofs + n {
		data[idx / 32] &= !(1 << (idx%32));
	}
	true
}
