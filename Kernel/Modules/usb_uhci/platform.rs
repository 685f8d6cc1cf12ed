// "Tifflin" Kernel - UHCI USB driver
// - By John Hodge (Mutabah / thePowersGang)
//
// Modules/usb_uhci/platform.rs
//! Services the driver needs from the surrounding kernel
//!
//! The PCI layer is expected to have enabled IO decode and bus mastering before handing over the binding.
use ::core::ptr::NonNull;

pub const PAGE_SIZE: usize = 0x1000;

/// A run of physically contiguous, page-aligned DMA pages
pub struct DmaPages
{
	/// CPU-visible address of the first page
	pub cpu: NonNull<u8>,
	/// Bus address of the first page (as seen by the controller)
	pub bus: u64,
	/// Number of pages
	pub count: usize,
}
// SAFE: The pages are owned, and only ever accessed through the driver
unsafe impl Send for DmaPages {}
impl DmaPages
{
	pub fn len(&self) -> usize {
		self.count * PAGE_SIZE
	}
}
impl ::core::fmt::Debug for DmaPages
{
	fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
		write!(f, "DmaPages({:p}/{:#x}+{})", self.cpu, self.bus, self.count)
	}
}

/// Register access, DMA memory and timing, as provided by the host kernel (or a simulation)
pub trait Platform: Send + Sync
{
	fn read_8(&self, ofs: usize) -> u8;
	fn read_16(&self, ofs: usize) -> u16;
	fn read_32(&self, ofs: usize) -> u32;
	/// UNSAFE: Register writes can start DMA
	unsafe fn write_8(&self, ofs: usize, v: u8);
	/// UNSAFE: Register writes can start DMA
	unsafe fn write_16(&self, ofs: usize, v: u16);
	/// UNSAFE: Register writes can start DMA
	unsafe fn write_32(&self, ofs: usize, v: u32);

	/// Allocate `count` zeroed pages of DMA-able memory
	fn alloc_dma(&self, count: usize, purpose: &'static str) -> Result<DmaPages, &'static str>;
	/// Return pages obtained from `alloc_dma`
	///
	/// UNSAFE: The controller must no longer be able to access the pages
	unsafe fn release_dma(&self, pages: DmaPages);

	/// Busy-wait for at least the given number of microseconds
	fn stall_us(&self, us: u64);
	/// Monotonic time, in microseconds
	fn time_us(&self) -> u64;
}
