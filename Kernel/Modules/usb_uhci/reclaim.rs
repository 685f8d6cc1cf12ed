// "Tifflin" Kernel - UHCI USB driver
// - By John Hodge (Mutabah / thePowersGang)
//
// Modules/usb_uhci/reclaim.rs
//! Deferred release of descriptors that have been unlinked from the schedule
//!
//! The controller may have already fetched a link to an unlinked QH (or be part way through its TDs), so storage is
//! only returned to the pool after two sweeps, with at least one frame between each sweep.
use alloc::vec::Vec;
use crate::descriptors::{Qh,TdChain};
use crate::mem_pool::{MemPool,PoolHandle};

/// Lifecycle of hardware-visible descriptor memory
#[derive(Debug,Copy,Clone,PartialEq,Eq)]
pub enum RetireState
{
	/// Linked and possibly being executed
	Active,
	/// Scheduled for removal at the next opportunity
	PendingUnlink,
	/// Unlinked, the controller may still hold a stale reference
	Recycle,
	/// Unlinked for at least a frame, freed at the next sweep
	RecycleWait,
	/// Returned to the pool
	Freed,
}

/// A set of allocations retired together
pub struct Retired
{
	tag: &'static str,
	state: RetireState,
	handles: Vec<PoolHandle>,
}
impl Retired
{
	pub fn new(tag: &'static str) -> Retired {
		Retired { tag, state: RetireState::PendingUnlink, handles: Vec::new() }
	}
	pub fn with_qh(mut self, qh: Qh) -> Self {
		self.handles.push(qh.into_handle());
		self
	}
	pub fn with_chain(mut self, chain: TdChain) -> Self {
		self.handles.extend(chain.into_handles());
		self
	}
	pub fn with_buffer(mut self, buf: PoolHandle) -> Self {
		self.handles.push(buf);
		self
	}
	pub fn state(&self) -> RetireState {
		self.state
	}
	fn free(mut self, pool: &mut MemPool) {
		self.state = RetireState::Freed;
		log_trace!("free: {:?}", self);
		for h in self.handles.drain(..)
		{
			pool.release(h);
		}
	}
}
impl ::core::fmt::Debug for Retired
{
	fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
		write!(f, "Retired({} {:?} x{})", self.tag, self.state, self.handles.len())
	}
}

#[derive(Default)]
pub struct ReclaimQueue
{
	recycle: Vec<Retired>,
	recycle_wait: Vec<Retired>,
	/// Frame number at the last sweep that advanced the queue
	last_sweep: Option<u16>,
}
impl ReclaimQueue
{
	pub fn new() -> ReclaimQueue {
		Default::default()
	}

	/// Queue an unlinked set of descriptors
	pub fn retire(&mut self, mut item: Retired) {
		log_debug!("retire: {:?}", item);
		item.state = RetireState::Recycle;
		self.recycle.push(item);
	}

	/// Free everything in `RecycleWait` and move `Recycle` to `RecycleWait`
	///
	/// Does nothing if the controller has not advanced a frame since the last sweep, so an item always spends at least
	/// one frame in each list. Returns the number of items freed.
	pub fn sweep(&mut self, pool: &mut MemPool, frame: u16) -> usize {
		if self.last_sweep == Some(frame) {
			return 0;
		}
		if self.recycle.is_empty() && self.recycle_wait.is_empty() {
			self.last_sweep = Some(frame);
			return 0;
		}
		let n = self.recycle_wait.len();
		for item in self.recycle_wait.drain(..)
		{
			debug_assert_eq!(item.state, RetireState::RecycleWait);
			item.free(pool);
		}
		for mut item in self.recycle.drain(..)
		{
			item.state = RetireState::RecycleWait;
			self.recycle_wait.push(item);
		}
		self.last_sweep = Some(frame);
		if n > 0 {
			log_trace!("sweep: freed {} at frame {}", n, frame);
		}
		n
	}

	/// Free everything immediately
	///
	/// UNSAFE: The controller must be halted (or no longer reference any retired memory)
	pub unsafe fn drain(&mut self, pool: &mut MemPool) {
		for item in self.recycle_wait.drain(..).chain(self.recycle.drain(..))
		{
			item.free(pool);
		}
		self.last_sweep = None;
	}

	/// Number of items in (`Recycle`, `RecycleWait`)
	pub fn pending(&self) -> (usize, usize) {
		(self.recycle.len(), self.recycle_wait.len())
	}
	pub fn is_empty(&self) -> bool {
		self.recycle.is_empty() && self.recycle_wait.is_empty()
	}
}
