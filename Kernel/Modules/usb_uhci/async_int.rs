// "Tifflin" Kernel - UHCI USB driver
// - By John Hodge (Mutabah / thePowersGang)
//
// Modules/usb_uhci/async_int.rs
//! Asynchronous (periodic) interrupt transfers
//!
//! Each request owns a QH linked under its interval class head. `HostController::tick` checks every request's TD
//! chain, copies out completed data, calls the callback (with the schedule unlocked), and then either re-arms the
//! chain on the same QH or retires the request.
use alloc::vec::Vec;
use alloc::boxed::Box;
use crate::HostController;
use crate::platform::Platform;
use crate::host::{Endpoint,Speed,Direction};
use crate::hw_structs::Pid;
use crate::descriptors::{self,Qh,TdChain,ChainStatus};
use crate::mem_pool::{MemPool,PoolHandle};
use crate::reclaim::{Retired,RetireState};
use crate::schedule::{Schedule,Interval,QhId};
use crate::error::TransferError;

/// What to do with a request after its callback returns
#[derive(Debug,Copy,Clone,PartialEq,Eq)]
pub enum IntAction
{
	/// Re-arm and keep polling
	Continue,
	/// Stop polling (equivalent to `cancel_interrupt`, which can't be called from a callback)
	Cancel,
}

/// Handle to a registered interrupt transfer
#[derive(Debug,Copy,Clone,PartialEq,Eq)]
pub struct IntHandle(u32);

type IntCallbackInner = ::stack_dst::ValueA<dyn FnMut(Result<&[u8], TransferError>)->IntAction + Send, [usize; 4]>;
struct IntCallback(IntCallbackInner);
// SAFE: The contained closure is required to be `Send`
unsafe impl Send for IntCallback {}
impl IntCallback
{
	fn new<F>(f: F) -> IntCallback
	where
		F: FnMut(Result<&[u8], TransferError>)->IntAction + Send + 'static
	{
		IntCallback(match IntCallbackInner::new_stable(f, |p| p as _)
			{
			Ok(v) => v,
			Err(f) => match IntCallbackInner::new_stable(Box::new(f), |p| p as _)
				{
				Ok(v) => v,
				Err(_) => panic!("Boxed callback doesn't fit in a ValueA"),
				},
			})
	}
	fn call(&mut self, r: Result<&[u8], TransferError>) -> IntAction {
		(&mut *self.0)(r)
	}
}

pub(crate) struct IntRequest
{
	handle: IntHandle,
	ep: Endpoint,
	interval: Interval,
	qh: QhId,
	/// Data buffer, written by the controller
	buffer: PoolHandle,
	length: usize,
	chain: TdChain,
	state: RetireState,
	/// Taken while the callback is running
	callback: Option<IntCallback>,
}
impl IntRequest
{
	/// Unlink and free immediately
	///
	/// UNSAFE: Controller must be halted
	pub(crate) unsafe fn release(self, schedule: &mut Schedule, pool: &mut MemPool) {
		let qh = schedule.unlink(self.qh);
		pool.release(qh.into_handle());
		self.chain.release(pool);
		pool.release(self.buffer);
	}
	/// Unlink and pass to the reclaim queue
	fn retire(mut self, schedule: &mut Schedule, reclaim: &mut crate::reclaim::ReclaimQueue) {
		let qh = schedule.unlink(self.qh);
		self.chain.deactivate();
		reclaim.retire( Retired::new("int").with_qh(qh).with_chain(self.chain).with_buffer(self.buffer) );
	}
}

pub(crate) struct AsyncList
{
	requests: Vec<IntRequest>,
	next_handle: u32,
}
impl AsyncList
{
	pub fn new() -> AsyncList {
		AsyncList { requests: Vec::new(), next_handle: 1 }
	}
	pub fn len(&self) -> usize {
		self.requests.len()
	}
	pub fn take_all(&mut self) -> Vec<IntRequest> {
		::core::mem::replace(&mut self.requests, Vec::new())
	}
	fn find_mut(&mut self, h: IntHandle) -> Option<&mut IntRequest> {
		self.requests.iter_mut().find(|r| r.handle == h)
	}
}

/// A completion collected under the lock, delivered without it
struct Completed
{
	handle: IntHandle,
	result: Result<(), TransferError>,
	data: Vec<u8>,
	callback: Option<IntCallback>,
	action: IntAction,
}

impl<P: Platform> HostController<P>
{
	/// Start polling an interrupt IN endpoint every `interval` frames (rounded to a power of two)
	///
	/// Each completion (or error) is passed to `callback` from within `tick`. The callback must not block, and must not
	/// call `register_interrupt` or `cancel_interrupt` (return `IntAction::Cancel` instead). An error always ends the
	/// request.
	pub fn register_interrupt<F>(&self, ep: &Endpoint, interval: u32, length: usize, callback: F) -> Result<IntHandle, TransferError>
	where
		F: FnMut(Result<&[u8], TransferError>)->IntAction + Send + 'static
	{
		let mps_ok = match ep.speed
			{
			Speed::Low => 1 <= ep.max_packet && ep.max_packet <= 8,
			Speed::Full => 1 <= ep.max_packet && ep.max_packet <= 64,
			};
		if !mps_ok || length == 0 || length > self.config.max_transfer_len {
			return Err(TransferError::InvalidParameter);
		}
		let interval = Interval::round(interval, self.config.interval_rounding)?;
		if !self.is_running() {
			return Err(TransferError::NotRunning);
		}
		let callback = IntCallback::new(callback);

		let io = self.regs.io();
		let _tick = self.tick_lock.lock();
		let mut st = self.state.lock();
		let st = &mut *st;
		if st.schedule.is_none() {
			return Err(TransferError::NotRunning);
		}
		let buffer = st.pool.alloc(io, length)?;
		let qh = match Qh::new(&mut st.pool, io)
			{
			Ok(v) => v,
			Err(e) => {
				st.pool.release(buffer);
				return Err(e.into());
				},
			};
		let toggle = st.toggles.get(ep.addr, Direction::In);
		let chain = match descriptors::build_td_chain(&mut st.pool, io, &ep.packet_target(), Pid::In, buffer.bus_addr(), length, toggle)
			{
			Ok(v) => v,
			Err(e) => {
				st.pool.release(qh.into_handle());
				st.pool.release(buffer);
				return Err(e.into());
				},
			};
		qh.attach(&chain);
		let qh_id = st.schedule()?.insert_periodic(qh, interval);

		let handle = IntHandle(st.async_list.next_handle);
		st.async_list.next_handle = st.async_list.next_handle.wrapping_add(1);
		log_debug!("register_interrupt({:?}, {} frames, {} bytes) = {:?}", ep.addr, interval.frames(), length, handle);
		st.async_list.requests.push(IntRequest {
			handle,
			ep: *ep,
			interval,
			qh: qh_id,
			buffer,
			length,
			chain,
			state: RetireState::Active,
			callback: Some(callback),
			});
		Ok(handle)
	}

	/// Stop a registered interrupt transfer
	///
	/// Waits for any in-progress `tick`. Once this returns the callback will not be called again.
	pub fn cancel_interrupt(&self, handle: IntHandle) -> Result<(), TransferError>
	{
		let _tick = self.tick_lock.lock();
		let mut st = self.state.lock();
		let st = &mut *st;
		let idx = match st.async_list.requests.iter().position(|r| r.handle == handle)
			{
			Some(i) => i,
			None => return Err(TransferError::InvalidParameter),
			};
		let req = st.async_list.requests.remove(idx);
		log_debug!("cancel_interrupt({:?}): {:?} every {} frames", handle, req.ep.addr, req.interval.frames());
		match st.schedule
		{
		Some(ref mut s) => req.retire(s, &mut st.reclaim),
		None => panic!("BUG: Interrupt request outstanding without a schedule"),
		}
		Ok( () )
	}

	/// Number of registered interrupt transfers
	pub fn interrupt_count(&self) -> usize {
		self.state.lock().async_list.len()
	}

	/// Periodic maintenance: deliver interrupt completions, re-arm or retire requests, and advance the reclaim queue
	///
	/// Call at least as often as the shortest registered interval (and periodically even if there are none, as this
	/// is what returns retired descriptors to the pool).
	pub fn tick(&self)
	{
		let _tick = self.tick_lock.lock();

		// 1. Collect finished chains
		let mut done = Vec::new();
		{
			let mut st = self.state.lock();
			let st = &mut *st;
			for req in st.async_list.requests.iter_mut()
			{
				if req.state != RetireState::Active {
					continue ;
				}
				let (actual, result) = match req.chain.check(0)
					{
					ChainStatus::Active { .. } => continue,
					ChainStatus::Complete { actual } => (actual, Ok(())),
					ChainStatus::Short { actual, .. } => (actual, Ok(())),
					ChainStatus::Error { actual, error, .. } => (actual, Err(error)),
					};
				let mut data = vec![0; ::core::cmp::min(actual, req.length)];
				req.buffer.read(0, &mut data);
				if let Some(t) = req.chain.next_toggle() {
					st.toggles.set(req.ep.addr, Direction::In, t);
				}
				if let Err(e) = result {
					log_debug!("tick: {:?} {:?} failed: {}", req.handle, req.ep.addr, e);
					req.state = RetireState::PendingUnlink;
				}
				done.push(Completed {
					handle: req.handle,
					result,
					data,
					callback: req.callback.take(),
					action: IntAction::Continue,
					});
			}
		}

		// 2. Callbacks, without the schedule locked (they may start synchronous transfers)
		for c in done.iter_mut()
		{
			let arg = match c.result
				{
				Ok(()) => Ok(&c.data[..]),
				Err(e) => Err(e),
				};
			if let Some(ref mut cb) = c.callback {
				c.action = cb.call(arg);
			}
		}

		// 3. Re-arm, retire, and sweep
		let io = self.regs.io();
		let mut st = self.state.lock();
		let st = &mut *st;
		for c in done
		{
			let req = match st.async_list.find_mut(c.handle)
				{
				Some(r) => r,
				None => panic!("BUG: {:?} removed during tick", c.handle),
				};
			req.callback = c.callback;
			if c.action == IntAction::Cancel {
				log_debug!("tick: {:?} cancelled by callback", req.handle);
				req.state = RetireState::PendingUnlink;
			}
			if req.state != RetireState::Active {
				continue ;
			}
			let toggle = st.toggles.get(req.ep.addr, Direction::In);
			match descriptors::build_td_chain(&mut st.pool, io, &req.ep.packet_target(), Pid::In, req.buffer.bus_addr(), req.length, toggle)
			{
			Ok(chain) => {
				let old = ::core::mem::replace(&mut req.chain, chain);
				match st.schedule.as_ref().and_then(|s| s.qh(req.qh))
				{
				Some(qh) => qh.attach(&req.chain),
				None => panic!("BUG: {:?} has no QH", req.handle),
				}
				st.reclaim.retire( Retired::new("int-td").with_chain(old) );
				},
			Err(e) => {
				log_error!("tick: Can't re-arm {:?} ({:?}), stopping", req.handle, e);
				req.state = RetireState::PendingUnlink;
				},
			}
		}

		let mut i = 0;
		while i < st.async_list.requests.len()
		{
			if st.async_list.requests[i].state == RetireState::PendingUnlink {
				let req = st.async_list.requests.remove(i);
				match st.schedule
				{
				Some(ref mut s) => req.retire(s, &mut st.reclaim),
				None => panic!("BUG: Interrupt request outstanding without a schedule"),
				}
			}
			else {
				i += 1;
			}
		}

		let frame = self.frame_number();
		st.reclaim.sweep(&mut st.pool, frame);
	}
}
