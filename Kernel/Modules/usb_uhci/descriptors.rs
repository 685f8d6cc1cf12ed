// "Tifflin" Kernel - UHCI USB driver
// - By John Hodge (Mutabah / thePowersGang)
//
// Modules/usb_uhci/descriptors.rs
//! Software handles to hardware descriptors, TD chain construction, and QH linking
//!
//! The controller reads (and writes) these structures asynchronously, so all accesses are volatile, and any link
//! pointer that makes a structure reachable is written last, after a release fence.
use ::core::ptr::{addr_of,addr_of_mut};
use ::core::sync::atomic::{fence,Ordering};
use ::core::ops::Range;
use alloc::vec::Vec;
use crate::hw_structs::{self,TransferDesc,QueueHead,Link,Pid};
use crate::mem_pool::{MemPool,PoolHandle,PoolError};
use crate::platform::Platform;
use crate::error::TransferError;

/// Error count loaded into each TD (the hardware retries CRC/bitstuff/timeout errors this many times)
const TD_ERROR_COUNT: u32 = 3;

/// A transfer descriptor, occupying one pool unit
pub struct Td(PoolHandle);
impl Td
{
	fn hw(&self) -> *mut TransferDesc {
		self.0.cpu_ptr() as *mut TransferDesc
	}
	pub fn phys(&self) -> u32 {
		self.0.bus_addr()
	}
	pub fn link(&self) -> u32 {
		// SAFE: Owned pointer, volatile read of a hardware-shared word
		unsafe { addr_of!((*self.hw()).link).read_volatile() }
	}
	pub fn ctrl_sts(&self) -> u32 {
		// SAFE: Owned pointer, volatile read of a hardware-shared word
		unsafe { addr_of!((*self.hw()).ctrl_sts).read_volatile() }
	}
	pub fn token(&self) -> u32 {
		// SAFE: Owned pointer, volatile read of a hardware-shared word
		unsafe { addr_of!((*self.hw()).token).read_volatile() }
	}
	pub fn buffer(&self) -> u32 {
		// SAFE: Owned pointer, volatile read of a hardware-shared word
		unsafe { addr_of!((*self.hw()).buffer).read_volatile() }
	}
	/// Copy of the current hardware state (for logging)
	pub fn snapshot(&self) -> TransferDesc {
		TransferDesc {
			link: self.link(),
			ctrl_sts: self.ctrl_sts(),
			token: self.token(),
			buffer: self.buffer(),
		}
	}
	fn set_link(&mut self, v: u32) {
		// SAFE: Owned pointer
		unsafe { addr_of_mut!((*self.hw()).link).write_volatile(v) }
	}
	fn set_ctrl_sts(&mut self, v: u32) {
		// SAFE: Owned pointer
		unsafe { addr_of_mut!((*self.hw()).ctrl_sts).write_volatile(v) }
	}
	fn write(&mut self, v: TransferDesc) {
		// SAFE: Owned pointer, not yet reachable by the hardware when this is called
		unsafe { self.hw().write_volatile(v) }
	}
	pub fn into_handle(self) -> PoolHandle {
		self.0
	}
}
impl ::core::fmt::Debug for Td
{
	fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
		write!(f, "Td({:#x} {:?})", self.phys(), self.snapshot())
	}
}

/// A queue head, occupying one pool unit
pub struct Qh(PoolHandle);
impl Qh
{
	/// Allocate an empty (terminated both ways) queue head
	pub fn new(pool: &mut MemPool, io: &dyn Platform) -> Result<Qh, PoolError> {
		let h = pool.alloc(io, ::core::mem::size_of::<QueueHead>())?;
		let rv = Qh(h);
		// SAFE: Freshly allocated and owned
		unsafe {
			rv.hw().write_volatile(QueueHead {
				hlink: hw_structs::LINK_TERMINATE,
				element: hw_structs::LINK_TERMINATE,
				});
		}
		Ok(rv)
	}
	fn hw(&self) -> *mut QueueHead {
		self.0.cpu_ptr() as *mut QueueHead
	}
	pub fn phys(&self) -> u32 {
		self.0.bus_addr()
	}
	pub fn hlink(&self) -> u32 {
		// SAFE: Owned pointer, volatile read
		unsafe { addr_of!((*self.hw()).hlink).read_volatile() }
	}
	pub fn element(&self) -> u32 {
		// SAFE: Owned pointer, volatile read
		unsafe { addr_of!((*self.hw()).element).read_volatile() }
	}
	/// UNSAFE: The new value must reference a valid QH (or terminate) for as long as this QH is reachable
	pub unsafe fn set_hlink(&self, v: u32) {
		addr_of_mut!((*self.hw()).hlink).write_volatile(v)
	}
	/// UNSAFE: The new value must reference a valid TD (or terminate) for as long as this QH is reachable
	pub unsafe fn set_element(&self, v: u32) {
		addr_of_mut!((*self.hw()).element).write_volatile(v)
	}

	/// Point the queue at the start of a (fully built) chain
	///
	/// The chain must be kept alive until this QH no longer references it, and then retired.
	pub fn attach(&self, chain: &TdChain) {
		fence(Ordering::Release);
		// SAFE: Chain is fully formed, and the caller keeps it alive
		unsafe { self.set_element(chain.first_link()) }
	}
	/// Stop the queue (new frames will not start any more TDs from it)
	pub fn detach(&self) {
		// SAFE: Terminate is always valid
		unsafe { self.set_element(hw_structs::LINK_TERMINATE) }
	}

	pub fn into_handle(self) -> PoolHandle {
		self.0
	}
}
impl ::core::fmt::Debug for Qh
{
	fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
		write!(f, "Qh({:#x} h={:?} e={:?})", self.phys(), Link::decode(self.hlink()), Link::decode(self.element()))
	}
}

/// Link `qh` into the horizontal list directly after `anchor`
///
/// `qh` must not be reachable yet. The anchor's link is the single publishing write.
pub fn link_qh_after(anchor: &Qh, qh: &Qh) {
	// SAFE: `qh` isn't reachable, and its new successor is the anchor's current (valid) successor
	unsafe { qh.set_hlink(anchor.hlink()) };
	fence(Ordering::Release);
	// SAFE: `qh` is now fully formed, the caller keeps it alive until it's unlinked and reclaimed
	unsafe { anchor.set_hlink(Link::Qh(qh.phys()).encode()) };
}
/// Remove `qh` from the horizontal list, `prev` must be its current predecessor
///
/// `qh` keeps its own forward link, so the controller can continue the walk if it is currently visiting it.
/// Its storage may only be reused after a quiescence period (see `reclaim`).
pub fn unlink_qh(prev: &Qh, qh: &Qh) {
	debug_assert_eq!(prev.hlink(), Link::Qh(qh.phys()).encode(), "unlink_qh: {:?} doesn't link to {:?}", prev, qh);
	fence(Ordering::Release);
	// SAFE: The new value is the (valid) successor of `qh`
	unsafe { prev.set_hlink(qh.hlink()) };
}

/// Addressing and speed information put in each TD
#[derive(Debug,Copy,Clone)]
pub struct PacketTarget
{
	pub dev: u8,
	pub endpt: u8,
	pub low_speed: bool,
	pub max_packet: usize,
}

/// Outcome of walking a TD chain
#[derive(Debug,Copy,Clone,PartialEq,Eq)]
pub enum ChainStatus
{
	/// At least one TD is still active
	Active { actual: usize },
	/// Every TD completed without error
	Complete { actual: usize },
	/// An IN TD received less than its maximum length
	///
	/// Every IN TD has short packet detect set, so the controller stops the queue at this TD and later TDs stay active.
	Short { actual: usize, index: usize },
	/// A TD reported an error (later TDs were not executed)
	Error { actual: usize, index: usize, error: TransferError },
}

/// A forward-linked list of TDs, processed depth-first by the controller
pub struct TdChain
{
	tds: Vec<Td>,
	/// Indexes of the data stage TDs (only these count towards the transferred length)
	data: Range<usize>,
}
impl TdChain
{
	pub fn len(&self) -> usize {
		self.tds.len()
	}
	pub fn td(&self, idx: usize) -> &Td {
		&self.tds[idx]
	}
	pub fn tds(&self) -> &[Td] {
		&self.tds
	}
	pub fn data_range(&self) -> Range<usize> {
		self.data.clone()
	}
	/// Link value that starts this chain
	pub fn first_link(&self) -> u32 {
		Link::Td { addr: self.tds[0].phys(), depth_first: false }.encode()
	}
	/// Link value for starting at a specific TD (used to skip to the status stage)
	pub fn link_to(&self, idx: usize) -> u32 {
		Link::Td { addr: self.tds[idx].phys(), depth_first: false }.encode()
	}

	/// Walk the chain from `start`, stopping at the first TD that is active, short, or errored
	pub fn check(&self, start: usize) -> ChainStatus {
		let mut actual = 0;
		for i in start .. self.tds.len()
		{
			let td = &self.tds[i];
			let cs = td.ctrl_sts();
			if cs & hw_structs::TD_CS_Active != 0 {
				return ChainStatus::Active { actual };
			}
			if cs & hw_structs::TD_CS_ERROR_MASK != 0 {
				log_debug!("TD {} errored: {:?}", i, td);
				return ChainStatus::Error { actual, index: i, error: map_error(cs) };
			}
			// The controller never writes links, so a mismatch here is memory corruption
			let exp_link = match self.tds.get(i+1)
				{
				Some(n) => Link::Td { addr: n.phys(), depth_first: true }.encode(),
				None => hw_structs::LINK_TERMINATE,
				};
			let token = td.token();
			let len = hw_structs::cs_actlen(cs);
			let maxlen = hw_structs::token_maxlen(token);
			if td.link() != exp_link || len > maxlen {
				log_warning!("TD {} inconsistent: {:?} (expected link {:#x})", i, td, exp_link);
				return ChainStatus::Error { actual, index: i, error: TransferError::BufferError };
			}
			if self.data.contains(&i) {
				actual += len;
			}
			if Pid::from_token(token) == Some(Pid::In) && len < maxlen {
				return ChainStatus::Short { actual, index: i };
			}
		}
		ChainStatus::Complete { actual }
	}

	/// Toggle value to use for the next transfer on this endpoint, `None` if no data TD completed
	///
	/// Must be called before `deactivate`, as that makes unexecuted TDs look complete.
	pub fn next_toggle(&self) -> Option<bool> {
		let mut rv = None;
		for td in &self.tds[self.data.clone()]
		{
			let cs = td.ctrl_sts();
			if cs & (hw_structs::TD_CS_Active | hw_structs::TD_CS_ERROR_MASK) != 0 {
				break;
			}
			let token = td.token();
			rv = Some( !hw_structs::token_toggle(token) );
			// The queue halts at a short packet
			if Pid::from_token(token) == Some(Pid::In) && hw_structs::cs_actlen(cs) < hw_structs::token_maxlen(token) {
				break;
			}
		}
		rv
	}

	/// Deactivate every TD that hasn't been executed yet
	pub fn deactivate(&mut self) {
		for td in &mut self.tds
		{
			let cs = td.ctrl_sts();
			if cs & hw_structs::TD_CS_Active != 0 {
				td.set_ctrl_sts(cs & !hw_structs::TD_CS_Active);
			}
		}
	}

	/// Join two chains, `other` runs after `self`
	fn append(&mut self, mut other: TdChain, other_is_data: bool) {
		if let Some(last) = self.tds.last_mut() {
			last.set_ctrl_sts(last.ctrl_sts() & !hw_structs::TD_CS_IOC);
			last.set_link(Link::Td { addr: other.tds[0].phys(), depth_first: true }.encode());
		}
		let base = self.tds.len();
		if other_is_data {
			self.data = base + other.data.start .. base + other.data.end;
		}
		self.tds.extend(other.tds.drain(..));
	}

	/// Release a chain that was never reachable by the controller
	pub fn release(self, pool: &mut MemPool) {
		for td in self.tds
		{
			pool.release(td.0);
		}
	}
	pub fn into_handles(self) -> impl Iterator<Item=PoolHandle> {
		self.tds.into_iter().map(|td| td.0)
	}
}
impl ::core::fmt::Debug for TdChain
{
	fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
		f.debug_list().entries(self.tds.iter()).finish()
	}
}

fn map_error(cs: u32) -> TransferError {
	// A stall is also flagged when C_ERR runs out, so check the specific causes first
	if cs & hw_structs::TD_CS_Babble != 0 {
		TransferError::Babble
	}
	else if cs & hw_structs::TD_CS_DataBuffer != 0 {
		TransferError::BufferError
	}
	else if cs & hw_structs::TD_CS_BitStuff != 0 {
		TransferError::BitStuff
	}
	else if cs & hw_structs::TD_CS_CrcTimeout != 0 {
		TransferError::Crc
	}
	else {
		TransferError::Stall
	}
}

/// Split a buffer into max-packet sized TDs
///
/// Produces `ceil(length / max_packet)` TDs (one for a zero-length packet), with toggles alternating from
/// `toggle_start`. The last TD is terminated and raises IOC. IN TDs have short packet detect set, so a short packet
/// halts the queue instead of the controller moving on to the next TD.
pub fn build_td_chain(pool: &mut MemPool, io: &dyn Platform, target: &PacketTarget, pid: Pid, buffer: u32, length: usize, toggle_start: bool) -> Result<TdChain, PoolError>
{
	assert!(target.max_packet > 0);
	let count = ::core::cmp::max(1, (length + target.max_packet - 1) / target.max_packet);
	let mut tds = Vec::with_capacity(count);
	for i in 0 .. count
	{
		match pool.alloc(io, ::core::mem::size_of::<TransferDesc>())
		{
		Ok(h) => tds.push(Td(h)),
		Err(e) => {
			for td in tds {
				pool.release(td.0);
			}
			log_debug!("build_td_chain: Failed at TD {}/{}: {:?}", i, count, e);
			return Err(e);
			},
		}
	}

	let base_cs = hw_structs::TD_CS_Active
		| TD_ERROR_COUNT << hw_structs::TD_CS_CERR_SHIFT
		| (if target.low_speed { hw_structs::TD_CS_LowSpeed } else { 0 })
		;
	for i in 0 .. count
	{
		let ofs = i * target.max_packet;
		let pkt_len = ::core::cmp::min(target.max_packet, length - ofs);
		let is_last = i == count - 1;
		let link = if is_last {
				hw_structs::LINK_TERMINATE
			}
			else {
				Link::Td { addr: tds[i+1].phys(), depth_first: true }.encode()
			};
		let cs = base_cs
			| (if is_last { hw_structs::TD_CS_IOC } else { 0 })
			| (if pid == Pid::In { hw_structs::TD_CS_SPD } else { 0 })
			;
		let toggle = toggle_start ^ (i % 2 == 1);
		tds[i].write(TransferDesc {
			link: link,
			ctrl_sts: cs,
			token: hw_structs::make_token(pid, target.dev, target.endpt, toggle, pkt_len),
			buffer: if pkt_len == 0 { 0 } else { buffer + ofs as u32 },
			});
	}
	Ok(TdChain { tds, data: 0 .. count })
}

/// Build the three stages of a control transfer (SETUP, optional data, status) as a single chain
///
/// `setup` is the bus address of the 8 byte request, `data` is the direction/address/length of the data stage.
pub fn build_control_chain(pool: &mut MemPool, io: &dyn Platform, target: &PacketTarget, setup: u32, data: Option<(Pid, u32, usize)>) -> Result<TdChain, PoolError>
{
	let setup_target = PacketTarget { max_packet: 8, ..*target };
	let mut rv = build_td_chain(pool, io, &setup_target, Pid::Setup, setup, 8, false)?;
	// Empty data range after the SETUP, replaced if there is a data stage
	rv.data = 1 .. 1;
	// The status stage is in the opposite direction to the data stage (IN if there's no data)
	let status_pid = match data
		{
		Some((Pid::In, _, len)) if len > 0 => Pid::Out,
		_ => Pid::In,
		};
	if let Some((pid, addr, len)) = data {
		if len > 0 {
			match build_td_chain(pool, io, target, pid, addr, len, true)
			{
			Ok(c) => rv.append(c, true),
			Err(e) => { rv.release(pool); return Err(e); },
			}
		}
	}
	match build_td_chain(pool, io, target, status_pid, 0, 0, true)
	{
	Ok(c) => rv.append(c, false),
	Err(e) => { rv.release(pool); return Err(e); },
	}
	Ok(rv)
}
