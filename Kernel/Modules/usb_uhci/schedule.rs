// "Tifflin" Kernel - UHCI USB driver
// - By John Hodge (Mutabah / thePowersGang)
//
// Modules/usb_uhci/schedule.rs
//! Frame list and queue head skeleton
//!
//! The skeleton is a fixed chain of queue heads, walked by the controller in this order:
//! ```text
//! int1024 -> int512 -> ... -> int2 -> int1 -> sync-int -> ls-control -> fs-control -> bulk [-> fs-control]
//! ```
//! Frame list slot `i` points at `int(2^k)` with `k = min(trailing_zeros(i), 10)`, so a queue linked after `int(2^k)`
//! is reached from every slot that is a multiple of `2^k`. The control/bulk heads are reached from every slot.
use alloc::vec::Vec;
use crate::descriptors::{self,Qh};
use crate::hw_structs::Link;
use crate::mem_pool::MemPool;
use crate::platform::{Platform,DmaPages};
use crate::error::{TransferError,InitError};

pub const FRAME_LIST_LEN: usize = 1024;
/// Number of periodic interval classes (1, 2, 4, ... 1024 frames)
pub const INTERVAL_LEVELS: u8 = 11;
const SKEL_COUNT: usize = INTERVAL_LEVELS as usize + 4;

/// How to treat periodic intervals that are not a power of two
#[derive(Debug,Copy,Clone,PartialEq,Eq)]
pub enum IntervalRounding
{
	/// Poll more often than requested (next smaller power of two)
	Down,
	/// Poll less often than requested (next larger power of two, at most 1024)
	Up,
}

/// A validated periodic interval (stored as log2 of the number of frames)
#[derive(Debug,Copy,Clone,PartialEq,Eq)]
pub struct Interval(u8);
impl Interval
{
	/// Round a requested interval (in frames) to a power of two no larger than 1024
	pub fn round(frames: u32, rounding: IntervalRounding) -> Result<Interval, TransferError> {
		if frames == 0 {
			return Err(TransferError::InvalidParameter);
		}
		let max = INTERVAL_LEVELS - 1;
		let log2_down = (31 - frames.leading_zeros()) as u8;
		let log2 = match rounding
			{
			IntervalRounding::Down => log2_down,
			IntervalRounding::Up if frames.is_power_of_two() => log2_down,
			IntervalRounding::Up => log2_down + 1,
			};
		Ok(Interval(::core::cmp::min(log2, max)))
	}
	pub fn frames(&self) -> u32 {
		1 << self.0
	}
	pub fn log2(&self) -> u8 {
		self.0
	}
}

/// Fixed (skeleton) queue heads
#[derive(Debug,Copy,Clone,PartialEq,Eq)]
pub enum Skel
{
	/// Periodic class head, for intervals of `1 << n` frames
	Interval(u8),
	/// Synchronous interrupt transfers
	SyncInt,
	LsControl,
	FsControl,
	Bulk,
}
impl Skel
{
	fn index(self) -> usize {
		match self
		{
		Skel::Interval(l) => {
			assert!(l < INTERVAL_LEVELS);
			(INTERVAL_LEVELS - 1 - l) as usize
			},
		Skel::SyncInt   => INTERVAL_LEVELS as usize + 0,
		Skel::LsControl => INTERVAL_LEVELS as usize + 1,
		Skel::FsControl => INTERVAL_LEVELS as usize + 2,
		Skel::Bulk      => INTERVAL_LEVELS as usize + 3,
		}
	}
}

/// Which asynchronous segment a control/bulk queue goes in
#[derive(Debug,Copy,Clone,PartialEq,Eq)]
pub enum AsyncClass
{
	LsControl,
	FsControl,
	Bulk,
}

/// Handle to a dynamic queue head owned by the schedule
#[derive(Debug,Copy,Clone,PartialEq,Eq)]
pub struct QhId(usize);

/// Interval class head for a frame list slot
pub fn frame_level(slot: usize) -> u8 {
	::core::cmp::min(slot.trailing_zeros(), INTERVAL_LEVELS as u32 - 1) as u8
}

struct Slot
{
	qh: Qh,
	/// Index of the skeleton QH this one follows
	segment: usize,
}

pub struct Schedule
{
	frame_list: DmaPages,
	skel: Vec<Qh>,
	/// Dynamic QHs after each skeleton QH, in hardware order
	segments: Vec<Vec<usize>>,
	slots: Vec<Option<Slot>>,
	bandwidth_reclamation: bool,
}

impl Schedule
{
	/// Allocate the frame list and skeleton, and point every frame list slot into the skeleton
	pub fn init_skeleton(pool: &mut MemPool, io: &dyn Platform, bandwidth_reclamation: bool) -> Result<Schedule, InitError>
	{
		let frame_list = io.alloc_dma(1, "usb_uhci frame list").map_err(InitError::NoMemory)?;
		if frame_list.bus >= (1 << 32) {
			// SAFE: Not handed to the controller yet
			unsafe { io.release_dma(frame_list) };
			return Err(InitError::AddressTooHigh);
		}

		let mut skel = Vec::with_capacity(SKEL_COUNT);
		for _ in 0 .. SKEL_COUNT
		{
			match Qh::new(pool, io)
			{
			Ok(qh) => skel.push(qh),
			Err(e) => {
				for qh in skel {
					pool.release(qh.into_handle());
				}
				// SAFE: Not handed to the controller yet
				unsafe { io.release_dma(frame_list) };
				return Err(e.into());
				},
			}
		}
		// Fixed horizontal chain
		for i in 0 .. SKEL_COUNT-1
		{
			// SAFE: Nothing is reachable yet, and all skeleton QHs live as long as the schedule
			unsafe { skel[i].set_hlink(Link::Qh(skel[i+1].phys()).encode()) };
		}
		let tail = if bandwidth_reclamation {
				Link::Qh(skel[Skel::FsControl.index()].phys()).encode()
			}
			else {
				Link::Terminate.encode()
			};
		// SAFE: See above
		unsafe { skel[SKEL_COUNT-1].set_hlink(tail) };

		let rv = Schedule {
			frame_list,
			skel,
			segments: (0 .. SKEL_COUNT).map(|_| Vec::new()).collect(),
			slots: Vec::new(),
			bandwidth_reclamation,
			};
		for i in 0 .. FRAME_LIST_LEN
		{
			let v = Link::Qh(rv.skel(Skel::Interval(frame_level(i))).phys()).encode();
			// SAFE: In-bounds write to an owned page
			unsafe { (rv.frame_list.cpu.as_ptr() as *mut u32).add(i).write_volatile(v) };
		}
		log_debug!("Schedule: Frame list at {:#x}, skeleton {:?} ... {:?}", rv.frame_list.bus, rv.skel[0], rv.skel[SKEL_COUNT-1]);
		Ok(rv)
	}

	/// Bus address for FLBASEADD
	pub fn frame_list_bus(&self) -> u32 {
		self.frame_list.bus as u32
	}
	/// Current value of a frame list slot
	pub fn frame_slot(&self, i: usize) -> u32 {
		assert!(i < FRAME_LIST_LEN);
		// SAFE: In-bounds read of an owned page
		unsafe { (self.frame_list.cpu.as_ptr() as *const u32).add(i).read_volatile() }
	}
	pub fn bandwidth_reclamation(&self) -> bool {
		self.bandwidth_reclamation
	}

	pub fn skel(&self, s: Skel) -> &Qh {
		&self.skel[s.index()]
	}
	pub fn qh(&self, id: QhId) -> Option<&Qh> {
		self.slots.get(id.0).and_then(|s| s.as_ref()).map(|s| &s.qh)
	}
	/// Number of dynamic QHs currently linked
	pub fn dynamic_count(&self) -> usize {
		self.segments.iter().map(|s| s.len()).sum()
	}

	/// Link a periodic QH as the immediate successor of its interval class head
	pub fn insert_periodic(&mut self, qh: Qh, interval: Interval) -> QhId {
		let seg = Skel::Interval(interval.log2()).index();
		descriptors::link_qh_after(&self.skel[seg], &qh);
		let id = self.store(qh, seg);
		self.segments[seg].insert(0, id.0);
		log_trace!("insert_periodic: {:?} every {} frames", id, interval.frames());
		id
	}
	/// Link a synchronous interrupt QH (polled by every frame)
	pub fn insert_sync_interrupt(&mut self, qh: Qh) -> QhId {
		self.insert_tail(qh, Skel::SyncInt.index())
	}
	/// Link a control or bulk QH at the tail of its segment
	pub fn insert_async(&mut self, qh: Qh, class: AsyncClass) -> QhId {
		let seg = match class
			{
			AsyncClass::LsControl => Skel::LsControl,
			AsyncClass::FsControl => Skel::FsControl,
			AsyncClass::Bulk => Skel::Bulk,
			};
		self.insert_tail(qh, seg.index())
	}
	fn insert_tail(&mut self, qh: Qh, seg: usize) -> QhId {
		{
			let prev = match self.segments[seg].last()
				{
				Some(&idx) => &self.slot(idx).qh,
				None => &self.skel[seg],
				};
			descriptors::link_qh_after(prev, &qh);
		}
		let id = self.store(qh, seg);
		self.segments[seg].push(id.0);
		log_trace!("insert_tail: {:?} in segment {}", id, seg);
		id
	}
	fn store(&mut self, qh: Qh, segment: usize) -> QhId {
		let s = Some(Slot { qh, segment });
		match self.slots.iter().position(|s| s.is_none())
		{
		Some(i) => { self.slots[i] = s; QhId(i) },
		None => { self.slots.push(s); QhId(self.slots.len() - 1) },
		}
	}
	fn slot(&self, idx: usize) -> &Slot {
		match self.slots[idx]
		{
		Some(ref s) => s,
		None => panic!("BUG: Schedule segment references empty slot {}", idx),
		}
	}

	/// Remove a dynamic QH from the schedule, restoring its predecessor's link
	///
	/// The returned QH may still be visited by the controller until a frame has passed, hand it to the reclaim queue.
	pub fn unlink(&mut self, id: QhId) -> Qh {
		let seg = self.slot(id.0).segment;
		let pos = match self.segments[seg].iter().position(|&v| v == id.0)
			{
			Some(p) => p,
			None => panic!("BUG: {:?} not in segment {}", id, seg),
			};
		{
			let prev = if pos == 0 { &self.skel[seg] } else { &self.slot(self.segments[seg][pos-1]).qh };
			descriptors::unlink_qh(prev, &self.slot(id.0).qh);
		}
		self.segments[seg].remove(pos);
		log_trace!("unlink: {:?} from segment {}", id, seg);
		match self.slots[id.0].take()
		{
		Some(s) => s.qh,
		None => panic!("BUG: {:?} vanished", id),
		}
	}

	/// Bus addresses of the QHs reachable from a frame list slot, in walk order
	pub fn walk_from_slot(&self, slot: usize) -> Vec<u32> {
		let mut rv = Vec::new();
		let mut cur = Link::decode(self.frame_slot(slot));
		while let Link::Qh(addr) = cur
		{
			if rv.contains(&addr) {
				break;
			}
			rv.push(addr);
			cur = match self.find_by_phys(addr)
				{
				Some(qh) => Link::decode(qh.hlink()),
				None => {
					log_error!("walk_from_slot: Unknown QH {:#x}", addr);
					break
					},
				};
		}
		rv
	}
	fn find_by_phys(&self, addr: u32) -> Option<&Qh> {
		self.skel.iter()
			.chain(self.slots.iter().filter_map(|s| s.as_ref()).map(|s| &s.qh))
			.find(|qh| qh.phys() == addr)
	}

	/// Return every queue head to the pool and the frame list page to the platform
	///
	/// UNSAFE: The controller must be halted
	pub unsafe fn teardown(mut self, pool: &mut MemPool, io: &dyn Platform) {
		let n_dyn = self.dynamic_count();
		if n_dyn > 0 {
			log_notice!("Schedule teardown: Discarding {} queue heads of in-flight transfers", n_dyn);
		}
		for s in self.slots.drain(..) {
			if let Some(s) = s {
				pool.release(s.qh.into_handle());
			}
		}
		for qh in self.skel.drain(..) {
			pool.release(qh.into_handle());
		}
		io.release_dma(self.frame_list);
	}
}
