// "Tifflin" Kernel - UHCI USB driver
// - By John Hodge (Mutabah / thePowersGang)
//
// Modules/usb_uhci/lib.rs
//! Universal Host Controller Interface (UHCI) driver - transfer scheduling core
//!
//! This driver polls: the controller's interrupts are left disabled, synchronous transfers poll their TDs, and
//! periodic (interrupt) transfers are checked by `HostController::tick`, which the platform calls from a timer.
#![no_std]

#[macro_use]
extern crate alloc;
#[cfg(test)] extern crate std;

#[macro_use]
mod logmacros;

pub mod error;
pub mod config;
pub mod platform;
pub mod host;
pub mod hw_regs;
pub mod hw_structs;
pub mod mem_pool;
pub mod descriptors;
pub mod schedule;
pub mod reclaim;

mod sync_transfer;
mod async_int;
mod root_hub;

pub use crate::error::{TransferError,InitError};
pub use crate::config::Config;
pub use crate::platform::{Platform,DmaPages};
pub use crate::host::{EndpointAddr,Endpoint,Speed,Direction,DeviceRequest,TransferData};
pub use crate::async_int::{IntHandle,IntAction};
pub use crate::root_hub::{PortFeature,PortStatus};
pub use crate::logmacros::HexDump;

use crate::hw_regs::{Regs,OpReg};
use crate::mem_pool::MemPool;
use crate::schedule::Schedule;
use crate::reclaim::ReclaimQueue;

/// Stall after asserting global reset
const GLOBAL_RESET_STALL_MS: u64 = 50;
/// Stall after a reset before touching the controller again
const RECOVERY_STALL_MS: u64 = 10;
/// Time to hold force-global-resume
const FORCE_GLOBAL_RESUME_STALL_MS: u64 = 20;

/// Result of a synchronous transfer
#[derive(Debug,Copy,Clone,PartialEq,Eq)]
pub struct TransferOutcome
{
	/// Bytes moved in the data stage (only counting TDs that completed)
	pub actual: usize,
	pub status: Result<(), TransferError>,
}
impl TransferOutcome
{
	fn failed(e: TransferError) -> TransferOutcome {
		TransferOutcome { actual: 0, status: Err(e) }
	}
}

#[derive(Debug,Copy,Clone,PartialEq,Eq)]
pub enum ResetKind
{
	/// Reset the whole bus (GRESET), then the controller
	Global,
	/// Reset the controller only (HCRESET)
	HostController,
}

#[derive(Debug,Copy,Clone,PartialEq,Eq)]
pub enum HcState
{
	Halt,
	Operational,
	Suspend,
}

#[derive(Debug,Copy,Clone,PartialEq,Eq)]
pub struct Capability
{
	pub max_speed: Speed,
	pub port_count: u8,
	pub is_64bit: bool,
}

/// A single UHCI controller
pub struct HostController<P: Platform>
{
	regs: Regs<P>,
	config: Config,
	/// Schedule critical section (everything the controller and software both touch)
	state: spin::Mutex<HostState>,
	/// Held for the whole of `tick`, and by interrupt (de)registration
	tick_lock: spin::Mutex<()>,
}
struct HostState
{
	pool: MemPool,
	/// `None` only if a reset failed to rebuild the schedule
	schedule: Option<Schedule>,
	reclaim: ReclaimQueue,
	async_list: async_int::AsyncList,
	toggles: host::ToggleTable,
	/// Incremented each time the schedule is rebuilt, transfers started against an older schedule no longer own a QH
	generation: u32,
}
impl HostState
{
	fn new(pool: MemPool, schedule: Option<Schedule>) -> HostState {
		HostState {
			pool,
			schedule,
			reclaim: ReclaimQueue::new(),
			async_list: async_int::AsyncList::new(),
			toggles: host::ToggleTable::new(),
			generation: 0,
		}
	}
	fn schedule(&mut self) -> Result<&mut Schedule, TransferError> {
		self.schedule.as_mut().ok_or(TransferError::NotRunning)
	}

	/// Free all descriptor memory (including the schedule)
	///
	/// UNSAFE: Controller must be halted
	unsafe fn release_all(&mut self, io: &dyn Platform) {
		let reqs = self.async_list.take_all();
		for req in reqs
		{
			match self.schedule
			{
			Some(ref mut s) => req.release(s, &mut self.pool),
			None => panic!("BUG: Interrupt requests exist without a schedule"),
			}
		}
		self.reclaim.drain(&mut self.pool);
		if let Some(s) = self.schedule.take() {
			s.teardown(&mut self.pool, io);
		}
	}
}

impl<P: Platform> HostController<P>
{
	/// Take ownership of a controller: reset it, build the schedule, and start it running
	pub fn new(io: P, config: Config) -> Result<HostController<P>, InitError>
	{
		let regs = Regs::new(io);
		log_notice!("UHCI: cmd={:#x} sts={:#x} flbase={:#x}",
			regs.read_op(OpReg::UsbCmd), regs.read_op(OpReg::UsbSts), regs.read_flbaseadd());

		Self::hw_reset(&regs, &config, ResetKind::Global)?;

		let mut pool = MemPool::new(config.pool_block_pages, config.pool_max_blocks);
		let schedule = match Schedule::init_skeleton(&mut pool, regs.io(), config.bandwidth_reclamation)
			{
			Ok(v) => v,
			Err(e) => {
				// SAFE: Controller is halted, and nothing has been handed to it
				unsafe { pool.release_blocks(regs.io()) };
				return Err(e);
				},
			};
		let frame_list = schedule.frame_list_bus();
		let rv = HostController {
			regs,
			config,
			state: spin::Mutex::new(HostState::new(pool, Some(schedule))),
			tick_lock: spin::Mutex::new( () ),
			};
		// On failure, dropping `rv` halts the controller and releases the schedule
		rv.start(frame_list)?;
		log_notice!("UHCI: Running, frame list at {:#x}", rv.regs.read_flbaseadd());
		Ok(rv)
	}

	pub fn io(&self) -> &P {
		self.regs.io()
	}
	pub fn config(&self) -> &Config {
		&self.config
	}

	fn stall_ms(&self, ms: u64) {
		self.regs.io().stall_us(ms * 1000);
	}
	/// Poll until `cond` holds, or `timeout_ms` passes
	fn wait_for(regs: &Regs<P>, timeout_ms: u32, mut cond: impl FnMut(&Regs<P>)->bool) -> bool {
		let deadline = regs.io().time_us() + timeout_ms as u64 * 1000;
		loop
		{
			if cond(regs) {
				return true;
			}
			if regs.io().time_us() >= deadline {
				return false;
			}
			regs.io().stall_us(100);
		}
	}

	/// Stop the controller, and wait for it to report halted
	fn hw_stop(regs: &Regs<P>, config: &Config) -> Result<(), InitError> {
		// SAFE: Stopping the controller doesn't start DMA
		unsafe {
			regs.write_op(OpReg::UsbCmd, regs.read_op(OpReg::UsbCmd) & !hw_regs::USBCMD_Run);
		}
		if !Self::wait_for(regs, config.reset_timeout_ms, |r| r.read_op(OpReg::UsbSts) & hw_regs::USBSTS_HcHalted != 0) {
			log_error!("UHCI: Controller didn't halt");
			return Err(InitError::HaltTimeout);
		}
		Ok( () )
	}
	fn hw_reset(regs: &Regs<P>, config: &Config, kind: ResetKind) -> Result<(), InitError> {
		if let Err(e) = Self::hw_stop(regs, config) {
			// Keep going, a reset should get it back
			log_warning!("UHCI: Stop before reset failed: {}", e);
		}
		if kind == ResetKind::Global {
			// SAFE: Controller is stopped
			unsafe { regs.write_op(OpReg::UsbCmd, hw_regs::USBCMD_GlobalReset) };
			regs.io().stall_us(GLOBAL_RESET_STALL_MS * 1000);
			// SAFE: Controller is stopped
			unsafe { regs.write_op(OpReg::UsbCmd, 0) };
			regs.io().stall_us(RECOVERY_STALL_MS * 1000);
		}
		// SAFE: Controller is stopped
		unsafe { regs.write_op(OpReg::UsbCmd, hw_regs::USBCMD_HCReset) };
		if !Self::wait_for(regs, config.reset_timeout_ms, |r| r.read_op(OpReg::UsbCmd) & hw_regs::USBCMD_HCReset == 0) {
			log_error!("UHCI: Host controller reset timed out");
			return Err(InitError::ResetTimeout);
		}
		Ok( () )
	}
	/// Program the frame list and start the controller
	fn start(&self, frame_list: u32) -> Result<(), InitError> {
		let r = &self.regs;
		// SAFE: The frame list is valid for the lifetime of the schedule
		unsafe {
			r.write_flbaseadd(frame_list);
			r.write_op(OpReg::FrNum, 0);
			r.write_sofmod(hw_regs::SOFMOD_DEFAULT);
			r.write_op(OpReg::UsbSts, hw_regs::USBSTS_ALL);
			// Polled operation, no interrupts
			r.write_op(OpReg::UsbIntr, 0);
			r.write_op(OpReg::UsbCmd, hw_regs::USBCMD_Run | hw_regs::USBCMD_ConfigureFlag | hw_regs::USBCMD_MaxPacket64);
		}
		if !Self::wait_for(r, self.config.reset_timeout_ms, |r| r.read_op(OpReg::UsbSts) & hw_regs::USBSTS_HcHalted == 0) {
			log_error!("UHCI: Controller didn't start");
			return Err(InitError::HaltTimeout);
		}
		Ok( () )
	}

	/// Current (11-bit) frame number
	pub fn frame_number(&self) -> u16 {
		self.regs.read_op(OpReg::FrNum) & hw_regs::FRNUM_MASK
	}
	pub fn capability(&self) -> Capability {
		Capability {
			max_speed: Speed::Full,
			port_count: hw_regs::PORT_COUNT,
			is_64bit: false,
		}
	}
	fn is_running(&self) -> bool {
		self.regs.read_op(OpReg::UsbSts) & hw_regs::USBSTS_HcHalted == 0
	}

	pub fn state(&self) -> HcState {
		if self.regs.read_op(OpReg::UsbCmd) & hw_regs::USBCMD_GlobalSuspend != 0 {
			HcState::Suspend
		}
		else if !self.is_running() {
			HcState::Halt
		}
		else {
			HcState::Operational
		}
	}
	pub fn set_state(&self, new_state: HcState) -> Result<(), InitError> {
		let cur = self.state();
		log_debug!("set_state: {:?} -> {:?}", cur, new_state);
		match new_state
		{
		HcState::Halt => Self::hw_stop(&self.regs, &self.config),
		HcState::Operational => {
			if cur == HcState::Suspend {
				let cmd = self.regs.read_op(OpReg::UsbCmd);
				// SAFE: Resume signalling only
				unsafe { self.regs.write_op(OpReg::UsbCmd, cmd | hw_regs::USBCMD_ForceResume) };
				self.stall_ms(FORCE_GLOBAL_RESUME_STALL_MS);
				// SAFE: As above
				unsafe { self.regs.write_op(OpReg::UsbCmd, cmd & !(hw_regs::USBCMD_ForceResume | hw_regs::USBCMD_GlobalSuspend)) };
			}
			let cmd = self.regs.read_op(OpReg::UsbCmd);
			// SAFE: The schedule is always valid while the controller exists
			unsafe { self.regs.write_op(OpReg::UsbCmd, cmd | hw_regs::USBCMD_Run) };
			if !Self::wait_for(&self.regs, self.config.reset_timeout_ms, |r| r.read_op(OpReg::UsbSts) & hw_regs::USBSTS_HcHalted == 0) {
				return Err(InitError::HaltTimeout);
			}
			Ok( () )
			},
		HcState::Suspend => {
			Self::hw_stop(&self.regs, &self.config)?;
			let cmd = self.regs.read_op(OpReg::UsbCmd);
			// SAFE: Controller is halted
			unsafe { self.regs.write_op(OpReg::UsbCmd, cmd | hw_regs::USBCMD_GlobalSuspend) };
			Ok( () )
			},
		}
	}

	/// Reset the controller, discarding everything that was scheduled
	///
	/// Registered interrupt transfers are dropped without their callbacks being called. Data toggles are cleared.
	pub fn reset(&self, kind: ResetKind) -> Result<(), InitError> {
		log_notice!("UHCI: Reset ({:?})", kind);
		let _tick = self.tick_lock.lock();
		let mut st = self.state.lock();
		let st = &mut *st;
		let rv = Self::hw_reset(&self.regs, &self.config, kind);
		if let Err(e) = rv {
			// Can't safely release anything that the controller might still be reading
			log_error!("UHCI: Reset failed ({}), schedule left in place", e);
			return Err(e);
		}
		let n_int = st.async_list.len();
		if n_int > 0 {
			log_notice!("UHCI: Dropping {} interrupt transfers", n_int);
		}
		// SAFE: Controller is halted
		unsafe { st.release_all(self.regs.io()) };
		st.toggles.clear_all();
		// Synchronous transfers still polling see this and give up, their QHs went with the old schedule
		st.generation = st.generation.wrapping_add(1);
		let s = Schedule::init_skeleton(&mut st.pool, self.regs.io(), self.config.bandwidth_reclamation)?;
		let fl = s.frame_list_bus();
		st.schedule = Some(s);
		self.start(fl)
	}

	/// Current data toggle for an endpoint (the value the next transfer will start with)
	pub fn data_toggle(&self, ep: EndpointAddr, dir: Direction) -> bool {
		self.state.lock().toggles.get(ep, dir)
	}
	/// Reset an endpoint's data toggle to DATA0 (e.g. after clearing a halt)
	pub fn reset_data_toggle(&self, ep: EndpointAddr, dir: Direction) {
		log_debug!("reset_data_toggle({:?} {:?})", ep, dir);
		self.state.lock().toggles.set(ep, dir, false);
	}

	/// Pool units in use (descriptors, bounce buffers, and retired memory)
	pub fn pool_used_units(&self) -> usize {
		self.state.lock().pool.used_units()
	}
	/// Retired items waiting in (`Recycle`, `RecycleWait`)
	pub fn reclaim_pending(&self) -> (usize, usize) {
		self.state.lock().reclaim.pending()
	}
	/// Run `f` with the current schedule (for diagnostics)
	pub fn with_schedule<R>(&self, f: impl FnOnce(&Schedule)->R) -> Option<R> {
		self.state.lock().schedule.as_ref().map(f)
	}
}

impl<P: Platform> ::core::ops::Drop for HostController<P>
{
	fn drop(&mut self)
	{
		log_notice!("UHCI: Shutting down");
		let halted = Self::hw_stop(&self.regs, &self.config).is_ok();
		let st = self.state.get_mut();
		if !halted {
			// Leak the memory rather than free it under a running controller
			log_error!("UHCI: Controller won't halt, leaking {} pool units", st.pool.used_units());
			let leaked = ::core::mem::replace(st, HostState::new(MemPool::new(1, 0), None));
			::core::mem::forget(leaked);
			return ;
		}
		// SAFE: Controller is halted
		unsafe {
			st.release_all(self.regs.io());
			st.pool.release_blocks(self.regs.io());
		}
	}
}
