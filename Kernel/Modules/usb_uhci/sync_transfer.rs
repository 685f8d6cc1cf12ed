// "Tifflin" Kernel - UHCI USB driver
// - By John Hodge (Mutabah / thePowersGang)
//
// Modules/usb_uhci/sync_transfer.rs
//! Synchronous (blocking, polled) control, bulk and interrupt transfers
use crate::{HostController,TransferOutcome};
use crate::platform::Platform;
use crate::host::{Endpoint,Speed,Direction,DeviceRequest,TransferData};
use crate::hw_regs::{self,OpReg};
use crate::hw_structs::Pid;
use crate::descriptors::{self,Qh,TdChain,ChainStatus};
use crate::mem_pool::PoolHandle;
use crate::reclaim::Retired;
use crate::schedule::{AsyncClass,QhId};
use crate::error::TransferError;

#[derive(Debug,Copy,Clone,PartialEq,Eq)]
enum Kind
{
	Control,
	Bulk,
	Interrupt,
}

/// Everything allocated for one transfer
struct Prepared
{
	qh: QhId,
	chain: TdChain,
	data: Option<PoolHandle>,
	setup: Option<PoolHandle>,
	/// Schedule generation the QH was linked into
	generation: u32,
}

fn valid_control_mps(mps: u16) -> bool {
	match mps
	{
	8 | 16 | 32 | 64 => true,
	_ => false,
	}
}

impl<P: Platform> HostController<P>
{
	/// Run a control transfer on `ep`
	///
	/// The data stage direction is given by the variant of `data`, which must agree with `setup.req_type` and have
	/// exactly `setup.length` bytes. SETUP is always DATA0, and the status stage DATA1.
	pub fn submit_control(&self, ep: &Endpoint, setup: &DeviceRequest, data: TransferData, timeout_ms: u32) -> TransferOutcome
	{
		log_debug!("submit_control({:?} {:?}, {} bytes)", ep.addr, crate::HexDump(&setup.to_bytes()), data.len());
		self.execute(Kind::Control, ep, Some(setup), data, timeout_ms)
	}
	/// Run a bulk transfer (direction given by the variant of `data`)
	pub fn submit_bulk(&self, ep: &Endpoint, data: TransferData, timeout_ms: u32) -> TransferOutcome
	{
		log_debug!("submit_bulk({:?} {:?} {} bytes)", ep.addr, data.direction(), data.len());
		self.execute(Kind::Bulk, ep, None, data, timeout_ms)
	}
	/// Run a single interrupt transfer, polled like a bulk transfer
	pub fn submit_interrupt(&self, ep: &Endpoint, data: TransferData, timeout_ms: u32) -> TransferOutcome
	{
		log_debug!("submit_interrupt({:?} {:?} {} bytes)", ep.addr, data.direction(), data.len());
		self.execute(Kind::Interrupt, ep, None, data, timeout_ms)
	}

	fn validate(&self, kind: Kind, ep: &Endpoint, setup: Option<&DeviceRequest>, data: &TransferData, timeout_ms: u32) -> Result<(), TransferError>
	{
		if timeout_ms == 0 || data.len() > self.config.max_transfer_len {
			return Err(TransferError::InvalidParameter);
		}
		let mps = ep.max_packet;
		let ok = match (kind, ep.speed)
			{
			(Kind::Control, Speed::Low) => mps == 8,
			(Kind::Control, Speed::Full) => valid_control_mps(mps),
			(Kind::Bulk, Speed::Low) => false,
			(Kind::Bulk, Speed::Full) => valid_control_mps(mps),
			(Kind::Interrupt, Speed::Low) => 1 <= mps && mps <= 8,
			(Kind::Interrupt, Speed::Full) => 1 <= mps && mps <= 64,
			};
		if !ok {
			log_debug!("{:?} transfer: Bad max packet {} for {:?} {:?}", kind, mps, ep.speed, ep.addr);
			return Err(TransferError::InvalidParameter);
		}
		if let Some(setup) = setup {
			if setup.length as usize != data.len() {
				return Err(TransferError::InvalidParameter);
			}
			if data.len() > 0 && setup.direction() != data.direction() {
				return Err(TransferError::InvalidParameter);
			}
		}
		Ok( () )
	}

	fn execute(&self, kind: Kind, ep: &Endpoint, setup: Option<&DeviceRequest>, mut data: TransferData, timeout_ms: u32) -> TransferOutcome
	{
		if let Err(e) = self.validate(kind, ep, setup, &data, timeout_ms) {
			return TransferOutcome::failed(e);
		}
		if !self.is_running() {
			return TransferOutcome::failed(TransferError::NotRunning);
		}
		let dir = data.direction();

		let p = match self.prepare(kind, ep, setup, &data)
			{
			Ok(p) => p,
			Err(e) => {
				log_debug!("{:?} {:?}: Can't start - {}", kind, ep.addr, e);
				return TransferOutcome::failed(e);
				},
			};

		let poll_us = match kind
			{
			Kind::Control => self.config.control_poll_us,
			Kind::Bulk => self.config.bulk_poll_us,
			Kind::Interrupt => self.config.interrupt_poll_us,
			} as u64;
		let io = self.regs.io();
		let deadline = io.time_us() + timeout_ms as u64 * 1000;
		// After a short packet in a control data stage, only the status stage is watched
		let mut start = 0;
		let mut base = 0;
		let (actual, status) = loop
			{
			match p.chain.check(start)
			{
			ChainStatus::Active { actual } => {
				let sts = self.regs.read_op(OpReg::UsbSts);
				if sts & (hw_regs::USBSTS_HostSystemError|hw_regs::USBSTS_HcProcessError) != 0 {
					log_error!("UHCI: Controller error (USBSTS={:#x}) during transfer", sts);
					break (base + actual, Err(TransferError::BufferError));
				}
				if sts & hw_regs::USBSTS_HcHalted != 0 {
					break (base + actual, Err(TransferError::NotRunning));
				}
				if io.time_us() >= deadline {
					log_debug!("{:?} {:?}: Timeout, {:?}", kind, ep.addr, p.chain);
					break (base + actual, Err(TransferError::Timeout));
				}
				if self.state.lock().generation != p.generation {
					log_notice!("{:?} {:?}: Controller was reset during the transfer", kind, ep.addr);
					break (base + actual, Err(TransferError::NotRunning));
				}
				},
			ChainStatus::Complete { actual } => break (base + actual, Ok(())),
			ChainStatus::Short { actual, index } => {
				let data_range = p.chain.data_range();
				if kind == Kind::Control && start == 0 && data_range.contains(&index) {
					// Resume the queue at the status stage
					base = actual;
					start = data_range.end;
					let st = self.state.lock();
					if st.generation == p.generation {
						if let Some(qh) = st.schedule.as_ref().and_then(|s| s.qh(p.qh)) {
							// SAFE: The status TD is part of the chain, which stays alive until retired
							unsafe { qh.set_element(p.chain.link_to(start)) };
						}
					}
					continue ;
				}
				break (base + actual, Ok(()));
				},
			ChainStatus::Error { actual, index, error } => {
				log_debug!("{:?} {:?}: TD {} failed: {}", kind, ep.addr, index, error);
				break (base + actual, Err(error));
				},
			}
			io.stall_us(poll_us);
			};

		self.finish(kind, ep, dir, p, &mut data, actual);
		TransferOutcome { actual, status }
	}

	/// Allocate and link everything for a transfer
	fn prepare(&self, kind: Kind, ep: &Endpoint, setup: Option<&DeviceRequest>, data: &TransferData) -> Result<Prepared, TransferError>
	{
		let io = self.regs.io();
		let target = ep.packet_target();
		let mut st = self.state.lock();
		let st = &mut *st;
		if st.schedule.is_none() {
			return Err(TransferError::NotRunning);
		}
		// Transfers retire their descriptors, so reclaim here too (`tick` may not be running)
		let frame = self.frame_number();
		st.reclaim.sweep(&mut st.pool, frame);

		let data_buf = if data.len() > 0 {
				let mut b = st.pool.alloc(io, data.len())?;
				if let TransferData::Out(src) = data {
					b.fill(0, src);
				}
				Some(b)
			}
			else {
				None
			};
		// Anything allocated here was never visible to the controller, so can be released directly on failure
		let release = |pool: &mut crate::mem_pool::MemPool, handles: &mut [Option<PoolHandle>]| {
			for h in handles.iter_mut() {
				if let Some(h) = h.take() {
					pool.release(h);
				}
			}
			};
		let setup_buf = match setup
			{
			Some(s) => match st.pool.alloc(io, 8)
				{
				Ok(mut b) => { b.fill(0, &s.to_bytes()); Some(b) },
				Err(e) => {
					release(&mut st.pool, &mut [data_buf]);
					return Err(e.into());
					},
				},
			None => None,
			};
		let qh = match Qh::new(&mut st.pool, io)
			{
			Ok(v) => v,
			Err(e) => {
				release(&mut st.pool, &mut [data_buf, setup_buf]);
				return Err(e.into());
				},
			};
		let data_addr = data_buf.as_ref().map(|b| b.bus_addr()).unwrap_or(0);
		let pid = match data.direction() { Direction::In => Pid::In, Direction::Out => Pid::Out };
		let chain = match kind
			{
			Kind::Control => {
				let setup_addr = setup_buf.as_ref().map(|b| b.bus_addr()).unwrap_or(0);
				descriptors::build_control_chain(&mut st.pool, io, &target, setup_addr, Some((pid, data_addr, data.len())))
				},
			Kind::Bulk | Kind::Interrupt => {
				let toggle = st.toggles.get(ep.addr, data.direction());
				descriptors::build_td_chain(&mut st.pool, io, &target, pid, data_addr, data.len(), toggle)
				},
			};
		let chain = match chain
			{
			Ok(v) => v,
			Err(e) => {
				st.pool.release(qh.into_handle());
				release(&mut st.pool, &mut [data_buf, setup_buf]);
				return Err(e.into());
				},
			};
		log_trace!("prepare: {:?} {:?}", qh, chain);

		qh.attach(&chain);
		let schedule = st.schedule()?;
		let id = match kind
			{
			Kind::Control if ep.speed == Speed::Low => schedule.insert_async(qh, AsyncClass::LsControl),
			Kind::Control => schedule.insert_async(qh, AsyncClass::FsControl),
			Kind::Bulk => schedule.insert_async(qh, AsyncClass::Bulk),
			Kind::Interrupt => schedule.insert_sync_interrupt(qh),
			};
		Ok(Prepared { qh: id, chain, data: data_buf, setup: setup_buf, generation: st.generation })
	}

	/// Unlink a finished (or abandoned) transfer, update toggles, copy IN data out, and retire the descriptors
	fn finish(&self, kind: Kind, ep: &Endpoint, dir: Direction, mut p: Prepared, data: &mut TransferData, actual: usize)
	{
		let mut st = self.state.lock();
		let st = &mut *st;
		let mut r = Retired::new("sync");
		if st.generation == p.generation {
			let qh = match st.schedule.as_mut()
				{
				Some(s) => s.unlink(p.qh),
				None => panic!("BUG: Transfer outstanding without a schedule"),
				};
			r = r.with_qh(qh);
		}
		else {
			// The QH was released by the reset, and the toggle state cleared
			log_debug!("finish: {:?} outlived its schedule", ep.addr);
		}
		if kind != Kind::Control && st.generation == p.generation {
			if let Some(t) = p.chain.next_toggle() {
				st.toggles.set(ep.addr, dir, t);
			}
		}
		p.chain.deactivate();
		if let TransferData::In(ref mut dst) = *data {
			if let Some(ref b) = p.data {
				let n = ::core::cmp::min(actual, dst.len());
				b.read(0, &mut dst[..n]);
			}
		}

		r = r.with_chain(p.chain);
		if let Some(b) = p.data {
			r = r.with_buffer(b);
		}
		if let Some(b) = p.setup {
			r = r.with_buffer(b);
		}
		st.reclaim.retire(r);
	}
}
