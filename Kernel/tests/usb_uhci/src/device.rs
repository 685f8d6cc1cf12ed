// "Tifflin" Kernel Tests (usb_uhci)
// - By John Hodge (Mutabah)
//
// tests/usb_uhci/device.rs
//! Simulated USB function (endpoint queues, control pipe, fault injection)
use std::collections::{HashMap,VecDeque};
use usb_uhci::hw_structs::Pid;

/// Error to report instead of a handshake
#[derive(Debug,Copy,Clone,PartialEq,Eq)]
pub enum Fault
{
	Stall,
	Crc,
	Babble,
}

/// Device's reaction to one token
#[derive(Debug,Clone,PartialEq,Eq)]
pub enum Response
{
	/// Handshake (with data for IN)
	Ack(Vec<u8>),
	Nak,
	Stall,
	/// No response (CRC/timeout after retries)
	Timeout,
	/// Sent more than the token allowed
	Babble,
}

#[derive(Default)]
pub struct EndpointSim
{
	/// Packets to return to IN tokens (NAKs when empty)
	pub in_packets: VecDeque<Vec<u8>>,
	/// Everything received by OUT tokens
	pub out_data: Vec<u8>,
	/// Tokens that got a handshake or error (NAKs not counted)
	pub packets: usize,
	/// Number of NAKs to return before responding, `u32::MAX` NAKs forever
	pub nak: u32,
	/// Fault to raise on the given (1-based) packet number
	pub fault_at: Option<(usize, Fault)>,
}

enum ControlState
{
	Idle,
	DataIn(VecDeque<u8>),
	DataOut,
	/// No data stage, waiting for the host's IN status
	StatusIn,
	/// IN data done, waiting for the host's OUT status
	StatusOut,
	Stalled,
}

pub struct Device
{
	pub address: u8,
	pub low_speed: bool,
	pub endpoints: Vec<EndpointSim>,
	/// Every SETUP received
	pub setups: Vec<[u8; 8]>,
	/// Data stage of the last control OUT
	pub control_out: Vec<u8>,
	/// IN control responses, by (bRequest, wValue)
	pub responses: HashMap<(u8, u16), Vec<u8>>,
	control: ControlState,
}

impl Device
{
	pub fn new(address: u8, low_speed: bool) -> Device {
		Device {
			address,
			low_speed,
			endpoints: (0 .. 16).map(|_| EndpointSim::default()).collect(),
			setups: Vec::new(),
			control_out: Vec::new(),
			responses: HashMap::new(),
			control: ControlState::Idle,
		}
	}
	pub fn ep(&mut self, endpt: u8) -> &mut EndpointSim {
		&mut self.endpoints[endpt as usize]
	}
	pub fn queue_in(&mut self, endpt: u8, data: &[u8]) {
		self.ep(endpt).in_packets.push_back(data.to_owned());
	}
	/// Queue `data` split into `mps` sized packets (with a trailing short/zero-length packet)
	pub fn queue_in_split(&mut self, endpt: u8, data: &[u8], mps: usize) {
		for c in data.chunks(mps) {
			self.queue_in(endpt, c);
		}
		if data.len() % mps == 0 {
			self.queue_in(endpt, &[]);
		}
	}

	/// Handle one token addressed to this device
	pub fn transact(&mut self, pid: Pid, endpt: u8, data_out: &[u8], maxlen: usize) -> Response {
		let is_control = endpt == 0;
		let ep = &mut self.endpoints[endpt as usize];
		if pid != Pid::Setup && ep.nak > 0 {
			if ep.nak != u32::MAX {
				ep.nak -= 1;
			}
			return Response::Nak;
		}
		if !is_control && pid == Pid::In && ep.in_packets.is_empty() {
			return Response::Nak;
		}
		ep.packets += 1;
		if let Some((n, f)) = ep.fault_at {
			if ep.packets == n {
				ep.fault_at = None;
				return match f
					{
					Fault::Stall => Response::Stall,
					Fault::Crc => Response::Timeout,
					Fault::Babble => Response::Babble,
					};
			}
		}

		if is_control {
			return self.control_token(pid, data_out, maxlen);
		}
		match pid
		{
		Pid::Setup => Response::Stall,
		Pid::Out => {
			ep.out_data.extend_from_slice(data_out);
			Response::Ack(Vec::new())
			},
		Pid::In => match ep.in_packets.pop_front()
			{
			Some(p) if p.len() > maxlen => Response::Babble,
			Some(p) => Response::Ack(p),
			None => Response::Nak,
			},
		}
	}

	fn control_token(&mut self, pid: Pid, data_out: &[u8], maxlen: usize) -> Response {
		match pid
		{
		Pid::Setup => {
			let mut s = [0; 8];
			s.copy_from_slice(&data_out[..8]);
			self.setups.push(s);
			self.control_out.clear();
			let req_type = s[0];
			let req = s[1];
			let value = u16::from_le_bytes([s[2], s[3]]);
			let length = u16::from_le_bytes([s[6], s[7]]) as usize;
			self.control = if length == 0 {
					ControlState::StatusIn
				}
				else if req_type & 0x80 != 0 {
					match self.responses.get(&(req, value))
					{
					Some(r) => ControlState::DataIn(r.iter().take(length).cloned().collect()),
					None => ControlState::Stalled,
					}
				}
				else {
					ControlState::DataOut
				};
			Response::Ack(Vec::new())
			},
		Pid::In => match self.control
			{
			ControlState::DataIn(ref mut q) => {
				let n = ::std::cmp::min(maxlen, q.len());
				let pkt: Vec<u8> = q.drain(..n).collect();
				if n < maxlen {
					self.control = ControlState::StatusOut;
				}
				Response::Ack(pkt)
				},
			ControlState::StatusIn | ControlState::DataOut => {
				self.control = ControlState::Idle;
				Response::Ack(Vec::new())
				},
			ControlState::Stalled => Response::Stall,
			ControlState::Idle | ControlState::StatusOut => Response::Nak,
			},
		Pid::Out => match self.control
			{
			ControlState::DataOut => {
				self.control_out.extend_from_slice(data_out);
				Response::Ack(Vec::new())
				},
			ControlState::DataIn(_) | ControlState::StatusOut => {
				self.control = ControlState::Idle;
				Response::Ack(Vec::new())
				},
			ControlState::Stalled => Response::Stall,
			ControlState::Idle | ControlState::StatusIn => Response::Nak,
			},
		}
	}
}
