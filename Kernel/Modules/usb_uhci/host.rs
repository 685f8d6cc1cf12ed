// "Tifflin" Kernel - UHCI USB driver
// - By John Hodge (Mutabah / thePowersGang)
//
// Modules/usb_uhci/host.rs
//! Endpoint addressing and request types used by the transfer API

#[derive(Copy,Clone,PartialEq,Eq)]
pub struct EndpointAddr(u16);	// 7 bit device and 4 bit endpoint (encoded together)
impl EndpointAddr
{
	pub fn new(dev: u8, endpt: u8) -> EndpointAddr {
		assert!(dev < 128);
		assert!(endpt < 16);
		EndpointAddr(dev as u16 * 16 + endpt as u16)
	}
	pub fn dev_addr(&self) -> u8 {
		(self.0 >> 4) as u8
	}
	pub fn endpt(&self) -> u8 {
		(self.0 & 0xF) as u8
	}
}
impl ::core::fmt::Debug for EndpointAddr
{
	fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
		write!(f, "{}:{}", self.dev_addr(), self.endpt())
	}
}

#[derive(Debug,Copy,Clone,PartialEq,Eq)]
pub enum Speed
{
	Low,
	Full,
}

#[derive(Debug,Copy,Clone,PartialEq,Eq)]
pub enum Direction
{
	In,
	Out,
}

/// Everything the scheduler needs to know about an endpoint
#[derive(Debug,Copy,Clone)]
pub struct Endpoint
{
	pub addr: EndpointAddr,
	pub speed: Speed,
	pub max_packet: u16,
}
impl Endpoint
{
	pub fn new(dev: u8, endpt: u8, speed: Speed, max_packet: u16) -> Endpoint {
		Endpoint { addr: EndpointAddr::new(dev, endpt), speed, max_packet }
	}
	pub(crate) fn packet_target(&self) -> crate::descriptors::PacketTarget {
		crate::descriptors::PacketTarget {
			dev: self.addr.dev_addr(),
			endpt: self.addr.endpt(),
			low_speed: self.speed == Speed::Low,
			max_packet: self.max_packet as usize,
		}
	}
}

/// Caller's data buffer for a transfer, the variant gives the direction
pub enum TransferData<'a>
{
	In(&'a mut [u8]),
	Out(&'a [u8]),
}
impl TransferData<'_>
{
	pub fn len(&self) -> usize {
		match self
		{
		TransferData::In(b) => b.len(),
		TransferData::Out(b) => b.len(),
		}
	}
	pub fn direction(&self) -> Direction {
		match self
		{
		TransferData::In(_) => Direction::In,
		TransferData::Out(_) => Direction::Out,
		}
	}
}

/// Control transfer SETUP packet
#[derive(Debug,Clone)]
pub struct DeviceRequest
{
	pub req_type: u8,
	pub req_num: u8,

	pub value: u16,
	pub index: u16,
	pub length: u16,
}
impl DeviceRequest
{
	pub fn to_bytes(&self) -> [u8; 8] {
		[
			self.req_type,
			self.req_num,
			(self.value >> 0) as u8, (self.value >> 8) as u8,
			(self.index >> 0) as u8, (self.index >> 8) as u8,
			(self.length >> 0) as u8, (self.length >> 8) as u8,
			]
	}
	/// Direction of the data stage, from bit 7 of `req_type`
	pub fn direction(&self) -> Direction {
		if self.req_type & 0x80 != 0 { Direction::In } else { Direction::Out }
	}
}

/// Data toggle state for every (device, endpoint, direction)
pub(crate) struct ToggleTable([u32; 128]);
impl ToggleTable
{
	pub fn new() -> ToggleTable {
		ToggleTable([0; 128])
	}
	fn bit(ep: EndpointAddr, dir: Direction) -> u32 {
		1 << (ep.endpt() as u32 + if dir == Direction::In { 16 } else { 0 })
	}
	pub fn get(&self, ep: EndpointAddr, dir: Direction) -> bool {
		self.0[ep.dev_addr() as usize] & Self::bit(ep, dir) != 0
	}
	pub fn set(&mut self, ep: EndpointAddr, dir: Direction, v: bool) {
		let b = Self::bit(ep, dir);
		let e = &mut self.0[ep.dev_addr() as usize];
		if v { *e |= b } else { *e &= !b }
	}
	pub fn clear_all(&mut self) {
		self.0 = [0; 128];
	}
}
