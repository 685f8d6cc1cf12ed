// "Tifflin" Kernel - UHCI USB driver
// - By John Hodge (Mutabah / thePowersGang)
//
// Modules/usb_uhci/hw_structs.rs
//! Hardware descriptor layouts (UHCI 1.1 section 3)
#![allow(dead_code)]

/// Transfer descriptor
#[repr(C,align(16))]
pub struct TransferDesc
{
	/// Link pointer:
	/// - 31:4 = Address
	/// - 2 = Depth first (Vf)
	/// - 1 = QH select
	/// - 0 = Terminate
	pub link: u32,
	/// Control and status, see `TD_CS_*`
	pub ctrl_sts: u32,
	/// Token: PID, device address, endpoint, toggle and MaxLen
	pub token: u32,
	/// Data buffer (bus address)
	pub buffer: u32,
}
impl ::core::fmt::Debug for TransferDesc
{
	fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
		f.debug_struct("TransferDesc")
			.field("link", &Link::decode(self.link))
			.field("ctrl_sts", &format_args!("{act}{err:#x}/C{cerr}/{len}b",
				act = ["","ACTIVE/"][ (self.ctrl_sts & TD_CS_Active != 0) as usize ],
				err = self.ctrl_sts & TD_CS_STATUS_MASK,
				cerr = (self.ctrl_sts >> TD_CS_CERR_SHIFT) & 3,
				len = cs_actlen(self.ctrl_sts),
				))
			.field("token", &format_args!("{:?} {}:{} DT{} {}b",
				Pid::from_token(self.token),
				token_dev(self.token), token_endpt(self.token),
				token_toggle(self.token) as u8,
				token_maxlen(self.token),
				))
			.field("buffer", &format_args!("{:#x}", self.buffer))
			.finish()
	}
}

/// Queue head
#[repr(C,align(16))]
pub struct QueueHead
{
	/// Horizontal link (next QH, or terminate)
	pub hlink: u32,
	/// Element link (first TD of the queue, updated by the hardware as TDs complete)
	pub element: u32,
}
impl ::core::fmt::Debug for QueueHead
{
	fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
		f.debug_struct("QueueHead")
			.field("hlink", &Link::decode(self.hlink))
			.field("element", &Link::decode(self.element))
			.finish()
	}
}

pub const LINK_TERMINATE: u32 = 1 << 0;
pub const LINK_QH       : u32 = 1 << 1;
pub const LINK_DEPTH    : u32 = 1 << 2;
pub const LINK_ADDR_MASK: u32 = !0xF;

/// Decoded link pointer
#[derive(Debug,Copy,Clone,PartialEq,Eq)]
pub enum Link
{
	Terminate,
	Td { addr: u32, depth_first: bool },
	Qh(u32),
}
impl Link
{
	pub fn encode(self) -> u32 {
		match self
		{
		Link::Terminate => LINK_TERMINATE,
		Link::Td { addr, depth_first } => {
			debug_assert!(addr & !LINK_ADDR_MASK == 0, "Misaligned TD address {:#x}", addr);
			addr | (if depth_first { LINK_DEPTH } else { 0 })
			},
		Link::Qh(addr) => {
			debug_assert!(addr & !LINK_ADDR_MASK == 0, "Misaligned QH address {:#x}", addr);
			addr | LINK_QH
			},
		}
	}
	pub fn decode(v: u32) -> Link {
		if v & LINK_TERMINATE != 0 {
			Link::Terminate
		}
		else if v & LINK_QH != 0 {
			Link::Qh(v & LINK_ADDR_MASK)
		}
		else {
			Link::Td { addr: v & LINK_ADDR_MASK, depth_first: v & LINK_DEPTH != 0 }
		}
	}
}

pub const TD_CS_ACTLEN_MASK : u32 = 0x7FF;
pub const TD_CS_BitStuff    : u32 = 1 << 17;
/// CRC error, or no handshake within the turnaround time
pub const TD_CS_CrcTimeout  : u32 = 1 << 18;
pub const TD_CS_Nak         : u32 = 1 << 19;
pub const TD_CS_Babble      : u32 = 1 << 20;
pub const TD_CS_DataBuffer  : u32 = 1 << 21;
pub const TD_CS_Stalled     : u32 = 1 << 22;
pub const TD_CS_Active      : u32 = 1 << 23;
/// Interrupt on completion
pub const TD_CS_IOC         : u32 = 1 << 24;
/// Isochronous select
pub const TD_CS_IOS         : u32 = 1 << 25;
pub const TD_CS_LowSpeed    : u32 = 1 << 26;
pub const TD_CS_CERR_SHIFT  : u32 = 27;
pub const TD_CS_CERR_MASK   : u32 = 3 << TD_CS_CERR_SHIFT;
/// Short packet detect
pub const TD_CS_SPD         : u32 = 1 << 29;
/// All status bits (active and the error/handshake bits)
pub const TD_CS_STATUS_MASK : u32 = 0xFF << 16;
/// Bits that indicate a terminal error (NAK is retried by the hardware)
pub const TD_CS_ERROR_MASK  : u32 = TD_CS_Stalled | TD_CS_DataBuffer | TD_CS_Babble | TD_CS_CrcTimeout | TD_CS_BitStuff;

/// Number of bytes actually transferred, from a control/status value
pub fn cs_actlen(cs: u32) -> usize {
	// n-1 encoded, 0x7FF is zero bytes
	(((cs & TD_CS_ACTLEN_MASK) + 1) & TD_CS_ACTLEN_MASK) as usize
}

/// Packet identifier
#[derive(Debug,Copy,Clone,PartialEq,Eq)]
#[repr(u8)]
pub enum Pid
{
	Setup = 0x2D,
	In = 0x69,
	Out = 0xE1,
}
impl Pid
{
	pub fn from_token(token: u32) -> Option<Pid> {
		match token & 0xFF
		{
		0x2D => Some(Pid::Setup),
		0x69 => Some(Pid::In),
		0xE1 => Some(Pid::Out),
		_ => None,
		}
	}
}

pub const TOKEN_TOGGLE: u32 = 1 << 19;
pub const TOKEN_MAXLEN_SHIFT: u32 = 21;
/// MaxLen value for a zero-length packet
pub const TOKEN_MAXLEN_NULL: u32 = 0x7FF;

/// Build a TD token
pub fn make_token(pid: Pid, dev: u8, endpt: u8, toggle: bool, len: usize) -> u32 {
	debug_assert!(dev < 128);
	debug_assert!(endpt < 16);
	debug_assert!(len <= 1023 + 1);
	let maxlen = if len == 0 { TOKEN_MAXLEN_NULL } else { (len - 1) as u32 };
	(maxlen << TOKEN_MAXLEN_SHIFT)
		| (if toggle { TOKEN_TOGGLE } else { 0 })
		| (endpt as u32) << 15
		| (dev as u32) << 8
		| pid as u32
}
pub fn token_maxlen(token: u32) -> usize {
	(((token >> TOKEN_MAXLEN_SHIFT) + 1) & 0x7FF) as usize
}
pub fn token_toggle(token: u32) -> bool {
	token & TOKEN_TOGGLE != 0
}
pub fn token_dev(token: u32) -> u8 {
	((token >> 8) & 0x7F) as u8
}
pub fn token_endpt(token: u32) -> u8 {
	((token >> 15) & 0xF) as u8
}
