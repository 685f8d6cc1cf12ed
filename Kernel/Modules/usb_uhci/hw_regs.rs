// "Tifflin" Kernel - UHCI USB driver
// - By John Hodge (Mutabah / thePowersGang)
//
// Modules/usb_uhci/hw_regs.rs
//! Hardware definitions (register file and constants)
#![allow(non_upper_case_globals)]
#![allow(dead_code)]
use crate::platform::Platform;

/// Number of root hub ports on a UHCI controller
pub const PORT_COUNT: u8 = 2;
/// Default Start-Of-Frame modify value (gives 12000 bit times per frame)
pub const SOFMOD_DEFAULT: u8 = 64;

pub struct Regs<P>
{
	io: P,
}
impl<P: Platform> Regs<P>
{
	pub fn new(io: P) -> Self {
		Regs { io }
	}
	pub fn io(&self) -> &P {
		&self.io
	}
}

#[repr(usize)]
#[derive(Debug,Copy,Clone)]
pub enum OpReg {
	/// USB Command Register
	///
	/// *  0 = Run/Stop
	/// *  1 = Host Controller Reset
	/// *  2 = Global Reset
	/// *  3 = Enter Global Suspend Mode
	/// *  4 = Force Global Resume
	/// *  5 = Software Debug
	/// *  6 = Configure Flag
	/// *  7 = Max Packet (0 = 32 bytes, 1 = 64 bytes)
	/// *  8:15 = Reserved (ZERO)
	UsbCmd = 0x00,
	/// USB Status Register (write-one-to-clear)
	UsbSts = 0x02,
	/// USB Interrupt Enable Register
	UsbIntr = 0x04,
	/// Frame Number Register (11 bits)
	FrNum = 0x06,
}
const REG_FLBASEADD: usize = 0x08;
const REG_SOFMOD: usize = 0x0C;
const REG_PORTSC0: usize = 0x10;

impl<P: Platform> Regs<P>
{
	pub fn read_op(&self, reg: OpReg) -> u16 {
		self.io.read_16(reg as usize)
	}
	pub unsafe fn write_op(&self, reg: OpReg, v: u16) {
		#[cfg(debug_assertions)]
		match reg
		{
		OpReg::UsbCmd => assert!(v & 0xFF00 == 0, "Reserved bits set in UsbCmd"),
		OpReg::UsbSts => {},
		OpReg::UsbIntr => assert!(v & 0xFFF0 == 0, "Reserved bits set in UsbIntr"),
		OpReg::FrNum => assert!(v & !0x7FF == 0, "FrNum out of range"),
		}
		self.io.write_16(reg as usize, v)
	}

	/// Frame List Base Address
	pub fn read_flbaseadd(&self) -> u32 {
		self.io.read_32(REG_FLBASEADD)
	}
	/// UNSAFE: The address must point to a valid frame list
	pub unsafe fn write_flbaseadd(&self, v: u32) {
		assert!(v & 0xFFF == 0, "Frame list base {:#x} not page aligned", v);
		self.io.write_32(REG_FLBASEADD, v)
	}

	/// Start Of Frame Modify
	pub fn read_sofmod(&self) -> u8 {
		self.io.read_8(REG_SOFMOD)
	}
	pub unsafe fn write_sofmod(&self, v: u8) {
		self.io.write_8(REG_SOFMOD, v & 0x7F)
	}

	/// Port Status and Control Register
	pub fn read_port_sc(&self, index: u8) -> u16 {
		assert!(index < PORT_COUNT);
		self.io.read_16(REG_PORTSC0 + index as usize * 2)
	}
	/// (Write) Port Status and Control Register
	///
	/// NOTE: `PORTSC_WC_BITS` are write-one-to-clear, mask them out unless clearing them is intended
	pub unsafe fn write_port_sc(&self, index: u8, v: u16) {
		assert!(index < PORT_COUNT);
		self.io.write_16(REG_PORTSC0 + index as usize * 2, v)
	}
}

pub const USBCMD_Run              : u16 = 0x0001;
pub const USBCMD_HCReset          : u16 = 0x0002;
pub const USBCMD_GlobalReset      : u16 = 0x0004;
pub const USBCMD_GlobalSuspend    : u16 = 0x0008;
pub const USBCMD_ForceResume      : u16 = 0x0010;
pub const USBCMD_SwDebug          : u16 = 0x0020;
pub const USBCMD_ConfigureFlag    : u16 = 0x0040;
/// Use 64 byte packets for full-speed bandwidth reclamation
pub const USBCMD_MaxPacket64      : u16 = 0x0080;

/// Interrupt on completion / short packet
pub const USBSTS_UsbInt           : u16 = 0x0001;
/// A transaction errored out (C_ERR reached zero)
pub const USBSTS_UsbError         : u16 = 0x0002;
pub const USBSTS_ResumeDetect     : u16 = 0x0004;
/// PCI bus error during DMA
pub const USBSTS_HostSystemError  : u16 = 0x0008;
/// The controller found a malformed schedule
pub const USBSTS_HcProcessError   : u16 = 0x0010;
pub const USBSTS_HcHalted         : u16 = 0x0020;
pub const USBSTS_ALL              : u16 = 0x003F;

pub const USBINTR_Timeout         : u16 = 0x0001;
pub const USBINTR_Resume          : u16 = 0x0002;
pub const USBINTR_IOC             : u16 = 0x0004;
pub const USBINTR_ShortPacket     : u16 = 0x0008;

pub const FRNUM_MASK              : u16 = 0x07FF;

pub const PORTSC_CurrentConnectStatus: u16 = 0x0001;
pub const PORTSC_ConnectStatusChange : u16 = 0x0002;
pub const PORTSC_PortEnabled         : u16 = 0x0004;
pub const PORTSC_PortEnableChange    : u16 = 0x0008;
pub const PORTSC_LineStatus_MASK     : u16 = 0x0030;
pub const PORTSC_ResumeDetect        : u16 = 0x0040;
/// Reserved, always reads as one
pub const PORTSC_Reserved1           : u16 = 0x0080;
pub const PORTSC_LowSpeed            : u16 = 0x0100;
pub const PORTSC_PortReset           : u16 = 0x0200;
pub const PORTSC_Suspend             : u16 = 0x1000;
/// Write-one-to-clear bits
pub const PORTSC_WC_BITS             : u16 = PORTSC_ConnectStatusChange | PORTSC_PortEnableChange;
