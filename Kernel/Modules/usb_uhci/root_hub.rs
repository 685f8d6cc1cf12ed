// "Tifflin" Kernel - UHCI USB driver
// - By John Hodge (Mutabah / thePowersGang)
//
// Modules/usb_uhci/root_hub.rs
//! Root hub port status and control (presented as hub-class port features)
use crate::HostController;
use crate::platform::Platform;
use crate::hw_regs::{self,PORT_COUNT};
use crate::error::TransferError;

/// Time to hold a port in reset
const PORT_RESET_STALL_MS: u64 = 50;
/// Time after leaving reset before enabling the port
const PORT_RECOVERY_STALL_MS: u64 = 10;

#[derive(Debug,Copy,Clone,PartialEq,Eq)]
pub enum PortFeature
{
	Connection,
	Enable,
	Suspend,
	OverCurrent,
	Reset,
	Power,
	LowSpeed,
	CConnection = 16,
	CEnable,
	CSuspend,
	COverCurrent,
	CReset,
	Test,
	Indicator,
}

/// Hub-class port status (`wPortStatus`/`wPortChange`)
#[derive(Debug,Copy,Clone,PartialEq,Eq,Default)]
pub struct PortStatus
{
	pub status: u16,
	pub change: u16,
}
pub const PORT_STAT_CONNECTION  : u16 = 1 << 0;
pub const PORT_STAT_ENABLE      : u16 = 1 << 1;
pub const PORT_STAT_SUSPEND     : u16 = 1 << 2;
pub const PORT_STAT_OVERCURRENT : u16 = 1 << 3;
pub const PORT_STAT_RESET       : u16 = 1 << 4;
pub const PORT_STAT_POWER       : u16 = 1 << 8;
pub const PORT_STAT_LOW_SPEED   : u16 = 1 << 9;
pub const PORT_CHANGE_CONNECTION: u16 = 1 << 0;
pub const PORT_CHANGE_ENABLE    : u16 = 1 << 1;

impl PortStatus
{
	fn from_portsc(v: u16) -> PortStatus {
		let mut rv = PortStatus::default();
		// UHCI ports have no power switching
		rv.status |= PORT_STAT_POWER;
		if v & hw_regs::PORTSC_CurrentConnectStatus != 0 { rv.status |= PORT_STAT_CONNECTION; }
		if v & hw_regs::PORTSC_PortEnabled != 0 { rv.status |= PORT_STAT_ENABLE; }
		if v & hw_regs::PORTSC_Suspend != 0 { rv.status |= PORT_STAT_SUSPEND; }
		if v & hw_regs::PORTSC_PortReset != 0 { rv.status |= PORT_STAT_RESET; }
		if v & hw_regs::PORTSC_LowSpeed != 0 { rv.status |= PORT_STAT_LOW_SPEED; }
		if v & hw_regs::PORTSC_ConnectStatusChange != 0 { rv.change |= PORT_CHANGE_CONNECTION; }
		if v & hw_regs::PORTSC_PortEnableChange != 0 { rv.change |= PORT_CHANGE_ENABLE; }
		rv
	}

	/// Check a status or change feature
	pub fn get(&self, feature: PortFeature) -> bool {
		let (v, mask) = match feature
			{
			PortFeature::Connection  => (self.status, PORT_STAT_CONNECTION),
			PortFeature::Enable      => (self.status, PORT_STAT_ENABLE),
			PortFeature::Suspend     => (self.status, PORT_STAT_SUSPEND),
			PortFeature::OverCurrent => (self.status, PORT_STAT_OVERCURRENT),
			PortFeature::Reset       => (self.status, PORT_STAT_RESET),
			PortFeature::Power       => (self.status, PORT_STAT_POWER),
			PortFeature::LowSpeed    => (self.status, PORT_STAT_LOW_SPEED),
			PortFeature::CConnection => (self.change, PORT_CHANGE_CONNECTION),
			PortFeature::CEnable     => (self.change, PORT_CHANGE_ENABLE),
			_ => return false,
			};
		v & mask != 0
	}
}

impl<P: Platform> HostController<P>
{
	fn check_port(port: u8) -> Result<(), TransferError> {
		if port < PORT_COUNT { Ok( () ) } else { Err(TransferError::InvalidParameter) }
	}
	/// Read a port, masking off the write-one-to-clear bits (so the value can be written back)
	fn read_port_for_write(&self, port: u8) -> u16 {
		self.regs.read_port_sc(port) & !hw_regs::PORTSC_WC_BITS
	}

	pub fn port_status(&self, port: u8) -> Result<PortStatus, TransferError> {
		Self::check_port(port)?;
		Ok( PortStatus::from_portsc(self.regs.read_port_sc(port)) )
	}
	pub fn get_port_feature(&self, port: u8, feature: PortFeature) -> Result<bool, TransferError> {
		Ok( self.port_status(port)?.get(feature) )
	}

	pub fn set_port_feature(&self, port: u8, feature: PortFeature) -> Result<(), TransferError> {
		Self::check_port(port)?;
		let bit = match feature
			{
			PortFeature::Suspend => hw_regs::PORTSC_Suspend,
			PortFeature::Reset => hw_regs::PORTSC_PortReset,
			PortFeature::Enable => hw_regs::PORTSC_PortEnabled,
			PortFeature::Power => return Ok( () ),
			_ => return Err(TransferError::InvalidParameter),
			};
		log_debug!("set_port_feature({}, {:?})", port, feature);
		let v = self.read_port_for_write(port);
		// SAFE: Port control doesn't touch memory
		unsafe { self.regs.write_port_sc(port, v | bit) };
		Ok( () )
	}
	pub fn clear_port_feature(&self, port: u8, feature: PortFeature) -> Result<(), TransferError> {
		Self::check_port(port)?;
		let v = self.read_port_for_write(port);
		let nv = match feature
			{
			PortFeature::Enable => v & !hw_regs::PORTSC_PortEnabled,
			PortFeature::Suspend => v & !hw_regs::PORTSC_Suspend,
			PortFeature::Reset => v & !hw_regs::PORTSC_PortReset,
			PortFeature::CConnection => v | hw_regs::PORTSC_ConnectStatusChange,
			PortFeature::CEnable => v | hw_regs::PORTSC_PortEnableChange,
			PortFeature::Power | PortFeature::CSuspend | PortFeature::COverCurrent | PortFeature::CReset => return Ok( () ),
			_ => return Err(TransferError::InvalidParameter),
			};
		log_debug!("clear_port_feature({}, {:?})", port, feature);
		// SAFE: Port control doesn't touch memory
		unsafe { self.regs.write_port_sc(port, nv) };
		Ok( () )
	}

	/// Reset and enable a port, returning the resulting status (with change bits acknowledged)
	pub fn reset_port(&self, port: u8) -> Result<PortStatus, TransferError> {
		Self::check_port(port)?;
		log_notice!("UHCI: Resetting port {}", port);
		self.set_port_feature(port, PortFeature::Reset)?;
		self.stall_ms(PORT_RESET_STALL_MS);
		self.clear_port_feature(port, PortFeature::Reset)?;
		self.stall_ms(PORT_RECOVERY_STALL_MS);
		self.set_port_feature(port, PortFeature::Enable)?;
		let enabled = Self::wait_for(&self.regs, self.config.reset_timeout_ms, |r| r.read_port_sc(port) & hw_regs::PORTSC_PortEnabled != 0);
		let rv = self.port_status(port)?;
		self.clear_port_feature(port, PortFeature::CConnection)?;
		self.clear_port_feature(port, PortFeature::CEnable)?;
		if !enabled {
			log_notice!("UHCI: Port {} didn't enable ({:?})", port, rv);
			return Err(TransferError::Timeout);
		}
		Ok(rv)
	}
}
