// "Tifflin" Kernel - UHCI USB driver
// - By John Hodge (Mutabah / thePowersGang)
//
// Modules/usb_uhci/error.rs
//! Error types returned by the driver

/// Failure of a single transfer (or of a request to start one)
#[derive(Debug,Copy,Clone,PartialEq,Eq)]
pub enum TransferError
{
	/// The device returned a STALL handshake
	Stall,
	/// Host-side data buffer over/underrun
	BufferError,
	/// The device sent more data than was expected
	Babble,
	/// Bit-stuffing error on the wire
	BitStuff,
	/// CRC error or hardware timeout, after the hardware exhausted its error count
	Crc,
	/// The transfer did not complete within the caller's timeout
	Timeout,
	/// The descriptor pool is exhausted and cannot be grown
	OutOfResources,
	/// Malformed length, endpoint, interval or buffer
	InvalidParameter,
	/// The controller is not running
	NotRunning,
}
impl ::core::fmt::Display for TransferError
{
	fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
		f.write_str(match self
			{
			TransferError::Stall => "endpoint stalled",
			TransferError::BufferError => "data buffer error",
			TransferError::Babble => "babble detected",
			TransferError::BitStuff => "bit stuffing error",
			TransferError::Crc => "CRC/timeout error",
			TransferError::Timeout => "transfer timed out",
			TransferError::OutOfResources => "out of descriptor memory",
			TransferError::InvalidParameter => "invalid parameter",
			TransferError::NotRunning => "controller not running",
			})
	}
}

/// Failure to bring up (or reset) the controller
#[derive(Debug,Copy,Clone,PartialEq,Eq)]
pub enum InitError
{
	/// The platform could not provide DMA memory for the frame list or pool
	NoMemory(&'static str),
	/// Memory was provided, but is not reachable by a 32-bit bus master
	AddressTooHigh,
	/// The controller did not complete a reset in time
	ResetTimeout,
	/// The controller did not leave (or enter) the halted state in time
	HaltTimeout,
}
impl ::core::fmt::Display for InitError
{
	fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
		match self
		{
		InitError::NoMemory(why) => write!(f, "DMA allocation failed: {}", why),
		InitError::AddressTooHigh => f.write_str("DMA memory above 4GiB"),
		InitError::ResetTimeout => f.write_str("controller reset timed out"),
		InitError::HaltTimeout => f.write_str("controller run/stop timed out"),
		}
	}
}
impl From<crate::mem_pool::PoolError> for InitError
{
	fn from(e: crate::mem_pool::PoolError) -> Self {
		match e
		{
		crate::mem_pool::PoolError::Exhausted => InitError::NoMemory("descriptor pool exhausted"),
		crate::mem_pool::PoolError::Platform(why) => InitError::NoMemory(why),
		crate::mem_pool::PoolError::AddressTooHigh => InitError::AddressTooHigh,
		}
	}
}
impl From<crate::mem_pool::PoolError> for TransferError
{
	fn from(_: crate::mem_pool::PoolError) -> Self {
		TransferError::OutOfResources
	}
}
