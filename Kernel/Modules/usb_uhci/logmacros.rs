// "Tifflin" Kernel - UHCI USB driver
// - By John Hodge (Mutabah / thePowersGang)
//
// Modules/usb_uhci/logmacros.rs
//! Kernel-style logging macros, routed through the `log` facade
#![allow(unused_macros)]

/// "Error" - The current subsystem errored, and most likely will no longer function
macro_rules! log_error{   ($($arg:tt)*) => (::log::error!($($arg)*)) }
/// Warning - Something unexpected happened, but it was recovered
macro_rules! log_warning{ ($($arg:tt)*) => (::log::warn!($($arg)*)) }
/// Notice - Out of the ordinary, but not unexpected
macro_rules! log_notice{  ($($arg:tt)*) => (::log::info!($($arg)*)) }
/// Information - Needs to be logged, but nothing to worry about
macro_rules! log_info{    ($($arg:tt)*) => (::log::info!($($arg)*)) }
/// Debug - Low level debugging information (values mostly)
macro_rules! log_debug{   ($($arg:tt)*) => (::log::debug!($($arg)*)) }
/// Trace - Very low level debugging information (action-by-action updates)
macro_rules! log_trace{
	($fmt:expr, $($arg:expr),*) => (::log::trace!(concat!("L{}: ",$fmt), line!() $(, $arg)*) );
	($str:expr) => (log_trace!($str, ));
	}

/// Wrapper around a `&[u8]` to print it as a hex dump
pub struct HexDump<'a>(pub &'a [u8]);
impl ::core::fmt::Debug for HexDump<'_>
{
	fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result
	{
		write!(f, "{} bytes: ", self.0.len())?;
		for (idx,v) in self.0.iter().enumerate()
		{
			write!(f, "{:02x} ", *v)?;
			if idx % 16 == 15 {
				write!(f, "| ")?;
			}
		}
		Ok( () )
	}
}

// vim: ft=rust
