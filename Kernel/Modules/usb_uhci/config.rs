// "Tifflin" Kernel - UHCI USB driver
// - By John Hodge (Mutabah / thePowersGang)
//
// Modules/usb_uhci/config.rs
//! Driver tunables, parsed from a kernel-style command line
use crate::schedule::IntervalRounding;

/// A value that can be set from the command line
trait ConfigValue: Sized
{
	fn parse(v: &str) -> Option<Self>;
}
impl ConfigValue for usize {
	fn parse(v: &str) -> Option<Self> {
		parse_int(v).map(|v| v as usize)
	}
}
impl ConfigValue for u32 {
	fn parse(v: &str) -> Option<Self> {
		parse_int(v).and_then(|v| if v <= u32::MAX as u64 { Some(v as u32) } else { None })
	}
}
impl ConfigValue for bool {
	fn parse(v: &str) -> Option<Self> {
		match v
		{
		"1" | "on" | "yes" | "true" => Some(true),
		"0" | "off" | "no" | "false" => Some(false),
		_ => None,
		}
	}
}
impl ConfigValue for IntervalRounding {
	fn parse(v: &str) -> Option<Self> {
		match v
		{
		"down" => Some(IntervalRounding::Down),
		"up" => Some(IntervalRounding::Up),
		_ => None,
		}
	}
}
fn parse_int(v: &str) -> Option<u64> {
	if let Some(hex) = v.strip_prefix("0x") {
		u64::from_str_radix(hex, 16).ok()
	}
	else {
		v.parse().ok()
	}
}

macro_rules! def_config_set {
	(
		$struct_name:ident : {
			$(
			$(#[$at:meta])*
			$sname:literal => $name:ident : $ty:ty = $default:expr,
			)*
		}
	) => {
		#[derive(Debug,Clone)]
		pub struct $struct_name {
			$( $(#[$at])* pub $name: $ty, )*
		}
		impl Default for $struct_name
		{
			fn default() -> Self {
				$struct_name { $($name: $default),* }
			}
		}
		impl $struct_name
		{
			/// Build a configuration from a space-separated list of `KEY=value` options
			///
			/// Unknown keys and unparseable values are logged and ignored.
			pub fn from_cmdline(cmdline: &str) -> Self
			{
				let mut rv = Self::default();
				for ent in cmdline.split(' ')
				{
					if ent == "" {
						continue ;
					}
					let mut it = ent.splitn(2, '=');
					let tag = it.next().unwrap_or("");
					let value = it.next();
					match tag
					{
					$(
					$sname => match value
						{
						Some(v) => match <$ty as ConfigValue>::parse(v)
							{
							Some(v) => rv.$name = v,
							None => log_warning!("{}: Invalid value '{}'", tag, v),
							},
						None => log_warning!("{} requires a value", tag),
						},
					)*
					v @ _ => log_warning!("Unknown option '{}'", v),
					}
				}
				rv
			}
		}
	};
}

def_config_set! {
	Config: {
		/// Minimum number of pages mapped each time the descriptor pool grows
		"UHCI_POOL_PAGES" => pool_block_pages: usize = 4,
		/// Maximum number of pool blocks (the pool never shrinks)
		"UHCI_POOL_BLOCKS" => pool_max_blocks: usize = 16,
		/// Polling interval for synchronous control transfers (microseconds)
		"UHCI_CTRL_POLL" => control_poll_us: u32 = 50,
		/// Polling interval for synchronous interrupt transfers (microseconds)
		"UHCI_INT_POLL" => interrupt_poll_us: u32 = 100,
		/// Polling interval for synchronous bulk transfers (microseconds)
		"UHCI_BULK_POLL" => bulk_poll_us: u32 = 200,
		/// Direction used when a periodic interval is not a power of two
		"UHCI_INTERVAL_ROUNDING" => interval_rounding: IntervalRounding = IntervalRounding::Down,
		/// Loop the bulk queue back to full-speed control (full-speed bandwidth reclamation)
		"UHCI_FSBR" => bandwidth_reclamation: bool = false,
		/// Largest single transfer accepted
		"UHCI_MAX_XFER" => max_transfer_len: usize = 64*1024,
		/// Upper bound on controller reset/halt waits (milliseconds)
		"UHCI_RESET_TIMEOUT" => reset_timeout_ms: u32 = 1000,
	}
}
