// "Tifflin" Kernel Tests (usb_uhci)
// - By John Hodge (Mutabah)
//
// tests/usb_uhci/lib.rs
//! Host-side tests for the UHCI driver, running against a simulated controller
use usb_uhci::{HostController,Config,Speed};

pub mod device;

#[cfg(test)]
mod tests;

pub use crate::sim::SimPlatform;
pub use crate::device::Device;

struct SimpleLogger;
impl ::log::Log for SimpleLogger
{
	fn enabled(&self, metadata: &::log::Metadata) -> bool {
		metadata.level() <= ::log::Level::Debug
	}
	fn log(&self, record: &::log::Record) {
		if self.enabled(record.metadata()) {
			let level_str = match record.level()
				{
				::log::Level::Error => "ERROR",
				::log::Level::Warn  => "WARN ",
				::log::Level::Info  => "INFO ",
				::log::Level::Debug => "DEBUG",
				::log::Level::Trace => "TRACE",
				};
			println!("{} {}: {}", level_str, record.module_path().unwrap_or("?"), record.args());
		}
	}
	fn flush(&self) {}
}
static LOGGER: SimpleLogger = SimpleLogger;

/// Install the logger (once per process)
pub fn init_logging() {
	::lazy_static::lazy_static! {
		static ref INIT: () = {
			if ::log::set_logger(&LOGGER).is_ok() {
				::log::set_max_level(::log::LevelFilter::Debug);
			}
			};
	}
	::lazy_static::initialize(&INIT);
}

/// A driver instance bound to a fresh simulated controller
pub struct TestFramework
{
	pub io: SimPlatform,
	pub hc: HostController<SimPlatform>,
}
impl TestFramework
{
	pub fn new() -> TestFramework {
		Self::with_config(Config::default())
	}
	pub fn with_config(config: Config) -> TestFramework {
		init_logging();
		let io = SimPlatform::new();
		let hc = match HostController::new(io.clone(), config)
			{
			Ok(v) => v,
			Err(e) => panic!("Controller init failed: {}", e),
			};
		TestFramework { io, hc }
	}

	/// Attach a device at `addr` (already addressed) to a root port
	pub fn attach(&self, port: usize, addr: u8, speed: Speed) {
		let low_speed = speed == Speed::Low;
		self.io.lock().connect(port, low_speed);
		self.io.add_device(Device::new(addr, low_speed));
	}
}
