// "Tifflin" Kernel Tests (usb_uhci)
// - By John Hodge (Mutabah)
//
// tests/usb_uhci/tests/mod.rs
//! Test cases
use usb_uhci::DeviceRequest;

mod structures;

/// Units taken by the skeleton queue heads
const SKELETON_UNITS: usize = 15;

fn get_descriptor(ty: u8, length: u16) -> DeviceRequest {
	DeviceRequest { req_type: 0x80, req_num: 6, value: (ty as u16) << 8, index: 0, length }
}

/// A plausible device descriptor
const DEVICE_DESC: [u8; 18] = [
	18, 1, 0x10,0x01, 0,0,0, 8,
	0x34,0x12, 0x78,0x56, 0x00,0x01,
	1, 2, 0, 1,
	];

/// Let the controller run a few frames and run maintenance, enough to flush the reclaim queue
fn settle(fw: &crate::TestFramework) {
	for _ in 0 .. 3 {
		fw.io.run_frames(1);
		fw.hc.tick();
	}
}
