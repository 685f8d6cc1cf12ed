// "Tifflin" Kernel Tests (usb_uhci)
// - By John Hodge (Mutabah)
//
// tests/usb_uhci/tests/structures.rs
//! Descriptor pool, TD chains and the schedule skeleton (no controller running)
use usb_uhci::mem_pool::{MemPool,PoolError};
use usb_uhci::descriptors::{self,PacketTarget,Qh};
use usb_uhci::hw_structs::{self,Pid,Link};
use usb_uhci::schedule::{Schedule,Skel,Interval,IntervalRounding,AsyncClass,FRAME_LIST_LEN};
use usb_uhci::reclaim::{ReclaimQueue,Retired,RetireState};
use crate::SimPlatform;

fn target(mps: usize) -> PacketTarget {
	PacketTarget { dev: 3, endpt: 1, low_speed: false, max_packet: mps }
}

#[test]
fn pool_alloc_release()
{
	let io = SimPlatform::new();
	let mut pool = MemPool::new(1, 2);
	let a = pool.alloc(&io, 16).expect("alloc");
	let b = pool.alloc(&io, 100).expect("alloc");
	assert_eq!(a.bus_addr() % 16, 0);
	assert_eq!(b.bus_addr() % 16, 0);
	assert!(b.len() >= 100);
	assert_eq!(pool.used_units(), 1 + 4);
	assert_eq!(pool.block_count(), 1);
	assert_eq!(io.lock().dma_pages_in_use(), 1);

	pool.release(a);
	// Freed space is reused
	let c = pool.alloc(&io, 32).expect("alloc");
	assert_eq!(pool.used_units(), 1 + 4);
	pool.release(b);
	pool.release(c);
	assert_eq!(pool.used_units(), 0);
	unsafe { pool.release_blocks(&io) };
	assert_eq!(io.lock().dma_pages_in_use(), 0);
}

#[test]
fn pool_exhaustion()
{
	let io = SimPlatform::new();
	let mut pool = MemPool::new(1, 1);
	let a = pool.alloc(&io, 0x1000).expect("alloc");
	assert_eq!(pool.alloc(&io, 16).err(), Some(PoolError::Exhausted));
	pool.release(a);
	let b = pool.alloc(&io, 16).expect("alloc after release");
	pool.release(b);
	unsafe { pool.release_blocks(&io) };
}

#[test]
fn pool_platform_failure()
{
	let io = SimPlatform::new();
	io.lock().dma_page_limit = Some(0);
	let mut pool = MemPool::new(1, 4);
	match pool.alloc(&io, 16)
	{
	Err(PoolError::Platform(_)) => {},
	Err(e) => panic!("Unexpected error {:?}", e),
	Ok(h) => panic!("Allocation succeeded with no DMA memory: {:?}", h),
	}
}

#[test]
fn pool_rejects_high_memory()
{
	let io = SimPlatform::new();
	io.lock().set_next_bus(1 << 32);
	let mut pool = MemPool::new(1, 4);
	assert_eq!(pool.alloc(&io, 16).err(), Some(PoolError::AddressTooHigh));
	assert_eq!(io.lock().dma_pages_in_use(), 0);
}

#[test]
fn td_chain_layout()
{
	let io = SimPlatform::new();
	let mut pool = MemPool::new(1, 1);
	let buf = pool.alloc(&io, 200).expect("alloc");
	let chain = descriptors::build_td_chain(&mut pool, &io, &target(64), Pid::In, buf.bus_addr(), 200, true).expect("chain");
	assert_eq!(chain.len(), 4);
	assert_eq!(chain.data_range(), 0 .. 4);
	let exp_len = [64, 64, 64, 8];
	for (i, td) in chain.tds().iter().enumerate()
	{
		let cs = td.ctrl_sts();
		let token = td.token();
		let is_last = i == 3;
		assert_eq!(Pid::from_token(token), Some(Pid::In));
		assert_eq!(hw_structs::token_dev(token), 3);
		assert_eq!(hw_structs::token_endpt(token), 1);
		assert_eq!(hw_structs::token_maxlen(token), exp_len[i]);
		assert_eq!(hw_structs::token_toggle(token), i % 2 == 0, "TD {} toggle", i);
		assert_eq!(td.buffer(), buf.bus_addr() + 64 * i as u32);
		assert!(cs & hw_structs::TD_CS_Active != 0);
		assert_eq!(cs & hw_structs::TD_CS_CERR_MASK, 3 << hw_structs::TD_CS_CERR_SHIFT);
		assert_eq!(cs & hw_structs::TD_CS_IOC != 0, is_last);
		// Every IN TD halts the queue on a short packet
		assert!(cs & hw_structs::TD_CS_SPD != 0, "TD {} SPD", i);
		assert!(cs & hw_structs::TD_CS_LowSpeed == 0);
		if is_last {
			assert_eq!(td.link(), hw_structs::LINK_TERMINATE);
		}
		else {
			assert_eq!(td.link(), Link::Td { addr: chain.td(i+1).phys(), depth_first: true }.encode());
		}
	}
	chain.release(&mut pool);
	pool.release(buf);
	assert_eq!(pool.used_units(), 0);
	unsafe { pool.release_blocks(&io) };
}

#[test]
fn td_chain_zero_length()
{
	let io = SimPlatform::new();
	let mut pool = MemPool::new(1, 1);
	let chain = descriptors::build_td_chain(&mut pool, &io, &target(8), Pid::Out, 0, 0, false).expect("chain");
	assert_eq!(chain.len(), 1);
	let td = chain.td(0);
	assert_eq!(hw_structs::token_maxlen(td.token()), 0);
	assert_eq!(td.token() >> hw_structs::TOKEN_MAXLEN_SHIFT, hw_structs::TOKEN_MAXLEN_NULL);
	assert_eq!(td.buffer(), 0);
	// No short packet detect on OUT
	assert!(td.ctrl_sts() & hw_structs::TD_CS_SPD == 0);
	chain.release(&mut pool);
	unsafe { pool.release_blocks(&io) };
}

#[test]
fn td_chain_low_speed()
{
	let io = SimPlatform::new();
	let mut pool = MemPool::new(1, 1);
	let t = PacketTarget { low_speed: true, ..target(8) };
	let chain = descriptors::build_td_chain(&mut pool, &io, &t, Pid::In, 0x1000, 16, false).expect("chain");
	assert!(chain.tds().iter().all(|td| td.ctrl_sts() & hw_structs::TD_CS_LowSpeed != 0));
	chain.release(&mut pool);
	unsafe { pool.release_blocks(&io) };
}

#[test]
fn control_chain_stages()
{
	let io = SimPlatform::new();
	let mut pool = MemPool::new(1, 1);
	let chain = descriptors::build_control_chain(&mut pool, &io, &target(8), 0x2000, Some((Pid::In, 0x3000, 18))).expect("chain");
	let pids: Vec<_> = chain.tds().iter().map(|td| Pid::from_token(td.token())).collect();
	assert_eq!(pids, [Some(Pid::Setup), Some(Pid::In), Some(Pid::In), Some(Pid::In), Some(Pid::Out)]);
	let toggles: Vec<_> = chain.tds().iter().map(|td| hw_structs::token_toggle(td.token())).collect();
	assert_eq!(toggles, [false, true, false, true, true]);
	assert_eq!(chain.data_range(), 1 .. 4);
	assert_eq!(hw_structs::token_maxlen(chain.td(0).token()), 8);
	assert_eq!(hw_structs::token_maxlen(chain.td(3).token()), 2);
	assert_eq!(hw_structs::token_maxlen(chain.td(4).token()), 0);
	// Only the final TD raises an interrupt
	for (i, td) in chain.tds().iter().enumerate() {
		assert_eq!(td.ctrl_sts() & hw_structs::TD_CS_IOC != 0, i == 4, "TD {}", i);
	}
	assert_eq!(chain.td(3).link(), Link::Td { addr: chain.td(4).phys(), depth_first: true }.encode());
	chain.release(&mut pool);

	let chain = descriptors::build_control_chain(&mut pool, &io, &target(64), 0x2000, None).expect("chain");
	assert_eq!(chain.len(), 2);
	assert_eq!(chain.data_range(), 1 .. 1);
	assert_eq!(Pid::from_token(chain.td(1).token()), Some(Pid::In));
	assert!(hw_structs::token_toggle(chain.td(1).token()));
	chain.release(&mut pool);
	unsafe { pool.release_blocks(&io) };
}

#[test]
fn chain_not_started()
{
	let io = SimPlatform::new();
	let mut pool = MemPool::new(1, 1);
	let mut chain = descriptors::build_td_chain(&mut pool, &io, &target(8), Pid::In, 0x1000, 24, false).expect("chain");
	assert_eq!(chain.check(0), descriptors::ChainStatus::Active { actual: 0 });
	assert_eq!(chain.next_toggle(), None);
	chain.deactivate();
	assert!(chain.tds().iter().all(|td| td.ctrl_sts() & hw_structs::TD_CS_Active == 0));
	chain.release(&mut pool);
	unsafe { pool.release_blocks(&io) };
}

#[test]
fn skeleton_walk()
{
	let io = SimPlatform::new();
	let mut pool = MemPool::new(1, 1);
	let s = Schedule::init_skeleton(&mut pool, &io, false).expect("skeleton");
	assert_eq!(pool.used_units(), super::SKELETON_UNITS);
	// Slot 0 visits every interval class, odd slots only the 1-frame class
	assert_eq!(s.walk_from_slot(0).len(), 11 + 4);
	assert_eq!(s.walk_from_slot(1).len(), 1 + 4);
	assert_eq!(s.walk_from_slot(8).len(), 4 + 4);
	assert_eq!(s.walk_from_slot(512).len(), 10 + 4);
	let w = s.walk_from_slot(3);
	assert_eq!(w[0], s.skel(Skel::Interval(0)).phys());
	assert_eq!(w[1], s.skel(Skel::SyncInt).phys());
	assert_eq!(w[2], s.skel(Skel::LsControl).phys());
	assert_eq!(w[3], s.skel(Skel::FsControl).phys());
	assert_eq!(w[4], s.skel(Skel::Bulk).phys());
	assert_eq!(s.skel(Skel::Bulk).hlink(), hw_structs::LINK_TERMINATE);
	for i in 0 .. FRAME_LIST_LEN {
		assert_eq!(s.frame_slot(i) & hw_structs::LINK_QH, hw_structs::LINK_QH);
	}
	unsafe { s.teardown(&mut pool, &io) };
	assert_eq!(pool.used_units(), 0);
	unsafe { pool.release_blocks(&io) };
	assert_eq!(io.lock().dma_pages_in_use(), 0);
}

#[test]
fn skeleton_bandwidth_reclamation()
{
	let io = SimPlatform::new();
	let mut pool = MemPool::new(1, 1);
	let s = Schedule::init_skeleton(&mut pool, &io, true).expect("skeleton");
	assert!(s.bandwidth_reclamation());
	assert_eq!(s.skel(Skel::Bulk).hlink(), Link::Qh(s.skel(Skel::FsControl).phys()).encode());
	// The loop is only walked once
	assert_eq!(s.walk_from_slot(1).len(), 1 + 4);
	unsafe { s.teardown(&mut pool, &io) };
	unsafe { pool.release_blocks(&io) };
}

#[test]
fn periodic_insert_unlink()
{
	let io = SimPlatform::new();
	let mut pool = MemPool::new(1, 1);
	let mut s = Schedule::init_skeleton(&mut pool, &io, false).expect("skeleton");
	let qh = Qh::new(&mut pool, &io).expect("qh");
	let phys = qh.phys();
	let id = s.insert_periodic(qh, Interval::round(8, IntervalRounding::Down).expect("interval"));
	assert_eq!(s.dynamic_count(), 1);
	for i in 0 .. FRAME_LIST_LEN
	{
		assert_eq!(s.walk_from_slot(i).contains(&phys), i % 8 == 0, "slot {}", i);
	}
	// Placed directly after its class head
	let w = s.walk_from_slot(8);
	let pos = w.iter().position(|&a| a == phys).expect("reachable");
	assert_eq!(w[pos - 1], s.skel(Skel::Interval(3)).phys());
	assert_eq!(w[pos + 1], s.skel(Skel::Interval(2)).phys());

	let qh = s.unlink(id);
	assert_eq!(s.dynamic_count(), 0);
	assert!(s.qh(id).is_none());
	for i in 0 .. FRAME_LIST_LEN {
		assert!(!s.walk_from_slot(i).contains(&phys));
	}
	assert_eq!(s.walk_from_slot(0).len(), 11 + 4);
	pool.release(qh.into_handle());
	unsafe { s.teardown(&mut pool, &io) };
	unsafe { pool.release_blocks(&io) };
}

#[test]
fn async_insert_order()
{
	let io = SimPlatform::new();
	let mut pool = MemPool::new(1, 1);
	let mut s = Schedule::init_skeleton(&mut pool, &io, false).expect("skeleton");
	let a = Qh::new(&mut pool, &io).expect("qh");
	let b = Qh::new(&mut pool, &io).expect("qh");
	let c = Qh::new(&mut pool, &io).expect("qh");
	let (pa, pb, pc) = (a.phys(), b.phys(), c.phys());
	let ia = s.insert_async(a, AsyncClass::Bulk);
	let ib = s.insert_async(b, AsyncClass::Bulk);
	let ic = s.insert_async(c, AsyncClass::FsControl);
	let bulk = s.skel(Skel::Bulk).phys();
	let fs = s.skel(Skel::FsControl).phys();
	let w = s.walk_from_slot(1);
	assert_eq!(&w[w.len()-5 ..], &[fs, pc, bulk, pa, pb]);

	// Removing the middle of a segment re-links around it
	let a = s.unlink(ia);
	let w = s.walk_from_slot(1);
	assert_eq!(&w[w.len()-4 ..], &[fs, pc, bulk, pb]);
	let b = s.unlink(ib);
	let c = s.unlink(ic);
	assert_eq!(s.skel(Skel::Bulk).hlink(), hw_structs::LINK_TERMINATE);
	for q in vec![a, b, c] {
		pool.release(q.into_handle());
	}
	unsafe { s.teardown(&mut pool, &io) };
	unsafe { pool.release_blocks(&io) };
}

#[test]
fn reclaim_needs_a_frame()
{
	let io = SimPlatform::new();
	let mut pool = MemPool::new(1, 1);
	let mut q = ReclaimQueue::new();
	// Establish the current frame
	assert_eq!(q.sweep(&mut pool, 5), 0);

	let item = Retired::new("test").with_buffer(pool.alloc(&io, 64).expect("alloc"));
	assert_eq!(item.state(), RetireState::PendingUnlink);
	q.retire(item);
	assert_eq!(q.pending(), (1, 0));
	assert_eq!(q.sweep(&mut pool, 5), 0);
	assert_eq!(q.pending(), (1, 0));
	assert_eq!(q.sweep(&mut pool, 6), 0);
	assert_eq!(q.pending(), (0, 1));
	assert_eq!(pool.used_units(), 2);
	// Retired in this frame, so only moves to the wait list
	q.retire(Retired::new("test").with_buffer(pool.alloc(&io, 32).expect("alloc")));
	assert_eq!(q.sweep(&mut pool, 7), 1);
	assert_eq!(q.pending(), (0, 1));
	assert_eq!(pool.used_units(), 1);
	assert_eq!(q.sweep(&mut pool, 8), 1);
	assert!(q.is_empty());
	assert_eq!(pool.used_units(), 0);
	unsafe { pool.release_blocks(&io) };
}
