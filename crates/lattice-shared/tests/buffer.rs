use std::sync::Arc;
use std::time::Duration;

use lattice_layout::flags;
use lattice_shared::{AccessError, SharedBuffer, WaitOutcome};

#[test]
fn starts_zeroed() {
    let buf = SharedBuffer::with_len(4096).expect("alloc");
    let mut probe = [0xAAu8; 64];
    buf.read_bytes(1000, &mut probe).expect("read");
    assert!(probe.iter().all(|b| *b == 0));
    for index in 0..32 {
        assert_eq!(buf.flag_load(index), 0);
    }
}

#[test]
fn rejects_bad_lengths() {
    assert!(matches!(
        SharedBuffer::with_len(100),
        Err(AccessError::BadLength { .. })
    ));
    assert!(matches!(
        SharedBuffer::with_len(1030),
        Err(AccessError::BadLength { .. })
    ));
    assert!(SharedBuffer::with_len(256).is_ok());
}

#[test]
fn byte_roundtrip_and_bounds() {
    let buf = SharedBuffer::with_len(1024).expect("alloc");
    buf.write_bytes(200, b"lattice").expect("write");
    let mut out = [0u8; 7];
    buf.read_bytes(200, &mut out).expect("read");
    assert_eq!(&out, b"lattice");

    assert_eq!(
        buf.write_bytes(1020, &[0u8; 5]),
        Err(AccessError::OutOfBounds {
            offset: 1020,
            len: 5,
            capacity: 1024
        })
    );
    let mut big = vec![0u8; 8];
    assert!(buf.read_bytes(usize::MAX - 4, &mut big).is_err());
}

#[test]
fn scalars_are_little_endian() {
    let buf = SharedBuffer::with_len(1024).expect("alloc");
    buf.write_u32(512, 0x1122_3344).expect("write");
    let mut raw = [0u8; 4];
    buf.read_bytes(512, &mut raw).expect("read");
    assert_eq!(raw, [0x44, 0x33, 0x22, 0x11]);
    assert_eq!(buf.read_u32(512).expect("read"), 0x1122_3344);
    assert_eq!(buf.read_i32(512).expect("read"), 0x1122_3344);

    buf.write_u64(520, u64::MAX - 1).expect("write");
    assert_eq!(buf.read_u64(520).expect("read"), u64::MAX - 1);
    assert_eq!(buf.read_i64(520).expect("read"), -2);

    buf.write_u32(528, 1.5f32.to_bits()).expect("write");
    assert_eq!(buf.read_f32(528).expect("read"), 1.5);
}

#[test]
fn zero_fill() {
    let buf = SharedBuffer::with_len(512).expect("alloc");
    buf.write_bytes(300, &[0xFF; 16]).expect("write");
    buf.zero_bytes(304, 8).expect("zero");
    let mut out = [0u8; 16];
    buf.read_bytes(300, &mut out).expect("read");
    assert_eq!(&out[..4], &[0xFF; 4]);
    assert_eq!(&out[4..12], &[0u8; 8]);
    assert_eq!(&out[12..], &[0xFF; 4]);
}

#[test]
fn atomic_words_require_alignment() {
    let buf = SharedBuffer::with_len(512).expect("alloc");
    buf.u32_store(260, 7).expect("store");
    assert_eq!(buf.u32_load(260).expect("load"), 7);
    assert_eq!(
        buf.u32_load(261),
        Err(AccessError::Misaligned {
            offset: 261,
            align: 4
        })
    );
}

#[test]
fn flag_add_wraps() {
    let buf = SharedBuffer::with_len(512).expect("alloc");
    buf.flag_store(flags::INBOX_DIRTY, i32::MAX);
    assert_eq!(buf.flag_add(flags::INBOX_DIRTY, 1), i32::MIN);
}

#[test]
fn flag_compare_exchange() {
    let buf = SharedBuffer::with_len(512).expect("alloc");
    assert_eq!(buf.flag_compare_exchange(5, 0, 42), Ok(0));
    assert_eq!(buf.flag_load(5), 42);
    assert_eq!(buf.flag_compare_exchange(5, 0, 7), Err(42));
    assert_eq!(buf.flag_load(5), 42);
}

#[test]
fn wait_returns_immediately_on_stale_expectation() {
    let buf = SharedBuffer::with_len(512).expect("alloc");
    buf.flag_store(flags::SYSTEM_PULSE, 3);
    let outcome = buf.wait(flags::SYSTEM_PULSE, 0, Some(Duration::from_secs(5)));
    assert_eq!(outcome, WaitOutcome::Changed(3));
}

#[test]
fn wait_times_out_without_change() {
    let buf = SharedBuffer::with_len(512).expect("alloc");
    let outcome = buf.wait(flags::SYSTEM_PULSE, 0, Some(Duration::from_millis(20)));
    assert_eq!(outcome, WaitOutcome::TimedOut(0));
}

#[test]
fn notify_wakes_parked_thread() {
    let buf = Arc::new(SharedBuffer::with_len(512).expect("alloc"));
    let waiter = buf.clone();
    let handle = std::thread::spawn(move || {
        waiter.wait(flags::OUTBOX_HOST_DIRTY, 0, Some(Duration::from_secs(10)))
    });

    // Give the waiter a chance to park before publishing.
    std::thread::sleep(Duration::from_millis(20));
    buf.flag_add(flags::OUTBOX_HOST_DIRTY, 1);
    buf.notify(flags::OUTBOX_HOST_DIRTY);

    assert_eq!(handle.join().expect("join"), WaitOutcome::Changed(1));
}

#[test]
fn notify_without_change_is_not_a_wakeup() {
    let buf = Arc::new(SharedBuffer::with_len(512).expect("alloc"));
    let waiter = buf.clone();
    let handle = std::thread::spawn(move || {
        waiter.wait(flags::MESH_EVENT_EPOCH, 0, Some(Duration::from_millis(80)))
    });
    std::thread::sleep(Duration::from_millis(10));
    // Spurious notify: the value still matches, so the waiter re-parks.
    buf.notify(flags::MESH_EVENT_EPOCH);
    assert_eq!(handle.join().expect("join"), WaitOutcome::TimedOut(0));
}
