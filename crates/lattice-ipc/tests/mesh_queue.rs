use std::sync::Arc;

use lattice_bridge::Bridge;
use lattice_ipc::{IpcError, MeshConsumer, MeshProducer};
use lattice_layout::{flags, RegionId, Tier, MESH_MAX_PAYLOAD, MESH_SLOT_BYTES, MESH_SLOT_COUNT};
use lattice_shared::SharedBuffer;

fn setup() -> (Arc<SharedBuffer>, Arc<Bridge>) {
    let buf = Arc::new(SharedBuffer::for_tier(Tier::Mib32));
    let bridge =
        Arc::new(Bridge::initialize(buf.clone(), 0, buf.len(), "mesh-tests").expect("init"));
    (buf, bridge)
}

#[test]
fn events_roundtrip_in_order() {
    let (_buf, bridge) = setup();
    let producer = MeshProducer::new(bridge.clone()).expect("producer");
    let consumer = MeshConsumer::new(bridge.clone()).expect("consumer");

    producer.push_event(b"first").expect("push");
    producer.push_event(b"second").expect("push");
    producer.push_event(b"third").expect("push");
    assert_eq!(producer.pending(), 3);

    let events = consumer.drain_events().expect("drain");
    assert_eq!(events, vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()]);
    assert_eq!(producer.pending(), 0);
    assert_eq!(consumer.corrupt_count(), 0);
}

#[test]
fn payload_budget_is_enforced_at_the_producer() {
    let (_buf, bridge) = setup();
    let producer = MeshProducer::new(bridge.clone()).expect("producer");

    let exact = vec![0xA5; MESH_MAX_PAYLOAD];
    producer.push_event(&exact).expect("exact fit");

    let over = vec![0xA5; MESH_MAX_PAYLOAD + 1];
    assert_eq!(
        producer.push_event(&over),
        Err(IpcError::SlotOverflow {
            len: MESH_MAX_PAYLOAD + 1,
            max: MESH_MAX_PAYLOAD
        })
    );
    assert_eq!(producer.push_event(&[]), Err(IpcError::SlotOverflow { len: 0, max: MESH_MAX_PAYLOAD }));

    let consumer = MeshConsumer::new(bridge.clone()).expect("consumer");
    assert_eq!(consumer.drain_events().expect("drain"), vec![exact]);
}

#[test]
fn a_flipped_payload_bit_is_skipped_and_counted() {
    let (_buf, bridge) = setup();
    let producer = MeshProducer::new(bridge.clone()).expect("producer");
    let consumer = MeshConsumer::new(bridge.clone()).expect("consumer");

    producer.push_event(b"intact-before").expect("push");
    producer.push_event(b"will-be-damaged").expect("push");
    producer.push_event(b"intact-after").expect("push");

    // Flip one payload bit of the second slot after it was published.
    let view = bridge.region_view(RegionId::MeshEvents).expect("view");
    let slot = MESH_SLOT_BYTES + 16;
    let mut byte = [0u8; 1];
    view.read_bytes(slot, &mut byte).expect("read");
    byte[0] ^= 0x01;
    view.write_bytes(slot, &byte).expect("write");

    let events = consumer.drain_events().expect("drain");
    assert_eq!(events, vec![b"intact-before".to_vec(), b"intact-after".to_vec()]);
    assert_eq!(consumer.corrupt_count(), 1);
    // The queue kept moving: head caught up with tail.
    assert_eq!(producer.pending(), 0);
}

#[test]
fn an_out_of_range_size_is_skipped_and_counted() {
    let (buf, bridge) = setup();
    let producer = MeshProducer::new(bridge.clone()).expect("producer");
    let consumer = MeshConsumer::new(bridge.clone()).expect("consumer");

    producer.push_event(b"legit").expect("push");
    // Forge a second published slot with a hostile size header.
    let view = bridge.region_view(RegionId::MeshEvents).expect("view");
    view.write_u32(MESH_SLOT_BYTES, (MESH_MAX_PAYLOAD + 1) as u32)
        .expect("forge size");
    buf.flag_add(flags::MESH_TAIL, 1);
    buf.flag_add(flags::MESH_EVENT_EPOCH, 1);

    let events = consumer.drain_events().expect("drain");
    assert_eq!(events, vec![b"legit".to_vec()]);
    assert_eq!(consumer.corrupt_count(), 1);
}

#[test]
fn queue_full_is_reported_to_the_producer() {
    let (_buf, bridge) = setup();
    let producer = MeshProducer::new(bridge.clone()).expect("producer");

    for i in 0..MESH_SLOT_COUNT {
        producer.push_event(&[i as u8; 4]).expect("push");
    }
    assert_eq!(
        producer.push_event(b"one too many"),
        Err(IpcError::QueueFull {
            pending: MESH_SLOT_COUNT as u32
        })
    );

    // Draining frees every slot again.
    let consumer = MeshConsumer::new(bridge.clone()).expect("consumer");
    assert_eq!(consumer.drain_events().expect("drain").len(), MESH_SLOT_COUNT);
    producer.push_event(b"fits again").expect("push");
}

#[test]
fn slots_are_reused_after_wrap() {
    let (_buf, bridge) = setup();
    let producer = MeshProducer::new(bridge.clone()).expect("producer");
    let consumer = MeshConsumer::new(bridge.clone()).expect("consumer");

    // Three full generations of the slot array.
    for round in 0..3u32 {
        for i in 0..MESH_SLOT_COUNT as u32 {
            let tag = (round * MESH_SLOT_COUNT as u32 + i).to_le_bytes();
            producer.push_event(&tag).expect("push");
        }
        let events = consumer.drain_events().expect("drain");
        assert_eq!(events.len(), MESH_SLOT_COUNT);
        for (i, event) in events.iter().enumerate() {
            let got = u32::from_le_bytes(event.as_slice().try_into().expect("4 bytes"));
            assert_eq!(got, round * MESH_SLOT_COUNT as u32 + i as u32);
        }
    }
}

#[test]
fn epoch_flag_tracks_publishes() {
    let (_buf, bridge) = setup();
    let producer = MeshProducer::new(bridge.clone()).expect("producer");
    let before = bridge.atomic_load(flags::MESH_EVENT_EPOCH);
    producer.push_event(b"tick").expect("push");
    assert_ne!(bridge.atomic_load(flags::MESH_EVENT_EPOCH), before);
}
