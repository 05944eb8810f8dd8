use std::sync::Arc;
use std::thread;
use std::time::Duration;

use vscan::{
    Channel, ChannelConfig, ErrorCode, ErrorFlags, Frame, FrameFlags, Loopback, Malformed, Mode,
    RawFrame, Speed, VscanError, api_version, describe, READ_CAPACITY,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn raw(id: u32, data: &[u8]) -> RawFrame {
    let mut frame = RawFrame {
        id,
        size: data.len() as u8,
        flags: FrameFlags::STANDARD.bits(),
        ..RawFrame::default()
    };
    frame.data[..data.len()].copy_from_slice(data);
    frame
}

#[test]
fn self_reception_scenario() {
    init_logging();
    let backend = Arc::new(Loopback::new());

    let mut channel = Channel::open(backend.clone(), "COM1", Mode::SelfReception).unwrap();
    channel.set_speed(Speed::Kbps500).unwrap();
    assert_eq!(backend.speed("COM1"), Some(Speed::Kbps500));

    let frame = Frame::new(0x123, &[0xAA, 0xBB]).unwrap();
    assert_eq!(channel.write(&[frame]).unwrap(), 1);

    let received = channel.read().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].id(), 0x123);
    assert_eq!(received[0].len(), 2);
    assert_eq!(received[0].data(), &[0xAA, 0xBB]);

    channel.close().unwrap();
    assert_eq!(backend.open_channels(), 0);
}

#[test]
fn loopback_preserves_every_payload_length() {
    let backend = Arc::new(Loopback::new());
    let mut channel = Channel::open(backend, "COM1", Mode::SelfReception).unwrap();

    let payload = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];
    let frames: Vec<Frame> = (0..=8)
        .map(|len| Frame::new_extended(0x1800_0000 + len as u32, &payload[..len]).unwrap())
        .collect();
    assert_eq!(channel.write(&frames).unwrap(), frames.len());

    let received = channel.read().unwrap();
    assert_eq!(received, frames);
}

#[test]
fn read_is_empty_when_nothing_pending() {
    let backend = Arc::new(Loopback::new());
    let mut channel = Channel::open(backend, "COM1", Mode::Normal).unwrap();
    assert!(channel.read().unwrap().is_empty());
}

#[test]
fn read_never_exceeds_capacity() {
    let backend = Arc::new(Loopback::new());
    let mut channel = Channel::open(backend.clone(), "COM1", Mode::Normal).unwrap();
    for id in 0..(READ_CAPACITY as u32 + 8) {
        assert!(backend.inject("COM1", raw(id, &[id as u8])));
    }

    let first = channel.read().unwrap();
    assert_eq!(first.len(), READ_CAPACITY);
    assert_eq!(first[0].id(), 0);
    assert_eq!(first[READ_CAPACITY - 1].id(), READ_CAPACITY as u32 - 1);

    let rest = channel.read().unwrap();
    assert_eq!(rest.len(), 8);
    assert_eq!(rest[0].id(), READ_CAPACITY as u32);
}

#[test]
fn read_rejects_overreported_count() {
    let backend = Arc::new(Loopback::new());
    let mut channel = Channel::open(backend.clone(), "COM1", Mode::Normal).unwrap();
    backend.inject("COM1", raw(1, &[1]));
    backend.set_read_overreport(READ_CAPACITY);

    let err = channel.read().unwrap_err();
    assert!(matches!(
        err,
        VscanError::MalformedFrame(Malformed::CountOverrun { capacity: READ_CAPACITY, .. })
    ));
}

#[test]
fn malformed_entry_fails_the_batch() {
    let backend = Arc::new(Loopback::new());
    let mut channel = Channel::open(backend.clone(), "COM1", Mode::Normal).unwrap();
    backend.inject("COM1", raw(1, &[1, 2]));
    backend.inject(
        "COM1",
        RawFrame {
            id: 2,
            size: 9,
            ..RawFrame::default()
        },
    );
    backend.inject("COM1", raw(3, &[3]));

    let err = channel.read().unwrap_err();
    assert!(matches!(
        err,
        VscanError::MalformedFrame(Malformed::PayloadLength { index: 1, len: 9 })
    ));
}

#[test]
fn partial_write_reports_accepted_prefix() {
    let backend = Arc::new(Loopback::new());
    let mut channel = Channel::open(backend.clone(), "COM1", Mode::Normal).unwrap();
    backend.set_tx_capacity(Some(2));

    let frames: Vec<Frame> = (1..=5).map(|id| Frame::new(id, &[id as u8]).unwrap()).collect();
    let written = channel.write(&frames).unwrap();
    assert_eq!(written, 2);

    let sent: Vec<u32> = backend.transmitted().iter().map(|f| f.id).collect();
    assert_eq!(sent, vec![1, 2]);

    // The caller resubmits the remainder itself
    backend.set_tx_capacity(None);
    assert_eq!(channel.write(&frames[written..]).unwrap(), 3);
    let sent: Vec<u32> = backend.transmitted().iter().map(|f| f.id).collect();
    assert_eq!(sent, vec![1, 2, 3, 4, 5]);
}

#[test]
fn write_count_is_clamped_to_batch() {
    let backend = Arc::new(Loopback::new());
    let mut channel = Channel::open(backend.clone(), "COM1", Mode::Normal).unwrap();
    backend.set_write_overreport(4);
    let frames = [Frame::new(1, &[]).unwrap(), Frame::new(2, &[]).unwrap()];
    assert_eq!(channel.write(&frames).unwrap(), 2);
}

#[test]
fn empty_write_skips_backend() {
    let backend = Arc::new(Loopback::new());
    let mut channel = Channel::open(backend.clone(), "COM1", Mode::Normal).unwrap();
    let calls = backend.calls();
    assert_eq!(channel.write(&[]).unwrap(), 0);
    assert_eq!(backend.calls(), calls);
}

#[test]
fn oversized_frame_never_reaches_backend() {
    let backend = Arc::new(Loopback::new());
    let _channel = Channel::open(backend.clone(), "COM1", Mode::Normal).unwrap();
    let calls = backend.calls();

    let err = Frame::new(0x123, &[0; 9]).unwrap_err();
    assert!(matches!(err, VscanError::InvalidArgument(_)));
    let err = Frame::from_parts(0x123, 9, [0; 8], FrameFlags::STANDARD).unwrap_err();
    assert!(matches!(err, VscanError::InvalidArgument(_)));

    assert_eq!(backend.calls(), calls);
}

#[test]
fn write_rejection_is_a_device_error() {
    let backend = Arc::new(Loopback::new());
    let mut channel = Channel::open(backend.clone(), "COM1", Mode::ListenOnly).unwrap();
    let err = channel.write(&[Frame::new(1, &[]).unwrap()]).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::LISTEN_ONLY));
    assert_eq!(
        err.describe_with(&*backend),
        "VSCAN device error -10: Channel is in listen only mode"
    );
}

#[test]
fn read_failure_is_a_device_error() {
    let backend = Arc::new(Loopback::new());
    let mut channel = Channel::open(backend.clone(), "COM1", Mode::Normal).unwrap();
    backend.fail_read(ErrorCode::SUBAPI);
    assert_eq!(channel.read().unwrap_err().code(), Some(ErrorCode::SUBAPI));
    // The fault was one-shot; the channel still works
    assert!(channel.read().unwrap().is_empty());
}

#[test]
fn open_failure_surfaces_code() {
    let backend = Arc::new(Loopback::with_ports(&["COM1"]));
    let err = Channel::open(backend.clone(), "COM7", Mode::Normal).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::NO_DEVICE_FOUND));
    assert_eq!(describe(&*backend, ErrorCode::NO_DEVICE_FOUND), "No device found");

    backend.fail_open(ErrorCode::NOT_ENOUGH_MEMORY);
    let err = Channel::open(backend, "COM1", Mode::Normal).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::NOT_ENOUGH_MEMORY));
}

#[test]
fn nul_in_port_is_rejected_before_backend() {
    let backend = Arc::new(Loopback::new());
    let err = Channel::open(backend.clone(), "CO\0M1", Mode::Normal).unwrap_err();
    assert!(matches!(err, VscanError::InvalidArgument(_)));
    assert_eq!(backend.calls(), 0);
}

#[test]
fn empty_port_opens_first_found() {
    let backend = Arc::new(Loopback::with_ports(&["COM5"]));
    let mut channel = Channel::open(backend.clone(), "", Mode::Normal).unwrap();
    channel.set_speed(Speed::Kbps125).unwrap();
    assert_eq!(backend.speed("COM5"), Some(Speed::Kbps125));
}

#[test]
fn closed_channel_reports_invalid_state() {
    let backend = Arc::new(Loopback::new());
    let mut channel = Channel::open(backend.clone(), "COM1", Mode::Normal).unwrap();
    channel.close().unwrap();
    let calls = backend.calls();

    let frame = Frame::new(1, &[]).unwrap();
    assert!(matches!(channel.read(), Err(VscanError::InvalidState { .. })));
    assert!(matches!(channel.write(&[frame]), Err(VscanError::InvalidState { .. })));
    assert!(matches!(channel.flush(), Err(VscanError::InvalidState { .. })));
    assert!(matches!(
        channel.set_speed(Speed::Mbps1),
        Err(VscanError::InvalidState { .. })
    ));
    assert!(matches!(
        channel.set_timestamps(true),
        Err(VscanError::InvalidState { .. })
    ));
    assert!(matches!(
        channel.set_blocking_read(true),
        Err(VscanError::InvalidState { .. })
    ));
    assert!(matches!(channel.hw_params(), Err(VscanError::InvalidState { .. })));
    assert!(matches!(channel.error_flags(), Err(VscanError::InvalidState { .. })));
    assert!(matches!(channel.close(), Err(VscanError::InvalidState { .. })));
    assert_eq!(backend.calls(), calls);
}

#[test]
fn closed_from_closer_reports_invalid_state() {
    let backend = Arc::new(Loopback::new());
    let mut channel = Channel::open(backend.clone(), "COM1", Mode::Normal).unwrap();
    channel.closer().close().unwrap();
    assert_eq!(backend.open_channels(), 0);
    let calls = backend.calls();

    let frame = Frame::new(1, &[1]).unwrap();
    assert!(!channel.is_open());
    assert!(matches!(channel.write(&[frame]), Err(VscanError::InvalidState { .. })));
    assert!(matches!(
        channel.set_speed(Speed::Kbps125),
        Err(VscanError::InvalidState { .. })
    ));
    assert!(matches!(channel.close(), Err(VscanError::InvalidState { .. })));
    assert_eq!(backend.calls(), calls);
}

#[test]
fn failed_close_still_retires_channel() {
    let backend = Arc::new(Loopback::new());
    let mut channel = Channel::open(backend.clone(), "COM1", Mode::Normal).unwrap();
    backend.fail_close(ErrorCode::MUTEX);

    assert_eq!(channel.close().unwrap_err().code(), Some(ErrorCode::MUTEX));
    assert!(!channel.is_open());
    assert!(matches!(channel.read(), Err(VscanError::InvalidState { .. })));
}

#[test]
fn drop_releases_channel() {
    let backend = Arc::new(Loopback::new());
    {
        let _channel = Channel::open(backend.clone(), "COM1", Mode::Normal).unwrap();
        assert_eq!(backend.open_channels(), 1);
    }
    assert_eq!(backend.open_channels(), 0);
    // Port is free again
    Channel::open(backend, "COM1", Mode::Normal).unwrap();
}

#[test]
fn drop_after_close_does_not_close_twice() {
    let backend = Arc::new(Loopback::new());
    let mut channel = Channel::open(backend.clone(), "COM1", Mode::Normal).unwrap();
    channel.close().unwrap();
    let calls = backend.calls();
    drop(channel);
    assert_eq!(backend.calls(), calls);
}

#[test]
fn api_version_without_open() {
    let backend = Loopback::new();
    let version = api_version(&backend).unwrap();
    assert_eq!((version.major, version.minor, version.subminor), (1, 9, 0));
    assert_eq!(backend.open_channels(), 0);
}

#[test]
fn hardware_queries() {
    let backend = Arc::new(Loopback::new());
    let channel = Channel::open(backend.clone(), "COM1", Mode::Normal).unwrap();

    let params = channel.hw_params().unwrap();
    assert_eq!(params.serial_nr, 0x0010_2030);

    backend.raise_flags("COM1", (ErrorFlags::DATA_OVERRUN | ErrorFlags::ERR_PASSIVE).bits());
    let flags = channel.error_flags().unwrap();
    assert!(flags.contains(ErrorFlags::DATA_OVERRUN));
    assert!(flags.contains(ErrorFlags::ERR_PASSIVE));
    assert!(!flags.contains(ErrorFlags::BUS_ERROR));
}

#[test]
fn timestamps_are_stamped_when_enabled() {
    let backend = Arc::new(Loopback::new());
    let mut channel = ChannelConfig::new("COM1")
        .with_mode(Mode::SelfReception)
        .with_timestamps(true)
        .open(backend)
        .unwrap();

    let frames = [Frame::new(1, &[]).unwrap(), Frame::new(2, &[]).unwrap()];
    channel.write(&frames).unwrap();
    channel.flush().unwrap();
    let received = channel.read().unwrap();
    assert_eq!(received[0].timestamp(), Some(1));
    assert_eq!(received[1].timestamp(), Some(2));

    channel.set_timestamps(false).unwrap();
    channel.write(&frames[..1]).unwrap();
    assert_eq!(channel.read().unwrap()[0].timestamp(), None);
}

#[test]
fn closer_cancels_blocked_read() {
    init_logging();
    let backend = Arc::new(Loopback::new());
    let mut channel = ChannelConfig::new("COM1")
        .with_blocking_read(true)
        .open(backend.clone())
        .unwrap();
    let closer = channel.closer();

    let reader = thread::spawn(move || channel.read());
    thread::sleep(Duration::from_millis(50));
    closer.close().unwrap();

    let result = reader.join().unwrap();
    assert_eq!(result.unwrap_err().code(), Some(ErrorCode::INVALID_HANDLE));
    assert!(!closer.is_open());
    assert!(matches!(closer.close(), Err(VscanError::InvalidState { .. })));
    assert_eq!(backend.open_channels(), 0);
}

#[test]
fn blocked_read_wakes_on_frame() {
    let backend = Arc::new(Loopback::new());
    let mut channel = ChannelConfig::new("COM1")
        .with_blocking_read(true)
        .open(backend.clone())
        .unwrap();

    let reader = thread::spawn(move || channel.read());
    thread::sleep(Duration::from_millis(20));
    assert!(backend.inject("COM1", raw(0x42, &[7])));

    let frames = reader.join().unwrap().unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].data(), &[7]);
}

#[test]
fn channel_over_trait_object() {
    let backend: Arc<dyn vscan::Backend> = Arc::new(Loopback::new());
    let mut channel = Channel::open(backend, "COM1", Mode::SelfReception).unwrap();
    channel.write(&[Frame::new(5, &[5]).unwrap()]).unwrap();
    assert_eq!(channel.read().unwrap().len(), 1);
}
