//! Channel behavior tests against real /dev/shm segments

use pciod_common::msg::{MotorMode, MotorRefFrame, MotorStateFrame, StateSnapshot};
use pciod_shm::{
    ChannelReader, ChannelWriter, CommandReader, CommandWriter, Received, ShmError, ShmResult,
    StateReader, StateWriter, remove_channel,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Unique channel name per test and process, removed on drop.
struct TestChannel(String);

impl TestChannel {
    fn new(tag: &str) -> Self {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("test-{tag}-{}-{n}", std::process::id()))
    }
}

impl Drop for TestChannel {
    fn drop(&mut self) {
        let _ = remove_channel(&self.0);
    }
}

fn soon() -> Instant {
    Instant::now() + Duration::from_millis(20)
}

#[test]
fn test_command_roundtrip() -> ShmResult<()> {
    let name = TestChannel::new("cmd");
    let mut writer = CommandWriter::open(&name.0)?;
    let mut reader = CommandReader::open(&name.0)?;

    writer.put(&MotorRefFrame::new(MotorMode::Velocity, &[0.25, -0.5], 3, 1_000));

    match reader.recv_until(soon())? {
        Received::Fresh(frame) => {
            assert_eq!(frame.mode, MotorMode::Velocity as u8);
            assert_eq!(frame.header.seq, 3);
            assert_eq!(frame.header.n, 2);
            assert_eq!(&frame.u[..2], &[0.25, -0.5]);
        }
        other => panic!("expected fresh frame, got {other:?}"),
    }

    // Consumed: nothing new until the next put
    assert!(matches!(reader.try_recv()?, Received::Timeout));
    Ok(())
}

#[test]
fn test_reader_created_first() -> ShmResult<()> {
    let name = TestChannel::new("rfirst");
    let mut reader = StateReader::open(&name.0)?;
    let mut writer = StateWriter::open(&name.0)?;

    let mut snapshot = StateSnapshot::new(3);
    snapshot.seq = 1;
    snapshot.modules[2].position = 1.25;
    writer.put(&snapshot.to_frame(77));

    let frame = reader.recv_until(soon())?.frame().expect("state frame");
    assert_eq!(StateSnapshot::from_frame(&frame), snapshot);
    assert_eq!(frame.header.time_ns, 77);
    Ok(())
}

#[test]
fn test_overwritten_frames_are_reported_missed() -> ShmResult<()> {
    let name = TestChannel::new("missed");
    let mut writer = ChannelWriter::<u64>::open(&name.0)?;
    let mut reader = ChannelReader::<u64>::open(&name.0)?;

    writer.put(&1);
    writer.put(&2);
    writer.put(&3);

    assert_eq!(reader.try_recv()?, Received::Missed { frame: 3, skipped: 2 });
    writer.put(&4);
    assert_eq!(reader.try_recv()?, Received::Fresh(4));
    Ok(())
}

#[test]
fn test_timeout_waits_until_deadline() -> ShmResult<()> {
    let name = TestChannel::new("timeout");
    let mut reader = ChannelReader::<u64>::open(&name.0)?;

    let start = Instant::now();
    let deadline = start + Duration::from_millis(15);
    assert_eq!(reader.recv_until(deadline)?, Received::Timeout);
    assert!(Instant::now() >= deadline);

    // A deadline in the past returns immediately
    assert_eq!(reader.recv_until(start)?, Received::Timeout);
    Ok(())
}

#[test]
fn test_stale_frame_not_replayed_to_new_reader() -> ShmResult<()> {
    let name = TestChannel::new("stale");
    let mut writer = ChannelWriter::<u64>::open(&name.0)?;
    writer.put(&41);

    let mut reader = ChannelReader::<u64>::open(&name.0)?;
    assert_eq!(reader.try_recv()?, Received::Timeout);
    assert_eq!(reader.latest()?, Some(41));

    writer.put(&42);
    assert_eq!(reader.try_recv()?, Received::Fresh(42));
    Ok(())
}

#[test]
fn test_latest_on_empty_channel() -> ShmResult<()> {
    let name = TestChannel::new("empty");
    let reader = ChannelReader::<u64>::open(&name.0)?;
    assert_eq!(reader.latest()?, None);
    Ok(())
}

#[test]
fn test_wakes_on_concurrent_writer() -> ShmResult<()> {
    let name = TestChannel::new("thread");
    let mut reader = ChannelReader::<u64>::open(&name.0)?;

    let writer_name = name.0.clone();
    let handle = std::thread::spawn(move || -> ShmResult<()> {
        let mut writer = ChannelWriter::<u64>::open(&writer_name)?;
        std::thread::sleep(Duration::from_millis(5));
        writer.put(&9);
        Ok(())
    });

    let received = reader.recv_until(Instant::now() + Duration::from_secs(2))?;
    handle.join().expect("writer thread")?;
    assert_eq!(received.frame(), Some(9));
    Ok(())
}

#[test]
fn test_layout_mismatch_rejected() -> ShmResult<()> {
    let name = TestChannel::new("layout");
    let _writer = ChannelWriter::<u64>::open(&name.0)?;

    let err = CommandReader::open(&name.0).err().expect("mismatch");
    assert!(matches!(err, ShmError::LayoutMismatch { .. }));

    let err = ChannelWriter::<MotorStateFrame>::open(&name.0).err().expect("mismatch");
    assert!(matches!(err, ShmError::LayoutMismatch { .. }));
    Ok(())
}

#[test]
fn test_invalid_names_rejected() {
    for bad in ["", "a/b", "../etc", "white space"] {
        assert!(matches!(
            ChannelReader::<u64>::open(bad),
            Err(ShmError::InvalidName { .. })
        ));
    }
}

#[test]
fn test_remove_missing_channel_is_ok() -> ShmResult<()> {
    remove_channel(&TestChannel::new("never").0)
}
