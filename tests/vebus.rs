use embedded_hal::digital::v2::OutputPin;
use embedded_hal::serial;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vebus_master::definitions::{PhaseInfo, RamVariable, Setting, SwitchState};
use vebus_master::frame;
use vebus_master::{Config, FrameFilter, Link, ResponseData, ResponseValue, VeBus};

#[derive(Default)]
struct Wire {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    sent: Vec<Vec<u8>>,
    tx_enable: Vec<bool>,
    // next read on an empty wire reports an overrun
    overrun: bool,
}

#[derive(Debug)]
struct Overrun;

/// Serial port and direction pin backed by the same in-memory wire.
#[derive(Clone, Default)]
struct MockBus(Arc<Mutex<Wire>>);

impl MockBus {
    fn inject(&self, bytes: &[u8]) {
        self.0.lock().unwrap().rx.extend(bytes.iter().copied());
    }

    fn sent(&self) -> Vec<Vec<u8>> {
        self.0.lock().unwrap().sent.clone()
    }

    fn overrun_when_drained(&self) {
        self.0.lock().unwrap().overrun = true;
    }

    fn tx_enable(&self) -> Vec<bool> {
        self.0.lock().unwrap().tx_enable.clone()
    }
}

impl serial::Read<u8> for MockBus {
    type Error = Overrun;

    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        let mut wire = self.0.lock().unwrap();
        match wire.rx.pop_front() {
            Some(byte) => Ok(byte),
            None if wire.overrun => {
                wire.overrun = false;
                Err(nb::Error::Other(Overrun))
            }
            None => Err(nb::Error::WouldBlock),
        }
    }
}

impl serial::Write<u8> for MockBus {
    type Error = Infallible;

    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        self.0.lock().unwrap().tx.push(word);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        let mut wire = self.0.lock().unwrap();
        let frame = std::mem::take(&mut wire.tx);
        wire.sent.push(frame);
        Ok(())
    }
}

impl OutputPin for MockBus {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.0.lock().unwrap().tx_enable.push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.0.lock().unwrap().tx_enable.push(true);
        Ok(())
    }
}

const SYNC_NR: u8 = 0x12;

/// Data frame as the device would send it.
fn device_frame(body: &[u8]) -> Vec<u8> {
    let mut buffer = vec![frame::MP_ID_0, frame::MP_ID_1, frame::DATA_FRAME, 0x20];
    buffer.extend_from_slice(body);
    frame::stuff(&mut buffer);
    frame::append_checksum(&mut buffer);
    buffer
}

fn sync_frame() -> Vec<u8> {
    let mut buffer = vec![
        frame::MP_ID_0,
        frame::MP_ID_1,
        frame::SYNC_FRAME,
        SYNC_NR,
        frame::SYNC_BYTE,
        0x00,
        0x00,
        0x00,
    ];
    frame::append_checksum(&mut buffer);
    assert_eq!(buffer.len(), frame::SYNC_FRAME_LEN);
    buffer
}

fn led_frame(led_on: u8) -> Vec<u8> {
    let frame = device_frame(&[
        0x41, 0x10, led_on, 0x00, 0x00, 0x01, 0x32, 0x00, 0xC8, 0x00, 0xA0, 0x00, 0x04,
    ]);
    assert_eq!(frame.len(), 19);
    frame
}

struct Harness {
    bus: VeBus,
    link: Link<MockBus, MockBus>,
    wire: MockBus,
    responses: Arc<Mutex<Vec<ResponseData>>>,
}

impl Harness {
    fn new(config: Config) -> Self {
        let mut bus = VeBus::new(config);
        let wire = MockBus::default();
        let mut link = bus.link(wire.clone(), wire.clone());
        let responses = Arc::new(Mutex::new(Vec::new()));
        let sink = responses.clone();
        bus.set_response_callback(move |response| sink.lock().unwrap().push(*response));
        bus.start_communication();
        link.poll().unwrap();
        Self {
            bus,
            link,
            wire,
            responses,
        }
    }

    fn receive(&mut self, bytes: &[u8]) {
        self.wire.inject(bytes);
        self.link.poll().unwrap();
    }

    fn responses(&self) -> Vec<ResponseData> {
        self.responses.lock().unwrap().clone()
    }
}

#[test]
fn read_ram_var_round_trip() {
    let mut h = Harness::new(Config::default());
    let id = h.bus.read_ram_var(RamVariable::UBat).unwrap();

    h.receive(&sync_frame());
    let sent = h.wire.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        &sent[0][..7],
        &[0x98, 0xF7, 0xFE, SYNC_NR + 1, 0x00, id, 0x30]
    );
    assert_eq!(sent[0][7], RamVariable::UBat.as_code());
    assert!(frame::verify_checksum(&sent[0]));
    assert_eq!(h.wire.tx_enable(), vec![true, false]);

    // one frame per sync slot
    h.receive(&sync_frame());
    assert_eq!(h.wire.sent().len(), 1);

    h.receive(&device_frame(&[0x00, id, 0x85, 0x33, 0x05]));
    h.bus.maintain();

    let responses = h.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].id, id);
    match responses[0].value {
        ResponseValue::Float(value) => assert!((value - 13.31).abs() < 0.001),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(h.bus.fifo_size(), 0);

    h.bus.maintain();
    assert_eq!(h.responses().len(), 1);
}

// low byte of a UBat reading whose response checksum comes out as `checksum`
fn ubat_low_byte_for_checksum(id: u8, checksum: u8) -> u8 {
    [frame::DATA_FRAME, 0x20, 0x00, id, 0x85, 0x00]
        .iter()
        .fold(1u8.wrapping_sub(checksum), |acc, byte| acc.wrapping_sub(*byte))
}

#[test]
fn responses_survive_every_checksum_form() {
    for checksum in [0xFA, 0xFB, 0xF9] {
        let mut h = Harness::new(Config::default());
        let id = h.bus.read_ram_var(RamVariable::UBat).unwrap();
        h.receive(&sync_frame());

        let low = ubat_low_byte_for_checksum(id, checksum);
        assert!(low < 0xFA);
        let response = device_frame(&[0x00, id, 0x85, low, 0x00]);
        if checksum == 0xFB {
            assert_eq!(response[response.len() - 3..], [0xFA, 0x01, 0xFF]);
        } else {
            assert_eq!(response[response.len() - 2..], [checksum, 0xFF]);
        }
        h.receive(&response);
        h.bus.maintain();

        let responses = h.responses();
        assert_eq!(responses.len(), 1, "checksum {:02X}", checksum);
        match responses[0].value {
            ResponseValue::Float(value) => {
                assert!((value - low as f32 / 100.0).abs() < 0.001)
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}

#[test]
fn sync_with_0xfa_checksum_still_dispatches() {
    let mut h = Harness::new(Config::default());
    h.bus.read_software_version().unwrap();

    // 1 - (0xFD + nr + 0x55 + fill) = 0xFA
    let fill = 0x07u8
        .wrapping_sub(frame::SYNC_FRAME)
        .wrapping_sub(SYNC_NR)
        .wrapping_sub(frame::SYNC_BYTE);
    let mut sync = vec![
        frame::MP_ID_0,
        frame::MP_ID_1,
        frame::SYNC_FRAME,
        SYNC_NR,
        frame::SYNC_BYTE,
        fill,
        0x00,
        0x00,
    ];
    frame::append_checksum(&mut sync);
    assert_eq!(sync.len(), frame::SYNC_FRAME_LEN);
    assert_eq!(sync[8], 0xFA);

    h.receive(&sync);
    let sent = h.wire.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0][3], SYNC_NR + 1);
}

#[test]
fn wrong_status_is_resent_then_dropped() {
    let mut h = Harness::new(Config::default());
    let dropped = Arc::new(Mutex::new(Vec::new()));
    let sink = dropped.clone();
    h.bus
        .set_abandon_callback(move |id, _| sink.lock().unwrap().push(id));
    let id = h.bus.read_setting(Setting::UBatFloat).unwrap();

    for attempt in 1..=3 {
        h.receive(&sync_frame());
        assert_eq!(h.wire.sent().len(), attempt);
        h.receive(&device_frame(&[0x00, id, 0x91, 0x00, 0x00]));
        h.bus.maintain();
    }

    assert!(h.responses().is_empty());
    assert_eq!(h.bus.fifo_size(), 0);
    assert_eq!(*dropped.lock().unwrap(), vec![id]);
}

#[test]
fn late_sync_is_ignored() {
    let mut h = Harness::new(Config::default());
    h.bus.read_device_state().unwrap();

    let mut batch = sync_frame();
    batch.extend(led_frame(0x01));
    h.receive(&batch);
    assert!(h.wire.sent().is_empty());

    h.receive(&sync_frame());
    assert_eq!(h.wire.sent().len(), 1);
}

#[test]
fn late_sync_can_be_allowed() {
    let mut h = Harness::new(Config {
        dispatch_only_at_batch_end: false,
        ..Config::default()
    });
    h.bus.read_device_state().unwrap();

    let mut batch = sync_frame();
    batch.extend(led_frame(0x01));
    h.receive(&batch);
    assert_eq!(h.wire.sent().len(), 1);
}

#[test]
fn stopped_link_stays_silent() {
    let mut h = Harness::new(Config::default());
    h.bus.read_software_version().unwrap();
    h.bus.stop_communication();
    h.receive(&sync_frame());
    assert!(h.wire.sent().is_empty());
    assert_eq!(h.bus.fifo_size(), 1);

    // bytes received while stopped are discarded on resume
    h.bus.start_communication();
    h.link.poll().unwrap();
    assert!(h.wire.sent().is_empty());
    h.receive(&sync_frame());
    assert_eq!(h.wire.sent().len(), 1);
}

#[test]
fn switch_frame_leaves_the_fifo_when_sent() {
    let mut h = Harness::new(Config::default());
    h.bus.set_switch_state(SwitchState::ChargerInverter);
    h.receive(&sync_frame());
    let sent = h.wire.sent();
    assert_eq!(
        &sent[0][..9],
        &[0x98, 0xF7, 0xFE, SYNC_NR + 1, 0x3F, 0x07, 0x00, 0x00, 0x00]
    );
    assert_eq!(h.bus.fifo_size(), 0);
}

#[test]
fn two_phase_write_uses_two_slots() {
    let mut h = Harness::new(Config::default());
    let id = h.bus.write_setting(Setting::IMainsLimit, 160).unwrap();

    h.receive(&sync_frame());
    h.receive(&sync_frame());
    let sent = h.wire.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(&sent[0][4..8], &[0x00, id, 0x33, 0x06]);
    assert_eq!(&sent[1][4..9], &[0x00, id, 0x34, 0xA0, 0x00]);

    h.receive(&device_frame(&[0x00, id, 0x88, 0x00]));
    h.bus.maintain();
    assert_eq!(h.responses()[0].value, ResponseValue::Ack);
    assert_eq!(h.bus.fifo_size(), 0);
}

#[test]
fn unanswered_request_times_out() {
    let mut h = Harness::new(Config {
        response_timeout_ms: 0,
        max_resend: 1,
        ..Config::default()
    });
    h.bus.read_ram_var(RamVariable::IBat).unwrap();
    h.receive(&sync_frame());

    std::thread::sleep(Duration::from_millis(2));
    h.bus.maintain();
    assert_eq!(h.bus.fifo_size(), 1);
    h.receive(&sync_frame());
    assert_eq!(h.wire.sent().len(), 2);

    std::thread::sleep(Duration::from_millis(2));
    h.bus.maintain();
    assert_eq!(h.bus.fifo_size(), 0);
}

#[test]
fn bytes_before_a_read_error_are_kept() {
    let mut h = Harness::new(Config::default());
    let led = led_frame(0x01);
    let (head, tail) = led.split_at(8);

    h.wire.inject(head);
    h.wire.overrun_when_drained();
    assert!(h.link.poll().is_err());

    h.receive(tail);
    assert!(h.bus.new_master_multi_led_available());
    assert!(h.bus.master_multi_led().led_on.mains_on());
}

#[test]
fn led_frame_updates_status_once() {
    let mut h = Harness::new(Config::default());
    assert!(!h.bus.new_master_multi_led_available());

    h.receive(&led_frame(0x11));
    assert!(h.bus.new_master_multi_led_available());
    let led = h.bus.master_multi_led();
    assert!(led.led_on.mains_on());
    assert!(led.led_on.inverter_on());
    assert_eq!(led.actual_input_current_limit_a, 16.0);
    assert_eq!(led.switch_register, 0x04);
    assert!(!h.bus.new_master_multi_led_available());

    h.receive(&led_frame(0x11));
    assert!(!h.bus.new_master_multi_led_available());

    h.receive(&led_frame(0x12));
    assert!(h.bus.new_master_multi_led_available());
}

#[test]
fn dc_info_frame_is_published() {
    let mut h = Harness::new(Config::default());
    h.receive(&device_frame(&[
        0x20, 0x40, 0xA5, 0xC4, 0x01, 0x0C, 0x33, 0x05, 0x12, 0x00, 0x00, 0x00, 0x00, 0x00, 0x86,
    ]));
    assert!(h.bus.new_dc_info_available());
    assert!((h.bus.dc_info().voltage - 13.31).abs() < 0.001);
    assert_eq!(h.bus.new_ac_info_available(), None);
    assert_eq!(h.bus.ac_info(PhaseInfo::L2), None);
}

#[test]
fn receive_log_honours_filters() {
    let mut h = Harness::new(Config::default());
    let frames = Arc::new(Mutex::new(Vec::new()));
    let sink = frames.clone();
    h.bus.set_receive_callback(
        move |frame| sink.lock().unwrap().push(frame.to_vec()),
        &[FrameFilter::new(0x41, 4)],
        &[],
    );

    h.receive(&sync_frame());
    h.receive(&led_frame(0x01));
    h.bus.maintain();

    let frames = frames.lock().unwrap();
    assert_eq!(*frames, vec![led_frame(0x01)]);
}

#[test]
fn corrupted_frames_are_dropped_when_verifying() {
    let mut h = Harness::new(Config {
        verify_checksum: true,
        ..Config::default()
    });
    let id = h.bus.read_ram_var(RamVariable::UBat).unwrap();
    h.receive(&sync_frame());

    let mut response = device_frame(&[0x00, id, 0x85, 0x33, 0x05]);
    response[8] ^= 0x01;
    h.receive(&response);
    h.bus.maintain();
    assert!(h.responses().is_empty());
    assert_eq!(h.bus.fifo_size(), 1);

    h.receive(&device_frame(&[0x00, id, 0x85, 0x33, 0x05]));
    h.bus.maintain();
    assert_eq!(h.responses().len(), 1);
}
