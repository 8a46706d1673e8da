//! Worker side of the half-duplex exchange.
//!
//! The [`Link`] drains whatever the transport holds, cuts it into frames at
//! the end-of-frame marker and answers a sync frame from the device with the
//! next queued request.

use crate::command::build_frame;
use crate::config::Config;
use crate::convert::InfoTables;
use crate::fifo::RequestFifo;
use crate::frame::{
    self, DATA_FRAME, END_OF_FRAME, MP_ID_0, MP_ID_1, SYNC_BYTE, SYNC_FRAME, SYNC_FRAME_LEN,
};
use crate::status::{Broadcast, StatusBoard, StatusDecoder};
use anyhow::anyhow;
use embedded_hal::digital::v2::OutputPin;
use embedded_hal::serial;
use log::{debug, warn};
use nb::block;
use parking_lot::{Mutex, RwLock};
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub const RECEIVE_LOG_CAPACITY: usize = 10;
pub const MAX_FILTERS: usize = 20;
// upper bound for one read batch
const MAX_BATCH_LEN: usize = 512;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameKind {
    Unknown,
    Known,
    AcPhaseInformation,
    Sync,
    Response,
}

/// Matches frames carrying `value` at byte offset `at`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameFilter {
    pub value: u8,
    pub at: usize,
}

impl FrameFilter {
    pub fn new(value: u8, at: usize) -> Self {
        Self { value, at }
    }

    pub fn matches(&self, frame: &[u8]) -> bool {
        frame.get(self.at) == Some(&self.value)
    }
}

/// Bounded copy of received raw frames for the receive callback.
pub struct ReceiveLog {
    frames: heapless::Deque<Vec<u8>, RECEIVE_LOG_CAPACITY>,
    whitelist: heapless::Vec<FrameFilter, MAX_FILTERS>,
    blacklist: heapless::Vec<FrameFilter, MAX_FILTERS>,
}

impl core::fmt::Debug for ReceiveLog {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "ReceiveLog {{ frames: {}, whitelist: {:?}, blacklist: {:?} }}",
            self.frames.len(),
            self.whitelist,
            self.blacklist
        )
    }
}

impl Default for ReceiveLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiveLog {
    pub fn new() -> Self {
        Self {
            frames: heapless::Deque::new(),
            whitelist: heapless::Vec::new(),
            blacklist: heapless::Vec::new(),
        }
    }

    /// Replaces both rule sets, keeping at most [`MAX_FILTERS`] of each.
    pub fn set_filters(&mut self, whitelist: &[FrameFilter], blacklist: &[FrameFilter]) {
        if whitelist.len() > MAX_FILTERS || blacklist.len() > MAX_FILTERS {
            warn!("Only the first {} filter rules are used", MAX_FILTERS);
        }
        self.whitelist.clear();
        self.blacklist.clear();
        self.whitelist
            .extend(whitelist.iter().take(MAX_FILTERS).copied());
        self.blacklist
            .extend(blacklist.iter().take(MAX_FILTERS).copied());
    }

    pub fn accepts(&self, frame: &[u8]) -> bool {
        if !self.whitelist.is_empty() && !self.whitelist.iter().any(|rule| rule.matches(frame)) {
            return false;
        }
        !self.blacklist.iter().any(|rule| rule.matches(frame))
    }

    /// Keeps a copy of `frame` if the filters let it through and there is room.
    pub fn record(&mut self, frame: &[u8]) -> bool {
        if self.frames.is_full() || !self.accepts(frame) {
            return false;
        }
        self.frames.push_back(frame.to_vec()).is_ok()
    }

    pub fn pop(&mut self) -> Option<Vec<u8>> {
        self.frames.pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// State shared by the worker and the application side.
#[derive(Debug)]
pub(crate) struct Shared {
    pub config: Config,
    pub fifo: Mutex<RequestFifo>,
    pub status: StatusBoard,
    pub receive_log: Mutex<ReceiveLog>,
    pub info: RwLock<InfoTables>,
    pub running: AtomicBool,
    pub resumed: AtomicBool,
}

impl Shared {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            fifo: Mutex::new(RequestFifo::new()),
            status: StatusBoard::new(),
            receive_log: Mutex::new(ReceiveLog::new()),
            info: RwLock::new(InfoTables::default()),
            running: AtomicBool::new(false),
            resumed: AtomicBool::new(false),
        }
    }
}

/// Drives one serial transport. Created with [`crate::VeBus::link`].
pub struct Link<S, P> {
    serial: S,
    direction: P,
    shared: Arc<Shared>,
    decoder: StatusDecoder,
    frame: Vec<u8>,
    batch: Vec<u8>,
}

impl<S, P> Link<S, P>
where
    S: serial::Read<u8> + serial::Write<u8>,
    <S as serial::Read<u8>>::Error: Debug,
    <S as serial::Write<u8>>::Error: Debug,
    P: OutputPin,
    P::Error: Debug,
{
    pub(crate) fn new(serial: S, direction: P, shared: Arc<Shared>) -> Self {
        let max_frame_len = shared.config.max_frame_len;
        Self {
            serial,
            direction,
            shared,
            decoder: StatusDecoder::new(),
            frame: Vec::with_capacity(max_frame_len),
            batch: Vec::with_capacity(64),
        }
    }

    /// Processes everything the transport currently holds.
    pub fn poll(&mut self) -> anyhow::Result<()> {
        if !self.shared.running.load(Ordering::Acquire) {
            return Ok(());
        }
        if self.shared.resumed.swap(false, Ordering::AcqRel) {
            // bytes queued while stopped belong to no frame we care about
            self.frame.clear();
            while self.read_byte()?.is_some() {}
        }

        let mut batch = std::mem::take(&mut self.batch);
        // bytes read before a failing read still belong to the stream
        let mut result = Ok(());
        while batch.len() < MAX_BATCH_LEN {
            match self.read_byte() {
                Ok(Some(byte)) => batch.push(byte),
                Ok(None) => break,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        let last = batch.len().saturating_sub(1);
        for (n, byte) in batch.iter().enumerate() {
            self.frame.push(*byte);
            if *byte != END_OF_FRAME {
                if self.frame.len() > self.shared.config.max_frame_len {
                    debug!("Discarding {} bytes without end of frame", self.frame.len());
                    self.frame.clear();
                }
                continue;
            }

            let mut frame = std::mem::take(&mut self.frame);
            if self.handle_frame(&mut frame) == FrameKind::Sync {
                if let Err(e) = self.on_sync(frame[3], n == last) {
                    result = Err(e);
                }
            }
            frame.clear();
            self.frame = frame;
        }
        batch.clear();
        self.batch = batch;
        result
    }

    /// Handles one complete raw frame and tells what it was.
    pub fn handle_frame(&mut self, frame: &mut Vec<u8>) -> FrameKind {
        self.shared.receive_log.lock().record(frame);

        if self.shared.config.verify_checksum
            && frame.get(2) == Some(&DATA_FRAME)
            && !frame::verify_checksum(frame)
        {
            warn!("Checksum error {:02X?}", frame);
            return FrameKind::Unknown;
        }

        frame::destuff_frame(frame);
        self.classify(frame)
    }

    fn classify(&mut self, frame: &[u8]) -> FrameKind {
        if frame.len() < frame::HEADER_LEN || frame[0] != MP_ID_0 || frame[1] != MP_ID_1 {
            return FrameKind::Unknown;
        }
        if frame[2] == SYNC_FRAME && frame.len() == SYNC_FRAME_LEN && frame[4] == SYNC_BYTE {
            return FrameKind::Sync;
        }
        if frame[2] != DATA_FRAME {
            return FrameKind::Unknown;
        }

        if frame.get(4) == Some(&0x00) {
            if frame.len() < 6 {
                return FrameKind::Unknown;
            }
            self.shared.fifo.lock().attach_response(frame[5], frame);
            return FrameKind::Response;
        }

        let broadcast = {
            let tables = self.shared.info.read();
            self.decoder.decode(frame, &tables)
        };
        match broadcast {
            Broadcast::Known(updates) => {
                for update in updates {
                    self.shared.status.publish(update);
                }
                FrameKind::Known
            }
            Broadcast::AcPhaseInformation(update) => {
                if let Some(update) = update {
                    self.shared.status.publish(update);
                }
                FrameKind::AcPhaseInformation
            }
            Broadcast::Unknown => FrameKind::Unknown,
        }
    }

    fn on_sync(&mut self, frame_nr: u8, at_batch_end: bool) -> anyhow::Result<()> {
        let payload = {
            let mut fifo = self.shared.fifo.lock();
            if fifo.is_empty() {
                return Ok(());
            }
            if !at_batch_end && self.shared.config.dispatch_only_at_batch_end {
                drop(fifo);
                warn!("too late");
                return Ok(());
            }
            match fifo.dispatch_next(Instant::now()) {
                Some(payload) => payload,
                None => return Ok(()),
            }
        };
        self.transmit(&build_frame(&payload, frame_nr))
    }

    fn transmit(&mut self, frame: &[u8]) -> anyhow::Result<()> {
        self.direction
            .set_high()
            .map_err(|e| anyhow!("Direction pin error {:?}", e))?;
        let written = self.write_all(frame);
        self.direction
            .set_low()
            .map_err(|e| anyhow!("Direction pin error {:?}", e))?;
        written
    }

    fn write_all(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        for byte in bytes {
            block!(self.serial.write(*byte)).map_err(|e| anyhow!("Serial write error {:?}", e))?;
        }
        block!(self.serial.flush()).map_err(|e| anyhow!("Serial flush error {:?}", e))?;
        Ok(())
    }

    fn read_byte(&mut self) -> anyhow::Result<Option<u8>> {
        match self.serial.read() {
            Ok(byte) => Ok(Some(byte)),
            Err(nb::Error::WouldBlock) => Ok(None),
            Err(nb::Error::Other(e)) => Err(anyhow!("Serial read error {:?}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(bytes: &[u8]) -> Vec<u8> {
        bytes.to_vec()
    }

    #[test]
    fn filter_out_of_range_never_matches() {
        let rule = FrameFilter::new(0x41, 30);
        assert!(!rule.matches(&[0x83, 0x83, 0xFE, 0x00, 0x41]));
        assert!(FrameFilter::new(0x41, 4).matches(&[0x83, 0x83, 0xFE, 0x00, 0x41]));
    }

    #[test]
    fn log_without_rules_takes_everything_up_to_capacity() {
        let mut log = ReceiveLog::new();
        for n in 0..12u8 {
            let kept = log.record(&frame(&[0x83, 0x83, 0xFE, n, 0xFF]));
            assert_eq!(kept, n < RECEIVE_LOG_CAPACITY as u8);
        }
        assert_eq!(log.len(), RECEIVE_LOG_CAPACITY);
        assert_eq!(log.pop().map(|f| f[3]), Some(0));
    }

    #[test]
    fn whitelist_requires_a_match_and_blacklist_vetoes() {
        let mut log = ReceiveLog::new();
        log.set_filters(
            &[FrameFilter::new(0x41, 4), FrameFilter::new(0x70, 4)],
            &[FrameFilter::new(0x01, 3)],
        );
        assert!(log.accepts(&[0x83, 0x83, 0xFE, 0x00, 0x41]));
        assert!(log.accepts(&[0x83, 0x83, 0xFE, 0x00, 0x70]));
        assert!(!log.accepts(&[0x83, 0x83, 0xFE, 0x00, 0x80]));
        assert!(!log.accepts(&[0x83, 0x83, 0xFE, 0x01, 0x41]));
    }

    #[test]
    fn blacklist_alone() {
        let mut log = ReceiveLog::new();
        log.set_filters(&[], &[FrameFilter::new(0xFD, 2)]);
        assert!(!log.record(&[0x83, 0x83, 0xFD, 0x10, 0x55]));
        assert!(log.record(&[0x83, 0x83, 0xFE, 0x10, 0x41]));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn filter_sets_are_capped() {
        let mut log = ReceiveLog::new();
        let rules: Vec<FrameFilter> = (0..25).map(|n| FrameFilter::new(n, 4)).collect();
        log.set_filters(&rules, &rules);
        assert_eq!(log.whitelist.len(), MAX_FILTERS);
        assert_eq!(log.blacklist.len(), MAX_FILTERS);
    }
}
