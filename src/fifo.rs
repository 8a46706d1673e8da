use crate::command::Request;
use std::time::{Duration, Instant};

// possible transaction ids are 0x80..=0xFF (0xE4-0xE7 are also used by Venus OS)
pub const FIRST_ID: u8 = 0x80;
pub const LAST_ID: u8 = 0xFF;
const ID_COUNT: usize = (LAST_ID - FIRST_ID) as usize + 1;

/// A queued or dispatched command.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub id: u8,
    pub request: Request,
    pub expected_response: Option<u8>,
    /// Frame body, see [`Request::encode`].
    pub payload: Vec<u8>,
    /// Destuffed response frame once one arrived.
    pub response: Option<Vec<u8>>,
    pub sent: bool,
    pub sent_at: Instant,
    pub resend_count: u32,
    pub logged: bool,
}

impl RequestRecord {
    pub fn new(id: u8, request: Request) -> Self {
        Self {
            id,
            expected_response: request.expected_response(),
            payload: request.encode(id),
            request,
            response: None,
            sent: false,
            sent_at: Instant::now(),
            resend_count: 0,
            logged: false,
        }
    }

    pub fn response_expected(&self) -> bool {
        self.expected_response.is_some()
    }

    fn schedule_resend(&mut self, now: Instant) {
        self.resend_count += 1;
        self.sent = false;
        self.sent_at = now;
        self.response = None;
    }
}

/// What happened to the first record holding a response.
#[derive(Debug)]
pub enum Correlation {
    /// Status byte matched, the record left the fifo.
    Completed(RequestRecord),
    /// Wrong status byte, queued for another attempt.
    Resend { id: u8, resend_count: u32 },
    /// Wrong status byte with no resend budget left.
    Abandoned(RequestRecord),
}

/// In-flight requests in insertion order.
#[derive(Debug, Default)]
pub struct RequestFifo {
    records: Vec<RequestRecord>,
    last_id: u8,
}

impl RequestFifo {
    pub fn new() -> Self {
        Self {
            records: Vec::with_capacity(10),
            last_id: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: u8) -> bool {
        self.records.iter().any(|record| record.id == id)
    }

    pub fn get(&self, id: u8) -> Option<&RequestRecord> {
        self.records.iter().find(|record| record.id == id)
    }

    pub fn records(&self) -> &[RequestRecord] {
        &self.records
    }

    /// Next unused id after the last one handed out, `None` once every id is taken.
    pub fn allocate_id(&mut self) -> Option<u8> {
        let mut candidate = self.last_id;
        for _ in 0..ID_COUNT {
            candidate = candidate.wrapping_add(1);
            if candidate < FIRST_ID {
                candidate = FIRST_ID;
            }
            if !self.contains(candidate) {
                self.last_id = candidate;
                return Some(candidate);
            }
        }
        None
    }

    /// Queues `record`. With `merge` an existing record addressing the same
    /// thing is replaced in place instead.
    pub fn add_or_update(&mut self, mut record: RequestRecord, merge: bool, now: Instant) {
        record.response = None;
        record.sent_at = now;

        if merge {
            if let Some(existing) = self
                .records
                .iter_mut()
                .find(|existing| existing.request.same_target(&record.request))
            {
                *existing = record;
                return;
            }
        }
        self.records.push(record);
    }

    pub fn next_unsent(&mut self) -> Option<&mut RequestRecord> {
        self.records.iter_mut().find(|record| !record.sent)
    }

    /// Marks the oldest unsent record as sent and hands out its payload.
    /// Records that expect no answer leave the fifo right away.
    pub fn dispatch_next(&mut self, now: Instant) -> Option<Vec<u8>> {
        let index = self.records.iter().position(|record| !record.sent)?;
        let record = &mut self.records[index];
        record.sent = true;
        record.sent_at = now;
        if record.response_expected() {
            return Some(record.payload.clone());
        }
        Some(self.records.remove(index).payload)
    }

    /// First dispatched record that has not been logged yet.
    pub fn take_unlogged(&mut self) -> Option<(u8, Vec<u8>)> {
        let record = self
            .records
            .iter_mut()
            .find(|record| record.sent && !record.logged)?;
        record.logged = true;
        Some((record.id, record.payload.clone()))
    }

    pub fn remove(&mut self, id: u8) -> Option<RequestRecord> {
        let index = self.records.iter().position(|record| record.id == id)?;
        Some(self.records.remove(index))
    }

    /// Stores a destuffed response frame on the record with the same id.
    pub fn attach_response(&mut self, id: u8, frame: &[u8]) -> bool {
        match self.records.iter_mut().find(|record| record.id == id) {
            Some(record) => {
                record.response = Some(frame.to_vec());
                true
            }
            None => false,
        }
    }

    /// Resends or drops every record older than `timeout`. Returns the dropped ones.
    pub fn garbage_collect(
        &mut self,
        now: Instant,
        timeout: Duration,
        max_resend: u32,
    ) -> Vec<RequestRecord> {
        let mut abandoned = Vec::new();
        let mut i = 0;
        while i < self.records.len() {
            let record = &mut self.records[i];
            if now.saturating_duration_since(record.sent_at) <= timeout {
                i += 1;
                continue;
            }
            log::warn!(
                "Timeout id: {:02X} command {:?} resend count: {}",
                record.id,
                record.request.command(),
                record.resend_count
            );
            if record.resend_count >= max_resend {
                abandoned.push(self.records.remove(i));
                continue;
            }
            record.schedule_resend(now);
            i += 1;
        }
        abandoned
    }

    /// Settles the first record that received a response.
    pub fn correlate(&mut self, now: Instant, max_resend: u32) -> Option<Correlation> {
        let index = self
            .records
            .iter()
            .position(|record| record.response.is_some())?;

        let record = &mut self.records[index];
        let status = record.response.as_ref().and_then(|frame| frame.get(6).copied());
        if status.is_some() && status == record.expected_response {
            return Some(Correlation::Completed(self.records.remove(index)));
        }
        if record.resend_count >= max_resend {
            return Some(Correlation::Abandoned(self.records.remove(index)));
        }
        record.schedule_resend(now);
        Some(Correlation::Resend {
            id: record.id,
            resend_count: record.resend_count,
        })
    }
}
