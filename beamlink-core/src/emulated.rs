//! An in-process emulated projector.
//!
//! Implements [`BulkTransport`] with a device model that enforces the
//! full exchange discipline: a data command must announce exactly the
//! framed block that follows, blocks must carry the right header and
//! footer for their index, a draw is only honored for a complete frame
//! of one parity, and every accepted exchange is answered with the
//! fixed-size status reply.
//!
//! Useful for bring-up without hardware, for integration tests (it
//! records frames, parities, and transfer counts), and for fault
//! injection: a scripted one-shot fault can fail a chosen exchange the
//! way an unplugged or wedged device would.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportError;
use crate::protocol::block::{self, BLOCK_FOOTER, BLOCK_FOOTER_SIZE, BLOCK_HEADER_SIZE};
use crate::protocol::{geometry, CMD_SIZE, MISC_VALUE_SIZE, READ_STATUS_SIZE};
use crate::transport::{BulkTransport, Endpoint};

// ── Fault injection ──────────────────────────────────────────────

/// Which exchange a scripted fault fires on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultTrigger {
    /// The payload-bytes transfer of the given block index.
    BlockData(usize),
    /// The draw command transfer.
    Draw,
}

/// How the faulted exchange fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Timeout,
    Disconnected,
    Stall,
}

impl FaultKind {
    fn to_error(self, timeout: Duration) -> TransportError {
        match self {
            FaultKind::Timeout => TransportError::Timeout(timeout),
            FaultKind::Disconnected => TransportError::Disconnected,
            FaultKind::Stall => TransportError::Stall,
        }
    }
}

// ── Device model ─────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Expecting {
    Command,
    BlockData {
        index: usize,
        parity: u8,
        size: usize,
    },
}

struct FrameAssembly {
    content: Vec<u8>,
    received: Vec<bool>,
    parity: Option<u8>,
}

impl FrameAssembly {
    fn new() -> Self {
        Self {
            content: vec![0u8; geometry::TOTAL_PAYLOAD_SIZE],
            received: vec![false; geometry::BLOCK_COUNT],
            parity: None,
        }
    }

    fn complete(&self) -> bool {
        self.received.iter().all(|&r| r)
    }

    fn reset_for_next_frame(&mut self) {
        self.received.fill(false);
        self.parity = None;
    }
}

struct EmuState {
    expecting: Expecting,
    data_in: VecDeque<Bytes>,
    misc_in: VecDeque<Bytes>,
    frame: FrameAssembly,
    presented: Option<Vec<u8>>,
    frames_drawn: u64,
    drawn_parities: Vec<u8>,
    draw_commands: u64,
    misc_requests: Vec<((u8, u8), [u8; 4])>,
    misc_value: u8,
    transfers: u64,
    fault: Option<(FaultTrigger, FaultKind)>,
}

fn status_reply() -> Bytes {
    let mut reply = [0u8; READ_STATUS_SIZE];
    reply[..4].copy_from_slice(b"USBS");
    Bytes::copy_from_slice(&reply)
}

/// The emulated device.
pub struct EmulatedProjector {
    state: Mutex<EmuState>,
}

impl EmulatedProjector {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EmuState {
                expecting: Expecting::Command,
                data_in: VecDeque::new(),
                misc_in: VecDeque::new(),
                frame: FrameAssembly::new(),
                presented: None,
                frames_drawn: 0,
                drawn_parities: Vec::new(),
                draw_commands: 0,
                misc_requests: Vec::new(),
                misc_value: 0,
                transfers: 0,
                fault: None,
            }),
        }
    }

    /// Script a one-shot fault for a future exchange.
    pub fn inject_fault(&self, trigger: FaultTrigger, kind: FaultKind) {
        self.state.lock().unwrap().fault = Some((trigger, kind));
    }

    /// The value byte returned for misc requests.
    pub fn set_misc_value(&self, value: u8) {
        self.state.lock().unwrap().misc_value = value;
    }

    /// Frames fully uploaded and drawn so far.
    pub fn frames_drawn(&self) -> u64 {
        self.state.lock().unwrap().frames_drawn
    }

    /// Parity bit of each drawn frame, in order.
    pub fn drawn_parities(&self) -> Vec<u8> {
        self.state.lock().unwrap().drawn_parities.clone()
    }

    /// Draw commands received (drawn or not).
    pub fn draw_commands(&self) -> u64 {
        self.state.lock().unwrap().draw_commands
    }

    /// Misc requests received, as `(request pair, args)`.
    pub fn misc_requests(&self) -> Vec<((u8, u8), [u8; 4])> {
        self.state.lock().unwrap().misc_requests.clone()
    }

    /// Completed transfers in either direction.
    pub fn transfer_count(&self) -> u64 {
        self.state.lock().unwrap().transfers
    }

    /// The flat pixel payload of the most recently drawn frame.
    pub fn last_frame(&self) -> Option<Vec<u8>> {
        self.state.lock().unwrap().presented.clone()
    }

    // ── Exchange handling ────────────────────────────────────────

    fn handle_data_out(
        state: &mut EmuState,
        bytes: &[u8],
        timeout: Duration,
    ) -> Result<(), TransportError> {
        match state.expecting {
            Expecting::Command => Self::handle_command(state, bytes, timeout),
            Expecting::BlockData {
                index,
                parity,
                size,
            } => {
                state.expecting = Expecting::Command;

                if let Some((FaultTrigger::BlockData(at), kind)) = state.fault {
                    if at == index {
                        state.fault = None;
                        state.frame.reset_for_next_frame();
                        return Err(kind.to_error(timeout));
                    }
                }

                if bytes.len() != size {
                    return Err(TransportError::Stall);
                }
                if &bytes[..BLOCK_HEADER_SIZE] != block::header_for(index).as_slice() {
                    return Err(TransportError::Stall);
                }
                if &bytes[size - BLOCK_FOOTER_SIZE..] != BLOCK_FOOTER.as_slice() {
                    return Err(TransportError::Stall);
                }
                match state.frame.parity {
                    None => state.frame.parity = Some(parity),
                    Some(p) if p != parity => return Err(TransportError::Stall),
                    Some(_) => {}
                }

                let content = &bytes[BLOCK_HEADER_SIZE..size - BLOCK_FOOTER_SIZE];
                let at = geometry::content_offset(index);
                state.frame.content[at..at + content.len()].copy_from_slice(content);
                state.frame.received[index] = true;

                state.data_in.push_back(status_reply());
                Ok(())
            }
        }
    }

    fn handle_command(
        state: &mut EmuState,
        bytes: &[u8],
        timeout: Duration,
    ) -> Result<(), TransportError> {
        if bytes.len() != CMD_SIZE || &bytes[..4] != b"USBC" {
            return Err(TransportError::Stall);
        }

        match bytes[15] {
            // Data command: expect the announced block next.
            0xff => {
                let size = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
                let sequence = bytes[21];
                let index = (sequence & 0x7f) as usize;
                let parity = sequence >> 7;

                if index >= geometry::BLOCK_COUNT
                    || bytes[20] != 0xfc - (index as u8) * 4
                    || size != block::framed_size(index)
                {
                    return Err(TransportError::Stall);
                }

                // Block 0 opens a new upload pass; whatever a previous
                // abandoned pass left behind is dropped.
                if index == 0 {
                    state.frame.reset_for_next_frame();
                }

                state.expecting = Expecting::BlockData {
                    index,
                    parity,
                    size,
                };
                Ok(())
            }
            // Draw command: latch the frame if it is complete.
            0xfe => {
                state.draw_commands += 1;

                if let Some((FaultTrigger::Draw, kind)) = state.fault {
                    state.fault = None;
                    return Err(kind.to_error(timeout));
                }

                if !state.frame.complete() {
                    return Err(TransportError::Stall);
                }

                state.presented = Some(state.frame.content.clone());
                state.frames_drawn += 1;
                state
                    .drawn_parities
                    .push(state.frame.parity.unwrap_or_default());
                state.frame.reset_for_next_frame();

                state.data_in.push_back(status_reply());
                Ok(())
            }
            _ => Err(TransportError::Stall),
        }
    }

    fn handle_misc_out(state: &mut EmuState, bytes: &[u8]) -> Result<(), TransportError> {
        if bytes.len() != CMD_SIZE || &bytes[..4] != b"USBC" || bytes[15] != 0xfd {
            return Err(TransportError::Stall);
        }

        let request = (bytes[20], bytes[21]);
        let args = [bytes[22], bytes[23], bytes[24], bytes[25]];
        state.misc_requests.push((request, args));

        let mut value = [0u8; MISC_VALUE_SIZE];
        value[0] = state.misc_value;
        state.misc_in.push_back(Bytes::copy_from_slice(&value));
        state.misc_in.push_back(status_reply());
        Ok(())
    }
}

impl Default for EmulatedProjector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BulkTransport for EmulatedProjector {
    async fn send(
        &self,
        endpoint: Endpoint,
        bytes: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        let mut state = self.state.lock().unwrap();
        match endpoint {
            Endpoint::DataOut => Self::handle_data_out(&mut state, bytes, timeout)?,
            Endpoint::MiscOut => Self::handle_misc_out(&mut state, bytes)?,
            Endpoint::DataIn | Endpoint::MiscIn => return Err(TransportError::Stall),
        }
        state.transfers += 1;
        Ok(bytes.len())
    }

    async fn receive(
        &self,
        endpoint: Endpoint,
        max_len: usize,
        timeout: Duration,
    ) -> Result<Bytes, TransportError> {
        let queued = {
            let mut state = self.state.lock().unwrap();
            let queue = match endpoint {
                Endpoint::DataIn => &mut state.data_in,
                Endpoint::MiscIn => &mut state.misc_in,
                Endpoint::DataOut | Endpoint::MiscOut => return Err(TransportError::Stall),
            };
            let reply = queue.pop_front();
            if reply.is_some() {
                state.transfers += 1;
            }
            reply
        };

        match queued {
            Some(mut reply) => {
                reply.truncate(max_len);
                Ok(reply)
            }
            None => {
                // Nothing queued — behave like a silent device.
                tokio::time::sleep(timeout).await;
                Err(TransportError::Timeout(timeout))
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
