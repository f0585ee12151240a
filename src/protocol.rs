//! Parses decoded frame payloads into typed requests, and formats
//! typed responses back into payload bytes.
//!
//! Wire grammar: records separated by `|`, lines separated by `\n`.
//! A frame with exactly two lines where the second is empty and the
//! first has exactly two `|`-separated fields is a control request;
//! anything else is a bet batch, where each non-empty line is parsed
//! independently into a six-field bet record. A line with the wrong
//! field count fails on its own; it does not abort the rest of the
//! batch.

use crate::bet::{AgencyId, Bet};
use crate::error::{BetValidationError, ProtocolError};

/// One of the three request shapes a session can receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// One or more bet records, one parse result per non-empty line.
    /// A line with the wrong field count is a per-record failure, not
    /// a reason to discard the rest of the batch — each line is parsed
    /// independently and the caller decides what to do with each
    /// [`ProtocolError`] exactly as it would a [`BetValidationError`].
    BetBatch(Vec<Result<RawBetRecord, ProtocolError>>),
    /// `agency|FINISHED`.
    Finished(AgencyId),
    /// `agency|REQUEST_WINNERS`.
    RequestWinners(AgencyId),
}

/// A bet record's six raw fields, split but not yet validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBetRecord {
    /// Raw, unvalidated agency field.
    pub agency: String,
    /// Raw, unvalidated first name field.
    pub first_name: String,
    /// Raw, unvalidated last name field.
    pub last_name: String,
    /// Raw, unvalidated document field.
    pub document: String,
    /// Raw, unvalidated birthdate field.
    pub birthdate: String,
    /// Raw, unvalidated number field.
    pub number: String,
}

impl RawBetRecord {
    /// Validates this record into a [`Bet`].
    pub fn validate(&self) -> Result<Bet, BetValidationError> {
        Bet::new(
            &self.agency,
            &self.first_name,
            &self.last_name,
            &self.document,
            &self.birthdate,
            &self.number,
        )
    }
}

const VERB_FINISHED: &str = "FINISHED";
const VERB_REQUEST_WINNERS: &str = "REQUEST_WINNERS";

/// Parses a decoded UTF-8 frame payload into a [`Request`].
///
/// Only a non-UTF-8 payload fails the whole frame: once classified as
/// a bet batch, each line is parsed independently, so a malformed line
/// surfaces as one `Err` in the returned `Vec` rather than discarding
/// the rest of the batch.
pub fn parse_request(payload: &[u8]) -> Result<Request, ProtocolError> {
    let text = std::str::from_utf8(payload).map_err(|_| ProtocolError::InvalidUtf8)?;
    let lines: Vec<&str> = text.split('\n').collect();

    if lines.len() == 2 && lines[1].is_empty() {
        if let Some(req) = try_parse_control(lines[0]) {
            return Ok(req);
        }
    }

    let mut records = Vec::new();
    for line in &lines {
        if line.is_empty() {
            continue;
        }
        records.push(parse_bet_record(line));
    }
    Ok(Request::BetBatch(records))
}

/// Returns `None` when `line` does not match the control-message shape
/// (two non-empty `|`-fields naming a known verb), so the caller falls
/// back to bet-batch parsing as the classification rule requires — an
/// unrecognized verb is therefore reported as a bet record with the
/// wrong field count, not as an "unknown verb".
fn try_parse_control(line: &str) -> Option<Request> {
    let fields: Vec<&str> = line.split('|').collect();
    if fields.len() != 2 || fields[0].is_empty() || fields[1].is_empty() {
        return None;
    }

    let agency = fields[0];
    match fields[1] {
        VERB_FINISHED => Some(Request::Finished(parse_agency_loosely(agency))),
        VERB_REQUEST_WINNERS => Some(Request::RequestWinners(parse_agency_loosely(agency))),
        _ => None,
    }
}

/// Agency ids in control messages are trusted input; a non-numeric
/// agency collapses to 0, which never matches a valid `[1, N]` agency
/// and so is harmless downstream.
fn parse_agency_loosely(raw: &str) -> AgencyId {
    raw.parse().unwrap_or(0)
}

fn parse_bet_record(line: &str) -> Result<RawBetRecord, ProtocolError> {
    let fields: Vec<&str> = line.split('|').collect();
    if fields.len() != 6 {
        return Err(ProtocolError::WrongFieldCount(fields.len()));
    }
    Ok(RawBetRecord {
        agency: fields[0].to_string(),
        first_name: fields[1].to_string(),
        last_name: fields[2].to_string(),
        document: fields[3].to_string(),
        birthdate: fields[4].to_string(),
        number: fields[5].to_string(),
    })
}

/// One of the responses the server can send back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Every record in the batch stored successfully.
    BatchReceived,
    /// At least one record in the batch failed.
    BatchFailed,
    /// Acknowledges a `FINISHED` control message.
    FinishedReceive,
    /// Answers a `REQUEST_WINNERS` control message with winning documents
    /// in table order.
    Winners(Vec<String>),
}

impl Response {
    /// Formats this response as the newline-terminated line the wire
    /// protocol expects, ready to be framed by [`crate::framing::send`].
    pub fn to_line(&self) -> String {
        match self {
            Response::BatchReceived => "BATCH_RECEIVED\n".to_string(),
            Response::BatchFailed => "BATCH_FAILED\n".to_string(),
            Response::FinishedReceive => "FINISHED RECEIVE\n".to_string(),
            Response::Winners(docs) => format!("WINNERS:{}\n", docs.join("|")),
        }
    }
}
