//! # Options container codec.
//!
//! Job payloads travel as opaque byte blobs; the worker never parses the
//! argument blob. The *options* blob is the one exception: before a job runs,
//! the worker appends the `masterid` and `timallow` cells consumed by the
//! in-engine watchdog, and on failure it synthesizes a
//! `("lasterr", <message>)` container. Both require a concrete encoding for
//! the engine's cell list:
//!
//! ```text
//! u32 count
//! repeat count times:
//!   u8  tag        0 = bytes, 1 = text, 2 = number
//!   u32 len        payload length (8 for number)
//!   ... payload    raw bytes | UTF-8 | u64 little-endian
//! ```
//!
//! An options blob that does not decode is treated by the slave loop as a
//! step-2 (`optin`) failure; it is never silently passed through.

use thiserror::Error;

/// One cell of the engine options container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    /// Raw bytes, uninterpreted.
    Bytes(Vec<u8>),
    /// UTF-8 text, used for option keys and error messages.
    Text(String),
    /// Unsigned number, used for ids and durations in seconds.
    Number(u64),
}

/// Errors raised while decoding an options container.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    /// Blob ended before the declared cells were complete.
    #[error("options container truncated at byte {at}")]
    Truncated { at: usize },

    /// Unknown cell tag.
    #[error("unknown cell tag {0}")]
    BadTag(u8),

    /// Text cell was not valid UTF-8.
    #[error("text cell is not valid utf-8")]
    BadText,

    /// Number cell had a payload length other than 8.
    #[error("number cell has length {0}, expected 8")]
    BadNumberLen(u32),
}

/// Encodes a cell list into an options blob.
pub fn encode_cells(cells: &[Cell]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(cells.len() as u32).to_le_bytes());
    for cell in cells {
        match cell {
            Cell::Bytes(b) => {
                buf.push(0);
                buf.extend_from_slice(&(b.len() as u32).to_le_bytes());
                buf.extend_from_slice(b);
            }
            Cell::Text(s) => {
                buf.push(1);
                buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
                buf.extend_from_slice(s.as_bytes());
            }
            Cell::Number(n) => {
                buf.push(2);
                buf.extend_from_slice(&8u32.to_le_bytes());
                buf.extend_from_slice(&n.to_le_bytes());
            }
        }
    }
    buf
}

/// Decodes an options blob into its cell list.
pub fn decode_cells(blob: &[u8]) -> Result<Vec<Cell>, PayloadError> {
    let mut at = 0usize;
    let count = read_u32(blob, &mut at)?;
    let mut cells = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let tag = *blob.get(at).ok_or(PayloadError::Truncated { at })?;
        at += 1;
        let len = read_u32(blob, &mut at)? as usize;
        let end = at.checked_add(len).ok_or(PayloadError::Truncated { at })?;
        let payload = blob.get(at..end).ok_or(PayloadError::Truncated { at })?;
        at = end;
        let cell = match tag {
            0 => Cell::Bytes(payload.to_vec()),
            1 => Cell::Text(
                std::str::from_utf8(payload)
                    .map_err(|_| PayloadError::BadText)?
                    .to_owned(),
            ),
            2 => {
                if len != 8 {
                    return Err(PayloadError::BadNumberLen(len as u32));
                }
                let mut b = [0u8; 8];
                b.copy_from_slice(payload);
                Cell::Number(u64::from_le_bytes(b))
            }
            other => return Err(PayloadError::BadTag(other)),
        };
        cells.push(cell);
    }
    Ok(cells)
}

/// Appends the watchdog options consumed by the in-engine evaluator.
///
/// Returns a new blob with `masterid` and `timallow` key/value cells appended
/// after the submitter's own options.
pub fn inject_watchdog(opt: &[u8], masterid: u32, timallow: u64) -> Result<Vec<u8>, PayloadError> {
    let mut cells = decode_cells(opt)?;
    cells.push(Cell::Text("masterid".into()));
    cells.push(Cell::Number(u64::from(masterid)));
    cells.push(Cell::Text("timallow".into()));
    cells.push(Cell::Number(timallow));
    Ok(encode_cells(&cells))
}

/// Builds the `("lasterr", message)` options container reported to the master
/// when a job could not be executed.
pub fn lasterr_options(message: &str) -> Vec<u8> {
    encode_cells(&[Cell::Text("lasterr".into()), Cell::Text(message.into())])
}

/// Builds the placeholder one-cell output argument that accompanies a
/// synthesized error result.
pub fn empty_argout() -> Vec<u8> {
    encode_cells(&[Cell::Bytes(Vec::new())])
}

fn read_u32(blob: &[u8], at: &mut usize) -> Result<u32, PayloadError> {
    let end = *at + 4;
    let bytes = blob.get(*at..end).ok_or(PayloadError::Truncated { at: *at })?;
    *at = end;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
