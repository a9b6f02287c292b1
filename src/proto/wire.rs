//! # Fixed-size little-endian wire frames.
//!
//! The presence and job protocols exchange three packed frames, always
//! little-endian and always exactly [`HostDescriptor::WIRE_LEN`],
//! [`CurrentJob::WIRE_LEN`] or [`JobDef::WIRE_LEN`] bytes:
//!
//! ```text
//! HostDescriptor (576 bytes)
//! ┌─────────┬────────┬──────┬────┬──────────┬──────────┬──────────┐
//! │ version │ status │ port │ id │ memavail │ cpuavail │ timavail │
//! │   u8    │   u8   │ u16  │u32 │   u64    │   u64    │   u64    │
//! ├─────────┴────────┴──────┴────┴──────────┴──────────┴──────────┤
//! │ name[64] │ user[64] │ group[64] │ socket[128] │ current[224]  │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Identity strings are NUL-padded fixed fields, truncated on encode and
//! trimmed at the first NUL on decode. `inf` resource advertisements encode
//! as `u64::MAX`. Unknown status codes and version mismatches are decode
//! errors; a short buffer is a decode error, never a panic.

use super::ProtoError;

/// Protocol version carried by `HostDescriptor` and `JobDef`.
pub const PROTOCOL_VERSION: u8 = 1;

/// Fixed capacity of the `name`/`user`/`group` identity fields.
pub const NAME_LEN: usize = 64;

/// Fixed capacity of the Unix-domain socket path field.
pub const PATH_LEN: usize = 128;

/// Wire value of a positive handshake.
pub const HANDSHAKE_ACCEPT: u32 = 1;

/// Wire value of a negative handshake.
pub const HANDSHAKE_REJECT: u32 = 0;

/// Peer status as carried on the wire and in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    /// Waiting for work; intake accepts submissions.
    #[default]
    Idle,
    /// A job is in flight; intake refuses submissions.
    Busy,
    /// Engine start failed recently; refusing work until the hold expires.
    Zombie,
}

impl Status {
    /// Stable wire code.
    pub fn code(self) -> u8 {
        match self {
            Status::Idle => 1,
            Status::Busy => 2,
            Status::Zombie => 3,
        }
    }

    /// Decodes a wire code.
    pub fn from_code(code: u8) -> Result<Self, ProtoError> {
        match code {
            1 => Ok(Status::Idle),
            2 => Ok(Status::Busy),
            3 => Ok(Status::Zombie),
            other => Err(ProtoError::BadStatus(other)),
        }
    }

    /// Short lowercase label for logs.
    pub fn as_label(self) -> &'static str {
        match self {
            Status::Idle => "idle",
            Status::Busy => "busy",
            Status::Zombie => "zombie",
        }
    }
}

/// What this node is doing right now; zeroed while idle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CurrentJob {
    /// Id of the master that submitted the running job.
    pub hostid: u32,
    /// Id of the running job.
    pub jobid: u32,
    /// Master identity.
    pub name: String,
    pub user: String,
    pub group: String,
    /// Resources the job requested.
    pub memreq: u64,
    pub cpureq: u64,
    pub timreq: u64,
}

impl CurrentJob {
    /// Encoded size in bytes.
    pub const WIRE_LEN: usize = 4 + 4 + 3 * NAME_LEN + 3 * 8;

    /// Appends the encoded frame to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.hostid.to_le_bytes());
        buf.extend_from_slice(&self.jobid.to_le_bytes());
        put_str(buf, &self.name, NAME_LEN);
        put_str(buf, &self.user, NAME_LEN);
        put_str(buf, &self.group, NAME_LEN);
        buf.extend_from_slice(&self.memreq.to_le_bytes());
        buf.extend_from_slice(&self.cpureq.to_le_bytes());
        buf.extend_from_slice(&self.timreq.to_le_bytes());
    }

    /// Decodes a frame of exactly [`Self::WIRE_LEN`] bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtoError> {
        if buf.len() < Self::WIRE_LEN {
            return Err(ProtoError::ShortFrame {
                expected: Self::WIRE_LEN,
                got: buf.len(),
            });
        }
        Ok(Self {
            hostid: get_u32(buf, 0),
            jobid: get_u32(buf, 4),
            name: get_str(buf, 8, NAME_LEN),
            user: get_str(buf, 8 + NAME_LEN, NAME_LEN),
            group: get_str(buf, 8 + 2 * NAME_LEN, NAME_LEN),
            memreq: get_u64(buf, 8 + 3 * NAME_LEN),
            cpureq: get_u64(buf, 16 + 3 * NAME_LEN),
            timreq: get_u64(buf, 24 + 3 * NAME_LEN),
        })
    }
}

/// This node's self-description, broadcast in announcements and prefixed to
/// every outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostDescriptor {
    /// Unique per boot; bumped by the supervisor on every (re)spawn.
    pub id: u32,
    /// Identity strings, truncated to [`NAME_LEN`] on the wire.
    pub name: String,
    pub user: String,
    pub group: String,
    /// TCP intake port (auto-assigned at bind time).
    pub port: u16,
    /// Unix-domain socket path; empty when not listening on UDS.
    pub socket: String,
    /// Advertised resources; `u64::MAX` means unlimited.
    pub memavail: u64,
    pub cpuavail: u64,
    pub timavail: u64,
    /// Current availability.
    pub status: Status,
    /// The job in flight; zeroed while idle.
    pub current: CurrentJob,
}

impl HostDescriptor {
    /// Encoded size in bytes.
    pub const WIRE_LEN: usize =
        1 + 1 + 2 + 4 + 3 * 8 + 3 * NAME_LEN + PATH_LEN + CurrentJob::WIRE_LEN;

    /// Encodes the frame, always exactly [`Self::WIRE_LEN`] bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::WIRE_LEN);
        buf.push(PROTOCOL_VERSION);
        buf.push(self.status.code());
        buf.extend_from_slice(&self.port.to_le_bytes());
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&self.memavail.to_le_bytes());
        buf.extend_from_slice(&self.cpuavail.to_le_bytes());
        buf.extend_from_slice(&self.timavail.to_le_bytes());
        put_str(&mut buf, &self.name, NAME_LEN);
        put_str(&mut buf, &self.user, NAME_LEN);
        put_str(&mut buf, &self.group, NAME_LEN);
        put_str(&mut buf, &self.socket, PATH_LEN);
        self.current.encode_into(&mut buf);
        debug_assert_eq!(buf.len(), Self::WIRE_LEN);
        buf
    }

    /// Decodes a frame of exactly [`Self::WIRE_LEN`] bytes.
    ///
    /// A version mismatch is an error; the caller answers handshake 0 and
    /// disconnects (or, for datagrams, drops the packet).
    pub fn decode(buf: &[u8]) -> Result<Self, ProtoError> {
        if buf.len() < Self::WIRE_LEN {
            return Err(ProtoError::ShortFrame {
                expected: Self::WIRE_LEN,
                got: buf.len(),
            });
        }
        if buf[0] != PROTOCOL_VERSION {
            return Err(ProtoError::BadVersion { got: buf[0] });
        }
        let status = Status::from_code(buf[1])?;
        let strings = 32;
        Ok(Self {
            status,
            port: u16::from_le_bytes([buf[2], buf[3]]),
            id: get_u32(buf, 4),
            memavail: get_u64(buf, 8),
            cpuavail: get_u64(buf, 16),
            timavail: get_u64(buf, 24),
            name: get_str(buf, strings, NAME_LEN),
            user: get_str(buf, strings + NAME_LEN, NAME_LEN),
            group: get_str(buf, strings + 2 * NAME_LEN, NAME_LEN),
            socket: get_str(buf, strings + 3 * NAME_LEN, PATH_LEN),
            current: CurrentJob::decode(&buf[strings + 3 * NAME_LEN + PATH_LEN..])?,
        })
    }

    /// `user@name` rendering used in logs and events.
    pub fn identity(&self) -> String {
        format!("{}@{}", self.user, self.name)
    }
}

/// Job metadata exchanged ahead of the `arg`/`opt` blobs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JobDef {
    /// Id assigned by the submitting master; echoed back with the results.
    pub id: u32,
    /// Requested resources; zeroed on the result path.
    pub memreq: u64,
    pub cpureq: u64,
    pub timreq: u64,
    /// Exact byte lengths of the two opaque payload blobs that follow.
    pub argsize: u32,
    pub optsize: u32,
}

impl JobDef {
    /// Encoded size in bytes.
    pub const WIRE_LEN: usize = 1 + 3 + 4 + 3 * 8 + 4 + 4;

    /// Encodes the frame, always exactly [`Self::WIRE_LEN`] bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::WIRE_LEN);
        buf.push(PROTOCOL_VERSION);
        buf.extend_from_slice(&[0u8; 3]);
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&self.memreq.to_le_bytes());
        buf.extend_from_slice(&self.cpureq.to_le_bytes());
        buf.extend_from_slice(&self.timreq.to_le_bytes());
        buf.extend_from_slice(&self.argsize.to_le_bytes());
        buf.extend_from_slice(&self.optsize.to_le_bytes());
        debug_assert_eq!(buf.len(), Self::WIRE_LEN);
        buf
    }

    /// Decodes a frame of exactly [`Self::WIRE_LEN`] bytes, rejecting a
    /// version mismatch.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtoError> {
        if buf.len() < Self::WIRE_LEN {
            return Err(ProtoError::ShortFrame {
                expected: Self::WIRE_LEN,
                got: buf.len(),
            });
        }
        if buf[0] != PROTOCOL_VERSION {
            return Err(ProtoError::BadVersion { got: buf[0] });
        }
        Ok(Self {
            id: get_u32(buf, 4),
            memreq: get_u64(buf, 8),
            cpureq: get_u64(buf, 16),
            timreq: get_u64(buf, 24),
            argsize: get_u32(buf, 32),
            optsize: get_u32(buf, 36),
        })
    }
}

/// Writes `s` as a NUL-padded field of exactly `len` bytes, truncating on a
/// character boundary if necessary.
fn put_str(buf: &mut Vec<u8>, s: &str, len: usize) {
    let mut bytes = s.as_bytes();
    if bytes.len() > len {
        let mut cut = len;
        while cut > 0 && !s.is_char_boundary(cut) {
            cut -= 1;
        }
        bytes = &bytes[..cut];
    }
    buf.extend_from_slice(bytes);
    buf.resize(buf.len() + (len - bytes.len()), 0);
}

/// Reads a NUL-padded field of `len` bytes starting at `offset`.
fn get_str(buf: &[u8], offset: usize, len: usize) -> String {
    let field = &buf[offset..offset + len];
    let end = field.iter().position(|&b| b == 0).unwrap_or(len);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

fn get_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn get_u64(buf: &[u8], offset: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(b)
}
