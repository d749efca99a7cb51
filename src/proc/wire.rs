//! # Wire format of process connector datagrams.
//!
//! Every datagram stacks three fixed-size headers followed by an event-kind
//! specific trailer. All fields are native-endian: the kernel writes them on
//! the same host that reads them.
//!
//! ```text
//! offset  size  field
//! ------  ----  -----------------------------------------------
//!      0     4  transport  len        total datagram length
//!      4     2  transport  type       message class (3 = informational)
//!      6     2  transport  flags
//!      8     4  transport  seq
//!     12     4  transport  pid        sender id (0 = kernel)
//!     16     4  connector  idx        producer class (1 = process events)
//!     20     4  connector  val        producer instance (1)
//!     24     4  connector  seq
//!     28     4  connector  ack
//!     32     2  connector  len        payload length
//!     34     2  connector  flags
//!     36     4  event      what       event-kind bitmask
//!     40     4  event      cpu        originating cpu
//!     44     8  event      timestamp  nanoseconds since boot
//!     52     ?  trailer               per event kind, see below
//! ```
//!
//! EXEC trailer: `pid: i32, tid: i32`. EXIT trailer: `pid: i32, tid: i32,
//! exit_code: i32, signal: i32`. Everything else decodes to
//! [`ProcEvent::Other`] and is ignored upstream.
//!
//! Decoding is explicit field extraction at documented offsets, never a
//! memory cast, so a truncated or garbled datagram fails loudly with
//! [`WireError::Truncated`] instead of reading junk.

use crate::error::WireError;

/// Transport header length.
pub const NL_HDR_LEN: usize = 16;
/// Connector sub-header length.
pub const CN_HDR_LEN: usize = 20;
/// Event header length (timestamp is 8-byte aligned after what/cpu).
pub const EVENT_HDR_LEN: usize = 16;

/// Byte offset of the transport `type` field.
pub const NL_TYPE_OFFSET: usize = 4;
/// Byte offset of the connector `idx` field.
pub const CN_IDX_OFFSET: usize = NL_HDR_LEN;
/// Byte offset of the connector `val` field.
pub const CN_VAL_OFFSET: usize = NL_HDR_LEN + 4;
/// Byte offset of the event `what` field.
pub const EVENT_WHAT_OFFSET: usize = NL_HDR_LEN + CN_HDR_LEN;
/// Byte offset of the event-kind specific trailer.
pub const EVENT_DATA_OFFSET: usize = EVENT_WHAT_OFFSET + EVENT_HDR_LEN;

/// Informational transport message class; everything the connector pushes
/// uses it.
pub const NLMSG_DONE: u16 = 3;
/// Connector producer class of the process-events subsystem.
pub const CN_IDX_PROC: u32 = 1;
/// Connector producer instance of the process-events subsystem.
pub const CN_VAL_PROC: u32 = 1;
/// Operation code requesting multicast delivery of process events.
pub const PROC_CN_MCAST_LISTEN: u32 = 1;

/// `what` bit for exec events.
pub const PROC_EVENT_EXEC: u32 = 0x0000_0002;
/// `what` bit for exit events.
pub const PROC_EVENT_EXIT: u32 = 0x8000_0000;

/// Transport (netlink) message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NlMsgHdr {
    /// Total datagram length, headers included.
    pub len: u32,
    /// Message class.
    pub ty: u16,
    /// Transport flags.
    pub flags: u16,
    /// Sequence number.
    pub seq: u32,
    /// Sender id; zero for kernel-originated messages.
    pub pid: u32,
}

impl NlMsgHdr {
    /// Decodes the header from the start of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        Ok(Self {
            len: read_u32(buf, 0)?,
            ty: read_u16(buf, 4)?,
            flags: read_u16(buf, 6)?,
            seq: read_u32(buf, 8)?,
            pid: read_u32(buf, 12)?,
        })
    }

    /// Appends the encoded header to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.len.to_ne_bytes());
        out.extend_from_slice(&self.ty.to_ne_bytes());
        out.extend_from_slice(&self.flags.to_ne_bytes());
        out.extend_from_slice(&self.seq.to_ne_bytes());
        out.extend_from_slice(&self.pid.to_ne_bytes());
    }
}

/// Connector sub-header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CnMsgHdr {
    /// Producer class id.
    pub idx: u32,
    /// Producer instance id.
    pub val: u32,
    /// Connector sequence number.
    pub seq: u32,
    /// Acknowledgement number.
    pub ack: u32,
    /// Payload length following this header.
    pub len: u16,
    /// Connector flags.
    pub flags: u16,
}

impl CnMsgHdr {
    /// Decodes the sub-header from the start of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        Ok(Self {
            idx: read_u32(buf, 0)?,
            val: read_u32(buf, 4)?,
            seq: read_u32(buf, 8)?,
            ack: read_u32(buf, 12)?,
            len: read_u16(buf, 16)?,
            flags: read_u16(buf, 18)?,
        })
    }

    /// Appends the encoded sub-header to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.idx.to_ne_bytes());
        out.extend_from_slice(&self.val.to_ne_bytes());
        out.extend_from_slice(&self.seq.to_ne_bytes());
        out.extend_from_slice(&self.ack.to_ne_bytes());
        out.extend_from_slice(&self.len.to_ne_bytes());
        out.extend_from_slice(&self.flags.to_ne_bytes());
    }
}

/// Common event header preceding every trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHdr {
    /// Event-kind bitmask.
    pub what: u32,
    /// CPU the event originated on.
    pub cpu: u32,
    /// Monotonic nanoseconds since boot.
    pub timestamp_ns: u64,
}

impl EventHdr {
    /// Decodes the event header from the start of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        Ok(Self {
            what: read_u32(buf, 0)?,
            cpu: read_u32(buf, 4)?,
            timestamp_ns: read_u64(buf, 8)?,
        })
    }

    /// Appends the encoded event header to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.what.to_ne_bytes());
        out.extend_from_slice(&self.cpu.to_ne_bytes());
        out.extend_from_slice(&self.timestamp_ns.to_ne_bytes());
    }
}

/// One decoded process lifecycle event.
///
/// Ephemeral: decoded per datagram, acted on, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcEvent {
    /// A process called exec.
    Exec {
        /// Process id.
        pid: i32,
        /// Thread id of the exec'ing thread.
        tid: i32,
    },
    /// A process exited.
    Exit {
        /// Process id.
        pid: i32,
        /// Thread id.
        tid: i32,
        /// Raw exit code.
        exit_code: i32,
        /// Terminating signal, if any.
        signal: i32,
    },
    /// Any other event kind; dropped by the filter in practice.
    Other {
        /// The raw event-kind bitmask.
        what: u32,
    },
}

/// Decodes a full datagram: transport header, connector sub-header, event
/// header, then the kind-specific trailer.
///
/// The trailer is only interpreted after the event header confirms the kind.
pub fn decode_event(buf: &[u8]) -> Result<ProcEvent, WireError> {
    let _nl = NlMsgHdr::decode(buf)?;
    let _cn = CnMsgHdr::decode(tail(buf, NL_HDR_LEN))?;
    let hdr = EventHdr::decode(tail(buf, EVENT_WHAT_OFFSET))?;
    let data = tail(buf, EVENT_DATA_OFFSET);

    match hdr.what {
        PROC_EVENT_EXEC => Ok(ProcEvent::Exec {
            pid: read_i32(data, 0)?,
            tid: read_i32(data, 4)?,
        }),
        PROC_EVENT_EXIT => Ok(ProcEvent::Exit {
            pid: read_i32(data, 0)?,
            tid: read_i32(data, 4)?,
            exit_code: read_i32(data, 8)?,
            signal: read_i32(data, 12)?,
        }),
        what => Ok(ProcEvent::Other { what }),
    }
}

/// Builds the control datagram that subscribes this socket to multicast
/// process events. `pid` is the sender id the socket was bound with.
pub fn encode_mcast_listen(pid: u32) -> Vec<u8> {
    let op = PROC_CN_MCAST_LISTEN.to_ne_bytes();
    let total = NL_HDR_LEN + CN_HDR_LEN + op.len();

    let mut out = Vec::with_capacity(total);
    NlMsgHdr {
        len: total as u32,
        ty: NLMSG_DONE,
        flags: 0,
        seq: 0,
        pid,
    }
    .encode_into(&mut out);
    CnMsgHdr {
        idx: CN_IDX_PROC,
        val: CN_VAL_PROC,
        seq: 0,
        ack: 0,
        len: op.len() as u16,
        flags: 0,
    }
    .encode_into(&mut out);
    out.extend_from_slice(&op);
    out
}

fn tail(buf: &[u8], offset: usize) -> &[u8] {
    buf.get(offset..).unwrap_or(&[])
}

fn read_u16(buf: &[u8], offset: usize) -> Result<u16, WireError> {
    let bytes = field(buf, offset, 2)?;
    Ok(u16::from_ne_bytes([bytes[0], bytes[1]]))
}

fn read_u32(buf: &[u8], offset: usize) -> Result<u32, WireError> {
    let bytes = field(buf, offset, 4)?;
    Ok(u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_u64(buf: &[u8], offset: usize) -> Result<u64, WireError> {
    let bytes = field(buf, offset, 8)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(u64::from_ne_bytes(raw))
}

fn read_i32(buf: &[u8], offset: usize) -> Result<i32, WireError> {
    Ok(read_u32(buf, offset)? as i32)
}

fn field(buf: &[u8], offset: usize, len: usize) -> Result<&[u8], WireError> {
    buf.get(offset..offset + len).ok_or(WireError::Truncated {
        need: offset + len,
        have: buf.len(),
    })
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_round_trips_through_the_full_stack() {
        let buf = corpus::exec_datagram(4711, 4712);
        assert_eq!(
            decode_event(&buf).unwrap(),
            ProcEvent::Exec {
                pid: 4711,
                tid: 4712
            }
        );
    }

    #[test]
    fn exit_round_trips_through_the_full_stack() {
        let buf = corpus::exit_datagram(4711, 4711, 137, 9);
        assert_eq!(
            decode_event(&buf).unwrap(),
            ProcEvent::Exit {
                pid: 4711,
                tid: 4711,
                exit_code: 137,
                signal: 9
            }
        );
    }

    #[test]
    fn unknown_event_kind_decodes_as_other() {
        // fork event; the filter drops these before the decoder in practice
        let buf = corpus::datagram(NLMSG_DONE, CN_IDX_PROC, CN_VAL_PROC, 0x1, &[0u8; 16]);
        assert_eq!(decode_event(&buf).unwrap(), ProcEvent::Other { what: 0x1 });
    }

    #[test]
    fn truncated_header_is_rejected() {
        let buf = corpus::exec_datagram(1, 1);
        let err = decode_event(&buf[..10]).unwrap_err();
        assert!(matches!(err, WireError::Truncated { have: 10, .. }));
    }

    #[test]
    fn truncated_trailer_is_rejected() {
        let buf = corpus::exec_datagram(1, 1);
        assert!(decode_event(&buf[..buf.len() - 4]).is_err());
    }

    #[test]
    fn listen_datagram_layout() {
        let buf = encode_mcast_listen(1234);
        assert_eq!(buf.len(), 40);

        let nl = NlMsgHdr::decode(&buf).unwrap();
        assert_eq!(nl.len, 40);
        assert_eq!(nl.ty, NLMSG_DONE);
        assert_eq!(nl.pid, 1234);

        let cn = CnMsgHdr::decode(&buf[NL_HDR_LEN..]).unwrap();
        assert_eq!(cn.idx, CN_IDX_PROC);
        assert_eq!(cn.val, CN_VAL_PROC);
        assert_eq!(cn.len, 4);

        let op = u32::from_ne_bytes(buf[36..40].try_into().unwrap());
        assert_eq!(op, PROC_CN_MCAST_LISTEN);
    }
}
