//! # In-kernel packet filter for the connector socket.
//!
//! The process connector offers no subscription granularity: every listener
//! gets every fork/exec/exit/uid/comm/coredump event on the host. Rather than
//! paying a wakeup plus a decode per irrelevant datagram, a classic socket
//! filter is attached so the kernel drops them before delivery, which bounds
//! user-space CPU cost under event storms.
//!
//! The program passes a datagram only when all three hold:
//! - transport message type is the informational class ([`wire::NLMSG_DONE`]),
//! - connector ids name the process-events producer
//!   ([`wire::CN_IDX_PROC`]/[`wire::CN_VAL_PROC`]),
//! - the event kind is EXEC or EXIT.
//!
//! Everything else returns a zero accept length, i.e. is dropped.
//!
//! ## Byte order
//! Filter loads interpret packet bytes in network order, while the kernel
//! writes these headers native-endian. Comparison constants therefore go
//! through the `htons`/`htonl` transforms so the program is correct on
//! either endianness.

use crate::proc::wire;

// Instruction classes.
const BPF_LD: u16 = 0x00;
const BPF_JMP: u16 = 0x05;
const BPF_RET: u16 = 0x06;

// ld/ldx width and addressing mode.
const BPF_W: u16 = 0x00;
const BPF_H: u16 = 0x08;
const BPF_ABS: u16 = 0x20;

// jmp condition and operand source.
const BPF_JEQ: u16 = 0x10;
const BPF_K: u16 = 0x00;

/// Accept the whole packet.
const ACCEPT: u32 = 0xFFFF_FFFF;
/// Drop the packet.
const DROP: u32 = 0;

/// One socket-filter instruction, laid out as the kernel expects it.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SockFilter {
    /// Opcode.
    pub code: u16,
    /// Jump offset when the comparison holds.
    pub jt: u8,
    /// Jump offset when it does not.
    pub jf: u8,
    /// Immediate operand.
    pub k: u32,
}

/// Filter program descriptor passed to the attach socket option.
#[repr(C)]
pub struct SockFprog {
    /// Number of instructions.
    pub len: libc::c_ushort,
    /// Pointer to the first instruction.
    pub filter: *const SockFilter,
}

fn stmt(code: u16, k: u32) -> SockFilter {
    jump(code, k, 0, 0)
}

fn jump(code: u16, k: u32, jt: u8, jf: u8) -> SockFilter {
    SockFilter { code, jt, jf, k }
}

fn htons(v: u16) -> u32 {
    u32::from(v.to_be())
}

fn htonl(v: u32) -> u32 {
    v.to_be()
}

/// Builds the EXEC/EXIT process-event filter program.
///
/// Layout (pc: instruction):
/// ```text
///  0: ld  h [4]            transport type
///  1: jeq #info ? 3 : 2
///  2: ret #0               drop: wrong message class
///  3: ld  w [16]           connector idx
///  4: jeq #proc ? 6 : 5
///  5: ret #0               drop: other connector producer
///  6: ld  w [20]           connector val
///  7: jeq #proc ? 9 : 8
///  8: ret #0               drop: other producer instance
///  9: ld  w [36]           event kind
/// 10: jeq #exec ? 13 : 11
/// 11: jeq #exit ? 13 : 12
/// 12: ret #0               drop: uninteresting event kind
/// 13: ret #-1              accept whole packet
/// ```
pub fn proc_event_filter() -> Vec<SockFilter> {
    vec![
        stmt(BPF_LD | BPF_H | BPF_ABS, wire::NL_TYPE_OFFSET as u32),
        jump(BPF_JMP | BPF_JEQ | BPF_K, htons(wire::NLMSG_DONE), 1, 0),
        stmt(BPF_RET | BPF_K, DROP),
        stmt(BPF_LD | BPF_W | BPF_ABS, wire::CN_IDX_OFFSET as u32),
        jump(BPF_JMP | BPF_JEQ | BPF_K, htonl(wire::CN_IDX_PROC), 1, 0),
        stmt(BPF_RET | BPF_K, DROP),
        stmt(BPF_LD | BPF_W | BPF_ABS, wire::CN_VAL_OFFSET as u32),
        jump(BPF_JMP | BPF_JEQ | BPF_K, htonl(wire::CN_VAL_PROC), 1, 0),
        stmt(BPF_RET | BPF_K, DROP),
        stmt(BPF_LD | BPF_W | BPF_ABS, wire::EVENT_WHAT_OFFSET as u32),
        jump(BPF_JMP | BPF_JEQ | BPF_K, htonl(wire::PROC_EVENT_EXEC), 2, 0),
        jump(BPF_JMP | BPF_JEQ | BPF_K, htonl(wire::PROC_EVENT_EXIT), 1, 0),
        stmt(BPF_RET | BPF_K, DROP),
        stmt(BPF_RET | BPF_K, ACCEPT),
    ]
}
