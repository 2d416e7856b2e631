//! The SPX receive engine: segment classification, reassembly and delivery,
//! plus the send-side state driven by acknowledgments and timers.
//!
//! Every operation runs on one [SpxPcb] at a time. Callers serialize access
//! to a connection; the engine itself holds no locks.

mod input;
mod pcb;
mod reass;
mod segment;
pub mod seq;
mod sockbuf;
mod stats;
mod timer;

pub use pcb::{Disposition, PcbFlags, ReassemblyState, SpxPcb, Timers};
pub use reass::ReassemblyQueue;
pub use segment::Segment;
pub use sockbuf::{ReceiveBuffer, RecvQueue, SendBuffer, SendQueue};
pub use stats::Stats;
pub use timer::{BACKOFF, Timer};
