use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::env;
use std::io::{self, Write};
use std::net::{SocketAddr, UdpSocket};
use std::process;
use std::time::{Duration, Instant};

use spx::config::SLOWHZ;
use spx::log::Target;
use spx::parse::SpxHeader;
use spx::protocol::{Disposition, RecvQueue, SendQueue, Segment, SpxPcb};
use spx::{Config, debug, error, info, warn};

/// Port listened on when `--port` is not given.
const DEFAULT_PORT: u16 = 5000;

/// Largest datagram read from the socket.
const MAX_DATAGRAM: usize = 576;

/// Slow ticks without a datagram after which a connection is closed.
const IDLE_TICKS: u32 = 120 * SLOWHZ as u32;

/// Receive-side state of one peer.
#[derive(Debug)]
struct Connection {
    pcb: SpxPcb,
    rcv: RecvQueue,
    snd: SendQueue,
    idle_ticks: u32,
}

impl Connection {
    fn new(config: &Config, irs: u16) -> Self {
        Self {
            pcb: SpxPcb::with_sequence(config.clone(), 0, irs),
            rcv: RecvQueue::new(),
            snd: SendQueue::new(),
            idle_ticks: 0,
        }
    }

    /// Runs `seg` through the engine, writes whatever it delivered to `out`
    /// and returns the acknowledgment to send back.
    fn on_segment<W: Write>(&mut self, seg: Segment, out: &mut W) -> io::Result<SpxHeader> {
        let (sid, did) = (seg.header().sid(), seg.header().did());
        self.idle_ticks = 0;

        match self.pcb.on_segment(seg, &mut self.rcv, &mut self.snd) {
            Disposition::Delivered(n) => {
                debug!("delivered {n} segments (recv_ack: {})", self.pcb.recv_ack());
                out.write_all(&self.rcv.read_all())?;
                out.flush()?;
            }
            Disposition::WindowViolation | Disposition::AllocationFailed => {
                warn!(
                    "segment dropped ({} anomalies so far)",
                    self.pcb.stats().anomalies()
                );
            }
            _ => {}
        }

        let space = self.pcb.config().recv_window;
        self.pcb.advertise_window(space);

        // Answer with our ids swapped into place.
        Ok(self.pcb.ack_header(did, sid))
    }

    /// Advances the connection's timers by one slow tick. Returns `false`
    /// once the connection should be closed.
    fn on_slow_tick(&mut self) -> bool {
        self.idle_ticks += 1;

        if let Err(err) = self.pcb.on_slow_tick(&mut self.snd) {
            warn!("closing connection: {err}");
            return false;
        }

        self.idle_ticks < IDLE_TICKS
    }
}

fn main() {
    spx::log::init_from_env();
    spx::log::set_target(Target::Stderr);

    let args: Vec<String> = env::args().skip(1).collect();

    let config = Config::from_args(&args).unwrap_or_else(|err| {
        error!("invalid configuration: {err}");
        process::exit(1);
    });

    let port = port_from_args(&args).unwrap_or(DEFAULT_PORT);

    let socket = UdpSocket::bind(("0.0.0.0", port)).unwrap_or_else(|err| {
        error!("failed to bind UDP port {port}: {err}");
        process::exit(1);
    });

    let tick = Duration::from_millis(1000 / u64::from(SLOWHZ));
    socket.set_read_timeout(Some(tick)).unwrap_or_else(|err| {
        error!("failed to set socket read timeout: {err}");
        process::exit(1);
    });

    let mut connections: HashMap<SocketAddr, Connection> = Default::default();

    listen_loop(&socket, &config, tick, &mut connections);
}

/// Returns the value following `--port`, if present and valid.
/// [Config::from_args] has already rejected an invalid one.
fn port_from_args(args: &[String]) -> Option<u16> {
    args.iter()
        .position(|arg| arg == "--port")
        .and_then(|idx| args.get(idx + 1))
        .and_then(|port| port.parse().ok())
}

/// Receives SPX segments carried in UDP datagrams, one connection per peer
/// address, and writes delivered data to `stdout`. Log lines go to `stderr`.
///
/// Each segment is answered with a system packet acknowledging everything
/// delivered so far. Every `tick` the connections' timers advance, and
/// connections that time out or stay idle are closed.
///
/// # Panics
///
/// Exits the process if reading from the socket fails.
fn listen_loop(
    socket: &UdpSocket,
    config: &Config,
    tick: Duration,
    connections: &mut HashMap<SocketAddr, Connection>,
) -> ! {
    let mut buf = [0u8; MAX_DATAGRAM];
    let mut last_tick = Instant::now();

    match socket.local_addr() {
        Ok(addr) => info!("listening on {addr}"),
        Err(err) => warn!("listening on unknown address: {err}"),
    }

    loop {
        if last_tick.elapsed() >= tick {
            last_tick = Instant::now();
            slow_tick(connections);
        }

        let (nbytes, peer) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                continue;
            }
            Err(err) => {
                error!("failed to read from socket: {err}");
                process::exit(1);
            }
        };

        let seg = match Segment::parse(buf[..nbytes].to_vec()) {
            Ok(seg) => seg,
            Err(err) => {
                warn!("ignoring datagram from {peer}: {err}");
                continue;
            }
        };

        let conn = match connections.entry(peer) {
            Entry::Occupied(conn) => conn.into_mut(),
            Entry::Vacant(entry) => {
                info!("new connection from {peer} (seq: {})", seg.seq());
                entry.insert(Connection::new(config, seg.seq()))
            }
        };

        let ack = match conn.on_segment(seg, &mut io::stdout().lock()) {
            Ok(ack) => ack,
            Err(err) => {
                error!("failed to write data from {peer}: {err}");
                continue;
            }
        };

        if let Err(err) = socket.send_to(&ack.to_be_bytes(), peer) {
            error!("failed to acknowledge {peer}: {err}");
        }
    }
}

/// Ticks every connection, releasing and removing the ones that are done.
fn slow_tick(connections: &mut HashMap<SocketAddr, Connection>) {
    connections.retain(|peer, conn| {
        if conn.on_slow_tick() {
            return true;
        }

        let released = conn.pcb.flush_pending();
        info!("closed connection from {peer} ({released} undelivered segments released)");
        false
    });
}
