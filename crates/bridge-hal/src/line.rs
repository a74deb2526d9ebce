//! Line-oriented device drivers.
//!
//! Both sensors on the reference rig can be configured to stream one text
//! line per fix: the ranging tag's shell prints `POS,x,y,z,qf` records and
//! the orientation bridge board prints `i,j,k,w`.  [`LineDriver`] opens the
//! device node (or a recorded replay file), reads one line per poll and hands
//! it to a parser that decides the sample shape right here, at the driver
//! boundary.
//!
//! Each open device gets its own reader thread.  Device nodes are opened as
//! serial ports (8N1, no flow control) with a read timeout, so the thread
//! notices a close request within [`DEFAULT_SERIAL_TIMEOUT`] even while the
//! device is silent.  The thread is never part of the async runtime's
//! blocking pool and cannot hold the runtime open on exit.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use bridge_types::{CartesianPosition, FieldSample, OrientationSample, PositionSample, ReadError};
use serialport::{DataBits, FlowControl, Parity, StopBits};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::sensor::SensorDriver;

/// Parser from one trimmed, non-empty line to a sample.
pub type LineParser<S> = fn(&str) -> Result<Option<S>, ReadError>;

/// Baud rate of the reference ranging tag's UART shell.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Per-read timeout on serial links.
pub const DEFAULT_SERIAL_TIMEOUT: Duration = Duration::from_secs(1);

/// Lines buffered between the reader thread and `try_read`.
const LINE_BUFFER: usize = 16;

// ────────────────────────────────────────────────────────────────────────────
// Parsers
// ────────────────────────────────────────────────────────────────────────────

fn finite_number(token: &str) -> Option<f64> {
    token.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a ranging-tag line.
///
/// Recognised forms:
///
/// * `POS,<x>,<y>,<z>[,<quality>]` – the tag shell's location record.
/// * `x=<f> y=<f> z=<f>` (also `x_m=`, comma separated) – any subset.
///
/// Axes that are not finite numbers count as missing.  Any other non-empty
/// line is kept as [`PositionSample::Raw`].  Empty lines yield `None`.
pub fn parse_position_line(line: &str) -> Option<PositionSample> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let axes = if line
        .get(..4)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("POS,"))
    {
        let mut fields = line[4..].split(',').map(finite_number);
        CartesianPosition {
            x_m: fields.next().flatten(),
            y_m: fields.next().flatten(),
            z_m: fields.next().flatten(),
        }
    } else {
        let mut axes = CartesianPosition::default();
        for token in line.split(|c: char| c == ',' || c.is_whitespace()) {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            let Some(value) = finite_number(value) else {
                continue;
            };
            match key.trim().to_ascii_lowercase().as_str() {
                "x" | "x_m" => axes.x_m = Some(value),
                "y" | "y_m" => axes.y_m = Some(value),
                "z" | "z_m" => axes.z_m = Some(value),
                _ => {}
            }
        }
        axes
    };

    Some(PositionSample::from_axes(axes, line))
}

/// Parse an orientation line of four comma- or whitespace-separated
/// components `i j k w`, optionally preceded by a `QUAT` label.
pub fn parse_orientation_line(line: &str) -> Result<Option<OrientationSample>, ReadError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let mut tokens: Vec<&str> = line
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .collect();
    if tokens
        .first()
        .is_some_and(|t| t.eq_ignore_ascii_case("quat"))
    {
        tokens.remove(0);
    }
    if tokens.len() != 4 {
        return Err(ReadError::Transient(format!(
            "expected 4 quaternion components, got {}: {line:?}",
            tokens.len()
        )));
    }

    let mut components = [0.0f64; 4];
    for (slot, token) in components.iter_mut().zip(&tokens) {
        *slot = finite_number(token)
            .ok_or_else(|| ReadError::Transient(format!("bad quaternion component {token:?}")))?;
    }
    let [i, j, k, w] = components;
    Ok(Some(OrientationSample::new(i, j, k, w)))
}

fn parse_position(line: &str) -> Result<Option<PositionSample>, ReadError> {
    Ok(parse_position_line(line))
}

// ────────────────────────────────────────────────────────────────────────────
// Links
// ────────────────────────────────────────────────────────────────────────────

/// How a [`LineDriver`] opens its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineLink {
    /// Serial port, 8N1, no flow control.
    Serial { baud_rate: u32, timeout: Duration },
    /// Regular file or FIFO, e.g. a recorded session.
    Replay,
}

impl LineLink {
    pub fn serial(baud_rate: u32) -> Self {
        LineLink::Serial {
            baud_rate,
            timeout: DEFAULT_SERIAL_TIMEOUT,
        }
    }

    /// Serial for device nodes (`/dev/...`, `COM<n>`), replay for anything else.
    pub fn for_path(path: &Path, baud_rate: u32) -> Self {
        let text = path.to_string_lossy();
        let com_port = text
            .get(..3)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("COM"))
            && text.len() > 3
            && text[3..].bytes().all(|b| b.is_ascii_digit());
        if path.starts_with("/dev") || com_port {
            LineLink::serial(baud_rate)
        } else {
            LineLink::Replay
        }
    }

    fn open(self, path: &Path) -> Result<Box<dyn Read + Send>, String> {
        match self {
            LineLink::Serial { baud_rate, timeout } => {
                serialport::new(path.to_string_lossy(), baud_rate)
                    .data_bits(DataBits::Eight)
                    .parity(Parity::None)
                    .stop_bits(StopBits::One)
                    .flow_control(FlowControl::None)
                    .timeout(timeout)
                    .open()
                    .map(|port| Box::new(port) as Box<dyn Read + Send>)
                    .map_err(|e| format!("cannot open {} at {baud_rate} baud: {e}", path.display()))
            }
            LineLink::Replay => std::fs::File::open(path)
                .map(|file| Box::new(file) as Box<dyn Read + Send>)
                .map_err(|e| format!("cannot open {}: {e}", path.display())),
        }
    }
}

/// Read `source` until EOF, a hard error, `stop`, or the receiver going away.
fn pump_lines(mut source: Box<dyn Read + Send>, tx: mpsc::Sender<io::Result<String>>, stop: &AtomicBool) {
    let mut pending = Vec::new();
    let mut chunk = [0u8; 256];
    while !stop.load(Ordering::Acquire) {
        match source.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&chunk[..n]);
                while let Some(end) = pending.iter().position(|b| *b == b'\n') {
                    let raw: Vec<u8> = pending.drain(..=end).collect();
                    let line = String::from_utf8_lossy(&raw).trim().to_string();
                    if tx.blocking_send(Ok(line)).is_err() {
                        return;
                    }
                }
            }
            // Silent serial line.
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::Interrupted) => {}
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                return;
            }
        }
    }
    if !pending.is_empty() && !stop.load(Ordering::Acquire) {
        let _ = tx.blocking_send(Ok(String::from_utf8_lossy(&pending).trim().to_string()));
    }
}

/// The receiving end of an open device.  Dropping it stops the reader thread.
struct Reader {
    lines: mpsc::Receiver<io::Result<String>>,
    stop: Arc<AtomicBool>,
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// LineDriver
// ────────────────────────────────────────────────────────────────────────────

/// Driver that reads one line per poll from a device node or file.
pub struct LineDriver<S> {
    id: String,
    path: PathBuf,
    link: LineLink,
    parse: LineParser<S>,
    reader: Option<Reader>,
}

/// Ranging tag streaming location records.
pub type LinePositionDriver = LineDriver<PositionSample>;

/// Orientation sensor streaming quaternion lines.
pub type LineOrientationDriver = LineDriver<OrientationSample>;

impl<S> LineDriver<S> {
    pub fn with_parser(id: impl Into<String>, path: impl AsRef<Path>, parse: LineParser<S>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            id: id.into(),
            link: LineLink::for_path(&path, DEFAULT_BAUD_RATE),
            path,
            parse,
            reader: None,
        }
    }

    pub fn with_link(mut self, link: LineLink) -> Self {
        self.link = link;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn link(&self) -> LineLink {
        self.link
    }
}

impl LineDriver<PositionSample> {
    pub fn position(id: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self::with_parser(id, path, parse_position)
    }
}

impl LineDriver<OrientationSample> {
    pub fn orientation(id: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self::with_parser(id, path, parse_orientation_line)
    }
}

#[async_trait]
impl<S> SensorDriver for LineDriver<S>
where
    S: FieldSample + Send + 'static,
{
    type Sample = S;

    fn id(&self) -> &str {
        &self.id
    }

    async fn open(&mut self) -> Result<(), ReadError> {
        let (opened_tx, opened_rx) = oneshot::channel();
        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        let stop = Arc::new(AtomicBool::new(false));

        let link = self.link;
        let path = self.path.clone();
        let flag = Arc::clone(&stop);
        thread::Builder::new()
            .name(format!("{}-reader", self.id))
            .spawn(move || match link.open(&path) {
                Ok(source) => {
                    // Nobody is waiting any more: the open was abandoned.
                    if opened_tx.send(Ok(())).is_ok() {
                        pump_lines(source, tx, &flag);
                    }
                }
                Err(details) => {
                    let _ = opened_tx.send(Err(details));
                }
            })
            .map_err(|e| ReadError::Fatal(format!("cannot start reader for {}: {e}", self.id)))?;

        match opened_rx.await {
            Ok(Ok(())) => {
                self.reader = Some(Reader { lines: rx, stop });
                debug!(device = %self.id, path = %self.path.display(), link = ?self.link, "line device opened");
                Ok(())
            }
            Ok(Err(details)) => Err(ReadError::Fatal(details)),
            Err(_) => Err(ReadError::Fatal(format!("reader for {} exited during open", self.id))),
        }
    }

    async fn try_read(&mut self) -> Result<Option<S>, ReadError> {
        let Some(reader) = self.reader.as_mut() else {
            return Err(ReadError::Transient("device is not open".to_string()));
        };
        match reader.lines.recv().await {
            Some(Ok(line)) => (self.parse)(line.trim()),
            Some(Err(e)) => {
                warn!(device = %self.id, error = %e, "line device read failed");
                Err(ReadError::Fatal(format!("read error on {}: {e}", self.path.display())))
            }
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.reader = None;
    }
}
