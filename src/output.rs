//! Line protocol consumed by the parent agent, and the sinks it is written to
//!
//! ```text
//! CHART 'type.id' 'name' 'title' 'units' 'family' 'context' 'charttype' 'priority' 'update_every' 'options' 'plugin' 'module'
//! DIMENSION 'id' 'name' 'algorithm' 'multiplier' 'divisor' 'options'
//! BEGIN 'type.id' microseconds
//! SET 'id' = value
//! VARIABLE CHART 'id' = value
//! END
//! ```
//!
//! Every job renders a whole tick into a private buffer and hands it to the sink in one
//! [`Output::write_chunk`] call, so BEGIN/END framing of different jobs never interleaves.

use std::fmt::Write as _;
use std::io::{self, Write as _};
use std::sync::{Mutex, PoisonError};
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error};

use crate::chart::{Chart, Dim};

/// Chunks queued for the stdout writer before `write_chunk` starts failing
pub const STDOUT_QUEUE_CHUNKS: usize = 1024;

/// Destination of rendered protocol text
///
/// `write_chunk` is called from job tasks and must not block.
pub trait Output: Send + Sync {
    fn write_chunk(&self, chunk: &str) -> io::Result<()>;
}

/// Writes to the process stdout, which the parent agent reads
///
/// The actual writes happen on a dedicated thread behind a bounded queue. When the parent
/// stops reading and the queue fills up, `write_chunk` fails with `WouldBlock` instead of
/// stalling the job.
#[derive(Debug, Clone)]
pub struct StdoutOutput {
    sender: mpsc::Sender<String>,
}

impl StdoutOutput {
    /// Start the writer thread on the process stdout
    pub fn spawn() -> io::Result<(Self, JoinHandle<()>)> {
        Self::spawn_with(io::stdout(), STDOUT_QUEUE_CHUNKS)
    }

    /// Start the writer thread on any writer
    ///
    /// The thread exits once every clone of the output is dropped, or after the first
    /// failed write.
    pub fn spawn_with<W>(mut writer: W, capacity: usize) -> io::Result<(Self, JoinHandle<()>)>
    where
        W: io::Write + Send + 'static,
    {
        let (sender, mut receiver) = mpsc::channel::<String>(capacity);

        let thread = std::thread::Builder::new()
            .name("stdout-writer".to_string())
            .spawn(move || {
                while let Some(chunk) = receiver.blocking_recv() {
                    if let Err(e) = writer.write_all(chunk.as_bytes()).and_then(|()| writer.flush()) {
                        error!("failed to write protocol output: {e}");
                        return;
                    }
                }
                debug!("stdout writer finished");
            })?;

        Ok((Self { sender }, thread))
    }
}

impl Output for StdoutOutput {
    fn write_chunk(&self, chunk: &str) -> io::Result<()> {
        match self.sender.try_send(chunk.to_string()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                Err(io::Error::new(io::ErrorKind::WouldBlock, "stdout queue is full"))
            }
            Err(TrySendError::Closed(_)) => {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdout writer has stopped"))
            }
        }
    }
}

/// Accumulates everything in memory
#[derive(Debug, Default)]
pub struct BufferOutput {
    inner: Mutex<String>,
}

impl BufferOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Return the accumulated text and clear the buffer
    pub fn take(&self) -> String {
        std::mem::take(&mut *self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Output for BufferOutput {
    fn write_chunk(&self, chunk: &str) -> io::Result<()> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_str(chunk);
        Ok(())
    }
}

/// Identity of the job a chart definition is written for
pub(crate) struct ChartOwner<'a> {
    pub type_id: &'a str,
    pub update_every: u32,
    pub plugin: &'a str,
    pub module: &'a str,
}

pub(crate) fn write_chart(
    buf: &mut String,
    owner: &ChartOwner<'_>,
    chart: &Chart,
    priority: u64,
    obsolete: bool,
) {
    buf.push_str("CHART ");
    write_full_id(buf, owner.type_id, &chart.id);
    buf.push(' ');
    write_quoted(buf, "");
    for field in [&chart.title, &chart.units, &chart.family, &chart.context] {
        buf.push(' ');
        write_quoted(buf, field);
    }
    let _ = write!(
        buf,
        " '{}' '{priority}' '{}' ",
        chart.chart_type.as_str(),
        owner.update_every
    );
    write_quoted(buf, if obsolete { "obsolete" } else { "" });
    buf.push(' ');
    write_quoted(buf, owner.plugin);
    buf.push(' ');
    write_quoted(buf, owner.module);
    buf.push('\n');
}

pub(crate) fn write_dimension(buf: &mut String, dim: &Dim) {
    buf.push_str("DIMENSION ");
    write_quoted(buf, &dim.id);
    buf.push(' ');
    write_quoted(buf, dim.display_name());
    let _ = writeln!(
        buf,
        " '{}' '{}' '{}' '{}'",
        dim.algorithm.as_str(),
        dim.multiplier,
        dim.divisor,
        if dim.hidden { "hidden" } else { "" }
    );
}

pub(crate) fn write_begin(buf: &mut String, type_id: &str, chart_id: &str, since_last_us: u64) {
    buf.push_str("BEGIN ");
    write_full_id(buf, type_id, chart_id);
    let _ = writeln!(buf, " {since_last_us}");
}

pub(crate) fn write_set(buf: &mut String, id: &str, value: i64) {
    buf.push_str("SET ");
    write_quoted(buf, id);
    let _ = writeln!(buf, " = {value}");
}

pub(crate) fn write_variable(buf: &mut String, id: &str, value: i64) {
    buf.push_str("VARIABLE CHART ");
    write_quoted(buf, id);
    let _ = writeln!(buf, " = {value}");
}

pub(crate) fn write_end(buf: &mut String) {
    buf.push_str("END\n");
}

fn write_full_id(buf: &mut String, type_id: &str, chart_id: &str) {
    buf.push('\'');
    escape(buf, type_id);
    buf.push('.');
    escape(buf, chart_id);
    buf.push('\'');
}

fn write_quoted(buf: &mut String, s: &str) {
    buf.push('\'');
    escape(buf, s);
    buf.push('\'');
}

/// Single quotes delimit fields, so they cannot appear inside one
fn escape(buf: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '\'' => buf.push('"'),
            '\n' | '\r' => buf.push(' '),
            _ => buf.push(c),
        }
    }
}
