/// Duplex byte channel to a process running inside a sandbox.
///
/// **Half-close contract:**
/// - `write_input` may be called any number of times before `close_input`
/// - `close_input` shuts the input half down; the remote process then sees EOF
///   on stdin. Closing twice is a no-op, writing after close is an error
/// - `read_to_close` returns once the remote side closes its output
///
/// **Bounded:** at most `max_output` bytes are kept. Anything beyond that is
/// still drained from the transport (so the remote never blocks on a full
/// pipe) but discarded, and `CapturedOutput::truncated` is set.
///
/// No timeout lives here; callers wrap the exchange in the execute ceiling.
use futures_util::stream::{BoxStream, StreamExt};
use std::io;
use std::pin::Pin;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

pub type InputHalf = Pin<Box<dyn AsyncWrite + Send>>;
pub type OutputHalf = BoxStream<'static, io::Result<Vec<u8>>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub bytes: Vec<u8>,
    pub truncated: bool,
}

pub struct DuplexStream {
    input: Option<InputHalf>,
    output: OutputHalf,
    max_output: usize,
}

impl DuplexStream {
    pub fn new(input: InputHalf, output: OutputHalf, max_output: usize) -> Self {
        Self {
            input: Some(input),
            output,
            max_output,
        }
    }

    pub fn is_input_closed(&self) -> bool {
        self.input.is_none()
    }

    pub async fn write_input(&mut self, data: &[u8]) -> io::Result<()> {
        let input = self
            .input
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "input half already closed"))?;
        input.write_all(data).await?;
        input.flush().await
    }

    pub async fn close_input(&mut self) -> io::Result<()> {
        if let Some(mut input) = self.input.take() {
            input.shutdown().await?;
        }
        Ok(())
    }

    pub async fn read_to_close(&mut self) -> io::Result<CapturedOutput> {
        collect(&mut self.output, self.max_output).await
    }

    /// Write `data`, half-close, and read until the remote closes.
    ///
    /// Writing and reading run concurrently so a process that prints before
    /// consuming its stdin cannot wedge the exchange. A failed write (the
    /// process exited without reading) is not an error; its output still is
    /// the result.
    pub async fn exchange(&mut self, data: &[u8]) -> io::Result<CapturedOutput> {
        let input = self.input.take();
        let write = async move {
            if let Some(mut input) = input {
                input.write_all(data).await?;
                input.shutdown().await?;
            }
            Ok::<(), io::Error>(())
        };
        let read = collect(&mut self.output, self.max_output);

        let (written, captured) = tokio::join!(write, read);
        if let Err(e) = written {
            debug!(error = %e, "Input half closed early by remote process");
        }
        captured
    }
}

async fn collect(output: &mut OutputHalf, max_output: usize) -> io::Result<CapturedOutput> {
    let mut captured = CapturedOutput::default();
    while let Some(chunk) = output.next().await {
        let chunk = chunk?;
        let room = max_output.saturating_sub(captured.bytes.len());
        if chunk.len() > room {
            captured.bytes.extend_from_slice(&chunk[..room]);
            captured.truncated = true;
        } else {
            captured.bytes.extend_from_slice(&chunk);
        }
    }
    Ok(captured)
}
