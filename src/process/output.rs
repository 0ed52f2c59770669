use std::fmt;
use tokio::io::{self, AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{error, info, warn};

/// Which pipe a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => write!(f, "stdout"),
            OutputStream::Stderr => write!(f, "stderr"),
        }
    }
}

/// Log every line read from `reader` under the process name until EOF.
///
/// Bytes that are not valid UTF-8 are logged lossily. After a read error the
/// rest of the stream is drained without logging, so a child never sees a
/// closed pipe because of its own output.
/// Returns the number of lines logged.
pub async fn forward_lines<R>(process_name: String, stream: OutputStream, reader: R) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    let mut count = 0;

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                let text = text.trim_end();
                match stream {
                    OutputStream::Stdout => info!(process = %process_name, %stream, "{}", text),
                    OutputStream::Stderr => error!(process = %process_name, %stream, "{}", text),
                }
                count += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(
                    "Failed to read {} of process {}, discarding the rest: {}",
                    stream, process_name, e
                );
                let _ = io::copy(&mut reader, &mut io::sink()).await;
                break;
            }
        }
    }

    count
}
