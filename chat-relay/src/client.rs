use std::{
    io::{BufRead, IsTerminal},
    thread,
};

use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    cli::ClientArgs,
    error::RelayError,
    protocol::{line_text, read_line, write_line},
};

const PROMPT: &str = "Enter message: ";

/// Lines framed from the server but not yet printed.
const SERVER_FEED_CAPACITY: usize = 64;

type TypedLines = mpsc::UnboundedReceiver<io::Result<Vec<u8>>>;
type ServerLines = mpsc::Receiver<io::Result<Vec<u8>>>;

pub async fn run(args: ClientArgs) -> Result<()> {
    let (reader, mut writer) = establish_connection(&args).await?;
    let (mut server, server_task) = spawn_server_reader(reader);
    let mut stdin = spawn_stdin_reader()?;
    let interactive = std::io::stdin().is_terminal();

    let mut stdout = tokio::io::stdout();
    let result = run_client_loop(&mut server, &mut writer, &mut stdin, &mut stdout, interactive).await;
    server_task.abort();
    shutdown_connection(&mut writer).await;

    result
}

async fn establish_connection(
    args: &ClientArgs,
) -> Result<(OwnedReadHalf, OwnedWriteHalf), RelayError> {
    let stream = TcpStream::connect(args.ip)
        .await
        .map_err(|source| RelayError::Dial {
            addr: args.ip,
            source,
        })?;

    info!("connected to server at {}", args.ip);

    Ok(stream.into_split())
}

/// Frames server traffic with the same newline framing the server uses and
/// forwards raw lines. Payloads are bytes, so nothing here depends on them
/// being valid UTF-8. The channel closes at end of stream or after an error.
fn spawn_server_reader<R>(reader: R) -> (ServerLines, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(SERVER_FEED_CAPACITY);
    let task = tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        loop {
            let mut line = Vec::new();
            match read_line(&mut reader, &mut line).await {
                Ok(true) => {
                    if tx.send(Ok(line)).await.is_err() {
                        break;
                    }
                }
                Ok(false) => break,
                Err(err) => {
                    let _ = tx.send(Err(err)).await;
                    break;
                }
            }
        }
        debug!("server reader stopped");
    });
    (rx, task)
}

/// Reads stdin on a plain thread so a pending console read never holds up
/// runtime shutdown. Lines keep their exact bytes, `\r` included. The thread
/// ends at end of input or on the first error.
fn spawn_stdin_reader() -> Result<TypedLines> {
    let (tx, rx) = mpsc::unbounded_channel();
    thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            let mut stdin = std::io::stdin().lock();
            loop {
                let mut line = Vec::new();
                let typed = match stdin.read_until(b'\n', &mut line) {
                    Ok(0) => break,
                    Ok(_) => Ok(line),
                    Err(err) => Err(err),
                };
                let failed = typed.is_err();
                if tx.send(typed).is_err() || failed {
                    break;
                }
            }
        })
        .context("failed to spawn stdin reader")?;
    Ok(rx)
}

// Both inputs arrive over channels and `recv` is cancel safe, so nothing is
// lost when the other branch wins the select.
async fn run_client_loop<W, O>(
    server: &mut ServerLines,
    writer: &mut W,
    stdin: &mut TypedLines,
    out: &mut O,
    interactive: bool,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
    O: AsyncWrite + Unpin,
{
    if interactive {
        write_out(out, PROMPT).await?;
    }

    loop {
        select! {
            server_line = server.recv() => {
                if !handle_server_line(server_line, out, interactive).await? {
                    break;
                }
            }
            typed = stdin.recv() => {
                if !handle_stdin_line(typed, writer, out, interactive).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_server_line<O>(
    line: Option<io::Result<Vec<u8>>>,
    out: &mut O,
    interactive: bool,
) -> Result<bool>
where
    O: AsyncWrite + Unpin,
{
    let Some(line) = line else {
        write_out(out, "\n*** server closed the connection\n").await?;
        return Ok(false);
    };

    let text = line_text(&line.context("failed to read from server")?);
    if interactive {
        write_out(out, &format!("\rReceived: {text}\n{PROMPT}")).await?;
    } else {
        write_out(out, &format!("Received: {text}\n")).await?;
    }
    Ok(true)
}

async fn handle_stdin_line<W, O>(
    line: Option<io::Result<Vec<u8>>>,
    writer: &mut W,
    out: &mut O,
    interactive: bool,
) -> Result<bool>
where
    W: AsyncWrite + Unpin,
    O: AsyncWrite + Unpin,
{
    let Some(line) = line else {
        return Ok(false);
    };
    let mut line = line.context("failed to read stdin")?;

    // Only the last line before end of input can lack its newline.
    if line.last() != Some(&b'\n') {
        line.push(b'\n');
    }
    write_line(writer, &line)
        .await
        .context("failed to send line to server")?;

    if interactive {
        write_out(out, PROMPT).await?;
    }
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

async fn write_out<O>(out: &mut O, text: &str) -> io::Result<()>
where
    O: AsyncWrite + Unpin,
{
    out.write_all(text.as_bytes()).await?;
    out.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::{net::TcpListener, time::timeout};

    const WAIT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn dial_failure_is_reported_not_swallowed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        drop(listener);

        let err = match establish_connection(&ClientArgs { ip: addr }).await {
            Ok(_) => panic!("nothing is listening on {addr}"),
            Err(err) => err,
        };
        assert!(matches!(err, RelayError::Dial { addr: failed, .. } if failed == addr));
    }

    #[tokio::test]
    async fn non_utf8_server_lines_are_printed_lossily() {
        let (mut server_side, client_side) = tokio::io::duplex(256);
        let (reader, mut writer) = tokio::io::split(client_side);
        let (mut server, task) = spawn_server_reader(reader);
        let (_typed_tx, mut typed) = mpsc::unbounded_channel();
        let mut out = Vec::new();

        write_line(&mut server_side, b"caf\xe9\nnext\n")
            .await
            .expect("server writes");
        drop(server_side);

        timeout(
            WAIT,
            run_client_loop(&mut server, &mut writer, &mut typed, &mut out, false),
        )
        .await
        .expect("loop ends once the server closes")
        .expect("undecodable bytes are not an error");

        assert_eq!(
            String::from_utf8(out).expect("console output is utf-8"),
            "Received: caf\u{FFFD}\nReceived: next\n\n*** server closed the connection\n"
        );
        task.await.expect("server reader finishes");
    }

    #[tokio::test]
    async fn typed_lines_are_sent_byte_for_byte() {
        let (server_side, client_side) = tokio::io::duplex(256);
        let (reader, mut writer) = tokio::io::split(client_side);
        let (mut server, task) = spawn_server_reader(reader);
        let (typed_tx, mut typed) = mpsc::unbounded_channel();
        let mut out = Vec::new();

        typed_tx.send(Ok(b"hi\r\n".to_vec())).expect("queue first");
        typed_tx.send(Ok(b"tail".to_vec())).expect("queue last");
        drop(typed_tx);

        timeout(
            WAIT,
            run_client_loop(&mut server, &mut writer, &mut typed, &mut out, false),
        )
        .await
        .expect("loop ends at end of input")
        .expect("lines are sent");
        task.abort();

        let mut server_side = BufReader::new(server_side);
        let mut buf = Vec::new();
        assert!(read_line(&mut server_side, &mut buf).await.expect("first line"));
        assert_eq!(buf, b"hi\r\n");
        assert!(read_line(&mut server_side, &mut buf).await.expect("last line"));
        assert_eq!(buf, b"tail\n");
        assert!(out.is_empty());
    }
}
