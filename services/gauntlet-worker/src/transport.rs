//! Command channel transport: one controller connection at a time over
//! TCP.
//!
//! The accept loop owns the outbound response receiver across
//! connections, so a controller that drops and reconnects re-attaches to
//! the same queues: requests accepted before the disconnect keep
//! processing during the gap and their responses are delivered, in
//! order, once a connection exists again.

use tokio::io::BufReader;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use gauntlet_core::HarnessResult;
use gauntlet_protocol::codec::{read_frame, write_frame};
use gauntlet_protocol::{
    CommandRequest, CommandResponse, RequestSender, ResponseReceiver,
};

/// Serves controller connections until the request queue's consumer or
/// the response queue's producer goes away.
///
/// # Errors
///
/// Returns a transport error when accepting a connection fails; framing
/// and per-connection I/O errors only drop the current connection.
pub async fn serve(
    listener: TcpListener,
    requests: RequestSender,
    mut responses: ResponseReceiver,
) -> HarnessResult<()> {
    // A response that could not be written before a disconnect; sent
    // first on the next connection so order is preserved.
    let mut pending: Option<CommandResponse> = None;

    loop {
        let (stream, peer) = listener.accept().await?;
        info!(%peer, "controller connected");
        let (read_half, mut write_half) = stream.into_split();

        if let Some(response) = pending.take() {
            if let Err(error) = write_frame(&mut write_half, &response).await {
                warn!(%error, "could not flush pending response; waiting for reconnect");
                pending = Some(response);
                continue;
            }
        }

        let mut reader_task = spawn_reader(read_half, requests.clone());
        let disconnected = pump_responses(
            &mut write_half,
            &mut responses,
            &mut reader_task,
            &mut pending,
        )
        .await;
        reader_task.abort();
        if !disconnected {
            // The processing side is gone; nothing left to serve.
            return Ok(());
        }
        info!(%peer, "controller disconnected");
    }
}

fn spawn_reader(
    read_half: tokio::net::tcp::OwnedReadHalf,
    requests: RequestSender,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(read_half);
        let mut buf = String::new();
        loop {
            match read_frame::<_, CommandRequest>(&mut reader, &mut buf).await {
                Ok(Some(request)) => {
                    if requests.send(request).is_err() {
                        return;
                    }
                }
                Ok(None) => return,
                Err(error) => {
                    warn!(%error, "bad frame from controller; dropping connection");
                    return;
                }
            }
        }
    })
}

/// Writes responses until the reader ends (controller gone, returns
/// `true`) or the response queue closes (worker shutting down, returns
/// `false`).
async fn pump_responses(
    write_half: &mut OwnedWriteHalf,
    responses: &mut ResponseReceiver,
    reader_task: &mut JoinHandle<()>,
    pending: &mut Option<CommandResponse>,
) -> bool {
    loop {
        tokio::select! {
            // Check for a disconnect first so responses queued during
            // the gap wait for the next connection instead of being
            // written into a dead socket.
            biased;
            _ = &mut *reader_task => return true,
            response = responses.recv() => {
                let Some(response) = response else {
                    return false;
                };
                if let Err(error) = write_frame(write_half, &response).await {
                    warn!(%error, "could not write response; waiting for reconnect");
                    *pending = Some(response);
                    return true;
                }
            }
        }
    }
}
