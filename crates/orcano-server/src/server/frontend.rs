use crate::server::{client::handle_client, config::ClientConfig, queue::AdmissionQueue};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Accepts client connections until `shutdown` is cancelled, serving each on
/// its own task.
///
/// Sessions share nothing but the admission queue. A failed accept is logged
/// and the loop keeps going.
pub async fn serve(
    listener: TcpListener,
    queue: AdmissionQueue,
    config: ClientConfig,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!("Failed to accept client connection: {e}");
                continue;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY for {peer}: {e}");
        }

        let queue = queue.clone();
        tokio::spawn(async move {
            tracing::debug!("Client {peer} connected");
            match handle_client(stream, queue, config).await {
                Ok(()) => tracing::debug!("Client {peer} disconnected"),
                Err(e) => tracing::debug!("Client {peer} dropped: {e}"),
            }
        });
    }

    tracing::info!("Stopped accepting client connections");
}
