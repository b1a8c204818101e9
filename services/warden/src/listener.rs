use crate::session::Session;
use masque::logging;
use masque::net::{Acceptor, Connection};
use masque::pool::WorkerPool;
use masque::proto;
use std::sync::Arc;

/// Listener thread body: accept, wrap, dispatch. Saturation of the client
/// pool is answered with `503` before the socket is dropped; a rebind
/// request interrupts the accept inside the acceptor and never reaches this
/// loop.
pub fn listen(mut acceptor: Acceptor, pool: Arc<WorkerPool>, log: logging::Logger) {
    logging::info!(log, "server is listening");

    loop {
        let (stream, peer) = match acceptor.accept() {
            Ok(accepted) => accepted,
            Err(err) => {
                logging::error!(log, "failed accepting connection"; "err" => ?err);
                continue;
            }
        };

        let conn = match Connection::from_stream(stream, peer) {
            Ok(conn) => conn,
            Err(err) => {
                logging::error!(log, "could not set up connection"; "peer" => %peer, "err" => ?err);
                continue;
            }
        };

        // Keep a sending half out of the task so a refused dispatch can
        // still answer the peer.
        let sender = conn.sender();
        let session = Session::new(conn, &log);
        if let Err(rejected) = pool.submit(Box::new(move || session.run()), false) {
            logging::warn!(log, "connection pool saturated, turning client away"; "peer" => %peer);
            if sender.send(proto::RESP_BUSY).is_err() {
                logging::warn!(log, "peer went away before the busy notice"; "peer" => %peer);
            }
            // Dropping the rejected task closes the socket.
            drop(rejected);
        }
    }
}
