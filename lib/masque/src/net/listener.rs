use crate::logging;
use mio::net::TcpListener;
use mio::{Events, Poll, PollOpt, Ready, Registration, SetReadiness, Token};
use socket2::{Domain, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};

const LISTENER_TOKEN: Token = Token(0);
const CONTROL_TOKEN: Token = Token(1);
const BACKLOG: i32 = 32;

/// Builds the listening socket by hand so the accept backlog is under our
/// control, then hands it to the poll in nonblocking mode.
fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    let listener: std::net::TcpListener = socket.into();
    listener.set_nonblocking(true)?;
    TcpListener::from_listener(listener, &addr)
}

/// Accepting end of the service. The listening socket and a rebind trigger
/// are polled together, so an address change interrupts a pending accept
/// without disturbing connections that were already handed out.
pub struct Acceptor {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    _registration: Registration,
    readiness: SetReadiness,
    pending: Arc<Mutex<Option<SocketAddr>>>,
    log: logging::Logger,
}

/// Handle used to interrupt the acceptor and point it at a new address.
/// Held by the reconfiguration supervisor; the rebind itself always happens
/// on the accepting thread.
#[derive(Clone)]
pub struct RebindHandle {
    readiness: SetReadiness,
    pending: Arc<Mutex<Option<SocketAddr>>>,
}

impl RebindHandle {
    /// Queues a rebind and wakes the acceptor.
    pub fn rebind(&self, addr: SocketAddr) -> io::Result<()> {
        *self.pending.lock().expect("rebind slot poisoned") = Some(addr);
        self.readiness.set_readiness(Ready::readable())
    }
}

impl Acceptor {
    /// Binds the listening socket and wires up the control channel.
    pub fn bind<'a, L: Into<Option<&'a logging::Logger>>>(
        addr: SocketAddr,
        log: L,
    ) -> io::Result<(Acceptor, RebindHandle)> {
        let listener = bind_listener(addr)?;
        let poll = Poll::new()?;
        poll.register(&listener, LISTENER_TOKEN, Ready::readable(), PollOpt::edge())?;

        let (registration, readiness) = Registration::new2();
        poll.register(&registration, CONTROL_TOKEN, Ready::readable(), PollOpt::edge())?;

        let pending = Arc::new(Mutex::new(None));
        let handle = RebindHandle {
            readiness: readiness.clone(),
            pending: pending.clone(),
        };

        let acceptor_log = match log.into() {
            Some(log) => log.new(logging::o!()),
            None => logging::discard(),
        };
        logging::info!(acceptor_log, "listener bound"; "addr" => %addr);

        Ok((
            Acceptor {
                poll,
                events: Events::with_capacity(16),
                listener,
                _registration: registration,
                readiness,
                pending,
                log: acceptor_log,
            },
            handle,
        ))
    }

    /// Blocks until a peer connects. Rebind requests arriving in the
    /// meantime are applied before accepting resumes. The returned stream is
    /// switched to blocking mode for its worker.
    pub fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        loop {
            match self.listener.accept_std() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(false)?;
                    return Ok((stream, peer));
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => return Err(err),
            }

            self.poll.poll(&mut self.events, None)?;

            let mut rebind = false;
            for event in self.events.iter() {
                if event.token() == CONTROL_TOKEN {
                    rebind = true;
                }
            }
            if rebind {
                self.apply_rebind();
            }
        }
    }

    /// Current local address of the listening socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Swaps the listening socket for one bound to the queued address. The
    /// fresh socket is bound before the old one goes away, so a failed
    /// rebind leaves the previous binding serving.
    fn apply_rebind(&mut self) {
        self.readiness
            .set_readiness(Ready::empty())
            .unwrap_or_else(|err| {
                logging::warn!(self.log, "failed clearing rebind trigger"; "err" => ?err)
            });

        let addr = match self.pending.lock().expect("rebind slot poisoned").take() {
            Some(addr) => addr,
            None => return,
        };

        let fresh = match bind_listener(addr) {
            Ok(fresh) => fresh,
            Err(err) => {
                logging::error!(self.log, "rebind failed, keeping current binding";
                                "addr" => %addr,
                                "err" => ?err);
                return;
            }
        };

        let swap = self.poll.deregister(&self.listener).and_then(|_| {
            self.poll
                .register(&fresh, LISTENER_TOKEN, Ready::readable(), PollOpt::edge())
        });
        if let Err(err) = swap {
            // The poll lost track of the listening socket; accepting can
            // never resume from here.
            logging::crit!(self.log, "failed re-registering listener"; "err" => ?err);
            panic!("listener poll registration lost");
        }

        self.listener = fresh;
        logging::info!(self.log, "listener rebound"; "addr" => %addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::thread;
    use std::time::Duration;

    fn local(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_accept_returns_blocking_stream() {
        let (mut acceptor, _handle) = Acceptor::bind(local(0), None).unwrap();
        let addr = acceptor.local_addr().unwrap();

        let dialer = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(b"ping\x04").unwrap();
            stream
        });

        let (stream, peer) = acceptor.accept().unwrap();
        let _keep = dialer.join().unwrap();
        assert_eq!(peer.ip(), addr.ip());

        let mut framed = crate::net::Framed::new(stream);
        assert_eq!(framed.receive().unwrap(), "ping");
    }

    #[test]
    fn test_rebind_moves_listening_socket() {
        let (mut acceptor, handle) = Acceptor::bind(local(0), None).unwrap();
        let old_addr = acceptor.local_addr().unwrap();

        handle.rebind(local(0)).unwrap();

        // The accept call applies the rebind, then blocks until someone
        // dials the fresh address; probe it from a helper thread.
        let probe = thread::spawn(move || {
            let (stream, _) = acceptor.accept().unwrap();
            (acceptor, stream)
        });

        // Wait for the old binding to be released.
        let mut released = false;
        for _ in 0..50 {
            match TcpStream::connect(old_addr) {
                Err(_) => {
                    released = true;
                    break;
                }
                Ok(_) => thread::sleep(Duration::from_millis(20)),
            }
        }

        // Dial until the fresh socket answers; its port is unknown from this
        // side, so reuse the handle's pending address via local_addr once
        // the helper returns.
        assert!(released, "old binding still accepting after rebind");

        // Unblock the helper by connecting to whatever the acceptor
        // listens on now; scan is avoided by asking the OS for the address
        // through a second rebind to a known port.
        let anchor = TcpListener::bind(&local(0)).unwrap();
        let target = anchor.local_addr().unwrap();
        drop(anchor);
        handle.rebind(target).unwrap();
        // Nudge the poll loop out of its current wait.
        for _ in 0..50 {
            if TcpStream::connect(target).is_ok() {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }

        let (acceptor, _stream) = probe.join().unwrap();
        assert_eq!(acceptor.local_addr().unwrap(), target);
    }
}
