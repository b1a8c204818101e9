use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};

/// Message terminator on the wire.
pub const EOT: u8 = 0x04;

/// Size of the read chunk; bytes past a terminator are carried over to the
/// next receive.
const CHUNK_SIZE: usize = 256;

pub type NetResult<T> = Result<T, NetError>;

#[derive(Debug)]
pub enum NetError {
    /// Peer performed an orderly shutdown.
    Closed,
    /// Outbound payload contains the terminator, or inbound bytes do not
    /// form valid UTF-8.
    BadMessage,
    Io(io::Error),
}

impl From<io::Error> for NetError {
    #[inline]
    fn from(err: io::Error) -> Self {
        NetError::Io(err)
    }
}

#[inline]
fn find_eot(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == EOT)
}

fn check_payload(msg: &str) -> NetResult<()> {
    if msg.as_bytes().contains(&EOT) {
        return Err(NetError::BadMessage);
    }
    Ok(())
}

fn unpack(raw: Vec<u8>) -> NetResult<String> {
    String::from_utf8(raw).map_err(|_| NetError::BadMessage)
}

/// EOT-framed message stream over any byte channel. Messages are delivered
/// in order, without their terminator.
pub struct Framed<S> {
    stream: S,
    /// Bytes read past the previous message's terminator.
    carry: Vec<u8>,
}

impl<S: Read + Write> Framed<S> {
    pub fn new(stream: S) -> Framed<S> {
        Framed {
            stream,
            carry: Vec::with_capacity(CHUNK_SIZE),
        }
    }

    /// Writes one message followed by the terminator. Payloads containing
    /// the terminator are rejected before anything hits the wire.
    pub fn send(&mut self, msg: &str) -> NetResult<()> {
        check_payload(msg)?;
        self.stream.write_all(msg.as_bytes())?;
        self.stream.write_all(&[EOT])?;
        Ok(())
    }

    /// Returns the next full message.
    pub fn receive(&mut self) -> NetResult<String> {
        // The carry-over may already hold a complete message.
        if let Some(pos) = find_eot(&self.carry) {
            let rest = self.carry.split_off(pos + 1);
            let mut msg = std::mem::replace(&mut self.carry, rest);
            msg.truncate(pos);
            return unpack(msg);
        }

        let mut acc = std::mem::take(&mut self.carry);
        let mut chunk = [0u8; CHUNK_SIZE];
        loop {
            let got = match self.stream.read(&mut chunk) {
                Ok(0) => return Err(NetError::Closed),
                Ok(got) => got,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };

            match find_eot(&chunk[..got]) {
                Some(pos) => {
                    acc.extend_from_slice(&chunk[..pos]);
                    self.carry.extend_from_slice(&chunk[pos + 1..got]);
                    return unpack(acc);
                }
                None => acc.extend_from_slice(&chunk[..got]),
            }
        }
    }
}

/// Clonable sending half of a connection. The mutex serializes concurrent
/// senders so interleaved messages stay whole on the wire.
#[derive(Clone)]
pub struct SendHandle {
    stream: Arc<Mutex<TcpStream>>,
}

impl SendHandle {
    fn new(stream: TcpStream) -> SendHandle {
        SendHandle {
            stream: Arc::new(Mutex::new(stream)),
        }
    }

    pub fn send(&self, msg: &str) -> NetResult<()> {
        check_payload(msg)?;
        let mut stream = self.stream.lock().expect("send lock poisoned");
        stream.write_all(msg.as_bytes())?;
        stream.write_all(&[EOT])?;
        Ok(())
    }
}

/// One accepted or dialed peer socket: a framed receive side owned by a
/// single reader plus a lockable send side.
pub struct Connection {
    framed: Framed<TcpStream>,
    sender: SendHandle,
    peer: SocketAddr,
}

impl Connection {
    /// Wraps an accepted stream.
    pub fn from_stream(stream: TcpStream, peer: SocketAddr) -> io::Result<Connection> {
        let writer = stream.try_clone()?;
        Ok(Connection {
            framed: Framed::new(stream),
            sender: SendHandle::new(writer),
            peer,
        })
    }

    /// Dials the given address.
    pub fn connect(addr: SocketAddr) -> io::Result<Connection> {
        let stream = TcpStream::connect(addr)?;
        let peer = stream.peer_addr()?;
        Connection::from_stream(stream, peer)
    }

    pub fn send(&self, msg: &str) -> NetResult<()> {
        self.sender.send(msg)
    }

    pub fn receive(&mut self) -> NetResult<String> {
        self.framed.receive()
    }

    /// Detached sending half, usable after the connection moved elsewhere.
    pub fn sender(&self) -> SendHandle {
        self.sender.clone()
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::min;
    use std::io::Cursor;

    /// Byte channel that feeds reads in fixed-size dribbles, exercising the
    /// carry-over logic.
    struct MockChannel {
        incoming: Vec<u8>,
        cursor: usize,
        chunk: usize,
        outgoing: Vec<u8>,
    }

    impl MockChannel {
        fn new(incoming: Vec<u8>, chunk: usize) -> MockChannel {
            MockChannel {
                incoming,
                cursor: 0,
                chunk,
                outgoing: Vec::new(),
            }
        }
    }

    impl Read for MockChannel {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.cursor == self.incoming.len() {
                return Ok(0);
            }
            let count = min(min(self.chunk, buf.len()), self.incoming.len() - self.cursor);
            buf[..count].copy_from_slice(&self.incoming[self.cursor..self.cursor + count]);
            self.cursor += count;
            Ok(count)
        }
    }

    impl Write for MockChannel {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.outgoing.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn wire(messages: &[&str]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for msg in messages {
            bytes.extend_from_slice(msg.as_bytes());
            bytes.push(EOT);
        }
        bytes
    }

    #[test]
    fn test_roundtrip() {
        let mut framed = Framed::new(Cursor::new(Vec::new()));
        framed.send("hello there").unwrap();

        let Framed { stream, .. } = framed;
        let bytes = stream.into_inner();
        let mut reader = Framed::new(MockChannel::new(bytes, 64));
        assert_eq!(reader.receive().unwrap(), "hello there");
    }

    #[test]
    fn test_receive_spanning_many_reads() {
        let long = "x".repeat(CHUNK_SIZE * 3 + 17);
        let mut framed = Framed::new(MockChannel::new(wire(&[&long]), 7));
        assert_eq!(framed.receive().unwrap(), long);
    }

    #[test]
    fn test_multiple_messages_per_read() {
        // One big read delivers three terminators; carry-over must hand the
        // later messages out without touching the socket again.
        let mut framed = Framed::new(MockChannel::new(wire(&["one", "two", "three"]), 1024));
        assert_eq!(framed.receive().unwrap(), "one");
        assert_eq!(framed.receive().unwrap(), "two");
        assert_eq!(framed.receive().unwrap(), "three");
        assert!(matches!(framed.receive(), Err(NetError::Closed)));
    }

    #[test]
    fn test_empty_message() {
        let mut framed = Framed::new(MockChannel::new(wire(&["", "next"]), 4));
        assert_eq!(framed.receive().unwrap(), "");
        assert_eq!(framed.receive().unwrap(), "next");
    }

    #[test]
    fn test_terminator_straddling_chunks() {
        // Chunk size 3 puts the terminator of "ab" at a chunk boundary.
        let mut framed = Framed::new(MockChannel::new(wire(&["ab", "cdef"]), 3));
        assert_eq!(framed.receive().unwrap(), "ab");
        assert_eq!(framed.receive().unwrap(), "cdef");
    }

    #[test]
    fn test_send_rejects_embedded_terminator() {
        let mut framed = Framed::new(MockChannel::new(Vec::new(), 8));
        let result = framed.send("bad\u{4}payload");
        assert!(matches!(result, Err(NetError::BadMessage)));
        // Nothing may have been written.
        assert!(framed.stream.outgoing.is_empty());
    }

    #[test]
    fn test_orderly_shutdown_surfaces_as_closed() {
        let mut framed = Framed::new(MockChannel::new(b"no terminator here".to_vec(), 8));
        assert!(matches!(framed.receive(), Err(NetError::Closed)));
    }

    #[test]
    fn test_concurrent_senders_keep_messages_whole() {
        use std::thread;

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let client = thread::spawn(move || {
            let conn = Connection::connect(addr).unwrap();
            let left = conn.sender();
            let right = conn.sender();

            // Messages longer than the read chunk, raced from two threads;
            // the send lock must keep each one contiguous on the wire.
            let la = thread::spawn(move || {
                for _ in 0..50 {
                    left.send(&"a".repeat(300)).unwrap();
                }
            });
            let lb = thread::spawn(move || {
                for _ in 0..50 {
                    right.send(&"b".repeat(300)).unwrap();
                }
            });
            la.join().unwrap();
            lb.join().unwrap();
            conn
        });

        let (stream, peer) = listener.accept().unwrap();
        let mut server = Connection::from_stream(stream, peer).unwrap();
        let mut from_left = 0;
        let mut from_right = 0;
        for _ in 0..100 {
            let msg = server.receive().unwrap();
            if msg == "a".repeat(300) {
                from_left += 1;
            } else if msg == "b".repeat(300) {
                from_right += 1;
            } else {
                panic!("interleaved message on the wire");
            }
        }
        assert_eq!((from_left, from_right), (50, 50));

        client.join().unwrap();
    }
}
