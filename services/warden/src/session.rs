use masque::endec::{EndecError, EndecJob, Mode};
use masque::logging;
use masque::net::{Connection, NetError};
use masque::proto::{self, Request};
use masque::walker;

/// One execution of the protocol state machine over a single connection,
/// end to end: greet with `100`, then serve requests until the peer closes
/// or the transport fails.
pub struct Session {
    conn: Connection,
    log: logging::Logger,
}

impl Session {
    pub fn new(conn: Connection, log: &logging::Logger) -> Session {
        let log = log.new(logging::o!("peer" => conn.peer().to_string()));
        Session { conn, log }
    }

    /// Task body. The return code feeds the pool's failure accounting.
    pub fn run(mut self) -> i32 {
        if self.conn.send(proto::RESP_ACCEPTED).is_err() {
            logging::error!(self.log, "failed to synchronize with client");
            return -1;
        }
        logging::info!(self.log, "connection accepted");

        loop {
            let request = match self.conn.receive() {
                Ok(request) => request,
                Err(NetError::Closed) => {
                    logging::info!(self.log, "client closed the connection");
                    return 0;
                }
                Err(err) => {
                    logging::warn!(self.log, "connection lost"; "err" => ?err);
                    return 0;
                }
            };
            logging::debug!(self.log, "request received"; "request" => &request);

            match Request::parse(&request) {
                Request::List => self.serve_listing(false),
                Request::ListRecursive => self.serve_listing(true),
                Request::Encrypt(args) => self.serve_endec(args, Mode::Encrypt),
                Request::Decrypt(args) => self.serve_endec(args, Mode::Decrypt),
                Request::Unknown => {
                    logging::warn!(self.log, "malformed request");
                    self.reply(proto::RESP_INVALID);
                }
            }
        }
    }

    fn reply(&self, msg: &str) {
        if let Err(err) = self.conn.send(msg) {
            logging::warn!(self.log, "failed to send response"; "err" => ?err);
        }
    }

    /// Streaming listing: `300`, one payload message, `301`. The walk runs
    /// against the process working directory, which tracks the configured
    /// root.
    fn serve_listing(&self, recursive: bool) {
        let listing = if recursive {
            walker::list_tree(".")
        } else {
            walker::list_dir(".")
        };
        match listing {
            Ok(text) => {
                self.reply(proto::RESP_MORE_BEGIN);
                self.reply(&text);
                self.reply(proto::RESP_MORE_END);
            }
            Err(err) => {
                logging::error!(self.log, "directory walk failed"; "err" => ?err);
                self.reply(proto::RESP_FAILURE);
            }
        }
    }

    fn serve_endec(&self, args: &str, mode: Mode) {
        let response = endec_response(args, mode, &self.log);
        self.reply(&response);
    }
}

/// Parses `<path> <seed>`, runs the job and renders the protocol response.
/// The seed is the last space-separated token; paths may be double-quoted.
fn endec_response(args: &str, mode: Mode, log: &logging::Logger) -> String {
    let trimmed = args.trim();
    let (path, seed) = match trimmed.rsplit_once(' ') {
        Some(pair) => pair,
        None => return format!("{}Wrong number of arguments", proto::RESP_INVALID),
    };

    let path = unquote(path.trim());
    if path.is_empty() {
        return format!("{}Wrong number of arguments", proto::RESP_INVALID);
    }

    let seed: u32 = match seed.trim().parse() {
        Ok(seed) => seed,
        Err(_) => return format!("{}Seed is malformed", proto::RESP_INVALID),
    };

    let result = EndecJob::new(path, seed, mode, log).and_then(EndecJob::run);
    match result {
        Ok(()) => format!("{}OK", proto::RESP_SUCCESS),
        Err(err) => render_failure(err),
    }
}

fn render_failure(err: EndecError) -> String {
    match err {
        EndecError::NotFound => format!("{}File not found", proto::RESP_INVALID),
        EndecError::NotRegular => {
            format!("{}Path does not denote a regular file", proto::RESP_INVALID)
        }
        EndecError::Empty => format!("{}File is empty", proto::RESP_INVALID),
        EndecError::MissingSuffix => {
            format!("{}Specified file is not encoded", proto::RESP_INVALID)
        }
        EndecError::Locked => format!(
            "{}This file is currently locked, try again later.",
            proto::RESP_FAILURE
        ),
        EndecError::Partial(_) => format!(
            "{}File has been partially encrypted",
            proto::RESP_FAILURE
        ),
        EndecError::Release(_) => {
            format!("{}Error while releasing resources", proto::RESP_FAILURE)
        }
        EndecError::Io(_) => format!("{}File error", proto::RESP_FAILURE),
    }
}

fn unquote(path: &str) -> &str {
    if path.len() >= 2 && path.starts_with('"') && path.ends_with('"') {
        &path[1..path.len() - 1]
    } else {
        path
    }
}
