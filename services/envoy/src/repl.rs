use masque::cmdlog;
use masque::logging;
use masque::net::{Connection, NetError};
use masque::proto;
use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::process;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

const LOG_PATH: &str = "./client.log";

/// Pending commands, drained by the communication thread. `None` is the
/// exit sentinel: the drainer finishes everything queued before it, then
/// closes the connection and returns.
pub struct CommandQueue {
    queue: Mutex<VecDeque<Option<String>>>,
    signal: Condvar,
}

impl CommandQueue {
    pub fn new() -> Arc<CommandQueue> {
        Arc::new(CommandQueue {
            queue: Mutex::new(VecDeque::new()),
            signal: Condvar::new(),
        })
    }

    pub fn push(&self, command: Option<String>) {
        let mut queue = self.queue.lock().expect("command queue poisoned");
        queue.push_back(command);
        drop(queue);
        self.signal.notify_one();
    }

    fn pop(&self) -> Option<String> {
        let mut queue = self.queue.lock().expect("command queue poisoned");
        loop {
            if let Some(command) = queue.pop_front() {
                return command;
            }
            queue = self.signal.wait(queue).expect("command queue poisoned");
        }
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.queue
            .lock()
            .expect("command queue poisoned")
            .iter()
            .filter_map(|cmd| cmd.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.queue.lock().expect("command queue poisoned").clear();
    }
}

/// Spawns the communication thread: pops commands, ships them to the
/// server, renders responses. Encrypt/decrypt commands are appended to the
/// command log before their response is awaited.
pub fn spawn_comm(
    mut server: Connection,
    queue: Arc<CommandQueue>,
    log: logging::Logger,
) -> thread::JoinHandle<i32> {
    thread::Builder::new()
        .name("comm".to_string())
        .spawn(move || comm_body(&mut server, &queue, &log))
        .expect("failed to spawn communication thread")
}

fn comm_body(server: &mut Connection, queue: &CommandQueue, log: &logging::Logger) -> i32 {
    loop {
        let command = match queue.pop() {
            None => return 0,
            Some(command) => command,
        };

        if server.send(&command).is_err() {
            eprintln!("Failed to send command to server");
            process::exit(1);
        }

        if command.starts_with(proto::CMD_ENCRYPT) || command.starts_with(proto::CMD_DECRYPT) {
            if let Err(err) = cmdlog::append(LOG_PATH, &command) {
                logging::warn!(log, "could not write command log"; "err" => ?err);
            }
        }

        render_responses(server);
        print!("> ");
        let _ = io::stdout().flush();
    }
}

/// Reads and prints server responses for one command, following the
/// long-output bracket when the server streams a listing.
fn render_responses(server: &mut Connection) {
    let response = match server.receive() {
        Ok(response) => response,
        Err(NetError::Closed) => {
            println!("\rConnection closed by server");
            process::exit(1);
        }
        Err(_) => {
            eprintln!("\rFailed to receive response from server");
            process::exit(1);
        }
    };

    let (code, text) = proto::split_response(&response);
    match code {
        proto::RESP_SUCCESS => println!("\rOperation successful: {}", text),
        proto::RESP_INVALID => println!("\rBad request issued: {}", text),
        proto::RESP_FAILURE => println!("\rOperation failed: {}", text),
        proto::RESP_BUSY => println!("\rServer is too busy: {}", text),
        proto::RESP_NOT_IMPLEMENTED => println!("\rOperation not implemented: {}", text),
        proto::RESP_MORE_BEGIN => stream_long_output(server),
        _ => println!("\rCould not interpret server response: {}", response),
    }
}

fn stream_long_output(server: &mut Connection) {
    loop {
        match server.receive() {
            Ok(ref msg) if msg == proto::RESP_MORE_END => return,
            Ok(msg) => print!("{}", msg),
            Err(_) => {
                eprintln!("\rConnection lost during listing");
                process::exit(1);
            }
        }
    }
}

/// Interactive loop. Reads commands from stdin until the user exits or the
/// stream ends; everything network-bound goes through the queue.
pub fn interact(queue: Arc<CommandQueue>, comm: thread::JoinHandle<i32>) -> i32 {
    println!("Type \"help\" to display available commands");
    let stdin = io::stdin();
    let mut line = String::new();

    loop {
        print!("> ");
        let _ = io::stdout().flush();

        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => {
                // End of input behaves like exit.
                queue.push(None);
                comm.join().ok();
                return 0;
            }
            Ok(_) => {}
            Err(err) => {
                eprintln!("Failed reading input: {}", err);
                return 1;
            }
        }

        // Lowercase the command word only; arguments keep their case.
        let input = line.trim_end_matches(['\r', '\n'].as_ref());
        let (word, rest) = match input.find(' ') {
            Some(pos) => (&input[..pos], &input[pos + 1..]),
            None => (input, ""),
        };
        let word = word.to_ascii_lowercase();

        match word.as_str() {
            "" => {}
            "exit" | "quit" => {
                if !queue.snapshot().is_empty() {
                    println!("Finishing queued commands...");
                }
                queue.push(None);
                comm.join().ok();
                println!("Exiting...");
                return 0;
            }
            "help" => print_help(),
            "queue" => {
                let pending = queue.snapshot();
                if pending.is_empty() {
                    println!("There are no pending commands");
                } else {
                    println!("Pending commands:");
                    for command in pending {
                        println!("{}", command.trim_end());
                    }
                }
            }
            "clear" => {
                queue.clear();
                println!("Commands cleared.");
            }
            "list" => queue.push(Some(proto::CMD_LIST.to_string())),
            "listrec" => queue.push(Some(proto::CMD_LIST_RECURSIVE.to_string())),
            "encrypt" => queue.push(Some(format!("{}{}", proto::CMD_ENCRYPT, rest))),
            "decrypt" => queue.push(Some(format!("{}{}", proto::CMD_DECRYPT, rest))),
            _ => {
                println!("Command unrecognized. Try typing \"help\" to display available commands")
            }
        }
    }
}

fn print_help() {
    println!(
        "\nCommands:\n\
         help:     Prints this help message\n\
         exit:     Closes the client\n\
         quit:     Same as \"exit\"\n\
         queue:    Displays the list of commands yet to be sent\n\
         clear:    Empties the list of commands to be sent\n\
         list:     Queries the server for the files in its current folder\n\
         listrec:  Same as \"list\", but recursively lists subfolders\n\
         encrypt <filename> <seed>: Instructs the server to encrypt the file specified by <filename> using <seed> for the encryption\n\
         decrypt <filename> <seed>: Same as \"encrypt\", filename must end with _enc\n"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_fifo_and_sentinel() {
        let queue = CommandQueue::new();
        queue.push(Some("LSTF\n".to_string()));
        queue.push(Some("LSTR\n".to_string()));
        queue.push(None);

        assert_eq!(queue.pop().as_deref(), Some("LSTF\n"));
        assert_eq!(queue.pop().as_deref(), Some("LSTR\n"));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_snapshot_skips_sentinel() {
        let queue = CommandQueue::new();
        queue.push(Some("LSTF\n".to_string()));
        queue.push(None);
        assert_eq!(queue.snapshot(), vec!["LSTF\n".to_string()]);
    }

    #[test]
    fn test_clear_empties_pending() {
        let queue = CommandQueue::new();
        queue.push(Some("LSTF\n".to_string()));
        queue.clear();
        assert!(queue.snapshot().is_empty());
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let queue = CommandQueue::new();
        let waiter = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop())
        };
        thread::sleep(std::time::Duration::from_millis(50));
        queue.push(Some("late".to_string()));
        assert_eq!(waiter.join().unwrap().as_deref(), Some("late"));
    }
}
