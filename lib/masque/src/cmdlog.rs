use chrono::Local;
use fd_lock::RwLock;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

/// Appends one command record to the append-only log, under an exclusive
/// file lock so concurrent clients do not interleave records. A record is
/// a ctime-style stamp line followed by the command on its own line.
pub fn append<P: AsRef<Path>>(path: P, command: &str) -> io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut lock = RwLock::new(file);
    let mut guard = lock.write()?;

    let stamp = Local::now().format("%a %b %e %H:%M:%S %Y");
    writeln!(guard, "{}", stamp)?;
    writeln!(guard, "{}", command.trim_end())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_append_stamps_and_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.log");

        append(&path, "ENCR hello.txt 42").unwrap();
        append(&path, "DECR hello.txt_enc 42\n").unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], "ENCR hello.txt 42");
        // Trailing newlines on the command are not doubled.
        assert_eq!(lines[3], "DECR hello.txt_enc 42");
        // Stamp lines carry the full ctime-style format.
        assert_eq!(lines[0].len(), 24);
        assert_eq!(lines[2].len(), 24);
    }
}
