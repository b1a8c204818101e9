//! Unix daemonization: double fork, new session, conservative umask, and
//! stdio cut over to /dev/null. Logging switches to a file sink instead of
//! inheriting the terminal.

use std::io;

#[cfg(unix)]
pub fn daemonize() -> io::Result<()> {
    use std::ffi::CString;

    unsafe {
        match libc::fork() {
            -1 => return Err(io::Error::last_os_error()),
            0 => {}
            _ => libc::_exit(0),
        }

        if libc::setsid() == -1 {
            return Err(io::Error::last_os_error());
        }

        match libc::fork() {
            -1 => return Err(io::Error::last_os_error()),
            0 => {}
            _ => libc::_exit(0),
        }

        libc::umask(0o027);

        let devnull = CString::new("/dev/null").expect("static path");
        let fd = libc::open(devnull.as_ptr(), libc::O_RDWR);
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }
        for stdio in 0..3 {
            if libc::dup2(fd, stdio) == -1 {
                return Err(io::Error::last_os_error());
            }
        }
        if fd > 2 {
            libc::close(fd);
        }
    }

    Ok(())
}

#[cfg(not(unix))]
pub fn daemonize() -> io::Result<()> {
    // Nothing to do outside Unix; the server simply stays attached.
    Ok(())
}
