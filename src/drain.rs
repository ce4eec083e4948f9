//! Result Drain: bounded binary reads and line-oriented text reads over the
//! staging output file, with poll-based readiness and cursor-forwarding
//! partial-read semantics (spec.md §4.4).
//!
//! Grounded in `original_source/src/shim.c`'s `read_bytes`/`read_lines` for
//! exact sizing, poll, and EOF semantics — notably that the size cap for
//! `read_bytes` compares `n` against the file's *total* size via `fstat`,
//! not the remaining bytes from the cursor, which is a faithful
//! simplification carried over rather than a bug to silently fix.

use std::io::{BufRead, BufReader, Read};
use std::os::fd::AsFd;
use std::os::unix::fs::OpenOptionsExt;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::errors::Error;
use crate::pool::{self, DrainError, PoolError, SaveKind};

/// 4096-byte lines, matching the original's `MAX_VARLEN` getline buffer.
const LINE_BUF: usize = 4096;

/// Block until `fd` reports readable or `poll` itself fails, in 250ms
/// slices — matches the original's busy-poll loop (`while (pl < 1) poll(...,
/// 250)`), reproduced instead of collapsing it into a single infinite-
/// timeout poll so behavior under spurious wakeups stays identical.
fn wait_readable(fd: impl AsFd) {
    loop {
        let mut fds = [PollFd::new(fd.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(250u16)) {
            Ok(n) if n >= 1 => return,
            Ok(_) => continue,
            Err(_) => return,
        }
    }
}

/// `/read_bytes`: open (lazily, once) the staging file read-only
/// non-blocking, poll for readiness, and read up to `n` bytes.
pub fn read_bytes(id: &str, n: i64) -> Result<Vec<u8>, Error> {
    let slot = pool::get().find(id).ok_or(PoolError::NotFound)?;
    slot.mark_busy();

    let outcome = slot.with_lock(|inner| -> Result<Vec<u8>, Error> {
        match inner.save_kind {
            SaveKind::None => return Err(DrainError::NotSaved.into()),
            SaveKind::Text => return Err(DrainError::NotBinary.into()),
            SaveKind::Binary => {}
        }

        if inner.drain.bytes_file.is_none() {
            let output_path = &inner
                .staging
                .as_ref()
                .expect("unavailable slot has staging buffers")
                .output_path;
            let file = std::fs::OpenOptions::new()
                .read(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(output_path)?;
            inner.drain.bytes_file = Some(file);
        }
        let file = inner.drain.bytes_file.as_mut().unwrap();

        if n < 1 {
            let mut whole = Vec::new();
            file.read_to_end(&mut whole)?;
            return Ok(whole);
        }

        let mut n = n.min(i32::MAX as i64);
        let size = file.metadata()?.len() as i64;
        if size < n {
            n = size;
        }

        wait_readable(&*file);

        let mut buf = vec![0u8; n as usize];
        let read = file.read(&mut buf)?;
        if read < 1 {
            return Err(DrainError::EofBytes.into());
        }
        buf.truncate(read);
        Ok(buf)
    });

    // OOM/open/fstat failures (surfaced here as `Error::Io`) destroy the
    // slot per spec.md §4.4; every other outcome, including the client-
    // facing drain errors, leaves it intact for a retry.
    match &outcome {
        Err(Error::Io(_)) => slot.cleanup(),
        _ => slot.mark_idle(),
    }
    outcome
}

/// `/read_lines`: open (lazily, once) a line-buffered reader over the
/// staging file and read at most `n` lines into a doubling buffer.
pub fn read_lines(id: &str, n: i64) -> Result<Vec<u8>, Error> {
    let slot = pool::get().find(id).ok_or(PoolError::NotFound)?;
    slot.mark_busy();

    let outcome = slot.with_lock(|inner| -> Result<Vec<u8>, Error> {
        match inner.save_kind {
            SaveKind::None => return Err(DrainError::NotSaved.into()),
            SaveKind::Binary => return Err(DrainError::NotText.into()),
            SaveKind::Text => {}
        }

        let output_path = &inner
            .staging
            .as_ref()
            .expect("unavailable slot has staging buffers")
            .output_path;

        if n < 1 {
            let whole = std::fs::read(output_path)?;
            return Ok(whole);
        }

        if inner.drain.lines_reader.is_none() {
            let file = std::fs::OpenOptions::new()
                .read(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(output_path)?;
            inner.drain.lines_reader = Some(BufReader::with_capacity(LINE_BUF, file));
        }
        let reader = inner.drain.lines_reader.as_mut().unwrap();

        // Cap n so that n * 4096 <= i32::MAX, per spec.md §4.4.
        let n = n.min(i32::MAX as i64 / LINE_BUF as i64);

        let mut out = Vec::with_capacity(LINE_BUF * n.max(1) as usize);
        let mut lines_read = 0i64;
        while lines_read < n {
            wait_readable(reader.get_ref());
            let mut line = Vec::new();
            let read = reader.read_until(b'\n', &mut line)?;
            if read == 0 {
                break;
            }
            if out.len() + line.len() > out.capacity() {
                out.reserve(out.capacity().max(line.len()));
            }
            out.extend_from_slice(&line);
            lines_read += 1;
        }

        if out.is_empty() {
            return Err(DrainError::EofLines.into());
        }
        Ok(out)
    });

    match &outcome {
        Err(Error::Io(_)) => slot.cleanup(),
        _ => slot.mark_idle(),
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn wait_readable_returns_immediately_for_a_plain_file() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"data").unwrap();
        use std::io::Seek;
        file.seek(std::io::SeekFrom::Start(0)).unwrap();
        // Regular files are always "ready" per poll(2); this must not hang.
        wait_readable(&file);
    }
}
