use crate::error::{Error, Result};
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::sync::mpsc::{Receiver, channel};
use std::thread;

/// A program running inside a PTY, so it flushes prompts as if interactive.
pub struct PtyChild {
    // Dropping the master closes the terminal, so it lives as long as the child.
    _master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
}

impl PtyChild {
    /// Spawn `program` in a fresh PTY.
    ///
    /// Returns the child handle, its stdin writer, and a channel fed with
    /// output chunks by a background reader thread. The channel disconnects
    /// once the child closes its side of the terminal.
    pub fn spawn(
        program: &str,
        args: &[String],
    ) -> Result<(Self, Box<dyn Write + Send>, Receiver<Vec<u8>>)> {
        let pty_system = portable_pty::native_pty_system();

        // Wide enough that progress lines are not wrapped by the terminal.
        let pty_size = PtySize {
            rows: 24,
            cols: 240,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pair = pty_system
            .openpty(pty_size)
            .map_err(|e| Error::Pty(format!("failed to open PTY: {e}")))?;

        let mut cmd = CommandBuilder::new(program);
        for arg in args {
            cmd.arg(arg);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| Error::Pty(format!("failed to spawn {program}: {e}")))?;
        drop(pair.slave);

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| Error::Pty(format!("failed to get PTY writer: {e}")))?;

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| Error::Pty(format!("failed to get PTY reader: {e}")))?;

        tracing::debug!(program, ?args, "spawned child in PTY");

        let session = PtyChild {
            _master: pair.master,
            child,
        };

        Ok((session, writer, spawn_reader(reader)))
    }

    /// Check whether the child process is still running.
    pub fn is_running(&mut self) -> bool {
        self.child.try_wait().ok().flatten().is_none()
    }

    /// Wait for the child process to exit.
    pub fn wait(&mut self) -> Result<()> {
        let status = self.child.wait()?;
        tracing::debug!(success = status.success(), "child exited");
        Ok(())
    }

    pub fn kill(&mut self) -> Result<()> {
        self.child.kill()?;
        Ok(())
    }
}

/// Spawns a background thread forwarding everything read from `reader`.
pub(crate) fn spawn_reader<R: Read + Send + 'static>(mut reader: R) -> Receiver<Vec<u8>> {
    let (tx, rx) = channel();

    thread::spawn(move || {
        let mut buffer = [0u8; 4096];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    tracing::trace!(target: "steamcmd", "{}", String::from_utf8_lossy(&buffer[..n]));
                    if tx.send(buffer[..n].to_vec()).is_err() {
                        break;
                    }
                }
                // Linux reports EIO once the child side of the PTY is closed.
                Err(_) => break,
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_reader_forwards_until_eof() {
        let rx = spawn_reader(Cursor::new(b"Steam>".to_vec()));
        let mut received = Vec::new();
        while let Ok(chunk) = rx.recv() {
            received.extend(chunk);
        }
        assert_eq!(received, b"Steam>");
    }
}
