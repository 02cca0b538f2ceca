//! [`ProcessSession`]: line-oriented I/O and pattern matching over a child's terminal output.

use crate::error::{Error, Result};
use crate::pty::PtyChild;
use crate::vdf::decode_text;
use regex::bytes::Regex;
use std::io::Write;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

/// Capture groups of one match, copied out of the consumed output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Captures {
    groups: Vec<Option<Vec<u8>>>,
}

impl Captures {
    fn from_regex(caps: &regex::bytes::Captures<'_>) -> Self {
        Self {
            groups: caps
                .iter()
                .skip(1)
                .map(|g| g.map(|m| m.as_bytes().to_vec()))
                .collect(),
        }
    }

    /// Raw bytes of group `index` (0 is the first parenthesised group).
    pub fn bytes(&self, index: usize) -> Option<&[u8]> {
        self.groups.get(index)?.as_deref()
    }

    /// Group `index` decoded as text.
    pub fn text(&self, index: usize) -> Option<String> {
        self.bytes(index).map(decode_text)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// One live conversation with an interactive child process.
///
/// Output arrives as chunks on a channel and accumulates in a buffer until a
/// [`match_next`](Self::match_next) call consumes it.
pub struct ProcessSession {
    child: Option<PtyChild>,
    writer: Box<dyn Write + Send>,
    output_rx: Receiver<Vec<u8>>,
    buffer: Vec<u8>,
    read_timeout: Option<Duration>,
    alive: bool,
    logged_in: bool,
}

impl ProcessSession {
    /// Spawn `program` inside a PTY and start collecting its output.
    pub fn spawn(program: &str, args: &[String]) -> Result<Self> {
        let (child, writer, output_rx) = PtyChild::spawn(program, args)?;
        let mut session = Self::from_parts(writer, output_rx);
        session.child = Some(child);
        Ok(session)
    }

    /// Build a session over an arbitrary input sink and output channel.
    ///
    /// The session counts as terminated once every sender of `output_rx`
    /// has been dropped and the buffer holds no further match.
    pub fn from_parts(writer: Box<dyn Write + Send>, output_rx: Receiver<Vec<u8>>) -> Self {
        Self {
            child: None,
            writer,
            output_rx,
            buffer: Vec::new(),
            read_timeout: None,
            alive: true,
            logged_in: false,
        }
    }

    /// Fail [`match_next`](Self::match_next) with [`Error::Timeout`] when no
    /// output arrives for `timeout`. `None` waits indefinitely.
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    pub(crate) fn set_logged_in(&mut self, logged_in: bool) {
        self.logged_in = logged_in;
    }

    /// Send `text` followed by a newline.
    pub fn send_line(&mut self, text: &str) -> Result<()> {
        tracing::debug!(line = text, "sending to steamcmd");
        self.write_line(text)
    }

    /// Send a line that must never appear in logs.
    pub fn send_secret(&mut self, text: &str) -> Result<()> {
        tracing::debug!("sending secret to steamcmd");
        self.write_line(text)
    }

    fn write_line(&mut self, text: &str) -> Result<()> {
        if !self.alive {
            return Err(Error::SessionTerminated);
        }
        let mut data = Vec::with_capacity(text.len() + 1);
        data.extend_from_slice(text.as_bytes());
        data.push(b'\n');
        self.writer.write_all(&data)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Block until one of `patterns` matches the buffered output.
    ///
    /// The winner is the pattern whose match starts earliest in the buffer;
    /// on equal start offsets the pattern listed first wins. The buffer is
    /// consumed up to and including the winning match, so the same output is
    /// never matched twice.
    ///
    /// # Errors
    ///
    /// [`Error::SessionTerminated`] if the child's output ends first, or
    /// [`Error::Timeout`] if a read timeout is configured and elapses.
    pub fn match_next(&mut self, patterns: &[&Regex]) -> Result<(usize, Captures)> {
        loop {
            if let Some(found) = self.take_earliest(patterns) {
                return Ok(found);
            }

            let received = match self.read_timeout {
                Some(timeout) => self.output_rx.recv_timeout(timeout),
                None => self
                    .output_rx
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected),
            };

            match received {
                Ok(chunk) => self.buffer.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(Error::Timeout {
                        pattern: patterns
                            .iter()
                            .map(|p| p.as_str())
                            .collect::<Vec<_>>()
                            .join(" | "),
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.alive = false;
                    self.logged_in = false;
                    return Err(Error::SessionTerminated);
                }
            }
        }
    }

    fn take_earliest(&mut self, patterns: &[&Regex]) -> Option<(usize, Captures)> {
        let mut best: Option<(usize, usize, usize, Captures)> = None;
        for (index, pattern) in patterns.iter().enumerate() {
            let Some(caps) = pattern.captures(&self.buffer) else {
                continue;
            };
            let Some(whole) = caps.get(0) else {
                continue;
            };
            if best.as_ref().is_none_or(|(_, start, _, _)| whole.start() < *start) {
                best = Some((index, whole.start(), whole.end(), Captures::from_regex(&caps)));
            }
        }

        let (index, _, end, captures) = best?;
        self.buffer.drain(..end);
        tracing::debug!(pattern = patterns[index].as_str(), "matched steamcmd output");
        Some((index, captures))
    }

    /// Output received but not yet consumed by a match.
    pub fn pending_output(&self) -> &[u8] {
        &self.buffer
    }

    /// Ask the child to quit and wait for it to exit.
    pub fn close(&mut self) -> Result<()> {
        if self.alive {
            // The child may already be gone; quitting is best effort.
            let _ = self.send_line("quit");
            self.alive = false;
            self.logged_in = false;
        }
        if let Some(child) = self.child.as_mut() {
            if child.is_running() {
                child.wait()?;
            }
        }
        Ok(())
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("failed to shut down steamcmd: {e}");
            if let Some(child) = self.child.as_mut() {
                let _ = child.kill();
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::mpsc::{Sender, channel};
    use std::sync::{Arc, Mutex};

    /// Input sink whose contents stay inspectable after being boxed.
    #[derive(Clone, Default)]
    pub(crate) struct SharedInput(pub Arc<Mutex<Vec<u8>>>);

    impl SharedInput {
        pub(crate) fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for SharedInput {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// A session whose output is exactly `chunks`, after which it terminates.
    pub(crate) fn scripted(chunks: &[&[u8]]) -> (ProcessSession, SharedInput) {
        let (tx, rx) = channel();
        for chunk in chunks {
            tx.send(chunk.to_vec()).unwrap();
        }
        drop(tx);
        let input = SharedInput::default();
        (ProcessSession::from_parts(Box::new(input.clone()), rx), input)
    }

    fn open() -> (ProcessSession, Sender<Vec<u8>>) {
        let (tx, rx) = channel();
        (ProcessSession::from_parts(Box::new(SharedInput::default()), rx), tx)
    }

    fn re(p: &str) -> Regex {
        Regex::new(p).unwrap()
    }

    #[test]
    fn test_earliest_match_wins_over_table_order() {
        let (mut session, _) = scripted(&[b"first second"]);
        let (a, b) = (re("second"), re("first"));
        let (index, _) = session.match_next(&[&a, &b]).unwrap();
        assert_eq!(index, 1);
        assert_eq!(session.pending_output(), b" second");
    }

    #[test]
    fn test_table_order_breaks_ties() {
        let (mut session, _) = scripted(&[b"Steam> "]);
        let (a, b) = (re("Steam"), re("Steam>"));
        let (index, _) = session.match_next(&[&a, &b]).unwrap();
        assert_eq!(index, 0);
    }

    #[test]
    fn test_output_is_consumed_once() {
        let (mut session, _) = scripted(&[b"License packageID 1:\r\nLicense packageID 2:\r\n"]);
        let license = re(r"License packageID (\d+):\r\n");
        let (_, first) = session.match_next(&[&license]).unwrap();
        let (_, second) = session.match_next(&[&license]).unwrap();
        assert_eq!(first.text(0).as_deref(), Some("1"));
        assert_eq!(second.text(0).as_deref(), Some("2"));
    }

    #[test]
    fn test_match_spans_chunks() {
        let (mut session, tx) = open();
        tx.send(b"Logged in".to_vec()).unwrap();
        tx.send(b" OK\r\n".to_vec()).unwrap();
        let ok = re(r"Logged in OK\r\n");
        assert_eq!(session.match_next(&[&ok]).unwrap().0, 0);
    }

    #[test]
    fn test_terminated_when_output_ends() {
        let (mut session, _) = scripted(&[b"partial output"]);
        let err = session.match_next(&[&re("Steam>")]).unwrap_err();
        assert!(matches!(err, Error::SessionTerminated));
        assert!(!session.is_alive());
        assert!(matches!(
            session.send_line("quit"),
            Err(Error::SessionTerminated)
        ));
    }

    #[test]
    fn test_read_timeout() {
        let (session, _tx) = open();
        let mut session = session.with_read_timeout(Some(Duration::from_millis(20)));
        let err = session.match_next(&[&re("Steam>")]).unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(session.is_alive());
    }

    #[test]
    fn test_send_line_appends_newline() {
        let (mut session, input) = scripted(&[]);
        session.send_line("licenses_print").unwrap();
        session.send_secret("hunter2").unwrap();
        assert_eq!(input.text(), "licenses_print\nhunter2\n");
    }

    #[test]
    fn test_optional_groups() {
        let (mut session, _) = scripted(&[b"ab"]);
        let (_, caps) = session.match_next(&[&re("(a)(x)?(b)")]).unwrap();
        assert_eq!(caps.len(), 3);
        assert_eq!(caps.bytes(0), Some(&b"a"[..]));
        assert_eq!(caps.bytes(1), None);
        assert_eq!(caps.text(2).as_deref(), Some("b"));
    }

    #[test]
    fn test_close_sends_quit() {
        let (mut session, input) = scripted(&[]);
        session.close().unwrap();
        session.close().unwrap();
        assert_eq!(input.text(), "quit\n");
    }
}
