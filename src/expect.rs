//! [`DispatchTable`]: the single match/react loop behind every steamcmd conversation.
//!
//! A table is an ordered list of `(pattern, reaction)` pairs plus a terminal
//! pattern, by default the `Steam>` prompt. [`DispatchTable::run`] repeatedly
//! asks the session for the next match (earliest in the output, ties going to
//! the entry listed first, the terminal pattern last) and invokes the matching
//! reaction until the terminal pattern appears or a reaction stops the loop.
//!
//! ```no_run
//! use steam_cli::expect::{DispatchTable, Flow};
//! use steam_cli::ProcessSession;
//!
//! # fn main() -> steam_cli::Result<()> {
//! let mut session = ProcessSession::spawn("steamcmd", &[])?;
//! let mut ids: Vec<u32> = Vec::new();
//! session.send_line("licenses_print")?;
//! DispatchTable::new()?
//!     .on(r"License packageID (\d+):\r\n", |ids: &mut Vec<u32>, _, caps| {
//!         ids.extend(caps.text(0).and_then(|s| s.parse::<u32>().ok()));
//!         Ok(Flow::Continue)
//!     })?
//!     .run(&mut session, &mut ids)?;
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use crate::session::{Captures, ProcessSession};
use regex::bytes::Regex;

/// Prompt steamcmd prints when it is idle and ready for the next command.
pub const TERMINAL_PROMPT: &str = r"Steam>";

/// What the loop does after a reaction returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// End the loop without waiting for the terminal pattern.
    Stop,
}

/// How a [`DispatchTable::run`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The terminal pattern matched.
    Prompt,
    /// A reaction returned [`Flow::Stop`].
    Stopped,
}

/// Callback invoked with the flow state, the session and the match's groups.
///
/// Reactions may write to the session (answering a prompt, for instance).
/// An `Err` aborts the loop and propagates to the caller unchanged.
pub type Reaction<'a, S> =
    Box<dyn FnMut(&mut S, &mut ProcessSession, &Captures) -> Result<Flow> + 'a>;

pub struct DispatchTable<'a, S> {
    patterns: Vec<Regex>,
    reactions: Vec<Reaction<'a, S>>,
    terminal: Regex,
}

impl<'a, S> DispatchTable<'a, S> {
    /// An empty table terminated by [`TERMINAL_PROMPT`].
    pub fn new() -> Result<Self> {
        Self::with_terminal(TERMINAL_PROMPT)
    }

    pub fn with_terminal(terminal: &str) -> Result<Self> {
        Ok(Self {
            patterns: Vec::new(),
            reactions: Vec::new(),
            terminal: Regex::new(terminal)?,
        })
    }

    /// Append an entry. Entries listed earlier win ties.
    pub fn on<F>(mut self, pattern: &str, reaction: F) -> Result<Self>
    where
        F: FnMut(&mut S, &mut ProcessSession, &Captures) -> Result<Flow> + 'a,
    {
        self.patterns.push(Regex::new(pattern)?);
        self.reactions.push(Box::new(reaction));
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.reactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reactions.is_empty()
    }

    /// Drive `session` until the terminal pattern matches or a reaction stops.
    pub fn run(&mut self, session: &mut ProcessSession, state: &mut S) -> Result<Outcome> {
        let mut patterns: Vec<&Regex> = self.patterns.iter().collect();
        patterns.push(&self.terminal);

        loop {
            let (index, captures) = session.match_next(&patterns)?;
            let Some(reaction) = self.reactions.get_mut(index) else {
                return Ok(Outcome::Prompt);
            };
            if reaction(state, session, &captures)? == Flow::Stop {
                return Ok(Outcome::Stopped);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::session::tests::scripted;

    #[test]
    fn test_runs_until_prompt() {
        let (mut session, _) =
            scripted(&[b"License packageID 7:\r\nLicense packageID 3:\r\nSteam>"]);
        let mut ids: Vec<u32> = Vec::new();
        let outcome = DispatchTable::new()
            .unwrap()
            .on(r"License packageID (\d+):\r\n", |ids: &mut Vec<u32>, _, caps| {
                ids.push(caps.text(0).unwrap().parse().unwrap());
                Ok(Flow::Continue)
            })
            .unwrap()
            .run(&mut session, &mut ids)
            .unwrap();
        assert_eq!(outcome, Outcome::Prompt);
        assert_eq!(ids, vec![7, 3]);
    }

    #[test]
    fn test_prompt_before_entry_ends_loop() {
        let (mut session, _) = scripted(&[b"Steam> License packageID 7:\r\n"]);
        let mut hits = 0;
        DispatchTable::new()
            .unwrap()
            .on(r"License packageID (\d+):\r\n", |hits: &mut i32, _, _| {
                *hits += 1;
                Ok(Flow::Continue)
            })
            .unwrap()
            .run(&mut session, &mut hits)
            .unwrap();
        assert_eq!(hits, 0);
        assert_eq!(session.pending_output(), b" License packageID 7:\r\n");
    }

    #[test]
    fn test_reaction_can_answer_prompt() {
        let (mut session, input) = scripted(&[b"password:", b"Logged in OK\r\nSteam>"]);
        let mut logged_in = false;
        DispatchTable::new()
            .unwrap()
            .on("password:", |_: &mut bool, session, _| {
                session.send_secret("secret")?;
                Ok(Flow::Continue)
            })
            .unwrap()
            .on(r"Logged in OK\r\n", |logged_in: &mut bool, _, _| {
                *logged_in = true;
                Ok(Flow::Continue)
            })
            .unwrap()
            .run(&mut session, &mut logged_in)
            .unwrap();
        assert!(logged_in);
        assert_eq!(input.text(), "secret\n");
    }

    #[test]
    fn test_stop_ends_without_prompt() {
        let (mut session, _) = scripted(&[b"Success!\r\n"]);
        let outcome = DispatchTable::new()
            .unwrap()
            .on(r"Success!\r\n", |_: &mut (), _, _| Ok(Flow::Stop))
            .unwrap()
            .run(&mut session, &mut ())
            .unwrap();
        assert_eq!(outcome, Outcome::Stopped);
    }

    #[test]
    fn test_reaction_error_aborts() {
        let (mut session, _) = scripted(&[b"FAILED login with result code Invalid Password\r\nSteam>"]);
        let err = DispatchTable::new()
            .unwrap()
            .on(r"FAILED login with result code ([^\r\n]+)\r\n", |_: &mut (), _, caps| {
                Err(Error::LoginFailed(caps.text(0).unwrap_or_default()))
            })
            .unwrap()
            .run(&mut session, &mut ())
            .unwrap_err();
        assert!(matches!(err, Error::LoginFailed(reason) if reason == "Invalid Password"));
        assert_eq!(session.pending_output(), b"Steam>");
    }

    #[test]
    fn test_termination_propagates() {
        let (mut session, _) = scripted(&[b"Loading..."]);
        let err = DispatchTable::<()>::new()
            .unwrap()
            .run(&mut session, &mut ())
            .unwrap_err();
        assert!(matches!(err, Error::SessionTerminated));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(matches!(
            DispatchTable::<()>::new().unwrap().on("(", |_, _, _| Ok(Flow::Continue)),
            Err(Error::Pattern(_))
        ));
    }
}
