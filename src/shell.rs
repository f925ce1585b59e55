//! The `dbg> ` prompt loop.

use std::io::{BufRead, Write};

use tracing::{debug, info};

use crate::command::Command;
use crate::error::Result;
use crate::session::{Execute, Outcome};

pub const PROMPT: &str = "dbg> ";

/// Read commands from `input` and run them on `engine` until `exit`, `quit`, end of
/// input, or the tracee terminates.
///
/// Unknown commands are reported on `out` and the loop carries on. Any other error
/// ends the loop and is returned.
pub fn run<E, R, W>(engine: &mut E, input: R, mut out: W) -> Result<()>
where
    E: Execute,
    R: BufRead,
    W: Write,
{
    let mut lines = input.lines();

    loop {
        write!(out, "{}", PROMPT)?;
        out.flush()?;

        let line = match lines.next() {
            Some(line) => line?,
            None => {
                debug!("end of input");
                writeln!(out)?;
                return Ok(());
            },
        };

        let cmd = match Command::parse(&line) {
            Some(cmd) => cmd,
            None => continue,
        };

        if cmd.name == "exit" || cmd.name == "quit" {
            return Ok(());
        }

        match engine.execute(&cmd) {
            Ok(Outcome::Running) => {},
            Ok(Outcome::Finished(state)) => {
                info!(?state, "tracee finished, ending session");
                return Ok(());
            },
            Err(err) if err.is_recoverable() => {
                debug!(%err, "recoverable command error");

                let mut supported = engine.commands();
                supported.push("exit".into());
                supported.push("quit".into());

                writeln!(out, "Unknown command `{}`. Supported commands are: {}", cmd.name, supported.join(", "))?;
            },
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::Error;
    use crate::ptracer::{ProcessState, Stop};
    use crate::session::Session;
    use crate::testing::FakeTracer;

    fn shell(tracer: FakeTracer, input: &str) -> (Result<()>, String, Session<FakeTracer, Vec<u8>>) {
        let mut session = Session::new(tracer, vec![]);
        let mut out = vec![];

        let res = run(&mut session, input.as_bytes(), &mut out);

        (res, String::from_utf8(out).unwrap(), session)
    }

    #[test]
    fn test_quit_and_exit() {
        for word in &["quit", "exit"] {
            let (res, out, session) = shell(FakeTracer::new(), &format!("{}\nshow pc\n", word));

            assert!(res.is_ok());
            assert_eq!(out, PROMPT);
            assert!(session.writer().is_empty());
        }
    }

    #[test]
    fn test_unknown_command_prompts_again() {
        let (res, out, _) = shell(FakeTracer::new(), "bogus\nquit\n");

        assert!(res.is_ok());
        assert_eq!(out.matches(PROMPT).count(), 2);
        assert!(out.contains(
            "Unknown command `bogus`. Supported commands are: breakpoint, continue, show, step, exit, quit"
        ));
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let (res, out, session) = shell(FakeTracer::new(), "\n   \nshow breakpoints\n");

        assert!(res.is_ok());
        assert_eq!(out.matches(PROMPT).count(), 4);
        assert!(!out.contains("Unknown command"));
        assert_eq!(session.writer().as_slice(), b"No breakpoints set\n");
    }

    #[test]
    fn test_handler_error_is_fatal() {
        let (res, out, _) = shell(FakeTracer::new(), "breakpoint zz\nshow breakpoints\nquit\n");

        assert!(matches!(res, Err(Error::Parse { .. })));
        assert_eq!(out.matches(PROMPT).count(), 1);
    }

    #[test]
    fn test_tracee_exit_ends_session() {
        let mut tracer = FakeTracer::new();
        tracer.script(Stop::Exited { exit_code: 0 }, None);

        let (res, out, session) = shell(tracer, "continue\nshow pc\n");

        assert!(res.is_ok());
        assert_eq!(out.matches(PROMPT).count(), 1);
        assert_eq!(session.tracer().state, ProcessState::Exited(0));
    }
}
