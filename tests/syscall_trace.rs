use std::process::Command;

use anyhow::Result;
use ntest::timeout;
use pretty_assertions::assert_eq;
use ptdbg::{syscall, Event, Ptracer, SyscallTrace, Tracer};

#[test]
#[timeout(5000)]
fn test_trace_true() -> Result<()> {
    let tracer = Ptracer::spawn(Command::new("true"))?;
    let pid = tracer.pid();

    let events = SyscallTrace::new(tracer).collect::<ptdbg::Result<Vec<_>>>()?;

    for event in &events {
        eprintln!("{}", event);
    }

    let (last, syscalls) = events.split_last().expect("no events");

    assert_eq!(*last, Event::Exit { pid, exit_code: 0 });
    assert!(!syscalls.is_empty());

    for event in syscalls {
        match event {
            Event::Syscall { pid: p, id } => {
                assert_eq!(*p, pid);
                assert!(*id < 1024, "implausible syscall number {}", id);
            },
            other => panic!("unexpected event before exit: {:?}", other),
        }
    }

    Ok(())
}

#[test]
#[timeout(5000)]
fn test_trace_reports_exit_code() -> Result<()> {
    let mut cmd = Command::new("sh");
    cmd.args(&["-c", "exit 3"]);

    let tracer = Ptracer::spawn(cmd)?;

    let mut count = 0;
    let last = syscall::trace(tracer, |event| {
        if !event.is_terminal() {
            count += 1;
        }
        Ok(())
    })?;

    assert!(matches!(last, Event::Exit { exit_code: 3, .. }));
    assert!(count > 0);

    Ok(())
}

#[test]
#[timeout(5000)]
fn test_launch_missing_program() {
    let res = Ptracer::spawn(Command::new("/nonexistent/ptdbg-test-program"));

    assert!(matches!(res, Err(ptdbg::Error::Launch { .. })));
}
