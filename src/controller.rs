//! A dedicated thread that owns a tracee.
//!
//! Only the thread that launched a tracee may issue ptrace requests for it. A
//! [`TracerThread`] launches the tracee on its own thread, keeps the [`Session`]
//! there, and accepts commands over a channel, so any thread holding the handle
//! can drive the session.

use std::io::{self, Write};
use std::process::Command as Process;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::command::Command;
use crate::error::{Error, Result};
use crate::ptracer::{Pid, Ptracer, Tracer};
use crate::session::{Execute, Outcome, Session, SessionConfig};

enum Request {
    Execute(Command, Sender<Result<Outcome>>),
    Shutdown,
}

/// Handle to a tracee and its session, living on a thread of their own.
pub struct TracerThread {
    pid: Pid,
    commands: Vec<String>,
    requests: Sender<Request>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl TracerThread {
    /// Launch `cmd` for debugging, with session replies written to stdout.
    pub fn spawn(cmd: Process, config: SessionConfig) -> Result<Self> {
        Self::spawn_with_output(cmd, config, io::stdout())
    }

    /// Launch `cmd` for debugging, with session replies written to `out`.
    pub fn spawn_with_output<W>(cmd: Process, config: SessionConfig, out: W) -> Result<Self>
    where
        W: Write + Send + 'static,
    {
        let (requests, incoming) = mpsc::channel();
        let (ready, started) = mpsc::channel();

        let thread = thread::Builder::new()
            .name("tracer".into())
            .spawn(move || -> Result<()> {
                let tracer = match Ptracer::spawn(cmd) {
                    Ok(tracer) => tracer,
                    Err(err) => {
                        let _ = ready.send(Err(err));
                        return Ok(());
                    },
                };

                let mut session = Session::with_config(tracer, out, config);
                let _ = ready.send(Ok((session.tracer().pid(), session.commands())));

                serve(&mut session, incoming)
            })?;

        let (pid, commands) = started.recv().map_err(|_| Error::Disconnected)??;

        Ok(Self {
            pid,
            commands,
            requests,
            thread: Some(thread),
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// End the session and wait for the tracer thread to finish.
    pub fn shutdown(mut self) -> Result<()> {
        self.join()
    }

    fn join(&mut self) -> Result<()> {
        let thread = match self.thread.take() {
            Some(thread) => thread,
            None => return Ok(()),
        };

        // The thread may already have stopped serving.
        let _ = self.requests.send(Request::Shutdown);

        thread
            .join()
            .map_err(|_| Error::Internal("tracer thread panicked".into()))?
    }
}

impl Execute for TracerThread {
    fn execute(&mut self, cmd: &Command) -> Result<Outcome> {
        let (reply, response) = mpsc::channel();

        self.requests
            .send(Request::Execute(cmd.clone(), reply))
            .map_err(|_| Error::Disconnected)?;

        response.recv().map_err(|_| Error::Disconnected)?
    }

    fn commands(&self) -> Vec<String> {
        self.commands.clone()
    }
}

impl Drop for TracerThread {
    fn drop(&mut self) {
        if let Err(err) = self.join() {
            warn!(%err, "tracer thread ended with error");
        }
    }
}

fn serve<W: Write>(session: &mut Session<Ptracer, W>, requests: Receiver<Request>) -> Result<()> {
    for request in requests {
        match request {
            Request::Execute(cmd, reply) => {
                debug!(?cmd, "executing");
                let _ = reply.send(session.execute(&cmd));
            },
            Request::Shutdown => break,
        }
    }

    session.finish()
}
