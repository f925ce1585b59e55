#![allow(dead_code)]

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use ptdbg::Command;

/// Parse a shell line, which must not be blank.
pub fn cmd(line: &str) -> Command {
    Command::parse(line).expect("blank command line")
}

/// Session output that can be read back after the session moved to another thread.
#[derive(Clone, Debug, Default)]
pub struct SharedOutput(Arc<Mutex<Vec<u8>>>);

impl SharedOutput {
    pub fn contents(&self) -> String {
        let buf = self.0.lock().unwrap();
        String::from_utf8(buf.clone()).expect("non-UTF-8 session output")
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
