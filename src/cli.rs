//! CLI utilities for reqmux.
//!
//! The utilities present in this module can be used to drive a [`Connection`](crate::Connection)
//! interactively.
use std::io::{BufRead, Write};

/// Possible commands from a user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Exit command `.exit`
    Exit,
    /// Fire-and-forget request `.send <body>`
    Send(String),
    /// Anything else is queried as-is
    Query(String),
}

/// Prompt user for a valid reqmux command.
///
/// End of input is read as `.exit`.
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<Command, String>
where
    R: BufRead,
    W: Write,
{
    let mut s = String::default();
    write!(&mut writer, "> ").map_err(|e| format!("failed to write prompt: {e}"))?;
    writer
        .flush()
        .map_err(|e| format!("failed to write prompt: {e}"))?;

    let n = reader
        .read_line(&mut s)
        .map_err(|e| format!("failed to read command: {e}"))?;
    if n == 0 {
        return Ok(Command::Exit);
    }

    match s.trim_end() {
        ".exit" => Ok(Command::Exit),
        s if s.starts_with(".send ") => Ok(Command::Send(s[".send ".len()..].to_string())),
        s if !s.starts_with(".") => Ok(Command::Query(s.to_string())),
        s => Err(format!("unrecognized command '{}'", s)),
    }
}
