//! Trace script parsing
//!
//! One command per line, `#` starts a comment:
//!
//! ```text
//! reset 2000
//! alloc p1 1000
//! expect offset p1 8
//! expect head 0x3f0
//! free p1
//! expect fail 121
//! ```

use thiserror::Error;

/// A parsed script command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Empty the ring with both cursors at `offset`
    Reset { offset: usize },
    /// Allocate `size` bytes and bind the handle to `name`
    Alloc { name: String, size: usize },
    /// Free the handle bound to `name`
    Free { name: String },
    /// Check the ring state
    Expect(Expectation),
    /// Allocation of `size` bytes must be rejected
    ExpectFail { size: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    Head(usize),
    Tail(usize),
    Available(usize),
    Offset { name: String, offset: usize },
}

/// A command with its source line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub line: usize,
    pub command: Command,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScriptError {
    #[error("line {line}: unknown command '{word}'")]
    UnknownCommand { line: usize, word: String },

    #[error("line {line}: usage: {usage}")]
    Usage { line: usize, usage: &'static str },

    #[error("line {line}: invalid number '{text}'")]
    InvalidNumber { line: usize, text: String },
}

/// Parse a decimal or `0x`-prefixed hexadecimal number
pub fn parse_number(text: &str) -> Option<usize> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// Parse a whole script
pub fn parse(source: &str) -> Result<Vec<Step>, ScriptError> {
    let mut steps = Vec::new();

    for (index, raw) in source.lines().enumerate() {
        let line = index + 1;
        let text = raw.split('#').next().unwrap_or("");
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }

        let command = parse_command(line, &words)?;
        steps.push(Step { line, command });
    }

    Ok(steps)
}

fn parse_command(line: usize, words: &[&str]) -> Result<Command, ScriptError> {
    let number = |text: &str| {
        parse_number(text).ok_or_else(|| ScriptError::InvalidNumber {
            line,
            text: text.to_string(),
        })
    };
    let usage = |usage| ScriptError::Usage { line, usage };

    match *words {
        ["reset", offset] => Ok(Command::Reset { offset: number(offset)? }),
        ["reset", ..] => Err(usage("reset <offset>")),

        ["alloc", name, size] => Ok(Command::Alloc {
            name: name.to_string(),
            size: number(size)?,
        }),
        ["alloc", ..] => Err(usage("alloc <name> <size>")),

        ["free", name] => Ok(Command::Free { name: name.to_string() }),
        ["free", ..] => Err(usage("free <name>")),

        ["expect", "head", value] => Ok(Command::Expect(Expectation::Head(number(value)?))),
        ["expect", "tail", value] => Ok(Command::Expect(Expectation::Tail(number(value)?))),
        ["expect", "available", value] => {
            Ok(Command::Expect(Expectation::Available(number(value)?)))
        }
        ["expect", "offset", name, value] => Ok(Command::Expect(Expectation::Offset {
            name: name.to_string(),
            offset: number(value)?,
        })),
        ["expect", "fail", size] => Ok(Command::ExpectFail { size: number(size)? }),
        ["expect", ..] => Err(usage(
            "expect head|tail|available <n> | expect offset <name> <n> | expect fail <size>",
        )),

        [word, ..] => Err(ScriptError::UnknownCommand {
            line,
            word: word.to_string(),
        }),
        [] => Err(usage("<command> [arguments]")),
    }
}
