//! Instruction history: a fixed-size ring buffer of disassembled lines,
//! shown by the `itrace` command.

use std::collections::VecDeque;

const CAPACITY: usize = 100;
const LINE_TRUNCATE: usize = 127;

/// Ring buffer of the last [`CAPACITY`] retired instructions.
#[derive(Debug, Default)]
pub struct InstHistory {
    lines: VecDeque<String>,
}

impl InstHistory {
    #[must_use]
    pub fn new() -> Self {
        Self { lines: VecDeque::with_capacity(CAPACITY) }
    }

    /// Append one disassembled line, evicting the oldest entry once full.
    pub fn add(&mut self, line: &str) {
        if self.lines.len() == CAPACITY {
            self.lines.pop_front();
        }
        let mut line = line.to_string();
        line.truncate(LINE_TRUNCATE);
        self.lines.push_back(line);
    }

    /// The buffered lines, oldest first.
    #[must_use]
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }
}
