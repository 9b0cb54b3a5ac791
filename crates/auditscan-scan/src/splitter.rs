use std::io::{self, BufRead};

/// A single line read from the input stream, without its separator
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawLine {
    /// 1-based position within the stream
    pub number: u64,
    pub bytes: Vec<u8>,
}

/// Splits a byte stream into lines.
///
/// A final line with no trailing `\n` is still yielded. The first read error
/// is yielded once and ends the sequence.
pub struct LineSplitter<R> {
    reader: R,
    line_number: u64,
    done: bool,
}

impl<R: BufRead> LineSplitter<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_number: 0,
            done: false,
        }
    }

    /// Number of lines yielded so far
    pub fn lines_read(&self) -> u64 {
        self.line_number
    }
}

impl<R: BufRead> Iterator for LineSplitter<R> {
    type Item = io::Result<RawLine>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut buf = Vec::new();
        match self.reader.read_until(b'\n', &mut buf) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                self.line_number += 1;
                Some(Ok(RawLine {
                    number: self.line_number,
                    bytes: buf,
                }))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
