use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use anyhow::Result;

/// Reads a raw sample dump from a file or from stdin ("-").
pub struct InputReader {
    reader: Box<dyn Read>,
    is_pipe: bool,
    bytes_read: u64,
}

impl InputReader {
    pub fn new<P: AsRef<Path>>(input_path: P) -> Result<Self> {
        let is_pipe = input_path.as_ref().to_string_lossy() == "-";

        let reader: Box<dyn Read> = if is_pipe {
            Box::new(io::stdin().lock())
        } else {
            Box::new(BufReader::new(File::open(input_path)?))
        };

        Ok(Self::from_reader(reader, is_pipe))
    }

    pub fn from_reader(reader: Box<dyn Read>, is_pipe: bool) -> Self {
        Self {
            reader,
            is_pipe,
            bytes_read: 0,
        }
    }

    pub fn is_pipe(&self) -> bool {
        self.is_pipe
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Calls `callback` with consecutive chunks of at most `chunk_size`
    /// bytes until EOF or until the callback returns `Ok(false)`.
    pub fn process_chunks<F>(&mut self, chunk_size: usize, mut callback: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<bool>,
    {
        let mut buffer = vec![0u8; chunk_size.max(1)];

        loop {
            let n = match self.reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            self.bytes_read += n as u64;

            if !callback(&buffer[..n])? {
                break;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn chunks_cover_the_input() -> Result<()> {
        let data: Vec<u8> = (0..=255).collect();
        let mut reader = InputReader::from_reader(Box::new(Cursor::new(data.clone())), false);

        let mut seen = Vec::new();
        reader.process_chunks(100, |chunk| {
            assert!(chunk.len() <= 100);
            seen.extend_from_slice(chunk);
            Ok(true)
        })?;

        assert_eq!(seen, data);
        assert_eq!(reader.bytes_read(), 256);
        Ok(())
    }

    #[test]
    fn callback_can_stop_early() -> Result<()> {
        let mut reader = InputReader::from_reader(Box::new(Cursor::new(vec![0u8; 1000])), false);
        let mut calls = 0;
        reader.process_chunks(10, |_| {
            calls += 1;
            Ok(calls < 3)
        })?;
        assert_eq!(calls, 3);
        Ok(())
    }
}
