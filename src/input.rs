//! Request Input
//!
//! Streams [`TransferRequest`]s from newline-delimited JSON, one object per line:
//!
//! ```text
//! {"memo":"drop1","asset":"M","destination":"A","amount":"100"}
//! {"Memo":"drop1","Mint":"M","To":"B","Amount":"250"}
//! ```
//!
//! Blank lines are skipped. A malformed line is reported and reading continues.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

use crate::transfer::TransferRequest;

#[derive(Debug, Error)]
pub enum InputError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Line {line}: {source}")]
    Decode {
        line: usize,
        #[source]
        source: serde_json::Error,
        content: String,
    },
}

impl InputError {
    /// Decode errors only affect their own line
    pub fn is_recoverable(&self) -> bool {
        matches!(self, InputError::Decode { .. })
    }
}

pub struct RequestReader<R> {
    lines: Lines<R>,
    line: usize,
    done: bool,
}

impl<R: AsyncBufRead + Unpin> RequestReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
            done: false,
        }
    }

    /// Line number of the last line read, 1-based
    pub fn line(&self) -> usize {
        self.line
    }

    /// Next request, `None` at end of input.
    ///
    /// An I/O error is returned once and ends the stream.
    pub async fn next_request(&mut self) -> Option<Result<TransferRequest, InputError>> {
        if self.done {
            return None;
        }

        loop {
            let content = match self.lines.next_line().await {
                Ok(Some(content)) => content,
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            };
            self.line += 1;

            if content.trim().is_empty() {
                continue;
            }

            return Some(serde_json::from_str(&content).map_err(|source| InputError::Decode {
                line: self.line,
                source,
                content,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    fn reader(input: &'static str) -> RequestReader<BufReader<&'static [u8]>> {
        RequestReader::new(BufReader::new(input.as_bytes()))
    }

    #[tokio::test]
    async fn test_reads_requests_and_skips_blank_lines() {
        let mut r = reader(
            "{\"memo\":\"drop1\",\"asset\":\"M\",\"destination\":\"A\",\"amount\":\"100\"}\n\
             \n   \n\
             {\"Memo\":\"drop1\",\"Mint\":\"M\",\"To\":\"B\",\"Amount\":250}\n",
        );

        let first = r.next_request().await.unwrap().unwrap();
        assert_eq!(first, TransferRequest::new("drop1", "M", "A", 100));

        let second = r.next_request().await.unwrap().unwrap();
        assert_eq!(second, TransferRequest::new("drop1", "M", "B", 250));
        assert_eq!(r.line(), 4);

        assert!(r.next_request().await.is_none());
        assert!(r.next_request().await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_line_does_not_stop_reading() {
        let mut r = reader(
            "not json\n\
             {\"memo\":\"m\",\"asset\":\"M\",\"destination\":\"A\",\"amount\":\"-5\"}\n\
             {\"memo\":\"m\",\"asset\":\"M\",\"destination\":\"A\",\"amount\":\"5\"}\n",
        );

        match r.next_request().await.unwrap() {
            Err(InputError::Decode { line, content, .. }) => {
                assert_eq!(line, 1);
                assert_eq!(content, "not json");
            }
            other => panic!("expected decode error, got {:?}", other),
        }

        let err = r.next_request().await.unwrap().unwrap_err();
        assert!(err.is_recoverable());
        assert!(err.to_string().starts_with("Line 2:"));

        let ok = r.next_request().await.unwrap().unwrap();
        assert_eq!(ok.amount, 5);
        assert!(r.next_request().await.is_none());
    }

    #[tokio::test]
    async fn test_empty_input() {
        let mut r = reader("");
        assert!(r.next_request().await.is_none());
        assert_eq!(r.line(), 0);
    }
}
