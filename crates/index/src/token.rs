//! The analyzer seam.
//!
//! Tokenization itself is an external concern; indexed fields hand the
//! segment writer a [`TokenStream`], which may fail mid-stream (a failing
//! stream rolls the whole document back).

use tessera_core::Result;

/// One token produced by an analyzer.
#[derive(Debug, Clone, Default)]
pub struct Token {
    pub term: Vec<u8>,
    /// Positions advance by this much; 0 stacks synonyms.
    pub position_increment: u32,
    /// Byte offsets into the original input.
    pub offsets: Option<(u32, u32)>,
    pub payload: Option<Vec<u8>>,
}

impl Token {
    pub fn new(term: impl Into<Vec<u8>>) -> Self {
        Self {
            term: term.into(),
            position_increment: 1,
            offsets: None,
            payload: None,
        }
    }
}

/// A restartable stream of tokens for one field value.
pub trait TokenStream {
    /// Advance to the next token; `false` at end of input.
    fn advance(&mut self) -> Result<bool>;

    /// The current token; valid after a successful `advance`.
    fn token(&self) -> &Token;
}

/// Token stream over a pre-tokenized list; the unit-test analyzer.
pub struct VecTokenStream {
    tokens: Vec<Token>,
    at: usize,
}

impl VecTokenStream {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, at: 0 }
    }

    /// Whitespace-split terms with unit position increments.
    pub fn from_text(text: &str) -> Self {
        Self::new(
            text.split_whitespace()
                .map(|w| Token::new(w.as_bytes().to_vec()))
                .collect(),
        )
    }
}

impl TokenStream for VecTokenStream {
    fn advance(&mut self) -> Result<bool> {
        if self.at < self.tokens.len() {
            self.at += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn token(&self) -> &Token {
        &self.tokens[self.at - 1]
    }
}

/// A stream that fails after yielding a fixed number of tokens; used to
/// exercise document rollback.
pub struct FailingTokenStream {
    inner: VecTokenStream,
    fail_after: usize,
    yielded: usize,
}

impl FailingTokenStream {
    pub fn new(tokens: Vec<Token>, fail_after: usize) -> Self {
        Self {
            inner: VecTokenStream::new(tokens),
            fail_after,
            yielded: 0,
        }
    }
}

impl TokenStream for FailingTokenStream {
    fn advance(&mut self) -> Result<bool> {
        if self.yielded >= self.fail_after {
            return Err(tessera_core::Error::IllegalState(
                "analyzer failure".to_string(),
            ));
        }
        self.yielded += 1;
        self.inner.advance()
    }

    fn token(&self) -> &Token {
        self.inner.token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_stream() {
        let mut stream = VecTokenStream::from_text("quick brown fox");
        let mut terms = Vec::new();
        while stream.advance().unwrap() {
            terms.push(stream.token().term.clone());
        }
        assert_eq!(terms, vec![b"quick".to_vec(), b"brown".to_vec(), b"fox".to_vec()]);
    }

    #[test]
    fn test_failing_stream() {
        let tokens = vec![Token::new("a"), Token::new("b"), Token::new("c")];
        let mut stream = FailingTokenStream::new(tokens, 2);
        assert!(stream.advance().unwrap());
        assert!(stream.advance().unwrap());
        assert!(stream.advance().is_err());
    }
}
