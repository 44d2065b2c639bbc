//! Text inputs: tokenizer capability and literal-or-file resolution.

use std::path::Path;

use tokenizers::Tokenizer;

use crate::{Error, Result};

/// Anything that turns text into token ids.
pub trait TextTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>>;
}

impl TextTokenizer for Tokenizer {
    /// Encodes with special tokens, as the checkpoint's tokenizer expects.
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = (**self).encode(text, true)?;
        Ok(encoding.get_ids().to_vec())
    }
}

/// Load `tokenizer.json`.
pub fn load_tokenizer(path: impl AsRef<Path>) -> Result<Tokenizer> {
    let path = path.as_ref();
    tracing::debug!(?path, "loading tokenizer");
    Ok(Tokenizer::from_file(path)?)
}

/// Use `value` as text, unless it names an existing file; then read that file.
pub fn read_text_or_file(value: &str) -> Result<String> {
    let path = Path::new(value);
    if !path.is_file() {
        return Ok(value.to_string());
    }
    let bytes = std::fs::read(path).map_err(|e| unreadable_text(path, e))?;
    String::from_utf8(bytes).map_err(|_| {
        Error::InvalidInput(format!("{} is not valid UTF-8 text", path.display()))
    })
}

fn unreadable_text(path: &Path, error: std::io::Error) -> Error {
    Error::InvalidInput(format!("cannot read {}: {error}", path.display()))
}
