//! Upstream credentials and masking for logs.
//!
//! A [`Credential`] never prints its secret: both `Display` and `Debug`
//! show the masked form, e.g. `gsk_abcd...wxyz`.

use std::fmt;

/// Mask a secret for logging.
///
/// Secrets of 12 characters or fewer are fully hidden; longer ones keep
/// the first 8 and last 4 characters.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 12 {
        return "***masked***".to_owned();
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

/// One upstream account. The index is its fallback priority (0 first).
#[derive(Clone)]
pub struct Credential {
    index: usize,
    secret: String,
}

impl Credential {
    pub fn new(index: usize, secret: impl Into<String>) -> Self {
        Self {
            index,
            secret: secret.into(),
        }
    }

    /// Build the ordered credential list from raw keys.
    pub fn from_keys<I, S>(keys: I) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        keys.into_iter()
            .enumerate()
            .map(|(i, k)| Self::new(i, k))
            .collect()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// The raw secret, for request headers only.
    pub fn expose(&self) -> &str {
        &self.secret
    }

    pub fn masked(&self) -> String {
        mask_secret(&self.secret)
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.index + 1, self.masked())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("index", &self.index)
            .field("secret", &self.masked())
            .finish()
    }
}
