//! Wipeable secret buffers.
//!
//! Wiping is best-effort: copies made by the allocator, the terminal layer or
//! an HTTP client before a value is captured here cannot be reached.

use std::fmt;

use zeroize::Zeroize;

/// An owned secret that is overwritten with zeros on [`SecureString::clear`]
/// and on drop.
pub struct SecureString {
    inner: String,
}

impl SecureString {
    /// Copy `source` into a fresh buffer.
    pub fn new(source: &str) -> Self {
        Self {
            inner: source.to_owned(),
        }
    }

    /// Copy `plain` into a fresh buffer and wipe `plain`.
    pub fn capture(plain: &mut String) -> Self {
        let secure = Self::new(plain);
        plain.zeroize();
        secure
    }

    /// The secret value. Callers must not keep copies beyond the call that
    /// needs it.
    pub fn expose(&self) -> &str {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True before any value is set and after [`SecureString::clear`].
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Overwrite the buffer with zeros and release it.
    pub fn clear(&mut self) {
        self.inner.zeroize();
        self.inner = String::new();
    }
}

impl Drop for SecureString {
    fn drop(&mut self) {
        self.inner.zeroize();
    }
}

impl From<String> for SecureString {
    fn from(mut value: String) -> Self {
        Self::capture(&mut value)
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("SecureString(<empty>)")
        } else {
            f.write_str("SecureString(***)")
        }
    }
}

/// Handle to a secret held by a [`SecretStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SecretId(usize);

/// Append-only registry of every secret captured during a session, wiped in
/// one pass when the session ends.
#[derive(Debug, Default)]
pub struct SecretStore {
    slots: Vec<SecureString>,
}

impl SecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, secret: SecureString) -> SecretId {
        self.slots.push(secret);
        SecretId(self.slots.len() - 1)
    }

    pub fn get(&self, id: SecretId) -> Option<&SecureString> {
        self.slots.get(id.0)
    }

    /// Wipe one secret early, e.g. a credential replaced by a retry.
    pub fn wipe(&mut self, id: SecretId) {
        if let Some(slot) = self.slots.get_mut(id.0) {
            slot.clear();
        }
    }

    pub fn wipe_all(&mut self) {
        for slot in &mut self.slots {
            slot.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Every registered secret has been wiped.
    pub fn all_wiped(&self) -> bool {
        self.slots.iter().all(SecureString::is_empty)
    }
}

impl Drop for SecretStore {
    fn drop(&mut self) {
        self.wipe_all();
    }
}
