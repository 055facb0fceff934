#![forbid(unsafe_code)]

//! Loading ids ("lids") and the default id generator.
//!
//! A [`Lid`] is an opaque token naming one in-progress operation. Callers
//! either supply their own (`"save-profile"`) or let the tracker mint one
//! through its generator.
//!
//! # Default generator
//!
//! [`sequential_generator`] draws from a single process-wide counter, so ids
//! are unique across every tracker in the process. Ids look like
//! `lid-1`, `lid-2`, ... `lid-z`, `lid-10` (base 36 after the prefix).

use std::borrow::Borrow;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared handle to an id generator.
pub type LidGenerator = Rc<dyn Fn() -> String>;

/// Process-wide counter backing [`sequential_generator`].
static NEXT_LID: AtomicU64 = AtomicU64::new(1);

/// An opaque loading id.
///
/// Compares equal to `&str` and `String` so lookups never need to allocate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Lid(String);

impl Lid {
    /// Wrap an id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Unwrap into the underlying string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Lid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Lid {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for Lid {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&String> for Lid {
    fn from(id: &String) -> Self {
        Self(id.clone())
    }
}

impl From<Lid> for String {
    fn from(lid: Lid) -> Self {
        lid.0
    }
}

impl AsRef<str> for Lid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Lid {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Lid {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Lid {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl PartialEq<String> for Lid {
    fn eq(&self, other: &String) -> bool {
        &self.0 == other
    }
}

/// Build a generator that yields `<prefix><n>` with `n` drawn from the
/// process-wide counter and rendered in base 36.
#[must_use]
pub fn sequential_generator(prefix: impl Into<String>) -> LidGenerator {
    let prefix = prefix.into();
    Rc::new(move || {
        let n = NEXT_LID.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}{}", to_base36(n))
    })
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_owned();
    }
    let mut buf = Vec::with_capacity(13);
    while n > 0 {
        buf.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    buf.into_iter().map(char::from).collect()
}
