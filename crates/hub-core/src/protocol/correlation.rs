//! Correlation ids for outbound hub commands.
//!
//! # What is a correlation id? (for beginners)
//!
//! The hub answers commands asynchronously over the same WebSocket that also
//! carries unsolicited push notifications.  Replies do not arrive in the order
//! the commands were sent, so every outbound command carries an opaque string
//! id and the hub echoes that id back in its reply.  The dispatcher uses the
//! echoed id to find the caller that is waiting for the answer.
//!
//! Ids have the shape the hub firmware expects:
//!
//! ```text
//! {uuid}#{product}#{model}-{key}-{index}
//! ```
//!
//! - `uuid`, `product`, `model` come from the [`DeviceIdentity`] and never change.
//! - `key` is a number in `100..1000`, picked once per generator.
//! - `index` starts at 0 and is incremented for every id handed out.
//!
//! # Thread safety
//!
//! The index lives in an `AtomicU64`.  `fetch_add` reads and increments it as
//! one indivisible step, so concurrent callers never observe the same index
//! and therefore never receive the same id.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Lowest message key the hub accepts (inclusive).
pub const MESSAGE_KEY_MIN: u16 = 100;
/// Highest message key the hub accepts (exclusive).
pub const MESSAGE_KEY_MAX: u16 = 1000;

/// The fixed identity this client presents to the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Unique id of this client installation, in simple (hyphen-less) form.
    pub uuid: String,
    /// Product family, e.g. the operating system.
    pub product: String,
    /// Model, e.g. the CPU architecture.
    pub model: String,
}

impl DeviceIdentity {
    /// Creates an identity from explicit parts.
    pub fn new(
        uuid: impl Into<String>,
        product: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            product: product.into(),
            model: model.into(),
        }
    }

    /// Identity for this machine: a fresh random UUID, the OS family and the
    /// CPU architecture.
    pub fn local_default() -> Self {
        Self::new(
            Uuid::new_v4().simple().to_string(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}#{}", self.uuid, self.product, self.model)
    }
}

/// Produces correlation ids that are unique for the lifetime of the generator.
///
/// # Examples
///
/// ```rust
/// use hub_core::protocol::{CorrelationIdGenerator, DeviceIdentity};
///
/// let identity = DeviceIdentity::new("abc", "linux", "x86_64");
/// let ids = CorrelationIdGenerator::with_key(identity, 345);
/// assert_eq!(ids.next_id(), "abc#linux#x86_64-345-0");
/// assert_eq!(ids.next_id(), "abc#linux#x86_64-345-1");
/// ```
#[derive(Debug)]
pub struct CorrelationIdGenerator {
    /// `{uuid}#{product}#{model}-{key}`, rendered once.
    prefix: String,
    key: u16,
    index: AtomicU64,
}

impl CorrelationIdGenerator {
    /// Creates a generator with a random message key in `100..1000`.
    pub fn new(identity: DeviceIdentity) -> Self {
        Self::with_key(identity, random_message_key())
    }

    /// Creates a generator with a fixed message key.
    ///
    /// Keys outside `100..1000` are folded back into that range.
    pub fn with_key(identity: DeviceIdentity, key: u16) -> Self {
        let key = if (MESSAGE_KEY_MIN..MESSAGE_KEY_MAX).contains(&key) {
            key
        } else {
            MESSAGE_KEY_MIN + key % (MESSAGE_KEY_MAX - MESSAGE_KEY_MIN)
        };
        Self {
            prefix: format!("{identity}-{key}"),
            key,
            index: AtomicU64::new(0),
        }
    }

    /// Returns the next unused id.
    pub fn next_id(&self) -> String {
        // Relaxed is enough: only uniqueness matters, not ordering against
        // other memory operations.
        let index = self.index.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.prefix, index)
    }

    /// The message key fixed for this generator.
    pub fn key(&self) -> u16 {
        self.key
    }

    /// How many ids have been handed out so far.
    pub fn issued(&self) -> u64 {
        self.index.load(Ordering::Relaxed)
    }
}

/// Derives a key in `100..1000` from the random bits of a v4 UUID.
fn random_message_key() -> u16 {
    let bytes = Uuid::new_v4().into_bytes();
    let raw = u16::from_be_bytes([bytes[0], bytes[1]]);
    MESSAGE_KEY_MIN + raw % (MESSAGE_KEY_MAX - MESSAGE_KEY_MIN)
}
