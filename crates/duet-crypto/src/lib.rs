/// Duet Crypto Library
///
/// Server-side at-rest encryption for message content (AES-256-GCM).
/// One symmetric key is derived from the configured secret and shared by
/// all messages; each encryption uses a fresh random IV. This is not an
/// end-to-end scheme — the server holds the key.
pub mod cipher;

pub use cipher::MessageCipher;
