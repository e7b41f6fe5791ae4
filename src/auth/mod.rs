/// Authentication module
///
/// Password hashing, access/refresh token minting, the refresh session
/// ledger and the session authority that composes them.

mod authority;
mod claims;
mod jwt;
mod ledger;
mod password;

pub use authority::{AuthSession, ClientContext, SessionAuthority, TokenPair, UserProfile};
pub use claims::{new_token_id, Claims};
pub use jwt::{MintedToken, SigningKeys, TokenClass, TokenError, TokenMinter};
pub use ledger::{LedgerError, SessionLedger};
pub use password::{CredentialHasher, EncodedHash, HashAlgorithm, HashFormatError, HashParams};
