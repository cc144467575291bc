//! Request authorization: roles, static keys, capability tokens, and the
//! resolver that unions them into an effective permission set.

pub mod identity;
pub mod keys;
pub mod resolver;
pub mod roles;
pub mod session;
pub mod token;

pub use keys::StaticKeys;
pub use resolver::{CapabilityResolver, SessionGrants};
pub use session::SessionCodec;
pub use roles::{Role, RoleSet, RoleTree};
pub use token::{Claims, TokenSigner};
