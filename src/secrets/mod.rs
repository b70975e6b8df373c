pub mod key;
pub mod vault;

pub use vault::Vault;
