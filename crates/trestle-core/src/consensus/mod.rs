pub mod cache;
pub mod rules;
pub mod seal;
pub mod validator;

pub use cache::*;
pub use rules::*;
pub use seal::*;
pub use validator::*;
