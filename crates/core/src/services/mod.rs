mod account;
mod validator;

pub use account::*;
pub use validator::*;
