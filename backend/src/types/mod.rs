mod id;

pub use id::{SessionId, UserId};
