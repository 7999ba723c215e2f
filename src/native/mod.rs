pub mod acquire;
pub mod binding;

pub use acquire::HandleAcquirer;
pub use binding::StreamingApi;
