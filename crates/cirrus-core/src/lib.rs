pub mod config;
pub mod error;
pub mod remote;
pub mod types;

pub use error::{DriveError, DriveResult};
pub use remote::{AuthApi, RemoteApi};
