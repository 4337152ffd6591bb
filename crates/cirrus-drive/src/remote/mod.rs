//! In-process remote authority.
//!
//! `MemoryRemote` answers every `RemoteApi` and `AuthApi` call from memory
//! with the same conflict rules a real server applies. `TreeSeeder` builds
//! properly sealed shares, folders and files into it.

mod memory;
mod seed;

pub use memory::MemoryRemote;
pub use seed::TreeSeeder;
