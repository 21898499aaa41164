//! Concrete `ForgeClient`/`AccessPlaneClient` implementations. The core
//! only depends on the traits in `bridge_core`; these adapters are the
//! thinnest viable wiring to a real GitHub App and a real Teleport proxy,
//! kept deliberately small since the wire protocols themselves aren't this
//! crate's concern.

mod github_forge;
mod teleport_access_plane;

pub use github_forge::GitHubForgeClient;
pub use teleport_access_plane::TeleportAccessPlaneClient;
