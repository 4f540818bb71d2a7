pub mod artifacts;

pub use artifacts::{ArtifactPayload, ArtifactStore};
