//! Sign clip resources: loading, caching and cloning

pub mod element;
pub mod loader;
pub mod pool;
pub mod resolver;

pub use element::{ClonedVideo, MediaFlags, VideoElement, VideoMetadata};
pub use loader::{FsVideoLoader, VideoLoader};
pub use pool::{PreloadStatus, Resource, ResourcePool};
pub use resolver::{PathTemplateResolver, SourceResolver};
