//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `build` - run the staged artifact pipeline
//! - `image` - assemble a raw bootable disk image
//! - `fetch` - resolve sources into the cache
//! - `export` - copy artifacts out of the build tree
//! - `preflight` - check host tools
//! - `clean` - remove build artifacts
//! - `show` - display configuration and cache status

pub mod build;
pub mod clean;
pub mod export;
pub mod fetch;
pub mod image;
pub mod preflight;
pub mod show;

pub use build::cmd_build;
pub use clean::{cmd_clean, CleanTarget};
pub use export::cmd_export;
pub use fetch::{cmd_fetch, FetchTarget};
pub use image::{cmd_image, ImageArgs};
pub use preflight::cmd_preflight;
pub use show::{cmd_show, ShowTarget};
