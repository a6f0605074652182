//! Request, list, download and delete dumps on behalf of an actor.

mod error;
mod manager;
mod models;

pub use error::{DumpError, DumpResult};
pub use manager::{make_filename, DumpManager};
pub use models::{download_path, Actor, DownloadPlan, DumpListing, GenerateDumpRequest};
