// Engine adapter layer: models, the Engine seam and yt-dlp helpers

pub mod diagnostics;
pub mod errors;
pub mod format_selector;
pub mod models;
pub mod progress;
pub mod tools;
pub mod traits;
pub mod utils;

pub use errors::DownloadError;
pub use format_selector::{FormatChoice, FormatOption};
pub use models::{
    DownloadProgress, EngineInfo, EngineOutput, EngineRequest, MediaKind, SearchResult,
    VideoDetail, VideoFormat,
};
pub use traits::{Engine, ProgressEmitter};
