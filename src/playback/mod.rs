pub mod reconciler;
pub mod view;

pub use reconciler::{PlaybackReconciler, PreviewRequest};
pub use view::{NowPlaying, PlaybackView};
