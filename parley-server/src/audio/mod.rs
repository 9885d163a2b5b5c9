mod audio_frame;
mod segmenter;

pub use audio_frame::*;
pub use segmenter::*;
