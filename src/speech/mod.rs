//! Speech output: sentence segmentation, synthesis and ordered dispatch.

pub mod dispatcher;
pub mod segmenter;
pub mod synth;

pub use dispatcher::{AudioEvent, SpeechDispatcher, SpeechPool};
pub use segmenter::SentenceSegmenter;
pub use synth::{HttpSpeechSynthesizer, SpeechSynthesizer, Voice};
