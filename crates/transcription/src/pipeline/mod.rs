pub mod audio_buffer;
pub mod wav_reader;

pub use audio_buffer::{AudioIngestBuffer, Cursor, pcm16le_to_f32};
pub use wav_reader::{SUPPORTED_FORMATS, decode_upload, decode_wav};
