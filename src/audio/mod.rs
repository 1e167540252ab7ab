//! # Audio Processing Module
//!
//! Everything that looks inside clip bytes lives here; nothing in this module touches
//! session storage.
//!
//! ## Key Components:
//! - **sniff**: content-type detection and per-channel allow-lists
//! - **codec**: clip decoding (WAV, MP3, Ogg Vorbis, AAC/M4A) and MP3 encoding
//! - **merge**: ordered concatenation of clips into one artifact
//!
//! ## Output Format:
//! - **Container/codec**: MPEG-1/2 Layer III (`audio/mpeg`)
//! - **Channels**: mono or stereo, whichever the widest clip needs
//! - **Bitrate**: constant, configurable via `merge.bitrate_kbps`

pub mod codec;
pub mod merge;
pub mod sniff;
