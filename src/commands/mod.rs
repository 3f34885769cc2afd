pub mod extras;
pub mod transcode;
