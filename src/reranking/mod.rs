pub mod cross_encoder;

pub use cross_encoder::CrossEncoderReranker;
