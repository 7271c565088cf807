pub mod attention;
pub mod feed_forward;
pub mod spatial_transformer;
pub mod transformer;
pub mod utils;

pub use attention::{CrossAttention, CrossAttentionConfig};
pub use feed_forward::{FeedForward, FeedForwardConfig};
pub use spatial_transformer::{SpatialTransformer, SpatialTransformerConfig};
pub use transformer::{BasicTransformerBlock, BasicTransformerBlockConfig};
